//! Transport seam: how decoded messages enter and leave the bridge.
//!
//! Wire framing and encoding live outside this crate. A transport delivers
//! already-decoded [`Message`]s to a bound port's dispatcher and accepts
//! pre-formatted outgoing messages through [`TransportSink`]. The in-process
//! [`LoopbackHub`] implements both sides for local wiring and tests.

mod loopback;

pub use loopback::LoopbackHub;
pub(crate) use loopback::PortBinding;

use crate::error::Result;
use crate::value::Message;
use serde::{Deserialize, Serialize};

/// Default destination host: local loopback.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// One outgoing destination: `(host, port, address)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SendTarget {
    pub host: String,
    pub port: u16,
    pub address: String,
}

impl SendTarget {
    /// Target on the local loopback host.
    pub fn new(port: u16, address: impl Into<String>) -> Self {
        Self::with_host(DEFAULT_HOST, port, address)
    }

    pub fn with_host(host: impl Into<String>, port: u16, address: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            address: address.into(),
        }
    }
}

impl std::fmt::Display for SendTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}{}", self.host, self.port, self.address)
    }
}

/// Outgoing side of a transport. Sends are fire-and-forget: an unreachable
/// destination is not an error, only a closed transport is.
pub trait TransportSink: Send + Sync {
    fn send(&self, host: &str, port: u16, msg: Message) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_target_defaults_to_loopback() {
        let target = SendTarget::new(9900, "/pitch");
        assert_eq!(target.host, DEFAULT_HOST);
        assert_eq!(target.port, 9900);
        assert_eq!(target.to_string(), "127.0.0.1:9900/pitch");
    }
}
