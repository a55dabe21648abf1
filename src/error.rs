//! Error types for the control bridge.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Port {0} already bound")]
    PortInUse(u16),

    #[error("Address already registered: {0}")]
    DuplicateAddress(String),

    #[error("Unknown address: {0}")]
    UnknownAddress(String),

    #[error("Index {index} out of range (0..{len})")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("Type signature mismatch at position {position}: expected '{expected}', got '{got}'")]
    SignatureMismatch {
        position: usize,
        expected: char,
        got: char,
    },

    #[error("Arity mismatch: expected {expected} values, got {got}")]
    ArityMismatch { expected: usize, got: usize },

    /// Returned by [`TransportSink`](crate::transport::TransportSink)
    /// implementations once their transport has been torn down.
    #[error("Transport closed")]
    TransportClosed,
}

pub type Result<T> = std::result::Result<T, Error>;
