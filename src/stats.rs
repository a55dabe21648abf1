//! Drop counters for the delivery path.
//!
//! The protocol is permissive: unknown addresses, bad arity, and handler
//! faults drop the message without interrupting delivery. The counters make
//! those drops observable without changing that behavior.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct DropCounters {
    unknown_address: AtomicU64,
    arity_mismatch: AtomicU64,
    signature_mismatch: AtomicU64,
    non_numeric: AtomicU64,
    handler_fault: AtomicU64,
    send_overflow: AtomicU64,
}

impl DropCounters {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub(crate) fn record_unknown_address(&self) {
        self.unknown_address.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_arity_mismatch(&self) {
        self.arity_mismatch.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_signature_mismatch(&self) {
        self.signature_mismatch.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_non_numeric(&self) {
        self.non_numeric.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_handler_fault(&self) {
        self.handler_fault.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_send_overflow(&self) {
        self.send_overflow.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DropSnapshot {
        DropSnapshot {
            unknown_address: self.unknown_address.load(Ordering::Relaxed),
            arity_mismatch: self.arity_mismatch.load(Ordering::Relaxed),
            signature_mismatch: self.signature_mismatch.load(Ordering::Relaxed),
            non_numeric: self.non_numeric.load(Ordering::Relaxed),
            handler_fault: self.handler_fault.load(Ordering::Relaxed),
            send_overflow: self.send_overflow.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of the drop counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DropSnapshot {
    /// Messages for addresses not present in the registry.
    pub unknown_address: u64,
    /// Control messages whose argument count did not match the slot width.
    pub arity_mismatch: u64,
    /// Data sends rejected by a target's type signature.
    pub signature_mismatch: u64,
    /// Control messages carrying a non-numeric argument.
    pub non_numeric: u64,
    /// Panics caught at the data-handler boundary.
    pub handler_fault: u64,
    /// Outgoing values dropped because the send queue was full.
    pub send_overflow: u64,
}

impl DropSnapshot {
    pub fn total(&self) -> u64 {
        self.unknown_address
            + self.arity_mismatch
            + self.signature_mismatch
            + self.non_numeric
            + self.handler_fault
            + self.send_overflow
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let counters = DropCounters::new();
        counters.record_unknown_address();
        counters.record_unknown_address();
        counters.record_arity_mismatch();
        counters.record_handler_fault();

        let snap = counters.snapshot();
        assert_eq!(snap.unknown_address, 2);
        assert_eq!(snap.arity_mismatch, 1);
        assert_eq!(snap.handler_fault, 1);
        assert_eq!(snap.signature_mismatch, 0);
        assert_eq!(snap.total(), 4);
    }
}
