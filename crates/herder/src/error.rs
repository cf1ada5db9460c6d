//! Error types for the herder.

use sluice_common::{Hash256, SafetyViolation};
use sluice_ledger::LedgerError;
use thiserror::Error;

/// Errors raised by the herder outside the agreement-engine callbacks.
///
/// The callbacks themselves never fail except with a [`SafetyViolation`];
/// these errors come from the node-facing surface (receiving transaction
/// sets, loading state).
#[derive(Error, Debug)]
pub enum HerderError {
    #[error("consensus safety violation: {0}")]
    Safety(#[from] SafetyViolation),

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// A transaction set arrived under a hash it does not hash to.
    #[error("transaction set hash mismatch: expected {expected}, got {actual}")]
    TxSetHashMismatch { expected: Hash256, actual: Hash256 },

    #[error("XDR error: {0}")]
    Xdr(#[from] stellar_xdr::curr::Error),
}

impl HerderError {
    /// Whether the node must stop rather than continue.
    pub fn is_fatal(&self) -> bool {
        match self {
            HerderError::Safety(_) => true,
            HerderError::Ledger(err) => err.is_fatal(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        let safety = HerderError::from(SafetyViolation::UndecodableExternalize { slot: 7 });
        assert!(safety.is_fatal());

        let nested = HerderError::from(LedgerError::Safety(SafetyViolation::UnsupportedProtocol {
            version: 99,
            max_supported: 23,
        }));
        assert!(nested.is_fatal());

        let mismatch = HerderError::TxSetHashMismatch {
            expected: Hash256::hash(b"a"),
            actual: Hash256::hash(b"b"),
        };
        assert!(!mismatch.is_fatal());
        assert!(!HerderError::from(LedgerError::NotInitialized).is_fatal());
    }
}
