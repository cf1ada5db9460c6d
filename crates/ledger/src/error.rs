//! Error types for ledger operations.

use sluice_common::{Hash256, SafetyViolation};
use thiserror::Error;

/// Errors raised while closing ledgers or driving catchup.
#[derive(Error, Debug)]
pub enum LedgerError {
    /// Continuing would diverge from the network. Always fatal.
    #[error("consensus safety violation: {0}")]
    Safety(#[from] SafetyViolation),

    /// A close was attempted out of sequence.
    #[error("invalid ledger sequence: expected {expected}, got {actual}")]
    InvalidSequence { expected: u32, actual: u32 },

    /// A close request was built from a bundle and value that disagree.
    #[error("transaction set hash mismatch: value names {expected}, bundle hashes to {actual}")]
    TxSetHashMismatch { expected: Hash256, actual: Hash256 },

    /// The manager has no last closed ledger yet.
    #[error("ledger not initialized")]
    NotInitialized,

    /// A catchup boundary would move the last closed ledger backwards.
    #[error("catchup boundary {boundary} is not ahead of last closed ledger {lcl}")]
    BoundaryNotAhead { boundary: u32, lcl: u32 },

    /// Genesis was requested on a store that already holds a ledger.
    #[error("ledger already initialized")]
    AlreadyInitialized,

    /// Persisted state exists but cannot be interpreted.
    #[error("corrupt persistent state: {0}")]
    CorruptState(String),

    #[error("database error: {0}")]
    Database(#[from] sluice_db::DbError),

    #[error("crypto error: {0}")]
    Crypto(#[from] sluice_crypto::CryptoError),

    #[error("XDR error: {0}")]
    Xdr(#[from] stellar_xdr::curr::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Failure inside transaction execution; isolated to one transaction.
    #[error("transaction execution failed: {0}")]
    Execution(String),

    /// History could not be fetched or replayed. Retried on a later round.
    #[error("catchup failed: {0}")]
    Catchup(String),
}

impl LedgerError {
    /// Whether the node must stop rather than continue.
    pub fn is_fatal(&self) -> bool {
        matches!(self, LedgerError::Safety(_))
    }

    pub fn safety_violation(&self) -> Option<&SafetyViolation> {
        match self {
            LedgerError::Safety(violation) => Some(violation),
            _ => None,
        }
    }
}
