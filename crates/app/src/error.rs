//! Error types for the node.

use sluice_common::SafetyViolation;
use sluice_herder::HerderError;
use sluice_ledger::LedgerError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    /// The node can no longer guarantee it follows the network.
    #[error("fatal consensus safety violation: {0}")]
    Fatal(SafetyViolation),

    #[error("ledger error: {0}")]
    Ledger(LedgerError),

    #[error("herder error: {0}")]
    Herder(HerderError),

    #[error("database error: {0}")]
    Database(#[from] sluice_db::DbError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("event channel closed")]
    ChannelClosed,
}

impl AppError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, AppError::Fatal(_))
    }
}

impl From<SafetyViolation> for AppError {
    fn from(violation: SafetyViolation) -> Self {
        AppError::Fatal(violation)
    }
}

impl From<LedgerError> for AppError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::Safety(violation) => AppError::Fatal(violation),
            other => AppError::Ledger(other),
        }
    }
}

impl From<HerderError> for AppError {
    fn from(err: HerderError) -> Self {
        match err {
            HerderError::Safety(violation) => AppError::Fatal(violation),
            HerderError::Ledger(inner) => inner.into(),
            other => AppError::Herder(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safety_errors_become_fatal() {
        let violation = SafetyViolation::UndecodableExternalize { slot: 7 };
        assert!(AppError::from(LedgerError::Safety(violation.clone())).is_fatal());
        assert!(AppError::from(HerderError::Safety(violation.clone())).is_fatal());
        assert!(AppError::from(HerderError::Ledger(LedgerError::Safety(violation))).is_fatal());
        assert!(!AppError::from(LedgerError::NotInitialized).is_fatal());
    }
}
