//! Consensus-safety violations.
//!
//! A [`SafetyViolation`] means the node is about to apply or emit state the
//! rest of the network does not agree with. Library code never panics on
//! one; it is returned as an error and the top-level event loop turns it
//! into process termination.

use crate::types::Hash256;

/// An unrecoverable disagreement between local state and consensus.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SafetyViolation {
    /// Two different previous-ledger hashes were agreed for the same slot.
    #[error(
        "ledger {ledger_seq}: previous ledger hash mismatch (expected {expected}, got {actual})"
    )]
    PreviousHashMismatch {
        ledger_seq: u32,
        expected: Hash256,
        actual: Hash256,
    },

    /// The transaction set does not hash to the value's `tx_set_hash`.
    #[error("ledger {ledger_seq}: corrupt transaction set (value names {expected}, set hashes to {actual})")]
    CorruptTxSet {
        ledger_seq: u32,
        expected: Hash256,
        actual: Hash256,
    },

    /// The ledger requires a protocol newer than this node implements.
    #[error("unsupported protocol version {version} (max supported {max_supported})")]
    UnsupportedProtocol { version: u32, max_supported: u32 },

    /// Two candidates carried upgrades of a kind that has no merge rule.
    #[error("no merge rule for colliding {kind} upgrades")]
    UnmergeableUpgrade { kind: &'static str },

    /// An externalized value could not be decoded.
    #[error("externalized value for slot {slot} is undecodable")]
    UndecodableExternalize { slot: u64 },
}

impl SafetyViolation {
    /// The ledger sequence the violation was detected at, if it has one.
    pub fn ledger_seq(&self) -> Option<u32> {
        match self {
            SafetyViolation::PreviousHashMismatch { ledger_seq, .. }
            | SafetyViolation::CorruptTxSet { ledger_seq, .. } => Some(*ledger_seq),
            SafetyViolation::UndecodableExternalize { slot } => u32::try_from(*slot).ok(),
            SafetyViolation::UnsupportedProtocol { .. }
            | SafetyViolation::UnmergeableUpgrade { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_carries_hashes() {
        let v = SafetyViolation::PreviousHashMismatch {
            ledger_seq: 101,
            expected: Hash256::hash(b"a"),
            actual: Hash256::hash(b"b"),
        };
        let msg = v.to_string();
        assert!(msg.contains("101"));
        assert!(msg.contains(&Hash256::hash(b"a").to_hex()));
        assert_eq!(v.ledger_seq(), Some(101));
    }
}
