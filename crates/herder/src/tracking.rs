//! The consensus tracking cursor.

use parking_lot::RwLock;
use sluice_scp::SlotIndex;
use stellar_xdr::curr::StellarValue;
use tracing::info;

/// The most recent decision the node has observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsensusData {
    pub slot_index: SlotIndex,
    pub value: StellarValue,
}

impl ConsensusData {
    /// The slot the network is deciding now.
    pub fn next_slot(&self) -> SlotIndex {
        self.slot_index.saturating_add(1)
    }

    pub fn close_time(&self) -> u64 {
        self.value.close_time.0
    }
}

/// Current and previous generations of the cursor. Only the validator
/// writes; everything else reads snapshots.
#[derive(Debug, Default)]
pub(crate) struct TrackingCursor {
    current: RwLock<Option<ConsensusData>>,
    last: RwLock<Option<ConsensusData>>,
}

impl TrackingCursor {
    pub(crate) fn current(&self) -> Option<ConsensusData> {
        self.current.read().clone()
    }

    pub(crate) fn last(&self) -> Option<ConsensusData> {
        self.last.read().clone()
    }

    /// Moves the cursor forward; a decision for an older slot is ignored.
    pub(crate) fn advance(&self, data: ConsensusData) -> bool {
        let mut current = self.current.write();
        if current
            .as_ref()
            .is_some_and(|c| c.slot_index >= data.slot_index)
        {
            return false;
        }
        *current = Some(data);
        true
    }

    /// Stops tracking, keeping the current cursor as the last known one.
    pub(crate) fn lose(&self) {
        if let Some(data) = self.current.write().take() {
            info!(slot = data.slot_index, "Lost track of consensus");
            *self.last.write() = Some(data);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stellar_xdr::curr::{Hash, StellarValueExt, TimePoint, VecM};

    fn data(slot: SlotIndex, close_time: u64) -> ConsensusData {
        ConsensusData {
            slot_index: slot,
            value: StellarValue {
                tx_set_hash: Hash([0; 32]),
                close_time: TimePoint(close_time),
                upgrades: VecM::default(),
                ext: StellarValueExt::Basic,
            },
        }
    }

    #[test]
    fn test_advance_is_monotonic() {
        let cursor = TrackingCursor::default();
        assert!(cursor.advance(data(10, 100)));
        assert!(!cursor.advance(data(10, 200)));
        assert!(!cursor.advance(data(9, 200)));
        assert!(cursor.advance(data(11, 105)));
        assert_eq!(cursor.current().map(|d| d.next_slot()), Some(12));
    }

    #[test]
    fn test_lose_keeps_last_generation() {
        let cursor = TrackingCursor::default();
        cursor.lose();
        assert!(cursor.last().is_none());

        cursor.advance(data(10, 100));
        cursor.lose();
        assert!(cursor.current().is_none());
        assert_eq!(cursor.last().map(|d| d.close_time()), Some(100));

        assert!(cursor.advance(data(4, 50)));
    }
}
