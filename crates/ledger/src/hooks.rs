//! Post-close triggers.
//!
//! After a ledger commits, the close fires three maintenance steps in
//! order: queue a history checkpoint, publish queued history, collect
//! garbage. They run outside the close's critical path; implementations
//! should hand the work off rather than block.

use serde::{Deserialize, Serialize};

/// Receives post-close maintenance triggers.
pub trait LedgerCloseHooks: Send + Sync {
    /// A ledger closed; queue its checkpoint if it ends one.
    fn maybe_queue_history_checkpoint(&self, _ledger_seq: u32) {}

    /// Publish any checkpoints queued so far.
    fn publish_queued_history(&self) {}

    /// Storage may drop data no longer needed as of `ledger_seq`.
    fn collect_garbage(&self, _ledger_seq: u32) {}
}

/// Hooks that do nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCloseHooks;

impl LedgerCloseHooks for NoopCloseHooks {}

/// Descriptor persisted under `historyarchivestate` at each checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryArchiveState {
    pub version: u32,
    pub current_ledger: u32,
    pub checkpoint_frequency: u32,
}

impl HistoryArchiveState {
    pub const VERSION: u32 = 1;

    pub fn new(current_ledger: u32, checkpoint_frequency: u32) -> Self {
        Self {
            version: Self::VERSION,
            current_ledger,
            checkpoint_frequency,
        }
    }
}
