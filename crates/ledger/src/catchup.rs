//! Interface to the history replay subsystem.
//!
//! The state machine never downloads or replays history itself. It hands a
//! [`CatchupConfiguration`] to a [`CatchupDriver`], keeps running, and later
//! receives the outcome as an event. Only the boundary header the driver
//! reports is trusted, and only after it is checked against the buffered
//! chain.

use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use stellar_xdr::curr::LedgerHeader;
use tracing::info;

use crate::{LedgerError, Result};

/// What a catchup round must achieve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatchupConfiguration {
    /// Ledger the replay ends on; becomes the new LCL.
    pub to_ledger: u32,
    /// Ledgers to replay before `to_ledger`.
    pub count: u32,
    /// Operator-forced round: the boundary is adopted without verification.
    pub manual: bool,
}

impl CatchupConfiguration {
    pub fn new(lcl_seq: u32, to_ledger: u32, manual: bool) -> Self {
        Self {
            to_ledger,
            count: to_ledger.saturating_sub(lcl_seq),
            manual,
        }
    }
}

/// Progress notifications from a running catchup.
#[derive(Debug, Clone)]
pub enum CatchupProgress {
    AppliedBuckets { ledger_seq: u32 },
    AppliedTransactions { ledger_seq: u32 },
    Finished { boundary: LedgerHeader },
    Failed { reason: String },
}

/// Sink for intermediate progress.
pub type ProgressSink<'a> = &'a (dyn Fn(CatchupProgress) + Send + Sync);

/// Downloads and replays history up to a ledger.
#[async_trait]
pub trait CatchupDriver: Send + Sync {
    /// Runs one catchup round and returns the header of
    /// `configuration.to_ledger`. Intermediate progress goes to `progress`.
    async fn run_catchup(
        &self,
        configuration: CatchupConfiguration,
        progress: ProgressSink<'_>,
    ) -> Result<LedgerHeader>;
}

/// A driver over headers already held in memory.
///
/// Stands in for a history archive where the archive contents are known up
/// front, as in tooling and tests.
#[derive(Default)]
pub struct ArchivedHeaders {
    headers: RwLock<BTreeMap<u32, LedgerHeader>>,
}

impl ArchivedHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, header: LedgerHeader) {
        self.headers.write().insert(header.ledger_seq, header);
    }

    pub fn latest(&self) -> Option<u32> {
        self.headers.read().keys().next_back().copied()
    }
}

#[async_trait]
impl CatchupDriver for ArchivedHeaders {
    async fn run_catchup(
        &self,
        configuration: CatchupConfiguration,
        progress: ProgressSink<'_>,
    ) -> Result<LedgerHeader> {
        let boundary = self
            .headers
            .read()
            .get(&configuration.to_ledger)
            .cloned()
            .ok_or_else(|| {
                LedgerError::Catchup(format!(
                    "ledger {} not available in archive",
                    configuration.to_ledger
                ))
            })?;
        info!(
            to_ledger = configuration.to_ledger,
            count = configuration.count,
            "Replaying archived history"
        );
        progress(CatchupProgress::AppliedBuckets {
            ledger_seq: configuration.to_ledger,
        });
        progress(CatchupProgress::AppliedTransactions {
            ledger_seq: configuration.to_ledger,
        });
        Ok(boundary)
    }
}
