//! Background history maintenance.
//!
//! A ledger close fires three triggers after it commits: queue a history
//! checkpoint, publish what is queued, collect garbage. [`MaintenanceHooks`]
//! receives them inside the close and only enqueues; a spawned
//! [`Maintainer`] drains the queue and calls the [`HistoryService`], so a
//! slow archive never holds up consensus. Garbage collection also prunes
//! stored transaction sets older than the retention window.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use sluice_common::checkpoint::is_checkpoint_ledger;
use sluice_ledger::{LedgerCloseHooks, LedgerStore};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// One unit of post-close work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaintenanceTask {
    QueueCheckpoint { ledger_seq: u32 },
    PublishQueued,
    CollectGarbage { ledger_seq: u32 },
}

/// The history subsystem the maintainer drives.
#[async_trait]
pub trait HistoryService: Send + Sync {
    /// Queue the checkpoint ending at `ledger_seq` for publication.
    async fn queue_checkpoint(&self, ledger_seq: u32) -> anyhow::Result<()>;

    /// Publish queued checkpoints; returns how many were published.
    async fn publish_queued(&self) -> anyhow::Result<usize>;

    /// Drop history no longer needed as of `ledger_seq`.
    async fn collect_garbage(&self, ledger_seq: u32) -> anyhow::Result<()>;
}

/// A history service that keeps checkpoints in memory and only logs.
///
/// Used when no archive is configured.
#[derive(Debug, Default)]
pub struct LocalHistory {
    queued: Mutex<BTreeSet<u32>>,
    published: Mutex<BTreeSet<u32>>,
    retain: u32,
}

impl LocalHistory {
    /// Keeps published checkpoints within `retain` ledgers of the latest
    /// garbage collection point.
    pub fn new(retain: u32) -> Self {
        Self {
            retain,
            ..Self::default()
        }
    }

    pub fn queued(&self) -> Vec<u32> {
        self.queued.lock().iter().copied().collect()
    }

    pub fn published(&self) -> Vec<u32> {
        self.published.lock().iter().copied().collect()
    }
}

#[async_trait]
impl HistoryService for LocalHistory {
    async fn queue_checkpoint(&self, ledger_seq: u32) -> anyhow::Result<()> {
        self.queued.lock().insert(ledger_seq);
        Ok(())
    }

    async fn publish_queued(&self) -> anyhow::Result<usize> {
        let drained = std::mem::take(&mut *self.queued.lock());
        let count = drained.len();
        for checkpoint in &drained {
            info!(checkpoint, "Published history checkpoint");
        }
        self.published.lock().extend(drained);
        Ok(count)
    }

    async fn collect_garbage(&self, ledger_seq: u32) -> anyhow::Result<()> {
        let keep_from = ledger_seq.saturating_sub(self.retain);
        let mut published = self.published.lock();
        let before = published.len();
        *published = published.split_off(&keep_from);
        let dropped = before - published.len();
        if dropped > 0 {
            debug!(ledger_seq, dropped, "Collected old checkpoints");
        }
        Ok(())
    }
}

/// [`LedgerCloseHooks`] that hand every trigger to a [`Maintainer`].
#[derive(Debug, Clone)]
pub struct MaintenanceHooks {
    sender: mpsc::UnboundedSender<MaintenanceTask>,
    checkpoint_frequency: u32,
}

impl MaintenanceHooks {
    fn send(&self, task: MaintenanceTask) {
        if self.sender.send(task).is_err() {
            debug!(?task, "Maintainer stopped, dropping task");
        }
    }
}

impl LedgerCloseHooks for MaintenanceHooks {
    fn maybe_queue_history_checkpoint(&self, ledger_seq: u32) {
        if is_checkpoint_ledger(ledger_seq, self.checkpoint_frequency) {
            self.send(MaintenanceTask::QueueCheckpoint { ledger_seq });
        }
    }

    fn publish_queued_history(&self) {
        self.send(MaintenanceTask::PublishQueued);
    }

    fn collect_garbage(&self, ledger_seq: u32) {
        self.send(MaintenanceTask::CollectGarbage { ledger_seq });
    }
}

/// Counts of work the maintainer performed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MaintenanceStats {
    pub checkpoints_queued: usize,
    pub checkpoints_published: usize,
    pub garbage_collections: usize,
    pub tx_sets_collected: usize,
    pub failures: usize,
}

/// Drains maintenance tasks in order until shut down.
pub struct Maintainer {
    service: Arc<dyn HistoryService>,
    /// Store to prune, and how many ledgers of transaction sets it keeps.
    store: Option<(Arc<dyn LedgerStore>, u32)>,
    receiver: mpsc::UnboundedReceiver<MaintenanceTask>,
    shutdown_rx: watch::Receiver<bool>,
    stats: MaintenanceStats,
}

/// Creates connected hooks and maintainer.
pub fn channel(
    service: Arc<dyn HistoryService>,
    checkpoint_frequency: u32,
    shutdown_rx: watch::Receiver<bool>,
) -> (MaintenanceHooks, Maintainer) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (
        MaintenanceHooks {
            sender,
            checkpoint_frequency,
        },
        Maintainer {
            service,
            store: None,
            receiver,
            shutdown_rx,
            stats: MaintenanceStats::default(),
        },
    )
}

impl Maintainer {
    /// Also prunes transaction sets in `store` applied more than
    /// `retain_ledgers` before each collected ledger.
    pub fn with_store(mut self, store: Arc<dyn LedgerStore>, retain_ledgers: u32) -> Self {
        self.store = Some((store, retain_ledgers));
        self
    }

    /// Runs until shutdown is signalled or every hook is dropped.
    ///
    /// Tasks already queued when shutdown arrives are still performed.
    pub async fn run(mut self) -> MaintenanceStats {
        info!("Starting history maintainer");
        loop {
            tokio::select! {
                task = self.receiver.recv() => match task {
                    Some(task) => self.perform(task).await,
                    None => break,
                },
                changed = self.shutdown_rx.changed() => {
                    if changed.is_err() || *self.shutdown_rx.borrow() {
                        while let Ok(task) = self.receiver.try_recv() {
                            self.perform(task).await;
                        }
                        break;
                    }
                }
            }
        }
        info!(stats = ?self.stats, "History maintainer shutting down");
        self.stats
    }

    fn prune_store(&mut self, ledger_seq: u32) {
        let Some((store, retain)) = &self.store else {
            return;
        };
        let keep_from = ledger_seq.saturating_sub(*retain);
        match store.collect_garbage(keep_from) {
            Ok(0) => {}
            Ok(removed) => {
                debug!(ledger_seq, keep_from, removed, "Pruned stored transaction sets");
                self.stats.tx_sets_collected += removed;
            }
            Err(err) => {
                self.stats.failures += 1;
                warn!(ledger_seq, error = %err, "Pruning transaction sets failed");
            }
        }
    }

    async fn perform(&mut self, task: MaintenanceTask) {
        let result = match task {
            MaintenanceTask::QueueCheckpoint { ledger_seq } => {
                debug!(ledger_seq, "Queueing history checkpoint");
                self.service
                    .queue_checkpoint(ledger_seq)
                    .await
                    .map(|()| self.stats.checkpoints_queued += 1)
            }
            MaintenanceTask::PublishQueued => self
                .service
                .publish_queued()
                .await
                .map(|published| self.stats.checkpoints_published += published),
            MaintenanceTask::CollectGarbage { ledger_seq } => {
                self.prune_store(ledger_seq);
                self.service
                    .collect_garbage(ledger_seq)
                    .await
                    .map(|()| self.stats.garbage_collections += 1)
            }
        };
        if let Err(err) = result {
            self.stats.failures += 1;
            warn!(?task, error = %err, "History maintenance failed");
        }
    }
}
