//! The node's serialized event loop.
//!
//! Every input that can change ledger state arrives as a [`NodeEvent`] on a
//! single channel and is handled to completion before the next one:
//! externalized values, transaction sets from the network, catchup results,
//! and timer expiry. Catchup itself runs on a spawned task and reports back
//! through the same channel.
//!
//! A [`SafetyViolation`](sluice_common::SafetyViolation) from any handler
//! ends the loop with [`AppError::Fatal`]. Nothing is applied after it.

use std::path::Path;
use std::sync::Arc;

use sluice_common::{Hash256, SafetyViolation, CURRENT_LEDGER_PROTOCOL_VERSION};
use sluice_db::Database;
use sluice_herder::{HerderError, ScpDriver};
use sluice_ledger::{
    CatchupDriver, CatchupProgress, CatchupTicket, ExternalizeOutcome, LedgerCloseHooks,
    LedgerCloseStateMachine, LedgerManager, LedgerStore, SqliteStore,
};
use sluice_scp::{SlotDriver, SlotIndex};
use stellar_xdr::curr::{TransactionSet, Value};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::config::AppConfig;
use crate::error::AppError;

/// Inputs to the event loop.
#[derive(Debug)]
pub enum NodeEvent {
    /// The agreement engine decided `value` for `slot`.
    Externalized { slot: SlotIndex, value: Value },
    /// A transaction set fetched from the network under `expected`.
    TxSetReceived {
        expected: Hash256,
        set: TransactionSet,
    },
    /// Progress or result of catchup round `round`.
    Catchup {
        round: u64,
        progress: CatchupProgress,
    },
    /// Operator request to catch up to `to_ledger`.
    ManualCatchup { to_ledger: u32 },
    Shutdown,
}

/// Cloneable sender side of a [`Node`].
#[derive(Debug, Clone)]
pub struct NodeHandle {
    events: mpsc::UnboundedSender<NodeEvent>,
    lcl: watch::Receiver<u32>,
}

impl NodeHandle {
    pub fn send(&self, event: NodeEvent) -> Result<(), AppError> {
        self.events.send(event).map_err(|_| AppError::ChannelClosed)
    }

    pub fn externalize(&self, slot: SlotIndex, value: Value) -> Result<(), AppError> {
        self.send(NodeEvent::Externalized { slot, value })
    }

    pub fn deliver_tx_set(&self, expected: Hash256, set: TransactionSet) -> Result<(), AppError> {
        self.send(NodeEvent::TxSetReceived { expected, set })
    }

    pub fn shutdown(&self) -> Result<(), AppError> {
        self.send(NodeEvent::Shutdown)
    }

    /// Watches the last closed ledger sequence.
    pub fn last_closed(&self) -> watch::Receiver<u32> {
        self.lcl.clone()
    }
}

/// Opens the configured store and restores or creates the last closed
/// ledger.
pub fn open_ledger(
    config: &AppConfig,
    hooks: Arc<dyn LedgerCloseHooks>,
) -> Result<Arc<LedgerManager>, AppError> {
    let database = match &config.ledger.database_path {
        Some(path) => open_database(path)?,
        None => Database::open_in_memory()?,
    };
    let store: Arc<dyn LedgerStore> = Arc::new(SqliteStore::new(database));
    let manager = LedgerManager::new(config.ledger_manager_config(), store).with_hooks(hooks);
    if !manager.load_last_known_ledger()? {
        manager.initialize_genesis(CURRENT_LEDGER_PROTOCOL_VERSION)?;
    }
    Ok(Arc::new(manager))
}

fn open_database(path: &Path) -> Result<Database, AppError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .map_err(|e| AppError::Config(format!("cannot create {}: {e}", parent.display())))?;
    }
    Ok(Database::open(path)?)
}

pub struct Node {
    driver: Arc<ScpDriver>,
    state_machine: LedgerCloseStateMachine,
    catchup: Arc<dyn CatchupDriver>,
    events_tx: mpsc::UnboundedSender<NodeEvent>,
    events_rx: mpsc::UnboundedReceiver<NodeEvent>,
    lcl_tx: watch::Sender<u32>,
}

impl Node {
    pub fn new(
        driver: Arc<ScpDriver>,
        state_machine: LedgerCloseStateMachine,
        catchup: Arc<dyn CatchupDriver>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (lcl_tx, _) = watch::channel(state_machine.manager().last_closed_ledger_seq());
        Self {
            driver,
            state_machine,
            catchup,
            events_tx,
            events_rx,
            lcl_tx,
        }
    }

    /// Builds a node from configuration over `manager`.
    pub fn from_config(
        config: &AppConfig,
        manager: Arc<LedgerManager>,
        catchup: Arc<dyn CatchupDriver>,
    ) -> Self {
        let driver = Arc::new(ScpDriver::new(config.scp_driver_config(), Arc::clone(&manager)));
        let state_machine = LedgerCloseStateMachine::new(manager, config.state_machine_config());
        Self::new(driver, state_machine, catchup)
    }

    pub fn handle(&self) -> NodeHandle {
        NodeHandle {
            events: self.events_tx.clone(),
            lcl: self.lcl_tx.subscribe(),
        }
    }

    /// The validator the agreement engine calls into.
    pub fn driver(&self) -> &Arc<ScpDriver> {
        &self.driver
    }

    pub fn state_machine(&self) -> &LedgerCloseStateMachine {
        &self.state_machine
    }

    /// Runs until [`NodeEvent::Shutdown`] or an error. Returns the last
    /// closed ledger sequence.
    pub async fn run(mut self) -> Result<u32, AppError> {
        info!(
            lcl = self.state_machine.manager().last_closed_ledger_seq(),
            state = %self.state_machine.state(),
            "Node started"
        );
        loop {
            let deadline = self.driver.timers().next_deadline();
            let event = tokio::select! {
                event = self.events_rx.recv() => match event {
                    Some(event) => event,
                    None => return Err(AppError::ChannelClosed),
                },
                _ = sleep_until(deadline) => {
                    let fired = self.driver.timers().fire_due(std::time::Instant::now());
                    debug!(fired, "Timers fired");
                    continue;
                }
            };

            if matches!(event, NodeEvent::Shutdown) {
                break;
            }
            if let Err(err) = self.handle_event(event) {
                if let AppError::Fatal(violation) = &err {
                    log_violation(violation);
                } else {
                    error!(error = %err, "Node stopped on error");
                }
                return Err(err);
            }
        }

        let lcl = self.state_machine.manager().last_closed_ledger_seq();
        info!(lcl, "Node stopped");
        Ok(lcl)
    }

    fn handle_event(&mut self, event: NodeEvent) -> Result<(), AppError> {
        match event {
            NodeEvent::Externalized { slot, value } => {
                self.driver.value_externalized(slot, &value)?;
                self.drain_close_requests()
            }
            NodeEvent::TxSetReceived { expected, set } => {
                match self.driver.receive_tx_set(expected, set) {
                    Ok(released) => {
                        debug!(tx_set = %expected.short(), released, "Received transaction set");
                    }
                    Err(err @ HerderError::TxSetHashMismatch { .. }) => {
                        warn!(error = %err, "Discarding transaction set");
                    }
                    Err(err) => return Err(err.into()),
                }
                self.drain_close_requests()
            }
            NodeEvent::Catchup { round, progress } => {
                let outcome = self.state_machine.on_catchup_progress(round, progress)?;
                self.apply_outcome(outcome);
                // Decisions released while history was replaying.
                self.drain_close_requests()
            }
            NodeEvent::ManualCatchup { to_ledger } => {
                if let Some(ticket) = self.state_machine.start_manual_catchup(to_ledger) {
                    self.start_catchup(ticket);
                }
                Ok(())
            }
            NodeEvent::Shutdown => Ok(()),
        }
    }

    fn drain_close_requests(&mut self) -> Result<(), AppError> {
        for request in self.driver.take_close_requests() {
            let outcome = self.state_machine.on_externalized(request)?;
            self.apply_outcome(outcome);
        }
        Ok(())
    }

    fn apply_outcome(&mut self, outcome: ExternalizeOutcome) {
        for result in &outcome.closed {
            info!(
                ledger_seq = result.ledger_seq(),
                hash = %result.header_hash.short(),
                txs = result.tx_results.len(),
                successful = result.successful_count(),
                "Closed ledger"
            );
        }
        if !outcome.closed.is_empty() {
            self.driver.purge_closed_decisions();
            self.lcl_tx
                .send_replace(self.state_machine.manager().last_closed_ledger_seq());
        }
        if let Some(ticket) = outcome.start_catchup {
            self.start_catchup(ticket);
        }
    }

    fn start_catchup(&self, ticket: CatchupTicket) {
        self.driver.lose_tracking();
        let catchup = Arc::clone(&self.catchup);
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let round = ticket.round;
            let progress_events = events.clone();
            let sink = move |progress: CatchupProgress| {
                let _ = progress_events.send(NodeEvent::Catchup { round, progress });
            };
            let progress = match catchup.run_catchup(ticket.configuration, &sink).await {
                Ok(boundary) => CatchupProgress::Finished { boundary },
                Err(err) => CatchupProgress::Failed {
                    reason: err.to_string(),
                },
            };
            if events.send(NodeEvent::Catchup { round, progress }).is_err() {
                debug!(round, "Node stopped before catchup finished");
            }
        });
    }
}

async fn sleep_until(deadline: Option<std::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await,
        None => std::future::pending().await,
    }
}

fn log_violation(violation: &SafetyViolation) {
    match violation {
        SafetyViolation::PreviousHashMismatch {
            ledger_seq,
            expected,
            actual,
        }
        | SafetyViolation::CorruptTxSet {
            ledger_seq,
            expected,
            actual,
        } => error!(
            ledger_seq,
            expected = %expected,
            actual = %actual,
            "Consensus safety violated, stopping: {violation}"
        ),
        other => error!(
            ledger_seq = ?other.ledger_seq(),
            "Consensus safety violated, stopping: {other}"
        ),
    }
}

/// Exits the process with a non-zero status if `result` is fatal.
pub fn terminate_on_fatal<T>(result: Result<T, AppError>) -> Result<T, AppError> {
    if let Err(AppError::Fatal(violation)) = &result {
        error!(%violation, "Terminating");
        std::process::exit(2);
    }
    result
}
