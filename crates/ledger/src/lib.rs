//! Ledger close and catchup for sluice.
//!
//! This crate turns consensus decisions into durably applied ledgers:
//!
//! - [`TxBundle`]: the content-addressed set of transactions a ledger
//!   applies, built through [`TxBundleBuilder`]
//! - [`CloseRequest`]: one decision, pairing a ledger sequence with its
//!   bundle and agreed value
//! - [`LedgerManager`]: owns the last closed ledger and runs the close
//!   operation over nested [`LedgerDelta`] scopes
//! - [`LedgerCloseStateMachine`]: decides per decision whether to close,
//!   buffer in a [`SyncingLedgerBuffer`], or start a catchup round through a
//!   [`CatchupDriver`]
//!
//! Storage sits behind [`LedgerStore`], with in-memory and SQLite
//! implementations. Transaction semantics sit behind
//! [`TransactionExecutor`].
//!
//! # Errors
//!
//! Every fallible call returns [`LedgerError`]. Errors for which
//! [`LedgerError::is_fatal`] is true carry a
//! [`SafetyViolation`](sluice_common::SafetyViolation); the node must stop
//! rather than continue past one.

mod buffer;
mod catchup;
mod close_data;
mod delta;
mod error;
mod executor;
mod frame;
pub mod header;
mod hooks;
mod manager;
mod state_machine;
mod store;
mod tx_bundle;
pub mod upgrades;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_support;

pub use buffer::{BufferOutcome, SyncingLedgerBuffer, DEFAULT_MAX_BUFFERED_LEDGERS};
pub use catchup::{
    ArchivedHeaders, CatchupConfiguration, CatchupDriver, CatchupProgress, ProgressSink,
};
pub use close_data::CloseRequest;
pub use delta::{AccountChange, AccountState, LedgerDelta};
pub use error::LedgerError;
pub use executor::{is_success, NoOpExecutor, TransactionExecutor};
pub use frame::{muxed_to_account_id, TransactionFrame};
pub use header::compute_header_hash;
pub use hooks::{HistoryArchiveState, LedgerCloseHooks, NoopCloseHooks};
pub use manager::{
    root_account_id, root_account_secret, FailedUpgrade, LedgerCloseResult, LedgerManager,
    LedgerManagerConfig,
};
pub use state_machine::{
    CatchupState, CatchupTicket, CloseOutcome, ExternalizeOutcome, LedgerCloseStateMachine,
    LedgerManagerState, StateMachineConfig,
};
pub use store::{LedgerChanges, LedgerStore, MemoryStore, SqliteStore};
pub use tx_bundle::{TxBundle, TxBundleBuilder, TxRejection, TxValidationContext};

/// Result type for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;
