//! Consensus value handling for sluice.
//!
//! The herder sits between the agreement engine and the ledger close. Its
//! [`ScpDriver`] implements the engine's [`SlotDriver`](sluice_scp::SlotDriver)
//! callbacks:
//!
//! - judging proposed values ([`ValidationLevel`](sluice_scp::ValidationLevel))
//! - stripping invalid upgrade steps from a value
//! - merging confirmed candidates into one deterministic composite
//! - turning externalized decisions into
//!   [`CloseRequest`](sluice_ledger::CloseRequest)s, parking those whose
//!   transaction set has not arrived yet
//!
//! It also owns the per-slot [`SlotTimers`] registry and the consensus
//! tracking cursor ([`ConsensusData`]).

mod error;
mod scp_driver;
mod timers;
mod tracking;
pub mod upgrades;

pub use error::HerderError;
pub use scp_driver::{decode_value, encode_value, Clock, ScpDriver, ScpDriverConfig};
pub use timers::SlotTimers;
pub use tracking::ConsensusData;

/// Result type for herder operations.
pub type Result<T> = std::result::Result<T, HerderError>;
