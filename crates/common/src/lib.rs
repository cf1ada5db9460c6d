//! Common types and utilities for sluice.
//!
//! This crate provides the vocabulary shared by every other crate in the
//! workspace: the [`Hash256`] digest type, network identity, protocol
//! version constants, checkpoint arithmetic, wall-clock helpers and the
//! [`SafetyViolation`] error kind that marks a consensus-safety failure.

pub mod checkpoint;
pub mod network;
pub mod protocol;
pub mod safety;
pub mod time;
pub mod types;

pub use network::NetworkId;
pub use protocol::*;
pub use safety::SafetyViolation;
pub use types::Hash256;

/// Re-export stellar-xdr for convenience
pub use stellar_xdr;
