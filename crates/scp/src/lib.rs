//! Boundary between the agreement engine and the rest of the node.
//!
//! The federated agreement protocol (nomination, balloting, quorum checks)
//! is an external collaborator. This crate holds only what both sides must
//! agree on: slot indices, validation levels, timer identities and the
//! [`SlotDriver`] callback trait.

mod driver;

pub use driver::{SlotDriver, SlotIndex, TimerCallback, TimerId, ValidationLevel};
