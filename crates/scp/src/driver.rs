//! The callback interface between the agreement engine and the node.
//!
//! The engine (nomination and ballot protocol, quorum checks) knows nothing
//! about ledgers. Whenever it needs value semantics, a timer, or a signed
//! envelope, it calls into a [`SlotDriver`]. The herder implements this
//! trait; the engine itself lives outside this workspace.
//!
//! ```ignore
//! impl SlotDriver for MyHerder {
//!     fn validate_value(&self, slot: SlotIndex, value: &Value, nomination: bool) -> ValidationLevel {
//!         ValidationLevel::FullyValidated
//!     }
//!     // ...
//! }
//! ```

use std::fmt;
use std::time::Duration;

use sluice_common::SafetyViolation;
use stellar_xdr::curr::{ScpEnvelope, Value};

/// Index of one agreement instance. Slot `n` decides ledger `n`.
pub type SlotIndex = u64;

/// Per-slot timers the engine arms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TimerId {
    /// Advances the nomination round when no progress is made.
    Nomination,
    /// Bumps the ballot counter when a ballot round stalls.
    Ballot,
}

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimerId::Nomination => f.write_str("nomination"),
            TimerId::Ballot => f.write_str("ballot"),
        }
    }
}

/// Callback run when a timer fires.
pub type TimerCallback = Box<dyn FnOnce() + Send>;

/// How far a value could be checked.
///
/// Ordered from weakest to strongest, so `level >= MaybeValid` reads as
/// "not rejected".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ValidationLevel {
    /// Rejected; never voted for or relayed.
    Invalid,

    /// Could not be fully checked (node is not in sync with this slot) but
    /// nothing found wrong. May take part in nomination.
    MaybeValid,

    /// Checked against local ledger state. Only these may be externalized.
    FullyValidated,
}

impl ValidationLevel {
    pub fn is_rejected(self) -> bool {
        self == ValidationLevel::Invalid
    }
}

/// Callbacks the agreement engine makes into the node.
///
/// All calls are made from the node's single serialized event loop, but
/// implementors must still be `Send + Sync` since the engine may be held
/// behind an `Arc`.
///
/// Validation methods never fail: malformed input is reported as
/// [`ValidationLevel::Invalid`] or `None`. Only the consensus-safety class
/// escapes as an error, and the caller must stop the node on it.
pub trait SlotDriver: Send + Sync {
    /// Judges a value proposed for `slot_index`.
    fn validate_value(&self, slot_index: SlotIndex, value: &Value, nomination: bool)
        -> ValidationLevel;

    /// Returns a fully valid variant of `value` with invalid upgrades
    /// stripped, or `None` if nothing usable remains.
    fn extract_valid_value(&self, slot_index: SlotIndex, value: &Value) -> Option<Value>;

    /// Merges the confirmed nominees of a slot into one composite value.
    ///
    /// The result must depend only on the set of candidates, never on their
    /// order, so every correct node produces identical bytes.
    fn combine_candidates(
        &self,
        slot_index: SlotIndex,
        candidates: &[Value],
    ) -> Result<Option<Value>, SafetyViolation>;

    /// The slot reached an irrevocable decision.
    fn value_externalized(
        &self,
        slot_index: SlotIndex,
        value: &Value,
    ) -> Result<(), SafetyViolation>;

    /// Arms (or re-arms) the timer `(slot_index, timer_id)`.
    fn setup_timer(
        &self,
        slot_index: SlotIndex,
        timer_id: TimerId,
        timeout: Duration,
        callback: TimerCallback,
    );

    fn stop_timer(&self, slot_index: SlotIndex, timer_id: TimerId);

    /// Timeout for `round` of nomination or balloting.
    fn compute_timeout(&self, round: u32, is_nomination: bool) -> Duration;

    fn has_upgrades(&self, value: &Value) -> bool;

    /// `value` with every upgrade removed, or `None` if it does not decode.
    fn strip_all_upgrades(&self, value: &Value) -> Option<Value>;

    /// Signs an outbound envelope in place.
    fn sign_envelope(&self, envelope: &mut ScpEnvelope);

    /// Hands a signed envelope to the transport.
    fn emit_envelope(&self, envelope: &ScpEnvelope);
}
