//! Per-slot timer registry.
//!
//! Timers are keyed by `(slot, timer id)`, so arming a timer that is already
//! armed replaces it. Nothing here sleeps: the event loop asks for
//! [`SlotTimers::next_deadline`] and calls [`SlotTimers::fire_due`] when it
//! passes, which keeps timer callbacks on the same serialized loop as every
//! other event.

use std::collections::BTreeMap;
use std::time::Instant;

use parking_lot::Mutex;
use sluice_scp::{SlotIndex, TimerCallback, TimerId};
use tracing::trace;

struct ArmedTimer {
    deadline: Instant,
    callback: TimerCallback,
}

#[derive(Default)]
pub struct SlotTimers {
    armed: Mutex<BTreeMap<(SlotIndex, TimerId), ArmedTimer>>,
}

impl SlotTimers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms `(slot, id)` to fire at `deadline`, replacing any earlier arming.
    pub fn setup(&self, slot: SlotIndex, id: TimerId, deadline: Instant, callback: TimerCallback) {
        trace!(slot, timer = %id, "Arming timer");
        self.armed
            .lock()
            .insert((slot, id), ArmedTimer { deadline, callback });
    }

    pub fn stop(&self, slot: SlotIndex, id: TimerId) -> bool {
        self.armed.lock().remove(&(slot, id)).is_some()
    }

    /// Cancels every timer for slots up to and including `slot`.
    pub fn purge_up_to(&self, slot: SlotIndex) -> usize {
        let mut armed = self.armed.lock();
        let keep = match slot.checked_add(1) {
            Some(next) => armed.split_off(&(next, TimerId::Nomination)),
            None => BTreeMap::new(),
        };
        let purged = armed.len();
        *armed = keep;
        if purged > 0 {
            trace!(slot, purged, "Purged stale timers");
        }
        purged
    }

    pub fn is_armed(&self, slot: SlotIndex, id: TimerId) -> bool {
        self.armed.lock().contains_key(&(slot, id))
    }

    pub fn len(&self) -> usize {
        self.armed.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.armed.lock().is_empty()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.armed.lock().values().map(|t| t.deadline).min()
    }

    /// Runs the callback of every timer whose deadline is at or before
    /// `now`, in slot order. Returns how many fired.
    ///
    /// Callbacks run after the registry lock is released, so a callback may
    /// re-arm its own timer.
    pub fn fire_due(&self, now: Instant) -> usize {
        let due: Vec<((SlotIndex, TimerId), TimerCallback)> = {
            let mut armed = self.armed.lock();
            let keys: Vec<_> = armed
                .iter()
                .filter(|(_, t)| t.deadline <= now)
                .map(|(k, _)| *k)
                .collect();
            keys.into_iter()
                .filter_map(|k| armed.remove(&k).map(|t| (k, t.callback)))
                .collect()
        };
        let fired = due.len();
        for ((slot, id), callback) in due {
            trace!(slot, timer = %id, "Timer fired");
            callback();
        }
        fired
    }
}
