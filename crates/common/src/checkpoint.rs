//! Checkpoint arithmetic.
//!
//! History is published in checkpoints of `frequency` ledgers. A checkpoint
//! is identified by its final ledger, which satisfies
//! `(seq + 1) % frequency == 0`. With the default frequency of 64:
//!
//! - checkpoint 63 contains ledgers 0-63
//! - checkpoint 127 contains ledgers 64-127
//! - checkpoint 191 contains ledgers 128-191

/// Default number of ledgers per checkpoint.
pub const CHECKPOINT_FREQUENCY: u32 = 64;

/// The checkpoint ledger that contains `seq`.
///
/// ```
/// use sluice_common::checkpoint::checkpoint_containing;
///
/// assert_eq!(checkpoint_containing(0, 64), 63);
/// assert_eq!(checkpoint_containing(63, 64), 63);
/// assert_eq!(checkpoint_containing(64, 64), 127);
/// assert_eq!(checkpoint_containing(150, 64), 191);
/// ```
pub fn checkpoint_containing(seq: u32, frequency: u32) -> u32 {
    (seq / frequency + 1) * frequency - 1
}

pub fn is_checkpoint_ledger(seq: u32, frequency: u32) -> bool {
    (seq + 1) % frequency == 0
}

/// The first ledger after the checkpoint containing `seq`.
///
/// Once this ledger has closed on the network, the checkpoint containing
/// `seq` is complete and can be published.
///
/// ```
/// use sluice_common::checkpoint::first_ledger_after_checkpoint_containing;
///
/// assert_eq!(first_ledger_after_checkpoint_containing(1, 64), 64);
/// assert_eq!(first_ledger_after_checkpoint_containing(150, 64), 192);
/// assert_eq!(first_ledger_after_checkpoint_containing(191, 64), 192);
/// ```
pub fn first_ledger_after_checkpoint_containing(seq: u32, frequency: u32) -> u32 {
    checkpoint_containing(seq, frequency) + 1
}

/// The ledger whose externalization should trigger a catchup round that
/// was entered because `seq` arrived out of order: the checkpoint boundary
/// at or after `seq`.
///
/// ```
/// use sluice_common::checkpoint::catchup_trigger_ledger;
///
/// assert_eq!(catchup_trigger_ledger(127, 64), 127);
/// assert_eq!(catchup_trigger_ledger(150, 64), 191);
/// assert_eq!(catchup_trigger_ledger(192, 64), 255);
/// ```
pub fn catchup_trigger_ledger(seq: u32, frequency: u32) -> u32 {
    checkpoint_containing(seq, frequency)
}

/// Most ledgers buffered from an out-of-order ledger up to and including
/// its trigger.
pub fn max_ledgers_before_trigger(frequency: u32) -> u32 {
    frequency
}
