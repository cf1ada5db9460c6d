//! Deciding, per externalized ledger, whether to close, buffer or catch up.
//!
//! The state machine sits between consensus and [`LedgerManager`]. While the
//! node is in sync every decision closes immediately. When a decision
//! arrives for a ledger beyond `LCL + 1` the node is behind: it buffers
//! decisions until the network has published the checkpoint it needs, asks
//! a [`CatchupDriver`](crate::CatchupDriver) to replay history up to the
//! ledger before the first buffered one, then replays the buffer through
//! the normal close path.
//!
//! ```text
//!            TooNew                          buffer reaches trigger
//! Booting ──────────► CatchingUp(WaitingForTriggerLedger) ──────────►
//! Synced                                                            │
//!   ▲                                                               ▼
//!   │  Closed                                      CatchingUp(ApplyingHistory)
//!   └──────── CatchingUp(WaitingForClosingLedger) ◄─────────────────┘
//!                                                  boundary verified,
//!                                                  buffer replayed
//! ```
//!
//! A failed or unverifiable catchup returns to `Booting`; the next decision
//! starts a new round.

use std::fmt;
use std::sync::Arc;

use sluice_common::checkpoint::catchup_trigger_ledger;
use sluice_common::SafetyViolation;
use stellar_xdr::curr::LedgerHeader;
use tracing::{debug, error, info, warn};

use crate::buffer::{BufferOutcome, SyncingLedgerBuffer, DEFAULT_MAX_BUFFERED_LEDGERS};
use crate::catchup::{CatchupConfiguration, CatchupProgress};
use crate::close_data::CloseRequest;
use crate::header::compute_header_hash;
use crate::manager::{LedgerCloseResult, LedgerManager};
use crate::{LedgerError, Result};

/// Progress of a catchup cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatchupState {
    None,
    WaitingForTriggerLedger,
    ApplyingHistory,
    WaitingForClosingLedger,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerManagerState {
    Booting,
    Synced,
    CatchingUp(CatchupState),
}

impl fmt::Display for LedgerManagerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LedgerManagerState::Booting => f.write_str("Booting"),
            LedgerManagerState::Synced => f.write_str("Synced"),
            LedgerManagerState::CatchingUp(sub) => write!(f, "CatchingUp({sub:?})"),
        }
    }
}

/// Result of [`LedgerCloseStateMachine::close_ledger_if`].
#[derive(Debug)]
pub enum CloseOutcome {
    Closed(Box<LedgerCloseResult>),
    TooOld,
    TooNew,
}

/// A catchup round the caller must start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatchupTicket {
    /// Identifies the round; results for other rounds are ignored.
    pub round: u64,
    pub configuration: CatchupConfiguration,
}

/// What handling one event produced.
#[derive(Debug, Default)]
pub struct ExternalizeOutcome {
    /// Ledgers closed, in order.
    pub closed: Vec<LedgerCloseResult>,
    pub start_catchup: Option<CatchupTicket>,
}

impl ExternalizeOutcome {
    fn closed(result: LedgerCloseResult) -> Self {
        Self {
            closed: vec![result],
            start_catchup: None,
        }
    }
}

/// Settings for a [`LedgerCloseStateMachine`].
#[derive(Debug, Clone, Copy)]
pub struct StateMachineConfig {
    pub max_buffered_ledgers: usize,
    /// Adopt every catchup boundary without checking it against the buffer.
    pub skip_verification: bool,
}

impl Default for StateMachineConfig {
    fn default() -> Self {
        Self {
            max_buffered_ledgers: DEFAULT_MAX_BUFFERED_LEDGERS,
            skip_verification: false,
        }
    }
}

pub struct LedgerCloseStateMachine {
    manager: Arc<LedgerManager>,
    config: StateMachineConfig,
    state: LedgerManagerState,
    buffer: SyncingLedgerBuffer,
    trigger_ledger: Option<u32>,
    catchup_round: u64,
    /// Whether the running round adopts its boundary unverified.
    round_is_manual: bool,
}

impl LedgerCloseStateMachine {
    pub fn new(manager: Arc<LedgerManager>, config: StateMachineConfig) -> Self {
        manager.set_synced(false);
        Self {
            manager,
            buffer: SyncingLedgerBuffer::new(config.max_buffered_ledgers),
            config,
            state: LedgerManagerState::Booting,
            trigger_ledger: None,
            catchup_round: 0,
            round_is_manual: false,
        }
    }

    pub fn manager(&self) -> &Arc<LedgerManager> {
        &self.manager
    }

    pub fn state(&self) -> LedgerManagerState {
        self.state
    }

    pub fn catchup_state(&self) -> CatchupState {
        match self.state {
            LedgerManagerState::CatchingUp(sub) => sub,
            _ => CatchupState::None,
        }
    }

    /// First and last buffered ledger.
    pub fn buffered_range(&self) -> Option<(u32, u32)> {
        Some((self.buffer.front_seq()?, self.buffer.back_seq()?))
    }

    pub fn trigger_ledger(&self) -> Option<u32> {
        self.trigger_ledger
    }

    pub fn catchup_round(&self) -> u64 {
        self.catchup_round
    }

    pub fn last_closed_ledger_header(&self) -> Option<LedgerHeader> {
        self.manager.last_closed_ledger_header()
    }

    fn set_state(&mut self, state: LedgerManagerState) {
        if self.state != state {
            info!(from = %self.state, to = %state, "Ledger state transition");
            self.state = state;
        }
        self.manager.set_synced(state == LedgerManagerState::Synced);
    }

    /// Closes `request` if it is the next ledger.
    ///
    /// A request for `LCL + 1` that does not build on the LCL hash means
    /// the network agreed on a ledger this node did not; that is fatal.
    pub fn close_ledger_if(&self, request: &CloseRequest) -> Result<CloseOutcome> {
        let lcl_seq = self.manager.last_closed_ledger_seq();
        let lcl_hash = self
            .manager
            .last_closed_ledger_hash()
            .ok_or(LedgerError::NotInitialized)?;

        let seq = request.ledger_seq();
        if seq == lcl_seq + 1 {
            if request.previous_ledger_hash() != lcl_hash {
                error!(
                    ledger_seq = seq,
                    expected = %lcl_hash,
                    actual = %request.previous_ledger_hash(),
                    "Externalized ledger does not build on our last closed ledger"
                );
                return Err(SafetyViolation::PreviousHashMismatch {
                    ledger_seq: seq,
                    expected: lcl_hash,
                    actual: request.previous_ledger_hash(),
                }
                .into());
            }
            let result = self.manager.close_ledger(request)?;
            return Ok(CloseOutcome::Closed(Box::new(result)));
        }
        if seq <= lcl_seq {
            Ok(CloseOutcome::TooOld)
        } else {
            Ok(CloseOutcome::TooNew)
        }
    }

    /// Handles one consensus decision.
    pub fn on_externalized(&mut self, request: CloseRequest) -> Result<ExternalizeOutcome> {
        match self.state {
            LedgerManagerState::Booting | LedgerManagerState::Synced => {
                self.close_or_start_catchup(request)
            }
            LedgerManagerState::CatchingUp(CatchupState::WaitingForClosingLedger) => {
                match self.close_ledger_if(&request)? {
                    CloseOutcome::Closed(result) => {
                        self.set_state(LedgerManagerState::Synced);
                        Ok(ExternalizeOutcome::closed(*result))
                    }
                    CloseOutcome::TooOld => {
                        debug!(ledger_seq = request.ledger_seq(), "Ignoring old ledger");
                        Ok(ExternalizeOutcome::default())
                    }
                    CloseOutcome::TooNew => {
                        warn!(
                            ledger_seq = request.ledger_seq(),
                            lcl = self.manager.last_closed_ledger_seq(),
                            "Fell behind again after catchup, restarting"
                        );
                        self.restart();
                        self.close_or_start_catchup(request)
                    }
                }
            }
            LedgerManagerState::CatchingUp(_) => self.buffer_request(request),
        }
    }

    fn close_or_start_catchup(&mut self, request: CloseRequest) -> Result<ExternalizeOutcome> {
        match self.close_ledger_if(&request)? {
            CloseOutcome::Closed(result) => {
                self.set_state(LedgerManagerState::Synced);
                Ok(ExternalizeOutcome::closed(*result))
            }
            CloseOutcome::TooOld => {
                debug!(
                    ledger_seq = request.ledger_seq(),
                    lcl = self.manager.last_closed_ledger_seq(),
                    "Ignoring old ledger"
                );
                Ok(ExternalizeOutcome::default())
            }
            CloseOutcome::TooNew => {
                let seq = request.ledger_seq();
                let trigger = catchup_trigger_ledger(seq, self.manager.checkpoint_frequency());
                info!(
                    ledger_seq = seq,
                    lcl = self.manager.last_closed_ledger_seq(),
                    trigger,
                    "Out of sync, buffering ledgers until catchup can start"
                );
                self.buffer.start(request);
                self.trigger_ledger = Some(trigger);
                self.set_state(LedgerManagerState::CatchingUp(
                    CatchupState::WaitingForTriggerLedger,
                ));
                Ok(ExternalizeOutcome {
                    closed: Vec::new(),
                    start_catchup: self.maybe_start_catchup(),
                })
            }
        }
    }

    fn buffer_request(&mut self, request: CloseRequest) -> Result<ExternalizeOutcome> {
        let seq = request.ledger_seq();
        match self.buffer.add(request.clone(), self.manager.last_closed_ledger_seq()) {
            BufferOutcome::Contiguous => Ok(ExternalizeOutcome {
                closed: Vec::new(),
                start_catchup: self.maybe_start_catchup(),
            }),
            BufferOutcome::TooOld => Ok(ExternalizeOutcome::default()),
            BufferOutcome::TooNew => {
                warn!(
                    ledger_seq = seq,
                    buffered = ?self.buffered_range(),
                    "Buffered ledgers no longer contiguous, restarting catchup"
                );
                self.restart();
                self.close_or_start_catchup(request)
            }
        }
    }

    fn maybe_start_catchup(&mut self) -> Option<CatchupTicket> {
        if self.catchup_state() != CatchupState::WaitingForTriggerLedger {
            return None;
        }
        let trigger = self.trigger_ledger?;
        let back = self.buffer.back_seq()?;
        if back < trigger {
            return None;
        }
        let front = self.buffer.front_seq()?;
        let manual = self.config.skip_verification;
        Some(self.begin_round(front - 1, manual))
    }

    fn begin_round(&mut self, to_ledger: u32, manual: bool) -> CatchupTicket {
        self.catchup_round += 1;
        self.round_is_manual = manual;
        let configuration =
            CatchupConfiguration::new(self.manager.last_closed_ledger_seq(), to_ledger, manual);
        info!(
            round = self.catchup_round,
            to_ledger,
            count = configuration.count,
            manual,
            "Starting catchup"
        );
        self.set_state(LedgerManagerState::CatchingUp(CatchupState::ApplyingHistory));
        CatchupTicket {
            round: self.catchup_round,
            configuration,
        }
    }

    /// Starts an operator-requested catchup to `to_ledger`. Its boundary is
    /// adopted without verification.
    ///
    /// Returns `None` when `to_ledger` is not past the last closed ledger.
    pub fn start_manual_catchup(&mut self, to_ledger: u32) -> Option<CatchupTicket> {
        let lcl = self.manager.last_closed_ledger_seq();
        if to_ledger <= lcl {
            warn!(to_ledger, lcl, "Refusing manual catchup to a ledger already closed");
            return None;
        }
        self.buffer.clear();
        self.trigger_ledger = None;
        Some(self.begin_round(to_ledger, true))
    }

    fn restart(&mut self) {
        self.buffer.clear();
        self.trigger_ledger = None;
        self.set_state(LedgerManagerState::Booting);
    }

    /// Handles a progress event from catchup round `round`.
    pub fn on_catchup_progress(
        &mut self,
        round: u64,
        progress: CatchupProgress,
    ) -> Result<ExternalizeOutcome> {
        match progress {
            CatchupProgress::AppliedBuckets { ledger_seq } => {
                info!(round, ledger_seq, "Catchup applied buckets");
                Ok(ExternalizeOutcome::default())
            }
            CatchupProgress::AppliedTransactions { ledger_seq } => {
                info!(round, ledger_seq, "Catchup applied transactions");
                Ok(ExternalizeOutcome::default())
            }
            CatchupProgress::Finished { boundary } => self.on_catchup_complete(round, Ok(boundary)),
            CatchupProgress::Failed { reason } => self.on_catchup_complete(round, Err(reason)),
        }
    }

    /// Finishes catchup round `round`: verifies and adopts the boundary,
    /// then replays buffered ledgers through the normal close path.
    pub fn on_catchup_complete(
        &mut self,
        round: u64,
        result: std::result::Result<LedgerHeader, String>,
    ) -> Result<ExternalizeOutcome> {
        if round != self.catchup_round
            || self.catchup_state() != CatchupState::ApplyingHistory
        {
            debug!(round, current = self.catchup_round, state = %self.state, "Ignoring stale catchup result");
            return Ok(ExternalizeOutcome::default());
        }

        let boundary = match result {
            Ok(boundary) => boundary,
            Err(reason) => {
                warn!(round, %reason, "Catchup failed, will retry on next externalize");
                self.restart();
                return Ok(ExternalizeOutcome::default());
            }
        };

        if !self.round_is_manual && !self.boundary_matches_buffer(&boundary)? {
            self.restart();
            return Ok(ExternalizeOutcome::default());
        }
        let lcl = self.manager.last_closed_ledger_seq();
        if boundary.ledger_seq <= lcl {
            warn!(
                round,
                boundary = boundary.ledger_seq,
                lcl,
                "Catchup boundary behind last closed ledger, discarding"
            );
            self.restart();
            return Ok(ExternalizeOutcome::default());
        }

        self.manager.adopt_catchup_boundary(boundary)?;

        let mut outcome = ExternalizeOutcome::default();
        for request in self.buffer.drain() {
            match self.close_ledger_if(&request)? {
                CloseOutcome::Closed(result) => outcome.closed.push(*result),
                CloseOutcome::TooOld => {}
                CloseOutcome::TooNew => {
                    warn!(
                        ledger_seq = request.ledger_seq(),
                        lcl = self.manager.last_closed_ledger_seq(),
                        "Gap while replaying buffered ledgers"
                    );
                    self.restart();
                    return Ok(outcome);
                }
            }
        }
        self.trigger_ledger = None;
        info!(
            round,
            lcl = self.manager.last_closed_ledger_seq(),
            replayed = outcome.closed.len(),
            "Catchup complete, waiting for next ledger"
        );
        self.set_state(LedgerManagerState::CatchingUp(
            CatchupState::WaitingForClosingLedger,
        ));
        Ok(outcome)
    }

    fn boundary_matches_buffer(&self, boundary: &LedgerHeader) -> Result<bool> {
        let Some(front) = self.buffer.front() else {
            warn!(
                ledger_seq = boundary.ledger_seq,
                "No buffered ledger to verify catchup boundary against"
            );
            return Ok(false);
        };
        let hash = compute_header_hash(boundary)?;
        if boundary.ledger_seq + 1 != front.ledger_seq() || hash != front.previous_ledger_hash() {
            warn!(
                boundary_seq = boundary.ledger_seq,
                boundary_hash = %hash,
                expected_seq = front.ledger_seq() - 1,
                expected_hash = %front.previous_ledger_hash(),
                "Catchup boundary does not match buffered ledgers"
            );
            return Ok(false);
        }
        Ok(true)
    }
}
