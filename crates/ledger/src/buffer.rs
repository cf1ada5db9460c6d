//! Close requests held back while the node catches up.

use std::collections::VecDeque;

use tracing::debug;

use crate::close_data::CloseRequest;

/// Default cap on buffered ledgers.
pub const DEFAULT_MAX_BUFFERED_LEDGERS: usize = 256;

/// How [`SyncingLedgerBuffer::add`] placed a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferOutcome {
    /// Appended; the buffer is still one unbroken run.
    Contiguous,
    /// Not newer than what the buffer or the LCL already covers; dropped.
    TooOld,
    /// Leaves a gap after the tail, or the buffer is full. The running
    /// catchup round cannot succeed and must restart.
    TooNew,
}

/// An ordered run of close requests with strictly consecutive sequences.
#[derive(Debug)]
pub struct SyncingLedgerBuffer {
    requests: VecDeque<CloseRequest>,
    max_len: usize,
}

impl Default for SyncingLedgerBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_BUFFERED_LEDGERS)
    }
}

impl SyncingLedgerBuffer {
    pub fn new(max_len: usize) -> Self {
        Self {
            requests: VecDeque::new(),
            max_len: max_len.max(1),
        }
    }

    /// Discards everything and starts a new run at `request`.
    pub fn start(&mut self, request: CloseRequest) {
        self.requests.clear();
        self.requests.push_back(request);
    }

    /// Appends `request` if it extends the run by exactly one ledger. An
    /// empty buffer continues from `lcl_seq`.
    pub fn add(&mut self, request: CloseRequest, lcl_seq: u32) -> BufferOutcome {
        let tail = self.back_seq().unwrap_or(lcl_seq);
        let seq = request.ledger_seq();
        if seq <= tail || seq <= lcl_seq {
            debug!(ledger_seq = seq, tail, lcl_seq, "Dropping old request from buffer");
            return BufferOutcome::TooOld;
        }
        if seq != tail + 1 {
            debug!(ledger_seq = seq, tail, "Gap in buffered ledgers");
            return BufferOutcome::TooNew;
        }
        if self.requests.len() >= self.max_len {
            debug!(ledger_seq = seq, max = self.max_len, "Ledger buffer full");
            return BufferOutcome::TooNew;
        }
        self.requests.push_back(request);
        BufferOutcome::Contiguous
    }

    pub fn front(&self) -> Option<&CloseRequest> {
        self.requests.front()
    }

    pub fn front_seq(&self) -> Option<u32> {
        self.requests.front().map(CloseRequest::ledger_seq)
    }

    pub fn back_seq(&self) -> Option<u32> {
        self.requests.back().map(CloseRequest::ledger_seq)
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    pub fn clear(&mut self) {
        self.requests.clear();
    }

    /// Removes and returns every request in ascending sequence order.
    pub fn drain(&mut self) -> Vec<CloseRequest> {
        self.requests.drain(..).collect()
    }
}
