//! In-memory change set for one ledger close, with nested scopes.
//!
//! A close opens a [`LedgerDelta`] over the last closed state. Each fee
//! charge, transaction and upgrade step runs in its own scope: committing a
//! scope folds its changes into the parent, rolling it back restores every
//! account and the header exactly as they were when the scope began. Only
//! the outermost delta is ever written to storage.

use std::collections::BTreeMap;
use std::sync::Arc;

use stellar_xdr::curr::{AccountId, LedgerHeader};
use tracing::trace;

use crate::store::LedgerStore;
use crate::Result;

/// The slice of account state a close reads and writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccountState {
    pub balance: i64,
    pub seq_num: i64,
    pub num_sub_entries: u32,
}

impl AccountState {
    pub fn new(balance: i64, seq_num: i64) -> Self {
        Self {
            balance,
            seq_num,
            num_sub_entries: 0,
        }
    }
}

/// `None` marks a deleted account.
pub type AccountChange = (AccountId, Option<AccountState>);

struct ScopeFrame {
    header: LedgerHeader,
    /// Value of each touched key in `accounts` before this scope wrote it;
    /// the outer `None` means the key was absent.
    undo: BTreeMap<AccountId, Option<Option<AccountState>>>,
}

pub struct LedgerDelta {
    store: Arc<dyn LedgerStore>,
    header: LedgerHeader,
    accounts: BTreeMap<AccountId, Option<AccountState>>,
    scopes: Vec<ScopeFrame>,
}

impl LedgerDelta {
    pub fn new(store: Arc<dyn LedgerStore>, header: LedgerHeader) -> Self {
        Self {
            store,
            header,
            accounts: BTreeMap::new(),
            scopes: Vec::new(),
        }
    }

    pub fn header(&self) -> &LedgerHeader {
        &self.header
    }

    pub fn header_mut(&mut self) -> &mut LedgerHeader {
        &mut self.header
    }

    /// Reads through this delta to storage.
    pub fn load_account(&self, id: &AccountId) -> Result<Option<AccountState>> {
        match self.accounts.get(id) {
            Some(state) => Ok(*state),
            None => self.store.load_account(id),
        }
    }

    pub fn put_account(&mut self, id: AccountId, state: AccountState) {
        self.record_undo(&id);
        self.accounts.insert(id, Some(state));
    }

    pub fn delete_account(&mut self, id: &AccountId) {
        self.record_undo(id);
        self.accounts.insert(id.clone(), None);
    }

    fn record_undo(&mut self, id: &AccountId) {
        let previous = self.accounts.get(id).copied();
        if let Some(frame) = self.scopes.last_mut() {
            frame.undo.entry(id.clone()).or_insert(previous);
        }
    }

    pub fn begin_scope(&mut self) {
        self.scopes.push(ScopeFrame {
            header: self.header.clone(),
            undo: BTreeMap::new(),
        });
    }

    /// Keeps the innermost scope's changes.
    pub fn commit_scope(&mut self) {
        let Some(frame) = self.scopes.pop() else {
            trace!("commit_scope with no open scope");
            return;
        };
        if let Some(parent) = self.scopes.last_mut() {
            for (id, previous) in frame.undo {
                parent.undo.entry(id).or_insert(previous);
            }
        }
    }

    /// Discards the innermost scope's changes, header included.
    pub fn rollback_scope(&mut self) {
        let Some(frame) = self.scopes.pop() else {
            trace!("rollback_scope with no open scope");
            return;
        };
        self.header = frame.header;
        for (id, previous) in frame.undo {
            match previous {
                Some(state) => {
                    self.accounts.insert(id, state);
                }
                None => {
                    self.accounts.remove(&id);
                }
            }
        }
    }

    pub fn scope_depth(&self) -> usize {
        self.scopes.len()
    }

    /// Number of accounts touched so far.
    pub fn num_changes(&self) -> usize {
        self.accounts.len()
    }

    /// Consumes the delta, returning the final header and account changes.
    /// Any scope still open is treated as committed.
    pub fn into_parts(self) -> (LedgerHeader, Vec<AccountChange>) {
        (self.header, self.accounts.into_iter().collect())
    }
}
