//! Storage behind the ledger close.
//!
//! The close operation reads accounts and transaction bundles through
//! [`LedgerStore`] and writes each closed ledger back with a single
//! [`LedgerStore::apply_ledger_delta`] call that must be atomic. Two
//! implementations are provided: [`MemoryStore`] for tests and tools, and
//! [`SqliteStore`] over `sluice-db`.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;
use sluice_common::Hash256;
use sluice_db::{
    AccountQueries, AccountRow, Database, LedgerHeaderQueries, StateQueries, TxSetQueries,
};
use stellar_xdr::curr::{
    AccountId, LedgerHeader, Limits, PublicKey, ReadXdr, TransactionSet, Uint256, WriteXdr,
};
use tracing::debug;

use crate::delta::{AccountChange, AccountState};
use crate::tx_bundle::TxBundle;
use crate::{LedgerError, Result};

/// Everything one ledger close writes.
#[derive(Debug, Clone)]
pub struct LedgerChanges {
    pub header: LedgerHeader,
    pub header_hash: Hash256,
    pub accounts: Vec<AccountChange>,
    /// The bundle the ledger applied, stored for later lookup by hash.
    pub tx_bundle: Option<Arc<TxBundle>>,
    /// `storestate` entries, the last-closed pointer among them.
    pub persistent_state: Vec<(&'static str, String)>,
}

/// Transactional key/value storage for ledger state.
pub trait LedgerStore: Send + Sync {
    fn load_account(&self, id: &AccountId) -> Result<Option<AccountState>>;

    fn load_tx_bundle(&self, hash: &Hash256) -> Result<Option<TxBundle>>;

    fn load_persistent_state(&self, key: &str) -> Result<Option<String>>;

    /// Writes a whole ledger atomically: all of `changes` or none of it.
    fn apply_ledger_delta(&self, changes: &LedgerChanges) -> Result<()>;

    /// Drops stored bundles applied before `ledger_seq`.
    fn collect_garbage(&self, ledger_seq: u32) -> Result<usize>;
}

fn account_key(id: &AccountId) -> String {
    let AccountId(PublicKey::PublicKeyTypeEd25519(Uint256(bytes))) = id;
    hex::encode(bytes)
}

fn encode_bundle(bundle: &TxBundle) -> Result<Vec<u8>> {
    Ok(bundle.to_xdr_set()?.to_xdr(Limits::none())?)
}

fn decode_bundle(bytes: &[u8]) -> Result<TxBundle> {
    let set = TransactionSet::from_xdr(bytes, Limits::none())?;
    TxBundle::from_xdr_set(set)
}

#[derive(Default)]
struct MemoryState {
    accounts: BTreeMap<AccountId, AccountState>,
    bundles: HashMap<Hash256, (u32, TxBundle)>,
    state: HashMap<String, String>,
    headers: BTreeMap<u32, LedgerHeader>,
}

/// A [`LedgerStore`] held entirely in memory.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds an account directly, bypassing the close path.
    pub fn put_account(&self, id: AccountId, state: AccountState) {
        self.inner.write().accounts.insert(id, state);
    }

    pub fn account_count(&self) -> usize {
        self.inner.read().accounts.len()
    }

    pub fn header(&self, ledger_seq: u32) -> Option<LedgerHeader> {
        self.inner.read().headers.get(&ledger_seq).cloned()
    }
}

impl LedgerStore for MemoryStore {
    fn load_account(&self, id: &AccountId) -> Result<Option<AccountState>> {
        Ok(self.inner.read().accounts.get(id).copied())
    }

    fn load_tx_bundle(&self, hash: &Hash256) -> Result<Option<TxBundle>> {
        Ok(self
            .inner
            .read()
            .bundles
            .get(hash)
            .map(|(_, bundle)| bundle.clone()))
    }

    fn load_persistent_state(&self, key: &str) -> Result<Option<String>> {
        Ok(self.inner.read().state.get(key).cloned())
    }

    fn apply_ledger_delta(&self, changes: &LedgerChanges) -> Result<()> {
        let mut inner = self.inner.write();
        for (id, state) in &changes.accounts {
            match state {
                Some(state) => {
                    inner.accounts.insert(id.clone(), *state);
                }
                None => {
                    inner.accounts.remove(id);
                }
            }
        }
        if let Some(bundle) = &changes.tx_bundle {
            inner.bundles.insert(
                bundle.contents_hash(),
                (changes.header.ledger_seq, bundle.as_ref().clone()),
            );
        }
        for (key, value) in &changes.persistent_state {
            inner.state.insert((*key).to_string(), value.clone());
        }
        inner
            .headers
            .insert(changes.header.ledger_seq, changes.header.clone());
        Ok(())
    }

    fn collect_garbage(&self, ledger_seq: u32) -> Result<usize> {
        let mut inner = self.inner.write();
        let before = inner.bundles.len();
        inner.bundles.retain(|_, (seq, _)| *seq >= ledger_seq);
        Ok(before - inner.bundles.len())
    }
}

/// A [`LedgerStore`] backed by SQLite.
#[derive(Clone)]
pub struct SqliteStore {
    db: Database,
}

impl SqliteStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Seeds an account directly, bypassing the close path.
    pub fn put_account(&self, id: &AccountId, state: AccountState) -> Result<()> {
        let row = AccountRow {
            balance: state.balance,
            seq_num: state.seq_num,
            num_sub_entries: state.num_sub_entries,
        };
        self.db
            .with_connection(|conn| conn.store_account(&account_key(id), &row))?;
        Ok(())
    }

    pub fn load_header(&self, ledger_seq: u32) -> Result<Option<LedgerHeader>> {
        let bytes = self
            .db
            .with_connection(|conn| conn.load_ledger_header_by_seq(ledger_seq))?;
        bytes
            .map(|b| LedgerHeader::from_xdr(b, Limits::none()).map_err(LedgerError::from))
            .transpose()
    }
}

impl LedgerStore for SqliteStore {
    fn load_account(&self, id: &AccountId) -> Result<Option<AccountState>> {
        let row = self
            .db
            .with_connection(|conn| conn.load_account(&account_key(id)))?;
        Ok(row.map(|row| AccountState {
            balance: row.balance,
            seq_num: row.seq_num,
            num_sub_entries: row.num_sub_entries,
        }))
    }

    fn load_tx_bundle(&self, hash: &Hash256) -> Result<Option<TxBundle>> {
        let bytes = self
            .db
            .with_connection(|conn| conn.load_tx_set(&hash.to_hex()))?;
        bytes.map(|b| decode_bundle(&b)).transpose()
    }

    fn load_persistent_state(&self, key: &str) -> Result<Option<String>> {
        Ok(self.db.with_connection(|conn| conn.get_state(key))?)
    }

    fn apply_ledger_delta(&self, changes: &LedgerChanges) -> Result<()> {
        let header_bytes = changes.header.to_xdr(Limits::none())?;
        let bundle = match &changes.tx_bundle {
            Some(bundle) => Some((bundle.contents_hash().to_hex(), encode_bundle(bundle)?)),
            None => None,
        };
        let ledger_seq = changes.header.ledger_seq;

        self.db.transaction(|tx| {
            for (id, state) in &changes.accounts {
                let key = account_key(id);
                match state {
                    Some(state) => tx.store_account(
                        &key,
                        &AccountRow {
                            balance: state.balance,
                            seq_num: state.seq_num,
                            num_sub_entries: state.num_sub_entries,
                        },
                    )?,
                    None => tx.delete_account(&key)?,
                }
            }
            if let Some((hash, bytes)) = &bundle {
                tx.store_tx_set(hash, ledger_seq, bytes)?;
            }
            tx.store_ledger_header(&changes.header_hash.to_hex(), ledger_seq, &header_bytes)?;
            for (key, value) in &changes.persistent_state {
                tx.set_state(key, value)?;
            }
            Ok(())
        })?;
        debug!(
            ledger_seq,
            accounts = changes.accounts.len(),
            "Committed ledger to database"
        );
        Ok(())
    }

    fn collect_garbage(&self, ledger_seq: u32) -> Result<usize> {
        Ok(self
            .db
            .with_connection(|conn| conn.delete_tx_sets_before(ledger_seq))?)
    }
}
