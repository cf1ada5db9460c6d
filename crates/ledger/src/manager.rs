//! The ledger close operation.
//!
//! [`LedgerManager`] owns the last closed ledger (LCL) and is the only code
//! that advances it. A close runs in four phases over one [`LedgerDelta`]:
//!
//! 1. **begin**: check protocol support, sequence, previous hash and the
//!    bundle's contents hash. Any mismatch here is fatal.
//! 2. **fees**: charge every transaction's fee and consume its sequence
//!    number, one delta scope per transaction.
//! 3. **apply**: hand each transaction to the [`TransactionExecutor`], one
//!    scope per transaction; failures are recorded, never propagated.
//! 4. **upgrades**: apply the value's upgrade steps, one scope per step.
//!
//! The delta is then written with a single atomic store call, the LCL
//! pointer moves, and the post-close hooks fire.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use sluice_common::checkpoint::{is_checkpoint_ledger, CHECKPOINT_FREQUENCY};
use sluice_common::{
    Hash256, NetworkId, SafetyViolation, CURRENT_LEDGER_PROTOCOL_VERSION,
};
use sluice_crypto::{transaction_payload_hash, SecretKey};
use sluice_db::state_keys;
use stellar_xdr::curr::{
    AccountId, LedgerHeader, LedgerUpgrade, Limits, ReadXdr, TransactionResult,
    TransactionResultExt, TransactionResultPair, TransactionResultResult, TransactionResultSet,
    UpgradeType, WriteXdr,
};
use tracing::{debug, error, info, warn};

use crate::close_data::CloseRequest;
use crate::delta::{AccountState, LedgerDelta};
use crate::executor::{is_success, NoOpExecutor, TransactionExecutor};
use crate::frame::TransactionFrame;
use crate::header::{
    compute_header_hash, create_next_header, genesis_header, GENESIS_TOTAL_COINS,
};
use crate::hooks::{HistoryArchiveState, LedgerCloseHooks, NoopCloseHooks};
use crate::store::{LedgerChanges, LedgerStore};
use crate::upgrades::{apply_upgrade, decode_upgrade, upgrade_to_string};
use crate::{LedgerError, Result};

/// Settings for a [`LedgerManager`].
#[derive(Debug, Clone)]
pub struct LedgerManagerConfig {
    pub network_id: NetworkId,
    /// Ledgers per history checkpoint.
    pub checkpoint_frequency: u32,
}

impl LedgerManagerConfig {
    pub fn new(network_id: NetworkId) -> Self {
        Self {
            network_id,
            checkpoint_frequency: CHECKPOINT_FREQUENCY,
        }
    }
}

#[derive(Debug, Clone)]
struct LastClosed {
    header: LedgerHeader,
    hash: Hash256,
}

/// An upgrade step the close could not apply.
#[derive(Debug, Clone)]
pub struct FailedUpgrade {
    pub raw: UpgradeType,
    pub reason: String,
}

/// What one close produced.
#[derive(Debug, Clone)]
pub struct LedgerCloseResult {
    pub header: LedgerHeader,
    pub header_hash: Hash256,
    /// One entry per transaction, in apply order.
    pub tx_results: Vec<TransactionResultPair>,
    pub applied_upgrades: Vec<LedgerUpgrade>,
    pub failed_upgrades: Vec<FailedUpgrade>,
}

impl LedgerCloseResult {
    pub fn ledger_seq(&self) -> u32 {
        self.header.ledger_seq
    }

    /// Number of transactions whose result is a success.
    pub fn successful_count(&self) -> usize {
        self.tx_results
            .iter()
            .filter(|pair| is_success(&pair.result.result))
            .count()
    }
}

/// The account holding every coin at genesis. Its key derives from the
/// network id, so anyone on the network can reconstruct it.
pub fn root_account_secret(network_id: &NetworkId) -> SecretKey {
    SecretKey::from_seed(network_id.as_bytes())
}

pub fn root_account_id(network_id: &NetworkId) -> AccountId {
    root_account_secret(network_id).public_key().to_account_id()
}

/// Owns the last closed ledger and performs ledger closes.
pub struct LedgerManager {
    config: LedgerManagerConfig,
    store: Arc<dyn LedgerStore>,
    executor: Arc<dyn TransactionExecutor>,
    hooks: Arc<dyn LedgerCloseHooks>,
    lcl: RwLock<Option<LastClosed>>,
    /// Whether the LCL is current with the network.
    synced: AtomicBool,
    /// Held for the whole of a close so two closes never interleave.
    close_lock: Mutex<()>,
}

impl LedgerManager {
    pub fn new(config: LedgerManagerConfig, store: Arc<dyn LedgerStore>) -> Self {
        Self {
            config,
            store,
            executor: Arc::new(NoOpExecutor),
            hooks: Arc::new(NoopCloseHooks),
            lcl: RwLock::new(None),
            synced: AtomicBool::new(false),
            close_lock: Mutex::new(()),
        }
    }

    pub fn with_executor(mut self, executor: Arc<dyn TransactionExecutor>) -> Self {
        self.executor = executor;
        self
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn LedgerCloseHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn network_id(&self) -> &NetworkId {
        &self.config.network_id
    }

    pub fn checkpoint_frequency(&self) -> u32 {
        self.config.checkpoint_frequency
    }

    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    pub fn is_initialized(&self) -> bool {
        self.lcl.read().is_some()
    }

    /// True while the close state machine is `Synced`: the LCL is the
    /// ledger the network most recently closed.
    pub fn is_synced(&self) -> bool {
        self.synced.load(Ordering::Acquire)
    }

    /// Set by the close state machine on every state transition.
    pub fn set_synced(&self, synced: bool) {
        self.synced.store(synced, Ordering::Release);
    }

    pub fn last_closed_ledger_header(&self) -> Option<LedgerHeader> {
        self.lcl.read().as_ref().map(|lcl| lcl.header.clone())
    }

    pub fn last_closed_ledger_hash(&self) -> Option<Hash256> {
        self.lcl.read().as_ref().map(|lcl| lcl.hash)
    }

    /// Sequence of the LCL, or 0 before initialization.
    pub fn last_closed_ledger_seq(&self) -> u32 {
        self.lcl
            .read()
            .as_ref()
            .map(|lcl| lcl.header.ledger_seq)
            .unwrap_or(0)
    }

    /// Restores the LCL from the persisted pointer. Returns `false` when
    /// nothing has been persisted yet.
    pub fn load_last_known_ledger(&self) -> Result<bool> {
        let Some(hash_hex) = self
            .store
            .load_persistent_state(state_keys::LAST_CLOSED_LEDGER)?
        else {
            return Ok(false);
        };
        let header_hex = self
            .store
            .load_persistent_state(state_keys::LAST_CLOSED_HEADER)?
            .ok_or_else(|| {
                LedgerError::CorruptState("last closed header missing".to_string())
            })?;

        let stored_hash = Hash256::from_hex(&hash_hex)
            .map_err(|e| LedgerError::CorruptState(format!("bad last closed hash: {e}")))?;
        let bytes = hex::decode(&header_hex)
            .map_err(|e| LedgerError::CorruptState(format!("bad last closed header: {e}")))?;
        let header = LedgerHeader::from_xdr(bytes, Limits::none())?;
        let hash = compute_header_hash(&header)?;
        if hash != stored_hash {
            return Err(LedgerError::CorruptState(format!(
                "last closed header hashes to {hash}, pointer names {stored_hash}"
            )));
        }

        info!(
            ledger_seq = header.ledger_seq,
            hash = %hash.short(),
            "Loaded last closed ledger"
        );
        *self.lcl.write() = Some(LastClosed { header, hash });
        Ok(true)
    }

    /// Creates and persists ledger 1 with the root account holding every
    /// coin.
    pub fn initialize_genesis(&self, ledger_version: u32) -> Result<Hash256> {
        if self.is_initialized()
            || self
                .store
                .load_persistent_state(state_keys::LAST_CLOSED_LEDGER)?
                .is_some()
        {
            return Err(LedgerError::AlreadyInitialized);
        }

        let header = genesis_header(ledger_version);
        let hash = compute_header_hash(&header)?;
        let root = root_account_id(&self.config.network_id);
        let changes = LedgerChanges {
            persistent_state: self.last_closed_state(&header, hash)?,
            header: header.clone(),
            header_hash: hash,
            accounts: vec![(root, Some(AccountState::new(GENESIS_TOTAL_COINS, 0)))],
            tx_bundle: None,
        };
        self.store.apply_ledger_delta(&changes)?;

        info!(
            ledger_seq = header.ledger_seq,
            version = header.ledger_version,
            hash = %hash.short(),
            "Initialized genesis ledger"
        );
        *self.lcl.write() = Some(LastClosed { header, hash });
        Ok(hash)
    }

    /// Makes a header produced by history replay the new LCL.
    pub fn adopt_catchup_boundary(&self, header: LedgerHeader) -> Result<Hash256> {
        let _guard = self.close_lock.lock();
        if self.is_initialized() {
            let lcl = self.last_closed_ledger_seq();
            if header.ledger_seq <= lcl {
                return Err(LedgerError::BoundaryNotAhead {
                    boundary: header.ledger_seq,
                    lcl,
                });
            }
        }
        let hash = compute_header_hash(&header)?;
        let changes = LedgerChanges {
            persistent_state: self.last_closed_state(&header, hash)?,
            header: header.clone(),
            header_hash: hash,
            accounts: Vec::new(),
            tx_bundle: None,
        };
        self.store.apply_ledger_delta(&changes)?;
        info!(
            ledger_seq = header.ledger_seq,
            hash = %hash.short(),
            "Adopted catchup boundary"
        );
        *self.lcl.write() = Some(LastClosed { header, hash });
        Ok(hash)
    }

    /// Applies one ledger.
    pub fn close_ledger(&self, request: &CloseRequest) -> Result<LedgerCloseResult> {
        let _guard = self.close_lock.lock();
        let mut ctx = self.begin_close(request)?;
        ctx.charge_fees();
        ctx.apply_transactions();
        ctx.record_result_hash()?;
        ctx.apply_upgrades();
        let result = ctx.commit()?;

        self.hooks.maybe_queue_history_checkpoint(result.ledger_seq());
        self.hooks.publish_queued_history();
        self.hooks.collect_garbage(result.ledger_seq());
        Ok(result)
    }

    fn begin_close<'a>(&'a self, request: &'a CloseRequest) -> Result<LedgerCloseContext<'a>> {
        let lcl = self.lcl.read().clone().ok_or(LedgerError::NotInitialized)?;

        let header = create_next_header(&lcl.header, lcl.hash, request.value());
        if header.ledger_version > CURRENT_LEDGER_PROTOCOL_VERSION {
            error!(
                ledger_seq = request.ledger_seq(),
                version = header.ledger_version,
                max_supported = CURRENT_LEDGER_PROTOCOL_VERSION,
                "Ledger protocol version is not supported by this node"
            );
            return Err(SafetyViolation::UnsupportedProtocol {
                version: header.ledger_version,
                max_supported: CURRENT_LEDGER_PROTOCOL_VERSION,
            }
            .into());
        }

        let expected_seq = lcl.header.ledger_seq + 1;
        if request.ledger_seq() != expected_seq {
            return Err(LedgerError::InvalidSequence {
                expected: expected_seq,
                actual: request.ledger_seq(),
            });
        }

        if request.previous_ledger_hash() != lcl.hash {
            error!(
                ledger_seq = request.ledger_seq(),
                expected = %lcl.hash,
                actual = %request.previous_ledger_hash(),
                "Close request does not build on the last closed ledger"
            );
            return Err(SafetyViolation::PreviousHashMismatch {
                ledger_seq: request.ledger_seq(),
                expected: lcl.hash,
                actual: request.previous_ledger_hash(),
            }
            .into());
        }

        let expected_set = Hash256::from(&request.value().tx_set_hash);
        let actual_set = request.tx_bundle().contents_hash();
        if expected_set != actual_set {
            error!(
                ledger_seq = request.ledger_seq(),
                expected = %expected_set,
                actual = %actual_set,
                "Corrupt transaction set"
            );
            return Err(SafetyViolation::CorruptTxSet {
                ledger_seq: request.ledger_seq(),
                expected: expected_set,
                actual: actual_set,
            }
            .into());
        }

        let order: Vec<TransactionFrame> = request
            .tx_bundle()
            .apply_order()
            .into_iter()
            .cloned()
            .collect();
        let pending = vec![None; order.len()];
        let fees = vec![0; order.len()];

        Ok(LedgerCloseContext {
            manager: self,
            request,
            delta: LedgerDelta::new(self.store.clone(), header),
            order,
            pending,
            fees,
            tx_results: Vec::new(),
            applied_upgrades: Vec::new(),
            failed_upgrades: Vec::new(),
        })
    }

    fn last_closed_state(
        &self,
        header: &LedgerHeader,
        hash: Hash256,
    ) -> Result<Vec<(&'static str, String)>> {
        let mut state = vec![
            (state_keys::LAST_CLOSED_LEDGER, hash.to_hex()),
            (
                state_keys::LAST_CLOSED_HEADER,
                hex::encode(header.to_xdr(Limits::none())?),
            ),
        ];
        if is_checkpoint_ledger(header.ledger_seq, self.config.checkpoint_frequency) {
            let has = HistoryArchiveState::new(header.ledger_seq, self.config.checkpoint_frequency);
            state.push((state_keys::HISTORY_ARCHIVE_STATE, serde_json::to_string(&has)?));
        }
        Ok(state)
    }
}

/// Working state of one close.
struct LedgerCloseContext<'a> {
    manager: &'a LedgerManager,
    request: &'a CloseRequest,
    delta: LedgerDelta,
    /// Apply order.
    order: Vec<TransactionFrame>,
    /// A result fixed during the fee phase; such transactions are not
    /// executed.
    pending: Vec<Option<TransactionResultResult>>,
    fees: Vec<i64>,
    tx_results: Vec<TransactionResultPair>,
    applied_upgrades: Vec<LedgerUpgrade>,
    failed_upgrades: Vec<FailedUpgrade>,
}

impl<'a> LedgerCloseContext<'a> {
    fn charge_fees(&mut self) {
        for i in 0..self.order.len() {
            self.delta.begin_scope();
            match self.charge_fee(i) {
                Ok(()) => self.delta.commit_scope(),
                Err(e) => {
                    self.delta.rollback_scope();
                    warn!(
                        ledger_seq = self.request.ledger_seq(),
                        tx = %self.order[i].full_hash().short(),
                        error = %e,
                        "Fee processing failed"
                    );
                    self.fees[i] = 0;
                    self.pending[i] = Some(TransactionResultResult::TxInternalError);
                }
            }
        }
    }

    fn charge_fee(&mut self, i: usize) -> Result<()> {
        let tx = &self.order[i];
        let base_fee = self.delta.header().base_fee;

        let payer_id = tx.fee_source_account_id();
        let Some(mut payer) = self.delta.load_account(&payer_id)? else {
            self.pending[i] = Some(TransactionResultResult::TxNoAccount);
            return Ok(());
        };
        let fee = tx.fee_to_charge(base_fee).min(payer.balance).max(0);
        payer.balance -= fee;
        self.delta.put_account(payer_id, payer);
        self.delta.header_mut().fee_pool += fee;
        self.fees[i] = fee;

        let source_id = tx.source_account_id();
        let Some(mut source) = self.delta.load_account(&source_id)? else {
            self.pending[i] = Some(TransactionResultResult::TxNoAccount);
            return Ok(());
        };
        if tx.sequence_number() != source.seq_num + 1 {
            self.pending[i] = Some(TransactionResultResult::TxBadSeq);
            return Ok(());
        }
        source.seq_num = tx.sequence_number();
        self.delta.put_account(source_id, source);
        Ok(())
    }

    fn apply_transactions(&mut self) {
        let executor = self.manager.executor.clone();
        for i in 0..self.order.len() {
            let result = match self.pending[i].take() {
                Some(result) => result,
                None => {
                    self.delta.begin_scope();
                    match executor.apply(&self.order[i], &mut self.delta) {
                        Ok(result) if is_success(&result) => {
                            self.delta.commit_scope();
                            result
                        }
                        Ok(result) => {
                            self.delta.rollback_scope();
                            result
                        }
                        Err(e) => {
                            self.delta.rollback_scope();
                            warn!(
                                ledger_seq = self.request.ledger_seq(),
                                tx = %self.order[i].full_hash().short(),
                                error = %e,
                                "Transaction execution failed"
                            );
                            TransactionResultResult::TxInternalError
                        }
                    }
                }
            };

            let tx_hash = match transaction_payload_hash(
                self.manager.network_id(),
                self.order[i].envelope(),
            ) {
                Ok(hash) => hash,
                Err(e) => {
                    debug!(error = %e, "Falling back to envelope hash for result");
                    self.order[i].full_hash()
                }
            };
            self.tx_results.push(TransactionResultPair {
                transaction_hash: tx_hash.into(),
                result: TransactionResult {
                    fee_charged: self.fees[i],
                    result,
                    ext: TransactionResultExt::V0,
                },
            });
        }
    }

    fn record_result_hash(&mut self) -> Result<()> {
        let set = TransactionResultSet {
            results: self.tx_results.clone().try_into()?,
        };
        self.delta.header_mut().tx_set_result_hash = Hash256::hash_xdr(&set)?.into();
        Ok(())
    }

    fn apply_upgrades(&mut self) {
        let upgrades = self.request.value().upgrades.to_vec();
        for raw in upgrades {
            let Some(upgrade) = decode_upgrade(&raw) else {
                warn!(ledger_seq = self.request.ledger_seq(), "Skipping undecodable upgrade");
                self.failed_upgrades.push(FailedUpgrade {
                    raw,
                    reason: "undecodable upgrade".to_string(),
                });
                continue;
            };

            self.delta.begin_scope();
            match apply_upgrade(self.delta.header_mut(), &upgrade) {
                Ok(()) => {
                    self.delta.commit_scope();
                    info!(
                        ledger_seq = self.request.ledger_seq(),
                        upgrade = %upgrade_to_string(&upgrade),
                        "Applied ledger upgrade"
                    );
                    self.applied_upgrades.push(upgrade);
                }
                Err(e) => {
                    self.delta.rollback_scope();
                    warn!(
                        ledger_seq = self.request.ledger_seq(),
                        upgrade = %upgrade_to_string(&upgrade),
                        error = %e,
                        "Ledger upgrade rejected"
                    );
                    self.failed_upgrades.push(FailedUpgrade {
                        raw,
                        reason: e.to_string(),
                    });
                }
            }
        }
    }

    fn commit(self) -> Result<LedgerCloseResult> {
        let (header, accounts) = self.delta.into_parts();
        let header_hash = compute_header_hash(&header)?;
        let changes = LedgerChanges {
            persistent_state: self.manager.last_closed_state(&header, header_hash)?,
            header: header.clone(),
            header_hash,
            accounts,
            tx_bundle: Some(self.request.tx_bundle().clone()),
        };
        self.manager.store.apply_ledger_delta(&changes)?;

        *self.manager.lcl.write() = Some(LastClosed {
            header: header.clone(),
            hash: header_hash,
        });

        let result = LedgerCloseResult {
            header,
            header_hash,
            tx_results: self.tx_results,
            applied_upgrades: self.applied_upgrades,
            failed_upgrades: self.failed_upgrades,
        };
        info!(
            ledger_seq = result.ledger_seq(),
            hash = %header_hash.short(),
            txs = result.tx_results.len(),
            succeeded = result.successful_count(),
            upgrades = result.applied_upgrades.len(),
            "Closed ledger"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::test_support::{account_of, make_tx, make_value, network};
    use crate::tx_bundle::{TxBundle, TxBundleBuilder};
    use crate::upgrades::encode_upgrade;
    use stellar_xdr::curr::TransactionEnvelope;

    fn manager() -> (Arc<MemoryStore>, LedgerManager) {
        let store = Arc::new(MemoryStore::new());
        let mgr = LedgerManager::new(LedgerManagerConfig::new(network()), store.clone());
        mgr.initialize_genesis(CURRENT_LEDGER_PROTOCOL_VERSION).unwrap();
        (store, mgr)
    }

    fn next_request(
        mgr: &LedgerManager,
        txs: Vec<TransactionEnvelope>,
        upgrades: Vec<LedgerUpgrade>,
    ) -> CloseRequest {
        let lcl = mgr.last_closed_ledger_header().unwrap();
        let mut builder = TxBundleBuilder::new(mgr.last_closed_ledger_hash().unwrap());
        for tx in txs {
            builder.add_transaction(tx).unwrap();
        }
        let bundle = Arc::new(builder.finalize().unwrap());
        let raw = upgrades.iter().map(|u| encode_upgrade(u).unwrap()).collect();
        let value = make_value(bundle.contents_hash(), lcl.scp_value.close_time.0 + 5, raw);
        CloseRequest::new(lcl.ledger_seq + 1, bundle, value).unwrap()
    }

    struct FailingExecutor;

    impl TransactionExecutor for FailingExecutor {
        fn apply(&self, frame: &TransactionFrame, delta: &mut LedgerDelta) -> Result<TransactionResultResult> {
            // Touches state before failing; the close must discard it.
            delta.put_account(frame.source_account_id(), AccountState::new(1, 999));
            if frame.sequence_number() == 1 {
                Err(LedgerError::Execution("boom".to_string()))
            } else {
                Ok(TransactionResultResult::TxFailed(Default::default()))
            }
        }
    }

    #[test]
    fn test_genesis_and_reload() {
        let (store, mgr) = manager();
        assert_eq!(mgr.last_closed_ledger_seq(), 1);
        assert!(matches!(
            mgr.initialize_genesis(CURRENT_LEDGER_PROTOCOL_VERSION),
            Err(LedgerError::AlreadyInitialized)
        ));

        let reloaded = LedgerManager::new(LedgerManagerConfig::new(network()), store.clone());
        assert!(reloaded.load_last_known_ledger().unwrap());
        assert_eq!(reloaded.last_closed_ledger_hash(), mgr.last_closed_ledger_hash());
        assert_eq!(
            store.load_account(&root_account_id(&network())).unwrap(),
            Some(AccountState::new(GENESIS_TOTAL_COINS, 0))
        );
    }

    #[test]
    fn test_empty_store_has_nothing_to_load() {
        let mgr = LedgerManager::new(LedgerManagerConfig::new(network()), Arc::new(MemoryStore::new()));
        assert!(!mgr.load_last_known_ledger().unwrap());
        assert!(!mgr.is_initialized());
    }

    #[test]
    fn test_close_advances_lcl() {
        let (_, mgr) = manager();
        let genesis_hash = mgr.last_closed_ledger_hash().unwrap();
        let req = next_request(&mgr, vec![], vec![]);
        let result = mgr.close_ledger(&req).unwrap();
        assert_eq!(result.ledger_seq(), 2);
        assert_eq!(mgr.last_closed_ledger_seq(), 2);
        assert_eq!(Hash256::from(&result.header.previous_ledger_hash), genesis_hash);
        assert_eq!(mgr.last_closed_ledger_hash(), Some(result.header_hash));

        // The same request cannot close twice.
        assert!(matches!(
            mgr.close_ledger(&req),
            Err(LedgerError::InvalidSequence { expected: 3, actual: 2 })
        ));
    }

    #[test]
    fn test_fees_and_sequence_numbers() {
        let (store, mgr) = manager();
        store.put_account(account_of(1), AccountState::new(10_000, 0));
        store.put_account(account_of(2), AccountState::new(10_000, 5));

        let req = next_request(
            &mgr,
            vec![make_tx(1, 1, 300), make_tx(1, 2, 100), make_tx(2, 9, 100)],
            vec![],
        );
        let result = mgr.close_ledger(&req).unwrap();

        assert_eq!(result.tx_results.len(), 3);
        assert_eq!(result.successful_count(), 2);
        // Charged at the base fee, not the bid.
        assert_eq!(result.header.fee_pool, 300);
        assert_eq!(
            store.load_account(&account_of(1)).unwrap(),
            Some(AccountState::new(9_800, 2))
        );
        // Bad sequence: fee charged, sequence untouched.
        assert_eq!(
            store.load_account(&account_of(2)).unwrap(),
            Some(AccountState::new(9_900, 5))
        );
        assert!(result
            .tx_results
            .iter()
            .any(|pair| pair.result.result == TransactionResultResult::TxBadSeq));
        assert_ne!(result.header.tx_set_result_hash.0, [0u8; 32]);
    }

    #[test]
    fn test_execution_failure_is_isolated() {
        let store = Arc::new(MemoryStore::new());
        let mgr = LedgerManager::new(LedgerManagerConfig::new(network()), store.clone())
            .with_executor(Arc::new(FailingExecutor));
        mgr.initialize_genesis(CURRENT_LEDGER_PROTOCOL_VERSION).unwrap();
        store.put_account(account_of(1), AccountState::new(10_000, 0));

        let req = next_request(&mgr, vec![make_tx(1, 1, 100), make_tx(1, 2, 100)], vec![]);
        let result = mgr.close_ledger(&req).unwrap();

        let codes: Vec<_> = result.tx_results.iter().map(|p| p.result.result.clone()).collect();
        assert_eq!(codes[0], TransactionResultResult::TxInternalError);
        assert!(matches!(codes[1], TransactionResultResult::TxFailed(_)));
        // Executor writes rolled back; fee phase changes kept.
        assert_eq!(
            store.load_account(&account_of(1)).unwrap(),
            Some(AccountState::new(9_800, 2))
        );
    }

    #[test]
    fn test_upgrades_isolated_per_step() {
        let (_, mgr) = manager();
        let req = next_request(
            &mgr,
            vec![],
            vec![LedgerUpgrade::BaseFee(0), LedgerUpgrade::MaxTxSetSize(500)],
        );
        let result = mgr.close_ledger(&req).unwrap();
        assert_eq!(result.applied_upgrades, vec![LedgerUpgrade::MaxTxSetSize(500)]);
        assert_eq!(result.failed_upgrades.len(), 1);
        assert_eq!(result.header.base_fee, 100);
        assert_eq!(result.header.max_tx_set_size, 500);
    }

    #[test]
    fn test_corrupt_tx_set_is_fatal() {
        let (_, mgr) = manager();
        let bundle = Arc::new(TxBundle::empty(mgr.last_closed_ledger_hash().unwrap()).unwrap());
        let value = make_value(Hash256::hash(b"not the bundle"), 10, vec![]);
        let req = CloseRequest::new_unchecked(2, bundle, value);
        let err = mgr.close_ledger(&req).unwrap_err();
        assert!(err.is_fatal());
        assert!(matches!(
            err.safety_violation(),
            Some(SafetyViolation::CorruptTxSet { ledger_seq: 2, .. })
        ));
        assert_eq!(mgr.last_closed_ledger_seq(), 1);
    }

    #[test]
    fn test_previous_hash_mismatch_is_fatal() {
        let (_, mgr) = manager();
        let bundle = Arc::new(TxBundle::empty(Hash256::hash(b"fork")).unwrap());
        let value = make_value(bundle.contents_hash(), 10, vec![]);
        let req = CloseRequest::new(2, bundle, value).unwrap();
        let err = mgr.close_ledger(&req).unwrap_err();
        assert!(matches!(
            err.safety_violation(),
            Some(SafetyViolation::PreviousHashMismatch { ledger_seq: 2, .. })
        ));
    }

    #[test]
    fn test_unsupported_protocol_is_fatal() {
        let (_, mgr) = manager();
        let mut future = mgr.last_closed_ledger_header().unwrap();
        future.ledger_seq = 10;
        future.ledger_version = CURRENT_LEDGER_PROTOCOL_VERSION + 1;
        let hash = mgr.adopt_catchup_boundary(future).unwrap();

        let bundle = Arc::new(TxBundle::empty(hash).unwrap());
        let value = make_value(bundle.contents_hash(), 10, vec![]);
        let req = CloseRequest::new(11, bundle, value).unwrap();
        assert!(matches!(
            mgr.close_ledger(&req).unwrap_err().safety_violation(),
            Some(SafetyViolation::UnsupportedProtocol { .. })
        ));
    }

    #[test]
    fn test_checkpoint_writes_archive_state() {
        let store = Arc::new(MemoryStore::new());
        let mut config = LedgerManagerConfig::new(network());
        config.checkpoint_frequency = 4;
        let mgr = LedgerManager::new(config, store.clone());
        mgr.initialize_genesis(CURRENT_LEDGER_PROTOCOL_VERSION).unwrap();

        for _ in 0..2 {
            let req = next_request(&mgr, vec![], vec![]);
            mgr.close_ledger(&req).unwrap();
        }
        let json = store
            .load_persistent_state(state_keys::HISTORY_ARCHIVE_STATE)
            .unwrap()
            .unwrap();
        let has: HistoryArchiveState = serde_json::from_str(&json).unwrap();
        assert_eq!(has.current_ledger, 3);
    }
}
