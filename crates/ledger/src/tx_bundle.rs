//! Transaction bundles: the set of transactions one ledger applies.
//!
//! A bundle is built with [`TxBundleBuilder`], which may add, trim and
//! surge-price transactions freely, then frozen with
//! [`TxBundleBuilder::finalize`]. A finalized [`TxBundle`] never changes, so
//! its contents hash is computed once and it can be shared behind an `Arc`
//! between the validator cache, close requests and storage.
//!
//! Two orders are derived from the same transactions:
//!
//! - **hash order**: sorted by transaction id; the only order fed to the
//!   contents hash, so every node holding the same set agrees on it.
//! - **apply order**: per-account sequence order, interleaved in batches
//!   shuffled by the set hash; used only for execution.

use std::collections::{BTreeMap, BinaryHeap, HashSet};
use std::cmp::Ordering;
use std::fmt;

use sha2::{Digest, Sha256};
use sluice_common::{Hash256, NetworkId, MAX_OPS_PER_TX};
use sluice_crypto::{verify_envelope_signature, PublicKey};
use stellar_xdr::curr::{
    AccountId, FeeBumpTransactionInnerTx, LedgerHeader, Limits, TransactionEnvelope,
    TransactionSet, WriteXdr,
};
use tracing::{debug, trace};

use crate::frame::TransactionFrame;
use crate::header::minimum_balance;
use crate::store::LedgerStore;
use crate::Result;

/// Why a transaction cannot go into a bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxRejection {
    MissingOperation,
    TooManyOperations,
    InsufficientFee,
    BadAuth,
    NoAccount,
    BadSeq,
    InsufficientBalance,
}

impl fmt::Display for TxRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TxRejection::MissingOperation => "missing operation",
            TxRejection::TooManyOperations => "too many operations",
            TxRejection::InsufficientFee => "insufficient fee",
            TxRejection::BadAuth => "bad signature",
            TxRejection::NoAccount => "no source account",
            TxRejection::BadSeq => "bad sequence number",
            TxRejection::InsufficientBalance => "insufficient balance",
        };
        f.write_str(s)
    }
}

/// Ledger state a bundle is checked against.
pub struct TxValidationContext<'a> {
    pub header: &'a LedgerHeader,
    pub network_id: NetworkId,
    pub store: &'a dyn LedgerStore,
}

fn sort_by_hash(transactions: &mut [TransactionFrame]) {
    transactions.sort_by_key(|tx| tx.full_hash());
}

fn compute_contents_hash(
    previous_ledger_hash: &Hash256,
    hash_ordered: &[TransactionFrame],
) -> Result<Hash256> {
    let mut hasher = Sha256::new();
    hasher.update(previous_ledger_hash.as_bytes());
    for tx in hash_ordered {
        hasher.update(tx.envelope().to_xdr(Limits::none())?);
    }
    Ok(Hash256(hasher.finalize().into()))
}

fn signed_by(
    network_id: &NetworkId,
    envelope: &TransactionEnvelope,
    account: &AccountId,
) -> Result<bool> {
    let key = PublicKey::try_from(account)?;
    Ok(verify_envelope_signature(network_id, envelope, &key)?)
}

/// Checks that do not depend on the rest of the bundle.
fn check_transaction(
    tx: &TransactionFrame,
    ctx: &TxValidationContext<'_>,
) -> Result<Option<TxRejection>> {
    let op_limit = MAX_OPS_PER_TX + usize::from(tx.is_fee_bump());
    let ops = tx.operation_count() - usize::from(tx.is_fee_bump());
    if ops == 0 {
        return Ok(Some(TxRejection::MissingOperation));
    }
    if tx.operation_count() > op_limit {
        return Ok(Some(TxRejection::TooManyOperations));
    }
    if tx.fee_bid() < tx.minimum_fee(ctx.header.base_fee) {
        return Ok(Some(TxRejection::InsufficientFee));
    }

    let source = tx.source_account_id();
    let fee_source = tx.fee_source_account_id();
    if ctx.store.load_account(&source)?.is_none() || ctx.store.load_account(&fee_source)?.is_none()
    {
        return Ok(Some(TxRejection::NoAccount));
    }

    let authorized = match tx.envelope() {
        TransactionEnvelope::TxFeeBump(env) => {
            let FeeBumpTransactionInnerTx::Tx(inner) = &env.tx.inner_tx;
            let inner_env = TransactionEnvelope::Tx(inner.clone());
            signed_by(&ctx.network_id, tx.envelope(), &fee_source)?
                && signed_by(&ctx.network_id, &inner_env, &source)?
        }
        envelope => signed_by(&ctx.network_id, envelope, &source)?,
    };
    if !authorized {
        return Ok(Some(TxRejection::BadAuth));
    }
    Ok(None)
}

/// Finds every transaction that makes `transactions` invalid as a set.
fn find_invalid(
    transactions: &[TransactionFrame],
    ctx: &TxValidationContext<'_>,
) -> Result<Vec<(Hash256, TxRejection)>> {
    let mut invalid = Vec::new();
    let mut rejected: HashSet<Hash256> = HashSet::new();

    for tx in transactions {
        if let Some(reason) = check_transaction(tx, ctx)? {
            trace!(tx = %tx.full_hash().short(), %reason, "Transaction invalid");
            rejected.insert(tx.full_hash());
            invalid.push((tx.full_hash(), reason));
        }
    }

    // Sequence chains: each account's transactions must continue its
    // sequence number without gaps.
    let mut by_source: BTreeMap<AccountId, Vec<&TransactionFrame>> = BTreeMap::new();
    for tx in transactions {
        if !rejected.contains(&tx.full_hash()) {
            by_source.entry(tx.source_account_id()).or_default().push(tx);
        }
    }
    let mut fees_by_payer: BTreeMap<AccountId, i64> = BTreeMap::new();
    for (account, mut chain) in by_source {
        chain.sort_by_key(|tx| (tx.sequence_number(), tx.full_hash()));
        let Some(state) = ctx.store.load_account(&account)? else {
            continue;
        };
        let mut expected = state.seq_num + 1;
        let mut broken = false;
        for tx in chain {
            if broken || tx.sequence_number() != expected {
                broken = true;
                invalid.push((tx.full_hash(), TxRejection::BadSeq));
                continue;
            }
            expected += 1;

            let payer = tx.fee_source_account_id();
            let spent = fees_by_payer.entry(payer.clone()).or_insert(0);
            let Some(payer_state) = ctx.store.load_account(&payer)? else {
                continue;
            };
            let available =
                payer_state.balance - minimum_balance(ctx.header, payer_state.num_sub_entries);
            match spent.checked_add(tx.fee_bid()) {
                Some(total) if total <= available => *spent = total,
                _ => {
                    broken = true;
                    invalid.push((tx.full_hash(), TxRejection::InsufficientBalance));
                }
            }
        }
    }
    Ok(invalid)
}

fn total_operations(transactions: &[TransactionFrame]) -> usize {
    transactions.iter().map(TransactionFrame::operation_count).sum()
}

/// Mutable stage of a bundle.
#[derive(Debug, Clone)]
pub struct TxBundleBuilder {
    previous_ledger_hash: Hash256,
    transactions: Vec<TransactionFrame>,
}

impl TxBundleBuilder {
    pub fn new(previous_ledger_hash: Hash256) -> Self {
        Self {
            previous_ledger_hash,
            transactions: Vec::new(),
        }
    }

    /// Starts a new builder holding a copy of `bundle`'s transactions.
    pub fn from_bundle(bundle: &TxBundle) -> Self {
        Self {
            previous_ledger_hash: bundle.previous_ledger_hash,
            transactions: bundle.transactions.clone(),
        }
    }

    /// Adds a transaction. Returns `false` if it is already present.
    pub fn add_transaction(&mut self, envelope: TransactionEnvelope) -> Result<bool> {
        Ok(self.add_frame(TransactionFrame::new(envelope)?))
    }

    pub fn add_frame(&mut self, frame: TransactionFrame) -> bool {
        if self.transactions.iter().any(|tx| tx == &frame) {
            return false;
        }
        self.transactions.push(frame);
        true
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    /// Hash the bundle would have if finalized now.
    pub fn contents_hash(&self) -> Result<Hash256> {
        let mut ordered = self.transactions.clone();
        sort_by_hash(&mut ordered);
        compute_contents_hash(&self.previous_ledger_hash, &ordered)
    }

    /// Removes every transaction that is invalid against `ctx` and returns
    /// them. Removing one transaction can break the sequence chain of the
    /// ones after it, so this repeats until the set is stable.
    pub fn trim_invalid(&mut self, ctx: &TxValidationContext<'_>) -> Result<Vec<TransactionFrame>> {
        let mut removed = Vec::new();
        loop {
            let invalid = find_invalid(&self.transactions, ctx)?;
            if invalid.is_empty() {
                break;
            }
            let drop: HashSet<Hash256> = invalid.iter().map(|(hash, _)| *hash).collect();
            let (gone, kept): (Vec<_>, Vec<_>) = self
                .transactions
                .drain(..)
                .partition(|tx| drop.contains(&tx.full_hash()));
            self.transactions = kept;
            removed.extend(gone);
        }
        if !removed.is_empty() {
            debug!(removed = removed.len(), kept = self.len(), "Trimmed invalid transactions");
        }
        Ok(removed)
    }

    /// Cuts the bundle down to `max_ops` operations, dropping the lowest
    /// fee-rate transactions first.
    ///
    /// Transactions are taken per account in sequence order, always from
    /// the account whose next transaction bids the highest fee per
    /// operation (ties broken by transaction id). When an account's next
    /// transaction no longer fits, the rest of that account's chain is
    /// dropped too, since later sequence numbers cannot apply without it.
    pub fn surge_pricing_filter(&mut self, max_ops: u32) -> Vec<TransactionFrame> {
        let max_ops = max_ops as usize;
        if total_operations(&self.transactions) <= max_ops {
            return Vec::new();
        }

        let mut queues: BTreeMap<AccountId, Vec<TransactionFrame>> = BTreeMap::new();
        for tx in self.transactions.drain(..) {
            queues.entry(tx.source_account_id()).or_default().push(tx);
        }
        for queue in queues.values_mut() {
            // Reverse so the lowest sequence number pops first.
            queue.sort_by_key(|tx| std::cmp::Reverse((tx.sequence_number(), tx.full_hash())));
        }

        let mut heap: BinaryHeap<QueueHead> = queues
            .iter_mut()
            .filter_map(|(account, queue)| {
                queue.pop().map(|tx| QueueHead {
                    account: account.clone(),
                    tx,
                })
            })
            .collect();

        let mut kept = Vec::new();
        let mut removed = Vec::new();
        let mut ops_left = max_ops;
        while let Some(QueueHead { account, tx }) = heap.pop() {
            let queue = queues.entry(account.clone()).or_default();
            if tx.operation_count() > ops_left {
                removed.push(tx);
                removed.append(queue);
                continue;
            }
            ops_left -= tx.operation_count();
            kept.push(tx);
            if let Some(next) = queue.pop() {
                heap.push(QueueHead { account, tx: next });
            }
        }

        debug!(
            kept = kept.len(),
            removed = removed.len(),
            max_ops,
            "Applied surge pricing"
        );
        self.transactions = kept;
        removed
    }

    /// Freezes the bundle and computes its contents hash.
    pub fn finalize(self) -> Result<TxBundle> {
        let mut transactions = self.transactions;
        sort_by_hash(&mut transactions);
        let contents_hash = compute_contents_hash(&self.previous_ledger_hash, &transactions)?;
        Ok(TxBundle {
            previous_ledger_hash: self.previous_ledger_hash,
            transactions,
            contents_hash,
        })
    }
}

struct QueueHead {
    account: AccountId,
    tx: TransactionFrame,
}

impl QueueHead {
    /// Fee per operation as a comparable fraction.
    fn cmp_fee_rate(&self, other: &Self) -> Ordering {
        let lhs = i128::from(self.tx.fee_bid()) * other.tx.operation_count() as i128;
        let rhs = i128::from(other.tx.fee_bid()) * self.tx.operation_count() as i128;
        lhs.cmp(&rhs)
    }
}

impl PartialEq for QueueHead {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueueHead {}

impl PartialOrd for QueueHead {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueHead {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: higher fee rate first, then lower transaction id.
        self.cmp_fee_rate(other)
            .then_with(|| other.tx.full_hash().cmp(&self.tx.full_hash()))
    }
}

/// An immutable, content-addressed transaction bundle.
#[derive(Debug, Clone)]
pub struct TxBundle {
    previous_ledger_hash: Hash256,
    /// Hash order.
    transactions: Vec<TransactionFrame>,
    contents_hash: Hash256,
}

impl PartialEq for TxBundle {
    fn eq(&self, other: &Self) -> bool {
        self.contents_hash == other.contents_hash
    }
}

impl Eq for TxBundle {}

impl TxBundle {
    /// An empty bundle chained to `previous_ledger_hash`.
    pub fn empty(previous_ledger_hash: Hash256) -> Result<Self> {
        TxBundleBuilder::new(previous_ledger_hash).finalize()
    }

    pub fn contents_hash(&self) -> Hash256 {
        self.contents_hash
    }

    pub fn previous_ledger_hash(&self) -> Hash256 {
        self.previous_ledger_hash
    }

    /// Transactions in hash order.
    pub fn transactions(&self) -> &[TransactionFrame] {
        &self.transactions
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    pub fn total_operations(&self) -> usize {
        total_operations(&self.transactions)
    }

    /// The order transactions execute in.
    ///
    /// Each account's transactions run in ascending sequence order. Batch
    /// `i` holds the `i`-th transaction of every account; within a batch
    /// transactions are ordered by `id XOR contents_hash`, so no submitter
    /// can pick a favourable position yet every node derives the same order.
    pub fn apply_order(&self) -> Vec<&TransactionFrame> {
        let mut by_account: BTreeMap<AccountId, Vec<&TransactionFrame>> = BTreeMap::new();
        for tx in &self.transactions {
            by_account.entry(tx.source_account_id()).or_default().push(tx);
        }
        for chain in by_account.values_mut() {
            chain.sort_by_key(|tx| (tx.sequence_number(), tx.full_hash()));
        }

        let depth = by_account.values().map(Vec::len).max().unwrap_or(0);
        let mut ordered = Vec::with_capacity(self.transactions.len());
        for i in 0..depth {
            let mut batch: Vec<&TransactionFrame> = by_account
                .values()
                .filter_map(|chain| chain.get(i).copied())
                .collect();
            batch.sort_by_key(|tx| tx.full_hash() ^ self.contents_hash);
            ordered.extend(batch);
        }
        ordered
    }

    /// Whether every transaction is valid against `ctx` and the bundle fits
    /// the header's size limit.
    pub fn check_valid(&self, ctx: &TxValidationContext<'_>) -> Result<bool> {
        if self.total_operations() > ctx.header.max_tx_set_size as usize {
            debug!(
                hash = %self.contents_hash.short(),
                ops = self.total_operations(),
                max = ctx.header.max_tx_set_size,
                "Transaction set exceeds max size"
            );
            return Ok(false);
        }
        let invalid = find_invalid(&self.transactions, ctx)?;
        if let Some((tx, reason)) = invalid.first() {
            debug!(
                hash = %self.contents_hash.short(),
                tx = %tx.short(),
                %reason,
                invalid = invalid.len(),
                "Transaction set contains invalid transactions"
            );
            return Ok(false);
        }
        Ok(true)
    }

    pub fn to_xdr_set(&self) -> std::result::Result<TransactionSet, stellar_xdr::curr::Error> {
        let txs: Vec<TransactionEnvelope> = self
            .transactions
            .iter()
            .map(|tx| tx.envelope().clone())
            .collect();
        Ok(TransactionSet {
            previous_ledger_hash: self.previous_ledger_hash.into(),
            txs: txs.try_into()?,
        })
    }

    pub fn from_xdr_set(set: TransactionSet) -> Result<Self> {
        let mut builder = TxBundleBuilder::new(set.previous_ledger_hash.into());
        for envelope in set.txs.to_vec() {
            builder.add_transaction(envelope)?;
        }
        builder.finalize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delta::AccountState;
    use crate::header::genesis_header;
    use crate::store::MemoryStore;
    use crate::test_support::{account_of, make_fee_bump, make_tx, make_tx_with_ops, network};

    fn setup(accounts: &[(u8, i64, i64)]) -> MemoryStore {
        let store = MemoryStore::new();
        for (seed, balance, seq) in accounts {
            store.put_account(account_of(*seed), AccountState::new(*balance, *seq));
        }
        store
    }

    fn bundle(prev: Hash256, txs: Vec<TransactionEnvelope>) -> TxBundle {
        let mut b = TxBundleBuilder::new(prev);
        for tx in txs {
            b.add_transaction(tx).unwrap();
        }
        b.finalize().unwrap()
    }

    #[test]
    fn test_hash_is_order_independent() {
        let prev = Hash256::hash(b"prev");
        let a = make_tx(1, 1, 100);
        let b = make_tx(2, 1, 100);
        let x = bundle(prev, vec![a.clone(), b.clone()]);
        let y = bundle(prev, vec![b, a]);
        assert_eq!(x.contents_hash(), y.contents_hash());
    }

    #[test]
    fn test_hash_depends_on_previous_ledger_and_members() {
        let a = make_tx(1, 1, 100);
        let x = bundle(Hash256::hash(b"p1"), vec![a.clone()]);
        let y = bundle(Hash256::hash(b"p2"), vec![a.clone()]);
        let z = bundle(Hash256::hash(b"p1"), vec![a, make_tx(2, 1, 100)]);
        assert_ne!(x.contents_hash(), y.contents_hash());
        assert_ne!(x.contents_hash(), z.contents_hash());
    }

    #[test]
    fn test_builder_hash_tracks_mutation() {
        let mut b = TxBundleBuilder::new(Hash256::ZERO);
        let empty = b.contents_hash().unwrap();
        assert_eq!(b.contents_hash().unwrap(), empty);
        assert!(b.add_transaction(make_tx(1, 1, 100)).unwrap());
        assert_ne!(b.contents_hash().unwrap(), empty);
        assert!(!b.add_transaction(make_tx(1, 1, 100)).unwrap());
        let finalized = b.clone().finalize().unwrap();
        assert_eq!(finalized.contents_hash(), b.contents_hash().unwrap());
    }

    #[test]
    fn test_apply_order_respects_sequence() {
        let txs = vec![
            make_tx(1, 3, 100),
            make_tx(1, 1, 100),
            make_tx(2, 1, 100),
            make_tx(1, 2, 100),
        ];
        let b = bundle(Hash256::ZERO, txs);
        let order = b.apply_order();
        assert_eq!(order.len(), 4);

        let seqs_for_1: Vec<i64> = order
            .iter()
            .filter(|tx| tx.source_account_id() == account_of(1))
            .map(|tx| tx.sequence_number())
            .collect();
        assert_eq!(seqs_for_1, vec![1, 2, 3]);
        // Batch 0 holds both accounts' first transactions.
        assert!(order[..2].iter().all(|tx| tx.sequence_number() == 1));
    }

    #[test]
    fn test_check_valid_and_trim() {
        let store = setup(&[(1, 1_000_000_000, 0), (2, 1_000_000_000, 0)]);
        let header = genesis_header(25);
        let ctx = TxValidationContext {
            header: &header,
            network_id: network(),
            store: &store,
        };

        let good = bundle(Hash256::ZERO, vec![make_tx(1, 1, 100), make_tx(2, 1, 100)]);
        assert!(good.check_valid(&ctx).unwrap());

        // Gap in account 1's chain, and an unknown account 3.
        let mut builder = TxBundleBuilder::from_bundle(&good);
        builder.add_transaction(make_tx(1, 3, 100)).unwrap();
        builder.add_transaction(make_tx(3, 1, 100)).unwrap();
        let bad = builder.clone().finalize().unwrap();
        assert!(!bad.check_valid(&ctx).unwrap());

        let removed = builder.trim_invalid(&ctx).unwrap();
        assert_eq!(removed.len(), 2);
        assert_eq!(builder.finalize().unwrap().contents_hash(), good.contents_hash());
    }

    #[test]
    fn test_trim_cascades_through_sequence_chain() {
        // Enough for one fee above the reserve, not two.
        let reserve = 2 * i64::from(genesis_header(25).base_reserve);
        let store = setup(&[(1, reserve + 150, 0)]);
        let header = genesis_header(25);
        let ctx = TxValidationContext {
            header: &header,
            network_id: network(),
            store: &store,
        };
        let mut b = TxBundleBuilder::new(Hash256::ZERO);
        for seq in 1..=3 {
            b.add_transaction(make_tx(1, seq, 100)).unwrap();
        }
        let removed = b.trim_invalid(&ctx).unwrap();
        assert_eq!(removed.len(), 2);
        assert_eq!(b.len(), 1);
    }

    #[test]
    fn test_fee_bids_summing_past_i64_are_unaffordable() {
        let store = setup(&[(1, 1_000_000_000, 0)]);
        let header = genesis_header(25);
        let ctx = TxValidationContext {
            header: &header,
            network_id: network(),
            store: &store,
        };
        let mut b = TxBundleBuilder::new(Hash256::ZERO);
        b.add_transaction(make_fee_bump(1, 1, 1, 200)).unwrap();
        b.add_transaction(make_fee_bump(1, 1, 2, i64::MAX)).unwrap();
        assert!(!b.clone().finalize().unwrap().check_valid(&ctx).unwrap());

        let removed = b.trim_invalid(&ctx).unwrap();
        assert_eq!(removed.len(), 1);
        assert_eq!(b.len(), 1);
    }

    #[test]
    fn test_bad_signature_rejected() {
        let store = setup(&[(1, 1_000_000_000, 0)]);
        let header = genesis_header(25);
        let ctx = TxValidationContext {
            header: &header,
            network_id: NetworkId::mainnet(),
            store: &store,
        };
        let b = bundle(Hash256::ZERO, vec![make_tx(1, 1, 100)]);
        assert!(!b.check_valid(&ctx).unwrap());
    }

    #[test]
    fn test_low_fee_rejected() {
        let store = setup(&[(1, 1_000_000_000, 0)]);
        let header = genesis_header(25);
        let ctx = TxValidationContext {
            header: &header,
            network_id: network(),
            store: &store,
        };
        let b = bundle(Hash256::ZERO, vec![make_tx(1, 1, 99)]);
        assert!(!b.check_valid(&ctx).unwrap());
    }

    #[test]
    fn test_oversized_bundle_invalid() {
        let store = setup(&[(1, 1_000_000_000, 0)]);
        let mut header = genesis_header(25);
        header.max_tx_set_size = 1;
        let ctx = TxValidationContext {
            header: &header,
            network_id: network(),
            store: &store,
        };
        let b = bundle(Hash256::ZERO, vec![make_tx_with_ops(1, 1, 200, 2)]);
        assert!(!b.check_valid(&ctx).unwrap());
    }

    #[test]
    fn test_surge_pricing_drops_lowest_fee_rate() {
        let mut b = TxBundleBuilder::new(Hash256::ZERO);
        b.add_transaction(make_tx(1, 1, 500)).unwrap();
        b.add_transaction(make_tx(2, 1, 100)).unwrap();
        b.add_transaction(make_tx(3, 1, 300)).unwrap();

        let removed = b.surge_pricing_filter(2);
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].source_account_id(), account_of(2));
        assert_eq!(b.len(), 2);
    }

    #[test]
    fn test_surge_pricing_drops_rest_of_chain() {
        let mut b = TxBundleBuilder::new(Hash256::ZERO);
        b.add_transaction(make_tx_with_ops(1, 1, 1000, 2)).unwrap();
        b.add_transaction(make_tx(1, 2, 5000)).unwrap();
        b.add_transaction(make_tx(2, 1, 600)).unwrap();

        // Account 2's 600/op beats account 1's 500/op head; account 1's
        // two-op head then no longer fits, taking seq 2 with it.
        let removed = b.surge_pricing_filter(2);
        assert_eq!(b.len(), 1);
        assert_eq!(removed.len(), 2);
        assert!(removed.iter().all(|tx| tx.source_account_id() == account_of(1)));
    }

    #[test]
    fn test_surge_pricing_noop_when_small() {
        let mut b = TxBundleBuilder::new(Hash256::ZERO);
        b.add_transaction(make_tx(1, 1, 100)).unwrap();
        assert!(b.surge_pricing_filter(10).is_empty());
        assert_eq!(b.len(), 1);
    }

    #[test]
    fn test_xdr_set_round_trip_preserves_hash() {
        let b = bundle(Hash256::hash(b"p"), vec![make_tx(1, 1, 100), make_tx(2, 1, 100)]);
        let back = TxBundle::from_xdr_set(b.to_xdr_set().unwrap()).unwrap();
        assert_eq!(back.contents_hash(), b.contents_hash());
    }
}
