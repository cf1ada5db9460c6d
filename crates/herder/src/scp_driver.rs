//! The agreement engine's view of ledger values.
//!
//! [`ScpDriver`] implements [`SlotDriver`]: it judges proposed values,
//! strips what cannot be applied, merges confirmed candidates, and turns
//! externalized decisions into [`CloseRequest`]s for the close state
//! machine.
//!
//! # Validation levels
//!
//! How far a value can be checked depends on the node's position:
//!
//! - For the slot right after the last closed ledger, close time, the
//!   referenced transaction set and every upgrade step are checked against
//!   local state and the value can be fully validated.
//! - For other slots only the close time can be checked, against the
//!   tracked consensus decision, and the value is at best maybe-valid.
//!
//! Malformed values are never errors here: they come back as
//! [`ValidationLevel::Invalid`]. Only the consensus-safety class escapes,
//! from [`SlotDriver::combine_candidates`] and
//! [`SlotDriver::value_externalized`].
//!
//! # Transaction sets
//!
//! Bundles are cached by content hash. A decision whose bundle has not
//! arrived yet is parked until [`ScpDriver::receive_tx_set`] delivers it.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, trace, warn};

use sluice_common::time::current_timestamp;
use sluice_common::{Hash256, SafetyViolation};
use sluice_crypto::{PublicKey, SecretKey, Signature};
use sluice_ledger::upgrades::encode_upgrade;
use sluice_ledger::{
    CloseRequest, LedgerManager, TransactionFrame, TxBundle, TxBundleBuilder, TxValidationContext,
};
use sluice_scp::{SlotDriver, SlotIndex, TimerCallback, TimerId, ValidationLevel};
use stellar_xdr::curr::{
    AccountId, EnvelopeType, LedgerHeader, LedgerUpgrade, Limits, ReadXdr, ScpEnvelope,
    ScpStatement, StellarValue, StellarValueExt, TimePoint, TransactionEnvelope, TransactionSet,
    Value, WriteXdr,
};

use crate::error::HerderError;
use crate::timers::SlotTimers;
use crate::tracking::{ConsensusData, TrackingCursor};
use crate::upgrades::{
    check_upgrade_ordering, merge_candidate_upgrades, retain_valid_upgrades, validate_upgrades,
};
use crate::Result;

/// Configuration for the SCP driver.
#[derive(Debug, Clone)]
pub struct ScpDriverConfig {
    /// How far past wall-clock time a close time may lie.
    pub max_time_slip_seconds: u64,
    /// Maximum transaction sets to cache.
    pub max_tx_set_cache: usize,
    /// First-round nomination timeout; round `n` waits `n` times this.
    pub nomination_timeout_base: Duration,
    /// First-round ballot timeout; round `n` waits `n` times this.
    pub ballot_timeout_base: Duration,
    /// Cap on any computed timeout.
    pub max_timeout: Duration,
}

impl Default for ScpDriverConfig {
    fn default() -> Self {
        Self {
            max_time_slip_seconds: 60,
            max_tx_set_cache: 100,
            nomination_timeout_base: Duration::from_secs(1),
            ballot_timeout_base: Duration::from_secs(1),
            max_timeout: Duration::from_secs(30 * 60),
        }
    }
}

/// Source of the current Unix time in seconds.
pub type Clock = Arc<dyn Fn() -> u64 + Send + Sync>;

/// Callback type for broadcasting SCP envelopes to peers.
type EnvelopeSender = Box<dyn Fn(ScpEnvelope) + Send + Sync>;

/// Callback receiving transactions trimmed from a winning candidate, so
/// they can go back to the local pending pool.
type TxReannouncer = Box<dyn Fn(Vec<TransactionEnvelope>) + Send + Sync>;

#[derive(Debug, Clone)]
struct CachedBundle {
    bundle: Arc<TxBundle>,
    inserted: u64,
}

/// Decodes an engine value into the ledger value it carries.
pub fn decode_value(value: &Value) -> Option<StellarValue> {
    StellarValue::from_xdr(value.0.as_slice(), Limits::none()).ok()
}

pub fn encode_value(value: &StellarValue) -> std::result::Result<Value, stellar_xdr::curr::Error> {
    Ok(Value(value.to_xdr(Limits::none())?.try_into()?))
}

/// Whether bundle `a` beats bundle `b` as the combined candidate.
///
/// More transactions win. Equal sizes compare each contents hash XORed
/// with `candidates_hash`, lower wins, which no node can bias by the order
/// it saw candidates in.
fn beats(a: &TxBundle, b: &TxBundle, candidates_hash: Hash256) -> bool {
    match a.len().cmp(&b.len()) {
        std::cmp::Ordering::Greater => true,
        std::cmp::Ordering::Less => false,
        std::cmp::Ordering::Equal => {
            (a.contents_hash() ^ candidates_hash) < (b.contents_hash() ^ candidates_hash)
        }
    }
}

/// SCP driver that integrates consensus with the ledger close.
pub struct ScpDriver {
    config: ScpDriverConfig,
    manager: Arc<LedgerManager>,
    /// Secret key for signing (None if not a validator).
    secret_key: Option<SecretKey>,
    clock: Clock,
    tx_set_cache: DashMap<Hash256, CachedBundle>,
    cache_counter: AtomicU64,
    /// Decisions waiting for their transaction set, by slot.
    pending_externalized: Mutex<BTreeMap<SlotIndex, StellarValue>>,
    close_requests: Mutex<VecDeque<CloseRequest>>,
    tracking: TrackingCursor,
    timers: SlotTimers,
    envelope_sender: RwLock<Option<EnvelopeSender>>,
    tx_reannouncer: RwLock<Option<TxReannouncer>>,
}

impl ScpDriver {
    pub fn new(config: ScpDriverConfig, manager: Arc<LedgerManager>) -> Self {
        Self {
            config,
            manager,
            secret_key: None,
            clock: Arc::new(current_timestamp),
            tx_set_cache: DashMap::new(),
            cache_counter: AtomicU64::new(0),
            pending_externalized: Mutex::new(BTreeMap::new()),
            close_requests: Mutex::new(VecDeque::new()),
            tracking: TrackingCursor::default(),
            timers: SlotTimers::new(),
            envelope_sender: RwLock::new(None),
            tx_reannouncer: RwLock::new(None),
        }
    }

    /// Enables envelope signing with `secret_key`.
    pub fn with_secret_key(mut self, secret_key: SecretKey) -> Self {
        self.secret_key = Some(secret_key);
        self
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Set the envelope broadcast callback.
    pub fn set_envelope_sender<F>(&self, sender: F)
    where
        F: Fn(ScpEnvelope) + Send + Sync + 'static,
    {
        *self.envelope_sender.write() = Some(Box::new(sender));
    }

    pub fn set_tx_reannouncer<F>(&self, reannouncer: F)
    where
        F: Fn(Vec<TransactionEnvelope>) + Send + Sync + 'static,
    {
        *self.tx_reannouncer.write() = Some(Box::new(reannouncer));
    }

    pub fn config(&self) -> &ScpDriverConfig {
        &self.config
    }

    pub fn manager(&self) -> &Arc<LedgerManager> {
        &self.manager
    }

    pub fn timers(&self) -> &SlotTimers {
        &self.timers
    }

    /// The decision currently being tracked, if in sync with consensus.
    pub fn tracking(&self) -> Option<ConsensusData> {
        self.tracking.current()
    }

    /// The decision tracked before the node last lost sync.
    pub fn last_tracking(&self) -> Option<ConsensusData> {
        self.tracking.last()
    }

    /// Marks the node as no longer following consensus.
    pub fn lose_tracking(&self) {
        self.tracking.lose();
    }

    /// True only when the node is synced with the network and `slot_index`
    /// is the ledger right after its last closed ledger.
    pub fn is_slot_compatible(&self, slot_index: SlotIndex) -> bool {
        self.manager.is_initialized()
            && self.manager.is_synced()
            && slot_index == u64::from(self.manager.last_closed_ledger_seq()) + 1
    }

    /// Whether `close_time` lies after `last_close_time` and within the
    /// allowed slip past wall-clock time.
    pub fn check_close_time(&self, last_close_time: u64, close_time: u64) -> bool {
        if close_time <= last_close_time {
            trace!(close_time, last_close_time, "Close time not after last close time");
            return false;
        }
        let now = (self.clock)();
        if close_time > now.saturating_add(self.config.max_time_slip_seconds) {
            trace!(
                close_time,
                now,
                max_slip = self.config.max_time_slip_seconds,
                "Close time too far in future"
            );
            return false;
        }
        true
    }

    fn validation_context<'a>(&'a self, header: &'a LedgerHeader) -> TxValidationContext<'a> {
        TxValidationContext {
            header,
            network_id: *self.manager.network_id(),
            store: self.manager.store().as_ref(),
        }
    }

    /// Validation past decoding and ordering. `check_upgrades` is off when
    /// extracting, since invalid steps are stripped there instead.
    fn validate_decoded(
        &self,
        slot_index: SlotIndex,
        value: &StellarValue,
        check_upgrades: bool,
    ) -> ValidationLevel {
        let lcl = if self.is_slot_compatible(slot_index) {
            self.manager
                .last_closed_ledger_header()
                .zip(self.manager.last_closed_ledger_hash())
        } else {
            None
        };

        let baseline = match (&lcl, self.tracking.current()) {
            (Some((header, _)), _) => header.scp_value.close_time.0,
            (None, None) => {
                trace!(slot = slot_index, "MaybeValidValue (not tracking)");
                return ValidationLevel::MaybeValid;
            }
            (None, Some(tracked)) if slot_index < tracked.next_slot() => {
                trace!(
                    slot = slot_index,
                    tracking = tracked.next_slot(),
                    "MaybeValidValue (already moved on)"
                );
                return ValidationLevel::MaybeValid;
            }
            (None, Some(tracked)) if slot_index > tracked.next_slot() => {
                debug!(
                    slot = slot_index,
                    tracking = tracked.next_slot(),
                    "Value for a future slot while tracking"
                );
                return ValidationLevel::Invalid;
            }
            (None, Some(tracked)) => tracked.close_time(),
        };

        if !self.check_close_time(baseline, value.close_time.0) {
            debug!(
                slot = slot_index,
                close_time = value.close_time.0,
                baseline,
                "Rejecting value with bad close time"
            );
            return ValidationLevel::Invalid;
        }

        let Some((header, lcl_hash)) = lcl else {
            trace!(slot = slot_index, "Can't validate locally, value may be valid");
            return ValidationLevel::MaybeValid;
        };

        let tx_set_hash = Hash256::from(&value.tx_set_hash);
        let Some(bundle) = self.find_bundle(&tx_set_hash) else {
            debug!(slot = slot_index, tx_set = %tx_set_hash.short(), "Transaction set not known");
            return ValidationLevel::Invalid;
        };
        if bundle.previous_ledger_hash() != lcl_hash {
            debug!(
                slot = slot_index,
                expected = %lcl_hash.short(),
                actual = %bundle.previous_ledger_hash().short(),
                "Transaction set does not chain from last closed ledger"
            );
            return ValidationLevel::Invalid;
        }
        match bundle.check_valid(&self.validation_context(&header)) {
            Ok(true) => {}
            Ok(false) => {
                debug!(slot = slot_index, tx_set = %tx_set_hash.short(), "Transaction set invalid");
                return ValidationLevel::Invalid;
            }
            Err(err) => {
                warn!(slot = slot_index, %err, "Could not check transaction set");
                return ValidationLevel::Invalid;
            }
        }

        if check_upgrades {
            if let Err(rejection) = validate_upgrades(&header, value.upgrades.as_slice()) {
                debug!(slot = slot_index, %rejection, "Rejecting value with invalid upgrade");
                return ValidationLevel::Invalid;
            }
        }

        ValidationLevel::FullyValidated
    }

    /// Caches a bundle under its contents hash and returns the shared handle.
    ///
    /// A bundle already cached is not replaced. When the cache is full the
    /// oldest entry not needed by a parked decision is evicted.
    pub fn cache_tx_set(&self, bundle: TxBundle) -> Arc<TxBundle> {
        let hash = bundle.contents_hash();
        if let Some(existing) = self.tx_set_cache.get(&hash) {
            return Arc::clone(&existing.bundle);
        }

        let parked: HashSet<Hash256> = self
            .pending_externalized
            .lock()
            .values()
            .map(|v| Hash256::from(&v.tx_set_hash))
            .collect();
        while self.tx_set_cache.len() >= self.config.max_tx_set_cache {
            let oldest = self
                .tx_set_cache
                .iter()
                .filter(|e| !parked.contains(e.key()))
                .min_by_key(|e| e.value().inserted)
                .map(|e| *e.key());
            match oldest {
                Some(evict) => {
                    trace!(tx_set = %evict.short(), "Evicting cached transaction set");
                    self.tx_set_cache.remove(&evict);
                }
                None => break,
            }
        }

        let bundle = Arc::new(bundle);
        self.tx_set_cache.insert(
            hash,
            CachedBundle {
                bundle: Arc::clone(&bundle),
                inserted: self.cache_counter.fetch_add(1, Ordering::Relaxed),
            },
        );
        bundle
    }

    /// Looks a bundle up in the cache, then in storage.
    pub fn find_bundle(&self, hash: &Hash256) -> Option<Arc<TxBundle>> {
        if let Some(entry) = self.tx_set_cache.get(hash) {
            return Some(Arc::clone(&entry.bundle));
        }
        match self.manager.store().load_tx_bundle(hash) {
            Ok(Some(bundle)) => Some(self.cache_tx_set(bundle)),
            Ok(None) => None,
            Err(err) => {
                warn!(tx_set = %hash.short(), %err, "Failed to load transaction set");
                None
            }
        }
    }

    pub fn has_tx_set(&self, hash: &Hash256) -> bool {
        self.tx_set_cache.contains_key(hash)
    }

    pub fn tx_set_cache_len(&self) -> usize {
        self.tx_set_cache.len()
    }

    /// Hashes of transaction sets that parked decisions are waiting for.
    pub fn wanted_tx_sets(&self) -> Vec<Hash256> {
        let mut wanted: Vec<Hash256> = self
            .pending_externalized
            .lock()
            .values()
            .map(|v| Hash256::from(&v.tx_set_hash))
            .collect();
        wanted.sort();
        wanted.dedup();
        wanted
    }

    pub fn pending_externalized_slots(&self) -> Vec<SlotIndex> {
        self.pending_externalized.lock().keys().copied().collect()
    }

    /// Drops parked decisions for slots the last closed ledger has already
    /// passed, unpinning their cached sets. Returns how many were dropped.
    pub fn purge_closed_decisions(&self) -> usize {
        let lcl_seq = u64::from(self.manager.last_closed_ledger_seq());
        let mut pending = self.pending_externalized.lock();
        let before = pending.len();
        *pending = pending.split_off(&(lcl_seq + 1));
        let dropped = before - pending.len();
        if dropped > 0 {
            debug!(lcl_seq, dropped, "Dropped parked decisions for closed slots");
        }
        dropped
    }

    /// Accepts a transaction set received from the network under
    /// `expected`, releasing any decision parked on it.
    ///
    /// Returns how many close requests were released.
    pub fn receive_tx_set(&self, expected: Hash256, set: TransactionSet) -> Result<usize> {
        let bundle = TxBundle::from_xdr_set(set)?;
        let actual = bundle.contents_hash();
        if actual != expected {
            return Err(HerderError::TxSetHashMismatch { expected, actual });
        }
        Ok(self.receive_tx_bundle(bundle)?)
    }

    /// Caches a locally known bundle and releases decisions parked on it.
    pub fn receive_tx_bundle(&self, bundle: TxBundle) -> std::result::Result<usize, SafetyViolation> {
        let bundle = self.cache_tx_set(bundle);
        let hash = bundle.contents_hash();
        let lcl_seq = u64::from(self.manager.last_closed_ledger_seq());

        let released: Vec<(SlotIndex, StellarValue)> = {
            let mut pending = self.pending_externalized.lock();
            let slots: Vec<SlotIndex> = pending
                .iter()
                .filter(|(_, v)| Hash256::from(&v.tx_set_hash) == hash)
                .map(|(slot, _)| *slot)
                .collect();
            slots
                .into_iter()
                .filter_map(|slot| pending.remove(&slot).map(|v| (slot, v)))
                .collect()
        };

        let mut count = 0;
        for (slot, value) in released {
            if slot <= lcl_seq {
                debug!(slot, lcl_seq, "Dropping parked decision already closed");
                continue;
            }
            info!(slot, tx_set = %hash.short(), "Transaction set arrived for parked decision");
            let ledger_seq = u32::try_from(slot)
                .map_err(|_| SafetyViolation::UndecodableExternalize { slot })?;
            self.queue_close(ledger_seq, Arc::clone(&bundle), value)?;
            count += 1;
        }
        Ok(count)
    }

    fn queue_close(
        &self,
        ledger_seq: u32,
        bundle: Arc<TxBundle>,
        value: StellarValue,
    ) -> std::result::Result<(), SafetyViolation> {
        let expected = Hash256::from(&value.tx_set_hash);
        let actual = bundle.contents_hash();
        let request = CloseRequest::new(ledger_seq, bundle, value).map_err(|err| {
            error!(ledger_seq, %err, "Externalized value does not match its transaction set");
            SafetyViolation::CorruptTxSet {
                ledger_seq,
                expected,
                actual,
            }
        })?;
        self.close_requests.lock().push_back(request);
        Ok(())
    }

    /// Drains the close requests produced by externalized decisions, in
    /// the order they became ready.
    pub fn take_close_requests(&self) -> Vec<CloseRequest> {
        self.close_requests.lock().drain(..).collect()
    }

    fn reannounce(&self, removed: Vec<TransactionFrame>) {
        let envelopes: Vec<TransactionEnvelope> =
            removed.into_iter().map(|f| f.envelope().clone()).collect();
        match self.tx_reannouncer.read().as_ref() {
            Some(reannounce) => reannounce(envelopes),
            None => debug!(count = envelopes.len(), "No reannouncer set for trimmed transactions"),
        }
    }

    /// Copies the winning bundle, trims what is invalid against `header`,
    /// and applies the size limit.
    fn rebuild_winner(
        &self,
        winner: &TxBundle,
        header: &LedgerHeader,
    ) -> sluice_ledger::Result<Arc<TxBundle>> {
        let mut builder = TxBundleBuilder::from_bundle(winner);
        let mut removed = builder.trim_invalid(&self.validation_context(header))?;
        removed.extend(builder.surge_pricing_filter(header.max_tx_set_size));
        if !removed.is_empty() {
            warn!(
                count = removed.len(),
                tx_set = %winner.contents_hash().short(),
                "Trimmed transactions from winning candidate"
            );
            self.reannounce(removed);
        }
        Ok(self.cache_tx_set(builder.finalize()?))
    }

    fn compose_value(
        bundle: &TxBundle,
        close_time: u64,
        upgrades: &[LedgerUpgrade],
    ) -> std::result::Result<Value, stellar_xdr::curr::Error> {
        let upgrades = upgrades
            .iter()
            .map(encode_upgrade)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        encode_value(&StellarValue {
            tx_set_hash: bundle.contents_hash().into(),
            close_time: TimePoint(close_time),
            upgrades: upgrades.try_into()?,
            ext: StellarValueExt::Basic,
        })
    }

    /// The payload an SCP envelope signature covers.
    fn envelope_payload(
        &self,
        statement: &ScpStatement,
    ) -> std::result::Result<Vec<u8>, stellar_xdr::curr::Error> {
        let mut data = self.manager.network_id().as_bytes().to_vec();
        data.extend_from_slice(&(EnvelopeType::Scp as i32).to_be_bytes());
        data.extend_from_slice(&statement.to_xdr(Limits::none())?);
        Ok(data)
    }

    /// Checks an envelope's signature against its statement's node.
    pub fn verify_envelope(&self, envelope: &ScpEnvelope) -> bool {
        let node = AccountId(envelope.statement.node_id.0.clone());
        let Ok(public_key) = PublicKey::try_from(&node) else {
            return false;
        };
        let Ok(signature) = Signature::try_from(&envelope.signature) else {
            return false;
        };
        match self.envelope_payload(&envelope.statement) {
            Ok(data) => public_key.verify(&data, &signature).is_ok(),
            Err(_) => false,
        }
    }
}

impl SlotDriver for ScpDriver {
    fn validate_value(
        &self,
        slot_index: SlotIndex,
        value: &Value,
        nomination: bool,
    ) -> ValidationLevel {
        let Some(stellar_value) = decode_value(value) else {
            debug!(slot = slot_index, "Failed to decode StellarValue");
            return ValidationLevel::Invalid;
        };
        if let Err(rejection) = check_upgrade_ordering(stellar_value.upgrades.as_slice()) {
            debug!(slot = slot_index, %rejection, "Invalid ledger upgrade encountered");
            return ValidationLevel::Invalid;
        }
        let level = self.validate_decoded(slot_index, &stellar_value, true);
        trace!(slot = slot_index, nomination, ?level, "Validated value");
        level
    }

    fn extract_valid_value(&self, slot_index: SlotIndex, value: &Value) -> Option<Value> {
        let mut stellar_value = decode_value(value)?;
        if self.validate_decoded(slot_index, &stellar_value, false)
            != ValidationLevel::FullyValidated
        {
            return None;
        }
        let header = self.manager.last_closed_ledger_header()?;
        let kept = retain_valid_upgrades(&header, stellar_value.upgrades.as_slice());
        if kept.len() != stellar_value.upgrades.len() {
            debug!(
                slot = slot_index,
                stripped = stellar_value.upgrades.len() - kept.len(),
                "Stripped invalid upgrades from value"
            );
        }
        stellar_value.upgrades = kept.try_into().ok()?;
        encode_value(&stellar_value).ok()
    }

    fn combine_candidates(
        &self,
        slot_index: SlotIndex,
        candidates: &[Value],
    ) -> std::result::Result<Option<Value>, SafetyViolation> {
        let decoded: Vec<StellarValue> = candidates.iter().filter_map(decode_value).collect();
        if decoded.is_empty() {
            debug!(slot = slot_index, "No decodable candidates to combine");
            return Ok(None);
        }
        let (Some(header), Some(lcl_hash)) = (
            self.manager.last_closed_ledger_header(),
            self.manager.last_closed_ledger_hash(),
        ) else {
            warn!(slot = slot_index, "Cannot combine candidates without a last closed ledger");
            return Ok(None);
        };

        let close_time = decoded.iter().map(|v| v.close_time.0).max().unwrap_or_default();
        let upgrades = merge_candidate_upgrades(decoded.iter().map(|v| v.upgrades.as_slice()))
            .map_err(|violation| {
                error!(slot = slot_index, %violation, "Cannot merge candidate upgrades");
                violation
            })?;
        let candidates_hash = decoded
            .iter()
            .fold(Hash256::ZERO, |acc, v| acc ^ Hash256::from(&v.tx_set_hash));

        let mut seen = HashSet::new();
        let mut best: Option<Arc<TxBundle>> = None;
        for value in &decoded {
            let hash = Hash256::from(&value.tx_set_hash);
            if !seen.insert(hash) {
                continue;
            }
            let Some(bundle) = self.find_bundle(&hash) else {
                debug!(slot = slot_index, tx_set = %hash.short(), "Candidate transaction set not known");
                continue;
            };
            if bundle.previous_ledger_hash() != lcl_hash {
                debug!(slot = slot_index, tx_set = %hash.short(), "Candidate does not chain from LCL");
                continue;
            }
            best = match best {
                Some(current) if !beats(&bundle, &current, candidates_hash) => Some(current),
                _ => Some(bundle),
            };
        }

        let winner = match best {
            Some(bundle) => bundle,
            None => {
                warn!(slot = slot_index, "No candidate chains from LCL, combining an empty set");
                match TxBundle::empty(lcl_hash) {
                    Ok(empty) => Arc::new(empty),
                    Err(err) => {
                        warn!(slot = slot_index, %err, "Failed to build empty transaction set");
                        return Ok(None);
                    }
                }
            }
        };

        let bundle = match self.rebuild_winner(&winner, &header) {
            Ok(bundle) => bundle,
            Err(err) => {
                warn!(slot = slot_index, %err, "Failed to re-validate winning transaction set");
                return Ok(None);
            }
        };

        match Self::compose_value(&bundle, close_time, &upgrades) {
            Ok(value) => {
                debug!(
                    slot = slot_index,
                    candidates = decoded.len(),
                    tx_set = %bundle.contents_hash().short(),
                    txs = bundle.len(),
                    close_time,
                    "Combined candidates"
                );
                Ok(Some(value))
            }
            Err(err) => {
                warn!(slot = slot_index, %err, "Failed to encode combined value");
                Ok(None)
            }
        }
    }

    fn value_externalized(
        &self,
        slot_index: SlotIndex,
        value: &Value,
    ) -> std::result::Result<(), SafetyViolation> {
        self.timers.purge_up_to(slot_index);
        self.purge_closed_decisions();

        let lcl_seq = u64::from(self.manager.last_closed_ledger_seq());
        if slot_index <= lcl_seq {
            debug!(slot = slot_index, lcl_seq, "Ignoring externalize for a closed slot");
            return Ok(());
        }

        let Some(stellar_value) = decode_value(value) else {
            error!(slot = slot_index, "Externalized value does not decode");
            return Err(SafetyViolation::UndecodableExternalize { slot: slot_index });
        };
        let Ok(ledger_seq) = u32::try_from(slot_index) else {
            error!(slot = slot_index, "Externalized slot is not a ledger sequence");
            return Err(SafetyViolation::UndecodableExternalize { slot: slot_index });
        };

        self.tracking.advance(ConsensusData {
            slot_index,
            value: stellar_value.clone(),
        });

        let tx_set_hash = Hash256::from(&stellar_value.tx_set_hash);
        match self.find_bundle(&tx_set_hash) {
            Some(bundle) => {
                info!(
                    slot = slot_index,
                    tx_set = %tx_set_hash.short(),
                    txs = bundle.len(),
                    "Value externalized"
                );
                self.queue_close(ledger_seq, bundle, stellar_value)
            }
            None => {
                warn!(
                    slot = slot_index,
                    tx_set = %tx_set_hash.short(),
                    "Externalized before its transaction set arrived"
                );
                self.pending_externalized
                    .lock()
                    .insert(slot_index, stellar_value);
                Ok(())
            }
        }
    }

    fn setup_timer(
        &self,
        slot_index: SlotIndex,
        timer_id: TimerId,
        timeout: Duration,
        callback: TimerCallback,
    ) {
        let lcl_seq = u64::from(self.manager.last_closed_ledger_seq());
        if slot_index <= lcl_seq {
            debug!(slot = slot_index, timer = %timer_id, lcl_seq, "Not arming timer for a closed slot");
            self.timers.stop(slot_index, timer_id);
            return;
        }
        self.timers.purge_up_to(lcl_seq);
        self.purge_closed_decisions();
        self.timers
            .setup(slot_index, timer_id, Instant::now() + timeout, callback);
    }

    fn stop_timer(&self, slot_index: SlotIndex, timer_id: TimerId) {
        self.timers.stop(slot_index, timer_id);
    }

    fn compute_timeout(&self, round: u32, is_nomination: bool) -> Duration {
        let base = if is_nomination {
            self.config.nomination_timeout_base
        } else {
            self.config.ballot_timeout_base
        };
        base.saturating_mul(round.max(1)).min(self.config.max_timeout)
    }

    fn has_upgrades(&self, value: &Value) -> bool {
        decode_value(value).is_some_and(|v| !v.upgrades.is_empty())
    }

    fn strip_all_upgrades(&self, value: &Value) -> Option<Value> {
        let mut stellar_value = decode_value(value)?;
        stellar_value.upgrades = Default::default();
        encode_value(&stellar_value).ok()
    }

    fn sign_envelope(&self, envelope: &mut ScpEnvelope) {
        let Some(secret_key) = self.secret_key.as_ref() else {
            trace!("Not a validator, leaving envelope unsigned");
            return;
        };
        let signature = match self.envelope_payload(&envelope.statement) {
            Ok(data) => secret_key.sign(&data),
            Err(err) => {
                warn!(%err, "Failed to encode SCP statement for signing");
                return;
            }
        };
        match stellar_xdr::curr::Signature::try_from(signature) {
            Ok(signature) => envelope.signature = signature,
            Err(err) => warn!(%err, "Failed to attach envelope signature"),
        }
    }

    fn emit_envelope(&self, envelope: &ScpEnvelope) {
        match self.envelope_sender.read().as_ref() {
            Some(send) => send(envelope.clone()),
            None => trace!(slot = envelope.statement.slot_index, "No envelope sender set"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sluice_common::CURRENT_LEDGER_PROTOCOL_VERSION;
    use sluice_ledger::test_support::{make_value, network, secret_of};
    use sluice_ledger::{LedgerManagerConfig, MemoryStore};
    use stellar_xdr::curr::{
        Hash, NodeId, ScpNomination, ScpStatementPledges, Signature as XdrSignature, UpgradeType,
    };

    fn make_driver() -> ScpDriver {
        let manager = Arc::new(LedgerManager::new(
            LedgerManagerConfig::new(network()),
            Arc::new(MemoryStore::new()),
        ));
        manager
            .initialize_genesis(CURRENT_LEDGER_PROTOCOL_VERSION)
            .unwrap();
        manager.set_synced(true);
        ScpDriver::new(ScpDriverConfig::default(), manager).with_clock(Arc::new(|| 1_000))
    }

    fn make_envelope(secret: &SecretKey) -> ScpEnvelope {
        ScpEnvelope {
            statement: ScpStatement {
                node_id: NodeId(secret.public_key().to_account_id().0),
                slot_index: 2,
                pledges: ScpStatementPledges::Nominate(ScpNomination {
                    quorum_set_hash: Hash([3; 32]),
                    votes: Default::default(),
                    accepted: Default::default(),
                }),
            },
            signature: XdrSignature::default(),
        }
    }

    fn value_with_upgrades(upgrades: Vec<UpgradeType>) -> Value {
        encode_value(&make_value(Hash256::hash(b"set"), 10, upgrades)).unwrap()
    }

    #[test]
    fn test_sign_and_verify_envelope() {
        let secret = secret_of(4);
        let driver = make_driver().with_secret_key(secret.clone());
        let mut envelope = make_envelope(&secret);
        assert!(!driver.verify_envelope(&envelope));

        driver.sign_envelope(&mut envelope);
        assert!(driver.verify_envelope(&envelope));

        envelope.statement.slot_index = 3;
        assert!(!driver.verify_envelope(&envelope));
    }

    #[test]
    fn test_emit_envelope_uses_sender() {
        let driver = make_driver();
        let sent = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&sent);
        driver.set_envelope_sender(move |env| sink.lock().push(env.statement.slot_index));
        driver.emit_envelope(&make_envelope(&secret_of(4)));
        assert_eq!(*sent.lock(), vec![2]);
    }

    #[test]
    fn test_compute_timeout_is_linear_and_capped() {
        let driver = make_driver();
        assert_eq!(driver.compute_timeout(0, true), Duration::from_secs(1));
        assert_eq!(driver.compute_timeout(1, true), Duration::from_secs(1));
        assert_eq!(driver.compute_timeout(5, false), Duration::from_secs(5));
        assert_eq!(driver.compute_timeout(u32::MAX, true), Duration::from_secs(1800));
    }

    #[test]
    fn test_has_and_strip_upgrades() {
        let driver = make_driver();
        let with = value_with_upgrades(vec![encode_upgrade(&LedgerUpgrade::BaseFee(200)).unwrap()]);
        assert!(driver.has_upgrades(&with));

        let stripped = driver.strip_all_upgrades(&with).unwrap();
        assert!(!driver.has_upgrades(&stripped));
        assert_eq!(decode_value(&stripped).unwrap().close_time.0, 10);

        let garbage = Value(vec![1, 2, 3].try_into().unwrap());
        assert!(!driver.has_upgrades(&garbage));
        assert!(driver.strip_all_upgrades(&garbage).is_none());
    }

    #[test]
    fn test_cache_evicts_oldest() {
        let manager = Arc::new(LedgerManager::new(
            LedgerManagerConfig::new(network()),
            Arc::new(MemoryStore::new()),
        ));
        let config = ScpDriverConfig {
            max_tx_set_cache: 2,
            ..ScpDriverConfig::default()
        };
        let driver = ScpDriver::new(config, manager);

        let sets: Vec<TxBundle> = (0..3u8)
            .map(|i| TxBundle::empty(Hash256([i; 32])).unwrap())
            .collect();
        let hashes: Vec<Hash256> = sets.iter().map(|s| s.contents_hash()).collect();
        for set in sets {
            driver.cache_tx_set(set);
        }
        assert_eq!(driver.tx_set_cache_len(), 2);
        assert!(!driver.has_tx_set(&hashes[0]));
        assert!(driver.has_tx_set(&hashes[1]));
        assert!(driver.has_tx_set(&hashes[2]));
    }

    #[test]
    fn test_cache_keeps_sets_needed_by_parked_decisions() {
        let manager = Arc::new(LedgerManager::new(
            LedgerManagerConfig::new(network()),
            Arc::new(MemoryStore::new()),
        ));
        let config = ScpDriverConfig {
            max_tx_set_cache: 1,
            ..ScpDriverConfig::default()
        };
        let driver = ScpDriver::new(config, manager);

        let first = TxBundle::empty(Hash256([1; 32])).unwrap();
        let first_hash = first.contents_hash();
        driver
            .pending_externalized
            .lock()
            .insert(5, make_value(first_hash, 10, vec![]));
        driver.cache_tx_set(first);
        driver.cache_tx_set(TxBundle::empty(Hash256([2; 32])).unwrap());
        assert!(driver.has_tx_set(&first_hash));
        assert_eq!(driver.wanted_tx_sets(), vec![first_hash]);
    }

    #[test]
    fn test_stale_timer_is_not_armed() {
        let driver = make_driver();
        let lcl = u64::from(driver.manager().last_closed_ledger_seq());
        driver.setup_timer(lcl, TimerId::Nomination, Duration::from_secs(1), Box::new(|| {}));
        assert!(driver.timers().is_empty());

        driver.setup_timer(lcl + 1, TimerId::Ballot, Duration::from_secs(1), Box::new(|| {}));
        assert!(driver.timers().is_armed(lcl + 1, TimerId::Ballot));
        driver.stop_timer(lcl + 1, TimerId::Ballot);
        assert!(driver.timers().is_empty());
    }

    #[test]
    fn test_closed_slots_unpin_parked_tx_sets() {
        let manager = Arc::new(LedgerManager::new(
            LedgerManagerConfig::new(network()),
            Arc::new(MemoryStore::new()),
        ));
        manager
            .initialize_genesis(CURRENT_LEDGER_PROTOCOL_VERSION)
            .unwrap();
        let config = ScpDriverConfig {
            max_tx_set_cache: 1,
            ..ScpDriverConfig::default()
        };
        let driver = ScpDriver::new(config, Arc::clone(&manager));

        let parked = TxBundle::empty(Hash256([1; 32])).unwrap();
        let parked_hash = parked.contents_hash();
        driver
            .pending_externalized
            .lock()
            .insert(5, make_value(parked_hash, 10, vec![]));
        driver.cache_tx_set(parked);
        driver.cache_tx_set(TxBundle::empty(Hash256([2; 32])).unwrap());
        assert_eq!(driver.tx_set_cache_len(), 2);

        // Catchup carries the node past slot 5 without its set arriving.
        let mut boundary = manager.last_closed_ledger_header().unwrap();
        boundary.ledger_seq = 10;
        manager.adopt_catchup_boundary(boundary).unwrap();
        driver.setup_timer(11, TimerId::Nomination, Duration::from_secs(1), Box::new(|| {}));
        assert!(driver.pending_externalized_slots().is_empty());
        assert!(driver.wanted_tx_sets().is_empty());

        driver.cache_tx_set(TxBundle::empty(Hash256([3; 32])).unwrap());
        assert_eq!(driver.tx_set_cache_len(), 1);
        assert!(!driver.has_tx_set(&parked_hash));
    }

    #[test]
    fn test_slot_compatibility() {
        let driver = make_driver();
        let lcl = u64::from(driver.manager().last_closed_ledger_seq());
        assert!(driver.is_slot_compatible(lcl + 1));
        assert!(!driver.is_slot_compatible(lcl));
        assert!(!driver.is_slot_compatible(lcl + 2));

        driver.manager().set_synced(false);
        assert!(!driver.is_slot_compatible(lcl + 1));
    }
}
