//! Read-only view over a transaction envelope.

use std::sync::Arc;

use sluice_common::Hash256;
use stellar_xdr::curr::{
    AccountId, FeeBumpTransactionInnerTx, MuxedAccount, PublicKey, TransactionEnvelope,
};

use crate::Result;

/// A transaction envelope plus its identity hash.
///
/// The identity is SHA-256 of the envelope XDR, signatures included, so two
/// differently signed copies of one transaction are distinct records.
#[derive(Debug, Clone)]
pub struct TransactionFrame {
    envelope: Arc<TransactionEnvelope>,
    full_hash: Hash256,
}

impl PartialEq for TransactionFrame {
    fn eq(&self, other: &Self) -> bool {
        self.full_hash == other.full_hash
    }
}

impl Eq for TransactionFrame {}

pub fn muxed_to_account_id(muxed: &MuxedAccount) -> AccountId {
    match muxed {
        MuxedAccount::Ed25519(key) => AccountId(PublicKey::PublicKeyTypeEd25519(key.clone())),
        MuxedAccount::MuxedEd25519(m) => {
            AccountId(PublicKey::PublicKeyTypeEd25519(m.ed25519.clone()))
        }
    }
}

impl TransactionFrame {
    pub fn new(envelope: TransactionEnvelope) -> Result<Self> {
        let full_hash = Hash256::hash_xdr(&envelope)?;
        Ok(Self {
            envelope: Arc::new(envelope),
            full_hash,
        })
    }

    pub fn envelope(&self) -> &TransactionEnvelope {
        &self.envelope
    }

    pub fn full_hash(&self) -> Hash256 {
        self.full_hash
    }

    /// The account whose sequence number this transaction consumes.
    pub fn source_account_id(&self) -> AccountId {
        match self.envelope.as_ref() {
            TransactionEnvelope::TxV0(env) => AccountId(PublicKey::PublicKeyTypeEd25519(
                env.tx.source_account_ed25519.clone(),
            )),
            TransactionEnvelope::Tx(env) => muxed_to_account_id(&env.tx.source_account),
            TransactionEnvelope::TxFeeBump(env) => match &env.tx.inner_tx {
                FeeBumpTransactionInnerTx::Tx(inner) => {
                    muxed_to_account_id(&inner.tx.source_account)
                }
            },
        }
    }

    /// The account that pays the fee; differs from the source for fee bumps.
    pub fn fee_source_account_id(&self) -> AccountId {
        match self.envelope.as_ref() {
            TransactionEnvelope::TxFeeBump(env) => muxed_to_account_id(&env.tx.fee_source),
            _ => self.source_account_id(),
        }
    }

    pub fn sequence_number(&self) -> i64 {
        match self.envelope.as_ref() {
            TransactionEnvelope::TxV0(env) => env.tx.seq_num.0,
            TransactionEnvelope::Tx(env) => env.tx.seq_num.0,
            TransactionEnvelope::TxFeeBump(env) => match &env.tx.inner_tx {
                FeeBumpTransactionInnerTx::Tx(inner) => inner.tx.seq_num.0,
            },
        }
    }

    /// The full fee bid in stroops.
    pub fn fee_bid(&self) -> i64 {
        match self.envelope.as_ref() {
            TransactionEnvelope::TxV0(env) => i64::from(env.tx.fee),
            TransactionEnvelope::Tx(env) => i64::from(env.tx.fee),
            TransactionEnvelope::TxFeeBump(env) => env.tx.fee,
        }
    }

    /// Operation count; a fee bump counts as one extra operation.
    pub fn operation_count(&self) -> usize {
        match self.envelope.as_ref() {
            TransactionEnvelope::TxV0(env) => env.tx.operations.len(),
            TransactionEnvelope::Tx(env) => env.tx.operations.len(),
            TransactionEnvelope::TxFeeBump(env) => match &env.tx.inner_tx {
                FeeBumpTransactionInnerTx::Tx(inner) => inner.tx.operations.len() + 1,
            },
        }
    }

    /// Minimum fee this transaction must bid at `base_fee`.
    pub fn minimum_fee(&self, base_fee: u32) -> i64 {
        i64::from(base_fee) * self.operation_count() as i64
    }

    /// Fee actually charged: the bid, capped at the minimum for the ledger.
    pub fn fee_to_charge(&self, base_fee: u32) -> i64 {
        self.fee_bid().min(self.minimum_fee(base_fee))
    }

    pub fn is_fee_bump(&self) -> bool {
        matches!(self.envelope.as_ref(), TransactionEnvelope::TxFeeBump(_))
    }
}
