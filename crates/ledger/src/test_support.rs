//! Builders for signed transactions and ledger values used in tests.

use sluice_common::{Hash256, NetworkId};
use sluice_crypto::{sign_transaction_envelope, SecretKey};
use stellar_xdr::curr::{
    AccountId, BumpSequenceOp, FeeBumpTransaction, FeeBumpTransactionEnvelope,
    FeeBumpTransactionExt, FeeBumpTransactionInnerTx, Memo, Operation, OperationBody,
    Preconditions, SequenceNumber, StellarValue, StellarValueExt, TimePoint, Transaction,
    TransactionEnvelope, TransactionExt, TransactionV1Envelope, UpgradeType, VecM,
};

pub fn network() -> NetworkId {
    NetworkId::testnet()
}

pub fn secret_of(seed: u8) -> SecretKey {
    SecretKey::from_seed(&[seed; 32])
}

pub fn account_of(seed: u8) -> AccountId {
    secret_of(seed).public_key().to_account_id()
}

fn bump_op() -> Operation {
    Operation {
        source_account: None,
        body: OperationBody::BumpSequence(BumpSequenceOp {
            bump_to: SequenceNumber(0),
        }),
    }
}

/// A signed V1 transaction from the account seeded with `seed`.
pub fn make_tx_with_ops(seed: u8, seq: i64, fee: u32, ops: usize) -> TransactionEnvelope {
    let secret = secret_of(seed);
    let operations: Vec<Operation> = (0..ops).map(|_| bump_op()).collect();
    let mut envelope = TransactionEnvelope::Tx(TransactionV1Envelope {
        tx: Transaction {
            source_account: secret.public_key().to_muxed_account(),
            fee,
            seq_num: SequenceNumber(seq),
            cond: Preconditions::None,
            memo: Memo::None,
            operations: operations.try_into().expect("operations fit"),
            ext: TransactionExt::V0,
        },
        signatures: VecM::default(),
    });
    sign_transaction_envelope(&network(), &mut envelope, &secret).expect("sign");
    envelope
}

pub fn make_tx(seed: u8, seq: i64, fee: u32) -> TransactionEnvelope {
    make_tx_with_ops(seed, seq, fee, 1)
}

/// Wraps a one-operation transaction of `inner_seed` in a fee bump paid by
/// `fee_seed`.
pub fn make_fee_bump(inner_seed: u8, fee_seed: u8, seq: i64, fee: i64) -> TransactionEnvelope {
    let TransactionEnvelope::Tx(inner) = make_tx(inner_seed, seq, 100) else {
        unreachable!("make_tx builds V1 envelopes");
    };
    let fee_secret = secret_of(fee_seed);
    let mut envelope = TransactionEnvelope::TxFeeBump(FeeBumpTransactionEnvelope {
        tx: FeeBumpTransaction {
            fee_source: fee_secret.public_key().to_muxed_account(),
            fee,
            inner_tx: FeeBumpTransactionInnerTx::Tx(inner),
            ext: FeeBumpTransactionExt::V0,
        },
        signatures: VecM::default(),
    });
    sign_transaction_envelope(&network(), &mut envelope, &fee_secret).expect("sign");
    envelope
}

pub fn make_value(tx_set_hash: Hash256, close_time: u64, upgrades: Vec<UpgradeType>) -> StellarValue {
    StellarValue {
        tx_set_hash: tx_set_hash.into(),
        close_time: TimePoint(close_time),
        upgrades: upgrades.try_into().expect("upgrades fit"),
        ext: StellarValueExt::Basic,
    }
}
