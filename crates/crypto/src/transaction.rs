//! Transaction signature payloads.
//!
//! A transaction signature covers `SHA-256(TransactionSignaturePayload)`,
//! which binds the transaction body to the network id. V0 envelopes are
//! signed as if they were the equivalent V1 transaction.

use sluice_common::{Hash256, NetworkId};
use stellar_xdr::curr::{
    DecoratedSignature, MuxedAccount, Preconditions, SignatureHint, Transaction,
    TransactionEnvelope, TransactionExt, TransactionSignaturePayload,
    TransactionSignaturePayloadTaggedTransaction, TransactionV0, VecM,
};

use crate::error::CryptoError;
use crate::keys::{PublicKey, SecretKey, Signature};
use crate::signature::{sign_hash, signature_hint, verify_hash};

fn v0_as_v1(v0: &TransactionV0) -> Transaction {
    let cond = match &v0.time_bounds {
        Some(bounds) => Preconditions::Time(bounds.clone()),
        None => Preconditions::None,
    };
    Transaction {
        source_account: MuxedAccount::Ed25519(v0.source_account_ed25519.clone()),
        fee: v0.fee,
        seq_num: v0.seq_num.clone(),
        cond,
        memo: v0.memo.clone(),
        operations: v0.operations.clone(),
        ext: TransactionExt::V0,
    }
}

/// The hash every signature on `envelope` must cover.
pub fn transaction_payload_hash(
    network_id: &NetworkId,
    envelope: &TransactionEnvelope,
) -> Result<Hash256, CryptoError> {
    let tagged_transaction = match envelope {
        TransactionEnvelope::TxV0(env) => {
            TransactionSignaturePayloadTaggedTransaction::Tx(v0_as_v1(&env.tx))
        }
        TransactionEnvelope::Tx(env) => {
            TransactionSignaturePayloadTaggedTransaction::Tx(env.tx.clone())
        }
        TransactionEnvelope::TxFeeBump(env) => {
            TransactionSignaturePayloadTaggedTransaction::TxFeeBump(env.tx.clone())
        }
    };
    let payload = TransactionSignaturePayload {
        network_id: (*network_id).into(),
        tagged_transaction,
    };
    Ok(Hash256::hash_xdr(&payload)?)
}

/// The outer signatures of an envelope.
pub fn envelope_signatures(envelope: &TransactionEnvelope) -> &[DecoratedSignature] {
    match envelope {
        TransactionEnvelope::TxV0(env) => env.signatures.as_slice(),
        TransactionEnvelope::Tx(env) => env.signatures.as_slice(),
        TransactionEnvelope::TxFeeBump(env) => env.signatures.as_slice(),
    }
}

/// Appends a decorated signature by `secret` to the envelope.
pub fn sign_transaction_envelope(
    network_id: &NetworkId,
    envelope: &mut TransactionEnvelope,
    secret: &SecretKey,
) -> Result<(), CryptoError> {
    let hash = transaction_payload_hash(network_id, envelope)?;
    let signature = sign_hash(secret, &hash);
    let decorated = DecoratedSignature {
        hint: SignatureHint(signature_hint(&secret.public_key())),
        signature: signature.try_into()?,
    };
    let signatures = match envelope {
        TransactionEnvelope::TxV0(env) => &mut env.signatures,
        TransactionEnvelope::Tx(env) => &mut env.signatures,
        TransactionEnvelope::TxFeeBump(env) => &mut env.signatures,
    };
    let mut list = signatures.to_vec();
    list.push(decorated);
    *signatures = VecM::try_from(list)?;
    Ok(())
}

/// Whether some signature on `envelope` with a matching hint verifies
/// against `signer`.
pub fn verify_envelope_signature(
    network_id: &NetworkId,
    envelope: &TransactionEnvelope,
    signer: &PublicKey,
) -> Result<bool, CryptoError> {
    let hint = signature_hint(signer);
    let hash = transaction_payload_hash(network_id, envelope)?;
    let verified = envelope_signatures(envelope)
        .iter()
        .filter(|decorated| decorated.hint.0 == hint)
        .filter_map(|decorated| Signature::try_from(&decorated.signature).ok())
        .any(|signature| verify_hash(signer, &hash, &signature).is_ok());
    Ok(verified)
}
