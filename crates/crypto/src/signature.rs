//! Hash signing and signature hints.

use sluice_common::Hash256;

use crate::error::CryptoError;
use crate::keys::{PublicKey, SecretKey, Signature};

/// The 4-byte hint that lets a verifier find the signer without trying
/// every key: the last four bytes of the public key.
pub fn signature_hint(public_key: &PublicKey) -> [u8; 4] {
    let bytes = public_key.as_bytes();
    [bytes[28], bytes[29], bytes[30], bytes[31]]
}

pub fn sign_hash(secret_key: &SecretKey, hash: &Hash256) -> Signature {
    secret_key.sign(hash.as_bytes())
}

pub fn verify_hash(
    public_key: &PublicKey,
    hash: &Hash256,
    signature: &Signature,
) -> Result<(), CryptoError> {
    public_key.verify(hash.as_bytes(), signature)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hint_is_key_suffix() {
        let pk = SecretKey::from_seed(&[3u8; 32]).public_key();
        assert_eq!(&signature_hint(&pk), &pk.as_bytes()[28..]);
    }

    #[test]
    fn test_sign_hash_round_trip() {
        let sk = SecretKey::from_seed(&[4u8; 32]);
        let h = Hash256::hash(b"payload");
        let sig = sign_hash(&sk, &h);
        assert!(verify_hash(&sk.public_key(), &h, &sig).is_ok());
        assert!(verify_hash(&sk.public_key(), &Hash256::ZERO, &sig).is_err());
    }
}
