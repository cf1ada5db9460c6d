//! Ed25519 key and signature types.

use std::fmt;

use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use stellar_xdr::curr::{AccountId, MuxedAccount, Uint256};

use crate::error::CryptoError;

/// An Ed25519 public key, as carried by an account id.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PublicKey(VerifyingKey);

impl PublicKey {
    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self, CryptoError> {
        VerifyingKey::from_bytes(bytes)
            .map(Self)
            .map_err(|_| CryptoError::InvalidPublicKey)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        self.0.as_bytes()
    }

    /// Verifies `signature` over `message`.
    pub fn verify(&self, message: &[u8], signature: &Signature) -> Result<(), CryptoError> {
        let sig = ed25519_dalek::Signature::from_bytes(&signature.0);
        self.0
            .verify(message, &sig)
            .map_err(|_| CryptoError::InvalidSignature)
    }

    /// The XDR account id for this key.
    pub fn to_account_id(&self) -> AccountId {
        AccountId(stellar_xdr::curr::PublicKey::PublicKeyTypeEd25519(Uint256(
            *self.as_bytes(),
        )))
    }

    pub fn to_muxed_account(&self) -> MuxedAccount {
        MuxedAccount::Ed25519(Uint256(*self.as_bytes()))
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", sluice_common::Hash256(*self.as_bytes()).short())
    }
}

impl TryFrom<&AccountId> for PublicKey {
    type Error = CryptoError;

    fn try_from(id: &AccountId) -> Result<Self, Self::Error> {
        match &id.0 {
            stellar_xdr::curr::PublicKey::PublicKeyTypeEd25519(Uint256(bytes)) => {
                Self::from_bytes(bytes)
            }
        }
    }
}

/// An Ed25519 signing key.
///
/// `Debug` never prints key material.
#[derive(Clone)]
pub struct SecretKey {
    inner: SigningKey,
}

impl SecretKey {
    /// Derives a key deterministically from a 32-byte seed.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            inner: SigningKey::from_bytes(seed),
        }
    }

    pub fn sign(&self, message: &[u8]) -> Signature {
        Signature(self.inner.sign(message).to_bytes())
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.inner.verifying_key())
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretKey({:?})", self.public_key())
    }
}

/// A 64-byte Ed25519 signature.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Signature(pub [u8; 64]);

impl Signature {
    pub fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({:02x}{:02x}..)", self.0[0], self.0[1])
    }
}

impl TryFrom<&stellar_xdr::curr::Signature> for Signature {
    type Error = CryptoError;

    fn try_from(sig: &stellar_xdr::curr::Signature) -> Result<Self, Self::Error> {
        let bytes: &[u8] = sig.0.as_slice();
        let arr: [u8; 64] = bytes.try_into().map_err(|_| CryptoError::InvalidLength {
            expected: 64,
            got: bytes.len(),
        })?;
        Ok(Self(arr))
    }
}

impl TryFrom<Signature> for stellar_xdr::curr::Signature {
    type Error = CryptoError;

    fn try_from(sig: Signature) -> Result<Self, Self::Error> {
        Ok(stellar_xdr::curr::Signature(sig.0.to_vec().try_into()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_verify() {
        let sk = SecretKey::from_seed(&[1u8; 32]);
        let sig = sk.sign(b"msg");
        assert!(sk.public_key().verify(b"msg", &sig).is_ok());
        assert!(sk.public_key().verify(b"other", &sig).is_err());
    }

    #[test]
    fn test_account_id_round_trip() {
        let pk = SecretKey::from_seed(&[2u8; 32]).public_key();
        let id = pk.to_account_id();
        assert_eq!(PublicKey::try_from(&id).unwrap(), pk);
    }

    #[test]
    fn test_short_xdr_signature_rejected() {
        let short = stellar_xdr::curr::Signature(vec![0u8; 10].try_into().unwrap());
        assert!(matches!(
            Signature::try_from(&short),
            Err(CryptoError::InvalidLength { expected: 64, got: 10 })
        ));
    }
}
