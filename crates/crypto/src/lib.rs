//! Cryptographic primitives for sluice.
//!
//! This crate is the signing and verification collaborator the ledger and
//! herder crates consume. It wraps `ed25519-dalek` keys and knows how a
//! transaction envelope's signature payload is derived, so callers never
//! handle raw hash preimages.
//!
//! ```rust
//! use sluice_crypto::SecretKey;
//!
//! let secret = SecretKey::from_seed(&[7u8; 32]);
//! let signature = secret.sign(b"close ledger 101");
//! assert!(secret.public_key().verify(b"close ledger 101", &signature).is_ok());
//! ```

mod error;
mod keys;
mod signature;
mod transaction;

pub use error::CryptoError;
pub use keys::{PublicKey, SecretKey, Signature};
pub use signature::{sign_hash, signature_hint, verify_hash};
pub use transaction::{
    envelope_signatures, sign_transaction_envelope, transaction_payload_hash,
    verify_envelope_signature,
};

pub type Result<T> = std::result::Result<T, CryptoError>;
