//! Error types for cryptographic operations.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CryptoError {
    /// The bytes are not a valid ed25519 point.
    #[error("invalid public key")]
    InvalidPublicKey,

    /// Signature bytes were malformed or did not verify.
    #[error("invalid signature")]
    InvalidSignature,

    /// A signature or key had the wrong number of bytes.
    #[error("invalid length: expected {expected}, got {got}")]
    InvalidLength { expected: usize, got: usize },

    /// Encoding the signature payload failed.
    #[error("XDR error: {0}")]
    Xdr(#[from] stellar_xdr::curr::Error),
}
