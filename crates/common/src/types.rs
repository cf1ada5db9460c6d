//! The [`Hash256`] digest type.
//!
//! Every content-addressed identity in the bridge (ledger header hashes,
//! transaction ids, transaction-bundle hashes, network ids) is a SHA-256
//! digest carried as a [`Hash256`].

use sha2::{Digest, Sha256};
use std::fmt;
use std::ops::BitXor;

use stellar_xdr::curr::{Limits, WriteXdr};

/// A 32-byte SHA-256 hash.
///
/// # Examples
///
/// ```rust
/// use sluice_common::Hash256;
///
/// let hash = Hash256::hash(b"ledger");
/// assert!(!hash.is_zero());
/// assert_eq!(Hash256::from_hex(&hash.to_hex()).unwrap(), hash);
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    /// The all-zero hash, used as the previous-ledger hash of genesis.
    pub const ZERO: Self = Self([0u8; 32]);

    /// Hashes arbitrary bytes with SHA-256.
    pub fn hash(data: &[u8]) -> Self {
        let digest = Sha256::digest(data);
        let mut out = [0u8; 32];
        out.copy_from_slice(&digest);
        Self(out)
    }

    /// Hashes the canonical XDR encoding of `value`.
    pub fn hash_xdr<T: WriteXdr>(value: &T) -> Result<Self, stellar_xdr::curr::Error> {
        let bytes = value.to_xdr(Limits::none())?;
        Ok(Self::hash(&bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| hex::FromHexError::InvalidStringLength)?;
        Ok(Self(arr))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// Short prefix used in log lines.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl BitXor for Hash256 {
    type Output = Hash256;

    fn bitxor(self, rhs: Self) -> Self::Output {
        let mut out = [0u8; 32];
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = self.0[i] ^ rhs.0[i];
        }
        Hash256(out)
    }
}

impl fmt::Debug for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash256({})", self.to_hex())
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl From<stellar_xdr::curr::Hash> for Hash256 {
    fn from(hash: stellar_xdr::curr::Hash) -> Self {
        Self(hash.0)
    }
}

impl From<&stellar_xdr::curr::Hash> for Hash256 {
    fn from(hash: &stellar_xdr::curr::Hash) -> Self {
        Self(hash.0)
    }
}

impl From<Hash256> for stellar_xdr::curr::Hash {
    fn from(hash: Hash256) -> Self {
        stellar_xdr::curr::Hash(hash.0)
    }
}

impl From<[u8; 32]> for Hash256 {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Hash256 {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}
