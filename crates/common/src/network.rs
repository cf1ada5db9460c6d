//! Network identity.
//!
//! A network is identified by the SHA-256 hash of its passphrase. The id is
//! mixed into every transaction signature payload so that a transaction
//! signed for one network cannot be replayed on another.

use crate::types::Hash256;

/// A unique identifier for a Stellar network.
///
/// ```rust
/// use sluice_common::NetworkId;
///
/// let testnet = NetworkId::testnet();
/// assert_eq!(testnet, NetworkId::from_passphrase("Test SDF Network ; September 2015"));
/// assert_ne!(testnet, NetworkId::mainnet());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NetworkId(pub Hash256);

impl NetworkId {
    pub const TESTNET_PASSPHRASE: &'static str = "Test SDF Network ; September 2015";
    pub const MAINNET_PASSPHRASE: &'static str =
        "Public Global Stellar Network ; September 2015";

    pub fn from_passphrase(passphrase: &str) -> Self {
        Self(Hash256::hash(passphrase.as_bytes()))
    }

    pub fn testnet() -> Self {
        Self::from_passphrase(Self::TESTNET_PASSPHRASE)
    }

    pub fn mainnet() -> Self {
        Self::from_passphrase(Self::MAINNET_PASSPHRASE)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        self.0.as_bytes()
    }
}

impl From<NetworkId> for stellar_xdr::curr::Hash {
    fn from(id: NetworkId) -> Self {
        id.0.into()
    }
}
