//! Protocol version constants and helpers.
//!
//! Ledger headers carry the protocol version they were closed under. A node
//! refuses to close a ledger whose version is newer than
//! [`CURRENT_LEDGER_PROTOCOL_VERSION`], and upgrade validation uses the
//! feature gates below.

/// The newest protocol version this node can apply.
pub const CURRENT_LEDGER_PROTOCOL_VERSION: u32 = 25;

/// First protocol where the `Flags` ledger upgrade is accepted.
pub const FLAGS_UPGRADE_PROTOCOL_VERSION: u32 = 18;

/// First protocol with Soroban; gates `MaxSorobanTxSetSize` and `Config`.
pub const SOROBAN_PROTOCOL_VERSION: u32 = 20;

/// Mask of header flags that the `Flags` upgrade may set.
pub const MASK_LEDGER_HEADER_FLAGS: u32 = 0x7;

/// Maximum number of operations a single transaction may carry.
pub const MAX_OPS_PER_TX: usize = 100;

/// Whether `version` is at least `from`.
pub fn protocol_version_starts_from(version: u32, from: u32) -> bool {
    version >= from
}

/// Whether this node can close ledgers under `version`.
pub fn is_supported_protocol(version: u32) -> bool {
    version <= CURRENT_LEDGER_PROTOCOL_VERSION
}

pub fn soroban_supported(version: u32) -> bool {
    protocol_version_starts_from(version, SOROBAN_PROTOCOL_VERSION)
}
