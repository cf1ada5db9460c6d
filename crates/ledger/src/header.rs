//! Ledger header helpers.
//!
//! The header hash is the SHA-256 of the header's XDR and is what the next
//! ledger's `previous_ledger_hash` must name. Everything else here is small
//! accessors over [`LedgerHeader`] fields that close and upgrade code use.

use sluice_common::{Hash256, CURRENT_LEDGER_PROTOCOL_VERSION};
use stellar_xdr::curr::{
    Hash, LedgerHeader, LedgerHeaderExt, LedgerHeaderExtensionV1, LedgerHeaderExtensionV1Ext,
    StellarValue, StellarValueExt, TimePoint, VecM,
};

use crate::Result;

/// Sequence number of the first ledger.
pub const GENESIS_LEDGER_SEQ: u32 = 1;
/// 100 billion lumens in stroops.
pub const GENESIS_TOTAL_COINS: i64 = 1_000_000_000_000_000_000;
pub const GENESIS_BASE_FEE: u32 = 100;
pub const GENESIS_BASE_RESERVE: u32 = 100_000_000;
pub const GENESIS_MAX_TX_SET_SIZE: u32 = 100;

pub fn compute_header_hash(header: &LedgerHeader) -> Result<Hash256> {
    Ok(Hash256::hash_xdr(header)?)
}

/// The header of ledger 1 for a fresh network.
pub fn genesis_header(ledger_version: u32) -> LedgerHeader {
    LedgerHeader {
        ledger_version: ledger_version.min(CURRENT_LEDGER_PROTOCOL_VERSION),
        previous_ledger_hash: Hash([0u8; 32]),
        scp_value: StellarValue {
            tx_set_hash: Hash([0u8; 32]),
            close_time: TimePoint(0),
            upgrades: VecM::default(),
            ext: StellarValueExt::Basic,
        },
        tx_set_result_hash: Hash([0u8; 32]),
        bucket_list_hash: Hash([0u8; 32]),
        ledger_seq: GENESIS_LEDGER_SEQ,
        total_coins: GENESIS_TOTAL_COINS,
        fee_pool: 0,
        inflation_seq: 0,
        id_pool: 0,
        base_fee: GENESIS_BASE_FEE,
        base_reserve: GENESIS_BASE_RESERVE,
        max_tx_set_size: GENESIS_MAX_TX_SET_SIZE,
        skip_list: [
            Hash([0u8; 32]),
            Hash([0u8; 32]),
            Hash([0u8; 32]),
            Hash([0u8; 32]),
        ],
        ext: LedgerHeaderExt::V0,
    }
}

/// Starts the header for the ledger after `prev`.
///
/// Parameters that only upgrades change (version, fees, reserve, set size,
/// flags) carry over. The result hash is filled in once transactions run.
pub fn create_next_header(
    prev: &LedgerHeader,
    prev_hash: Hash256,
    value: &StellarValue,
) -> LedgerHeader {
    LedgerHeader {
        ledger_version: prev.ledger_version,
        previous_ledger_hash: prev_hash.into(),
        scp_value: value.clone(),
        tx_set_result_hash: Hash([0u8; 32]),
        bucket_list_hash: prev.bucket_list_hash.clone(),
        ledger_seq: prev.ledger_seq + 1,
        total_coins: prev.total_coins,
        fee_pool: prev.fee_pool,
        inflation_seq: prev.inflation_seq,
        id_pool: prev.id_pool,
        base_fee: prev.base_fee,
        base_reserve: prev.base_reserve,
        max_tx_set_size: prev.max_tx_set_size,
        skip_list: prev.skip_list.clone(),
        ext: prev.ext.clone(),
    }
}

pub fn close_time(header: &LedgerHeader) -> u64 {
    header.scp_value.close_time.0
}

pub fn header_flags(header: &LedgerHeader) -> u32 {
    match &header.ext {
        LedgerHeaderExt::V0 => 0,
        LedgerHeaderExt::V1(ext) => ext.flags,
    }
}

pub fn set_header_flags(header: &mut LedgerHeader, flags: u32) {
    header.ext = LedgerHeaderExt::V1(LedgerHeaderExtensionV1 {
        flags,
        ext: LedgerHeaderExtensionV1Ext::V0,
    });
}

/// Minimum balance an account with `num_sub_entries` must keep.
pub fn minimum_balance(header: &LedgerHeader, num_sub_entries: u32) -> i64 {
    (2 + i64::from(num_sub_entries)) * i64::from(header.base_reserve)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_header_links_to_previous() {
        let genesis = genesis_header(CURRENT_LEDGER_PROTOCOL_VERSION);
        let hash = compute_header_hash(&genesis).unwrap();
        let value = StellarValue {
            tx_set_hash: Hash([1u8; 32]),
            close_time: TimePoint(10),
            upgrades: VecM::default(),
            ext: StellarValueExt::Basic,
        };
        let next = create_next_header(&genesis, hash, &value);

        assert_eq!(next.ledger_seq, 2);
        assert_eq!(Hash256::from(&next.previous_ledger_hash), hash);
        assert_eq!(close_time(&next), 10);
        assert_eq!(next.base_fee, genesis.base_fee);
    }

    #[test]
    fn test_header_hash_changes_with_content() {
        let a = genesis_header(CURRENT_LEDGER_PROTOCOL_VERSION);
        let mut b = a.clone();
        b.base_fee += 1;
        assert_ne!(compute_header_hash(&a).unwrap(), compute_header_hash(&b).unwrap());
    }

    #[test]
    fn test_flags_round_trip() {
        let mut h = genesis_header(CURRENT_LEDGER_PROTOCOL_VERSION);
        assert_eq!(header_flags(&h), 0);
        set_header_flags(&mut h, 0x3);
        assert_eq!(header_flags(&h), 0x3);
    }

    #[test]
    fn test_minimum_balance() {
        let h = genesis_header(CURRENT_LEDGER_PROTOCOL_VERSION);
        assert_eq!(minimum_balance(&h, 0), 2 * i64::from(GENESIS_BASE_RESERVE));
        assert_eq!(minimum_balance(&h, 3), 5 * i64::from(GENESIS_BASE_RESERVE));
    }
}
