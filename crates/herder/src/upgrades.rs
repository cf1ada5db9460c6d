//! Upgrade-step rules at the consensus layer.
//!
//! The ledger crate knows how one upgrade applies to a header. This module
//! adds what only matters while agreeing on a value: steps must appear in
//! strictly increasing kind order, invalid steps can be stripped from a
//! value, and colliding steps from different candidates merge to the
//! maximum proposal of their kind.

use std::collections::BTreeMap;

use sluice_common::SafetyViolation;
use sluice_ledger::upgrades::{
    check_upgrade, decode_upgrade, upgrade_kind_name, upgrade_order, upgrade_to_string,
    UpgradeError,
};
use stellar_xdr::curr::{LedgerHeader, LedgerUpgrade, UpgradeType};
use thiserror::Error;
use tracing::{debug, trace};

/// Why a value's upgrade list was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UpgradeRejection {
    #[error("upgrade {index} does not decode")]
    Undecodable { index: usize },

    #[error("upgrade {index} ({kind}) is out of order")]
    OutOfOrder { index: usize, kind: &'static str },

    #[error("upgrade {index} is invalid: {source}")]
    Invalid {
        index: usize,
        #[source]
        source: UpgradeError,
    },
}

/// Decodes `upgrades` and checks they are strictly ordered by kind.
///
/// Needs no ledger state, so it applies to every value regardless of how
/// far the node can validate it otherwise.
pub fn check_upgrade_ordering(
    upgrades: &[UpgradeType],
) -> Result<Vec<LedgerUpgrade>, UpgradeRejection> {
    let mut decoded = Vec::with_capacity(upgrades.len());
    let mut last_order = None;
    for (index, raw) in upgrades.iter().enumerate() {
        let upgrade = decode_upgrade(raw).ok_or(UpgradeRejection::Undecodable { index })?;
        let order = upgrade_order(&upgrade);
        if last_order.is_some_and(|prev| order <= prev) {
            return Err(UpgradeRejection::OutOfOrder {
                index,
                kind: upgrade_kind_name(&upgrade),
            });
        }
        last_order = Some(order);
        decoded.push(upgrade);
    }
    Ok(decoded)
}

/// Full check of an upgrade list against the header it would apply to.
pub fn validate_upgrades(
    header: &LedgerHeader,
    upgrades: &[UpgradeType],
) -> Result<(), UpgradeRejection> {
    for (index, upgrade) in check_upgrade_ordering(upgrades)?.iter().enumerate() {
        check_upgrade(header, upgrade).map_err(|source| UpgradeRejection::Invalid { index, source })?;
    }
    Ok(())
}

/// Keeps the steps of `upgrades` that decode, are valid against `header`,
/// and continue a strictly increasing kind order.
pub fn retain_valid_upgrades(header: &LedgerHeader, upgrades: &[UpgradeType]) -> Vec<UpgradeType> {
    let mut kept = Vec::with_capacity(upgrades.len());
    let mut last_order = None;
    for raw in upgrades {
        let Some(upgrade) = decode_upgrade(raw) else {
            trace!("Dropping undecodable upgrade");
            continue;
        };
        let order = upgrade_order(&upgrade);
        if last_order.is_some_and(|prev| order <= prev) {
            trace!(upgrade = %upgrade_to_string(&upgrade), "Dropping out-of-order upgrade");
            continue;
        }
        if let Err(err) = check_upgrade(header, &upgrade) {
            trace!(upgrade = %upgrade_to_string(&upgrade), %err, "Dropping invalid upgrade");
            continue;
        }
        last_order = Some(order);
        kept.push(raw.clone());
    }
    kept
}

/// Merges two proposals of the same kind.
///
/// Numeric parameters take the larger value. Differing config upgrade keys
/// resolve to the larger `(contract_id, content_hash)` pair so every node
/// picks the same key regardless of candidate order. Mismatched kinds cannot
/// be merged.
pub fn merge_upgrade(
    existing: &LedgerUpgrade,
    incoming: &LedgerUpgrade,
) -> Result<LedgerUpgrade, SafetyViolation> {
    use LedgerUpgrade::*;
    let merged = match (existing, incoming) {
        (Version(a), Version(b)) => Version(*a.max(b)),
        (BaseFee(a), BaseFee(b)) => BaseFee(*a.max(b)),
        (MaxTxSetSize(a), MaxTxSetSize(b)) => MaxTxSetSize(*a.max(b)),
        (BaseReserve(a), BaseReserve(b)) => BaseReserve(*a.max(b)),
        (Flags(a), Flags(b)) => Flags(*a.max(b)),
        (MaxSorobanTxSetSize(a), MaxSorobanTxSetSize(b)) => MaxSorobanTxSetSize(*a.max(b)),
        (Config(a), Config(b)) => {
            let key_a = (&a.contract_id.0 .0, &a.content_hash.0);
            let key_b = (&b.contract_id.0 .0, &b.content_hash.0);
            if key_b > key_a {
                Config(b.clone())
            } else {
                Config(a.clone())
            }
        }
        _ => {
            return Err(SafetyViolation::UnmergeableUpgrade {
                kind: upgrade_kind_name(incoming),
            })
        }
    };
    Ok(merged)
}

/// Merges the upgrade lists of every candidate into one ordered list.
///
/// The result depends only on the multiset of steps, not on candidate
/// order. Undecodable steps are skipped since candidates were validated
/// before nomination confirmed them.
pub fn merge_candidate_upgrades<'a, I>(lists: I) -> Result<Vec<LedgerUpgrade>, SafetyViolation>
where
    I: IntoIterator<Item = &'a [UpgradeType]>,
{
    let mut by_kind: BTreeMap<u32, LedgerUpgrade> = BTreeMap::new();
    for list in lists {
        for raw in list {
            let Some(upgrade) = decode_upgrade(raw) else {
                debug!("Skipping undecodable upgrade in candidate");
                continue;
            };
            let order = upgrade_order(&upgrade);
            let merged = match by_kind.get(&order) {
                Some(existing) => merge_upgrade(existing, &upgrade)?,
                None => upgrade,
            };
            by_kind.insert(order, merged);
        }
    }
    Ok(by_kind.into_values().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sluice_ledger::header::genesis_header;
    use sluice_ledger::upgrades::encode_upgrade;
    use stellar_xdr::curr::{ConfigUpgradeSetKey, ContractId, Hash};

    fn raw(upgrade: LedgerUpgrade) -> UpgradeType {
        encode_upgrade(&upgrade).unwrap()
    }

    fn config_key(byte: u8) -> LedgerUpgrade {
        LedgerUpgrade::Config(ConfigUpgradeSetKey {
            contract_id: ContractId(Hash([byte; 32])),
            content_hash: Hash([byte; 32]),
        })
    }

    #[test]
    fn test_ordering_accepts_increasing_kinds() {
        let list = vec![
            raw(LedgerUpgrade::Version(21)),
            raw(LedgerUpgrade::BaseFee(200)),
            raw(LedgerUpgrade::BaseReserve(10)),
        ];
        assert_eq!(check_upgrade_ordering(&list).unwrap().len(), 3);
    }

    #[test]
    fn test_ordering_rejects_duplicates_and_reversal() {
        let dup = vec![raw(LedgerUpgrade::BaseFee(200)), raw(LedgerUpgrade::BaseFee(300))];
        assert_eq!(
            check_upgrade_ordering(&dup),
            Err(UpgradeRejection::OutOfOrder { index: 1, kind: "basefee" })
        );

        let reversed = vec![raw(LedgerUpgrade::BaseFee(200)), raw(LedgerUpgrade::Version(21))];
        assert!(matches!(
            check_upgrade_ordering(&reversed),
            Err(UpgradeRejection::OutOfOrder { index: 1, .. })
        ));

        let garbage = vec![UpgradeType(vec![0xff; 3].try_into().unwrap())];
        assert_eq!(
            check_upgrade_ordering(&garbage),
            Err(UpgradeRejection::Undecodable { index: 0 })
        );
    }

    #[test]
    fn test_validate_against_header() {
        let header = genesis_header(20);
        assert!(validate_upgrades(&header, &[raw(LedgerUpgrade::Version(21))]).is_ok());
        assert!(matches!(
            validate_upgrades(&header, &[raw(LedgerUpgrade::Version(19))]),
            Err(UpgradeRejection::Invalid { index: 0, .. })
        ));
    }

    #[test]
    fn test_retain_strips_invalid_steps() {
        let header = genesis_header(20);
        let list = vec![
            raw(LedgerUpgrade::Version(19)),
            raw(LedgerUpgrade::BaseFee(200)),
            raw(LedgerUpgrade::Version(21)),
            raw(LedgerUpgrade::BaseReserve(0)),
            raw(LedgerUpgrade::MaxTxSetSize(500)),
        ];
        let kept = retain_valid_upgrades(&header, &list);
        assert_eq!(
            kept,
            vec![raw(LedgerUpgrade::BaseFee(200)), raw(LedgerUpgrade::MaxTxSetSize(500))]
        );
    }

    #[test]
    fn test_merge_takes_maximum() {
        assert_eq!(
            merge_upgrade(&LedgerUpgrade::Version(9), &LedgerUpgrade::Version(11)),
            Ok(LedgerUpgrade::Version(11))
        );
        assert_eq!(
            merge_upgrade(&LedgerUpgrade::BaseFee(500), &LedgerUpgrade::BaseFee(100)),
            Ok(LedgerUpgrade::BaseFee(500))
        );
    }

    #[test]
    fn test_merge_config_collision_picks_larger_key() {
        assert_eq!(merge_upgrade(&config_key(1), &config_key(1)), Ok(config_key(1)));
        assert_eq!(merge_upgrade(&config_key(1), &config_key(2)), Ok(config_key(2)));
        assert_eq!(merge_upgrade(&config_key(2), &config_key(1)), Ok(config_key(2)));
    }

    #[test]
    fn test_merge_mismatched_kinds_is_fatal() {
        assert_eq!(
            merge_upgrade(&LedgerUpgrade::Version(9), &config_key(1)),
            Err(SafetyViolation::UnmergeableUpgrade { kind: "configupgradesetkey" })
        );
    }

    #[test]
    fn test_merge_candidates_is_order_independent() {
        let a = vec![raw(LedgerUpgrade::Version(9)), raw(LedgerUpgrade::BaseFee(300))];
        let b = vec![raw(LedgerUpgrade::Version(11))];
        let c = vec![raw(LedgerUpgrade::BaseFee(200)), raw(LedgerUpgrade::BaseReserve(7))];

        let forward = merge_candidate_upgrades([a.as_slice(), b.as_slice(), c.as_slice()]).unwrap();
        let backward = merge_candidate_upgrades([c.as_slice(), b.as_slice(), a.as_slice()]).unwrap();
        assert_eq!(forward, backward);
        assert_eq!(
            forward,
            vec![
                LedgerUpgrade::Version(11),
                LedgerUpgrade::BaseFee(300),
                LedgerUpgrade::BaseReserve(7),
            ]
        );
    }
}
