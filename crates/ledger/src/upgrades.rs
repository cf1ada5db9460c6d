//! Ledger upgrade steps: decoding, ordering and application to a header.
//!
//! A consensus value carries upgrades as opaque XDR blobs. Each decodes to a
//! [`LedgerUpgrade`]; its discriminant gives the strict order upgrades must
//! appear in. Application mutates only the ledger header, and the close
//! runs each step in its own delta scope so a rejected step leaves no trace.

use sluice_common::{
    protocol_version_starts_from, CURRENT_LEDGER_PROTOCOL_VERSION, FLAGS_UPGRADE_PROTOCOL_VERSION,
    MASK_LEDGER_HEADER_FLAGS,
};
use stellar_xdr::curr::{LedgerHeader, LedgerUpgrade, Limits, ReadXdr, UpgradeType, WriteXdr};
use thiserror::Error;

use crate::header::set_header_flags;

/// Why an upgrade step cannot be applied to a header.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UpgradeError {
    #[error("protocol version {proposed} does not increase current version {current}")]
    VersionNotIncreasing { current: u32, proposed: u32 },

    #[error("protocol version {proposed} is newer than supported {max_supported}")]
    VersionUnsupported { proposed: u32, max_supported: u32 },

    #[error("base fee must be non-zero")]
    ZeroBaseFee,

    #[error("base reserve must be non-zero")]
    ZeroBaseReserve,

    #[error("flags upgrades are not available at protocol {current}")]
    FlagsNotSupported { current: u32 },

    #[error("flags {flags:#x} set bits outside the header flag mask")]
    InvalidFlags { flags: u32 },

    #[error("{kind} upgrades are not managed by this node")]
    Unsupported { kind: &'static str },
}

/// Position of an upgrade kind in the required ordering.
pub fn upgrade_order(upgrade: &LedgerUpgrade) -> u32 {
    match upgrade {
        LedgerUpgrade::Version(_) => 0,
        LedgerUpgrade::BaseFee(_) => 1,
        LedgerUpgrade::MaxTxSetSize(_) => 2,
        LedgerUpgrade::BaseReserve(_) => 3,
        LedgerUpgrade::Flags(_) => 4,
        LedgerUpgrade::Config(_) => 5,
        LedgerUpgrade::MaxSorobanTxSetSize(_) => 6,
    }
}

pub fn upgrade_kind_name(upgrade: &LedgerUpgrade) -> &'static str {
    match upgrade {
        LedgerUpgrade::Version(_) => "protocolversion",
        LedgerUpgrade::BaseFee(_) => "basefee",
        LedgerUpgrade::MaxTxSetSize(_) => "maxtxsetsize",
        LedgerUpgrade::BaseReserve(_) => "basereserve",
        LedgerUpgrade::Flags(_) => "flags",
        LedgerUpgrade::Config(_) => "configupgradesetkey",
        LedgerUpgrade::MaxSorobanTxSetSize(_) => "maxsorobantxsetsize",
    }
}

/// Human-readable `kind=value` form for logs.
pub fn upgrade_to_string(upgrade: &LedgerUpgrade) -> String {
    match upgrade {
        LedgerUpgrade::Version(v)
        | LedgerUpgrade::BaseFee(v)
        | LedgerUpgrade::MaxTxSetSize(v)
        | LedgerUpgrade::BaseReserve(v)
        | LedgerUpgrade::Flags(v)
        | LedgerUpgrade::MaxSorobanTxSetSize(v) => format!("{}={}", upgrade_kind_name(upgrade), v),
        LedgerUpgrade::Config(key) => format!(
            "{}={}",
            upgrade_kind_name(upgrade),
            hex::encode(key.content_hash.0)
        ),
    }
}

pub fn decode_upgrade(raw: &UpgradeType) -> Option<LedgerUpgrade> {
    LedgerUpgrade::from_xdr(raw.0.as_slice(), Limits::none()).ok()
}

pub fn encode_upgrade(upgrade: &LedgerUpgrade) -> Result<UpgradeType, stellar_xdr::curr::Error> {
    Ok(UpgradeType(upgrade.to_xdr(Limits::none())?.try_into()?))
}

/// Checks whether `upgrade` may be applied on top of `header`.
pub fn check_upgrade(header: &LedgerHeader, upgrade: &LedgerUpgrade) -> Result<(), UpgradeError> {
    let current = header.ledger_version;
    match upgrade {
        LedgerUpgrade::Version(proposed) => {
            if *proposed > CURRENT_LEDGER_PROTOCOL_VERSION {
                return Err(UpgradeError::VersionUnsupported {
                    proposed: *proposed,
                    max_supported: CURRENT_LEDGER_PROTOCOL_VERSION,
                });
            }
            if *proposed <= current {
                return Err(UpgradeError::VersionNotIncreasing {
                    current,
                    proposed: *proposed,
                });
            }
        }
        LedgerUpgrade::BaseFee(0) => return Err(UpgradeError::ZeroBaseFee),
        LedgerUpgrade::BaseReserve(0) => return Err(UpgradeError::ZeroBaseReserve),
        LedgerUpgrade::BaseFee(_) | LedgerUpgrade::BaseReserve(_) | LedgerUpgrade::MaxTxSetSize(_) => {}
        LedgerUpgrade::Flags(flags) => {
            if !protocol_version_starts_from(current, FLAGS_UPGRADE_PROTOCOL_VERSION) {
                return Err(UpgradeError::FlagsNotSupported { current });
            }
            if flags & !MASK_LEDGER_HEADER_FLAGS != 0 {
                return Err(UpgradeError::InvalidFlags { flags: *flags });
            }
        }
        LedgerUpgrade::Config(_) | LedgerUpgrade::MaxSorobanTxSetSize(_) => {
            return Err(UpgradeError::Unsupported {
                kind: upgrade_kind_name(upgrade),
            });
        }
    }
    Ok(())
}

/// Applies one upgrade step to `header`, leaving it untouched on error.
pub fn apply_upgrade(header: &mut LedgerHeader, upgrade: &LedgerUpgrade) -> Result<(), UpgradeError> {
    check_upgrade(header, upgrade)?;
    match upgrade {
        LedgerUpgrade::Version(v) => header.ledger_version = *v,
        LedgerUpgrade::BaseFee(fee) => header.base_fee = *fee,
        LedgerUpgrade::MaxTxSetSize(size) => header.max_tx_set_size = *size,
        LedgerUpgrade::BaseReserve(reserve) => header.base_reserve = *reserve,
        LedgerUpgrade::Flags(flags) => set_header_flags(header, *flags),
        LedgerUpgrade::Config(_) | LedgerUpgrade::MaxSorobanTxSetSize(_) => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::{genesis_header, header_flags};

    #[test]
    fn test_encode_decode() {
        let up = LedgerUpgrade::BaseFee(200);
        let raw = encode_upgrade(&up).unwrap();
        assert_eq!(decode_upgrade(&raw), Some(up));
        assert_eq!(decode_upgrade(&UpgradeType(vec![1, 2, 3].try_into().unwrap())), None);
    }

    #[test]
    fn test_order_follows_discriminant() {
        assert!(upgrade_order(&LedgerUpgrade::Version(1)) < upgrade_order(&LedgerUpgrade::BaseFee(1)));
        assert!(upgrade_order(&LedgerUpgrade::Flags(0)) < upgrade_order(&LedgerUpgrade::MaxSorobanTxSetSize(1)));
    }

    #[test]
    fn test_version_upgrade() {
        let mut h = genesis_header(20);
        apply_upgrade(&mut h, &LedgerUpgrade::Version(21)).unwrap();
        assert_eq!(h.ledger_version, 21);

        assert_eq!(
            apply_upgrade(&mut h, &LedgerUpgrade::Version(21)),
            Err(UpgradeError::VersionNotIncreasing { current: 21, proposed: 21 })
        );
        assert!(matches!(
            apply_upgrade(&mut h, &LedgerUpgrade::Version(CURRENT_LEDGER_PROTOCOL_VERSION + 1)),
            Err(UpgradeError::VersionUnsupported { .. })
        ));
        assert_eq!(h.ledger_version, 21);
    }

    #[test]
    fn test_parameter_upgrades() {
        let mut h = genesis_header(20);
        apply_upgrade(&mut h, &LedgerUpgrade::BaseFee(300)).unwrap();
        apply_upgrade(&mut h, &LedgerUpgrade::BaseReserve(5)).unwrap();
        apply_upgrade(&mut h, &LedgerUpgrade::MaxTxSetSize(1000)).unwrap();
        assert_eq!((h.base_fee, h.base_reserve, h.max_tx_set_size), (300, 5, 1000));

        assert_eq!(apply_upgrade(&mut h, &LedgerUpgrade::BaseFee(0)), Err(UpgradeError::ZeroBaseFee));
        assert_eq!(h.base_fee, 300);
    }

    #[test]
    fn test_flags_upgrade() {
        let mut old = genesis_header(17);
        assert!(matches!(
            apply_upgrade(&mut old, &LedgerUpgrade::Flags(1)),
            Err(UpgradeError::FlagsNotSupported { current: 17 })
        ));

        let mut h = genesis_header(20);
        assert!(matches!(
            apply_upgrade(&mut h, &LedgerUpgrade::Flags(0x100)),
            Err(UpgradeError::InvalidFlags { .. })
        ));
        apply_upgrade(&mut h, &LedgerUpgrade::Flags(0x3)).unwrap();
        assert_eq!(header_flags(&h), 0x3);
    }

    #[test]
    fn test_soroban_upgrades_unsupported() {
        let h = genesis_header(22);
        assert!(matches!(
            check_upgrade(&h, &LedgerUpgrade::MaxSorobanTxSetSize(10)),
            Err(UpgradeError::Unsupported { .. })
        ));
    }

    #[test]
    fn test_to_string() {
        assert_eq!(upgrade_to_string(&LedgerUpgrade::BaseFee(200)), "basefee=200");
    }
}
