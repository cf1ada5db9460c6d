//! The unit handed from consensus to the ledger close.

use std::sync::Arc;

use sluice_common::Hash256;
use stellar_xdr::curr::StellarValue;

use crate::tx_bundle::TxBundle;
use crate::{LedgerError, Result};

/// One slot decision: the ledger to close, its bundle and the agreed value.
///
/// Construction checks that the bundle hashes to the value's
/// `tx_set_hash`, so a request that exists is internally consistent. The
/// close operation still re-checks before applying.
#[derive(Debug, Clone)]
pub struct CloseRequest {
    pub(crate) ledger_seq: u32,
    pub(crate) tx_bundle: Arc<TxBundle>,
    pub(crate) value: StellarValue,
}

impl CloseRequest {
    pub fn new(ledger_seq: u32, tx_bundle: Arc<TxBundle>, value: StellarValue) -> Result<Self> {
        let expected = Hash256::from(&value.tx_set_hash);
        let actual = tx_bundle.contents_hash();
        if expected != actual {
            return Err(LedgerError::TxSetHashMismatch { expected, actual });
        }
        Ok(Self {
            ledger_seq,
            tx_bundle,
            value,
        })
    }

    /// Builds a request without the hash check, for exercising the close
    /// operation's own corruption guard.
    #[cfg(any(test, feature = "test-utils"))]
    pub fn new_unchecked(ledger_seq: u32, tx_bundle: Arc<TxBundle>, value: StellarValue) -> Self {
        Self {
            ledger_seq,
            tx_bundle,
            value,
        }
    }

    pub fn ledger_seq(&self) -> u32 {
        self.ledger_seq
    }

    pub fn tx_bundle(&self) -> &Arc<TxBundle> {
        &self.tx_bundle
    }

    pub fn value(&self) -> &StellarValue {
        &self.value
    }

    /// The ledger this request must build on.
    pub fn previous_ledger_hash(&self) -> Hash256 {
        self.tx_bundle.previous_ledger_hash()
    }

    pub fn close_time(&self) -> u64 {
        self.value.close_time.0
    }
}
