//! Transaction execution seam.
//!
//! The close operation orchestrates fees, sequence numbers and result
//! recording; what a transaction's operations actually do is delegated to a
//! [`TransactionExecutor`]. Each call runs inside its own delta scope, so
//! an executor may mutate freely and the close discards its changes when
//! the returned result is not a success.

use stellar_xdr::curr::{TransactionResultResult, VecM};

use crate::delta::LedgerDelta;
use crate::frame::TransactionFrame;
use crate::Result;

/// Applies one transaction's operations to the ledger delta.
pub trait TransactionExecutor: Send + Sync {
    /// Returns the transaction's result code. An `Err` means execution broke
    /// unexpectedly; the close records an internal error for this
    /// transaction and continues with the next.
    fn apply(&self, frame: &TransactionFrame, delta: &mut LedgerDelta) -> Result<TransactionResultResult>;
}

/// Executor that accepts every transaction without touching state beyond
/// the fee and sequence number the close already charged.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpExecutor;

impl TransactionExecutor for NoOpExecutor {
    fn apply(&self, _frame: &TransactionFrame, _delta: &mut LedgerDelta) -> Result<TransactionResultResult> {
        Ok(TransactionResultResult::TxSuccess(VecM::default()))
    }
}

/// Returns true for result codes that keep the transaction's changes.
pub fn is_success(result: &TransactionResultResult) -> bool {
    matches!(
        result,
        TransactionResultResult::TxSuccess(_) | TransactionResultResult::TxFeeBumpInnerSuccess(_)
    )
}
