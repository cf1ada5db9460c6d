//! Query traits implemented on [`rusqlite::Connection`].
//!
//! Each table gets its own trait so callers import only what they use.
//! All traits are implemented for `Connection`, which means they are also
//! available on pooled connections and open transactions through deref.

mod accounts;
mod headers;
mod state;
mod txsets;

pub use accounts::{AccountQueries, AccountRow};
pub use headers::LedgerHeaderQueries;
pub use state::StateQueries;
pub use txsets::TxSetQueries;
