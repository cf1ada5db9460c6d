//! SQLite persistence for sluice.
//!
//! The ledger crate stores its durable state here: the `storestate`
//! key/value table (last-closed-ledger pointer and header, history archive
//! state), account rows, applied transaction sets and closed headers.
//!
//! Query methods are traits implemented on [`rusqlite::Connection`]; a whole
//! ledger close is written through [`Database::transaction`] so it commits
//! or rolls back as one unit.

mod error;
mod pool;
mod queries;
pub mod schema;

pub use error::DbError;
pub use pool::{Database, PooledConnection};
pub use queries::{AccountQueries, AccountRow, LedgerHeaderQueries, StateQueries, TxSetQueries};
pub use schema::state_keys;

pub type Result<T> = std::result::Result<T, DbError>;
