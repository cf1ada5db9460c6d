//! Database error types.

use thiserror::Error;

/// Errors raised by the persistence layer.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A stored value could not be interpreted.
    #[error("Integrity error: {0}")]
    Integrity(String),

    /// The on-disk schema is newer than this build understands.
    #[error("Schema version {found} is newer than supported version {supported}")]
    UnsupportedSchema { found: i32, supported: i32 },
}
