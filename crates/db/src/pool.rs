//! Connection pool management.
//!
//! [`Database`] wraps an r2d2 pool of SQLite connections. It is `Clone` and
//! cheap to share; every clone hands out connections from the same pool.

use std::path::Path;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, OptionalExtension};
use tracing::{debug, info};

use crate::error::DbError;
use crate::queries::StateQueries;
use crate::schema::{state_keys, CREATE_SCHEMA, SCHEMA_VERSION};

pub type PooledConnection = r2d2::PooledConnection<SqliteConnectionManager>;

/// Database handle with connection pooling.
///
/// ```no_run
/// use sluice_db::{Database, StateQueries};
///
/// let db = Database::open("sluice.db")?;
/// db.transaction(|tx| {
///     tx.set_state("lastclosedledger", "00ff")?;
///     Ok(())
/// })?;
/// # Ok::<(), sluice_db::DbError>(())
/// ```
#[derive(Clone)]
pub struct Database {
    pool: Pool<SqliteConnectionManager>,
}

impl Database {
    /// Opens (or creates) a database file and brings its schema up to date.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DbError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let manager = SqliteConnectionManager::file(path);
        let pool = Pool::builder().max_size(4).build(manager)?;
        let db = Self { pool };
        db.initialize()?;
        info!(path = %path.display(), "Opened database");
        Ok(db)
    }

    /// Opens an in-memory database.
    ///
    /// The pool holds a single connection since in-memory databases are
    /// connection-specific.
    pub fn open_in_memory() -> Result<Self, DbError> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder().max_size(1).build(manager)?;
        let db = Self { pool };
        db.initialize()?;
        Ok(db)
    }

    fn initialize(&self) -> Result<(), DbError> {
        let conn = self.connection()?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
        "#,
        )?;

        let existing: Option<String> = conn
            .query_row(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'storestate'",
                [],
                |row| row.get(0),
            )
            .optional()?;

        if existing.is_some() {
            let found = schema_version(&conn)?;
            if found > SCHEMA_VERSION {
                return Err(DbError::UnsupportedSchema {
                    found,
                    supported: SCHEMA_VERSION,
                });
            }
        }

        conn.execute_batch(CREATE_SCHEMA)?;
        conn.set_state(state_keys::DATABASE_SCHEMA, &SCHEMA_VERSION.to_string())?;
        debug!(version = SCHEMA_VERSION, "Database schema ready");
        Ok(())
    }

    pub fn connection(&self) -> Result<PooledConnection, DbError> {
        Ok(self.pool.get()?)
    }

    /// Runs `f` inside a transaction that commits only if `f` returns `Ok`.
    pub fn transaction<T, F>(&self, f: F) -> Result<T, DbError>
    where
        F: FnOnce(&rusqlite::Transaction) -> Result<T, DbError>,
    {
        let mut conn = self.connection()?;
        let tx = conn.transaction()?;
        let result = f(&tx)?;
        tx.commit()?;
        Ok(result)
    }

    pub fn with_connection<T, F>(&self, f: F) -> Result<T, DbError>
    where
        F: FnOnce(&Connection) -> Result<T, DbError>,
    {
        let conn = self.connection()?;
        f(&conn)
    }

    pub fn schema_version(&self) -> Result<i32, DbError> {
        self.with_connection(schema_version)
    }
}

fn schema_version(conn: &Connection) -> Result<i32, DbError> {
    match conn.get_state(state_keys::DATABASE_SCHEMA)? {
        Some(v) => v
            .parse()
            .map_err(|e| DbError::Integrity(format!("bad schema version {v:?}: {e}"))),
        None => Ok(0),
    }
}
