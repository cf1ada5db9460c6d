//! Queries for the `storestate` key/value table.

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::DbError;

pub trait StateQueries {
    /// Returns `None` if the key does not exist.
    fn get_state(&self, key: &str) -> Result<Option<String>, DbError>;

    /// Inserts or replaces a value.
    fn set_state(&self, key: &str, value: &str) -> Result<(), DbError>;

    fn delete_state(&self, key: &str) -> Result<(), DbError>;
}

impl StateQueries for Connection {
    fn get_state(&self, key: &str) -> Result<Option<String>, DbError> {
        let result = self
            .query_row(
                "SELECT state FROM storestate WHERE statename = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(result)
    }

    fn set_state(&self, key: &str, value: &str) -> Result<(), DbError> {
        self.execute(
            "INSERT OR REPLACE INTO storestate (statename, state) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    fn delete_state(&self, key: &str) -> Result<(), DbError> {
        self.execute("DELETE FROM storestate WHERE statename = ?1", params![key])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::CREATE_SCHEMA;

    fn setup_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(CREATE_SCHEMA).unwrap();
        conn
    }

    #[test]
    fn test_get_set_state() {
        let conn = setup_db();
        assert!(conn.get_state("lastclosedledger").unwrap().is_none());

        conn.set_state("lastclosedledger", "aa").unwrap();
        conn.set_state("lastclosedledger", "bb").unwrap();
        assert_eq!(
            conn.get_state("lastclosedledger").unwrap().as_deref(),
            Some("bb")
        );
    }

    #[test]
    fn test_delete_state() {
        let conn = setup_db();
        conn.set_state("k", "v").unwrap();
        conn.delete_state("k").unwrap();
        conn.delete_state("missing").unwrap();
        assert!(conn.get_state("k").unwrap().is_none());
    }
}
