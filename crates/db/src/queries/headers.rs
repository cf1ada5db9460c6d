//! Queries for the `ledgerheaders` table.

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::DbError;

pub trait LedgerHeaderQueries {
    fn store_ledger_header(&self, hash: &str, ledger_seq: u32, data: &[u8])
        -> Result<(), DbError>;

    /// Returns the XDR of the header closed at `ledger_seq`.
    fn load_ledger_header_by_seq(&self, ledger_seq: u32) -> Result<Option<Vec<u8>>, DbError>;

    fn latest_ledger_seq(&self) -> Result<Option<u32>, DbError>;
}

impl LedgerHeaderQueries for Connection {
    fn store_ledger_header(
        &self,
        hash: &str,
        ledger_seq: u32,
        data: &[u8],
    ) -> Result<(), DbError> {
        self.execute(
            "INSERT OR REPLACE INTO ledgerheaders (ledgerhash, ledgerseq, data) VALUES (?1, ?2, ?3)",
            params![hash, ledger_seq, data],
        )?;
        Ok(())
    }

    fn load_ledger_header_by_seq(&self, ledger_seq: u32) -> Result<Option<Vec<u8>>, DbError> {
        let data = self
            .query_row(
                "SELECT data FROM ledgerheaders WHERE ledgerseq = ?1",
                params![ledger_seq],
                |row| row.get(0),
            )
            .optional()?;
        Ok(data)
    }

    fn latest_ledger_seq(&self) -> Result<Option<u32>, DbError> {
        let seq = self.query_row("SELECT MAX(ledgerseq) FROM ledgerheaders", [], |row| {
            row.get::<_, Option<u32>>(0)
        })?;
        Ok(seq)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::CREATE_SCHEMA;

    #[test]
    fn test_latest_seq() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(CREATE_SCHEMA).unwrap();
        assert_eq!(conn.latest_ledger_seq().unwrap(), None);

        conn.store_ledger_header("h1", 1, b"x").unwrap();
        conn.store_ledger_header("h2", 2, b"y").unwrap();
        assert_eq!(conn.latest_ledger_seq().unwrap(), Some(2));
        assert_eq!(
            conn.load_ledger_header_by_seq(1).unwrap().as_deref(),
            Some(&b"x"[..])
        );
    }
}
