//! Queries for the `txsets` table.
//!
//! Transaction sets are stored as opaque XDR blobs keyed by their content
//! hash, together with the ledger that applied them so old sets can be
//! garbage collected.

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::DbError;

pub trait TxSetQueries {
    fn store_tx_set(&self, hash: &str, ledger_seq: u32, data: &[u8]) -> Result<(), DbError>;

    fn load_tx_set(&self, hash: &str) -> Result<Option<Vec<u8>>, DbError>;

    /// Deletes sets applied before `ledger_seq`, returning how many went.
    fn delete_tx_sets_before(&self, ledger_seq: u32) -> Result<usize, DbError>;
}

impl TxSetQueries for Connection {
    fn store_tx_set(&self, hash: &str, ledger_seq: u32, data: &[u8]) -> Result<(), DbError> {
        self.execute(
            "INSERT OR REPLACE INTO txsets (txsethash, ledgerseq, data) VALUES (?1, ?2, ?3)",
            params![hash, ledger_seq, data],
        )?;
        Ok(())
    }

    fn load_tx_set(&self, hash: &str) -> Result<Option<Vec<u8>>, DbError> {
        let data = self
            .query_row(
                "SELECT data FROM txsets WHERE txsethash = ?1",
                params![hash],
                |row| row.get(0),
            )
            .optional()?;
        Ok(data)
    }

    fn delete_tx_sets_before(&self, ledger_seq: u32) -> Result<usize, DbError> {
        let removed = self.execute(
            "DELETE FROM txsets WHERE ledgerseq < ?1",
            params![ledger_seq],
        )?;
        Ok(removed)
    }
}
