//! Queries for the `accounts` table.

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::DbError;

/// One stored account, keyed by the hex of its ed25519 public key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccountRow {
    pub balance: i64,
    pub seq_num: i64,
    pub num_sub_entries: u32,
}

pub trait AccountQueries {
    fn load_account(&self, account_id: &str) -> Result<Option<AccountRow>, DbError>;

    fn store_account(&self, account_id: &str, row: &AccountRow) -> Result<(), DbError>;

    fn delete_account(&self, account_id: &str) -> Result<(), DbError>;

    fn count_accounts(&self) -> Result<u64, DbError>;
}

impl AccountQueries for Connection {
    fn load_account(&self, account_id: &str) -> Result<Option<AccountRow>, DbError> {
        let row = self
            .query_row(
                "SELECT balance, seqnum, numsubentries FROM accounts WHERE accountid = ?1",
                params![account_id],
                |row| {
                    Ok(AccountRow {
                        balance: row.get(0)?,
                        seq_num: row.get(1)?,
                        num_sub_entries: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    fn store_account(&self, account_id: &str, row: &AccountRow) -> Result<(), DbError> {
        self.execute(
            "INSERT OR REPLACE INTO accounts (accountid, balance, seqnum, numsubentries) \
             VALUES (?1, ?2, ?3, ?4)",
            params![account_id, row.balance, row.seq_num, row.num_sub_entries],
        )?;
        Ok(())
    }

    fn delete_account(&self, account_id: &str) -> Result<(), DbError> {
        self.execute("DELETE FROM accounts WHERE accountid = ?1", params![account_id])?;
        Ok(())
    }

    fn count_accounts(&self) -> Result<u64, DbError> {
        let count: i64 = self.query_row("SELECT COUNT(*) FROM accounts", [], |row| row.get(0))?;
        u64::try_from(count).map_err(|_| DbError::Integrity(format!("negative count {count}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::CREATE_SCHEMA;

    #[test]
    fn test_store_load_delete() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(CREATE_SCHEMA).unwrap();

        let row = AccountRow {
            balance: 500,
            seq_num: 7,
            num_sub_entries: 1,
        };
        conn.store_account("ab", &row).unwrap();
        assert_eq!(conn.load_account("ab").unwrap(), Some(row));
        assert_eq!(conn.count_accounts().unwrap(), 1);

        conn.delete_account("ab").unwrap();
        assert!(conn.load_account("ab").unwrap().is_none());
    }
}
