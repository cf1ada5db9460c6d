//! Database schema definitions.
//!
//! # Tables
//!
//! - `storestate`: key/value store for node state (see [`state_keys`])
//! - `accounts`: the account balances and sequence numbers a close mutates
//! - `txsets`: applied transaction sets keyed by content hash
//! - `ledgerheaders`: every closed header, for lookups by sequence

/// Version stored under [`state_keys::DATABASE_SCHEMA`].
pub const SCHEMA_VERSION: i32 = 1;

pub const CREATE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS storestate (
    statename TEXT PRIMARY KEY,
    state TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS accounts (
    accountid TEXT PRIMARY KEY,
    balance INTEGER NOT NULL,
    seqnum INTEGER NOT NULL,
    numsubentries INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS txsets (
    txsethash TEXT PRIMARY KEY,
    ledgerseq INTEGER NOT NULL,
    data BLOB NOT NULL
);
CREATE INDEX IF NOT EXISTS txsets_ledger ON txsets(ledgerseq);

CREATE TABLE IF NOT EXISTS ledgerheaders (
    ledgerhash TEXT PRIMARY KEY,
    ledgerseq INTEGER UNIQUE NOT NULL,
    data BLOB NOT NULL
);
"#;

/// Well-known `storestate` keys.
pub mod state_keys {
    pub const DATABASE_SCHEMA: &str = "databaseschema";
    /// Hex hash of the last closed ledger.
    pub const LAST_CLOSED_LEDGER: &str = "lastclosedledger";
    /// Hex XDR of the last closed ledger header.
    pub const LAST_CLOSED_HEADER: &str = "lastclosedheader";
    /// JSON history archive state written at checkpoint ledgers.
    pub const HISTORY_ARCHIVE_STATE: &str = "historyarchivestate";
    pub const NETWORK_PASSPHRASE: &str = "networkpassphrase";
}
