//! Database schema definitions
//!
//! Ledger invariants that can be expressed in SQL live here rather than in
//! Rust: positive amounts, distinct transfer parties, a single community
//! user, one vote per user and ballot, and immutable transactions.

use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::sql_types::Integer;
use tracing::info;

use crate::error::LedgerError;

/// Current schema version for migrations
pub const SCHEMA_VERSION: i32 = 1;

#[derive(QueryableByName)]
struct VersionRow {
    #[diesel(sql_type = Integer)]
    version: i32,
}

/// Initialize the database schema
pub fn init_schema(conn: &mut SqliteConnection) -> Result<(), LedgerError> {
    let current_version = get_schema_version(conn)?;

    if current_version == 0 {
        info!("Creating new ledger schema v{}", SCHEMA_VERSION);
        conn.transaction(|conn| {
            conn.batch_execute(LEDGER_SCHEMA)?;
            set_schema_version(conn, SCHEMA_VERSION)
        })?;
    } else if current_version < SCHEMA_VERSION {
        // No released version predates v1 yet
        return Err(LedgerError::Internal(format!(
            "Cannot migrate ledger schema from v{}",
            current_version
        )));
    } else {
        info!("Ledger schema is up to date (v{})", current_version);
    }

    Ok(())
}

/// Get current schema version (0 if not initialized)
fn get_schema_version(conn: &mut SqliteConnection) -> Result<i32, LedgerError> {
    conn.batch_execute("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)")
        .map_err(|e| {
            LedgerError::Internal(format!("Failed to create schema_version table: {}", e))
        })?;

    let row: Option<VersionRow> = diesel::sql_query("SELECT version FROM schema_version LIMIT 1")
        .get_result(conn)
        .optional()?;

    Ok(row.map(|r| r.version).unwrap_or(0))
}

fn set_schema_version(conn: &mut SqliteConnection, version: i32) -> Result<(), LedgerError> {
    diesel::sql_query("DELETE FROM schema_version").execute(conn)?;
    diesel::sql_query("INSERT INTO schema_version (version) VALUES (?)")
        .bind::<Integer, _>(version)
        .execute(conn)?;
    Ok(())
}

const LEDGER_SCHEMA: &str = r#"
CREATE TABLE users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT UNIQUE,
    balance INTEGER NOT NULL DEFAULT 0,
    permission BOOLEAN NOT NULL DEFAULT 0,
    active BOOLEAN NOT NULL DEFAULT 1,
    external BOOLEAN NOT NULL DEFAULT 0,
    special BOOLEAN UNIQUE CHECK (special IS NULL OR special = 1),
    voucher_id INTEGER REFERENCES users(id),
    created TEXT NOT NULL,
    modified TEXT NOT NULL,
    revision INTEGER NOT NULL DEFAULT 0,
    CHECK (voucher_id IS NULL OR voucher_id <> id),
    CHECK (special IS NULL OR (external = 0 AND voucher_id IS NULL))
);

CREATE TABLE multi_transactions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    base_amount INTEGER NOT NULL CHECK (base_amount > 0),
    registered TEXT NOT NULL
);

CREATE TABLE transactions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    sender_id INTEGER NOT NULL REFERENCES users(id),
    receiver_id INTEGER NOT NULL REFERENCES users(id),
    amount INTEGER NOT NULL CHECK (amount > 0),
    reason TEXT,
    registered TEXT NOT NULL,
    multi_transaction_id INTEGER REFERENCES multi_transactions(id),
    CHECK (sender_id <> receiver_id)
);

CREATE INDEX idx_transactions_sender ON transactions(sender_id);
CREATE INDEX idx_transactions_receiver ON transactions(receiver_id);
CREATE INDEX idx_transactions_multi ON transactions(multi_transaction_id);

CREATE TRIGGER transactions_no_update BEFORE UPDATE ON transactions
BEGIN
    SELECT RAISE(ABORT, 'transactions are immutable');
END;

CREATE TRIGGER transactions_no_delete BEFORE DELETE ON transactions
BEGIN
    SELECT RAISE(ABORT, 'transactions are immutable');
END;

CREATE TABLE communisms (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    amount INTEGER NOT NULL CHECK (amount > 0),
    description TEXT NOT NULL,
    creator_id INTEGER NOT NULL REFERENCES users(id),
    active BOOLEAN NOT NULL DEFAULT 1,
    created TEXT NOT NULL,
    modified TEXT NOT NULL,
    multi_transaction_id INTEGER REFERENCES multi_transactions(id),
    revision INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE communism_participants (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    communism_id INTEGER NOT NULL REFERENCES communisms(id) ON DELETE CASCADE,
    user_id INTEGER NOT NULL REFERENCES users(id),
    quantity INTEGER NOT NULL CHECK (quantity >= 0),
    UNIQUE (communism_id, user_id)
);

CREATE TABLE ballots (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    question TEXT NOT NULL,
    modified TEXT NOT NULL,
    active BOOLEAN NOT NULL DEFAULT 1,
    result INTEGER,
    closed TEXT,
    revision INTEGER NOT NULL DEFAULT 0,
    CHECK ((active = 1 AND result IS NULL AND closed IS NULL)
        OR (active = 0 AND result IS NOT NULL AND closed IS NOT NULL))
);

CREATE TABLE votes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    ballot_id INTEGER NOT NULL REFERENCES ballots(id),
    user_id INTEGER NOT NULL REFERENCES users(id),
    vote INTEGER NOT NULL CHECK (vote BETWEEN -1 AND 1),
    modified TEXT NOT NULL,
    UNIQUE (user_id, ballot_id)
);

CREATE TABLE refunds (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    amount INTEGER NOT NULL CHECK (amount > 0),
    description TEXT NOT NULL,
    creator_id INTEGER NOT NULL REFERENCES users(id),
    active BOOLEAN NOT NULL DEFAULT 1,
    created TEXT NOT NULL,
    modified TEXT NOT NULL,
    ballot_id INTEGER NOT NULL UNIQUE REFERENCES ballots(id),
    transaction_id INTEGER REFERENCES transactions(id),
    revision INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE applications (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    created TEXT NOT NULL
);

CREATE TABLE callbacks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    base TEXT NOT NULL,
    app_id INTEGER REFERENCES applications(id) ON DELETE SET NULL
);
"#;
