//! SQLite storage for the ledger
//!
//! ## Architecture
//!
//! - Diesel over an r2d2 pool of SQLite connections
//! - Repository functions take `&mut SqliteConnection` and never open
//!   transactions of their own beyond savepoints
//! - [`LedgerDb::write`] wraps a unit of work in `BEGIN IMMEDIATE`, so every
//!   read that guards a write sees the state the write commits against
//!
//! ## Tables
//!
//! - `users` - Accounts and the single community pool user
//! - `transactions` / `multi_transactions` - Immutable transfers and splits
//! - `communisms` / `communism_participants` - Shared-expense collections
//! - `ballots` / `votes` / `refunds` - Pool refund requests and their votes
//! - `applications` / `callbacks` - Notification subscribers

pub mod callbacks;
pub mod communisms;
pub mod diesel_schema;
pub mod models;
pub mod refunds;
pub mod schema;
pub mod transactions;
pub mod users;

use std::path::Path;
use std::time::Duration;

use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, CustomizeConnection, Pool, PooledConnection};
use tracing::{debug, info};

use crate::error::LedgerError;

pub type DbPool = Pool<ConnectionManager<SqliteConnection>>;
pub type PooledConn = PooledConnection<ConnectionManager<SqliteConnection>>;

/// File name of the ledger database inside the storage directory
pub const DATABASE_FILE: &str = "ledger.db";

/// Per-connection pragmas applied when the pool hands out a connection
#[derive(Debug, Clone, Copy)]
struct ConnectionOptions {
    wal: bool,
    busy_timeout: Duration,
}

impl CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for ConnectionOptions {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> Result<(), diesel::r2d2::Error> {
        let mut pragmas = format!(
            "PRAGMA busy_timeout = {}; PRAGMA foreign_keys = ON;",
            self.busy_timeout.as_millis()
        );
        if self.wal {
            pragmas.push_str(" PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;");
        }
        conn.batch_execute(&pragmas)
            .map_err(diesel::r2d2::Error::QueryError)
    }
}

/// Pooled SQLite database holding the ledger
pub struct LedgerDb {
    pool: DbPool,
}

impl LedgerDb {
    /// Open or create the ledger database in `storage_dir`
    pub fn open(storage_dir: &Path) -> Result<Self, LedgerError> {
        std::fs::create_dir_all(storage_dir)?;
        Self::open_file(&storage_dir.join(DATABASE_FILE))
    }

    /// Open or create a ledger database at an explicit file path
    pub fn open_file(path: &Path) -> Result<Self, LedgerError> {
        info!("Opening ledger database at {:?}", path);

        let manager = ConnectionManager::<SqliteConnection>::new(path.to_string_lossy());
        let pool = Pool::builder()
            .max_size(8)
            .connection_customizer(Box::new(ConnectionOptions {
                wal: true,
                busy_timeout: Duration::from_secs(5),
            }))
            .build(manager)
            .map_err(|e| LedgerError::Pool(format!("Failed to open SQLite: {}", e)))?;

        let db = Self { pool };
        db.init_schema()?;
        Ok(db)
    }

    /// Open an in-memory database (for testing)
    ///
    /// Every pooled connection would get its own empty database, so the
    /// pool is limited to a single connection.
    pub fn open_in_memory() -> Result<Self, LedgerError> {
        debug!("Opening in-memory ledger database");

        let manager = ConnectionManager::<SqliteConnection>::new(":memory:");
        let pool = Pool::builder()
            .max_size(1)
            .connection_customizer(Box::new(ConnectionOptions {
                wal: false,
                busy_timeout: Duration::from_secs(5),
            }))
            .build(manager)
            .map_err(|e| LedgerError::Pool(format!("Failed to open in-memory SQLite: {}", e)))?;

        let db = Self { pool };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<(), LedgerError> {
        let mut conn = self.conn()?;
        schema::init_schema(&mut conn)
    }

    /// Check out a pooled connection
    pub fn conn(&self) -> Result<PooledConn, LedgerError> {
        Ok(self.pool.get()?)
    }

    /// Run a read-only unit of work
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, LedgerError>
    where
        F: FnOnce(&mut SqliteConnection) -> Result<T, LedgerError>,
    {
        let mut conn = self.conn()?;
        f(&mut conn)
    }

    /// Run a unit of work inside `BEGIN IMMEDIATE ... COMMIT`
    ///
    /// Any error rolls back every change made by `f`.
    pub fn write<F, T>(&self, f: F) -> Result<T, LedgerError>
    where
        F: FnOnce(&mut SqliteConnection) -> Result<T, LedgerError>,
    {
        let mut conn = self.conn()?;
        conn.immediate_transaction(f)
    }

    /// Get database statistics
    pub fn stats(&self) -> Result<DbStats, LedgerError> {
        self.with_conn(|conn| {
            use diesel_schema::{communisms, refunds, transactions, users};

            Ok(DbStats {
                users: users::table.count().get_result(conn)?,
                transactions: transactions::table.count().get_result(conn)?,
                open_communisms: communisms::table
                    .filter(communisms::active.eq(true))
                    .count()
                    .get_result(conn)?,
                open_refunds: refunds::table
                    .filter(refunds::active.eq(true))
                    .count()
                    .get_result(conn)?,
            })
        })
    }
}

/// Database statistics
#[derive(Debug, Clone, serde::Serialize)]
pub struct DbStats {
    pub users: i64,
    pub transactions: i64,
    pub open_communisms: i64,
    pub open_refunds: i64,
}

/// Map a UNIQUE violation to `Conflict`, leaving other errors untouched
pub(crate) fn unique_conflict(e: diesel::result::Error, what: &str) -> LedgerError {
    use diesel::result::{DatabaseErrorKind, Error};

    match e {
        Error::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => {
            LedgerError::Conflict(format!("{} already exists", what))
        }
        other => LedgerError::Database(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_stats() {
        let db = LedgerDb::open_in_memory().unwrap();
        let stats = db.stats().unwrap();
        assert_eq!(stats.users, 0);
        assert_eq!(stats.transactions, 0);
    }

    #[test]
    fn test_write_rolls_back_on_error() {
        let db = LedgerDb::open_in_memory().unwrap();
        let result: Result<(), LedgerError> = db.write(|conn| {
            conn.batch_execute("INSERT INTO users (created, modified) VALUES ('t', 't')")?;
            Err(LedgerError::Internal("abort".into()))
        });
        assert!(result.is_err());
        assert_eq!(db.stats().unwrap().users, 0);
    }

    #[test]
    fn test_file_database_reopens() {
        let dir = tempfile::tempdir().unwrap();
        {
            let db = LedgerDb::open(dir.path()).unwrap();
            db.write(|conn| {
                conn.batch_execute("INSERT INTO users (created, modified) VALUES ('t', 't')")?;
                Ok(())
            })
            .unwrap();
        }
        let db = LedgerDb::open(dir.path()).unwrap();
        assert_eq!(db.stats().unwrap().users, 1);
    }
}
