//! SQLite storage bootstrap, schema migrations and write scoping.
//!
//! # Responsibility
//! - Open and configure SQLite connections for the unit core.
//! - Apply schema migrations in deterministic order.
//! - Provide the single write-transaction primitive used by repositories.
//!
//! # Invariants
//! - Migration version is tracked via `PRAGMA user_version`.
//! - Core code must not read/write unit data before migrations succeed.
//! - Read-then-write sequences run under an `IMMEDIATE` transaction, so two
//!   writers on the same database are serialized by SQLite's write lock.

use rusqlite::{Connection, ErrorCode, Transaction, TransactionBehavior};
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod migrations;
mod open;

pub use open::{open_db, open_db_in_memory, open_db_with};

pub type DbResult<T> = Result<T, DbError>;

#[derive(Debug)]
pub enum DbError {
    Sqlite(rusqlite::Error),
    UnsupportedSchemaVersion {
        db_version: u32,
        latest_supported: u32,
    },
}

impl DbError {
    /// Returns whether the failure came from lock contention with another writer.
    pub fn is_busy(&self) -> bool {
        match self {
            Self::Sqlite(err) => is_busy_error(err),
            Self::UnsupportedSchemaVersion { .. } => false,
        }
    }
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "{err}"),
            Self::UnsupportedSchemaVersion {
                db_version,
                latest_supported,
            } => write!(
                f,
                "database schema version {db_version} is newer than supported {latest_supported}"
            ),
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            Self::UnsupportedSchemaVersion { .. } => None,
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}

/// Returns whether a SQLite error is a busy/locked condition.
pub fn is_busy_error(err: &rusqlite::Error) -> bool {
    matches!(
        err.sqlite_error_code(),
        Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked)
    )
}

/// Write transaction that either owns an `IMMEDIATE` transaction or joins the
/// transaction already open on the connection.
///
/// Dropping an owned scope without [`WriteScope::commit`] rolls it back.
pub struct WriteScope<'conn> {
    tx: Option<Transaction<'conn>>,
}

impl<'conn> WriteScope<'conn> {
    /// Starts a write scope on `conn`.
    ///
    /// When the connection is in autocommit mode a new `IMMEDIATE` transaction
    /// is started; otherwise statements run inside the caller's transaction and
    /// the caller stays responsible for commit/rollback.
    pub fn begin(conn: &'conn Connection) -> rusqlite::Result<Self> {
        if conn.is_autocommit() {
            let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
            return Ok(Self { tx: Some(tx) });
        }
        Ok(Self { tx: None })
    }

    /// Commits the owned transaction. No-op for joined scopes.
    pub fn commit(self) -> rusqlite::Result<()> {
        if let Some(tx) = self.tx {
            tx.commit()?;
        }
        Ok(())
    }
}
