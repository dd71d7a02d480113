//! Repository layer abstractions and persistence implementations.
//!
//! # Responsibility
//! - Define use-case oriented data access contracts.
//! - Isolate SQLite query details from service orchestration.
//! - Own every multi-statement transaction.
//!
//! # Invariants
//! - Repositories are constructed only over a fully migrated connection.
//! - Lock contention is reported as a retryable `Conflict`, never as a
//!   generic database failure.
//! - Repository APIs return semantic errors (`NotFound`) in addition to DB
//!   transport errors.

use crate::db::migrations::latest_version;
use crate::db::{is_busy_error, DbError, WriteScope};
use crate::repo::ordering_repo::OrderingError;
use chrono::{DateTime, Utc};
use log::warn;
use rusqlite::Connection;
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

pub mod application_repo;
pub mod attendance_repo;
pub mod history_repo;
pub mod orbat_repo;
pub mod ordering_repo;
pub mod timeline_repo;
pub mod training_repo;
pub mod user_repo;

/// Result type used by entity repositories.
pub type RepoResult<T> = Result<T, RepoError>;

/// Failures that a caller may resolve by re-running the whole operation.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

/// Runs `op` until it succeeds, fails with a non-retryable error, or
/// `max_attempts` is reached. `max_attempts == 0` is treated as one attempt.
pub fn retry_on_conflict<T, E, F>(max_attempts: u32, mut op: F) -> Result<T, E>
where
    E: Retryable + Display,
    F: FnMut() -> Result<T, E>,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op() {
            Err(err) if err.is_retryable() && attempt < max_attempts => {
                warn!(
                    "event=conflict_retry module=repo status=retry attempt={} max_attempts={} error={}",
                    attempt, max_attempts, err
                );
                attempt += 1;
            }
            result => return result,
        }
    }
}

/// Repositories able to group several writes into one transaction.
pub trait WriteScoped {
    /// Runs `op` inside one write transaction on this repository's connection.
    /// Other repositories sharing the connection join it; an error from `op`
    /// rolls everything back.
    fn in_write_scope<T, E, F>(&self, op: F) -> Result<T, E>
    where
        E: From<RepoError>,
        F: FnOnce() -> Result<T, E>;
}

pub(crate) fn run_in_write_scope<T, E, F>(conn: &Connection, op: F) -> Result<T, E>
where
    E: From<RepoError>,
    F: FnOnce() -> Result<T, E>,
{
    let scope = WriteScope::begin(conn).map_err(RepoError::from)?;
    let value = op()?;
    scope.commit().map_err(RepoError::from)?;
    Ok(value)
}

/// Schema readiness failures raised by repository constructors.
#[derive(Debug)]
pub enum SchemaError {
    /// Connection schema is not at the expected migrated version.
    UninitializedConnection {
        expected_version: u32,
        actual_version: u32,
    },
    /// Required table is missing.
    MissingRequiredTable(&'static str),
    /// Required column is missing from expected table.
    MissingRequiredColumn {
        table: &'static str,
        column: &'static str,
    },
    Db(DbError),
}

impl Display for SchemaError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UninitializedConnection {
                expected_version,
                actual_version,
            } => write!(
                f,
                "repository requires schema version {expected_version}, got {actual_version}"
            ),
            Self::MissingRequiredTable(table) => write!(f, "repository requires table `{table}`"),
            Self::MissingRequiredColumn { table, column } => write!(
                f,
                "repository requires column `{column}` in table `{table}`"
            ),
            Self::Db(err) => write!(f, "{err}"),
        }
    }
}

impl Error for SchemaError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for SchemaError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Persisted value that cannot be converted into the read model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct InvalidData(pub(crate) String);

/// Errors from entity repositories (ORBAT, users, attendance, training, timeline).
#[derive(Debug)]
pub enum RepoError {
    /// Underlying SQLite/bootstrap error.
    Db(DbError),
    /// Another writer holds the database lock; safe to retry.
    Conflict(DbError),
    /// Target row does not exist.
    NotFound { entity: &'static str, id: String },
    /// Persisted data cannot be converted to valid read model.
    InvalidData(String),
    /// Connection is not ready for this repository.
    Schema(SchemaError),
}

impl RepoError {
    pub(crate) fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

impl Retryable for RepoError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::Conflict(err) => write!(f, "write conflict, retry the operation: {err}"),
            Self::NotFound { entity, id } => write!(f, "{entity} not found: {id}"),
            Self::InvalidData(message) => write!(f, "invalid data: {message}"),
            Self::Schema(err) => write!(f, "{err}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) | Self::Conflict(err) => Some(err),
            Self::Schema(err) => Some(err),
            Self::NotFound { .. } | Self::InvalidData(_) => None,
        }
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        if value.is_busy() {
            return Self::Conflict(value);
        }
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        if is_busy_error(&value) {
            return Self::Conflict(DbError::Sqlite(value));
        }
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<SchemaError> for RepoError {
    fn from(value: SchemaError) -> Self {
        Self::Schema(value)
    }
}

impl From<InvalidData> for RepoError {
    fn from(value: InvalidData) -> Self {
        Self::InvalidData(value.0)
    }
}

impl From<OrderingError> for RepoError {
    fn from(value: OrderingError) -> Self {
        match value {
            OrderingError::Db(err) => Self::Db(err),
            OrderingError::Conflict(err) => Self::Conflict(err),
            OrderingError::NotFound { table, id } => Self::not_found(table, id),
            OrderingError::InvalidData(message) => Self::InvalidData(message),
            OrderingError::Schema(err) => Self::Schema(err),
        }
    }
}

/// Table and the columns a repository depends on.
pub(crate) struct TableSpec {
    pub(crate) name: &'static str,
    pub(crate) columns: &'static [&'static str],
}

/// Verifies migration version, tables and columns before a repository is used.
pub(crate) fn ensure_schema_ready(
    conn: &Connection,
    tables: &[TableSpec],
) -> Result<(), SchemaError> {
    let expected_version = latest_version();
    let actual_version: u32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    if actual_version != expected_version {
        return Err(SchemaError::UninitializedConnection {
            expected_version,
            actual_version,
        });
    }

    for table in tables {
        if !table_exists(conn, table.name)? {
            return Err(SchemaError::MissingRequiredTable(table.name));
        }
        for column in table.columns {
            if !table_has_column(conn, table.name, column)? {
                return Err(SchemaError::MissingRequiredColumn {
                    table: table.name,
                    column,
                });
            }
        }
    }
    Ok(())
}

fn table_exists(conn: &Connection, table: &str) -> rusqlite::Result<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1
            FROM sqlite_master
            WHERE type = 'table' AND name = ?1
        );",
        [table],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> rusqlite::Result<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table});"))?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let current: String = row.get(1)?;
        if current == column {
            return Ok(true);
        }
    }
    Ok(false)
}

pub(crate) fn parse_uuid(value: &str, column: &'static str) -> Result<Uuid, InvalidData> {
    Uuid::parse_str(value)
        .map_err(|_| InvalidData(format!("invalid uuid `{value}` in {column}")))
}

pub(crate) fn parse_bool(value: i64, column: &'static str) -> Result<bool, InvalidData> {
    match value {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(InvalidData(format!(
            "invalid boolean value `{other}` in {column}"
        ))),
    }
}

pub(crate) fn bool_to_int(value: bool) -> i64 {
    if value {
        1
    } else {
        0
    }
}

pub(crate) fn millis_to_datetime(
    value: i64,
    column: &'static str,
) -> Result<DateTime<Utc>, InvalidData> {
    DateTime::from_timestamp_millis(value)
        .ok_or_else(|| InvalidData(format!("invalid epoch ms `{value}` in {column}")))
}

pub(crate) fn datetime_to_millis(value: DateTime<Utc>) -> i64 {
    value.timestamp_millis()
}

pub(crate) fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::{retry_on_conflict, Retryable};
    use std::cell::Cell;
    use std::fmt::{Display, Formatter};

    #[derive(Debug)]
    struct Flaky(bool);

    impl Display for Flaky {
        fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
            write!(f, "flaky retryable={}", self.0)
        }
    }

    impl Retryable for Flaky {
        fn is_retryable(&self) -> bool {
            self.0
        }
    }

    #[test]
    fn retries_until_success() {
        let calls = Cell::new(0);
        let result = retry_on_conflict(3, || {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(Flaky(true))
            } else {
                Ok(calls.get())
            }
        });
        assert_eq!(result.unwrap(), 3);
    }

    #[test]
    fn stops_on_non_retryable_error_and_attempt_limit() {
        let calls = Cell::new(0);
        let result: Result<(), Flaky> = retry_on_conflict(5, || {
            calls.set(calls.get() + 1);
            Err(Flaky(false))
        });
        assert!(result.is_err());
        assert_eq!(calls.get(), 1);

        calls.set(0);
        let result: Result<(), Flaky> = retry_on_conflict(2, || {
            calls.set(calls.get() + 1);
            Err(Flaky(true))
        });
        assert!(result.is_err());
        assert_eq!(calls.get(), 2);
    }
}
