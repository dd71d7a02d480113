//! Temporal history reconciler: stores dated records without overlap.
//!
//! # Responsibility
//! - Persist history records of every kind through one save path.
//! - Trim, split, delete or merge neighbouring records so the stored
//!   intervals of one member and one non-overlap key never overlap.
//!
//! # Invariants
//! - A save is atomic: the reconciled neighbours and the record itself
//!   commit together or not at all.
//! - Degenerate records are pruned, never stored and never reported as errors.
//! - Exclusive kinds hold at most one record per member and start date.

use crate::db::{is_busy_error, DbError, WriteScope};
use crate::model::history::{
    plan_overlap_resolution, DateInterval, HistoryKind, HistoryPayload, HistoryRecord,
    HistoryRecordId, IntervalAdjustment,
};
use crate::model::user::{UserId, UserStatus};
use crate::repo::{
    ensure_schema_ready, now_millis, parse_uuid, InvalidData, Retryable, SchemaError, TableSpec,
};
use chrono::NaiveDate;
use log::info;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension, Row};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Result type used by history operations.
pub type HistoryResult<T> = Result<T, HistoryError>;

/// Errors from history operations.
#[derive(Debug)]
pub enum HistoryError {
    /// Underlying SQLite/bootstrap error.
    Db(DbError),
    /// Another writer holds the database; the save can be retried wholesale.
    Conflict(DbError),
    /// Record id does not exist for the kind.
    NotFound { kind: HistoryKind, id: HistoryRecordId },
    /// End date precedes start date.
    InvalidRange { start: NaiveDate, end: NaiveDate },
    /// Persisted data cannot be converted to valid read model.
    InvalidData(String),
    /// Connection is not ready.
    Schema(SchemaError),
}

impl Retryable for HistoryError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

impl Display for HistoryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::Conflict(err) => write!(f, "history conflict, retry the operation: {err}"),
            Self::NotFound { kind, id } => {
                write!(f, "history record not found in {}: {id}", kind.table())
            }
            Self::InvalidRange { start, end } => {
                write!(f, "history end date {end} precedes start date {start}")
            }
            Self::InvalidData(message) => write!(f, "invalid history data: {message}"),
            Self::Schema(err) => write!(f, "{err}"),
        }
    }
}

impl Error for HistoryError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) | Self::Conflict(err) => Some(err),
            Self::Schema(err) => Some(err),
            Self::NotFound { .. } | Self::InvalidRange { .. } | Self::InvalidData(_) => None,
        }
    }
}

impl From<rusqlite::Error> for HistoryError {
    fn from(value: rusqlite::Error) -> Self {
        if is_busy_error(&value) {
            return Self::Conflict(DbError::Sqlite(value));
        }
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<SchemaError> for HistoryError {
    fn from(value: SchemaError) -> Self {
        Self::Schema(value)
    }
}

impl From<InvalidData> for HistoryError {
    fn from(value: InvalidData) -> Self {
        Self::InvalidData(value.0)
    }
}

/// How a save landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// New row stored.
    Inserted(HistoryRecordId),
    /// Existing row rewritten in place.
    Updated(HistoryRecordId),
    /// Folded into the exclusive-mode record sharing its start date.
    Merged(HistoryRecordId),
    /// Degenerate; nothing stored (a persisted copy was removed).
    Pruned,
}

/// Save outcome plus what happened to neighbouring records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaveReport {
    pub outcome: SaveOutcome,
    pub deleted: usize,
    pub trimmed: usize,
    pub split: usize,
}

impl SaveReport {
    fn new(outcome: SaveOutcome) -> Self {
        Self {
            outcome,
            deleted: 0,
            trimmed: 0,
            split: 0,
        }
    }

    /// Id of the stored row, `None` when pruned.
    pub fn record_id(&self) -> Option<HistoryRecordId> {
        match self.outcome {
            SaveOutcome::Inserted(id) | SaveOutcome::Updated(id) | SaveOutcome::Merged(id) => {
                Some(id)
            }
            SaveOutcome::Pruned => None,
        }
    }

    fn outcome_label(&self) -> &'static str {
        match self.outcome {
            SaveOutcome::Inserted(_) => "inserted",
            SaveOutcome::Updated(_) => "updated",
            SaveOutcome::Merged(_) => "merged",
            SaveOutcome::Pruned => "pruned",
        }
    }
}

/// Repository interface for dated member history.
pub trait HistoryRepository {
    /// Inserts (`id == None`) or updates a record, reconciling neighbours.
    fn save(&self, record: &HistoryRecord) -> HistoryResult<SaveReport>;
    /// Loads one record.
    fn get(&self, kind: HistoryKind, id: HistoryRecordId) -> HistoryResult<Option<HistoryRecord>>;
    /// Lists a member's records of one kind, newest start first.
    fn list_for_user(&self, user_id: UserId, kind: HistoryKind)
        -> HistoryResult<Vec<HistoryRecord>>;
    /// Lists a member's records of one kind active on `date`.
    fn active_on(
        &self,
        user_id: UserId,
        kind: HistoryKind,
        date: NaiveDate,
    ) -> HistoryResult<Vec<HistoryRecord>>;
    /// Lists a member's open-ended records of one kind.
    fn open_records(&self, user_id: UserId, kind: HistoryKind)
        -> HistoryResult<Vec<HistoryRecord>>;
    /// Deletes one record.
    fn delete(&self, kind: HistoryKind, id: HistoryRecordId) -> HistoryResult<()>;
}

/// SQLite-backed history reconciler.
pub struct SqliteHistoryRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteHistoryRepository<'conn> {
    /// Creates repository from migrated connection.
    pub fn try_new(conn: &'conn Connection) -> HistoryResult<Self> {
        ensure_history_connection_ready(conn)?;
        Ok(Self { conn })
    }

    fn reconcile(&self, record: &HistoryRecord) -> HistoryResult<SaveReport> {
        let kind = record.kind();
        let table = kind.table();
        let interval = record.interval();

        if let Some(id) = record.id {
            if !row_exists(self.conn, kind, id)? {
                return Err(HistoryError::NotFound { kind, id });
            }
        }

        if interval.is_degenerate() {
            let mut report = SaveReport::new(SaveOutcome::Pruned);
            if let Some(id) = record.id {
                delete_row(self.conn, kind, id)?;
                report.deleted = 1;
            }
            return Ok(report);
        }

        let merge_target = if kind.is_exclusive() {
            same_start_record(self.conn, kind, record)?
        } else {
            None
        };
        if let (Some(_), Some(own_id)) = (merge_target, record.id) {
            // The logical entry moved onto the same-start record.
            delete_row(self.conn, kind, own_id)?;
        }

        let excluded: Vec<HistoryRecordId> =
            record.id.into_iter().chain(merge_target).collect();
        let candidates = scope_intervals(self.conn, record, &excluded)?;

        let mut report = SaveReport::new(SaveOutcome::Pruned);
        for adjustment in plan_overlap_resolution(interval, &candidates) {
            match adjustment {
                IntervalAdjustment::Delete { id } => {
                    delete_row(self.conn, kind, id)?;
                    report.deleted += 1;
                }
                IntervalAdjustment::TrimEnd { id, end } => {
                    self.conn.execute(
                        &format!(
                            "UPDATE {table} SET end_date = ?2, updated_at = ?3 WHERE id = ?1;"
                        ),
                        rusqlite::params![id, end, now_millis()],
                    )?;
                    report.trimmed += 1;
                }
                IntervalAdjustment::TrimStart { id, start } => {
                    self.conn.execute(
                        &format!(
                            "UPDATE {table} SET start_date = ?2, updated_at = ?3 WHERE id = ?1;"
                        ),
                        rusqlite::params![id, start, now_millis()],
                    )?;
                    report.trimmed += 1;
                }
                IntervalAdjustment::Split { id, end, remnant } => {
                    let payload_columns = kind.payload_columns().join(", ");
                    self.conn.execute(
                        &format!(
                            "INSERT INTO {table} (user_id, start_date, end_date, {payload_columns})
                             SELECT user_id, ?2, ?3, {payload_columns}
                             FROM {table}
                             WHERE id = ?1;"
                        ),
                        rusqlite::params![id, remnant.start, remnant.end],
                    )?;
                    self.conn.execute(
                        &format!(
                            "UPDATE {table} SET end_date = ?2, updated_at = ?3 WHERE id = ?1;"
                        ),
                        rusqlite::params![id, end, now_millis()],
                    )?;
                    report.split += 1;
                }
            }
        }

        report.outcome = match (merge_target, record.id) {
            (Some(target), _) => {
                update_row(self.conn, target, record)?;
                SaveOutcome::Merged(target)
            }
            (None, Some(id)) => {
                update_row(self.conn, id, record)?;
                SaveOutcome::Updated(id)
            }
            (None, None) => SaveOutcome::Inserted(insert_row(self.conn, record)?),
        };
        Ok(report)
    }

    fn query_records(
        &self,
        kind: HistoryKind,
        filter: &str,
        values: Vec<Value>,
    ) -> HistoryResult<Vec<HistoryRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM {} WHERE {filter} ORDER BY start_date DESC, id DESC;",
            select_columns(kind),
            kind.table()
        ))?;
        let mut rows = stmt.query(params_from_iter(values))?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            records.push(parse_history_row(kind, row)?);
        }
        Ok(records)
    }
}

impl HistoryRepository for SqliteHistoryRepository<'_> {
    fn save(&self, record: &HistoryRecord) -> HistoryResult<SaveReport> {
        if record.interval().is_inverted() {
            if let Some(end) = record.end_date {
                return Err(HistoryError::InvalidRange {
                    start: record.start_date,
                    end,
                });
            }
        }

        let write = WriteScope::begin(self.conn)?;
        let report = self.reconcile(record)?;
        write.commit()?;

        info!(
            "event=history_save module=repo status=ok table={} outcome={} deleted={} trimmed={} split={}",
            record.kind().table(),
            report.outcome_label(),
            report.deleted,
            report.trimmed,
            report.split
        );
        Ok(report)
    }

    fn get(&self, kind: HistoryKind, id: HistoryRecordId) -> HistoryResult<Option<HistoryRecord>> {
        let mut records = self.query_records(kind, "id = ?", vec![Value::Integer(id)])?;
        Ok(records.pop())
    }

    fn list_for_user(
        &self,
        user_id: UserId,
        kind: HistoryKind,
    ) -> HistoryResult<Vec<HistoryRecord>> {
        self.query_records(kind, "user_id = ?", vec![Value::Text(user_id.to_string())])
    }

    fn active_on(
        &self,
        user_id: UserId,
        kind: HistoryKind,
        date: NaiveDate,
    ) -> HistoryResult<Vec<HistoryRecord>> {
        let day = date_value(date);
        self.query_records(
            kind,
            "user_id = ? AND start_date <= ? AND (end_date IS NULL OR end_date >= ?)",
            vec![Value::Text(user_id.to_string()), day.clone(), day],
        )
    }

    fn open_records(
        &self,
        user_id: UserId,
        kind: HistoryKind,
    ) -> HistoryResult<Vec<HistoryRecord>> {
        self.query_records(
            kind,
            "user_id = ? AND end_date IS NULL",
            vec![Value::Text(user_id.to_string())],
        )
    }

    fn delete(&self, kind: HistoryKind, id: HistoryRecordId) -> HistoryResult<()> {
        let changed = delete_row(self.conn, kind, id)?;
        if changed == 0 {
            return Err(HistoryError::NotFound { kind, id });
        }
        info!(
            "event=history_delete module=repo status=ok table={} id={}",
            kind.table(),
            id
        );
        Ok(())
    }
}

fn date_value(date: NaiveDate) -> Value {
    Value::Text(date.format("%Y-%m-%d").to_string())
}

fn optional_date_value(date: Option<NaiveDate>) -> Value {
    date.map_or(Value::Null, date_value)
}

fn payload_values(payload: &HistoryPayload) -> Vec<Value> {
    match payload {
        HistoryPayload::SectionAssignment { section_id } => vec![Value::Integer(*section_id)],
        HistoryPayload::RoleAssignment {
            role_id,
            role_name_at_assignment,
            section_id,
        } => vec![
            Value::from(*role_id),
            Value::Text(role_name_at_assignment.clone()),
            Value::Integer(*section_id),
        ],
        HistoryPayload::Username { username } => vec![Value::Text(username.clone())],
        HistoryPayload::UserStatus { status } => vec![Value::Text(status.as_str().to_string())],
    }
}

/// Values of the non-overlap columns, in declaration order.
fn non_overlap_values(payload: &HistoryPayload) -> Vec<Value> {
    match payload {
        HistoryPayload::RoleAssignment { role_id, .. } => vec![Value::from(*role_id)],
        HistoryPayload::SectionAssignment { .. }
        | HistoryPayload::Username { .. }
        | HistoryPayload::UserStatus { .. } => Vec::new(),
    }
}

fn select_columns(kind: HistoryKind) -> String {
    let mut columns = vec!["id", "user_id", "start_date", "end_date"];
    columns.extend_from_slice(kind.payload_columns());
    columns.join(", ")
}

fn row_exists(conn: &Connection, kind: HistoryKind, id: HistoryRecordId) -> HistoryResult<bool> {
    let found: Option<i64> = conn
        .query_row(
            &format!("SELECT id FROM {} WHERE id = ?1;", kind.table()),
            [id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

fn delete_row(conn: &Connection, kind: HistoryKind, id: HistoryRecordId) -> HistoryResult<usize> {
    let changed = conn.execute(&format!("DELETE FROM {} WHERE id = ?1;", kind.table()), [id])?;
    Ok(changed)
}

/// Another record of the same member starting on the same day.
fn same_start_record(
    conn: &Connection,
    kind: HistoryKind,
    record: &HistoryRecord,
) -> HistoryResult<Option<HistoryRecordId>> {
    let found = conn
        .query_row(
            &format!(
                "SELECT id FROM {}
                 WHERE user_id = ?1 AND start_date = ?2 AND id IS NOT ?3
                 ORDER BY id ASC
                 LIMIT 1;",
                kind.table()
            ),
            rusqlite::params![record.user_id.to_string(), record.start_date, record.id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found)
}

/// Intervals of the member's records sharing `record`'s non-overlap key.
fn scope_intervals(
    conn: &Connection,
    record: &HistoryRecord,
    excluded: &[HistoryRecordId],
) -> HistoryResult<Vec<(HistoryRecordId, DateInterval)>> {
    let kind = record.kind();
    let mut filter = vec!["user_id = ?".to_string()];
    let mut values = vec![Value::Text(record.user_id.to_string())];
    for (column, value) in kind
        .non_overlap_columns()
        .iter()
        .zip(non_overlap_values(&record.payload))
    {
        filter.push(format!("{column} IS ?"));
        values.push(value);
    }

    let mut stmt = conn.prepare(&format!(
        "SELECT id, start_date, end_date FROM {} WHERE {} ORDER BY start_date ASC, id ASC;",
        kind.table(),
        filter.join(" AND ")
    ))?;
    let mut rows = stmt.query(params_from_iter(values))?;
    let mut intervals = Vec::new();
    while let Some(row) = rows.next()? {
        let id: HistoryRecordId = row.get(0)?;
        if excluded.contains(&id) {
            continue;
        }
        intervals.push((id, DateInterval::new(row.get(1)?, row.get(2)?)));
    }
    Ok(intervals)
}

fn insert_row(conn: &Connection, record: &HistoryRecord) -> HistoryResult<HistoryRecordId> {
    let kind = record.kind();
    let payload_columns = kind.payload_columns();
    let placeholders = vec!["?"; 3 + payload_columns.len()].join(", ");
    let mut values = vec![
        Value::Text(record.user_id.to_string()),
        date_value(record.start_date),
        optional_date_value(record.end_date),
    ];
    values.extend(payload_values(&record.payload));

    conn.execute(
        &format!(
            "INSERT INTO {} (user_id, start_date, end_date, {}) VALUES ({placeholders});",
            kind.table(),
            payload_columns.join(", ")
        ),
        params_from_iter(values),
    )?;
    Ok(conn.last_insert_rowid())
}

fn update_row(
    conn: &Connection,
    id: HistoryRecordId,
    record: &HistoryRecord,
) -> HistoryResult<()> {
    let kind = record.kind();
    let assignments = kind
        .payload_columns()
        .iter()
        .map(|column| format!("{column} = ?"))
        .collect::<Vec<_>>()
        .join(", ");
    let mut values = vec![
        Value::Text(record.user_id.to_string()),
        date_value(record.start_date),
        optional_date_value(record.end_date),
    ];
    values.extend(payload_values(&record.payload));
    values.push(Value::Integer(now_millis()));
    values.push(Value::Integer(id));

    conn.execute(
        &format!(
            "UPDATE {} SET user_id = ?, start_date = ?, end_date = ?, {assignments}, updated_at = ?
             WHERE id = ?;",
            kind.table()
        ),
        params_from_iter(values),
    )?;
    Ok(())
}

fn parse_history_row(kind: HistoryKind, row: &Row<'_>) -> HistoryResult<HistoryRecord> {
    let user_text: String = row.get("user_id")?;
    let user_id = parse_uuid(&user_text, "history.user_id")?;
    let payload = match kind {
        HistoryKind::SectionAssignment => HistoryPayload::SectionAssignment {
            section_id: row.get("section_id")?,
        },
        HistoryKind::RoleAssignment => HistoryPayload::RoleAssignment {
            role_id: row.get("role_id")?,
            role_name_at_assignment: row.get("role_name_at_assignment")?,
            section_id: row.get("section_id")?,
        },
        HistoryKind::Username => HistoryPayload::Username {
            username: row.get("username")?,
        },
        HistoryKind::UserStatus => {
            let status_text: String = row.get("status")?;
            let status = UserStatus::parse(&status_text).ok_or_else(|| {
                HistoryError::InvalidData(format!(
                    "invalid status `{status_text}` in history_user_statuses.status"
                ))
            })?;
            HistoryPayload::UserStatus { status }
        }
    };

    Ok(HistoryRecord {
        id: Some(row.get("id")?),
        user_id,
        start_date: row.get("start_date")?,
        end_date: row.get("end_date")?,
        payload,
    })
}

fn ensure_history_connection_ready(conn: &Connection) -> Result<(), SchemaError> {
    let specs: Vec<TableSpec> = HistoryKind::ALL
        .iter()
        .map(|kind| TableSpec {
            name: kind.table(),
            columns: &["id", "user_id", "start_date", "end_date", "updated_at"],
        })
        .collect();
    ensure_schema_ready(conn, &specs)?;
    for kind in HistoryKind::ALL {
        ensure_schema_ready(
            conn,
            &[TableSpec {
                name: kind.table(),
                columns: kind.payload_columns(),
            }],
        )?;
    }
    Ok(())
}
