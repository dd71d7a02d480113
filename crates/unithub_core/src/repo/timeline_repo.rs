//! Timeline repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Append member timeline entries.
//! - Translate [`TimelineQuery`] filters into SQL.
//!
//! # Invariants
//! - Entries are never updated after insert.
//! - Listing order is `occurred_at DESC, id DESC`.

use crate::model::timeline::{
    NewTimelineEntry, TimelineEntry, TimelineEntryId, TimelineEventType, TimelineQuery,
};
use crate::model::user::UserId;
use crate::repo::{
    datetime_to_millis, ensure_schema_ready, millis_to_datetime, parse_uuid, RepoError,
    RepoResult, TableSpec,
};
use log::debug;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, Row};

const ENTRY_COLUMNS: &str =
    "id, user_id, section_id, occurred_at, event_type, snapshot_name, description";

/// Repository interface for timeline entries.
pub trait TimelineRepository {
    fn add_entry(&self, entry: &NewTimelineEntry) -> RepoResult<TimelineEntry>;
    fn list_entries(&self, query: &TimelineQuery) -> RepoResult<Vec<TimelineEntry>>;
    fn list_for_user(&self, user_id: UserId) -> RepoResult<Vec<TimelineEntry>>;
}

/// SQLite-backed timeline repository.
pub struct SqliteTimelineRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteTimelineRepository<'conn> {
    /// Creates repository from migrated connection.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_schema_ready(
            conn,
            &[TableSpec {
                name: "timeline_entries",
                columns: &[
                    "id",
                    "user_id",
                    "section_id",
                    "occurred_at",
                    "event_type",
                    "snapshot_name",
                    "description",
                ],
            }],
        )?;
        Ok(Self { conn })
    }
}

impl TimelineRepository for SqliteTimelineRepository<'_> {
    fn add_entry(&self, entry: &NewTimelineEntry) -> RepoResult<TimelineEntry> {
        self.conn.execute(
            "INSERT INTO timeline_entries (
                user_id,
                section_id,
                occurred_at,
                event_type,
                snapshot_name,
                description
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6);",
            params![
                entry.user_id.to_string(),
                entry.section_id,
                datetime_to_millis(entry.occurred_at),
                entry.event_type.as_str(),
                entry.snapshot_name,
                entry.description,
            ],
        )?;
        let id: TimelineEntryId = self.conn.last_insert_rowid();
        debug!(
            "event=timeline_add module=repo status=ok id={} event_type={}",
            id,
            entry.event_type.as_str()
        );
        Ok(TimelineEntry {
            id,
            user_id: entry.user_id,
            section_id: entry.section_id,
            occurred_at: entry.occurred_at,
            event_type: entry.event_type,
            snapshot_name: entry.snapshot_name.clone(),
            description: entry.description.clone(),
        })
    }

    fn list_entries(&self, query: &TimelineQuery) -> RepoResult<Vec<TimelineEntry>> {
        let (sql, values) = build_list_query(query);
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(values))?;
        let mut entries = Vec::new();
        while let Some(row) = rows.next()? {
            entries.push(parse_entry_row(row)?);
        }
        Ok(entries)
    }

    fn list_for_user(&self, user_id: UserId) -> RepoResult<Vec<TimelineEntry>> {
        self.list_entries(&TimelineQuery {
            user_ids: vec![user_id],
            ..TimelineQuery::default()
        })
    }
}

fn build_list_query(query: &TimelineQuery) -> (String, Vec<Value>) {
    let mut clauses = Vec::new();
    let mut values = Vec::new();

    if !query.user_ids.is_empty() {
        clauses.push(format!(
            "user_id IN ({})",
            placeholders(query.user_ids.len())
        ));
        values.extend(query.user_ids.iter().map(|id| Value::Text(id.to_string())));
    }
    if let Some(section_id) = query.section_id {
        clauses.push("section_id = ?".to_string());
        values.push(Value::Integer(section_id));
    }
    if let Some(since) = query.since {
        clauses.push("occurred_at >= ?".to_string());
        values.push(Value::Integer(datetime_to_millis(since)));
    }
    if let Some(until) = query.until {
        clauses.push("occurred_at <= ?".to_string());
        values.push(Value::Integer(datetime_to_millis(until)));
    }
    if !query.event_types.is_empty() {
        clauses.push(format!(
            "event_type IN ({})",
            placeholders(query.event_types.len())
        ));
        values.extend(type_values(&query.event_types));
    }
    if !query.exclude_types.is_empty() {
        clauses.push(format!(
            "event_type NOT IN ({})",
            placeholders(query.exclude_types.len())
        ));
        values.extend(type_values(&query.exclude_types));
    }

    let mut sql = format!("SELECT {ENTRY_COLUMNS} FROM timeline_entries");
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    sql.push_str(" ORDER BY occurred_at DESC, id DESC");
    if let Some(limit) = query.limit {
        sql.push_str(" LIMIT ?");
        values.push(Value::Integer(i64::from(limit)));
    }
    sql.push(';');
    (sql, values)
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

fn type_values(types: &[TimelineEventType]) -> impl Iterator<Item = Value> + '_ {
    types
        .iter()
        .map(|kind| Value::Text(kind.as_str().to_string()))
}

fn parse_entry_row(row: &Row<'_>) -> RepoResult<TimelineEntry> {
    let user_text: String = row.get("user_id")?;
    let type_text: String = row.get("event_type")?;
    let event_type = TimelineEventType::parse(&type_text).ok_or_else(|| {
        RepoError::InvalidData(format!(
            "invalid event type `{type_text}` in timeline_entries.event_type"
        ))
    })?;
    Ok(TimelineEntry {
        id: row.get("id")?,
        user_id: parse_uuid(&user_text, "timeline_entries.user_id")?,
        section_id: row.get("section_id")?,
        occurred_at: millis_to_datetime(row.get("occurred_at")?, "timeline_entries.occurred_at")?,
        event_type,
        snapshot_name: row.get("snapshot_name")?,
        description: row.get("description")?,
    })
}
