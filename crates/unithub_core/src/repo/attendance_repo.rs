//! Event and attendance repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Persist scheduled events and per-member attendance windows.
//! - Persist event sign-ups in their per-event order.
//!
//! # Invariants
//! - `(event_id, user_id)` is unique for attendance rows and for sign-ups;
//!   `get_or_create_attendance` never produces a second row.
//! - Join/leave instants are stored as epoch milliseconds.
//! - New sign-ups are appended to their event; deleting one closes the gap.

use crate::db::WriteScope;
use crate::model::event::{
    Attendance, AttendanceId, Event, EventAssignment, EventAssignmentId, EventId, EventKind,
    EventPlacement, NewEvent, RsvpStatus,
};
use crate::model::orbat::SlotColour;
use crate::model::ordering::{ScopeKey, EVENT_ASSIGNMENTS};
use crate::model::user::UserId;
use crate::repo::ordering_repo::{next_order, renumber_scope};
use crate::repo::{
    bool_to_int, datetime_to_millis, ensure_schema_ready, millis_to_datetime, parse_bool,
    parse_uuid, run_in_write_scope, RepoError, RepoResult, TableSpec, WriteScoped,
};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use log::info;
use rusqlite::{params, Connection, OptionalExtension, Row};

const EVENT_COLUMNS: &str = "id, name, description, event_date, start_time, end_time, kind";
const ATTENDANCE_COLUMNS: &str =
    "id, event_id, user_id, first_join, last_seen, manual, left_early";
const SIGNUP_COLUMNS: &str =
    "id, event_id, user_id, status, role, colour, assigned_by, created_at, assigned_at, sort_order";

/// Repository interface for events and attendance.
pub trait AttendanceRepository: WriteScoped {
    fn create_event(&self, event: &NewEvent) -> RepoResult<Event>;
    fn get_event(&self, id: EventId) -> RepoResult<Option<Event>>;
    /// Lists events held on `date` by start time.
    fn list_events_on(&self, date: NaiveDate) -> RepoResult<Vec<Event>>;

    fn get_attendance(&self, event_id: EventId, user_id: UserId)
        -> RepoResult<Option<Attendance>>;
    /// Returns the existing row or inserts an empty one. The flag is `true`
    /// when the row was created.
    fn get_or_create_attendance(
        &self,
        event_id: EventId,
        user_id: UserId,
    ) -> RepoResult<(Attendance, bool)>;
    /// Writes every mutable field of an existing row.
    fn update_attendance(&self, attendance: &Attendance) -> RepoResult<()>;
    fn delete_attendance(&self, id: AttendanceId) -> RepoResult<()>;
    fn list_attendance_for_event(&self, event_id: EventId) -> RepoResult<Vec<Attendance>>;
    /// Removes rows of events on `date` that start after `after`.
    /// Returns the number of deleted rows.
    fn delete_attendance_for_events_after(
        &self,
        date: NaiveDate,
        after: NaiveTime,
    ) -> RepoResult<usize>;

    fn get_event_assignment(
        &self,
        event_id: EventId,
        user_id: UserId,
    ) -> RepoResult<Option<EventAssignment>>;
    /// Appends a sign-up to the end of its event.
    fn insert_event_assignment(
        &self,
        event_id: EventId,
        user_id: UserId,
        status: RsvpStatus,
        created_at: DateTime<Utc>,
    ) -> RepoResult<EventAssignment>;
    fn update_event_assignment_status(
        &self,
        id: EventAssignmentId,
        status: RsvpStatus,
    ) -> RepoResult<()>;
    /// Writes role, colour and placing member, stamping `assigned_at`.
    fn place_event_assignment(
        &self,
        id: EventAssignmentId,
        placement: &EventPlacement,
        at: DateTime<Utc>,
    ) -> RepoResult<()>;
    /// Deletes a sign-up and renumbers its event.
    fn delete_event_assignment(&self, id: EventAssignmentId) -> RepoResult<()>;
    /// Lists sign-ups of an event in position order.
    fn list_event_assignments(&self, event_id: EventId) -> RepoResult<Vec<EventAssignment>>;
}

/// SQLite-backed event and attendance repository.
pub struct SqliteAttendanceRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteAttendanceRepository<'conn> {
    /// Creates repository from migrated connection.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_schema_ready(
            conn,
            &[
                TableSpec {
                    name: "events",
                    columns: &[
                        "id",
                        "name",
                        "description",
                        "event_date",
                        "start_time",
                        "end_time",
                        "kind",
                    ],
                },
                TableSpec {
                    name: "attendances",
                    columns: &[
                        "id",
                        "event_id",
                        "user_id",
                        "first_join",
                        "last_seen",
                        "manual",
                        "left_early",
                    ],
                },
                TableSpec {
                    name: "event_assignments",
                    columns: &[
                        "id",
                        "event_id",
                        "user_id",
                        "status",
                        "role",
                        "colour",
                        "assigned_by",
                        "created_at",
                        "assigned_at",
                        "sort_order",
                    ],
                },
            ],
        )?;
        Ok(Self { conn })
    }
}

impl WriteScoped for SqliteAttendanceRepository<'_> {
    fn in_write_scope<T, E, F>(&self, op: F) -> Result<T, E>
    where
        E: From<RepoError>,
        F: FnOnce() -> Result<T, E>,
    {
        run_in_write_scope(self.conn, op)
    }
}

impl AttendanceRepository for SqliteAttendanceRepository<'_> {
    fn create_event(&self, event: &NewEvent) -> RepoResult<Event> {
        self.conn.execute(
            "INSERT INTO events (name, description, event_date, start_time, end_time, kind)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6);",
            params![
                event.name,
                event.description,
                event.date,
                event.start_time,
                event.end_time,
                event.kind.as_str(),
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        info!(
            "event=event_create module=repo status=ok id={} kind={}",
            id,
            event.kind.as_str()
        );
        Ok(Event {
            id,
            name: event.name.clone(),
            description: event.description.clone(),
            date: event.date,
            start_time: event.start_time,
            end_time: event.end_time,
            kind: event.kind,
        })
    }

    fn get_event(&self, id: EventId) -> RepoResult<Option<Event>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = ?1;"))?;
        let mut rows = stmt.query([id])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_event_row(row)?));
        }
        Ok(None)
    }

    fn list_events_on(&self, date: NaiveDate) -> RepoResult<Vec<Event>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {EVENT_COLUMNS}
             FROM events
             WHERE event_date = ?1
             ORDER BY start_time ASC, id ASC;"
        ))?;
        let mut rows = stmt.query([date])?;
        let mut events = Vec::new();
        while let Some(row) = rows.next()? {
            events.push(parse_event_row(row)?);
        }
        Ok(events)
    }

    fn get_attendance(
        &self,
        event_id: EventId,
        user_id: UserId,
    ) -> RepoResult<Option<Attendance>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {ATTENDANCE_COLUMNS}
             FROM attendances
             WHERE event_id = ?1 AND user_id = ?2;"
        ))?;
        let mut rows = stmt.query(params![event_id, user_id.to_string()])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_attendance_row(row)?));
        }
        Ok(None)
    }

    fn get_or_create_attendance(
        &self,
        event_id: EventId,
        user_id: UserId,
    ) -> RepoResult<(Attendance, bool)> {
        let scope = WriteScope::begin(self.conn)?;
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO attendances (event_id, user_id) VALUES (?1, ?2);",
            params![event_id, user_id.to_string()],
        )?;
        let attendance = self
            .get_attendance(event_id, user_id)?
            .ok_or_else(|| RepoError::not_found("attendance", format!("{event_id}/{user_id}")))?;
        scope.commit()?;
        Ok((attendance, inserted == 1))
    }

    fn update_attendance(&self, attendance: &Attendance) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE attendances
             SET first_join = ?2,
                 last_seen = ?3,
                 manual = ?4,
                 left_early = ?5
             WHERE id = ?1;",
            params![
                attendance.id,
                attendance.first_join.map(datetime_to_millis),
                attendance.last_seen.map(datetime_to_millis),
                bool_to_int(attendance.manual),
                bool_to_int(attendance.left_early),
            ],
        )?;
        if changed == 0 {
            return Err(RepoError::not_found("attendance", attendance.id));
        }
        Ok(())
    }

    fn delete_attendance(&self, id: AttendanceId) -> RepoResult<()> {
        let changed = self
            .conn
            .execute("DELETE FROM attendances WHERE id = ?1;", [id])?;
        if changed == 0 {
            return Err(RepoError::not_found("attendance", id));
        }
        Ok(())
    }

    fn list_attendance_for_event(&self, event_id: EventId) -> RepoResult<Vec<Attendance>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {ATTENDANCE_COLUMNS}
             FROM attendances
             WHERE event_id = ?1
             ORDER BY id ASC;"
        ))?;
        let mut rows = stmt.query([event_id])?;
        let mut attendances = Vec::new();
        while let Some(row) = rows.next()? {
            attendances.push(parse_attendance_row(row)?);
        }
        Ok(attendances)
    }

    fn delete_attendance_for_events_after(
        &self,
        date: NaiveDate,
        after: NaiveTime,
    ) -> RepoResult<usize> {
        let deleted = self.conn.execute(
            "DELETE FROM attendances
             WHERE event_id IN (
                 SELECT id FROM events WHERE event_date = ?1 AND start_time > ?2
             );",
            params![date, after],
        )?;
        Ok(deleted)
    }

    fn get_event_assignment(
        &self,
        event_id: EventId,
        user_id: UserId,
    ) -> RepoResult<Option<EventAssignment>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {SIGNUP_COLUMNS}
             FROM event_assignments
             WHERE event_id = ?1 AND user_id = ?2;"
        ))?;
        let mut rows = stmt.query(params![event_id, user_id.to_string()])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_signup_row(row)?));
        }
        Ok(None)
    }

    fn insert_event_assignment(
        &self,
        event_id: EventId,
        user_id: UserId,
        status: RsvpStatus,
        created_at: DateTime<Utc>,
    ) -> RepoResult<EventAssignment> {
        let scope = WriteScope::begin(self.conn)?;
        let sort_order = next_order(self.conn, EVENT_ASSIGNMENTS, &ScopeKey::of(event_id))?;
        self.conn.execute(
            "INSERT INTO event_assignments (event_id, user_id, status, created_at, sort_order)
             VALUES (?1, ?2, ?3, ?4, ?5);",
            params![
                event_id,
                user_id.to_string(),
                status.as_str(),
                datetime_to_millis(created_at),
                sort_order
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        scope.commit()?;

        info!(
            "event=event_signup_create module=repo status=ok id={} event_id={} sort_order={}",
            id, event_id, sort_order
        );
        Ok(EventAssignment {
            id,
            event_id,
            user_id,
            status,
            role: String::new(),
            colour: None,
            assigned_by: None,
            created_at,
            assigned_at: None,
            sort_order,
        })
    }

    fn update_event_assignment_status(
        &self,
        id: EventAssignmentId,
        status: RsvpStatus,
    ) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE event_assignments SET status = ?2 WHERE id = ?1;",
            params![id, status.as_str()],
        )?;
        if changed == 0 {
            return Err(RepoError::not_found("event assignment", id));
        }
        Ok(())
    }

    fn place_event_assignment(
        &self,
        id: EventAssignmentId,
        placement: &EventPlacement,
        at: DateTime<Utc>,
    ) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE event_assignments
             SET role = ?2,
                 colour = ?3,
                 assigned_by = ?4,
                 assigned_at = ?5
             WHERE id = ?1;",
            params![
                id,
                placement.role,
                placement.colour.map(SlotColour::as_str),
                placement.assigned_by.map(|value| value.to_string()),
                datetime_to_millis(at),
            ],
        )?;
        if changed == 0 {
            return Err(RepoError::not_found("event assignment", id));
        }
        Ok(())
    }

    fn delete_event_assignment(&self, id: EventAssignmentId) -> RepoResult<()> {
        let scope = WriteScope::begin(self.conn)?;
        let event_id: EventId = self
            .conn
            .query_row(
                "SELECT event_id FROM event_assignments WHERE id = ?1;",
                [id],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| RepoError::not_found("event assignment", id))?;
        self.conn
            .execute("DELETE FROM event_assignments WHERE id = ?1;", [id])?;
        renumber_scope(self.conn, EVENT_ASSIGNMENTS, &ScopeKey::of(event_id))?;
        scope.commit()?;
        Ok(())
    }

    fn list_event_assignments(&self, event_id: EventId) -> RepoResult<Vec<EventAssignment>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {SIGNUP_COLUMNS}
             FROM event_assignments
             WHERE event_id = ?1
             ORDER BY sort_order ASC, id ASC;"
        ))?;
        let mut rows = stmt.query([event_id])?;
        let mut signups = Vec::new();
        while let Some(row) = rows.next()? {
            signups.push(parse_signup_row(row)?);
        }
        Ok(signups)
    }
}

fn parse_event_row(row: &Row<'_>) -> RepoResult<Event> {
    let kind_text: String = row.get("kind")?;
    let kind = EventKind::parse(&kind_text).ok_or_else(|| {
        RepoError::InvalidData(format!("invalid event kind `{kind_text}` in events.kind"))
    })?;
    Ok(Event {
        id: row.get("id")?,
        name: row.get("name")?,
        description: row.get("description")?,
        date: row.get("event_date")?,
        start_time: row.get("start_time")?,
        end_time: row.get("end_time")?,
        kind,
    })
}

fn parse_attendance_row(row: &Row<'_>) -> RepoResult<Attendance> {
    let user_text: String = row.get("user_id")?;
    let first_join = row
        .get::<_, Option<i64>>("first_join")?
        .map(|value| millis_to_datetime(value, "attendances.first_join"))
        .transpose()?;
    let last_seen = row
        .get::<_, Option<i64>>("last_seen")?
        .map(|value| millis_to_datetime(value, "attendances.last_seen"))
        .transpose()?;
    Ok(Attendance {
        id: row.get("id")?,
        event_id: row.get("event_id")?,
        user_id: parse_uuid(&user_text, "attendances.user_id")?,
        first_join,
        last_seen,
        manual: parse_bool(row.get("manual")?, "attendances.manual")?,
        left_early: parse_bool(row.get("left_early")?, "attendances.left_early")?,
    })
}

fn parse_signup_row(row: &Row<'_>) -> RepoResult<EventAssignment> {
    let user_text: String = row.get("user_id")?;
    let status_text: String = row.get("status")?;
    let status = RsvpStatus::parse(&status_text).ok_or_else(|| {
        RepoError::InvalidData(format!(
            "invalid status `{status_text}` in event_assignments.status"
        ))
    })?;
    let colour = match row.get::<_, Option<String>>("colour")? {
        None => None,
        Some(value) => Some(SlotColour::parse(&value).ok_or_else(|| {
            RepoError::InvalidData(format!("invalid colour `{value}` in event_assignments.colour"))
        })?),
    };
    let assigned_by = row
        .get::<_, Option<String>>("assigned_by")?
        .map(|value| parse_uuid(&value, "event_assignments.assigned_by"))
        .transpose()?;
    let assigned_at = row
        .get::<_, Option<i64>>("assigned_at")?
        .map(|value| millis_to_datetime(value, "event_assignments.assigned_at"))
        .transpose()?;
    Ok(EventAssignment {
        id: row.get("id")?,
        event_id: row.get("event_id")?,
        user_id: parse_uuid(&user_text, "event_assignments.user_id")?,
        status,
        role: row.get("role")?,
        colour,
        assigned_by,
        created_at: millis_to_datetime(row.get("created_at")?, "event_assignments.created_at")?,
        assigned_at,
        sort_order: row.get("sort_order")?,
    })
}
