//! Application repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Persist unit applications and their onboarding details.
//! - Persist section slot applications and staff decisions.
//!
//! # Invariants
//! - Applicant handles are unique; a member links to one unit application.
//! - Pending lists are oldest first (`submitted_at ASC, id ASC`).
//! - Instants are stored as epoch milliseconds.

use crate::model::application::{
    ApplicationStatus, SectionApplication, SectionApplicationId, UnitApplication,
    UnitApplicationId,
};
use crate::model::orbat::{SectionId, SectionSlotId};
use crate::model::user::UserId;
use crate::repo::{
    bool_to_int, datetime_to_millis, ensure_schema_ready, millis_to_datetime, parse_bool,
    parse_uuid, run_in_write_scope, RepoError, RepoResult, TableSpec, WriteScoped,
};
use chrono::{DateTime, Utc};
use log::info;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, Row};

const UNIT_COLUMNS: &str = "id, applicant_handle, user_id, teamspeak_id, over_18, status, \
                            submitted_at, processed_at, actioned_by";
const SECTION_COLUMNS: &str =
    "id, user_id, section_slot_id, submitted_at, processed_at, actioned_by, denied";

/// Repository interface for unit and section applications.
pub trait ApplicationRepository: WriteScoped {
    fn create_unit_application(
        &self,
        applicant_handle: &str,
        submitted_at: DateTime<Utc>,
    ) -> RepoResult<UnitApplication>;
    fn get_unit_application(&self, id: UnitApplicationId)
        -> RepoResult<Option<UnitApplication>>;
    fn unit_application_by_handle(&self, handle: &str) -> RepoResult<Option<UnitApplication>>;
    fn unit_application_for_user(&self, user_id: UserId)
        -> RepoResult<Option<UnitApplication>>;
    /// Writes every mutable field of an existing unit application.
    fn update_unit_application(&self, application: &UnitApplication) -> RepoResult<()>;
    fn list_pending_unit_applications(&self) -> RepoResult<Vec<UnitApplication>>;

    fn create_section_application(
        &self,
        user_id: UserId,
        section_slot_id: SectionSlotId,
        submitted_at: DateTime<Utc>,
    ) -> RepoResult<SectionApplication>;
    fn get_section_application(
        &self,
        id: SectionApplicationId,
    ) -> RepoResult<Option<SectionApplication>>;
    /// Pending application of `user_id` for `section_slot_id`, if any.
    fn pending_section_application(
        &self,
        user_id: UserId,
        section_slot_id: SectionSlotId,
    ) -> RepoResult<Option<SectionApplication>>;
    /// Pending section applications, optionally limited to slots of one section.
    fn list_pending_section_applications(
        &self,
        section_id: Option<SectionId>,
    ) -> RepoResult<Vec<SectionApplication>>;
    fn record_section_decision(
        &self,
        id: SectionApplicationId,
        denied: bool,
        actioned_by: Option<UserId>,
        at: DateTime<Utc>,
    ) -> RepoResult<()>;
}

/// SQLite-backed application repository.
pub struct SqliteApplicationRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteApplicationRepository<'conn> {
    /// Creates repository from migrated connection.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_schema_ready(
            conn,
            &[
                TableSpec {
                    name: "unit_applications",
                    columns: &[
                        "id",
                        "applicant_handle",
                        "user_id",
                        "teamspeak_id",
                        "over_18",
                        "status",
                        "submitted_at",
                        "processed_at",
                        "actioned_by",
                    ],
                },
                TableSpec {
                    name: "section_applications",
                    columns: &[
                        "id",
                        "user_id",
                        "section_slot_id",
                        "submitted_at",
                        "processed_at",
                        "actioned_by",
                        "denied",
                    ],
                },
            ],
        )?;
        Ok(Self { conn })
    }

    fn query_unit(&self, filter: &str, values: Vec<Value>) -> RepoResult<Vec<UnitApplication>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {UNIT_COLUMNS}
             FROM unit_applications
             WHERE {filter}
             ORDER BY submitted_at ASC, id ASC;"
        ))?;
        let mut rows = stmt.query(params_from_iter(values))?;
        let mut applications = Vec::new();
        while let Some(row) = rows.next()? {
            applications.push(parse_unit_row(row)?);
        }
        Ok(applications)
    }

    fn query_section(
        &self,
        filter: &str,
        values: Vec<Value>,
    ) -> RepoResult<Vec<SectionApplication>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {SECTION_COLUMNS}
             FROM section_applications
             WHERE {filter}
             ORDER BY submitted_at ASC, id ASC;"
        ))?;
        let mut rows = stmt.query(params_from_iter(values))?;
        let mut applications = Vec::new();
        while let Some(row) = rows.next()? {
            applications.push(parse_section_row(row)?);
        }
        Ok(applications)
    }
}

impl WriteScoped for SqliteApplicationRepository<'_> {
    fn in_write_scope<T, E, F>(&self, op: F) -> Result<T, E>
    where
        E: From<RepoError>,
        F: FnOnce() -> Result<T, E>,
    {
        run_in_write_scope(self.conn, op)
    }
}

impl ApplicationRepository for SqliteApplicationRepository<'_> {
    fn create_unit_application(
        &self,
        applicant_handle: &str,
        submitted_at: DateTime<Utc>,
    ) -> RepoResult<UnitApplication> {
        self.conn.execute(
            "INSERT INTO unit_applications (applicant_handle, submitted_at) VALUES (?1, ?2);",
            params![applicant_handle, datetime_to_millis(submitted_at)],
        )?;
        let id = self.conn.last_insert_rowid();
        info!("event=unit_application_create module=repo status=ok id={id}");
        Ok(UnitApplication {
            id,
            applicant_handle: applicant_handle.to_string(),
            user_id: None,
            teamspeak_id: None,
            over_18: false,
            status: ApplicationStatus::Unclaimed,
            submitted_at,
            processed_at: None,
            actioned_by: None,
        })
    }

    fn get_unit_application(
        &self,
        id: UnitApplicationId,
    ) -> RepoResult<Option<UnitApplication>> {
        Ok(self
            .query_unit("id = ?1", vec![Value::from(id)])?
            .into_iter()
            .next())
    }

    fn unit_application_by_handle(&self, handle: &str) -> RepoResult<Option<UnitApplication>> {
        Ok(self
            .query_unit("applicant_handle = ?1", vec![Value::from(handle.to_string())])?
            .into_iter()
            .next())
    }

    fn unit_application_for_user(
        &self,
        user_id: UserId,
    ) -> RepoResult<Option<UnitApplication>> {
        Ok(self
            .query_unit("user_id = ?1", vec![Value::from(user_id.to_string())])?
            .into_iter()
            .next())
    }

    fn update_unit_application(&self, application: &UnitApplication) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE unit_applications
             SET user_id = ?2,
                 teamspeak_id = ?3,
                 over_18 = ?4,
                 status = ?5,
                 processed_at = ?6,
                 actioned_by = ?7
             WHERE id = ?1;",
            params![
                application.id,
                application.user_id.map(|value| value.to_string()),
                application.teamspeak_id,
                bool_to_int(application.over_18),
                application.status.as_str(),
                application.processed_at.map(datetime_to_millis),
                application.actioned_by.map(|value| value.to_string()),
            ],
        )?;
        if changed == 0 {
            return Err(RepoError::not_found("unit application", application.id));
        }
        Ok(())
    }

    fn list_pending_unit_applications(&self) -> RepoResult<Vec<UnitApplication>> {
        self.query_unit("processed_at IS NULL", Vec::new())
    }

    fn create_section_application(
        &self,
        user_id: UserId,
        section_slot_id: SectionSlotId,
        submitted_at: DateTime<Utc>,
    ) -> RepoResult<SectionApplication> {
        self.conn.execute(
            "INSERT INTO section_applications (user_id, section_slot_id, submitted_at)
             VALUES (?1, ?2, ?3);",
            params![
                user_id.to_string(),
                section_slot_id,
                datetime_to_millis(submitted_at)
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        info!(
            "event=section_application_create module=repo status=ok id={} slot_id={}",
            id, section_slot_id
        );
        Ok(SectionApplication {
            id,
            user_id,
            section_slot_id,
            submitted_at,
            processed_at: None,
            actioned_by: None,
            denied: false,
        })
    }

    fn get_section_application(
        &self,
        id: SectionApplicationId,
    ) -> RepoResult<Option<SectionApplication>> {
        Ok(self
            .query_section("id = ?1", vec![Value::from(id)])?
            .into_iter()
            .next())
    }

    fn pending_section_application(
        &self,
        user_id: UserId,
        section_slot_id: SectionSlotId,
    ) -> RepoResult<Option<SectionApplication>> {
        Ok(self
            .query_section(
                "user_id = ?1 AND section_slot_id = ?2 AND processed_at IS NULL",
                vec![Value::from(user_id.to_string()), Value::from(section_slot_id)],
            )?
            .into_iter()
            .next())
    }

    fn list_pending_section_applications(
        &self,
        section_id: Option<SectionId>,
    ) -> RepoResult<Vec<SectionApplication>> {
        match section_id {
            None => self.query_section("processed_at IS NULL", Vec::new()),
            Some(section_id) => self.query_section(
                "processed_at IS NULL
                 AND section_slot_id IN (SELECT id FROM section_slots WHERE section_id = ?1)",
                vec![Value::from(section_id)],
            ),
        }
    }

    fn record_section_decision(
        &self,
        id: SectionApplicationId,
        denied: bool,
        actioned_by: Option<UserId>,
        at: DateTime<Utc>,
    ) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE section_applications
             SET denied = ?2,
                 actioned_by = ?3,
                 processed_at = ?4
             WHERE id = ?1;",
            params![
                id,
                bool_to_int(denied),
                actioned_by.map(|value| value.to_string()),
                datetime_to_millis(at),
            ],
        )?;
        if changed == 0 {
            return Err(RepoError::not_found("section application", id));
        }
        Ok(())
    }
}

fn parse_optional_user(row: &Row<'_>, column: &'static str) -> RepoResult<Option<UserId>> {
    Ok(row
        .get::<_, Option<String>>(column)?
        .map(|value| parse_uuid(&value, column))
        .transpose()?)
}

fn parse_optional_instant(
    row: &Row<'_>,
    column: &'static str,
) -> RepoResult<Option<DateTime<Utc>>> {
    Ok(row
        .get::<_, Option<i64>>(column)?
        .map(|value| millis_to_datetime(value, column))
        .transpose()?)
}

fn parse_unit_row(row: &Row<'_>) -> RepoResult<UnitApplication> {
    let status_text: String = row.get("status")?;
    let status = ApplicationStatus::parse(&status_text).ok_or_else(|| {
        RepoError::InvalidData(format!(
            "invalid status `{status_text}` in unit_applications.status"
        ))
    })?;
    Ok(UnitApplication {
        id: row.get("id")?,
        applicant_handle: row.get("applicant_handle")?,
        user_id: parse_optional_user(row, "user_id")?,
        teamspeak_id: row.get("teamspeak_id")?,
        over_18: parse_bool(row.get("over_18")?, "unit_applications.over_18")?,
        status,
        submitted_at: millis_to_datetime(row.get("submitted_at")?, "unit_applications.submitted_at")?,
        processed_at: parse_optional_instant(row, "processed_at")?,
        actioned_by: parse_optional_user(row, "actioned_by")?,
    })
}

fn parse_section_row(row: &Row<'_>) -> RepoResult<SectionApplication> {
    let user_text: String = row.get("user_id")?;
    Ok(SectionApplication {
        id: row.get("id")?,
        user_id: parse_uuid(&user_text, "section_applications.user_id")?,
        section_slot_id: row.get("section_slot_id")?,
        submitted_at: millis_to_datetime(
            row.get("submitted_at")?,
            "section_applications.submitted_at",
        )?,
        processed_at: parse_optional_instant(row, "processed_at")?,
        actioned_by: parse_optional_user(row, "actioned_by")?,
        denied: parse_bool(row.get("denied")?, "section_applications.denied")?,
    })
}
