//! Qualification repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Persist qualifications, their ordered criteria and member progress.
//!
//! # Invariants
//! - New criteria are appended to their qualification's order.
//! - One `user_qualifications` row per member and qualification.
//! - Completing an already completed criterion changes nothing.

use crate::db::WriteScope;
use crate::model::ordering::{ScopeKey, QUALIFICATION_CRITERIA};
use crate::model::training::{
    CompletedCriterion, CriterionId, Qualification, QualificationCriterion, QualificationId,
    UserQualification, UserQualificationId,
};
use crate::model::user::UserId;
use crate::repo::ordering_repo::{next_order, renumber_scope};
use crate::repo::{
    bool_to_int, ensure_schema_ready, millis_to_datetime, now_millis, parse_bool, parse_uuid,
    run_in_write_scope, RepoError, RepoResult, TableSpec, WriteScoped,
};
use chrono::NaiveDate;
use log::info;
use rusqlite::{params, Connection, OptionalExtension, Row};

const USER_QUALIFICATION_COLUMNS: &str =
    "id, user_id, qualification_id, date_awarded, latest_passed, awarded_by";

/// Repository interface for qualifications and member progress.
pub trait TrainingRepository: WriteScoped {
    fn create_qualification(&self, name: &str, description: &str) -> RepoResult<Qualification>;
    fn get_qualification(&self, id: QualificationId) -> RepoResult<Option<Qualification>>;
    fn list_qualifications(&self) -> RepoResult<Vec<Qualification>>;
    fn set_qualification_active(&self, id: QualificationId, is_active: bool) -> RepoResult<()>;

    fn add_criterion(
        &self,
        qualification_id: QualificationId,
        name: &str,
        description: &str,
    ) -> RepoResult<QualificationCriterion>;
    fn get_criterion(&self, id: CriterionId) -> RepoResult<Option<QualificationCriterion>>;
    /// Lists a qualification's criteria in position order.
    fn list_criteria(
        &self,
        qualification_id: QualificationId,
    ) -> RepoResult<Vec<QualificationCriterion>>;
    /// Deletes a criterion and closes the gap it leaves.
    fn delete_criterion(&self, id: CriterionId) -> RepoResult<()>;

    fn get_user_qualification(
        &self,
        user_id: UserId,
        qualification_id: QualificationId,
    ) -> RepoResult<Option<UserQualification>>;
    /// Returns the existing row or inserts an unawarded one. The flag is
    /// `true` when the row was created.
    fn get_or_create_user_qualification(
        &self,
        user_id: UserId,
        qualification_id: QualificationId,
    ) -> RepoResult<(UserQualification, bool)>;
    fn list_user_qualifications(&self, user_id: UserId) -> RepoResult<Vec<UserQualification>>;
    fn set_awarded(
        &self,
        id: UserQualificationId,
        date_awarded: Option<NaiveDate>,
        latest_passed: Option<NaiveDate>,
        awarded_by: Option<UserId>,
    ) -> RepoResult<()>;

    /// Records a completion. Returns `false` when it already existed.
    fn complete_criterion(
        &self,
        user_qualification_id: UserQualificationId,
        criterion_id: CriterionId,
    ) -> RepoResult<bool>;
    fn completed_criteria(
        &self,
        user_qualification_id: UserQualificationId,
    ) -> RepoResult<Vec<CompletedCriterion>>;
}

/// SQLite-backed qualification repository.
pub struct SqliteTrainingRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteTrainingRepository<'conn> {
    /// Creates repository from migrated connection.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_schema_ready(
            conn,
            &[
                TableSpec {
                    name: "qualifications",
                    columns: &["id", "name", "description", "is_active"],
                },
                TableSpec {
                    name: "qualification_criteria",
                    columns: &["id", "qualification_id", "name", "description", "sort_order"],
                },
                TableSpec {
                    name: "user_qualifications",
                    columns: &[
                        "id",
                        "user_id",
                        "qualification_id",
                        "date_awarded",
                        "latest_passed",
                        "awarded_by",
                    ],
                },
                TableSpec {
                    name: "user_qualification_criteria",
                    columns: &["id", "user_qualification_id", "criterion_id", "completed_on"],
                },
            ],
        )?;
        Ok(Self { conn })
    }
}

impl WriteScoped for SqliteTrainingRepository<'_> {
    fn in_write_scope<T, E, F>(&self, op: F) -> Result<T, E>
    where
        E: From<RepoError>,
        F: FnOnce() -> Result<T, E>,
    {
        run_in_write_scope(self.conn, op)
    }
}

impl TrainingRepository for SqliteTrainingRepository<'_> {
    fn create_qualification(&self, name: &str, description: &str) -> RepoResult<Qualification> {
        self.conn.execute(
            "INSERT INTO qualifications (name, description, is_active) VALUES (?1, ?2, 1);",
            params![name, description],
        )?;
        let id = self.conn.last_insert_rowid();
        info!("event=qualification_create module=repo status=ok id={}", id);
        Ok(Qualification {
            id,
            name: name.to_string(),
            description: description.to_string(),
            is_active: true,
        })
    }

    fn get_qualification(&self, id: QualificationId) -> RepoResult<Option<Qualification>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, description, is_active FROM qualifications WHERE id = ?1;",
        )?;
        let mut rows = stmt.query([id])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_qualification_row(row)?));
        }
        Ok(None)
    }

    fn list_qualifications(&self) -> RepoResult<Vec<Qualification>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, description, is_active
             FROM qualifications
             ORDER BY name COLLATE NOCASE ASC;",
        )?;
        let mut rows = stmt.query([])?;
        let mut qualifications = Vec::new();
        while let Some(row) = rows.next()? {
            qualifications.push(parse_qualification_row(row)?);
        }
        Ok(qualifications)
    }

    fn set_qualification_active(&self, id: QualificationId, is_active: bool) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE qualifications SET is_active = ?2 WHERE id = ?1;",
            params![id, bool_to_int(is_active)],
        )?;
        if changed == 0 {
            return Err(RepoError::not_found("qualification", id));
        }
        Ok(())
    }

    fn add_criterion(
        &self,
        qualification_id: QualificationId,
        name: &str,
        description: &str,
    ) -> RepoResult<QualificationCriterion> {
        let scope = WriteScope::begin(self.conn)?;
        if self.get_qualification(qualification_id)?.is_none() {
            return Err(RepoError::not_found("qualification", qualification_id));
        }
        let sort_order = next_order(
            self.conn,
            QUALIFICATION_CRITERIA,
            &ScopeKey::of(qualification_id),
        )?;
        self.conn.execute(
            "INSERT INTO qualification_criteria (qualification_id, name, description, sort_order)
             VALUES (?1, ?2, ?3, ?4);",
            params![qualification_id, name, description, sort_order],
        )?;
        let id = self.conn.last_insert_rowid();
        scope.commit()?;

        Ok(QualificationCriterion {
            id,
            qualification_id,
            name: name.to_string(),
            description: description.to_string(),
            sort_order,
        })
    }

    fn get_criterion(&self, id: CriterionId) -> RepoResult<Option<QualificationCriterion>> {
        let criterion = self
            .conn
            .query_row(
                "SELECT id, qualification_id, name, description, sort_order
                 FROM qualification_criteria
                 WHERE id = ?1;",
                [id],
                parse_criterion_row,
            )
            .optional()?;
        Ok(criterion)
    }

    fn list_criteria(
        &self,
        qualification_id: QualificationId,
    ) -> RepoResult<Vec<QualificationCriterion>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, qualification_id, name, description, sort_order
             FROM qualification_criteria
             WHERE qualification_id = ?1
             ORDER BY sort_order ASC, id ASC;",
        )?;
        let criteria = stmt
            .query_map([qualification_id], parse_criterion_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(criteria)
    }

    fn delete_criterion(&self, id: CriterionId) -> RepoResult<()> {
        let scope = WriteScope::begin(self.conn)?;
        let criterion = self
            .get_criterion(id)?
            .ok_or_else(|| RepoError::not_found("criterion", id))?;
        self.conn
            .execute("DELETE FROM qualification_criteria WHERE id = ?1;", [id])?;
        renumber_scope(
            self.conn,
            QUALIFICATION_CRITERIA,
            &ScopeKey::of(criterion.qualification_id),
        )?;
        scope.commit()?;
        Ok(())
    }

    fn get_user_qualification(
        &self,
        user_id: UserId,
        qualification_id: QualificationId,
    ) -> RepoResult<Option<UserQualification>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {USER_QUALIFICATION_COLUMNS}
             FROM user_qualifications
             WHERE user_id = ?1 AND qualification_id = ?2;"
        ))?;
        let mut rows = stmt.query(params![user_id.to_string(), qualification_id])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_user_qualification_row(row)?));
        }
        Ok(None)
    }

    fn get_or_create_user_qualification(
        &self,
        user_id: UserId,
        qualification_id: QualificationId,
    ) -> RepoResult<(UserQualification, bool)> {
        let scope = WriteScope::begin(self.conn)?;
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO user_qualifications (user_id, qualification_id)
             VALUES (?1, ?2);",
            params![user_id.to_string(), qualification_id],
        )?;
        let record = self
            .get_user_qualification(user_id, qualification_id)?
            .ok_or_else(|| {
                RepoError::not_found("user qualification", format!("{user_id}/{qualification_id}"))
            })?;
        scope.commit()?;
        Ok((record, inserted == 1))
    }

    fn list_user_qualifications(&self, user_id: UserId) -> RepoResult<Vec<UserQualification>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {USER_QUALIFICATION_COLUMNS}
             FROM user_qualifications
             WHERE user_id = ?1
             ORDER BY qualification_id ASC;"
        ))?;
        let mut rows = stmt.query([user_id.to_string()])?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            records.push(parse_user_qualification_row(row)?);
        }
        Ok(records)
    }

    fn set_awarded(
        &self,
        id: UserQualificationId,
        date_awarded: Option<NaiveDate>,
        latest_passed: Option<NaiveDate>,
        awarded_by: Option<UserId>,
    ) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE user_qualifications
             SET date_awarded = ?2,
                 latest_passed = ?3,
                 awarded_by = ?4
             WHERE id = ?1;",
            params![
                id,
                date_awarded,
                latest_passed,
                awarded_by.map(|value| value.to_string())
            ],
        )?;
        if changed == 0 {
            return Err(RepoError::not_found("user qualification", id));
        }
        Ok(())
    }

    fn complete_criterion(
        &self,
        user_qualification_id: UserQualificationId,
        criterion_id: CriterionId,
    ) -> RepoResult<bool> {
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO user_qualification_criteria (
                user_qualification_id,
                criterion_id,
                completed_on
            ) VALUES (?1, ?2, ?3);",
            params![user_qualification_id, criterion_id, now_millis()],
        )?;
        Ok(inserted == 1)
    }

    fn completed_criteria(
        &self,
        user_qualification_id: UserQualificationId,
    ) -> RepoResult<Vec<CompletedCriterion>> {
        let mut stmt = self.conn.prepare(
            "SELECT user_qualification_id, criterion_id, completed_on
             FROM user_qualification_criteria
             WHERE user_qualification_id = ?1
             ORDER BY criterion_id ASC;",
        )?;
        let mut rows = stmt.query([user_qualification_id])?;
        let mut completed = Vec::new();
        while let Some(row) = rows.next()? {
            completed.push(CompletedCriterion {
                user_qualification_id: row.get(0)?,
                criterion_id: row.get(1)?,
                completed_on: millis_to_datetime(
                    row.get(2)?,
                    "user_qualification_criteria.completed_on",
                )?,
            });
        }
        Ok(completed)
    }
}

fn parse_qualification_row(row: &Row<'_>) -> RepoResult<Qualification> {
    Ok(Qualification {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        is_active: parse_bool(row.get(3)?, "qualifications.is_active")?,
    })
}

fn parse_criterion_row(row: &Row<'_>) -> rusqlite::Result<QualificationCriterion> {
    Ok(QualificationCriterion {
        id: row.get(0)?,
        qualification_id: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        sort_order: row.get(4)?,
    })
}

fn parse_user_qualification_row(row: &Row<'_>) -> RepoResult<UserQualification> {
    let user_text: String = row.get("user_id")?;
    let awarded_by = row
        .get::<_, Option<String>>("awarded_by")?
        .map(|value| parse_uuid(&value, "user_qualifications.awarded_by"))
        .transpose()?;
    Ok(UserQualification {
        id: row.get("id")?,
        user_id: parse_uuid(&user_text, "user_qualifications.user_id")?,
        qualification_id: row.get("qualification_id")?,
        date_awarded: row.get("date_awarded")?,
        latest_passed: row.get("latest_passed")?,
        awarded_by,
    })
}
