//! Member repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Persist members and their derived cache fields.
//!
//! # Invariants
//! - `username` and `display_name` are unique (enforced by schema).
//! - Derived fields are written only through `update_derived`.

use crate::model::user::{DerivedAttributes, User, UserId, UserStatus};
use crate::repo::{
    ensure_schema_ready, now_millis, parse_uuid, run_in_write_scope, RepoError, RepoResult,
    TableSpec, WriteScoped,
};
use rusqlite::{params, Connection, Row};

const USER_COLUMNS: &str = "id, username, display_name, rank, section_name, callsign, status";

/// Repository interface for members.
pub trait UserRepository: WriteScoped {
    fn create_user(&self, user: &User) -> RepoResult<UserId>;
    fn get_user(&self, id: UserId) -> RepoResult<Option<User>>;
    /// Lists members by display name.
    fn list_users(&self) -> RepoResult<Vec<User>>;
    fn update_status(&self, id: UserId, status: UserStatus) -> RepoResult<()>;
    fn update_username(&self, id: UserId, username: &str) -> RepoResult<()>;
    fn update_callsign(&self, id: UserId, callsign: Option<&str>) -> RepoResult<()>;
    /// Writes the derived `rank` and `section_name` cache.
    fn update_derived(&self, id: UserId, derived: &DerivedAttributes) -> RepoResult<()>;
}

/// SQLite-backed member repository.
pub struct SqliteUserRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteUserRepository<'conn> {
    /// Creates repository from migrated connection.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_schema_ready(
            conn,
            &[TableSpec {
                name: "users",
                columns: &[
                    "id",
                    "username",
                    "display_name",
                    "rank",
                    "section_name",
                    "callsign",
                    "status",
                    "updated_at",
                ],
            }],
        )?;
        Ok(Self { conn })
    }

    fn expect_changed(&self, changed: usize, id: UserId) -> RepoResult<()> {
        if changed == 0 {
            return Err(RepoError::not_found("user", id));
        }
        Ok(())
    }
}

impl WriteScoped for SqliteUserRepository<'_> {
    fn in_write_scope<T, E, F>(&self, op: F) -> Result<T, E>
    where
        E: From<RepoError>,
        F: FnOnce() -> Result<T, E>,
    {
        run_in_write_scope(self.conn, op)
    }
}

impl UserRepository for SqliteUserRepository<'_> {
    fn create_user(&self, user: &User) -> RepoResult<UserId> {
        self.conn.execute(
            "INSERT INTO users (
                id,
                username,
                display_name,
                rank,
                section_name,
                callsign,
                status
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7);",
            params![
                user.id.to_string(),
                user.username,
                user.display_name,
                user.rank,
                user.section_name,
                user.callsign,
                user.status.as_str(),
            ],
        )?;
        Ok(user.id)
    }

    fn get_user(&self, id: UserId) -> RepoResult<Option<User>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1;"))?;
        let mut rows = stmt.query([id.to_string()])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_user_row(row)?));
        }
        Ok(None)
    }

    fn list_users(&self) -> RepoResult<Vec<User>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {USER_COLUMNS} FROM users ORDER BY display_name COLLATE NOCASE ASC;"
        ))?;
        let mut rows = stmt.query([])?;
        let mut users = Vec::new();
        while let Some(row) = rows.next()? {
            users.push(parse_user_row(row)?);
        }
        Ok(users)
    }

    fn update_status(&self, id: UserId, status: UserStatus) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE users SET status = ?2, updated_at = ?3 WHERE id = ?1;",
            params![id.to_string(), status.as_str(), now_millis()],
        )?;
        self.expect_changed(changed, id)
    }

    fn update_username(&self, id: UserId, username: &str) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE users SET username = ?2, updated_at = ?3 WHERE id = ?1;",
            params![id.to_string(), username, now_millis()],
        )?;
        self.expect_changed(changed, id)
    }

    fn update_callsign(&self, id: UserId, callsign: Option<&str>) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE users SET callsign = ?2, updated_at = ?3 WHERE id = ?1;",
            params![id.to_string(), callsign, now_millis()],
        )?;
        self.expect_changed(changed, id)
    }

    fn update_derived(&self, id: UserId, derived: &DerivedAttributes) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE users
             SET rank = ?2,
                 section_name = ?3,
                 updated_at = ?4
             WHERE id = ?1;",
            params![
                id.to_string(),
                derived.rank,
                derived.section_name,
                now_millis()
            ],
        )?;
        self.expect_changed(changed, id)
    }
}

fn parse_user_row(row: &Row<'_>) -> RepoResult<User> {
    let id_text: String = row.get("id")?;
    let status_text: String = row.get("status")?;
    let status = UserStatus::parse(&status_text).ok_or_else(|| {
        RepoError::InvalidData(format!("invalid status `{status_text}` in users.status"))
    })?;

    Ok(User {
        id: parse_uuid(&id_text, "users.id")?,
        username: row.get("username")?,
        display_name: row.get("display_name")?,
        rank: row.get("rank")?,
        section_name: row.get("section_name")?,
        callsign: row.get("callsign")?,
        status,
    })
}
