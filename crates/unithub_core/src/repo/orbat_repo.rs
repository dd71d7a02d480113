//! Order-of-battle repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Persist platoons, sections, slots, roles and current assignments.
//! - Place new ordered rows through the ordered collection manager.
//! - Expose the read queries that role rules and attribute propagation need.
//!
//! # Invariants
//! - Platoons, sections and slots get `max + 1` positions in their scope
//!   inside the same write scope as their insert.
//! - A member occupies at most one slot per section.
//! - An assignment is active while `end_date IS NULL`.

use crate::db::WriteScope;
use crate::model::orbat::{
    NewRole, NewSection, Platoon, PlatoonId, Role, RoleId, RolePair, RoleSlotAssignment,
    RoleSlotAssignmentId, Section, SectionAssignment, SectionAssignmentId, SectionId,
    SectionSlot, SectionSlotId, SlotColour,
};
use crate::model::ordering::{ScopeKey, PLATOONS, SECTIONS, SECTION_SLOTS};
use crate::model::user::UserId;
use crate::repo::ordering_repo::{next_order, reassign_scope, renumber_scope};
use crate::repo::{
    bool_to_int, ensure_schema_ready, parse_bool, parse_uuid, run_in_write_scope, RepoError,
    RepoResult, TableSpec, WriteScoped,
};
use chrono::NaiveDate;
use log::info;
use rusqlite::{params, Connection, OptionalExtension, Row};

const SECTION_COLUMNS: &str =
    "id, name, shorthand, description, kind, max_size, platoon_id, leader_id, sort_order";
const SLOT_COLUMNS: &str = "id, name, section_id, user_id, colour, sort_order";
const ROLE_COLUMNS: &str = "id, name, shorthand, description, max_per_section, is_rank";

/// Repository interface for the order of battle.
pub trait OrbatRepository: WriteScoped {
    fn create_platoon(&self, name: &str, description: &str) -> RepoResult<Platoon>;
    fn get_platoon(&self, id: PlatoonId) -> RepoResult<Option<Platoon>>;
    fn list_platoons(&self) -> RepoResult<Vec<Platoon>>;

    fn create_section(&self, section: &NewSection) -> RepoResult<Section>;
    fn get_section(&self, id: SectionId) -> RepoResult<Option<Section>>;
    /// Lists the sections of one platoon (or unattached ones) in order.
    fn list_sections(&self, platoon_id: Option<PlatoonId>) -> RepoResult<Vec<Section>>;
    /// Re-scopes a section; it is appended to the target platoon.
    fn move_section_to_platoon(
        &self,
        id: SectionId,
        platoon_id: Option<PlatoonId>,
    ) -> RepoResult<Section>;
    fn set_section_leader(&self, id: SectionId, leader_id: Option<UserId>) -> RepoResult<()>;

    fn create_role(&self, role: &NewRole) -> RepoResult<Role>;
    fn get_role(&self, id: RoleId) -> RepoResult<Option<Role>>;
    fn list_roles(&self) -> RepoResult<Vec<Role>>;
    /// Replaces the sections a role may be used in. Empty means anywhere.
    fn set_allowed_sections(&self, role_id: RoleId, sections: &[SectionId]) -> RepoResult<()>;
    fn allowed_sections(&self, role_id: RoleId) -> RepoResult<Vec<SectionId>>;
    fn add_incompatibility(&self, pair: RolePair) -> RepoResult<()>;
    fn remove_incompatibility(&self, pair: RolePair) -> RepoResult<()>;
    /// Roles declared incompatible with `role_id`, from either side of the pair.
    fn incompatible_roles(&self, role_id: RoleId) -> RepoResult<Vec<RoleId>>;

    fn create_slot(
        &self,
        section_id: SectionId,
        name: &str,
        colour: Option<SlotColour>,
    ) -> RepoResult<SectionSlot>;
    fn get_slot(&self, id: SectionSlotId) -> RepoResult<Option<SectionSlot>>;
    fn list_slots(&self, section_id: SectionId) -> RepoResult<Vec<SectionSlot>>;
    fn set_slot_user(&self, id: SectionSlotId, user_id: Option<UserId>) -> RepoResult<()>;
    /// Clears `user_id` from every slot of the section except `keep`.
    /// Returns the cleared slot ids.
    fn vacate_user_slots(
        &self,
        section_id: SectionId,
        user_id: UserId,
        keep: Option<SectionSlotId>,
    ) -> RepoResult<Vec<SectionSlotId>>;
    fn slot_for_user(
        &self,
        section_id: SectionId,
        user_id: UserId,
    ) -> RepoResult<Option<SectionSlot>>;
    /// Deletes a slot, renumbers its section and returns the deleted row.
    fn delete_slot(&self, id: SectionSlotId) -> RepoResult<SectionSlot>;

    fn create_section_assignment(
        &self,
        section_id: SectionId,
        user_id: UserId,
        start_date: NaiveDate,
    ) -> RepoResult<SectionAssignment>;
    fn get_section_assignment(
        &self,
        id: SectionAssignmentId,
    ) -> RepoResult<Option<SectionAssignment>>;
    fn active_section_assignment(&self, user_id: UserId)
        -> RepoResult<Option<SectionAssignment>>;
    fn end_section_assignment(&self, id: SectionAssignmentId, end_date: NaiveDate)
        -> RepoResult<()>;
    fn list_active_members(&self, section_id: SectionId) -> RepoResult<Vec<SectionAssignment>>;
    fn count_active_members(&self, section_id: SectionId) -> RepoResult<u32>;

    fn create_role_slot_assignment(
        &self,
        role_id: RoleId,
        slot_id: SectionSlotId,
        start_date: NaiveDate,
    ) -> RepoResult<RoleSlotAssignment>;
    fn get_role_slot_assignment(
        &self,
        id: RoleSlotAssignmentId,
    ) -> RepoResult<Option<RoleSlotAssignment>>;
    fn end_role_slot_assignment(
        &self,
        id: RoleSlotAssignmentId,
        end_date: NaiveDate,
    ) -> RepoResult<()>;
    fn active_role_assignments_for_slot(
        &self,
        slot_id: SectionSlotId,
    ) -> RepoResult<Vec<RoleSlotAssignment>>;
    /// Active assignments of `role_id` across the section's slots.
    fn count_active_role_in_section(&self, role_id: RoleId, section_id: SectionId)
        -> RepoResult<u32>;
    /// Distinct rank roles currently held in the section.
    fn active_rank_roles_in_section(&self, section_id: SectionId) -> RepoResult<Vec<RoleId>>;
    /// First active rank role on the slot, by assignment id.
    fn active_rank_role_for_slot(&self, slot_id: SectionSlotId) -> RepoResult<Option<Role>>;
}

/// SQLite-backed order-of-battle repository.
pub struct SqliteOrbatRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteOrbatRepository<'conn> {
    /// Creates repository from migrated connection.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_schema_ready(
            conn,
            &[
                TableSpec {
                    name: "platoons",
                    columns: &["id", "name", "description", "sort_order"],
                },
                TableSpec {
                    name: "sections",
                    columns: &[
                        "id",
                        "name",
                        "shorthand",
                        "description",
                        "kind",
                        "max_size",
                        "platoon_id",
                        "leader_id",
                        "sort_order",
                    ],
                },
                TableSpec {
                    name: "roles",
                    columns: &[
                        "id",
                        "name",
                        "shorthand",
                        "description",
                        "max_per_section",
                        "is_rank",
                    ],
                },
                TableSpec {
                    name: "role_allowed_sections",
                    columns: &["role_id", "section_id"],
                },
                TableSpec {
                    name: "role_incompatibilities",
                    columns: &["role_low", "role_high"],
                },
                TableSpec {
                    name: "section_slots",
                    columns: &["id", "name", "section_id", "user_id", "colour", "sort_order"],
                },
                TableSpec {
                    name: "section_assignments",
                    columns: &["id", "section_id", "user_id", "start_date", "end_date"],
                },
                TableSpec {
                    name: "role_slot_assignments",
                    columns: &["id", "role_id", "section_slot_id", "start_date", "end_date"],
                },
            ],
        )?;
        Ok(Self { conn })
    }

    fn load_required_section(&self, id: SectionId) -> RepoResult<Section> {
        self.get_section(id)?
            .ok_or_else(|| RepoError::not_found("section", id))
    }

    fn load_required_slot(&self, id: SectionSlotId) -> RepoResult<SectionSlot> {
        self.get_slot(id)?
            .ok_or_else(|| RepoError::not_found("section slot", id))
    }
}

impl WriteScoped for SqliteOrbatRepository<'_> {
    fn in_write_scope<T, E, F>(&self, op: F) -> Result<T, E>
    where
        E: From<RepoError>,
        F: FnOnce() -> Result<T, E>,
    {
        run_in_write_scope(self.conn, op)
    }
}

impl OrbatRepository for SqliteOrbatRepository<'_> {
    fn create_platoon(&self, name: &str, description: &str) -> RepoResult<Platoon> {
        let scope = WriteScope::begin(self.conn)?;
        let sort_order = next_order(self.conn, PLATOONS, &ScopeKey::global())?;
        self.conn.execute(
            "INSERT INTO platoons (name, description, sort_order) VALUES (?1, ?2, ?3);",
            params![name, description, sort_order],
        )?;
        let id = self.conn.last_insert_rowid();
        scope.commit()?;

        info!(
            "event=platoon_create module=repo status=ok id={} sort_order={}",
            id, sort_order
        );
        Ok(Platoon {
            id,
            name: name.to_string(),
            description: description.to_string(),
            sort_order,
        })
    }

    fn get_platoon(&self, id: PlatoonId) -> RepoResult<Option<Platoon>> {
        let platoon = self
            .conn
            .query_row(
                "SELECT id, name, description, sort_order FROM platoons WHERE id = ?1;",
                [id],
                |row| {
                    Ok(Platoon {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        description: row.get(2)?,
                        sort_order: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(platoon)
    }

    fn list_platoons(&self) -> RepoResult<Vec<Platoon>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, description, sort_order
             FROM platoons
             ORDER BY sort_order ASC, id ASC;",
        )?;
        let mut rows = stmt.query([])?;
        let mut platoons = Vec::new();
        while let Some(row) = rows.next()? {
            platoons.push(Platoon {
                id: row.get(0)?,
                name: row.get(1)?,
                description: row.get(2)?,
                sort_order: row.get(3)?,
            });
        }
        Ok(platoons)
    }

    fn create_section(&self, section: &NewSection) -> RepoResult<Section> {
        let scope = WriteScope::begin(self.conn)?;
        let sort_order = next_order(
            self.conn,
            SECTIONS,
            &ScopeKey::nullable(section.platoon_id),
        )?;
        self.conn.execute(
            "INSERT INTO sections (
                name,
                shorthand,
                description,
                kind,
                max_size,
                platoon_id,
                sort_order
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7);",
            params![
                section.name,
                section.shorthand,
                section.description,
                section.kind,
                section.max_size,
                section.platoon_id,
                sort_order,
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        let created = self.load_required_section(id)?;
        scope.commit()?;

        info!(
            "event=section_create module=repo status=ok id={} sort_order={}",
            id, sort_order
        );
        Ok(created)
    }

    fn get_section(&self, id: SectionId) -> RepoResult<Option<Section>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {SECTION_COLUMNS} FROM sections WHERE id = ?1;"))?;
        let mut rows = stmt.query([id])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_section_row(row)?));
        }
        Ok(None)
    }

    fn list_sections(&self, platoon_id: Option<PlatoonId>) -> RepoResult<Vec<Section>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {SECTION_COLUMNS}
             FROM sections
             WHERE platoon_id IS ?1
             ORDER BY sort_order ASC, id ASC;"
        ))?;
        let mut rows = stmt.query([platoon_id])?;
        let mut sections = Vec::new();
        while let Some(row) = rows.next()? {
            sections.push(parse_section_row(row)?);
        }
        Ok(sections)
    }

    fn move_section_to_platoon(
        &self,
        id: SectionId,
        platoon_id: Option<PlatoonId>,
    ) -> RepoResult<Section> {
        let scope = WriteScope::begin(self.conn)?;
        reassign_scope(self.conn, SECTIONS, id, &ScopeKey::nullable(platoon_id))?;
        let section = self.load_required_section(id)?;
        scope.commit()?;
        Ok(section)
    }

    fn set_section_leader(&self, id: SectionId, leader_id: Option<UserId>) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE sections SET leader_id = ?2 WHERE id = ?1;",
            params![id, leader_id.map(|value| value.to_string())],
        )?;
        if changed == 0 {
            return Err(RepoError::not_found("section", id));
        }
        Ok(())
    }

    fn create_role(&self, role: &NewRole) -> RepoResult<Role> {
        self.conn.execute(
            "INSERT INTO roles (name, shorthand, description, max_per_section, is_rank)
             VALUES (?1, ?2, ?3, ?4, ?5);",
            params![
                role.name,
                role.shorthand,
                role.description,
                role.max_per_section,
                bool_to_int(role.is_rank),
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        info!(
            "event=role_create module=repo status=ok id={} is_rank={}",
            id, role.is_rank
        );
        Ok(Role {
            id,
            name: role.name.clone(),
            shorthand: role.shorthand.clone(),
            description: role.description.clone(),
            max_per_section: role.max_per_section,
            is_rank: role.is_rank,
        })
    }

    fn get_role(&self, id: RoleId) -> RepoResult<Option<Role>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {ROLE_COLUMNS} FROM roles WHERE id = ?1;"))?;
        let mut rows = stmt.query([id])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_role_row(row)?));
        }
        Ok(None)
    }

    fn list_roles(&self) -> RepoResult<Vec<Role>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {ROLE_COLUMNS} FROM roles ORDER BY id ASC;"))?;
        let mut rows = stmt.query([])?;
        let mut roles = Vec::new();
        while let Some(row) = rows.next()? {
            roles.push(parse_role_row(row)?);
        }
        Ok(roles)
    }

    fn set_allowed_sections(&self, role_id: RoleId, sections: &[SectionId]) -> RepoResult<()> {
        let scope = WriteScope::begin(self.conn)?;
        if self.get_role(role_id)?.is_none() {
            return Err(RepoError::not_found("role", role_id));
        }
        self.conn.execute(
            "DELETE FROM role_allowed_sections WHERE role_id = ?1;",
            [role_id],
        )?;
        for section_id in sections {
            self.conn.execute(
                "INSERT OR IGNORE INTO role_allowed_sections (role_id, section_id)
                 VALUES (?1, ?2);",
                [role_id, *section_id],
            )?;
        }
        scope.commit()?;
        Ok(())
    }

    fn allowed_sections(&self, role_id: RoleId) -> RepoResult<Vec<SectionId>> {
        collect_ids(
            self.conn,
            "SELECT section_id
             FROM role_allowed_sections
             WHERE role_id = ?1
             ORDER BY section_id ASC;",
            role_id,
        )
    }

    fn add_incompatibility(&self, pair: RolePair) -> RepoResult<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO role_incompatibilities (role_low, role_high)
             VALUES (?1, ?2);",
            [pair.low(), pair.high()],
        )?;
        Ok(())
    }

    fn remove_incompatibility(&self, pair: RolePair) -> RepoResult<()> {
        self.conn.execute(
            "DELETE FROM role_incompatibilities WHERE role_low = ?1 AND role_high = ?2;",
            [pair.low(), pair.high()],
        )?;
        Ok(())
    }

    fn incompatible_roles(&self, role_id: RoleId) -> RepoResult<Vec<RoleId>> {
        collect_ids(
            self.conn,
            "SELECT role_high FROM role_incompatibilities WHERE role_low = ?1
             UNION
             SELECT role_low FROM role_incompatibilities WHERE role_high = ?1
             ORDER BY 1 ASC;",
            role_id,
        )
    }

    fn create_slot(
        &self,
        section_id: SectionId,
        name: &str,
        colour: Option<SlotColour>,
    ) -> RepoResult<SectionSlot> {
        let scope = WriteScope::begin(self.conn)?;
        self.load_required_section(section_id)?;
        let sort_order = next_order(self.conn, SECTION_SLOTS, &ScopeKey::of(section_id))?;
        self.conn.execute(
            "INSERT INTO section_slots (name, section_id, user_id, colour, sort_order)
             VALUES (?1, ?2, NULL, ?3, ?4);",
            params![
                name,
                section_id,
                colour.map(SlotColour::as_str),
                sort_order
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        scope.commit()?;

        info!(
            "event=slot_create module=repo status=ok id={} section_id={} sort_order={}",
            id, section_id, sort_order
        );
        Ok(SectionSlot {
            id,
            name: name.to_string(),
            section_id,
            user_id: None,
            colour,
            sort_order,
        })
    }

    fn get_slot(&self, id: SectionSlotId) -> RepoResult<Option<SectionSlot>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {SLOT_COLUMNS} FROM section_slots WHERE id = ?1;"))?;
        let mut rows = stmt.query([id])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_slot_row(row)?));
        }
        Ok(None)
    }

    fn list_slots(&self, section_id: SectionId) -> RepoResult<Vec<SectionSlot>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {SLOT_COLUMNS}
             FROM section_slots
             WHERE section_id = ?1
             ORDER BY sort_order ASC, id ASC;"
        ))?;
        let mut rows = stmt.query([section_id])?;
        let mut slots = Vec::new();
        while let Some(row) = rows.next()? {
            slots.push(parse_slot_row(row)?);
        }
        Ok(slots)
    }

    fn set_slot_user(&self, id: SectionSlotId, user_id: Option<UserId>) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE section_slots SET user_id = ?2 WHERE id = ?1;",
            params![id, user_id.map(|value| value.to_string())],
        )?;
        if changed == 0 {
            return Err(RepoError::not_found("section slot", id));
        }
        Ok(())
    }

    fn vacate_user_slots(
        &self,
        section_id: SectionId,
        user_id: UserId,
        keep: Option<SectionSlotId>,
    ) -> RepoResult<Vec<SectionSlotId>> {
        let mut stmt = self.conn.prepare(
            "SELECT id
             FROM section_slots
             WHERE section_id = ?1
               AND user_id = ?2
               AND id IS NOT ?3
             ORDER BY sort_order ASC, id ASC;",
        )?;
        let mut rows = stmt.query(params![section_id, user_id.to_string(), keep])?;
        let mut cleared = Vec::new();
        while let Some(row) = rows.next()? {
            cleared.push(row.get::<_, SectionSlotId>(0)?);
        }
        for slot_id in &cleared {
            self.conn.execute(
                "UPDATE section_slots SET user_id = NULL WHERE id = ?1;",
                [slot_id],
            )?;
        }
        Ok(cleared)
    }

    fn slot_for_user(
        &self,
        section_id: SectionId,
        user_id: UserId,
    ) -> RepoResult<Option<SectionSlot>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {SLOT_COLUMNS}
             FROM section_slots
             WHERE section_id = ?1
               AND user_id = ?2
             ORDER BY sort_order ASC, id ASC
             LIMIT 1;"
        ))?;
        let mut rows = stmt.query(params![section_id, user_id.to_string()])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_slot_row(row)?));
        }
        Ok(None)
    }

    fn delete_slot(&self, id: SectionSlotId) -> RepoResult<SectionSlot> {
        let scope = WriteScope::begin(self.conn)?;
        let slot = self.load_required_slot(id)?;
        self.conn
            .execute("DELETE FROM section_slots WHERE id = ?1;", [id])?;
        renumber_scope(self.conn, SECTION_SLOTS, &ScopeKey::of(slot.section_id))?;
        scope.commit()?;

        info!(
            "event=slot_delete module=repo status=ok id={} section_id={}",
            id, slot.section_id
        );
        Ok(slot)
    }

    fn create_section_assignment(
        &self,
        section_id: SectionId,
        user_id: UserId,
        start_date: NaiveDate,
    ) -> RepoResult<SectionAssignment> {
        self.conn.execute(
            "INSERT INTO section_assignments (section_id, user_id, start_date, end_date)
             VALUES (?1, ?2, ?3, NULL);",
            params![section_id, user_id.to_string(), start_date],
        )?;
        Ok(SectionAssignment {
            id: self.conn.last_insert_rowid(),
            section_id,
            user_id,
            start_date,
            end_date: None,
        })
    }

    fn get_section_assignment(
        &self,
        id: SectionAssignmentId,
    ) -> RepoResult<Option<SectionAssignment>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, section_id, user_id, start_date, end_date
             FROM section_assignments
             WHERE id = ?1;",
        )?;
        let mut rows = stmt.query([id])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_section_assignment_row(row)?));
        }
        Ok(None)
    }

    fn active_section_assignment(
        &self,
        user_id: UserId,
    ) -> RepoResult<Option<SectionAssignment>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, section_id, user_id, start_date, end_date
             FROM section_assignments
             WHERE user_id = ?1
               AND end_date IS NULL
             ORDER BY start_date DESC, id DESC
             LIMIT 1;",
        )?;
        let mut rows = stmt.query([user_id.to_string()])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_section_assignment_row(row)?));
        }
        Ok(None)
    }

    fn end_section_assignment(
        &self,
        id: SectionAssignmentId,
        end_date: NaiveDate,
    ) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE section_assignments SET end_date = ?2 WHERE id = ?1;",
            params![id, end_date],
        )?;
        if changed == 0 {
            return Err(RepoError::not_found("section assignment", id));
        }
        Ok(())
    }

    fn list_active_members(&self, section_id: SectionId) -> RepoResult<Vec<SectionAssignment>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, section_id, user_id, start_date, end_date
             FROM section_assignments
             WHERE section_id = ?1
               AND end_date IS NULL
             ORDER BY start_date ASC, id ASC;",
        )?;
        let mut rows = stmt.query([section_id])?;
        let mut members = Vec::new();
        while let Some(row) = rows.next()? {
            members.push(parse_section_assignment_row(row)?);
        }
        Ok(members)
    }

    fn count_active_members(&self, section_id: SectionId) -> RepoResult<u32> {
        let count = self.conn.query_row(
            "SELECT COUNT(*)
             FROM section_assignments
             WHERE section_id = ?1
               AND end_date IS NULL;",
            [section_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    fn create_role_slot_assignment(
        &self,
        role_id: RoleId,
        slot_id: SectionSlotId,
        start_date: NaiveDate,
    ) -> RepoResult<RoleSlotAssignment> {
        self.conn.execute(
            "INSERT INTO role_slot_assignments (role_id, section_slot_id, start_date, end_date)
             VALUES (?1, ?2, ?3, NULL);",
            params![role_id, slot_id, start_date],
        )?;
        Ok(RoleSlotAssignment {
            id: self.conn.last_insert_rowid(),
            role_id,
            section_slot_id: slot_id,
            start_date,
            end_date: None,
        })
    }

    fn get_role_slot_assignment(
        &self,
        id: RoleSlotAssignmentId,
    ) -> RepoResult<Option<RoleSlotAssignment>> {
        let assignment = self
            .conn
            .query_row(
                "SELECT id, role_id, section_slot_id, start_date, end_date
                 FROM role_slot_assignments
                 WHERE id = ?1;",
                [id],
                parse_role_slot_assignment_row,
            )
            .optional()?;
        Ok(assignment)
    }

    fn end_role_slot_assignment(
        &self,
        id: RoleSlotAssignmentId,
        end_date: NaiveDate,
    ) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE role_slot_assignments SET end_date = ?2 WHERE id = ?1;",
            params![id, end_date],
        )?;
        if changed == 0 {
            return Err(RepoError::not_found("role slot assignment", id));
        }
        Ok(())
    }

    fn active_role_assignments_for_slot(
        &self,
        slot_id: SectionSlotId,
    ) -> RepoResult<Vec<RoleSlotAssignment>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, role_id, section_slot_id, start_date, end_date
             FROM role_slot_assignments
             WHERE section_slot_id = ?1
               AND end_date IS NULL
             ORDER BY id ASC;",
        )?;
        let assignments = stmt
            .query_map([slot_id], parse_role_slot_assignment_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(assignments)
    }

    fn count_active_role_in_section(
        &self,
        role_id: RoleId,
        section_id: SectionId,
    ) -> RepoResult<u32> {
        let count = self.conn.query_row(
            "SELECT COUNT(*)
             FROM role_slot_assignments a
             INNER JOIN section_slots s ON s.id = a.section_slot_id
             WHERE a.role_id = ?1
               AND s.section_id = ?2
               AND a.end_date IS NULL;",
            [role_id, section_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    fn active_rank_roles_in_section(&self, section_id: SectionId) -> RepoResult<Vec<RoleId>> {
        collect_ids(
            self.conn,
            "SELECT DISTINCT a.role_id
             FROM role_slot_assignments a
             INNER JOIN section_slots s ON s.id = a.section_slot_id
             INNER JOIN roles r ON r.id = a.role_id
             WHERE s.section_id = ?1
               AND r.is_rank = 1
               AND a.end_date IS NULL
             ORDER BY a.role_id ASC;",
            section_id,
        )
    }

    fn active_rank_role_for_slot(&self, slot_id: SectionSlotId) -> RepoResult<Option<Role>> {
        let mut stmt = self.conn.prepare(
            "SELECT r.id, r.name, r.shorthand, r.description, r.max_per_section, r.is_rank
             FROM role_slot_assignments a
             INNER JOIN roles r ON r.id = a.role_id
             WHERE a.section_slot_id = ?1
               AND r.is_rank = 1
               AND a.end_date IS NULL
             ORDER BY a.id ASC
             LIMIT 1;",
        )?;
        let mut rows = stmt.query([slot_id])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_role_row(row)?));
        }
        Ok(None)
    }
}

fn collect_ids(conn: &Connection, sql: &str, key: i64) -> RepoResult<Vec<i64>> {
    let mut stmt = conn.prepare(sql)?;
    let ids = stmt
        .query_map([key], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<i64>>>()?;
    Ok(ids)
}

fn parse_section_row(row: &Row<'_>) -> RepoResult<Section> {
    let leader_id = row
        .get::<_, Option<String>>("leader_id")?
        .map(|value| parse_uuid(&value, "sections.leader_id"))
        .transpose()?;
    Ok(Section {
        id: row.get("id")?,
        name: row.get("name")?,
        shorthand: row.get("shorthand")?,
        description: row.get("description")?,
        kind: row.get("kind")?,
        max_size: row.get("max_size")?,
        platoon_id: row.get("platoon_id")?,
        leader_id,
        sort_order: row.get("sort_order")?,
    })
}

fn parse_slot_row(row: &Row<'_>) -> RepoResult<SectionSlot> {
    let user_id = row
        .get::<_, Option<String>>("user_id")?
        .map(|value| parse_uuid(&value, "section_slots.user_id"))
        .transpose()?;
    let colour = match row.get::<_, Option<String>>("colour")? {
        None => None,
        Some(value) => Some(SlotColour::parse(&value).ok_or_else(|| {
            RepoError::InvalidData(format!("invalid colour `{value}` in section_slots.colour"))
        })?),
    };
    Ok(SectionSlot {
        id: row.get("id")?,
        name: row.get("name")?,
        section_id: row.get("section_id")?,
        user_id,
        colour,
        sort_order: row.get("sort_order")?,
    })
}

fn parse_role_row(row: &Row<'_>) -> RepoResult<Role> {
    Ok(Role {
        id: row.get(0)?,
        name: row.get(1)?,
        shorthand: row.get(2)?,
        description: row.get(3)?,
        max_per_section: row.get(4)?,
        is_rank: parse_bool(row.get(5)?, "roles.is_rank")?,
    })
}

fn parse_section_assignment_row(row: &Row<'_>) -> RepoResult<SectionAssignment> {
    let user_text: String = row.get("user_id")?;
    Ok(SectionAssignment {
        id: row.get("id")?,
        section_id: row.get("section_id")?,
        user_id: parse_uuid(&user_text, "section_assignments.user_id")?,
        start_date: row.get("start_date")?,
        end_date: row.get("end_date")?,
    })
}

fn parse_role_slot_assignment_row(row: &Row<'_>) -> rusqlite::Result<RoleSlotAssignment> {
    Ok(RoleSlotAssignment {
        id: row.get(0)?,
        role_id: row.get(1)?,
        section_slot_id: row.get(2)?,
        start_date: row.get(3)?,
        end_date: row.get(4)?,
    })
}
