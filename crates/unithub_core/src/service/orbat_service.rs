//! Order-of-battle use-case service.
//!
//! # Responsibility
//! - Validate structure and role rules above the repository layer.
//! - Run every membership change, its history and its timeline entry in one
//!   transaction, then notify attribute propagation.
//!
//! # Invariants
//! - A member has at most one active section assignment.
//! - Active members of a section never exceed `max_size`.
//! - A member occupies at most one slot per section and only in a section
//!   they actively belong to.
//! - A role is never active twice on one slot.

use crate::model::history::{HistoryKind, HistoryPayload, HistoryRecord};
use crate::model::orbat::{
    NewRole, NewSection, Platoon, PlatoonId, Role, RoleId, RolePair, RoleSlotAssignment,
    RoleSlotAssignmentId, Section, SectionAssignment, SectionAssignmentId, SectionId,
    SectionSlot, SectionSlotId, SlotColour,
};
use crate::model::timeline::{NewTimelineEntry, TimelineEventType};
use crate::model::user::{User, UserId};
use crate::repo::history_repo::{HistoryError, HistoryRepository};
use crate::repo::orbat_repo::OrbatRepository;
use crate::repo::timeline_repo::TimelineRepository;
use crate::repo::user_repo::UserRepository;
use crate::repo::{RepoError, Retryable};
use crate::service::propagation::{
    propagate_change, AssignmentChange, ChangeSource, PropagationError, RecomputeOutcome,
};
use chrono::{NaiveDate, Utc};
use log::{info, warn};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Errors from order-of-battle service operations.
#[derive(Debug)]
pub enum OrbatServiceError {
    /// Name or shorthand is blank after trim.
    InvalidName(String),
    UserNotFound(UserId),
    PlatoonNotFound(PlatoonId),
    SectionNotFound(SectionId),
    SlotNotFound(SectionSlotId),
    RoleNotFound(RoleId),
    SectionAssignmentNotFound(SectionAssignmentId),
    RoleAssignmentNotFound(RoleSlotAssignmentId),
    /// Section has no room for another active member.
    SectionFull { section_id: SectionId, max_size: u32 },
    /// Member already has an active section assignment.
    AlreadyInSection {
        user_id: UserId,
        section_id: SectionId,
    },
    /// Member is not an active member of the slot's section.
    NotInSection {
        user_id: UserId,
        section_id: SectionId,
    },
    /// Role is restricted to other sections.
    RoleNotAllowed {
        role_id: RoleId,
        section_id: SectionId,
    },
    /// Role reached `max_per_section` in the section.
    RoleLimitReached {
        role_id: RoleId,
        section_id: SectionId,
        max_per_section: u32,
    },
    /// An incompatible rank role is active in the section.
    IncompatibleRole { role_id: RoleId, conflicting: RoleId },
    /// Role is already active on the slot.
    RoleAlreadyAssigned {
        role_id: RoleId,
        slot_id: SectionSlotId,
    },
    /// A role cannot be incompatible with itself.
    SelfIncompatibleRole(RoleId),
    /// Assignment was already ended.
    AssignmentEnded(i64),
    Repo(RepoError),
    History(HistoryError),
    Propagation(PropagationError),
}

impl Display for OrbatServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidName(field) => write!(f, "{field} must not be blank"),
            Self::UserNotFound(id) => write!(f, "user not found: {id}"),
            Self::PlatoonNotFound(id) => write!(f, "platoon not found: {id}"),
            Self::SectionNotFound(id) => write!(f, "section not found: {id}"),
            Self::SlotNotFound(id) => write!(f, "section slot not found: {id}"),
            Self::RoleNotFound(id) => write!(f, "role not found: {id}"),
            Self::SectionAssignmentNotFound(id) => {
                write!(f, "section assignment not found: {id}")
            }
            Self::RoleAssignmentNotFound(id) => write!(f, "role assignment not found: {id}"),
            Self::SectionFull {
                section_id,
                max_size,
            } => write!(f, "section {section_id} is full (max {max_size})"),
            Self::AlreadyInSection {
                user_id,
                section_id,
            } => write!(f, "user {user_id} is already in section {section_id}"),
            Self::NotInSection {
                user_id,
                section_id,
            } => write!(f, "user {user_id} is not a member of section {section_id}"),
            Self::RoleNotAllowed {
                role_id,
                section_id,
            } => write!(f, "role {role_id} is not allowed in section {section_id}"),
            Self::RoleLimitReached {
                role_id,
                section_id,
                max_per_section,
            } => write!(
                f,
                "role {role_id} reached its limit of {max_per_section} in section {section_id}"
            ),
            Self::IncompatibleRole {
                role_id,
                conflicting,
            } => write!(
                f,
                "role {role_id} is incompatible with active role {conflicting}"
            ),
            Self::RoleAlreadyAssigned { role_id, slot_id } => {
                write!(f, "role {role_id} is already active on slot {slot_id}")
            }
            Self::SelfIncompatibleRole(id) => {
                write!(f, "role {id} cannot be incompatible with itself")
            }
            Self::AssignmentEnded(id) => write!(f, "assignment already ended: {id}"),
            Self::Repo(err) => write!(f, "{err}"),
            Self::History(err) => write!(f, "{err}"),
            Self::Propagation(err) => write!(f, "{err}"),
        }
    }
}

impl Error for OrbatServiceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Repo(err) => Some(err),
            Self::History(err) => Some(err),
            Self::Propagation(err) => Some(err),
            _ => None,
        }
    }
}

impl Retryable for OrbatServiceError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Repo(err) => err.is_retryable(),
            Self::History(err) => err.is_retryable(),
            Self::Propagation(err) => err.is_retryable(),
            _ => false,
        }
    }
}

impl From<RepoError> for OrbatServiceError {
    fn from(value: RepoError) -> Self {
        Self::Repo(value)
    }
}

impl From<HistoryError> for OrbatServiceError {
    fn from(value: HistoryError) -> Self {
        Self::History(value)
    }
}

impl From<PropagationError> for OrbatServiceError {
    fn from(value: PropagationError) -> Self {
        match value {
            PropagationError::UserNotFound(id) => Self::UserNotFound(id),
            other => Self::Propagation(other),
        }
    }
}

/// Slot occupancy change and the members recomputed because of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotChange {
    pub slot: SectionSlot,
    pub previous_user: Option<UserId>,
    pub recomputed: Vec<RecomputeOutcome>,
}

/// Order-of-battle service facade.
pub struct OrbatService<O, U, H, T>
where
    O: OrbatRepository,
    U: UserRepository,
    H: HistoryRepository,
    T: TimelineRepository,
{
    orbat: O,
    users: U,
    history: H,
    timeline: T,
}

impl<O, U, H, T> OrbatService<O, U, H, T>
where
    O: OrbatRepository,
    U: UserRepository,
    H: HistoryRepository,
    T: TimelineRepository,
{
    /// Creates service from repository implementations sharing one connection.
    pub fn new(orbat: O, users: U, history: H, timeline: T) -> Self {
        Self {
            orbat,
            users,
            history,
            timeline,
        }
    }

    pub fn create_platoon(
        &self,
        name: &str,
        description: &str,
    ) -> Result<Platoon, OrbatServiceError> {
        let name = require_text(name, "platoon name")?;
        Ok(self.orbat.create_platoon(&name, description.trim())?)
    }

    pub fn list_platoons(&self) -> Result<Vec<Platoon>, OrbatServiceError> {
        Ok(self.orbat.list_platoons()?)
    }

    /// Creates a section at the end of its platoon's order.
    pub fn create_section(&self, section: NewSection) -> Result<Section, OrbatServiceError> {
        let mut section = section;
        section.name = require_text(&section.name, "section name")?;
        section.shorthand = require_text(&section.shorthand, "section shorthand")?;
        if let Some(platoon_id) = section.platoon_id {
            self.require_platoon(platoon_id)?;
        }
        Ok(self.orbat.create_section(&section)?)
    }

    pub fn list_sections(
        &self,
        platoon_id: Option<PlatoonId>,
    ) -> Result<Vec<Section>, OrbatServiceError> {
        Ok(self.orbat.list_sections(platoon_id)?)
    }

    /// Moves a section to the end of another platoon (or to no platoon).
    pub fn move_section_to_platoon(
        &self,
        section_id: SectionId,
        platoon_id: Option<PlatoonId>,
    ) -> Result<Section, OrbatServiceError> {
        self.require_section(section_id)?;
        if let Some(platoon_id) = platoon_id {
            self.require_platoon(platoon_id)?;
        }
        Ok(self.orbat.move_section_to_platoon(section_id, platoon_id)?)
    }

    pub fn set_section_leader(
        &self,
        section_id: SectionId,
        leader_id: Option<UserId>,
    ) -> Result<(), OrbatServiceError> {
        self.require_section(section_id)?;
        if let Some(leader_id) = leader_id {
            self.require_user(leader_id)?;
        }
        Ok(self.orbat.set_section_leader(section_id, leader_id)?)
    }

    pub fn create_role(&self, role: NewRole) -> Result<Role, OrbatServiceError> {
        let mut role = role;
        role.name = require_text(&role.name, "role name")?;
        role.shorthand = require_text(&role.shorthand, "role shorthand")?;
        Ok(self.orbat.create_role(&role)?)
    }

    /// Restricts a role to `sections`; an empty list lifts the restriction.
    pub fn set_allowed_sections(
        &self,
        role_id: RoleId,
        sections: &[SectionId],
    ) -> Result<(), OrbatServiceError> {
        self.require_role(role_id)?;
        for section_id in sections {
            self.require_section(*section_id)?;
        }
        Ok(self.orbat.set_allowed_sections(role_id, sections)?)
    }

    /// Declares two roles incompatible in both directions.
    pub fn add_incompatible_roles(&self, a: RoleId, b: RoleId) -> Result<(), OrbatServiceError> {
        let pair = RolePair::new(a, b).ok_or(OrbatServiceError::SelfIncompatibleRole(a))?;
        self.require_role(a)?;
        self.require_role(b)?;
        Ok(self.orbat.add_incompatibility(pair)?)
    }

    pub fn remove_incompatible_roles(
        &self,
        a: RoleId,
        b: RoleId,
    ) -> Result<(), OrbatServiceError> {
        let pair = RolePair::new(a, b).ok_or(OrbatServiceError::SelfIncompatibleRole(a))?;
        Ok(self.orbat.remove_incompatibility(pair)?)
    }

    pub fn create_slot(
        &self,
        section_id: SectionId,
        name: &str,
        colour: Option<SlotColour>,
    ) -> Result<SectionSlot, OrbatServiceError> {
        let name = require_text(name, "slot name")?;
        self.require_section(section_id)?;
        Ok(self.orbat.create_slot(section_id, &name, colour)?)
    }

    pub fn list_slots(&self, section_id: SectionId) -> Result<Vec<SectionSlot>, OrbatServiceError> {
        Ok(self.orbat.list_slots(section_id)?)
    }

    /// Deletes a slot, closing its occupant's role history on `on`, and
    /// recomputes the former occupant.
    pub fn delete_slot(
        &self,
        slot_id: SectionSlotId,
        on: NaiveDate,
    ) -> Result<SlotChange, OrbatServiceError> {
        let slot = self.orbat.in_write_scope(|| {
            let slot = self.require_slot(slot_id)?;
            if let Some(holder) = slot.user_id {
                for role in self.active_slot_roles(slot_id)? {
                    self.close_role_history(holder, role.id, slot.section_id, on)?;
                }
            }
            Ok::<_, OrbatServiceError>(self.orbat.delete_slot(slot_id)?)
        })?;
        let recomputed = self.propagate(AssignmentChange::reassigned(
            ChangeSource::SectionSlot,
            slot.user_id,
            None,
        ))?;
        Ok(SlotChange {
            previous_user: slot.user_id,
            slot,
            recomputed,
        })
    }

    /// Number of active members, as used by capacity checks.
    pub fn section_member_count(&self, section_id: SectionId) -> Result<u32, OrbatServiceError> {
        self.require_section(section_id)?;
        Ok(self.orbat.count_active_members(section_id)?)
    }

    pub fn list_active_members(
        &self,
        section_id: SectionId,
    ) -> Result<Vec<SectionAssignment>, OrbatServiceError> {
        Ok(self.orbat.list_active_members(section_id)?)
    }

    /// Starts a section membership on `on`.
    pub fn assign_user_to_section(
        &self,
        user_id: UserId,
        section_id: SectionId,
        on: NaiveDate,
    ) -> Result<SectionAssignment, OrbatServiceError> {
        let assignment = self
            .orbat
            .in_write_scope(|| self.start_membership(user_id, section_id, on))?;
        self.propagate(AssignmentChange::touched(
            ChangeSource::SectionAssignment,
            Some(user_id),
        ))?;
        Ok(assignment)
    }

    /// Ends a section membership on `on` and vacates the member's slots there.
    pub fn end_section_assignment(
        &self,
        assignment_id: SectionAssignmentId,
        on: NaiveDate,
    ) -> Result<SectionAssignment, OrbatServiceError> {
        let ended = self
            .orbat
            .in_write_scope(|| self.end_membership(assignment_id, on))?;
        self.propagate(AssignmentChange::reassigned(
            ChangeSource::SectionAssignment,
            Some(ended.user_id),
            None,
        ))?;
        Ok(ended)
    }

    /// Ends the member's current membership (if any) and starts a new one,
    /// atomically.
    pub fn transfer_user(
        &self,
        user_id: UserId,
        section_id: SectionId,
        on: NaiveDate,
    ) -> Result<SectionAssignment, OrbatServiceError> {
        let assignment = self.orbat.in_write_scope(|| {
            if let Some(current) = self.orbat.active_section_assignment(user_id)? {
                if current.section_id == section_id {
                    return Err(OrbatServiceError::AlreadyInSection {
                        user_id,
                        section_id,
                    });
                }
                self.end_membership(current.id, on)?;
            }
            self.start_membership(user_id, section_id, on)
        })?;
        info!(
            "event=section_transfer module=service status=ok user_id={} section_id={}",
            user_id, section_id
        );
        self.propagate(AssignmentChange::touched(
            ChangeSource::SectionAssignment,
            Some(user_id),
        ))?;
        Ok(assignment)
    }

    /// Puts `user_id` into a slot (or empties it with `None`).
    ///
    /// The member leaves any other slot of the same section. Role history
    /// follows the occupant: roles active on the slot are closed for the
    /// previous occupant and opened for the new one.
    pub fn assign_slot_user(
        &self,
        slot_id: SectionSlotId,
        user_id: Option<UserId>,
        on: NaiveDate,
    ) -> Result<SlotChange, OrbatServiceError> {
        let (slot, previous_user) = self.orbat.in_write_scope(|| {
            let slot = self.require_slot(slot_id)?;
            let previous_user = slot.user_id;
            if previous_user == user_id {
                return Ok::<_, OrbatServiceError>((slot, previous_user));
            }

            if let Some(user_id) = user_id {
                self.require_user(user_id)?;
                self.require_membership(user_id, slot.section_id)?;
                self.leave_other_slots(user_id, slot.section_id, slot_id, on)?;
            }
            self.orbat.set_slot_user(slot_id, user_id)?;

            let roles = self.active_slot_roles(slot_id)?;
            if let Some(previous) = previous_user {
                for role in &roles {
                    self.close_role_history(previous, role.id, slot.section_id, on)?;
                }
            }
            if let Some(user_id) = user_id {
                for role in &roles {
                    self.open_role_history(user_id, role, slot.section_id, on)?;
                }
            }
            let updated = self.require_slot(slot_id)?;
            Ok((updated, previous_user))
        })?;

        let recomputed = self.propagate(AssignmentChange::reassigned(
            ChangeSource::SectionSlot,
            previous_user,
            user_id,
        ))?;
        Ok(SlotChange {
            slot,
            previous_user,
            recomputed,
        })
    }

    /// Activates a role on a slot after checking section, limit and
    /// incompatibility rules.
    pub fn assign_role_to_slot(
        &self,
        role_id: RoleId,
        slot_id: SectionSlotId,
        on: NaiveDate,
    ) -> Result<RoleSlotAssignment, OrbatServiceError> {
        let (assignment, holder) = self.orbat.in_write_scope(|| {
            let role = self.require_role(role_id)?;
            let slot = self.require_slot(slot_id)?;
            self.check_role_rules(&role, &slot)?;

            let assignment = self
                .orbat
                .create_role_slot_assignment(role_id, slot_id, on)?;
            if let Some(holder) = slot.user_id {
                self.open_role_history(holder, &role, slot.section_id, on)?;
            }
            Ok::<_, OrbatServiceError>((assignment, slot.user_id))
        })?;

        info!(
            "event=role_assign module=service status=ok role_id={} slot_id={}",
            role_id, slot_id
        );
        self.propagate(AssignmentChange::touched(
            ChangeSource::RoleSlotAssignment,
            holder,
        ))?;
        Ok(assignment)
    }

    /// Ends a role on its slot on `on`.
    pub fn end_role_assignment(
        &self,
        assignment_id: RoleSlotAssignmentId,
        on: NaiveDate,
    ) -> Result<RoleSlotAssignment, OrbatServiceError> {
        let (ended, holder) = self.orbat.in_write_scope(|| {
            let assignment = self
                .orbat
                .get_role_slot_assignment(assignment_id)?
                .ok_or(OrbatServiceError::RoleAssignmentNotFound(assignment_id))?;
            if !assignment.is_active() {
                return Err(OrbatServiceError::AssignmentEnded(assignment_id));
            }
            let end = on.max(assignment.start_date);
            self.orbat.end_role_slot_assignment(assignment_id, end)?;
            let slot = self.require_slot(assignment.section_slot_id)?;
            if let Some(holder) = slot.user_id {
                self.close_role_history(holder, assignment.role_id, slot.section_id, on)?;
            }
            Ok((
                RoleSlotAssignment {
                    end_date: Some(end),
                    ..assignment
                },
                slot.user_id,
            ))
        })?;

        self.propagate(AssignmentChange::touched(
            ChangeSource::RoleSlotAssignment,
            holder,
        ))?;
        Ok(ended)
    }

    /// Roles currently active on a slot, by assignment order.
    pub fn active_slot_roles(&self, slot_id: SectionSlotId) -> Result<Vec<Role>, OrbatServiceError> {
        let mut roles = Vec::new();
        for assignment in self.orbat.active_role_assignments_for_slot(slot_id)? {
            roles.push(self.require_role(assignment.role_id)?);
        }
        Ok(roles)
    }

    fn start_membership(
        &self,
        user_id: UserId,
        section_id: SectionId,
        on: NaiveDate,
    ) -> Result<SectionAssignment, OrbatServiceError> {
        let user = self.require_user(user_id)?;
        let section = self.require_section(section_id)?;
        if let Some(current) = self.orbat.active_section_assignment(user_id)? {
            return Err(OrbatServiceError::AlreadyInSection {
                user_id,
                section_id: current.section_id,
            });
        }
        let members = self.orbat.count_active_members(section_id)?;
        if members >= section.max_size {
            warn!(
                "event=section_assign module=service status=rejected reason=full section_id={}",
                section_id
            );
            return Err(OrbatServiceError::SectionFull {
                section_id,
                max_size: section.max_size,
            });
        }

        let assignment = self
            .orbat
            .create_section_assignment(section_id, user_id, on)?;
        self.history.save(&HistoryRecord::new(
            user_id,
            on,
            HistoryPayload::SectionAssignment { section_id },
        ))?;
        self.record_timeline(&user, TimelineEventType::SectionJoined, section_id)?;

        info!(
            "event=section_assign module=service status=ok user_id={} section_id={} assignment_id={}",
            user_id, section_id, assignment.id
        );
        Ok(assignment)
    }

    fn end_membership(
        &self,
        assignment_id: SectionAssignmentId,
        on: NaiveDate,
    ) -> Result<SectionAssignment, OrbatServiceError> {
        let assignment = self
            .orbat
            .get_section_assignment(assignment_id)?
            .ok_or(OrbatServiceError::SectionAssignmentNotFound(assignment_id))?;
        if !assignment.is_active() {
            return Err(OrbatServiceError::AssignmentEnded(assignment_id));
        }
        let user = self.require_user(assignment.user_id)?;
        let section_id = assignment.section_id;
        let end = on.max(assignment.start_date);
        self.orbat.end_section_assignment(assignment_id, end)?;

        if let Some(slot) = self.orbat.slot_for_user(section_id, user.id)? {
            for role in self.active_slot_roles(slot.id)? {
                self.close_role_history(user.id, role.id, section_id, on)?;
            }
        }
        let vacated = self.orbat.vacate_user_slots(section_id, user.id, None)?;
        self.close_open_history(user.id, HistoryKind::SectionAssignment, on, |payload| {
            matches!(
                payload,
                HistoryPayload::SectionAssignment { section_id: id } if *id == section_id
            )
        })?;
        self.record_timeline(&user, TimelineEventType::SectionLeft, section_id)?;

        info!(
            "event=section_unassign module=service status=ok user_id={} section_id={} vacated_slots={}",
            user.id,
            section_id,
            vacated.len()
        );
        Ok(SectionAssignment {
            end_date: Some(end),
            ..assignment
        })
    }

    /// Vacates the member's other slots in the section and closes the role
    /// history they carried there.
    fn leave_other_slots(
        &self,
        user_id: UserId,
        section_id: SectionId,
        keep: SectionSlotId,
        on: NaiveDate,
    ) -> Result<(), OrbatServiceError> {
        for slot_id in self
            .orbat
            .vacate_user_slots(section_id, user_id, Some(keep))?
        {
            for role in self.active_slot_roles(slot_id)? {
                self.close_role_history(user_id, role.id, section_id, on)?;
            }
        }
        Ok(())
    }

    fn check_role_rules(&self, role: &Role, slot: &SectionSlot) -> Result<(), OrbatServiceError> {
        let section_id = slot.section_id;
        let allowed = self.orbat.allowed_sections(role.id)?;
        if !allowed.is_empty() && !allowed.contains(&section_id) {
            return Err(OrbatServiceError::RoleNotAllowed {
                role_id: role.id,
                section_id,
            });
        }

        let on_slot = self.orbat.active_role_assignments_for_slot(slot.id)?;
        if on_slot.iter().any(|assignment| assignment.role_id == role.id) {
            return Err(OrbatServiceError::RoleAlreadyAssigned {
                role_id: role.id,
                slot_id: slot.id,
            });
        }

        if let Some(max_per_section) = role.max_per_section {
            let current = self.orbat.count_active_role_in_section(role.id, section_id)?;
            if current >= max_per_section {
                return Err(OrbatServiceError::RoleLimitReached {
                    role_id: role.id,
                    section_id,
                    max_per_section,
                });
            }
        }

        let incompatible = self.orbat.incompatible_roles(role.id)?;
        if let Some(conflicting) = self
            .orbat
            .active_rank_roles_in_section(section_id)?
            .into_iter()
            .find(|active| incompatible.contains(active))
        {
            return Err(OrbatServiceError::IncompatibleRole {
                role_id: role.id,
                conflicting,
            });
        }
        Ok(())
    }

    fn open_role_history(
        &self,
        user_id: UserId,
        role: &Role,
        section_id: SectionId,
        on: NaiveDate,
    ) -> Result<(), OrbatServiceError> {
        self.history.save(&HistoryRecord::new(
            user_id,
            on,
            HistoryPayload::RoleAssignment {
                role_id: Some(role.id),
                role_name_at_assignment: role.name.clone(),
                section_id,
            },
        ))?;
        let user = self.require_user(user_id)?;
        self.timeline.add_entry(
            &NewTimelineEntry::new(user_id, TimelineEventType::RoleAssigned, Utc::now())
                .in_section(section_id)
                .snapshot(user.ranked_name())
                .described(role.name.clone()),
        )?;
        Ok(())
    }

    fn close_role_history(
        &self,
        user_id: UserId,
        role_id: RoleId,
        section_id: SectionId,
        on: NaiveDate,
    ) -> Result<(), OrbatServiceError> {
        self.close_open_history(user_id, HistoryKind::RoleAssignment, on, |payload| {
            matches!(
                payload,
                HistoryPayload::RoleAssignment { role_id: Some(id), section_id: section, .. }
                    if *id == role_id && *section == section_id
            )
        })
    }

    /// Ends every open record of `kind` accepted by `matches` on `on`. A
    /// record started the same day becomes degenerate and is pruned.
    fn close_open_history(
        &self,
        user_id: UserId,
        kind: HistoryKind,
        on: NaiveDate,
        matches: impl Fn(&HistoryPayload) -> bool,
    ) -> Result<(), OrbatServiceError> {
        for record in self.history.open_records(user_id, kind)? {
            if !matches(&record.payload) {
                continue;
            }
            let end = on.max(record.start_date);
            self.history.save(&record.ending(end))?;
        }
        Ok(())
    }

    fn record_timeline(
        &self,
        user: &User,
        event_type: TimelineEventType,
        section_id: SectionId,
    ) -> Result<(), OrbatServiceError> {
        self.timeline.add_entry(
            &NewTimelineEntry::new(user.id, event_type, Utc::now())
                .in_section(section_id)
                .snapshot(user.ranked_name()),
        )?;
        Ok(())
    }

    fn propagate(
        &self,
        change: AssignmentChange,
    ) -> Result<Vec<RecomputeOutcome>, OrbatServiceError> {
        Ok(propagate_change(&self.users, &self.orbat, &change)?)
    }

    fn require_membership(
        &self,
        user_id: UserId,
        section_id: SectionId,
    ) -> Result<(), OrbatServiceError> {
        match self.orbat.active_section_assignment(user_id)? {
            Some(current) if current.section_id == section_id => Ok(()),
            _ => Err(OrbatServiceError::NotInSection {
                user_id,
                section_id,
            }),
        }
    }

    fn require_user(&self, id: UserId) -> Result<User, OrbatServiceError> {
        self.users
            .get_user(id)?
            .ok_or(OrbatServiceError::UserNotFound(id))
    }

    fn require_platoon(&self, id: PlatoonId) -> Result<Platoon, OrbatServiceError> {
        self.orbat
            .get_platoon(id)?
            .ok_or(OrbatServiceError::PlatoonNotFound(id))
    }

    fn require_section(&self, id: SectionId) -> Result<Section, OrbatServiceError> {
        self.orbat
            .get_section(id)?
            .ok_or(OrbatServiceError::SectionNotFound(id))
    }

    fn require_slot(&self, id: SectionSlotId) -> Result<SectionSlot, OrbatServiceError> {
        self.orbat
            .get_slot(id)?
            .ok_or(OrbatServiceError::SlotNotFound(id))
    }

    fn require_role(&self, id: RoleId) -> Result<Role, OrbatServiceError> {
        self.orbat
            .get_role(id)?
            .ok_or(OrbatServiceError::RoleNotFound(id))
    }
}

fn require_text(value: &str, field: &str) -> Result<String, OrbatServiceError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(OrbatServiceError::InvalidName(field.to_string()));
    }
    Ok(trimmed.to_string())
}
