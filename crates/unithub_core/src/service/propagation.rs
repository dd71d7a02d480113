//! Derived attribute propagation.
//!
//! # Responsibility
//! - Recompute a member's cached `rank` and `section_name` from live
//!   assignment, slot and role state.
//! - Accept explicit before/after change notifications from every code path
//!   that mutates section assignments, slots or role slot assignments.
//!
//! # Invariants
//! - A retired member carries neither rank nor section.
//! - "Active" means `end_date IS NULL`.
//! - Stored values are written only when they differ from the recomputed ones.
//! - Callers notify after their write commits, so recomputation always reads
//!   committed state.

use crate::model::user::{DerivedAttributes, User, UserId, DEFAULT_RANK};
use crate::repo::orbat_repo::OrbatRepository;
use crate::repo::user_repo::UserRepository;
use crate::repo::{RepoError, Retryable};
use log::{debug, info, warn};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Result type used by propagation.
pub type PropagationResult<T> = Result<T, PropagationError>;

/// Errors from attribute propagation.
#[derive(Debug)]
pub enum PropagationError {
    /// Member to recompute does not exist.
    UserNotFound(UserId),
    /// Repository-level failure.
    Repo(RepoError),
}

impl Display for PropagationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UserNotFound(id) => write!(f, "user not found: {id}"),
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for PropagationError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Repo(err) => Some(err),
            Self::UserNotFound(_) => None,
        }
    }
}

impl Retryable for PropagationError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::Repo(err) if err.is_retryable())
    }
}

impl From<RepoError> for PropagationError {
    fn from(value: RepoError) -> Self {
        Self::Repo(value)
    }
}

/// Which kind of record changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeSource {
    SectionAssignment,
    SectionSlot,
    RoleSlotAssignment,
}

impl ChangeSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SectionAssignment => "section_assignment",
            Self::SectionSlot => "section_slot",
            Self::RoleSlotAssignment => "role_slot_assignment",
        }
    }
}

/// Member associated with a record before and after one committed write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssignmentChange {
    pub source: ChangeSource,
    pub before: Option<UserId>,
    pub after: Option<UserId>,
}

impl AssignmentChange {
    /// Record created for (or updated without changing) `user_id`.
    pub fn touched(source: ChangeSource, user_id: Option<UserId>) -> Self {
        Self {
            source,
            before: user_id,
            after: user_id,
        }
    }

    /// Record moved from `before` to `after`.
    pub fn reassigned(source: ChangeSource, before: Option<UserId>, after: Option<UserId>) -> Self {
        Self {
            source,
            before,
            after,
        }
    }

    /// Distinct members to recompute, previous holder first.
    pub fn affected_users(&self) -> Vec<UserId> {
        let mut users = Vec::with_capacity(2);
        if let Some(before) = self.before {
            users.push(before);
        }
        if let Some(after) = self.after {
            if self.before != Some(after) {
                users.push(after);
            }
        }
        users
    }
}

/// Result of recomputing one member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecomputeOutcome {
    pub user_id: UserId,
    pub derived: DerivedAttributes,
    /// Whether stored values were rewritten.
    pub changed: bool,
}

/// Computes the derived attributes `user` should carry right now.
pub fn derive_attributes<O: OrbatRepository>(
    orbat: &O,
    user: &User,
) -> Result<DerivedAttributes, RepoError> {
    if user.is_retired() {
        return Ok(DerivedAttributes::retired());
    }

    let Some(assignment) = orbat.active_section_assignment(user.id)? else {
        return Ok(DerivedAttributes {
            rank: Some(DEFAULT_RANK.to_string()),
            section_name: None,
        });
    };
    let section = orbat
        .get_section(assignment.section_id)?
        .ok_or_else(|| RepoError::not_found("section", assignment.section_id))?;

    let rank = match orbat.slot_for_user(section.id, user.id)? {
        Some(slot) => orbat
            .active_rank_role_for_slot(slot.id)?
            .map(|role| role.shorthand),
        None => None,
    };
    Ok(DerivedAttributes {
        rank: Some(rank.unwrap_or_else(|| DEFAULT_RANK.to_string())),
        section_name: Some(section.name),
    })
}

/// Recomputes and stores one member's derived attributes.
pub fn recompute_user<U, O>(
    users: &U,
    orbat: &O,
    user_id: UserId,
) -> PropagationResult<RecomputeOutcome>
where
    U: UserRepository,
    O: OrbatRepository,
{
    let user = users
        .get_user(user_id)?
        .ok_or(PropagationError::UserNotFound(user_id))?;
    let derived = derive_attributes(orbat, &user)?;
    let changed = user.rank != derived.rank || user.section_name != derived.section_name;
    if changed {
        users.update_derived(user_id, &derived)?;
        info!(
            "event=derived_recompute module=service status=changed user_id={}",
            user_id
        );
    } else {
        debug!(
            "event=derived_recompute module=service status=unchanged user_id={}",
            user_id
        );
    }
    Ok(RecomputeOutcome {
        user_id,
        derived,
        changed,
    })
}

/// Recomputes every member affected by `change`.
///
/// Members that no longer exist are skipped.
pub fn propagate_change<U, O>(
    users: &U,
    orbat: &O,
    change: &AssignmentChange,
) -> PropagationResult<Vec<RecomputeOutcome>>
where
    U: UserRepository,
    O: OrbatRepository,
{
    let mut outcomes = Vec::new();
    for user_id in change.affected_users() {
        match recompute_user(users, orbat, user_id) {
            Ok(outcome) => outcomes.push(outcome),
            Err(PropagationError::UserNotFound(missing)) => {
                warn!(
                    "event=derived_propagate module=service status=skipped source={} user_id={}",
                    change.source.as_str(),
                    missing
                );
            }
            Err(err) => return Err(err),
        }
    }
    Ok(outcomes)
}

/// Change-notification entry point for hosts that mutate assignments directly.
pub struct AttributePropagator<U: UserRepository, O: OrbatRepository> {
    users: U,
    orbat: O,
}

impl<U: UserRepository, O: OrbatRepository> AttributePropagator<U, O> {
    pub fn new(users: U, orbat: O) -> Self {
        Self { users, orbat }
    }

    pub fn recompute(&self, user_id: UserId) -> PropagationResult<RecomputeOutcome> {
        recompute_user(&self.users, &self.orbat, user_id)
    }

    pub fn notify(&self, change: &AssignmentChange) -> PropagationResult<Vec<RecomputeOutcome>> {
        propagate_change(&self.users, &self.orbat, change)
    }

    /// Recomputes every member. Returns how many were rewritten.
    pub fn recompute_all(&self) -> PropagationResult<usize> {
        let mut changed = 0;
        for user in self.users.list_users()? {
            if recompute_user(&self.users, &self.orbat, user.id)?.changed {
                changed += 1;
            }
        }
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::{AssignmentChange, ChangeSource};
    use uuid::Uuid;

    #[test]
    fn reassignment_affects_both_users_once() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let change = AssignmentChange::reassigned(ChangeSource::SectionSlot, Some(a), Some(b));
        assert_eq!(change.affected_users(), vec![a, b]);

        let same = AssignmentChange::touched(ChangeSource::SectionAssignment, Some(a));
        assert_eq!(same.affected_users(), vec![a]);

        let vacant = AssignmentChange::touched(ChangeSource::RoleSlotAssignment, None);
        assert!(vacant.affected_users().is_empty());
    }
}
