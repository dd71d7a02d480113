//! Member use-case service.
//!
//! # Responsibility
//! - Validate member input above the repository layer.
//! - Record status and username history alongside the current values.
//!
//! # Invariants
//! - Status and username changes write current state and history in one
//!   transaction.
//! - Derived attributes are recomputed after a status change commits.

use crate::model::history::{HistoryPayload, HistoryRecord};
use crate::model::timeline::{NewTimelineEntry, TimelineEventType};
use crate::model::user::{validate_username, User, UserId, UserStatus, UserValidationError};
use crate::repo::history_repo::{HistoryError, HistoryRepository};
use crate::repo::orbat_repo::OrbatRepository;
use crate::repo::timeline_repo::TimelineRepository;
use crate::repo::user_repo::UserRepository;
use crate::repo::{RepoError, Retryable};
use crate::service::propagation::{recompute_user, PropagationError, RecomputeOutcome};
use chrono::{NaiveDate, Utc};
use log::info;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Errors from member service operations.
#[derive(Debug)]
pub enum UserServiceError {
    Validation(UserValidationError),
    UserNotFound(UserId),
    Repo(RepoError),
    History(HistoryError),
    Propagation(PropagationError),
}

impl Display for UserServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::UserNotFound(id) => write!(f, "user not found: {id}"),
            Self::Repo(err) => write!(f, "{err}"),
            Self::History(err) => write!(f, "{err}"),
            Self::Propagation(err) => write!(f, "{err}"),
        }
    }
}

impl Error for UserServiceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Repo(err) => Some(err),
            Self::History(err) => Some(err),
            Self::Propagation(err) => Some(err),
            Self::UserNotFound(_) => None,
        }
    }
}

impl Retryable for UserServiceError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Repo(err) => err.is_retryable(),
            Self::History(err) => err.is_retryable(),
            Self::Propagation(err) => err.is_retryable(),
            Self::Validation(_) | Self::UserNotFound(_) => false,
        }
    }
}

impl From<UserValidationError> for UserServiceError {
    fn from(value: UserValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<RepoError> for UserServiceError {
    fn from(value: RepoError) -> Self {
        Self::Repo(value)
    }
}

impl From<HistoryError> for UserServiceError {
    fn from(value: HistoryError) -> Self {
        Self::History(value)
    }
}

impl From<PropagationError> for UserServiceError {
    fn from(value: PropagationError) -> Self {
        match value {
            PropagationError::UserNotFound(id) => Self::UserNotFound(id),
            other => Self::Propagation(other),
        }
    }
}

/// Member service facade.
pub struct UserService<U, O, H, T>
where
    U: UserRepository,
    O: OrbatRepository,
    H: HistoryRepository,
    T: TimelineRepository,
{
    users: U,
    orbat: O,
    history: H,
    timeline: T,
}

impl<U, O, H, T> UserService<U, O, H, T>
where
    U: UserRepository,
    O: OrbatRepository,
    H: HistoryRepository,
    T: TimelineRepository,
{
    pub fn new(users: U, orbat: O, history: H, timeline: T) -> Self {
        Self {
            users,
            orbat,
            history,
            timeline,
        }
    }

    /// Creates an active member who joined on `joined_on`.
    pub fn create_user(
        &self,
        display_name: &str,
        username: &str,
        joined_on: NaiveDate,
    ) -> Result<User, UserServiceError> {
        let user = User::new(display_name.trim(), username.trim());
        user.validate()?;

        self.users.in_write_scope(|| {
            self.users.create_user(&user)?;
            self.history.save(&HistoryRecord::new(
                user.id,
                joined_on,
                HistoryPayload::UserStatus {
                    status: UserStatus::Active,
                },
            ))?;
            self.history.save(&HistoryRecord::new(
                user.id,
                joined_on,
                HistoryPayload::Username {
                    username: user.username.clone(),
                },
            ))?;
            self.timeline.add_entry(
                &NewTimelineEntry::new(user.id, TimelineEventType::UnitJoined, Utc::now())
                    .snapshot(user.ranked_name()),
            )?;
            Ok::<_, UserServiceError>(())
        })?;

        info!("event=user_create module=service status=ok user_id={}", user.id);
        Ok(user)
    }

    pub fn get_user(&self, id: UserId) -> Result<User, UserServiceError> {
        self.users
            .get_user(id)?
            .ok_or(UserServiceError::UserNotFound(id))
    }

    pub fn list_users(&self) -> Result<Vec<User>, UserServiceError> {
        Ok(self.users.list_users()?)
    }

    /// Changes status from `on`, then recomputes rank and section.
    pub fn set_status(
        &self,
        id: UserId,
        status: UserStatus,
        on: NaiveDate,
    ) -> Result<RecomputeOutcome, UserServiceError> {
        self.users.in_write_scope(|| {
            let user = self.get_user(id)?;
            if user.status == status {
                return Ok(());
            }
            self.users.update_status(id, status)?;
            self.history.save(&HistoryRecord::new(
                id,
                on,
                HistoryPayload::UserStatus { status },
            ))?;
            if status == UserStatus::Retired {
                self.timeline.add_entry(
                    &NewTimelineEntry::new(id, TimelineEventType::UnitLeft, Utc::now())
                        .snapshot(user.ranked_name()),
                )?;
            }
            info!(
                "event=user_status module=service status=ok user_id={} new_status={}",
                id,
                status.as_str()
            );
            Ok::<_, UserServiceError>(())
        })?;
        Ok(recompute_user(&self.users, &self.orbat, id)?)
    }

    /// Changes username from `on` and records the change in history.
    pub fn rename(
        &self,
        id: UserId,
        username: &str,
        on: NaiveDate,
    ) -> Result<User, UserServiceError> {
        let username = username.trim();
        validate_username(username)?;
        self.users.in_write_scope(|| {
            let user = self.get_user(id)?;
            if user.username == username {
                return Ok(());
            }
            self.users.update_username(id, username)?;
            self.history.save(&HistoryRecord::new(
                id,
                on,
                HistoryPayload::Username {
                    username: username.to_string(),
                },
            ))?;
            Ok::<_, UserServiceError>(())
        })?;
        self.get_user(id)
    }

    pub fn set_callsign(
        &self,
        id: UserId,
        callsign: Option<&str>,
    ) -> Result<User, UserServiceError> {
        let mut user = self.get_user(id)?;
        user.callsign = callsign
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string);
        user.validate()?;
        self.users.update_callsign(id, user.callsign.as_deref())?;
        Ok(user)
    }
}
