//! Read-side helpers over member history.
//!
//! # Responsibility
//! - Answer "what was true on this date" questions for one member.

use crate::model::history::{HistoryKind, HistoryPayload, HistoryRecord};
use crate::model::orbat::SectionId;
use crate::model::user::{UserId, UserStatus};
use crate::repo::history_repo::{HistoryError, HistoryRepository};
use crate::repo::orbat_repo::OrbatRepository;
use crate::repo::user_repo::UserRepository;
use crate::repo::RepoError;
use chrono::NaiveDate;
use std::error::Error;
use std::fmt::{Display, Formatter};

#[derive(Debug)]
pub enum HistoryServiceError {
    UserNotFound(UserId),
    Repo(RepoError),
    History(HistoryError),
}

impl Display for HistoryServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UserNotFound(id) => write!(f, "user not found: {id}"),
            Self::Repo(err) => write!(f, "{err}"),
            Self::History(err) => write!(f, "{err}"),
        }
    }
}

impl Error for HistoryServiceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Repo(err) => Some(err),
            Self::History(err) => Some(err),
            Self::UserNotFound(_) => None,
        }
    }
}

impl From<RepoError> for HistoryServiceError {
    fn from(value: RepoError) -> Self {
        Self::Repo(value)
    }
}

impl From<HistoryError> for HistoryServiceError {
    fn from(value: HistoryError) -> Self {
        Self::History(value)
    }
}

/// History query facade.
pub struct HistoryService<H, U, O>
where
    H: HistoryRepository,
    U: UserRepository,
    O: OrbatRepository,
{
    history: H,
    users: U,
    orbat: O,
}

impl<H, U, O> HistoryService<H, U, O>
where
    H: HistoryRepository,
    U: UserRepository,
    O: OrbatRepository,
{
    pub fn new(history: H, users: U, orbat: O) -> Self {
        Self {
            history,
            users,
            orbat,
        }
    }

    /// Full history of one kind, newest first.
    pub fn records(
        &self,
        user_id: UserId,
        kind: HistoryKind,
    ) -> Result<Vec<HistoryRecord>, HistoryServiceError> {
        Ok(self.history.list_for_user(user_id, kind)?)
    }

    pub fn section_on(
        &self,
        user_id: UserId,
        date: NaiveDate,
    ) -> Result<Option<SectionId>, HistoryServiceError> {
        let section = self
            .history
            .active_on(user_id, HistoryKind::SectionAssignment, date)?
            .into_iter()
            .find_map(|record| match record.payload {
                HistoryPayload::SectionAssignment { section_id } => Some(section_id),
                _ => None,
            });
        Ok(section)
    }

    pub fn status_on(
        &self,
        user_id: UserId,
        date: NaiveDate,
    ) -> Result<Option<UserStatus>, HistoryServiceError> {
        let status = self
            .history
            .active_on(user_id, HistoryKind::UserStatus, date)?
            .into_iter()
            .find_map(|record| match record.payload {
                HistoryPayload::UserStatus { status } => Some(status),
                _ => None,
            });
        Ok(status)
    }

    /// Username valid on `date` (current display name when none recorded),
    /// prefixed by `[shorthand]` of the section held that day.
    pub fn display_name_on_date(
        &self,
        user_id: UserId,
        date: NaiveDate,
    ) -> Result<String, HistoryServiceError> {
        let user = self
            .users
            .get_user(user_id)?
            .ok_or(HistoryServiceError::UserNotFound(user_id))?;

        let name = self
            .history
            .active_on(user_id, HistoryKind::Username, date)?
            .into_iter()
            .find_map(|record| match record.payload {
                HistoryPayload::Username { username } => Some(username),
                _ => None,
            })
            .unwrap_or(user.display_name);

        let shorthand = match self.section_on(user_id, date)? {
            Some(section_id) => self
                .orbat
                .get_section(section_id)?
                .map(|section| section.shorthand),
            None => None,
        };
        Ok(match shorthand {
            Some(shorthand) => format!("[{shorthand}] {name}"),
            None => name,
        })
    }
}
