//! Training and qualification use-case service.
//!
//! # Responsibility
//! - Award qualifications, alone or in bulk, completing their criteria.
//! - Track individual criterion completion and what is still missing.
//!
//! # Invariants
//! - An award completes every criterion of the qualification.
//! - `date_awarded` is set once, on the first award; `latest_passed` follows
//!   the most recent one.
//! - A first award writes one `TRAINING_COMPLETED` timeline entry.

use crate::model::timeline::{NewTimelineEntry, TimelineEventType};
use crate::model::training::{
    AwardOutcome, CriterionId, Qualification, QualificationCriterion, QualificationId,
    UserQualification,
};
use crate::model::user::{User, UserId};
use crate::repo::timeline_repo::TimelineRepository;
use crate::repo::training_repo::TrainingRepository;
use crate::repo::user_repo::UserRepository;
use crate::repo::{RepoError, Retryable};
use chrono::{NaiveDate, Utc};
use log::info;
use std::collections::HashSet;
use std::error::Error;
use std::fmt::{Display, Formatter};

#[derive(Debug)]
pub enum TrainingServiceError {
    /// Name is blank after trim.
    InvalidName,
    UserNotFound(UserId),
    QualificationNotFound(QualificationId),
    /// Qualification is retired and cannot be awarded.
    QualificationInactive(QualificationId),
    CriterionNotFound(CriterionId),
    Repo(RepoError),
}

impl Display for TrainingServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidName => write!(f, "name must not be blank"),
            Self::UserNotFound(id) => write!(f, "user not found: {id}"),
            Self::QualificationNotFound(id) => write!(f, "qualification not found: {id}"),
            Self::QualificationInactive(id) => write!(f, "qualification is inactive: {id}"),
            Self::CriterionNotFound(id) => write!(f, "criterion not found: {id}"),
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for TrainingServiceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Repo(err) => Some(err),
            _ => None,
        }
    }
}

impl Retryable for TrainingServiceError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::Repo(err) if err.is_retryable())
    }
}

impl From<RepoError> for TrainingServiceError {
    fn from(value: RepoError) -> Self {
        Self::Repo(value)
    }
}

/// Training service facade.
pub struct TrainingService<R, U, T>
where
    R: TrainingRepository,
    U: UserRepository,
    T: TimelineRepository,
{
    training: R,
    users: U,
    timeline: T,
}

impl<R, U, T> TrainingService<R, U, T>
where
    R: TrainingRepository,
    U: UserRepository,
    T: TimelineRepository,
{
    pub fn new(training: R, users: U, timeline: T) -> Self {
        Self {
            training,
            users,
            timeline,
        }
    }

    pub fn create_qualification(
        &self,
        name: &str,
        description: &str,
    ) -> Result<Qualification, TrainingServiceError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(TrainingServiceError::InvalidName);
        }
        Ok(self.training.create_qualification(name, description.trim())?)
    }

    /// Appends a criterion to the qualification's ordered list.
    pub fn add_criterion(
        &self,
        qualification_id: QualificationId,
        name: &str,
        description: &str,
    ) -> Result<QualificationCriterion, TrainingServiceError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(TrainingServiceError::InvalidName);
        }
        self.require_qualification(qualification_id)?;
        Ok(self
            .training
            .add_criterion(qualification_id, name, description.trim())?)
    }

    /// Deletes a criterion and closes the gap in its qualification's order.
    pub fn remove_criterion(&self, criterion_id: CriterionId) -> Result<(), TrainingServiceError> {
        if self.training.get_criterion(criterion_id)?.is_none() {
            return Err(TrainingServiceError::CriterionNotFound(criterion_id));
        }
        Ok(self.training.delete_criterion(criterion_id)?)
    }

    /// Retires or reinstates a qualification. Retired ones cannot be awarded.
    pub fn set_qualification_active(
        &self,
        qualification_id: QualificationId,
        is_active: bool,
    ) -> Result<(), TrainingServiceError> {
        self.require_qualification(qualification_id)?;
        Ok(self
            .training
            .set_qualification_active(qualification_id, is_active)?)
    }

    pub fn criteria(
        &self,
        qualification_id: QualificationId,
    ) -> Result<Vec<QualificationCriterion>, TrainingServiceError> {
        Ok(self.training.list_criteria(qualification_id)?)
    }

    /// Awards a qualification and completes every criterion still missing.
    pub fn award_to_user(
        &self,
        user_id: UserId,
        qualification_id: QualificationId,
        awarded_by: Option<UserId>,
        on: NaiveDate,
    ) -> Result<AwardOutcome, TrainingServiceError> {
        self.training
            .in_write_scope(|| self.award_one(user_id, qualification_id, awarded_by, on))
    }

    /// Awards the same qualification to many members in one transaction.
    pub fn award_bulk(
        &self,
        user_ids: &[UserId],
        qualification_id: QualificationId,
        awarded_by: Option<UserId>,
        on: NaiveDate,
    ) -> Result<Vec<AwardOutcome>, TrainingServiceError> {
        let outcomes = self.training.in_write_scope(|| {
            user_ids
                .iter()
                .map(|user_id| self.award_one(*user_id, qualification_id, awarded_by, on))
                .collect::<Result<Vec<_>, _>>()
        })?;
        info!(
            "event=training_award_bulk module=service status=ok qualification_id={} users={}",
            qualification_id,
            outcomes.len()
        );
        Ok(outcomes)
    }

    /// Marks one criterion completed. Returns `false` when it already was.
    pub fn complete_criterion(
        &self,
        user_id: UserId,
        criterion_id: CriterionId,
    ) -> Result<bool, TrainingServiceError> {
        self.training.in_write_scope(|| {
            self.require_user(user_id)?;
            let criterion = self
                .training
                .get_criterion(criterion_id)?
                .ok_or(TrainingServiceError::CriterionNotFound(criterion_id))?;
            let (record, _) = self
                .training
                .get_or_create_user_qualification(user_id, criterion.qualification_id)?;
            Ok(self.training.complete_criterion(record.id, criterion_id)?)
        })
    }

    /// Criteria not yet completed across every qualification the member has
    /// started, in qualification then position order.
    pub fn missing_criteria(
        &self,
        user_id: UserId,
    ) -> Result<Vec<QualificationCriterion>, TrainingServiceError> {
        let mut missing = Vec::new();
        for record in self.training.list_user_qualifications(user_id)? {
            let completed: HashSet<CriterionId> = self
                .training
                .completed_criteria(record.id)?
                .into_iter()
                .map(|done| done.criterion_id)
                .collect();
            missing.extend(
                self.training
                    .list_criteria(record.qualification_id)?
                    .into_iter()
                    .filter(|criterion| !completed.contains(&criterion.id)),
            );
        }
        Ok(missing)
    }

    pub fn qualifications_for_user(
        &self,
        user_id: UserId,
    ) -> Result<Vec<UserQualification>, TrainingServiceError> {
        Ok(self.training.list_user_qualifications(user_id)?)
    }

    fn award_one(
        &self,
        user_id: UserId,
        qualification_id: QualificationId,
        awarded_by: Option<UserId>,
        on: NaiveDate,
    ) -> Result<AwardOutcome, TrainingServiceError> {
        let user = self.require_user(user_id)?;
        let qualification = self.require_qualification(qualification_id)?;
        if !qualification.is_active {
            return Err(TrainingServiceError::QualificationInactive(qualification_id));
        }
        if let Some(awarded_by) = awarded_by {
            self.require_user(awarded_by)?;
        }

        let (record, _) = self
            .training
            .get_or_create_user_qualification(user_id, qualification_id)?;
        let newly_awarded = record.date_awarded.is_none();
        let date_awarded = record.date_awarded.or(Some(on));
        let awarded_by = if newly_awarded {
            awarded_by
        } else {
            record.awarded_by
        };
        self.training
            .set_awarded(record.id, date_awarded, Some(on), awarded_by)?;

        let mut completed_criteria = Vec::new();
        for criterion in self.training.list_criteria(qualification_id)? {
            if self.training.complete_criterion(record.id, criterion.id)? {
                completed_criteria.push(criterion.id);
            }
        }

        if newly_awarded {
            self.timeline.add_entry(
                &NewTimelineEntry::new(user_id, TimelineEventType::TrainingCompleted, Utc::now())
                    .snapshot(user.ranked_name())
                    .described(qualification.name.clone()),
            )?;
        }
        info!(
            "event=training_award module=service status=ok user_id={} qualification_id={} new={} completed={}",
            user_id,
            qualification_id,
            newly_awarded,
            completed_criteria.len()
        );

        Ok(AwardOutcome {
            user_qualification: UserQualification {
                date_awarded,
                latest_passed: Some(on),
                awarded_by,
                ..record
            },
            newly_awarded,
            completed_criteria,
        })
    }

    fn require_user(&self, id: UserId) -> Result<User, TrainingServiceError> {
        self.users
            .get_user(id)?
            .ok_or(TrainingServiceError::UserNotFound(id))
    }

    fn require_qualification(
        &self,
        id: QualificationId,
    ) -> Result<Qualification, TrainingServiceError> {
        self.training
            .get_qualification(id)?
            .ok_or(TrainingServiceError::QualificationNotFound(id))
    }
}
