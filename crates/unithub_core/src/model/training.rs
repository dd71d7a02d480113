//! Qualifications, their ordered criteria and member progress.
//!
//! # Invariants
//! - Criteria are ordered per qualification by the ordered collection manager.
//! - A member holds at most one record per qualification.
//! - A completed criterion is recorded once; existence means completion.

use crate::model::user::UserId;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

pub type QualificationId = i64;
pub type CriterionId = i64;
pub type UserQualificationId = i64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Qualification {
    pub id: QualificationId,
    pub name: String,
    pub description: String,
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualificationCriterion {
    pub id: CriterionId,
    pub qualification_id: QualificationId,
    pub name: String,
    pub description: String,
    pub sort_order: i64,
}

/// A member's standing in one qualification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserQualification {
    pub id: UserQualificationId,
    pub user_id: UserId,
    pub qualification_id: QualificationId,
    pub date_awarded: Option<NaiveDate>,
    pub latest_passed: Option<NaiveDate>,
    pub awarded_by: Option<UserId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedCriterion {
    pub user_qualification_id: UserQualificationId,
    pub criterion_id: CriterionId,
    pub completed_on: DateTime<Utc>,
}

/// Result of awarding one qualification to one member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AwardOutcome {
    pub user_qualification: UserQualification,
    /// `false` when the member already held the qualification.
    pub newly_awarded: bool,
    /// Criteria completed by this award.
    pub completed_criteria: Vec<CriterionId>,
}
