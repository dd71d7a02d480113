//! Recruitment applications: joining the unit and requesting a section slot.
//!
//! # Responsibility
//! - Define unit and section application records.
//! - Own the unit application status workflow.
//!
//! # Invariants
//! - An application is pending while `processed_at` is `None`.
//! - `passed` and `denied` are final; reaching either stamps `processed_at`.
//! - A member is linked to at most one unit application.

use crate::model::orbat::SectionSlotId;
use crate::model::user::UserId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type UnitApplicationId = i64;
pub type SectionApplicationId = i64;

/// Progress of a unit application through onboarding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationStatus {
    Unclaimed,
    WaitingReply,
    /// Basic combat training is scheduled.
    BctPlanned,
    Passed,
    Denied,
}

impl ApplicationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unclaimed => "unclaimed",
            Self::WaitingReply => "waiting_reply",
            Self::BctPlanned => "bct_planned",
            Self::Passed => "passed",
            Self::Denied => "denied",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "unclaimed" => Some(Self::Unclaimed),
            "waiting_reply" => Some(Self::WaitingReply),
            "bct_planned" => Some(Self::BctPlanned),
            "passed" => Some(Self::Passed),
            "denied" => Some(Self::Denied),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Unclaimed => "Unclaimed",
            Self::WaitingReply => "Waiting reply",
            Self::BctPlanned => "BCT planned",
            Self::Passed => "Passed",
            Self::Denied => "Denied",
        }
    }

    pub fn is_final(self) -> bool {
        matches!(self, Self::Passed | Self::Denied)
    }

    /// Open statuses move freely among themselves. Only a planned BCT can
    /// pass, any open application can be denied, and final ones never move.
    pub fn can_move_to(self, next: Self) -> bool {
        if self.is_final() || self == next {
            return false;
        }
        match next {
            Self::Passed => self == Self::BctPlanned,
            Self::Denied | Self::Unclaimed | Self::WaitingReply | Self::BctPlanned => true,
        }
    }
}

/// Rejected status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidTransition {
    pub from: ApplicationStatus,
    pub to: ApplicationStatus,
}

impl Display for InvalidTransition {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "application cannot move from {} to {}",
            self.from.as_str(),
            self.to.as_str()
        )
    }
}

impl Error for InvalidTransition {}

/// Request to join the unit, made from an external account before the
/// applicant has a member record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitApplication {
    pub id: UnitApplicationId,
    /// Account name the applicant applied with.
    pub applicant_handle: String,
    /// Member record created during onboarding.
    pub user_id: Option<UserId>,
    pub teamspeak_id: Option<u32>,
    pub over_18: bool,
    pub status: ApplicationStatus,
    pub submitted_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub actioned_by: Option<UserId>,
}

impl UnitApplication {
    pub fn is_pending(&self) -> bool {
        self.processed_at.is_none()
    }

    /// Applies a validated status change, stamping processing on a final one.
    pub fn advance(
        &mut self,
        next: ApplicationStatus,
        actor: Option<UserId>,
        at: DateTime<Utc>,
    ) -> Result<(), InvalidTransition> {
        if !self.status.can_move_to(next) {
            return Err(InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        if next.is_final() {
            self.processed_at = Some(at);
            self.actioned_by = actor;
        }
        Ok(())
    }
}

/// Onboarding details staff fill in for a unit application.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicantDetails {
    pub teamspeak_id: Option<u32>,
    pub over_18: bool,
}

/// Member request for a specific section slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionApplication {
    pub id: SectionApplicationId,
    pub user_id: UserId,
    pub section_slot_id: SectionSlotId,
    pub submitted_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub actioned_by: Option<UserId>,
    pub denied: bool,
}

impl SectionApplication {
    pub fn is_pending(&self) -> bool {
        self.processed_at.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::{ApplicationStatus, UnitApplication};
    use chrono::{TimeZone, Utc};
    use uuid::Uuid;

    fn fresh() -> UnitApplication {
        UnitApplication {
            id: 1,
            applicant_handle: "recruit#0001".to_string(),
            user_id: None,
            teamspeak_id: None,
            over_18: true,
            status: ApplicationStatus::Unclaimed,
            submitted_at: Utc.with_ymd_and_hms(2024, 2, 1, 12, 0, 0).unwrap(),
            processed_at: None,
            actioned_by: None,
        }
    }

    #[test]
    fn passing_requires_planned_training() {
        use ApplicationStatus::*;
        assert!(!Unclaimed.can_move_to(Passed));
        assert!(!WaitingReply.can_move_to(Passed));
        assert!(BctPlanned.can_move_to(Passed));
        assert!(WaitingReply.can_move_to(Unclaimed));
        assert!(Unclaimed.can_move_to(Denied));
        assert!(!Denied.can_move_to(WaitingReply));
        assert!(!Passed.can_move_to(Denied));
        assert!(!BctPlanned.can_move_to(BctPlanned));
    }

    #[test]
    fn final_status_stamps_processing_once() {
        let staff = Uuid::new_v4();
        let at = Utc.with_ymd_and_hms(2024, 2, 3, 18, 0, 0).unwrap();
        let mut application = fresh();

        application
            .advance(ApplicationStatus::WaitingReply, Some(staff), at)
            .unwrap();
        assert!(application.is_pending());
        assert_eq!(application.actioned_by, None);

        application
            .advance(ApplicationStatus::Denied, Some(staff), at)
            .unwrap();
        assert_eq!(application.processed_at, Some(at));
        assert_eq!(application.actioned_by, Some(staff));

        let err = application
            .advance(ApplicationStatus::Unclaimed, None, at)
            .unwrap_err();
        assert_eq!(err.from, ApplicationStatus::Denied);
        assert_eq!(application.status, ApplicationStatus::Denied);
    }
}
