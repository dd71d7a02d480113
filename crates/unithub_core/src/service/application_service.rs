//! Recruitment and onboarding service.
//!
//! # Responsibility
//! - Take unit applications and walk them through onboarding.
//! - Take member requests for section slots and record staff decisions.
//!
//! # Invariants
//! - Processed applications are read-only.
//! - A unit application passes only with a linked member record.
//! - A member holds at most one pending request per slot.

use crate::model::application::{
    ApplicantDetails, ApplicationStatus, InvalidTransition, SectionApplication,
    SectionApplicationId, UnitApplication, UnitApplicationId,
};
use crate::model::orbat::{SectionId, SectionSlotId};
use crate::model::user::UserId;
use crate::repo::application_repo::ApplicationRepository;
use crate::repo::orbat_repo::OrbatRepository;
use crate::repo::user_repo::UserRepository;
use crate::repo::{RepoError, Retryable};
use chrono::Utc;
use log::info;
use std::error::Error;
use std::fmt::{Display, Formatter};

#[derive(Debug)]
pub enum ApplicationServiceError {
    /// Applicant handle is blank after trim.
    InvalidHandle,
    /// Another application already uses this handle.
    DuplicateApplicant(String),
    ApplicationNotFound(i64),
    /// The application was already passed or denied.
    AlreadyProcessed(i64),
    Transition(InvalidTransition),
    /// Passing needs a member record linked to the application.
    NoLinkedMember(UnitApplicationId),
    /// The member is linked to a different unit application.
    MemberAlreadyLinked {
        user_id: UserId,
        application_id: UnitApplicationId,
    },
    /// The member already has a pending request for this slot.
    DuplicateSlotRequest(SectionSlotId),
    UserNotFound(UserId),
    SlotNotFound(SectionSlotId),
    Repo(RepoError),
}

impl Display for ApplicationServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidHandle => write!(f, "applicant handle must not be blank"),
            Self::DuplicateApplicant(handle) => {
                write!(f, "an application for `{handle}` already exists")
            }
            Self::ApplicationNotFound(id) => write!(f, "application not found: {id}"),
            Self::AlreadyProcessed(id) => write!(f, "application {id} is already processed"),
            Self::Transition(err) => write!(f, "{err}"),
            Self::NoLinkedMember(id) => {
                write!(f, "application {id} has no member record to pass")
            }
            Self::MemberAlreadyLinked {
                user_id,
                application_id,
            } => write!(
                f,
                "user {user_id} is already linked to application {application_id}"
            ),
            Self::DuplicateSlotRequest(slot_id) => {
                write!(f, "a request for slot {slot_id} is already pending")
            }
            Self::UserNotFound(id) => write!(f, "user not found: {id}"),
            Self::SlotNotFound(id) => write!(f, "section slot not found: {id}"),
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for ApplicationServiceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Transition(err) => Some(err),
            Self::Repo(err) => Some(err),
            _ => None,
        }
    }
}

impl Retryable for ApplicationServiceError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::Repo(err) if err.is_retryable())
    }
}

impl From<RepoError> for ApplicationServiceError {
    fn from(value: RepoError) -> Self {
        Self::Repo(value)
    }
}

impl From<InvalidTransition> for ApplicationServiceError {
    fn from(value: InvalidTransition) -> Self {
        Self::Transition(value)
    }
}

/// Application service facade.
pub struct ApplicationService<A, U, O>
where
    A: ApplicationRepository,
    U: UserRepository,
    O: OrbatRepository,
{
    applications: A,
    users: U,
    orbat: O,
}

impl<A, U, O> ApplicationService<A, U, O>
where
    A: ApplicationRepository,
    U: UserRepository,
    O: OrbatRepository,
{
    pub fn new(applications: A, users: U, orbat: O) -> Self {
        Self {
            applications,
            users,
            orbat,
        }
    }

    /// Records a new unit application in `unclaimed`.
    pub fn submit_unit_application(
        &self,
        applicant_handle: &str,
    ) -> Result<UnitApplication, ApplicationServiceError> {
        let handle = applicant_handle.trim();
        if handle.is_empty() {
            return Err(ApplicationServiceError::InvalidHandle);
        }
        self.applications.in_write_scope(|| {
            if self.applications.unit_application_by_handle(handle)?.is_some() {
                return Err(ApplicationServiceError::DuplicateApplicant(
                    handle.to_string(),
                ));
            }
            Ok(self
                .applications
                .create_unit_application(handle, Utc::now())?)
        })
    }

    pub fn unit_application(
        &self,
        id: UnitApplicationId,
    ) -> Result<UnitApplication, ApplicationServiceError> {
        self.applications
            .get_unit_application(id)?
            .ok_or(ApplicationServiceError::ApplicationNotFound(id))
    }

    /// Unprocessed unit applications, oldest first.
    pub fn pending_unit_applications(
        &self,
    ) -> Result<Vec<UnitApplication>, ApplicationServiceError> {
        Ok(self.applications.list_pending_unit_applications()?)
    }

    /// Moves a unit application along its workflow. `passed` and `denied`
    /// stamp the processing time and the acting staff member.
    pub fn set_unit_status(
        &self,
        id: UnitApplicationId,
        status: ApplicationStatus,
        actor: Option<UserId>,
    ) -> Result<UnitApplication, ApplicationServiceError> {
        self.applications.in_write_scope(|| {
            let mut application = self.pending_unit(id)?;
            if status == ApplicationStatus::Passed && application.user_id.is_none() {
                return Err(ApplicationServiceError::NoLinkedMember(id));
            }
            application.advance(status, actor, Utc::now())?;
            self.applications.update_unit_application(&application)?;
            info!(
                "event=unit_application_status module=service status=ok id={} new_status={}",
                id,
                status.as_str()
            );
            Ok(application)
        })
    }

    /// Links the member record created for this applicant.
    pub fn link_member(
        &self,
        id: UnitApplicationId,
        user_id: UserId,
    ) -> Result<UnitApplication, ApplicationServiceError> {
        self.applications.in_write_scope(|| {
            let mut application = self.pending_unit(id)?;
            self.require_user(user_id)?;
            if let Some(other) = self.applications.unit_application_for_user(user_id)? {
                if other.id != id {
                    return Err(ApplicationServiceError::MemberAlreadyLinked {
                        user_id,
                        application_id: other.id,
                    });
                }
            }
            application.user_id = Some(user_id);
            self.applications.update_unit_application(&application)?;
            Ok(application)
        })
    }

    /// Drops the member link, e.g. after the member record was discarded.
    pub fn unlink_member(
        &self,
        id: UnitApplicationId,
    ) -> Result<UnitApplication, ApplicationServiceError> {
        self.applications.in_write_scope(|| {
            let mut application = self.pending_unit(id)?;
            application.user_id = None;
            self.applications.update_unit_application(&application)?;
            Ok(application)
        })
    }

    pub fn update_details(
        &self,
        id: UnitApplicationId,
        details: ApplicantDetails,
    ) -> Result<UnitApplication, ApplicationServiceError> {
        self.applications.in_write_scope(|| {
            let mut application = self.pending_unit(id)?;
            application.teamspeak_id = details.teamspeak_id;
            application.over_18 = details.over_18;
            self.applications.update_unit_application(&application)?;
            Ok(application)
        })
    }

    /// Records a member's request for a section slot.
    pub fn apply_for_slot(
        &self,
        user_id: UserId,
        section_slot_id: SectionSlotId,
    ) -> Result<SectionApplication, ApplicationServiceError> {
        self.applications.in_write_scope(|| {
            self.require_user(user_id)?;
            if self.orbat.get_slot(section_slot_id)?.is_none() {
                return Err(ApplicationServiceError::SlotNotFound(section_slot_id));
            }
            if self
                .applications
                .pending_section_application(user_id, section_slot_id)?
                .is_some()
            {
                return Err(ApplicationServiceError::DuplicateSlotRequest(
                    section_slot_id,
                ));
            }
            Ok(self
                .applications
                .create_section_application(user_id, section_slot_id, Utc::now())?)
        })
    }

    /// Unprocessed slot requests, all of them or those for one section.
    pub fn pending_section_applications(
        &self,
        section_id: Option<SectionId>,
    ) -> Result<Vec<SectionApplication>, ApplicationServiceError> {
        Ok(self
            .applications
            .list_pending_section_applications(section_id)?)
    }

    /// Accepts or denies a slot request. Seating the member is left to the
    /// ORBAT service.
    pub fn decide_section_application(
        &self,
        id: SectionApplicationId,
        accept: bool,
        actor: Option<UserId>,
    ) -> Result<SectionApplication, ApplicationServiceError> {
        self.applications.in_write_scope(|| {
            let mut application = self
                .applications
                .get_section_application(id)?
                .ok_or(ApplicationServiceError::ApplicationNotFound(id))?;
            if !application.is_pending() {
                return Err(ApplicationServiceError::AlreadyProcessed(id));
            }
            let at = Utc::now();
            self.applications
                .record_section_decision(id, !accept, actor, at)?;
            application.denied = !accept;
            application.actioned_by = actor;
            application.processed_at = Some(at);
            info!(
                "event=section_application_decide module=service status=ok id={} accepted={}",
                id, accept
            );
            Ok(application)
        })
    }

    fn pending_unit(
        &self,
        id: UnitApplicationId,
    ) -> Result<UnitApplication, ApplicationServiceError> {
        let application = self.unit_application(id)?;
        if !application.is_pending() {
            return Err(ApplicationServiceError::AlreadyProcessed(id));
        }
        Ok(application)
    }

    fn require_user(&self, user_id: UserId) -> Result<(), ApplicationServiceError> {
        if self.users.get_user(user_id)?.is_none() {
            return Err(ApplicationServiceError::UserNotFound(user_id));
        }
        Ok(())
    }
}
