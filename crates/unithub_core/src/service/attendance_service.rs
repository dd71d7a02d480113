//! Attendance ingestion service.
//!
//! # Responsibility
//! - Turn presence join/leave signals into per-event attendance windows.
//! - Record staff-entered attendance.
//! - Keep each event's sign-up list and the placements staff hand out.
//!
//! # Invariants
//! - Signals only touch events held on the signal's UTC date.
//! - Leaving before an event starts removes that event's row.
//! - Manual entries are always flagged `manual`.
//! - Re-answering keeps a sign-up's position; withdrawing closes the gap.

use crate::model::event::{
    Attendance, Event, EventAssignment, EventId, EventPlacement, LeaveOutcome, NewEvent,
    RsvpStatus,
};
use crate::model::user::UserId;
use crate::repo::attendance_repo::AttendanceRepository;
use crate::repo::{RepoError, Retryable};
use chrono::{DateTime, Utc};
use log::info;
use std::error::Error;
use std::fmt::{Display, Formatter};

#[derive(Debug)]
pub enum AttendanceServiceError {
    /// Event name is blank after trim.
    InvalidEventName,
    /// Event ends before it starts.
    InvalidEventTimes,
    EventNotFound(EventId),
    Repo(RepoError),
}

impl Display for AttendanceServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidEventName => write!(f, "event name must not be blank"),
            Self::InvalidEventTimes => write!(f, "event end time precedes start time"),
            Self::EventNotFound(id) => write!(f, "event not found: {id}"),
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for AttendanceServiceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Repo(err) => Some(err),
            _ => None,
        }
    }
}

impl Retryable for AttendanceServiceError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::Repo(err) if err.is_retryable())
    }
}

impl From<RepoError> for AttendanceServiceError {
    fn from(value: RepoError) -> Self {
        Self::Repo(value)
    }
}

/// Counts produced by one leave signal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LeaveSummary {
    pub updated: usize,
    pub discarded: usize,
}

/// Attendance service facade.
pub struct AttendanceService<A: AttendanceRepository> {
    repo: A,
}

impl<A: AttendanceRepository> AttendanceService<A> {
    pub fn new(repo: A) -> Self {
        Self { repo }
    }

    pub fn create_event(&self, event: NewEvent) -> Result<Event, AttendanceServiceError> {
        let mut event = event;
        event.name = event.name.trim().to_string();
        if event.name.is_empty() {
            return Err(AttendanceServiceError::InvalidEventName);
        }
        if event.end_time < event.start_time {
            return Err(AttendanceServiceError::InvalidEventTimes);
        }
        Ok(self.repo.create_event(&event)?)
    }

    pub fn events_on(&self, at: DateTime<Utc>) -> Result<Vec<Event>, AttendanceServiceError> {
        Ok(self.repo.list_events_on(at.date_naive())?)
    }

    /// Opens or widens the member's window for every event held that day.
    pub fn mark_user_join(
        &self,
        user_id: UserId,
        at: DateTime<Utc>,
    ) -> Result<Vec<Attendance>, AttendanceServiceError> {
        self.repo.in_write_scope(|| {
            let mut touched = Vec::new();
            for event in self.repo.list_events_on(at.date_naive())? {
                let (mut attendance, _) = self.repo.get_or_create_attendance(event.id, user_id)?;
                let before = attendance.clone();
                attendance.widen(at);
                if attendance != before {
                    self.repo.update_attendance(&attendance)?;
                }
                touched.push(attendance);
            }
            info!(
                "event=attendance_join module=service status=ok user_id={} events={}",
                user_id,
                touched.len()
            );
            Ok(touched)
        })
    }

    /// Closes the member's window for every event held that day.
    pub fn mark_user_leave(
        &self,
        user_id: UserId,
        at: DateTime<Utc>,
    ) -> Result<LeaveSummary, AttendanceServiceError> {
        self.repo.in_write_scope(|| {
            let mut summary = LeaveSummary::default();
            for event in self.repo.list_events_on(at.date_naive())? {
                let Some(mut attendance) = self.repo.get_attendance(event.id, user_id)? else {
                    continue;
                };
                match event.classify_leave(at) {
                    LeaveOutcome::Discard => {
                        self.repo.delete_attendance(attendance.id)?;
                        summary.discarded += 1;
                    }
                    LeaveOutcome::Record { left_early } => {
                        attendance.last_seen = Some(at);
                        if left_early {
                            attendance.left_early = true;
                        }
                        self.repo.update_attendance(&attendance)?;
                        summary.updated += 1;
                    }
                }
            }
            info!(
                "event=attendance_leave module=service status=ok user_id={} updated={} discarded={}",
                user_id, summary.updated, summary.discarded
            );
            Ok(summary)
        })
    }

    /// Creates or updates a staff-entered row. Provided times overwrite,
    /// missing ones are kept.
    pub fn mark_manual_attendance(
        &self,
        user_id: UserId,
        event_id: EventId,
        first_join: Option<DateTime<Utc>>,
        last_seen: Option<DateTime<Utc>>,
    ) -> Result<Attendance, AttendanceServiceError> {
        self.repo.in_write_scope(|| {
            if self.repo.get_event(event_id)?.is_none() {
                return Err(AttendanceServiceError::EventNotFound(event_id));
            }
            let (mut attendance, created) =
                self.repo.get_or_create_attendance(event_id, user_id)?;
            if first_join.is_some() {
                attendance.first_join = first_join;
            }
            if last_seen.is_some() {
                attendance.last_seen = last_seen;
            }
            if created {
                attendance.left_early = false;
            }
            attendance.manual = true;
            self.repo.update_attendance(&attendance)?;
            Ok(attendance)
        })
    }

    /// Drops rows for events later today that have not started by
    /// `server_start`. Returns the number of removed rows.
    pub fn cleanup_pre_event_entries(
        &self,
        server_start: DateTime<Utc>,
    ) -> Result<usize, AttendanceServiceError> {
        let removed = self
            .repo
            .delete_attendance_for_events_after(server_start.date_naive(), server_start.time())?;
        info!(
            "event=attendance_cleanup module=service status=ok removed={}",
            removed
        );
        Ok(removed)
    }

    pub fn attendance_for_event(
        &self,
        event_id: EventId,
    ) -> Result<Vec<Attendance>, AttendanceServiceError> {
        Ok(self.repo.list_attendance_for_event(event_id)?)
    }

    /// Records the member's reply. An existing sign-up keeps its position.
    pub fn sign_up(
        &self,
        event_id: EventId,
        user_id: UserId,
        status: RsvpStatus,
    ) -> Result<EventAssignment, AttendanceServiceError> {
        self.repo.in_write_scope(|| {
            self.require_event(event_id)?;
            let signup = match self.repo.get_event_assignment(event_id, user_id)? {
                Some(mut existing) => {
                    if existing.status != status {
                        self.repo.update_event_assignment_status(existing.id, status)?;
                        existing.status = status;
                    }
                    existing
                }
                None => self
                    .repo
                    .insert_event_assignment(event_id, user_id, status, Utc::now())?,
            };
            info!(
                "event=event_signup module=service status=ok event_id={} user_id={} reply={}",
                event_id,
                user_id,
                status.as_str()
            );
            Ok(signup)
        })
    }

    /// Gives the member a role and colour for the event. A member without a
    /// sign-up is added as attending.
    pub fn place_member(
        &self,
        event_id: EventId,
        user_id: UserId,
        placement: EventPlacement,
    ) -> Result<EventAssignment, AttendanceServiceError> {
        let mut placement = placement;
        placement.role = placement.role.trim().to_string();
        self.repo.in_write_scope(|| {
            self.require_event(event_id)?;
            let mut signup = match self.repo.get_event_assignment(event_id, user_id)? {
                Some(existing) => existing,
                None => self.repo.insert_event_assignment(
                    event_id,
                    user_id,
                    RsvpStatus::Attending,
                    Utc::now(),
                )?,
            };
            let at = Utc::now();
            self.repo.place_event_assignment(signup.id, &placement, at)?;
            signup.role = placement.role.clone();
            signup.colour = placement.colour;
            signup.assigned_by = placement.assigned_by;
            signup.assigned_at = Some(at);
            Ok(signup)
        })
    }

    /// Removes the member's sign-up. Returns `false` when there was none.
    pub fn withdraw(
        &self,
        event_id: EventId,
        user_id: UserId,
    ) -> Result<bool, AttendanceServiceError> {
        self.repo.in_write_scope(|| {
            let Some(signup) = self.repo.get_event_assignment(event_id, user_id)? else {
                return Ok(false);
            };
            self.repo.delete_event_assignment(signup.id)?;
            Ok(true)
        })
    }

    /// Sign-ups of an event in position order.
    pub fn event_roster(
        &self,
        event_id: EventId,
    ) -> Result<Vec<EventAssignment>, AttendanceServiceError> {
        self.require_event(event_id)?;
        Ok(self.repo.list_event_assignments(event_id)?)
    }

    fn require_event(&self, event_id: EventId) -> Result<Event, AttendanceServiceError> {
        self.repo
            .get_event(event_id)?
            .ok_or(AttendanceServiceError::EventNotFound(event_id))
    }
}
