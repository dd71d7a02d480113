//! Scheduled events and per-member attendance windows.
//!
//! # Invariants
//! - Event times are wall-clock UTC on `date`.
//! - One attendance row per `(event, member)`.
//! - `first_join <= last_seen` whenever both are set by presence tracking.
//! - One sign-up per `(event, member)`, positioned within its event.

use crate::model::orbat::SlotColour;
use crate::model::user::UserId;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

pub type EventId = i64;
pub type AttendanceId = i64;
pub type EventAssignmentId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Op,
    SideOp,
    Training,
    Community,
    Other,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Op => "op",
            Self::SideOp => "side_op",
            Self::Training => "training",
            Self::Community => "community",
            Self::Other => "other",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "op" => Some(Self::Op),
            "side_op" => Some(Self::SideOp),
            "training" => Some(Self::Training),
            "community" => Some(Self::Community),
            "other" => Some(Self::Other),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Op => "Operation",
            Self::SideOp => "Side OP",
            Self::Training => "Training",
            Self::Community => "Community",
            Self::Other => "Other",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub name: String,
    pub description: String,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub kind: EventKind,
}

impl Event {
    pub fn starts_at(&self) -> DateTime<Utc> {
        self.date.and_time(self.start_time).and_utc()
    }

    pub fn ends_at(&self) -> DateTime<Utc> {
        self.date.and_time(self.end_time).and_utc()
    }

    /// Classifies a disconnect at `at` against this event's schedule.
    pub fn classify_leave(&self, at: DateTime<Utc>) -> LeaveOutcome {
        if at < self.starts_at() {
            return LeaveOutcome::Discard;
        }
        LeaveOutcome::Record {
            left_early: at < self.ends_at(),
        }
    }
}

/// Input for event creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewEvent {
    pub name: String,
    pub description: String,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub kind: EventKind,
}

impl NewEvent {
    pub fn new(
        name: impl Into<String>,
        date: NaiveDate,
        start_time: NaiveTime,
        end_time: NaiveTime,
        kind: EventKind,
    ) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            date,
            start_time,
            end_time,
            kind,
        }
    }
}

/// What a disconnect means for an existing attendance row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveOutcome {
    /// Left before the event started; the row is dropped.
    Discard,
    /// Keep the row with `last_seen` moved to the leave time.
    Record { left_early: bool },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attendance {
    pub id: AttendanceId,
    pub event_id: EventId,
    pub user_id: UserId,
    pub first_join: Option<DateTime<Utc>>,
    pub last_seen: Option<DateTime<Utc>>,
    /// Entered by staff rather than presence tracking.
    pub manual: bool,
    pub left_early: bool,
}

impl Attendance {
    /// Widens the presence window so it includes `at`.
    pub fn widen(&mut self, at: DateTime<Utc>) {
        if self.first_join.map_or(true, |first| at < first) {
            self.first_join = Some(at);
        }
        if self.last_seen.map_or(true, |last| at > last) {
            self.last_seen = Some(at);
        }
    }
}

/// Reply a member gave for an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RsvpStatus {
    Attending,
    NotAttending,
    Late,
    Maybe,
}

impl RsvpStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Attending => "yes",
            Self::NotAttending => "no",
            Self::Late => "late",
            Self::Maybe => "maybe",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "yes" => Some(Self::Attending),
            "no" => Some(Self::NotAttending),
            "late" => Some(Self::Late),
            "maybe" => Some(Self::Maybe),
            _ => None,
        }
    }

    /// Whether the member is expected to show up at all.
    pub fn expects_presence(self) -> bool {
        matches!(self, Self::Attending | Self::Late)
    }
}

/// A member's sign-up for an event, with the slot staff gave them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventAssignment {
    pub id: EventAssignmentId,
    pub event_id: EventId,
    pub user_id: UserId,
    pub status: RsvpStatus,
    /// Free-text role for this event, e.g. `Medic`.
    pub role: String,
    pub colour: Option<SlotColour>,
    pub assigned_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
    /// Set when staff last placed the member.
    pub assigned_at: Option<DateTime<Utc>>,
    pub sort_order: i64,
}

/// Staff placement written onto a sign-up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventPlacement {
    pub role: String,
    pub colour: Option<SlotColour>,
    pub assigned_by: Option<UserId>,
}

#[cfg(test)]
mod tests {
    use super::{Attendance, Event, EventKind, LeaveOutcome, RsvpStatus};
    use chrono::{NaiveDate, NaiveTime, TimeZone, Utc};
    use uuid::Uuid;

    fn evening_op() -> Event {
        Event {
            id: 1,
            name: "Op Harvest".to_string(),
            description: String::new(),
            date: NaiveDate::from_ymd_opt(2024, 3, 9).unwrap(),
            start_time: NaiveTime::from_hms_opt(19, 0, 0).unwrap(),
            end_time: NaiveTime::from_hms_opt(21, 0, 0).unwrap(),
            kind: EventKind::Op,
        }
    }

    #[test]
    fn leave_is_classified_against_schedule() {
        let event = evening_op();
        let before = Utc.with_ymd_and_hms(2024, 3, 9, 18, 30, 0).unwrap();
        let during = Utc.with_ymd_and_hms(2024, 3, 9, 20, 0, 0).unwrap();
        let after = Utc.with_ymd_and_hms(2024, 3, 9, 21, 5, 0).unwrap();

        assert_eq!(event.classify_leave(before), LeaveOutcome::Discard);
        assert_eq!(
            event.classify_leave(during),
            LeaveOutcome::Record { left_early: true }
        );
        assert_eq!(
            event.classify_leave(after),
            LeaveOutcome::Record { left_early: false }
        );
    }

    #[test]
    fn widen_only_moves_outward() {
        let mut attendance = Attendance {
            id: 1,
            event_id: 1,
            user_id: Uuid::new_v4(),
            first_join: None,
            last_seen: None,
            manual: false,
            left_early: false,
        };
        let early = Utc.with_ymd_and_hms(2024, 3, 9, 19, 0, 0).unwrap();
        let late = Utc.with_ymd_and_hms(2024, 3, 9, 20, 0, 0).unwrap();

        attendance.widen(late);
        attendance.widen(early);
        attendance.widen(late);
        assert_eq!(attendance.first_join, Some(early));
        assert_eq!(attendance.last_seen, Some(late));
    }

    #[test]
    fn kind_round_trips_through_db_text() {
        assert_eq!(EventKind::parse(EventKind::SideOp.as_str()), Some(EventKind::SideOp));
        assert_eq!(EventKind::parse("raid"), None);
    }

    #[test]
    fn only_attending_and_late_expect_presence() {
        assert!(RsvpStatus::Attending.expects_presence());
        assert!(RsvpStatus::Late.expects_presence());
        assert!(!RsvpStatus::Maybe.expects_presence());
        assert!(!RsvpStatus::NotAttending.expects_presence());
        assert_eq!(RsvpStatus::parse("late"), Some(RsvpStatus::Late));
        assert_eq!(RsvpStatus::parse("LATE"), None);
    }
}
