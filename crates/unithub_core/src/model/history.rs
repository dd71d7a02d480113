//! Dated history records and the overlap resolution plan.
//!
//! # Responsibility
//! - Describe each history kind: table, payload columns, non-overlap key.
//! - Compute, without touching storage, how existing intervals must change
//!   so an incoming interval can be stored without overlap.
//!
//! # Invariants
//! - Dates are compared at day granularity; `end_date` is inclusive and
//!   `None` means open-ended.
//! - A record whose start equals its end is degenerate and is never stored.
//! - For one member and one non-overlap key, stored intervals are pairwise
//!   disjoint.

use crate::model::orbat::{RoleId, SectionId};
use crate::model::user::{UserId, UserStatus};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

pub type HistoryRecordId = i64;

/// History table family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryKind {
    /// Exclusive: one section at a time.
    SectionAssignment,
    /// Scoped by role: different roles may run concurrently.
    RoleAssignment,
    /// Exclusive.
    Username,
    /// Exclusive.
    UserStatus,
}

impl HistoryKind {
    pub const ALL: [HistoryKind; 4] = [
        Self::SectionAssignment,
        Self::RoleAssignment,
        Self::Username,
        Self::UserStatus,
    ];

    pub fn table(self) -> &'static str {
        match self {
            Self::SectionAssignment => "history_section_assignments",
            Self::RoleAssignment => "history_role_assignments",
            Self::Username => "history_usernames",
            Self::UserStatus => "history_user_statuses",
        }
    }

    /// Payload columns in binding order.
    pub fn payload_columns(self) -> &'static [&'static str] {
        match self {
            Self::SectionAssignment => &["section_id"],
            Self::RoleAssignment => &["role_id", "role_name_at_assignment", "section_id"],
            Self::Username => &["username"],
            Self::UserStatus => &["status"],
        }
    }

    /// Columns whose values must match for two records to be mutually exclusive.
    /// Empty means exclusive timeline.
    pub fn non_overlap_columns(self) -> &'static [&'static str] {
        match self {
            Self::RoleAssignment => &["role_id"],
            Self::SectionAssignment | Self::Username | Self::UserStatus => &[],
        }
    }

    pub fn is_exclusive(self) -> bool {
        self.non_overlap_columns().is_empty()
    }
}

/// Kind-specific fields of a history record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HistoryPayload {
    SectionAssignment {
        section_id: SectionId,
    },
    RoleAssignment {
        /// `None` once the role itself has been deleted.
        role_id: Option<RoleId>,
        /// Role name frozen at assignment time.
        role_name_at_assignment: String,
        section_id: SectionId,
    },
    Username {
        username: String,
    },
    UserStatus {
        status: UserStatus,
    },
}

impl HistoryPayload {
    pub fn kind(&self) -> HistoryKind {
        match self {
            Self::SectionAssignment { .. } => HistoryKind::SectionAssignment,
            Self::RoleAssignment { .. } => HistoryKind::RoleAssignment,
            Self::Username { .. } => HistoryKind::Username,
            Self::UserStatus { .. } => HistoryKind::UserStatus,
        }
    }
}

/// Inclusive day range, open-ended when `end` is `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateInterval {
    pub start: NaiveDate,
    pub end: Option<NaiveDate>,
}

impl DateInterval {
    pub fn new(start: NaiveDate, end: Option<NaiveDate>) -> Self {
        Self { start, end }
    }

    pub fn open(start: NaiveDate) -> Self {
        Self { start, end: None }
    }

    /// Single-day range carrying no duration.
    pub fn is_degenerate(&self) -> bool {
        self.end == Some(self.start)
    }

    /// End earlier than start.
    pub fn is_inverted(&self) -> bool {
        self.end.is_some_and(|end| end < self.start)
    }

    pub fn contains_date(&self, date: NaiveDate) -> bool {
        self.start <= date && self.end.map_or(true, |end| end >= date)
    }

    pub fn overlaps(&self, other: &DateInterval) -> bool {
        let self_reaches = self.end.map_or(true, |end| end >= other.start);
        let other_reaches = other.end.map_or(true, |end| end >= self.start);
        self_reaches && other_reaches
    }

    /// Whether `other` lies entirely inside `self`.
    pub fn covers(&self, other: &DateInterval) -> bool {
        if other.start < self.start {
            return false;
        }
        match (self.end, other.end) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(self_end), Some(other_end)) => other_end <= self_end,
        }
    }
}

/// One dated fact about a member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    /// `None` until persisted.
    pub id: Option<HistoryRecordId>,
    pub user_id: UserId,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub payload: HistoryPayload,
}

impl HistoryRecord {
    /// Creates an unsaved open-ended record.
    pub fn new(user_id: UserId, start_date: NaiveDate, payload: HistoryPayload) -> Self {
        Self {
            id: None,
            user_id,
            start_date,
            end_date: None,
            payload,
        }
    }

    pub fn ending(mut self, end_date: NaiveDate) -> Self {
        self.end_date = Some(end_date);
        self
    }

    pub fn kind(&self) -> HistoryKind {
        self.payload.kind()
    }

    pub fn interval(&self) -> DateInterval {
        DateInterval::new(self.start_date, self.end_date)
    }

    /// Active on `date`, compared as whole days with an inclusive end.
    pub fn is_active(&self, date: NaiveDate) -> bool {
        self.interval().contains_date(date)
    }
}

/// Change applied to one existing record so an incoming interval fits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntervalAdjustment {
    /// Fully covered, or every remnant would be degenerate.
    Delete { id: HistoryRecordId },
    /// Keep the part before the incoming start.
    TrimEnd {
        id: HistoryRecordId,
        end: NaiveDate,
    },
    /// Keep the part after the incoming end.
    TrimStart {
        id: HistoryRecordId,
        start: NaiveDate,
    },
    /// Incoming interval sits strictly inside: keep the head in place and
    /// store the tail as a new record with the same payload.
    Split {
        id: HistoryRecordId,
        end: NaiveDate,
        remnant: DateInterval,
    },
}

/// Plans adjustments for `existing` so that `incoming` overlaps none of them.
///
/// Records that do not overlap `incoming` produce no adjustment. Output
/// follows ascending start date of the existing records.
pub fn plan_overlap_resolution(
    incoming: DateInterval,
    existing: &[(HistoryRecordId, DateInterval)],
) -> Vec<IntervalAdjustment> {
    let mut ordered: Vec<&(HistoryRecordId, DateInterval)> = existing.iter().collect();
    ordered.sort_by_key(|(id, interval)| (interval.start, *id));

    let mut plan = Vec::new();
    for (id, current) in ordered {
        let id = *id;
        if !incoming.overlaps(current) {
            continue;
        }
        if incoming.covers(current) {
            plan.push(IntervalAdjustment::Delete { id });
            continue;
        }

        let head = if current.start < incoming.start {
            incoming
                .start
                .pred_opt()
                .map(|end| DateInterval::new(current.start, Some(end)))
                .filter(|head| !head.is_degenerate())
        } else {
            None
        };
        let tail = incoming.end.and_then(|incoming_end| {
            let extends_past = current.end.map_or(true, |end| end > incoming_end);
            if !extends_past {
                return None;
            }
            incoming_end
                .succ_opt()
                .map(|start| DateInterval::new(start, current.end))
                .filter(|tail| !tail.is_degenerate())
        });

        let adjustment = match (head, tail) {
            (Some(head), Some(tail)) => match head.end {
                Some(end) => IntervalAdjustment::Split {
                    id,
                    end,
                    remnant: tail,
                },
                None => IntervalAdjustment::TrimStart {
                    id,
                    start: tail.start,
                },
            },
            (Some(head), None) => match head.end {
                Some(end) => IntervalAdjustment::TrimEnd { id, end },
                None => IntervalAdjustment::Delete { id },
            },
            (None, Some(tail)) => IntervalAdjustment::TrimStart {
                id,
                start: tail.start,
            },
            (None, None) => IntervalAdjustment::Delete { id },
        };
        plan.push(adjustment);
    }
    plan
}

#[cfg(test)]
mod tests {
    use super::{
        plan_overlap_resolution, DateInterval, HistoryKind, HistoryPayload, HistoryRecord,
        IntervalAdjustment,
    };
    use crate::model::user::UserStatus;
    use chrono::NaiveDate;
    use uuid::Uuid;

    fn day(month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, month, day).unwrap()
    }

    #[test]
    fn record_is_active_through_its_end_day() {
        let record = HistoryRecord::new(
            Uuid::new_v4(),
            day(1, 5),
            HistoryPayload::UserStatus {
                status: UserStatus::Loa,
            },
        )
        .ending(day(1, 10));

        assert!(!record.is_active(day(1, 4)));
        assert!(record.is_active(day(1, 5)));
        assert!(record.is_active(day(1, 10)));
        assert!(!record.is_active(day(1, 11)));
    }

    #[test]
    fn open_record_is_trimmed_before_later_open_record() {
        let plan = plan_overlap_resolution(
            DateInterval::open(day(1, 10)),
            &[(1, DateInterval::open(day(1, 1)))],
        );
        assert_eq!(
            plan,
            vec![IntervalAdjustment::TrimEnd {
                id: 1,
                end: day(1, 9)
            }]
        );
    }

    #[test]
    fn covered_record_is_deleted() {
        let plan = plan_overlap_resolution(
            DateInterval::new(day(1, 1), Some(day(1, 31))),
            &[(7, DateInterval::new(day(1, 5), Some(day(1, 20))))],
        );
        assert_eq!(plan, vec![IntervalAdjustment::Delete { id: 7 }]);
    }

    #[test]
    fn strictly_inner_interval_splits_existing_record() {
        let plan = plan_overlap_resolution(
            DateInterval::new(day(1, 10), Some(day(1, 20))),
            &[(3, DateInterval::new(day(1, 1), Some(day(1, 31))))],
        );
        assert_eq!(
            plan,
            vec![IntervalAdjustment::Split {
                id: 3,
                end: day(1, 9),
                remnant: DateInterval::new(day(1, 21), Some(day(1, 31))),
            }]
        );
    }

    #[test]
    fn record_starting_inside_incoming_is_pushed_past_its_end() {
        let plan = plan_overlap_resolution(
            DateInterval::new(day(1, 1), Some(day(1, 10))),
            &[(4, DateInterval::open(day(1, 5)))],
        );
        assert_eq!(
            plan,
            vec![IntervalAdjustment::TrimStart {
                id: 4,
                start: day(1, 11)
            }]
        );
    }

    #[test]
    fn single_day_remnants_are_dropped() {
        // Head would be Jan 1..Jan 1 and tail Jan 12..Jan 12.
        let plan = plan_overlap_resolution(
            DateInterval::new(day(1, 2), Some(day(1, 11))),
            &[(5, DateInterval::new(day(1, 1), Some(day(1, 12))))],
        );
        assert_eq!(plan, vec![IntervalAdjustment::Delete { id: 5 }]);
    }

    #[test]
    fn open_incoming_covers_every_later_record() {
        let plan = plan_overlap_resolution(
            DateInterval::open(day(1, 10)),
            &[
                (2, DateInterval::open(day(3, 1))),
                (1, DateInterval::new(day(2, 1), Some(day(2, 28)))),
            ],
        );
        assert_eq!(
            plan,
            vec![
                IntervalAdjustment::Delete { id: 1 },
                IntervalAdjustment::Delete { id: 2 }
            ]
        );
    }

    #[test]
    fn disjoint_records_are_left_alone() {
        let plan = plan_overlap_resolution(
            DateInterval::new(day(2, 1), Some(day(2, 10))),
            &[(1, DateInterval::new(day(1, 1), Some(day(1, 31))))],
        );
        assert!(plan.is_empty());
    }

    #[test]
    fn only_role_history_is_scoped() {
        assert!(HistoryKind::SectionAssignment.is_exclusive());
        assert!(HistoryKind::Username.is_exclusive());
        assert!(!HistoryKind::RoleAssignment.is_exclusive());
    }
}
