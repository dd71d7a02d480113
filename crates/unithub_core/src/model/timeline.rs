//! Member timeline entries and grouping helpers.
//!
//! # Invariants
//! - Entries are append-only facts; listing is newest first.
//! - `snapshot_name` freezes the member's display form at write time.

use crate::model::orbat::SectionId;
use crate::model::user::UserId;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

pub type TimelineEntryId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimelineEventType {
    UnitJoined,
    UnitLeft,
    SectionJoined,
    SectionLeft,
    RoleAssigned,
    AwardReceived,
    TrainingCompleted,
}

impl TimelineEventType {
    pub const ALL: [TimelineEventType; 7] = [
        Self::UnitJoined,
        Self::UnitLeft,
        Self::SectionJoined,
        Self::SectionLeft,
        Self::RoleAssigned,
        Self::AwardReceived,
        Self::TrainingCompleted,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::UnitJoined => "UNIT_JOINED",
            Self::UnitLeft => "UNIT_LEFT",
            Self::SectionJoined => "SECTION_JOINED",
            Self::SectionLeft => "SECTION_LEFT",
            Self::RoleAssigned => "ROLE_ASSIGNED",
            Self::AwardReceived => "AWARD_RECEIVED",
            Self::TrainingCompleted => "TRAINING_COMPLETED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == value)
    }

    /// Human phrase, e.g. `"joined the section"`.
    pub fn describe(self) -> &'static str {
        match self {
            Self::UnitJoined => "joined the unit",
            Self::UnitLeft => "left the unit",
            Self::SectionJoined => "joined the section",
            Self::SectionLeft => "left the section",
            Self::RoleAssigned => "assigned to a role",
            Self::AwardReceived => "received an award",
            Self::TrainingCompleted => "training completed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub id: TimelineEntryId,
    pub user_id: UserId,
    pub section_id: Option<SectionId>,
    pub occurred_at: DateTime<Utc>,
    pub event_type: TimelineEventType,
    pub snapshot_name: Option<String>,
    pub description: String,
}

/// Input for a new timeline entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTimelineEntry {
    pub user_id: UserId,
    pub section_id: Option<SectionId>,
    pub occurred_at: DateTime<Utc>,
    pub event_type: TimelineEventType,
    pub snapshot_name: Option<String>,
    pub description: String,
}

impl NewTimelineEntry {
    pub fn new(user_id: UserId, event_type: TimelineEventType, occurred_at: DateTime<Utc>) -> Self {
        Self {
            user_id,
            section_id: None,
            occurred_at,
            event_type,
            snapshot_name: None,
            description: String::new(),
        }
    }

    pub fn in_section(mut self, section_id: SectionId) -> Self {
        self.section_id = Some(section_id);
        self
    }

    pub fn snapshot(mut self, name: impl Into<String>) -> Self {
        self.snapshot_name = Some(name.into());
        self
    }

    pub fn described(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Filter for timeline listing. Empty collections mean "no constraint".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineQuery {
    pub user_ids: Vec<UserId>,
    pub section_id: Option<SectionId>,
    /// Inclusive lower bound.
    pub since: Option<DateTime<Utc>>,
    /// Inclusive upper bound.
    pub until: Option<DateTime<Utc>>,
    pub event_types: Vec<TimelineEventType>,
    pub exclude_types: Vec<TimelineEventType>,
    pub limit: Option<u32>,
}

impl TimelineQuery {
    /// ORBAT view: everything except training.
    pub fn orbat() -> Self {
        Self {
            exclude_types: vec![TimelineEventType::TrainingCompleted],
            ..Self::default()
        }
    }

    /// Training view from `since` onwards.
    pub fn training_since(since: DateTime<Utc>) -> Self {
        Self {
            since: Some(since),
            event_types: vec![TimelineEventType::TrainingCompleted],
            ..Self::default()
        }
    }

    pub fn accepts(&self, entry: &TimelineEntry) -> bool {
        (self.user_ids.is_empty() || self.user_ids.contains(&entry.user_id))
            && self.section_id.map_or(true, |id| entry.section_id == Some(id))
            && self.since.map_or(true, |since| entry.occurred_at >= since)
            && self.until.map_or(true, |until| entry.occurred_at <= until)
            && (self.event_types.is_empty() || self.event_types.contains(&entry.event_type))
            && !self.exclude_types.contains(&entry.event_type)
    }
}

/// Groups entries by UTC calendar day, newest day first and newest entry
/// first within a day.
pub fn group_by_day(entries: Vec<TimelineEntry>) -> Vec<(NaiveDate, Vec<TimelineEntry>)> {
    let mut sorted = entries;
    sorted.sort_by(|a, b| b.occurred_at.cmp(&a.occurred_at).then(b.id.cmp(&a.id)));

    let mut groups: Vec<(NaiveDate, Vec<TimelineEntry>)> = Vec::new();
    for entry in sorted {
        let day = entry.occurred_at.date_naive();
        match groups.last_mut() {
            Some((current, items)) if *current == day => items.push(entry),
            _ => groups.push((day, vec![entry])),
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::{group_by_day, TimelineEntry, TimelineEventType, TimelineQuery};
    use chrono::{NaiveDate, TimeZone, Utc};
    use uuid::Uuid;

    fn entry(id: i64, day: u32, hour: u32, event_type: TimelineEventType) -> TimelineEntry {
        TimelineEntry {
            id,
            user_id: Uuid::nil(),
            section_id: None,
            occurred_at: Utc.with_ymd_and_hms(2024, 5, day, hour, 0, 0).unwrap(),
            event_type,
            snapshot_name: None,
            description: String::new(),
        }
    }

    #[test]
    fn groups_newest_day_first() {
        let groups = group_by_day(vec![
            entry(1, 1, 9, TimelineEventType::UnitJoined),
            entry(2, 3, 8, TimelineEventType::SectionJoined),
            entry(3, 1, 18, TimelineEventType::RoleAssigned),
        ]);

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0, NaiveDate::from_ymd_opt(2024, 5, 3).unwrap());
        let first_day_ids: Vec<i64> = groups[1].1.iter().map(|item| item.id).collect();
        assert_eq!(first_day_ids, vec![3, 1]);
    }

    #[test]
    fn orbat_query_hides_training() {
        let query = TimelineQuery::orbat();
        assert!(query.accepts(&entry(1, 1, 9, TimelineEventType::SectionLeft)));
        assert!(!query.accepts(&entry(2, 1, 9, TimelineEventType::TrainingCompleted)));
    }

    #[test]
    fn event_type_parses_db_text() {
        for kind in TimelineEventType::ALL {
            assert_eq!(TimelineEventType::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(TimelineEventType::parse("joined"), None);
    }
}
