//! Order-of-battle domain model: platoons, sections, slots and roles.
//!
//! # Invariants
//! - Slot and assignment rows describe current state; history lives in
//!   [`crate::model::history`].
//! - An assignment is active while `end_date` is `None`.
//! - Role incompatibility is symmetric and irreflexive.

use crate::model::user::UserId;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

pub type PlatoonId = i64;
pub type SectionId = i64;
pub type RoleId = i64;
pub type SectionSlotId = i64;
pub type SectionAssignmentId = i64;
pub type RoleSlotAssignmentId = i64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Platoon {
    pub id: PlatoonId,
    pub name: String,
    pub description: String,
    pub sort_order: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    pub id: SectionId,
    pub name: String,
    pub shorthand: String,
    pub description: String,
    /// Free-form section type, e.g. `infantry`.
    pub kind: String,
    /// Capacity checked against active section assignments.
    pub max_size: u32,
    pub platoon_id: Option<PlatoonId>,
    pub leader_id: Option<UserId>,
    pub sort_order: i64,
}

/// Input for section creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewSection {
    pub name: String,
    pub shorthand: String,
    pub description: String,
    pub kind: String,
    pub max_size: u32,
    pub platoon_id: Option<PlatoonId>,
}

impl NewSection {
    pub fn new(name: impl Into<String>, shorthand: impl Into<String>, max_size: u32) -> Self {
        Self {
            name: name.into(),
            shorthand: shorthand.into(),
            description: String::new(),
            kind: "infantry".to_string(),
            max_size,
            platoon_id: None,
        }
    }

    pub fn in_platoon(mut self, platoon_id: PlatoonId) -> Self {
        self.platoon_id = Some(platoon_id);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: RoleId,
    pub name: String,
    /// Rank-style abbreviation copied into the member's rank cache.
    pub shorthand: String,
    pub description: String,
    /// Limit of concurrently active assignments of this role per section,
    /// if any. Counted for duty roles as well as rank roles.
    pub max_per_section: Option<u32>,
    /// Whether holding this role sets the holder's rank.
    pub is_rank: bool,
}

/// Input for role creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRole {
    pub name: String,
    pub shorthand: String,
    pub description: String,
    pub max_per_section: Option<u32>,
    pub is_rank: bool,
}

impl NewRole {
    pub fn rank(name: impl Into<String>, shorthand: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            shorthand: shorthand.into(),
            description: String::new(),
            max_per_section: None,
            is_rank: true,
        }
    }

    pub fn duty(name: impl Into<String>, shorthand: impl Into<String>) -> Self {
        Self {
            is_rank: false,
            ..Self::rank(name, shorthand)
        }
    }

    pub fn with_limit(mut self, max_per_section: u32) -> Self {
        self.max_per_section = Some(max_per_section);
        self
    }
}

/// Unordered pair of distinct roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RolePair {
    low: RoleId,
    high: RoleId,
}

impl RolePair {
    /// Returns `None` for a role paired with itself.
    pub fn new(a: RoleId, b: RoleId) -> Option<Self> {
        match a.cmp(&b) {
            std::cmp::Ordering::Less => Some(Self { low: a, high: b }),
            std::cmp::Ordering::Greater => Some(Self { low: b, high: a }),
            std::cmp::Ordering::Equal => None,
        }
    }

    pub fn low(self) -> RoleId {
        self.low
    }

    pub fn high(self) -> RoleId {
        self.high
    }

    /// Returns the partner of `role` when it is part of this pair.
    pub fn other(self, role: RoleId) -> Option<RoleId> {
        if role == self.low {
            Some(self.high)
        } else if role == self.high {
            Some(self.low)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotColour {
    Gold,
    Green,
    Red,
    Blue,
}

impl SlotColour {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Gold => "gold",
            Self::Green => "green",
            Self::Red => "red",
            Self::Blue => "blue",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "gold" => Some(Self::Gold),
            "green" => Some(Self::Green),
            "red" => Some(Self::Red),
            "blue" => Some(Self::Blue),
            _ => None,
        }
    }
}

/// Named position inside a section, optionally held by one member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionSlot {
    pub id: SectionSlotId,
    pub name: String,
    pub section_id: SectionId,
    pub user_id: Option<UserId>,
    pub colour: Option<SlotColour>,
    pub sort_order: i64,
}

/// Current membership of a member in a section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionAssignment {
    pub id: SectionAssignmentId,
    pub section_id: SectionId,
    pub user_id: UserId,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
}

impl SectionAssignment {
    pub fn is_active(&self) -> bool {
        self.end_date.is_none()
    }
}

/// Role held through a section slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleSlotAssignment {
    pub id: RoleSlotAssignmentId,
    pub role_id: RoleId,
    pub section_slot_id: SectionSlotId,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
}

impl RoleSlotAssignment {
    pub fn is_active(&self) -> bool {
        self.end_date.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::RolePair;

    #[test]
    fn role_pair_is_unordered_and_irreflexive() {
        assert_eq!(RolePair::new(4, 2), RolePair::new(2, 4));
        assert_eq!(RolePair::new(3, 3), None);
        assert_eq!(RolePair::new(3, 3), None);

        let pair = RolePair::new(9, 1).unwrap();
        assert_eq!((pair.low(), pair.high()), (1, 9));
        assert_eq!(pair.other(9), Some(1));
        assert_eq!(pair.other(5), None);
    }
}
