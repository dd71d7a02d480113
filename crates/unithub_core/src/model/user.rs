//! Member domain model.
//!
//! # Responsibility
//! - Define the member record and its membership status.
//! - Own display-name formatting and input validation rules.
//!
//! # Invariants
//! - `id` is a stable UUID and never reused.
//! - `rank` and `section_name` are derived caches; only the attribute
//!   propagator writes them after creation.
//! - A retired member carries neither rank nor section.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Stable member identifier.
pub type UserId = Uuid;

/// Rank shown for members without an active rank role.
pub const DEFAULT_RANK: &str = "PVT";

static DISPLAY_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[\p{L}\p{N}][\p{L}\p{N} ._'-]{0,49}$").expect("valid name regex"));
static USERNAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_.-]{1,255}$").expect("valid username regex"));
static CALLSIGN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9 -]{0,9}$").expect("valid callsign regex"));

/// Membership status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserStatus {
    Active,
    /// Leave of absence.
    Loa,
    Reserves,
    Retired,
}

impl UserStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Loa => "loa",
            Self::Reserves => "reserves",
            Self::Retired => "retired",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "active" => Some(Self::Active),
            "loa" => Some(Self::Loa),
            "reserves" => Some(Self::Reserves),
            "retired" => Some(Self::Retired),
            _ => None,
        }
    }

    /// Human label used by presentation layers.
    pub fn label(self) -> &'static str {
        match self {
            Self::Active => "Active",
            Self::Loa => "Leave of Absence",
            Self::Reserves => "Reserves",
            Self::Retired => "Retired",
        }
    }
}

/// Validation failures for member input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserValidationError {
    InvalidDisplayName(String),
    InvalidUsername(String),
    InvalidCallsign(String),
}

impl Display for UserValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidDisplayName(value) => write!(f, "invalid display name: `{value}`"),
            Self::InvalidUsername(value) => write!(f, "invalid username: `{value}`"),
            Self::InvalidCallsign(value) => write!(f, "invalid callsign: `{value}`"),
        }
    }
}

impl Error for UserValidationError {}

/// Unit member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub display_name: String,
    /// Derived rank shorthand (`PVT`, `CPL`, ...).
    pub rank: Option<String>,
    /// Derived name of the active section.
    pub section_name: Option<String>,
    /// Radio callsign such as `1-1 A`.
    pub callsign: Option<String>,
    pub status: UserStatus,
}

impl User {
    /// Creates an active member with the default rank and a fresh id.
    pub fn new(display_name: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            username: username.into(),
            display_name: display_name.into(),
            rank: Some(DEFAULT_RANK.to_string()),
            section_name: None,
            callsign: None,
            status: UserStatus::Active,
        }
    }

    pub fn is_retired(&self) -> bool {
        self.status == UserStatus::Retired
    }

    /// Returns `"<rank> <display name>"`, or the bare name without a rank.
    pub fn ranked_name(&self) -> String {
        match self.rank.as_deref() {
            Some(rank) if !rank.is_empty() => format!("{rank} {}", self.display_name),
            _ => self.display_name.clone(),
        }
    }

    /// Returns `"[<callsign>] - <ranked name>"` when a callsign is set.
    pub fn name_with_callsign(&self) -> String {
        match self.callsign.as_deref() {
            Some(callsign) if !callsign.is_empty() => {
                format!("[{callsign}] - {}", self.ranked_name())
            }
            _ => self.ranked_name(),
        }
    }

    /// Validates user-editable text fields.
    pub fn validate(&self) -> Result<(), UserValidationError> {
        validate_display_name(&self.display_name)?;
        validate_username(&self.username)?;
        if let Some(callsign) = self.callsign.as_deref() {
            if !CALLSIGN_RE.is_match(callsign) {
                return Err(UserValidationError::InvalidCallsign(callsign.to_string()));
            }
        }
        Ok(())
    }
}

/// Derived cache fields recomputed from assignment state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivedAttributes {
    pub rank: Option<String>,
    pub section_name: Option<String>,
}

impl DerivedAttributes {
    /// Values carried by a retired member.
    pub fn retired() -> Self {
        Self {
            rank: None,
            section_name: None,
        }
    }
}

pub fn validate_display_name(value: &str) -> Result<(), UserValidationError> {
    if DISPLAY_NAME_RE.is_match(value) {
        return Ok(());
    }
    Err(UserValidationError::InvalidDisplayName(value.to_string()))
}

pub fn validate_username(value: &str) -> Result<(), UserValidationError> {
    if USERNAME_RE.is_match(value) {
        return Ok(());
    }
    Err(UserValidationError::InvalidUsername(value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::{User, UserStatus, UserValidationError, DEFAULT_RANK};

    #[test]
    fn new_user_is_active_private() {
        let user = User::new("Miller", "miller");
        assert_eq!(user.status, UserStatus::Active);
        assert_eq!(user.rank.as_deref(), Some(DEFAULT_RANK));
        assert_eq!(user.section_name, None);
    }

    #[test]
    fn name_formatting_includes_rank_and_callsign() {
        let mut user = User::new("Miller", "miller");
        assert_eq!(user.ranked_name(), "PVT Miller");
        user.callsign = Some("1-1 A".to_string());
        assert_eq!(user.name_with_callsign(), "[1-1 A] - PVT Miller");
        user.rank = None;
        assert_eq!(user.name_with_callsign(), "[1-1 A] - Miller");
    }

    #[test]
    fn validate_rejects_blank_names_and_long_callsigns() {
        let mut user = User::new(" ", "miller");
        assert!(matches!(
            user.validate(),
            Err(UserValidationError::InvalidDisplayName(_))
        ));
        user.display_name = "Miller".to_string();
        user.callsign = Some("WAY-TOO-LONG-1".to_string());
        assert!(matches!(
            user.validate(),
            Err(UserValidationError::InvalidCallsign(_))
        ));
    }

    #[test]
    fn status_serializes_as_snake_case() {
        let json = serde_json::to_string(&UserStatus::Loa).unwrap();
        assert_eq!(json, "\"loa\"");
        assert_eq!(UserStatus::parse("retired"), Some(UserStatus::Retired));
        assert_eq!(UserStatus::parse("gone"), None);
    }
}
