//! Core domain logic for the unit roster.
//! This crate is the single source of truth for ORBAT, history and
//! attribute invariants.

pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;

pub use config::CoreConfig;
pub use db::{open_db, open_db_in_memory, open_db_with, DbError};
pub use logging::{default_log_level, init_logging, init_logging_from, logging_status};
pub use model::application::{ApplicationStatus, SectionApplication, UnitApplication};
pub use model::history::{HistoryKind, HistoryPayload, HistoryRecord};
pub use model::ordering::{OrderedTable, ScopeKey, ORDERED_TABLES};
pub use model::user::{DerivedAttributes, User, UserId, UserStatus};
pub use repo::history_repo::{
    HistoryRepository, SaveOutcome, SaveReport, SqliteHistoryRepository,
};
pub use repo::ordering_repo::{OrderingError, OrderingRepository, SqliteOrderingRepository};
pub use repo::{retry_on_conflict, RepoError, RepoResult, Retryable};
pub use service::application_service::ApplicationService;
pub use service::attendance_service::AttendanceService;
pub use service::history_service::HistoryService;
pub use service::orbat_service::OrbatService;
pub use service::propagation::{AssignmentChange, AttributePropagator};
pub use service::training_service::TrainingService;
pub use service::user_service::UserService;

/// Minimal health-check API for early integration.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::{core_version, ping};

    #[test]
    fn ping_returns_pong() {
        assert_eq!(ping(), "pong");
    }

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
