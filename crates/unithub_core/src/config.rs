//! Runtime configuration for hosts embedding the core.
//!
//! # Responsibility
//! - Describe database location, logging and contention settings in one place.
//! - Provide defaults usable without any configuration source.
//!
//! # Invariants
//! - `busy_timeout_ms` and `conflict_retry_attempts` are never zero after
//!   normalization; a zero value falls back to the default.

use crate::logging::default_log_level;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const DEFAULT_DATABASE_FILE: &str = "unithub.sqlite3";
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_CONFLICT_RETRY_ATTEMPTS: u32 = 3;

const ENV_DATABASE: &str = "UNITHUB_DB";
const ENV_LOG_LEVEL: &str = "UNITHUB_LOG_LEVEL";
const ENV_LOG_DIR: &str = "UNITHUB_LOG_DIR";
const ENV_BUSY_TIMEOUT_MS: &str = "UNITHUB_BUSY_TIMEOUT_MS";

/// Core settings shared by CLI and embedding hosts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// SQLite database file path.
    pub database_path: PathBuf,
    /// One of `trace|debug|info|warn|error`.
    pub log_level: String,
    /// Absolute directory for rolling log files. `None` disables file logging.
    pub log_dir: Option<PathBuf>,
    /// How long a writer waits on a locked database before failing busy.
    pub busy_timeout_ms: u64,
    /// Attempts made by `retry_on_conflict` callers before giving up.
    pub conflict_retry_attempts: u32,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from(DEFAULT_DATABASE_FILE),
            log_level: default_log_level().to_string(),
            log_dir: None,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            conflict_retry_attempts: DEFAULT_CONFLICT_RETRY_ATTEMPTS,
        }
    }
}

impl CoreConfig {
    /// Builds config from `UNITHUB_*` environment variables over defaults.
    ///
    /// Unparseable numeric values are ignored and keep their defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(path) = lookup(ENV_DATABASE).filter(|value| !value.trim().is_empty()) {
            config.database_path = PathBuf::from(path.trim());
        }
        if let Some(level) = lookup(ENV_LOG_LEVEL).filter(|value| !value.trim().is_empty()) {
            config.log_level = level.trim().to_string();
        }
        if let Some(dir) = lookup(ENV_LOG_DIR).filter(|value| !value.trim().is_empty()) {
            config.log_dir = Some(PathBuf::from(dir.trim()));
        }
        if let Some(timeout) = lookup(ENV_BUSY_TIMEOUT_MS).and_then(|value| value.trim().parse().ok())
        {
            config.busy_timeout_ms = timeout;
        }
        config.normalized()
    }

    /// Replaces zero timeouts/attempts with defaults.
    pub fn normalized(mut self) -> Self {
        if self.busy_timeout_ms == 0 {
            self.busy_timeout_ms = DEFAULT_BUSY_TIMEOUT_MS;
        }
        if self.conflict_retry_attempts == 0 {
            self.conflict_retry_attempts = DEFAULT_CONFLICT_RETRY_ATTEMPTS;
        }
        self
    }
}
