//! Core use-case services.
//!
//! # Responsibility
//! - Orchestrate repository calls into use-case level APIs.
//! - Enforce business rules above the storage layer.
//! - Notify the attribute propagator after every assignment write commits.

pub mod application_service;
pub mod attendance_service;
pub mod history_service;
pub mod orbat_service;
pub mod propagation;
pub mod training_service;
pub mod user_service;
