//! Domain model for the unit core.
//!
//! # Responsibility
//! - Define plain data structures shared by repositories and services.
//! - Keep pure rules (name formatting, interval planning, grouping) next to
//!   the types they operate on.
//!
//! # Invariants
//! - Member identities are UUIDs; every other entity uses an integer rowid.
//! - Model types never touch storage.

pub mod application;
pub mod event;
pub mod history;
pub mod orbat;
pub mod ordering;
pub mod timeline;
pub mod training;
pub mod user;
