//! Domain model for the organizational unit hierarchy.
//!
//! # Responsibility
//! - Define the flat unit record shared by storage and service layers.
//! - Provide the pure materialized-path encoding.
//!
//! # Invariants
//! - Every unit is identified by a stable `UnitId`.
//! - Deletion is a status flip, never a row removal.

pub mod path;
pub mod unit;
