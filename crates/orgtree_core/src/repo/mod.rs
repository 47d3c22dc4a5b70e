//! Repository layer abstractions and persistence implementations.
//!
//! # Responsibility
//! - Define the unit store and membership contracts the service consumes.
//! - Isolate SQLite query details from hierarchy orchestration.
//!
//! # Invariants
//! - Multi-row writes commit in one transaction or not at all.
//! - Repository APIs return semantic errors (`UnitNotFound`,
//!   `DuplicateCode`, `StaleWrite`) in addition to DB transport errors.

pub mod member_repo;
pub mod unit_repo;
