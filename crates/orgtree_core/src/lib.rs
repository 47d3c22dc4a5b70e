//! Core domain logic for the organizational unit hierarchy.
//! This crate is the single source of truth for placement invariants.

pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;
pub mod tree;

pub use logging::{default_log_level, init_logging, logging_status};
pub use model::unit::{NewUnit, Unit, UnitId, UnitPatch, UnitStatus, UnitType, UnitValidationError};
pub use repo::member_repo::{
    MemberDirectory, MemberId, MemberRepoError, MemberStatus, SqliteMemberDirectory,
};
pub use repo::unit_repo::{
    PathGuard, SqliteUnitStore, UnitBatch, UnitRepoError, UnitRepoResult, UnitStore, UnitUpdate,
};
pub use service::hierarchy_service::{
    BadRequestReason, ErrorKind, HierarchyError, HierarchyOptions, HierarchyResult,
    HierarchyService, NotFoundTarget, RemovalPolicy, StorageFault, UnitDetail,
};
pub use tree::{assemble, UnitTreeNode};

/// Minimal health-check API for early integration.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
