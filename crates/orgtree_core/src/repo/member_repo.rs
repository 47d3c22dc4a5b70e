//! Unit membership contracts and SQLite implementation.
//!
//! # Responsibility
//! - Answer "how many active members does this unit hold" for guarded
//!   deactivation.
//! - Provide the minimal assignment writes needed to seed memberships.
//!
//! # Invariants
//! - A member is active only while its status is `WORKING`.
//! - New assignments target `ACTIVE` units only.

use crate::db::DbError;
use crate::model::unit::{UnitId, UnitStatus};
use crate::repo::unit_repo::table_exists;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Stable member identifier owned by the employee side.
pub type MemberId = Uuid;

/// SQLite keeps bound parameters per statement small; stay well below it.
const IN_CLAUSE_CHUNK: usize = 500;

pub type MemberRepoResult<T> = Result<T, MemberRepoError>;

/// Errors from membership operations.
#[derive(Debug)]
pub enum MemberRepoError {
    Db(DbError),
    /// Target unit does not exist.
    UnitNotFound(UnitId),
    /// Target unit exists but does not accept new members.
    UnitNotAssignable { unit_id: UnitId, status: UnitStatus },
    /// Target member does not exist.
    MemberNotFound(MemberId),
    /// Required table is missing.
    MissingRequiredTable(&'static str),
}

impl Display for MemberRepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::UnitNotFound(id) => write!(f, "unit not found: {id}"),
            Self::UnitNotAssignable { unit_id, status } => write!(
                f,
                "unit {unit_id} is {} and does not accept members",
                status.as_str()
            ),
            Self::MemberNotFound(id) => write!(f, "member not found: {id}"),
            Self::MissingRequiredTable(table) => {
                write!(f, "member directory requires table `{table}`")
            }
        }
    }
}

impl Error for MemberRepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for MemberRepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Employment state of one member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberStatus {
    Working,
    OnLeave,
    Resigned,
    Retired,
}

impl MemberStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Working => "WORKING",
            Self::OnLeave => "ON_LEAVE",
            Self::Resigned => "RESIGNED",
            Self::Retired => "RETIRED",
        }
    }
}

/// Membership capability injected into the hierarchy service.
pub trait MemberDirectory {
    /// Counts active members assigned directly to `unit_id`.
    fn count_active_members(&self, unit_id: UnitId) -> MemberRepoResult<u64>;

    /// Counts active members assigned to any of `unit_ids`.
    fn count_active_members_in(&self, unit_ids: &[UnitId]) -> MemberRepoResult<u64> {
        let mut total = 0;
        for unit_id in unit_ids {
            total += self.count_active_members(*unit_id)?;
        }
        Ok(total)
    }
}

/// SQLite-backed member directory over the `unit_members` table.
pub struct SqliteMemberDirectory<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteMemberDirectory<'conn> {
    /// Creates directory from migrated connection.
    pub fn try_new(conn: &'conn Connection) -> MemberRepoResult<Self> {
        if !table_exists(conn, "unit_members")? {
            return Err(MemberRepoError::MissingRequiredTable("unit_members"));
        }
        Ok(Self { conn })
    }

    /// Assigns a new working member to an active unit.
    pub fn assign_member(&self, unit_id: UnitId) -> MemberRepoResult<MemberId> {
        let status: Option<String> = self
            .conn
            .query_row(
                "SELECT status FROM units WHERE unit_uuid = ?1;",
                [unit_id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        let status = status
            .as_deref()
            .and_then(UnitStatus::parse)
            .ok_or(MemberRepoError::UnitNotFound(unit_id))?;
        if status != UnitStatus::Active {
            return Err(MemberRepoError::UnitNotAssignable { unit_id, status });
        }

        let member_id = Uuid::new_v4();
        self.conn.execute(
            "INSERT INTO unit_members (member_uuid, unit_uuid, status)
             VALUES (?1, ?2, 'WORKING');",
            params![member_id.to_string(), unit_id.to_string()],
        )?;
        Ok(member_id)
    }

    /// Updates the employment status of one member.
    pub fn set_member_status(
        &self,
        member_id: MemberId,
        status: MemberStatus,
    ) -> MemberRepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE unit_members
             SET status = ?2,
                 updated_at = (strftime('%s', 'now') * 1000)
             WHERE member_uuid = ?1;",
            params![member_id.to_string(), status.as_str()],
        )?;
        if changed == 0 {
            return Err(MemberRepoError::MemberNotFound(member_id));
        }
        Ok(())
    }
}

impl MemberDirectory for SqliteMemberDirectory<'_> {
    fn count_active_members(&self, unit_id: UnitId) -> MemberRepoResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*)
             FROM unit_members
             WHERE unit_uuid = ?1
               AND status = 'WORKING';",
            [unit_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as u64)
    }

    fn count_active_members_in(&self, unit_ids: &[UnitId]) -> MemberRepoResult<u64> {
        let mut total = 0u64;
        for chunk in unit_ids.chunks(IN_CLAUSE_CHUNK) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let sql = format!(
                "SELECT COUNT(*)
                 FROM unit_members
                 WHERE status = 'WORKING'
                   AND unit_uuid IN ({placeholders});"
            );
            let count: i64 = self.conn.query_row(
                &sql,
                params_from_iter(chunk.iter().map(|id| id.to_string())),
                |row| row.get(0),
            )?;
            total += count.max(0) as u64;
        }
        Ok(total)
    }
}
