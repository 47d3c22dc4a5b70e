//! Unit store contracts and SQLite implementation.
//!
//! # Responsibility
//! - Provide row-level persistence for organizational units.
//! - Answer subtree queries through the materialized path prefix.
//! - Commit placement batches atomically.
//!
//! # Invariants
//! - `update_batch` applies every row or none.
//! - Every write is guarded by the path the caller planned against; a
//!   concurrent change surfaces as `StaleWrite` instead of a torn subtree.
//! - Listing order for tree reads is `level, sort_order, name`.

use crate::db::migrations::latest_version;
use crate::db::DbError;
use crate::model::path::{descendant_prefix, descendant_upper_bound, parent_path_of, root_path};
use crate::model::unit::{Unit, UnitId, UnitStatus, UnitType};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row, Transaction, TransactionBehavior};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

const UNIT_SELECT_SQL: &str = "SELECT
    unit_uuid,
    code,
    name,
    short_name,
    unit_type,
    status,
    parent_uuid,
    path,
    level,
    sort_order,
    created_at,
    updated_at
FROM units";

const REQUIRED_COLUMNS: [&str; 13] = [
    "unit_uuid",
    "code",
    "code_key",
    "name",
    "short_name",
    "unit_type",
    "status",
    "parent_uuid",
    "path",
    "level",
    "sort_order",
    "created_at",
    "updated_at",
];

/// Result type used by unit store operations.
pub type UnitRepoResult<T> = Result<T, UnitRepoError>;

/// Errors from unit store operations.
#[derive(Debug)]
pub enum UnitRepoError {
    /// Underlying SQLite/bootstrap error.
    Db(DbError),
    /// Target unit does not exist.
    UnitNotFound(UnitId),
    /// Code is already used by another unit (case-insensitive).
    DuplicateCode(String),
    /// A guarded row changed between planning and commit.
    StaleWrite(String),
    /// Connection schema is not at the expected migrated version.
    UninitializedConnection {
        expected_version: u32,
        actual_version: u32,
    },
    /// Required table is missing.
    MissingRequiredTable(&'static str),
    /// Required column is missing from expected table.
    MissingRequiredColumn {
        table: &'static str,
        column: &'static str,
    },
    /// Persisted data cannot be converted to a valid unit.
    InvalidData(String),
}

impl Display for UnitRepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::UnitNotFound(id) => write!(f, "unit not found: {id}"),
            Self::DuplicateCode(code) => write!(f, "unit code already exists: {code}"),
            Self::StaleWrite(message) => write!(f, "stale unit write rejected: {message}"),
            Self::UninitializedConnection {
                expected_version,
                actual_version,
            } => write!(
                f,
                "unit store requires schema version {expected_version}, got {actual_version}"
            ),
            Self::MissingRequiredTable(table) => {
                write!(f, "unit store requires table `{table}`")
            }
            Self::MissingRequiredColumn { table, column } => write!(
                f,
                "unit store requires column `{column}` in table `{table}`"
            ),
            Self::InvalidData(message) => write!(f, "invalid unit data: {message}"),
        }
    }
}

impl Error for UnitRepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for UnitRepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for UnitRepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl UnitRepoError {
    /// Returns a stable machine-readable code for logging.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Db(_) => "db_error",
            Self::UnitNotFound(_) => "unit_not_found",
            Self::DuplicateCode(_) => "duplicate_code",
            Self::StaleWrite(_) => "stale_write",
            Self::UninitializedConnection { .. } => "uninitialized_connection",
            Self::MissingRequiredTable(_) => "missing_table",
            Self::MissingRequiredColumn { .. } => "missing_column",
            Self::InvalidData(_) => "invalid_data",
        }
    }
}

/// Requirement that one row still sits at `expected_path` at commit time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathGuard {
    pub id: UnitId,
    pub expected_path: String,
}

/// Full desired state of one row, applied only if the row still has
/// `expected_path`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitUpdate {
    pub unit: Unit,
    pub expected_path: String,
}

/// Set of row updates committed as one transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnitBatch {
    /// Rows that must be unchanged but are not written.
    pub guards: Vec<PathGuard>,
    pub updates: Vec<UnitUpdate>,
    /// Path whose strict descendants must all have been rewritten by the
    /// batch; any row still below it aborts the commit.
    pub vacated_prefix: Option<String>,
}

impl UnitBatch {
    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }
}

/// Persistence boundary for unit rows.
pub trait UnitStore {
    /// Loads one unit by id.
    fn get(&self, id: UnitId) -> UnitRepoResult<Option<Unit>>;
    /// Loads one unit by code, ignoring case.
    fn get_by_code(&self, code: &str) -> UnitRepoResult<Option<Unit>>;
    /// Lists every unit ordered by `level, sort_order, name`.
    fn list_all_ordered(&self) -> UnitRepoResult<Vec<Unit>>;
    /// Lists direct children ordered by `sort_order, name`.
    fn list_children(&self, parent_id: UnitId) -> UnitRepoResult<Vec<Unit>>;
    /// Lists every unit whose path starts with `path + "."`.
    fn list_descendants(&self, path: &str) -> UnitRepoResult<Vec<Unit>>;
    /// Inserts one new unit and returns the stored row.
    fn insert(&self, unit: &Unit) -> UnitRepoResult<Unit>;
    /// Applies every update in `batch` atomically.
    fn update_batch(&self, batch: &UnitBatch) -> UnitRepoResult<()>;
    /// Sets the lifecycle status of one unit and returns the stored row.
    fn set_status(&self, id: UnitId, status: UnitStatus) -> UnitRepoResult<Unit>;
}

/// SQLite-backed unit store.
pub struct SqliteUnitStore<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteUnitStore<'conn> {
    /// Creates store from migrated connection.
    pub fn try_new(conn: &'conn Connection) -> UnitRepoResult<Self> {
        ensure_unit_connection_ready(conn)?;
        Ok(Self { conn })
    }
}

impl UnitStore for SqliteUnitStore<'_> {
    fn get(&self, id: UnitId) -> UnitRepoResult<Option<Unit>> {
        load_unit(self.conn, id)
    }

    fn get_by_code(&self, code: &str) -> UnitRepoResult<Option<Unit>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{UNIT_SELECT_SQL} WHERE code_key = ?1;"))?;
        let mut rows = stmt.query([code_key(code)])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_unit_row(row)?));
        }
        Ok(None)
    }

    fn list_all_ordered(&self) -> UnitRepoResult<Vec<Unit>> {
        let mut stmt = self.conn.prepare(&format!(
            "{UNIT_SELECT_SQL} ORDER BY level ASC, sort_order ASC, name ASC, unit_uuid ASC;"
        ))?;
        let mut rows = stmt.query([])?;
        collect_units(&mut rows)
    }

    fn list_children(&self, parent_id: UnitId) -> UnitRepoResult<Vec<Unit>> {
        let mut stmt = self.conn.prepare(&format!(
            "{UNIT_SELECT_SQL}
             WHERE parent_uuid = ?1
             ORDER BY sort_order ASC, name ASC, unit_uuid ASC;"
        ))?;
        let mut rows = stmt.query([parent_id.to_string()])?;
        collect_units(&mut rows)
    }

    fn list_descendants(&self, path: &str) -> UnitRepoResult<Vec<Unit>> {
        let mut stmt = self.conn.prepare(&format!(
            "{UNIT_SELECT_SQL}
             WHERE path >= ?1 AND path < ?2
             ORDER BY path ASC;"
        ))?;
        let mut rows = stmt.query(params![descendant_prefix(path), descendant_upper_bound(path)])?;
        collect_units(&mut rows)
    }

    fn insert(&self, unit: &Unit) -> UnitRepoResult<Unit> {
        let expected_parent_path = match unit.parent_id {
            Some(_) => Some(parent_path_of(&unit.path).ok_or_else(|| {
                UnitRepoError::InvalidData(format!(
                    "child unit {} has root path `{}`",
                    unit.id, unit.path
                ))
            })?),
            None => None,
        };

        let inserted = self
            .conn
            .execute(
                "INSERT INTO units (
                    unit_uuid,
                    code,
                    code_key,
                    name,
                    short_name,
                    unit_type,
                    status,
                    parent_uuid,
                    path,
                    level,
                    sort_order
                )
                SELECT ?1, ?2, ?12, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10
                WHERE ?7 IS NULL
                   OR EXISTS(
                       SELECT 1 FROM units WHERE unit_uuid = ?7 AND path = ?11
                   );",
                params![
                    unit.id.to_string(),
                    unit.code.as_str(),
                    unit.name.as_str(),
                    unit.short_name.as_deref(),
                    unit.unit_type.as_str(),
                    unit.status.as_str(),
                    unit.parent_id.map(|value| value.to_string()),
                    unit.path.as_str(),
                    unit.level,
                    unit.sort_order,
                    expected_parent_path,
                    code_key(&unit.code),
                ],
            )
            .map_err(|err| map_constraint_error(err, &unit.code))?;

        if inserted == 0 {
            return Err(UnitRepoError::StaleWrite(format!(
                "parent of unit {} moved or disappeared before insert",
                unit.id
            )));
        }

        load_unit(self.conn, unit.id)?.ok_or(UnitRepoError::UnitNotFound(unit.id))
    }

    fn update_batch(&self, batch: &UnitBatch) -> UnitRepoResult<()> {
        if batch.is_empty() {
            return Ok(());
        }

        // Dropping the transaction on an early return rolls it back.
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;

        for guard in &batch.guards {
            if !row_has_path(&tx, guard.id, &guard.expected_path)? {
                return Err(UnitRepoError::StaleWrite(format!(
                    "unit {} no longer at planned path",
                    guard.id
                )));
            }
        }

        for update in &batch.updates {
            let unit = &update.unit;
            let changed = tx
                .execute(
                    "UPDATE units
                     SET name = ?3,
                         short_name = ?4,
                         unit_type = ?5,
                         status = ?6,
                         parent_uuid = ?7,
                         path = ?8,
                         level = ?9,
                         sort_order = ?10,
                         updated_at = (strftime('%s', 'now') * 1000)
                     WHERE unit_uuid = ?1
                       AND path = ?2;",
                    params![
                        unit.id.to_string(),
                        update.expected_path.as_str(),
                        unit.name.as_str(),
                        unit.short_name.as_deref(),
                        unit.unit_type.as_str(),
                        unit.status.as_str(),
                        unit.parent_id.map(|value| value.to_string()),
                        unit.path.as_str(),
                        unit.level,
                        unit.sort_order,
                    ],
                )
                .map_err(|err| map_constraint_error(err, &unit.code))?;
            if changed == 0 {
                return Err(UnitRepoError::StaleWrite(format!(
                    "unit {} changed since it was read",
                    unit.id
                )));
            }
        }

        if let Some(prefix) = batch.vacated_prefix.as_deref() {
            let remaining: i64 = tx.query_row(
                "SELECT COUNT(*) FROM units WHERE path >= ?1 AND path < ?2;",
                params![descendant_prefix(prefix), descendant_upper_bound(prefix)],
                |row| row.get(0),
            )?;
            if remaining > 0 {
                return Err(UnitRepoError::StaleWrite(format!(
                    "{remaining} unit(s) appeared below a moved subtree"
                )));
            }
        }

        tx.commit()?;
        Ok(())
    }

    fn set_status(&self, id: UnitId, status: UnitStatus) -> UnitRepoResult<Unit> {
        let changed = self.conn.execute(
            "UPDATE units
             SET status = ?2,
                 updated_at = (strftime('%s', 'now') * 1000)
             WHERE unit_uuid = ?1;",
            params![id.to_string(), status.as_str()],
        )?;
        if changed == 0 {
            return Err(UnitRepoError::UnitNotFound(id));
        }
        load_unit(self.conn, id)?.ok_or(UnitRepoError::UnitNotFound(id))
    }
}

fn load_unit(conn: &Connection, id: UnitId) -> UnitRepoResult<Option<Unit>> {
    let mut stmt = conn.prepare(&format!("{UNIT_SELECT_SQL} WHERE unit_uuid = ?1;"))?;
    let mut rows = stmt.query([id.to_string()])?;
    if let Some(row) = rows.next()? {
        return Ok(Some(parse_unit_row(row)?));
    }
    Ok(None)
}

fn row_has_path(conn: &Connection, id: UnitId, path: &str) -> UnitRepoResult<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM units WHERE unit_uuid = ?1 AND path = ?2;",
            params![id.to_string(), path],
            |row| row.get::<_, i64>(0),
        )
        .optional()?;
    Ok(found.is_some())
}

fn collect_units(rows: &mut rusqlite::Rows<'_>) -> UnitRepoResult<Vec<Unit>> {
    let mut units = Vec::new();
    while let Some(row) = rows.next()? {
        units.push(parse_unit_row(row)?);
    }
    Ok(units)
}

/// Uniqueness key of a code: the path segment it produces.
fn code_key(code: &str) -> String {
    root_path(code)
}

fn map_constraint_error(err: rusqlite::Error, code: &str) -> UnitRepoError {
    if let rusqlite::Error::SqliteFailure(failure, Some(message)) = &err {
        if failure.code == ErrorCode::ConstraintViolation && message.contains("units.code_key") {
            return UnitRepoError::DuplicateCode(code.to_string());
        }
    }
    err.into()
}

fn parse_unit_row(row: &Row<'_>) -> UnitRepoResult<Unit> {
    let id_text: String = row.get("unit_uuid")?;
    let id = parse_uuid(&id_text, "units.unit_uuid")?;

    let parent_id = row
        .get::<_, Option<String>>("parent_uuid")?
        .map(|value| parse_uuid(&value, "units.parent_uuid"))
        .transpose()?;

    let type_text: String = row.get("unit_type")?;
    let unit_type = UnitType::parse(&type_text).ok_or_else(|| {
        UnitRepoError::InvalidData(format!("invalid unit type `{type_text}` in units.unit_type"))
    })?;

    let status_text: String = row.get("status")?;
    let status = UnitStatus::parse(&status_text).ok_or_else(|| {
        UnitRepoError::InvalidData(format!("invalid status `{status_text}` in units.status"))
    })?;

    let level: i64 = row.get("level")?;
    let level = u32::try_from(level).map_err(|_| {
        UnitRepoError::InvalidData(format!("invalid level `{level}` in units.level"))
    })?;

    Ok(Unit {
        id,
        code: row.get("code")?,
        name: row.get("name")?,
        short_name: row.get("short_name")?,
        unit_type,
        status,
        parent_id,
        path: row.get("path")?,
        level,
        sort_order: row.get("sort_order")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

fn parse_uuid(value: &str, column: &'static str) -> UnitRepoResult<Uuid> {
    Uuid::parse_str(value)
        .map_err(|_| UnitRepoError::InvalidData(format!("invalid uuid `{value}` in {column}")))
}

fn ensure_unit_connection_ready(conn: &Connection) -> UnitRepoResult<()> {
    let expected_version = latest_version();
    let actual_version: u32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    if actual_version != expected_version {
        return Err(UnitRepoError::UninitializedConnection {
            expected_version,
            actual_version,
        });
    }

    if !table_exists(conn, "units")? {
        return Err(UnitRepoError::MissingRequiredTable("units"));
    }
    for column in REQUIRED_COLUMNS {
        if !table_has_column(conn, "units", column)? {
            return Err(UnitRepoError::MissingRequiredColumn {
                table: "units",
                column,
            });
        }
    }
    Ok(())
}

pub(crate) fn table_exists(conn: &Connection, table: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT EXISTS(
            SELECT 1
            FROM sqlite_master
            WHERE type = 'table' AND name = ?1
        );",
        [table],
        |row| row.get::<_, i64>(0),
    )
    .map(|exists| exists == 1)
}

pub(crate) fn table_has_column(
    conn: &Connection,
    table: &str,
    column: &str,
) -> rusqlite::Result<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table});"))?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let current: String = row.get(1)?;
        if current == column {
            return Ok(true);
        }
    }
    Ok(false)
}
