//! Organizational unit hierarchy use-case service.
//!
//! # Responsibility
//! - Validate hierarchy invariants above the store layer.
//! - Compute path/level for create, move and update, including the
//!   cascade over every descendant of a moved unit.
//! - Guard soft deletion against units that still hold active members.
//!
//! # Invariants
//! - All validation completes before the first write.
//! - `parent_id`, `path` and `level` are only ever written through one
//!   placement plan, committed as a single store batch.
//! - A unit can never be placed inside its own subtree.

use crate::model::path::{child_path, depth_of, is_descendant_path, level_of, rebase_path, root_path};
use crate::model::unit::{NewUnit, Unit, UnitId, UnitPatch, UnitStatus, UnitValidationError};
use crate::repo::member_repo::{MemberDirectory, MemberRepoError};
use crate::repo::unit_repo::{PathGuard, UnitBatch, UnitRepoError, UnitStore, UnitUpdate};
use crate::tree::{assemble, UnitTreeNode};
use log::{error, info, warn};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Instant;
use uuid::Uuid;

/// Which memberships block deactivation of a unit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RemovalPolicy {
    /// Only members assigned directly to the unit block removal.
    #[default]
    DirectMembersOnly,
    /// Members anywhere in the unit's subtree block removal.
    IncludeDescendants,
}

/// Tunables for [`HierarchyService`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HierarchyOptions {
    pub removal_policy: RemovalPolicy,
}

/// Coarse error class for transport mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    BadRequest,
    Storage,
}

/// Which reference could not be resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotFoundTarget {
    Unit(UnitId),
    Parent(UnitId),
}

/// Policy violations rejected before any write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BadRequestReason {
    /// Unit named itself as parent.
    SelfParent(UnitId),
    /// Destination parent lies inside the unit's own subtree.
    CircularReference { unit_id: UnitId, parent_id: UnitId },
    /// Unit still has active members.
    HasActiveMembers { unit_id: UnitId, count: u64 },
    /// Input failed field validation.
    Validation(UnitValidationError),
}

/// Underlying persistence fault.
#[derive(Debug)]
pub enum StorageFault {
    Units(UnitRepoError),
    Members(MemberRepoError),
}

/// Errors from hierarchy service operations.
#[derive(Debug)]
pub enum HierarchyError {
    NotFound(NotFoundTarget),
    /// Code already used by another unit.
    Conflict(String),
    BadRequest(BadRequestReason),
    /// Read or write could not be completed; the tree is unchanged.
    StorageFailure(StorageFault),
}

impl HierarchyError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::BadRequest(_) => ErrorKind::BadRequest,
            Self::StorageFailure(_) => ErrorKind::Storage,
        }
    }

    /// Returns a stable machine-readable code for logging.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(NotFoundTarget::Unit(_)) => "unit_not_found",
            Self::NotFound(NotFoundTarget::Parent(_)) => "parent_not_found",
            Self::Conflict(_) => "duplicate_code",
            Self::BadRequest(BadRequestReason::SelfParent(_)) => "self_parent",
            Self::BadRequest(BadRequestReason::CircularReference { .. }) => "circular_reference",
            Self::BadRequest(BadRequestReason::HasActiveMembers { .. }) => "has_active_members",
            Self::BadRequest(BadRequestReason::Validation(_)) => "invalid_input",
            Self::StorageFailure(StorageFault::Units(err)) => err.code(),
            Self::StorageFailure(StorageFault::Members(_)) => "member_store_error",
        }
    }
}

impl Display for HierarchyError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound(NotFoundTarget::Unit(id)) => write!(f, "unit not found: {id}"),
            Self::NotFound(NotFoundTarget::Parent(id)) => {
                write!(f, "parent unit not found: {id}")
            }
            Self::Conflict(code) => write!(f, "unit code `{code}` already exists"),
            Self::BadRequest(BadRequestReason::SelfParent(id)) => {
                write!(f, "unit {id} cannot be its own parent")
            }
            Self::BadRequest(BadRequestReason::CircularReference { unit_id, parent_id }) => write!(
                f,
                "circular reference: {parent_id} is a descendant of {unit_id}"
            ),
            Self::BadRequest(BadRequestReason::HasActiveMembers { unit_id, count }) => write!(
                f,
                "unit {unit_id} has {count} active member(s); transfer them first"
            ),
            Self::BadRequest(BadRequestReason::Validation(err)) => write!(f, "{err}"),
            Self::StorageFailure(StorageFault::Units(err)) => write!(f, "{err}"),
            Self::StorageFailure(StorageFault::Members(err)) => write!(f, "{err}"),
        }
    }
}

impl Error for HierarchyError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::BadRequest(BadRequestReason::Validation(err)) => Some(err),
            Self::StorageFailure(StorageFault::Units(err)) => Some(err),
            Self::StorageFailure(StorageFault::Members(err)) => Some(err),
            _ => None,
        }
    }
}

impl From<UnitRepoError> for HierarchyError {
    fn from(value: UnitRepoError) -> Self {
        match value {
            UnitRepoError::UnitNotFound(id) => Self::NotFound(NotFoundTarget::Unit(id)),
            UnitRepoError::DuplicateCode(code) => Self::Conflict(code),
            other => Self::StorageFailure(StorageFault::Units(other)),
        }
    }
}

impl From<MemberRepoError> for HierarchyError {
    fn from(value: MemberRepoError) -> Self {
        Self::StorageFailure(StorageFault::Members(value))
    }
}

impl From<UnitValidationError> for HierarchyError {
    fn from(value: UnitValidationError) -> Self {
        Self::BadRequest(BadRequestReason::Validation(value))
    }
}

pub type HierarchyResult<T> = Result<T, HierarchyError>;

/// Point-lookup view with immediate neighbours.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitDetail {
    pub unit: Unit,
    pub parent: Option<Unit>,
    /// Direct children ordered by `sort_order, name`.
    pub children: Vec<Unit>,
    pub active_member_count: u64,
}

/// Where a unit sits: the three fields that must always agree.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Placement {
    parent_id: Option<UnitId>,
    path: String,
    level: u32,
}

impl Placement {
    fn under(code: &str, parent: Option<&Unit>) -> Self {
        match parent {
            Some(parent) => Self {
                parent_id: Some(parent.id),
                path: child_path(&parent.path, code),
                level: level_of(Some(parent.level)),
            },
            None => Self {
                parent_id: None,
                path: root_path(code),
                level: level_of(None),
            },
        }
    }

    fn apply_to(&self, unit: &mut Unit) {
        unit.parent_id = self.parent_id;
        unit.path = self.path.clone();
        unit.level = self.level;
    }
}

/// Planned re-parenting of one unit and its whole subtree.
#[derive(Debug)]
struct Relocation {
    placement: Placement,
    parent_guard: Option<PathGuard>,
    descendants: Vec<UnitUpdate>,
}

/// Hierarchy service facade.
pub struct HierarchyService<S: UnitStore, M: MemberDirectory> {
    store: S,
    members: M,
    options: HierarchyOptions,
}

impl<S: UnitStore, M: MemberDirectory> HierarchyService<S, M> {
    /// Creates service with default options.
    pub fn new(store: S, members: M) -> Self {
        Self::with_options(store, members, HierarchyOptions::default())
    }

    pub fn with_options(store: S, members: M, options: HierarchyOptions) -> Self {
        Self {
            store,
            members,
            options,
        }
    }

    /// Returns the whole forest ordered by `level, sort_order, name`.
    pub fn get_tree(&self) -> HierarchyResult<Vec<UnitTreeNode>> {
        Ok(assemble(self.store.list_all_ordered()?))
    }

    /// Loads one unit.
    pub fn get_unit(&self, unit_id: UnitId) -> HierarchyResult<Unit> {
        self.require_unit(unit_id)
    }

    /// Loads one unit with its parent, direct children and member count.
    pub fn unit_detail(&self, unit_id: UnitId) -> HierarchyResult<UnitDetail> {
        let unit = self.require_unit(unit_id)?;
        let parent = match unit.parent_id {
            Some(parent_id) => self.store.get(parent_id)?,
            None => None,
        };
        let children = self.store.list_children(unit_id)?;
        let active_member_count = self.members.count_active_members(unit_id)?;
        Ok(UnitDetail {
            unit,
            parent,
            children,
            active_member_count,
        })
    }

    /// Creates one unit under an optional parent.
    ///
    /// # Errors
    /// - `BadRequest` for invalid input.
    /// - `Conflict` when the code is taken (case-insensitive).
    /// - `NotFound` when the parent does not exist.
    pub fn create_unit(&self, input: NewUnit) -> HierarchyResult<Unit> {
        let started_at = Instant::now();
        let result = self.create_unit_inner(input);
        match &result {
            Ok(unit) => info!(
                "event=unit_create module=hierarchy status=ok unit_id={} level={} duration_ms={}",
                unit.id,
                unit.level,
                started_at.elapsed().as_millis()
            ),
            Err(err) => log_failure("unit_create", None, err, started_at),
        }
        result
    }

    /// Re-parents one unit, cascading path/level to its whole subtree.
    ///
    /// `None` moves the unit to root level. Moving to the current parent is
    /// a no-op that returns the unit unchanged.
    ///
    /// # Errors
    /// - `NotFound` when the unit or the new parent does not exist.
    /// - `BadRequest` for self-parenting or a destination inside the subtree.
    /// - `StorageFailure` when the batch could not be committed; nothing
    ///   was written in that case.
    pub fn move_unit(
        &self,
        unit_id: UnitId,
        new_parent_id: Option<UnitId>,
    ) -> HierarchyResult<Unit> {
        let patch = UnitPatch {
            parent: Some(new_parent_id),
            ..UnitPatch::default()
        };
        self.apply_patch("unit_move", unit_id, patch)
    }

    /// Updates attributes and optionally the parent of one unit.
    ///
    /// A parent change runs the same cascade as [`Self::move_unit`] and is
    /// committed in the same batch as the attribute changes. Setting status
    /// to `Inactive` is subject to the same member guard as
    /// [`Self::remove_unit`].
    pub fn update_unit(&self, unit_id: UnitId, patch: UnitPatch) -> HierarchyResult<Unit> {
        self.apply_patch("unit_update", unit_id, patch)
    }

    /// Soft-deletes one unit by setting its status to `Inactive`.
    ///
    /// Placement and children are left untouched. Removing an already
    /// inactive unit returns it unchanged.
    pub fn remove_unit(&self, unit_id: UnitId) -> HierarchyResult<Unit> {
        let started_at = Instant::now();
        let result = self.remove_unit_inner(unit_id);
        match &result {
            Ok(_) => info!(
                "event=unit_remove module=hierarchy status=ok unit_id={unit_id} duration_ms={}",
                started_at.elapsed().as_millis()
            ),
            Err(err) => log_failure("unit_remove", Some(unit_id), err, started_at),
        }
        result
    }

    fn create_unit_inner(&self, input: NewUnit) -> HierarchyResult<Unit> {
        let input = input.normalized()?;
        if self.store.get_by_code(&input.code)?.is_some() {
            return Err(HierarchyError::Conflict(input.code));
        }

        let parent = match input.parent_id {
            Some(parent_id) => Some(
                self.store
                    .get(parent_id)?
                    .ok_or(HierarchyError::NotFound(NotFoundTarget::Parent(parent_id)))?,
            ),
            None => None,
        };

        let placement = Placement::under(&input.code, parent.as_ref());
        let mut unit = Unit {
            id: Uuid::new_v4(),
            code: input.code,
            name: input.name,
            short_name: input.short_name,
            unit_type: input.unit_type,
            status: UnitStatus::Active,
            parent_id: None,
            path: String::new(),
            level: 0,
            sort_order: input.sort_order.unwrap_or(0),
            created_at: 0,
            updated_at: 0,
        };
        placement.apply_to(&mut unit);

        Ok(self.store.insert(&unit)?)
    }

    fn remove_unit_inner(&self, unit_id: UnitId) -> HierarchyResult<Unit> {
        let unit = self.require_unit(unit_id)?;
        if unit.status == UnitStatus::Inactive {
            return Ok(unit);
        }
        self.ensure_deactivatable(&unit)?;
        Ok(self.store.set_status(unit_id, UnitStatus::Inactive)?)
    }

    fn apply_patch(
        &self,
        event: &'static str,
        unit_id: UnitId,
        patch: UnitPatch,
    ) -> HierarchyResult<Unit> {
        let started_at = Instant::now();
        let result = self.apply_patch_inner(unit_id, patch);
        match &result {
            Ok((unit, moved)) => info!(
                "event={event} module=hierarchy status=ok unit_id={unit_id} level={} moved_descendants={} duration_ms={}",
                unit.level,
                moved,
                started_at.elapsed().as_millis()
            ),
            Err(err) => log_failure(event, Some(unit_id), err, started_at),
        }
        result.map(|(unit, _)| unit)
    }

    /// Returns the stored unit and the number of descendants rewritten.
    fn apply_patch_inner(
        &self,
        unit_id: UnitId,
        patch: UnitPatch,
    ) -> HierarchyResult<(Unit, usize)> {
        let patch = patch.normalized()?;
        let current = self.require_unit(unit_id)?;
        if patch.is_empty() {
            return Ok((current, 0));
        }

        let relocation = match patch.parent {
            Some(new_parent_id) => self.plan_relocation(&current, new_parent_id)?,
            None => None,
        };

        let mut target = current.clone();
        patch.apply_attributes(&mut target);
        if let Some(relocation) = &relocation {
            relocation.placement.apply_to(&mut target);
        }

        if target == current {
            return Ok((current, 0));
        }
        if target.status == UnitStatus::Inactive && current.status != UnitStatus::Inactive {
            self.ensure_deactivatable(&current)?;
        }

        let mut batch = UnitBatch {
            updates: vec![UnitUpdate {
                unit: target,
                expected_path: current.path.clone(),
            }],
            ..UnitBatch::default()
        };
        let mut moved = 0;
        if let Some(relocation) = relocation {
            moved = relocation.descendants.len();
            batch.guards.extend(relocation.parent_guard);
            batch.updates.extend(relocation.descendants);
            if relocation.placement.path != current.path {
                batch.vacated_prefix = Some(current.path.clone());
            }
        }

        self.store.update_batch(&batch)?;
        let stored = self.require_unit(unit_id)?;
        Ok((stored, moved))
    }

    /// Plans the move of `unit` under `new_parent_id`.
    ///
    /// Returns `None` when the parent does not change.
    fn plan_relocation(
        &self,
        unit: &Unit,
        new_parent_id: Option<UnitId>,
    ) -> HierarchyResult<Option<Relocation>> {
        if new_parent_id == Some(unit.id) {
            return Err(HierarchyError::BadRequest(BadRequestReason::SelfParent(
                unit.id,
            )));
        }
        if new_parent_id == unit.parent_id {
            return Ok(None);
        }

        let parent = match new_parent_id {
            Some(parent_id) => {
                let parent = self
                    .store
                    .get(parent_id)?
                    .ok_or(HierarchyError::NotFound(NotFoundTarget::Parent(parent_id)))?;
                if is_descendant_path(&parent.path, &unit.path) {
                    return Err(HierarchyError::BadRequest(
                        BadRequestReason::CircularReference {
                            unit_id: unit.id,
                            parent_id,
                        },
                    ));
                }
                Some(parent)
            }
            None => None,
        };

        let placement = Placement::under(&unit.code, parent.as_ref());
        let level_diff = i64::from(placement.level) - i64::from(unit.level);

        let descendants = self.store.list_descendants(&unit.path)?;
        let mut updates = Vec::with_capacity(descendants.len());
        for descendant in descendants {
            let path = rebase_path(&descendant.path, &unit.path, &placement.path)
                .ok_or_else(|| corrupt_subtree(descendant.id, unit.id))?;
            let level = u32::try_from(i64::from(descendant.level) + level_diff)
                .ok()
                .filter(|level| *level == depth_of(&path))
                .ok_or_else(|| corrupt_subtree(descendant.id, unit.id))?;

            let expected_path = descendant.path.clone();
            let mut moved = descendant;
            moved.path = path;
            moved.level = level;
            updates.push(UnitUpdate {
                unit: moved,
                expected_path,
            });
        }

        Ok(Some(Relocation {
            parent_guard: parent.map(|parent| PathGuard {
                id: parent.id,
                expected_path: parent.path,
            }),
            placement,
            descendants: updates,
        }))
    }

    fn ensure_deactivatable(&self, unit: &Unit) -> HierarchyResult<()> {
        let count = match self.options.removal_policy {
            RemovalPolicy::DirectMembersOnly => self.members.count_active_members(unit.id)?,
            RemovalPolicy::IncludeDescendants => {
                let mut ids = vec![unit.id];
                ids.extend(
                    self.store
                        .list_descendants(&unit.path)?
                        .into_iter()
                        .map(|descendant| descendant.id),
                );
                self.members.count_active_members_in(&ids)?
            }
        };
        if count > 0 {
            return Err(HierarchyError::BadRequest(
                BadRequestReason::HasActiveMembers {
                    unit_id: unit.id,
                    count,
                },
            ));
        }
        Ok(())
    }

    fn require_unit(&self, unit_id: UnitId) -> HierarchyResult<Unit> {
        self.store
            .get(unit_id)?
            .ok_or(HierarchyError::NotFound(NotFoundTarget::Unit(unit_id)))
    }
}

fn corrupt_subtree(descendant_id: UnitId, root_id: UnitId) -> HierarchyError {
    HierarchyError::StorageFailure(StorageFault::Units(UnitRepoError::InvalidData(format!(
        "unit {descendant_id} does not match the path/level of ancestor {root_id}"
    ))))
}

fn log_failure(
    event: &'static str,
    unit_id: Option<UnitId>,
    err: &HierarchyError,
    started_at: Instant,
) {
    let unit_id = unit_id.map_or_else(|| "none".to_string(), |id| id.to_string());
    match err.kind() {
        ErrorKind::Storage => error!(
            "event={event} module=hierarchy status=error unit_id={unit_id} error_code={} duration_ms={} error={err}",
            err.code(),
            started_at.elapsed().as_millis()
        ),
        _ => warn!(
            "event={event} module=hierarchy status=rejected unit_id={unit_id} error_code={} duration_ms={}",
            err.code(),
            started_at.elapsed().as_millis()
        ),
    }
}
