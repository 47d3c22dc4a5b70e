//! Organizational unit domain model.
//!
//! # Responsibility
//! - Define the canonical unit record persisted as one flat row.
//! - Define create/update input shapes and their validation rules.
//!
//! # Invariants
//! - `id` is stable and never reused for another unit.
//! - `path`/`level` always mirror `parent_id`; only the hierarchy service
//!   computes them.
//! - `code` never contains a path separator.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Stable unit identifier.
pub type UnitId = Uuid;

static UNIT_CODE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[\p{L}\p{N}_-]+$").expect("valid unit code regex"));

/// Category tag of one organizational unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UnitType {
    /// Top-level institution.
    Truong,
    /// Faculty.
    Khoa,
    /// Department or office.
    Phong,
    /// Board or committee.
    Ban,
    /// Center.
    TrungTam,
    /// Section or sub-unit of a faculty.
    ToBoMon,
}

impl UnitType {
    /// Returns the persisted representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Truong => "TRUONG",
            Self::Khoa => "KHOA",
            Self::Phong => "PHONG",
            Self::Ban => "BAN",
            Self::TrungTam => "TRUNG_TAM",
            Self::ToBoMon => "TO_BO_MON",
        }
    }

    /// Parses the persisted representation.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "TRUONG" => Some(Self::Truong),
            "KHOA" => Some(Self::Khoa),
            "PHONG" => Some(Self::Phong),
            "BAN" => Some(Self::Ban),
            "TRUNG_TAM" => Some(Self::TrungTam),
            "TO_BO_MON" => Some(Self::ToBoMon),
            _ => None,
        }
    }
}

/// Lifecycle state of one unit.
///
/// Status only governs member assignment. It never detaches the unit from
/// the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UnitStatus {
    Active,
    Inactive,
    Merged,
}

impl UnitStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Inactive => "INACTIVE",
            Self::Merged => "MERGED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "ACTIVE" => Some(Self::Active),
            "INACTIVE" => Some(Self::Inactive),
            "MERGED" => Some(Self::Merged),
            _ => None,
        }
    }
}

/// Canonical unit record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Unit {
    pub id: UnitId,
    /// Human identifier, unique case-insensitively.
    pub code: String,
    pub name: String,
    pub short_name: Option<String>,
    pub unit_type: UnitType,
    pub status: UnitStatus,
    /// `None` means this unit is a root.
    pub parent_id: Option<UnitId>,
    /// Lower-cased ancestor codes joined by `.`, ending with this unit.
    pub path: String,
    /// Depth below the root, `0` for roots.
    pub level: u32,
    pub sort_order: i64,
    /// Epoch ms creation timestamp.
    pub created_at: i64,
    /// Epoch ms update timestamp.
    pub updated_at: i64,
}

/// Input for creating one unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUnit {
    pub code: String,
    pub name: String,
    pub short_name: Option<String>,
    pub unit_type: UnitType,
    pub parent_id: Option<UnitId>,
    /// Defaults to `0` when omitted.
    pub sort_order: Option<i64>,
}

impl NewUnit {
    /// Creates a root-level input with default optional fields.
    pub fn new(code: impl Into<String>, name: impl Into<String>, unit_type: UnitType) -> Self {
        Self {
            code: code.into(),
            name: name.into(),
            short_name: None,
            unit_type,
            parent_id: None,
            sort_order: None,
        }
    }

    /// Sets the parent unit.
    pub fn under(mut self, parent_id: UnitId) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    /// Sets the sibling display order.
    pub fn with_sort_order(mut self, sort_order: i64) -> Self {
        self.sort_order = Some(sort_order);
        self
    }

    /// Sets the short display name.
    pub fn with_short_name(mut self, short_name: impl Into<String>) -> Self {
        self.short_name = Some(short_name.into());
        self
    }

    /// Returns a trimmed copy of this input after validating every field.
    pub fn normalized(&self) -> Result<Self, UnitValidationError> {
        let code = normalize_code(&self.code)?;
        let name = normalize_name(&self.name)?;
        let sort_order = self.sort_order.map(check_sort_order).transpose()?;
        Ok(Self {
            code,
            name,
            short_name: normalize_short_name(self.short_name.as_deref()),
            unit_type: self.unit_type,
            parent_id: self.parent_id,
            sort_order,
        })
    }
}

/// Partial update of one unit.
///
/// `None` leaves a field untouched. `parent` uses a nested option:
/// `Some(None)` moves the unit to root level.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnitPatch {
    pub name: Option<String>,
    pub short_name: Option<Option<String>>,
    pub unit_type: Option<UnitType>,
    pub status: Option<UnitStatus>,
    pub sort_order: Option<i64>,
    pub parent: Option<Option<UnitId>>,
}

impl UnitPatch {
    /// Returns whether the patch touches nothing.
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Returns a trimmed copy of this patch after validating set fields.
    pub fn normalized(&self) -> Result<Self, UnitValidationError> {
        let name = self.name.as_deref().map(normalize_name).transpose()?;
        let sort_order = self.sort_order.map(check_sort_order).transpose()?;
        Ok(Self {
            name,
            short_name: self
                .short_name
                .as_ref()
                .map(|value| normalize_short_name(value.as_deref())),
            unit_type: self.unit_type,
            status: self.status,
            sort_order,
            parent: self.parent,
        })
    }

    /// Applies attribute fields to `unit`, leaving placement fields alone.
    pub fn apply_attributes(&self, unit: &mut Unit) {
        if let Some(name) = &self.name {
            unit.name = name.clone();
        }
        if let Some(short_name) = &self.short_name {
            unit.short_name = short_name.clone();
        }
        if let Some(unit_type) = self.unit_type {
            unit.unit_type = unit_type;
        }
        if let Some(status) = self.status {
            unit.status = status;
        }
        if let Some(sort_order) = self.sort_order {
            unit.sort_order = sort_order;
        }
    }
}

/// Validation errors for unit input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitValidationError {
    /// Code is blank after trim.
    BlankCode,
    /// Code contains characters other than letters, digits, `_` or `-`.
    InvalidCode(String),
    /// Name is blank after trim.
    BlankName,
    /// Sort order is negative.
    NegativeSortOrder(i64),
}

impl Display for UnitValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BlankCode => write!(f, "unit code must not be blank"),
            Self::InvalidCode(code) => write!(
                f,
                "unit code `{code}` may only contain letters, digits, `_` or `-`"
            ),
            Self::BlankName => write!(f, "unit name must not be blank"),
            Self::NegativeSortOrder(value) => {
                write!(f, "sort order must not be negative, got {value}")
            }
        }
    }
}

impl Error for UnitValidationError {}

fn normalize_code(value: &str) -> Result<String, UnitValidationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(UnitValidationError::BlankCode);
    }
    if !UNIT_CODE_RE.is_match(trimmed) {
        return Err(UnitValidationError::InvalidCode(trimmed.to_string()));
    }
    Ok(trimmed.to_string())
}

fn normalize_name(value: &str) -> Result<String, UnitValidationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(UnitValidationError::BlankName);
    }
    Ok(trimmed.to_string())
}

fn normalize_short_name(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn check_sort_order(value: i64) -> Result<i64, UnitValidationError> {
    if value < 0 {
        return Err(UnitValidationError::NegativeSortOrder(value));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::{NewUnit, UnitPatch, UnitStatus, UnitType, UnitValidationError};

    #[test]
    fn normalized_trims_fields() {
        let input = NewUnit::new("  khoa_cntt ", " Khoa CNTT ", UnitType::Khoa)
            .with_short_name("   ");
        let normalized = input.normalized().expect("input should be valid");
        assert_eq!(normalized.code, "khoa_cntt");
        assert_eq!(normalized.name, "Khoa CNTT");
        assert_eq!(normalized.short_name, None);
    }

    #[test]
    fn normalized_rejects_dotted_and_spaced_codes() {
        for code in ["a.b", "a b", "a/b"] {
            let err = NewUnit::new(code, "Name", UnitType::Phong)
                .normalized()
                .expect_err("code should be rejected");
            assert!(matches!(err, UnitValidationError::InvalidCode(_)));
        }
    }

    #[test]
    fn normalized_accepts_unicode_letters() {
        let input = NewUnit::new("phòng-đt", "Phòng Đào tạo", UnitType::Phong);
        assert!(input.normalized().is_ok());
    }

    #[test]
    fn normalized_rejects_blank_and_negative_values() {
        assert_eq!(
            NewUnit::new(" ", "Name", UnitType::Ban).normalized(),
            Err(UnitValidationError::BlankCode)
        );
        assert_eq!(
            NewUnit::new("ban", "", UnitType::Ban).normalized(),
            Err(UnitValidationError::BlankName)
        );
        assert_eq!(
            NewUnit::new("ban", "Ban", UnitType::Ban)
                .with_sort_order(-1)
                .normalized(),
            Err(UnitValidationError::NegativeSortOrder(-1))
        );
    }

    #[test]
    fn db_strings_round_trip() {
        for kind in [
            UnitType::Truong,
            UnitType::Khoa,
            UnitType::Phong,
            UnitType::Ban,
            UnitType::TrungTam,
            UnitType::ToBoMon,
        ] {
            assert_eq!(UnitType::parse(kind.as_str()), Some(kind));
        }
        for status in [UnitStatus::Active, UnitStatus::Inactive, UnitStatus::Merged] {
            assert_eq!(UnitStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(UnitStatus::parse("active"), None);
    }

    #[test]
    fn empty_patch_is_detected() {
        assert!(UnitPatch::default().is_empty());
        let patch = UnitPatch {
            parent: Some(None),
            ..UnitPatch::default()
        };
        assert!(!patch.is_empty());
    }
}
