//! Materialized path encoding.
//!
//! A unit path is the dot-joined, lower-cased chain of codes from the root
//! down to the unit itself, e.g. `sgu.khoa_cntt.to1`. Level equals the
//! number of separators.

/// Separator between path segments.
pub const PATH_SEPARATOR: char = '.';

/// Returns the path of a root unit.
pub fn root_path(code: &str) -> String {
    code.to_lowercase()
}

/// Returns the path of a unit placed under `parent_path`.
pub fn child_path(parent_path: &str, code: &str) -> String {
    format!("{parent_path}{PATH_SEPARATOR}{}", code.to_lowercase())
}

/// Returns the level of a unit whose parent sits at `parent_level`.
pub fn level_of(parent_level: Option<u32>) -> u32 {
    parent_level.map_or(0, |level| level + 1)
}

/// Returns the prefix shared by every strict descendant of `path`.
pub fn descendant_prefix(path: &str) -> String {
    format!("{path}{PATH_SEPARATOR}")
}

/// Returns whether `candidate` lies strictly below `ancestor`.
pub fn is_descendant_path(candidate: &str, ancestor: &str) -> bool {
    candidate.len() > ancestor.len()
        && candidate.starts_with(ancestor)
        && candidate[ancestor.len()..].starts_with(PATH_SEPARATOR)
}

/// Replaces the leading `old_prefix` of `path` with `new_prefix`.
///
/// Only the leading segment run is spliced; later occurrences of
/// `old_prefix` inside `path` are kept. Returns `None` when `path` does not
/// start with `old_prefix`.
pub fn rebase_path(path: &str, old_prefix: &str, new_prefix: &str) -> Option<String> {
    let rest = path.strip_prefix(old_prefix)?;
    Some(format!("{new_prefix}{rest}"))
}

/// Returns the path of the parent, or `None` for a root path.
pub fn parent_path_of(path: &str) -> Option<&str> {
    path.rsplit_once(PATH_SEPARATOR).map(|(parent, _)| parent)
}

/// Returns the depth encoded by `path`.
pub fn depth_of(path: &str) -> u32 {
    path.matches(PATH_SEPARATOR).count() as u32
}

/// Returns the exclusive upper bound of the `descendant_prefix(path)` range.
///
/// Every string starting with `path.` sorts in `[path., path/)` under
/// bytewise comparison because `/` directly follows `.`.
pub(crate) fn descendant_upper_bound(path: &str) -> String {
    format!("{path}/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_and_child_paths_are_lower_cased() {
        assert_eq!(root_path("SGU"), "sgu");
        assert_eq!(child_path("sgu", "Khoa_CNTT"), "sgu.khoa_cntt");
        assert_eq!(level_of(None), 0);
        assert_eq!(level_of(Some(1)), 2);
    }

    #[test]
    fn descendant_check_requires_separator() {
        assert!(is_descendant_path("sgu.khoa", "sgu"));
        assert!(!is_descendant_path("sgu", "sgu"));
        assert!(!is_descendant_path("sgu2.khoa", "sgu"));
        assert!(!is_descendant_path("sgux", "sgu"));
    }

    #[test]
    fn rebase_only_touches_leading_prefix() {
        let rebased = rebase_path("a.b.a.b.c", "a.b", "x").expect("prefix matches");
        assert_eq!(rebased, "x.a.b.c");
        assert_eq!(rebase_path("z.a.b", "a.b", "x"), None);
    }

    #[test]
    fn depth_matches_separator_count() {
        assert_eq!(depth_of("sgu"), 0);
        assert_eq!(depth_of("sgu.khoa_cntt.to1"), 2);
        assert_eq!(parent_path_of("sgu.khoa_cntt.to1"), Some("sgu.khoa_cntt"));
        assert_eq!(parent_path_of("sgu"), None);
    }

    #[test]
    fn upper_bound_excludes_siblings_with_longer_codes() {
        let lower = descendant_prefix("sgu");
        let upper = descendant_upper_bound("sgu");
        for inside in ["sgu.a", "sgu.zzz", "sgu.~"] {
            assert!(inside >= lower.as_str() && inside < upper.as_str());
        }
        for outside in ["sgu", "sgu0", "sgu-a", "sgua.b", "sgu/"] {
            assert!(!(outside >= lower.as_str() && outside < upper.as_str()));
        }
    }
}
