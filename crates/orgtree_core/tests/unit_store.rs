use orgtree_core::db::open_db_in_memory;
use orgtree_core::{
    PathGuard, SqliteUnitStore, Unit, UnitBatch, UnitRepoError, UnitStatus, UnitStore, UnitType,
    UnitUpdate,
};
use rusqlite::Connection;
use uuid::Uuid;

fn setup() -> Connection {
    open_db_in_memory().unwrap()
}

fn unit(code: &str, parent: Option<&Unit>) -> Unit {
    let (parent_id, path, level) = match parent {
        Some(parent) => (
            Some(parent.id),
            format!("{}.{}", parent.path, code.to_lowercase()),
            parent.level + 1,
        ),
        None => (None, code.to_lowercase(), 0),
    };
    Unit {
        id: Uuid::new_v4(),
        code: code.to_string(),
        name: format!("Unit {code}"),
        short_name: None,
        unit_type: UnitType::Phong,
        status: UnitStatus::Active,
        parent_id,
        path,
        level,
        sort_order: 0,
        created_at: 0,
        updated_at: 0,
    }
}

/// Inserts `root -> mid -> leaf` and returns the stored rows.
fn seed_chain(store: &SqliteUnitStore<'_>) -> (Unit, Unit, Unit) {
    let root = store.insert(&unit("root", None)).unwrap();
    let mid = store.insert(&unit("mid", Some(&root))).unwrap();
    let leaf = store.insert(&unit("leaf", Some(&mid))).unwrap();
    (root, mid, leaf)
}

#[test]
fn try_new_rejects_unmigrated_connection() {
    let conn = Connection::open_in_memory().unwrap();
    let err = SqliteUnitStore::try_new(&conn).err().unwrap();
    assert!(matches!(
        err,
        UnitRepoError::UninitializedConnection {
            actual_version: 0,
            ..
        }
    ));
}

#[test]
fn insert_assigns_timestamps_and_round_trips_fields() {
    let conn = setup();
    let store = SqliteUnitStore::try_new(&conn).unwrap();
    let mut input = unit("phong_tc", None);
    input.short_name = Some("TC".to_string());
    input.sort_order = 7;

    let stored = store.insert(&input).unwrap();
    assert!(stored.created_at > 0);
    assert_eq!(stored.created_at, stored.updated_at);
    assert_eq!(stored.short_name.as_deref(), Some("TC"));
    assert_eq!(stored.sort_order, 7);
    assert_eq!(store.get(input.id).unwrap(), Some(stored.clone()));
    assert_eq!(store.get_by_code("PHONG_TC").unwrap(), Some(stored));
}

#[test]
fn insert_duplicate_code_maps_to_semantic_error() {
    let conn = setup();
    let store = SqliteUnitStore::try_new(&conn).unwrap();
    store.insert(&unit("khoa", None)).unwrap();

    let err = store.insert(&unit("KHOA", None)).unwrap_err();
    assert!(matches!(err, UnitRepoError::DuplicateCode(ref code) if code == "KHOA"));
}

#[test]
fn insert_under_moved_parent_is_stale() {
    let conn = setup();
    let store = SqliteUnitStore::try_new(&conn).unwrap();
    let root = store.insert(&unit("root", None)).unwrap();

    let mut stale_parent = root.clone();
    stale_parent.path = "elsewhere.root".to_string();
    let child = unit("child", Some(&stale_parent));

    let err = store.insert(&child).unwrap_err();
    assert!(matches!(err, UnitRepoError::StaleWrite(_)));
    assert_eq!(store.get(child.id).unwrap(), None);
}

#[test]
fn list_descendants_uses_path_range() {
    let conn = setup();
    let store = SqliteUnitStore::try_new(&conn).unwrap();
    let (root, mid, leaf) = seed_chain(&store);
    store.insert(&unit("root_2", None)).unwrap();
    store.insert(&unit("rootx", None)).unwrap();

    let ids: Vec<_> = store
        .list_descendants(&root.path)
        .unwrap()
        .into_iter()
        .map(|unit| unit.id)
        .collect();
    assert_eq!(ids, vec![mid.id, leaf.id]);
    assert!(store.list_descendants(&leaf.path).unwrap().is_empty());
}

#[test]
fn update_batch_with_wrong_expected_path_rolls_back_everything() {
    let conn = setup();
    let store = SqliteUnitStore::try_new(&conn).unwrap();
    let (root, mid, leaf) = seed_chain(&store);

    let mut renamed_root = root.clone();
    renamed_root.name = "Renamed".to_string();
    let mut renamed_leaf = leaf.clone();
    renamed_leaf.name = "Renamed leaf".to_string();

    let batch = UnitBatch {
        updates: vec![
            UnitUpdate {
                unit: renamed_root,
                expected_path: root.path.clone(),
            },
            UnitUpdate {
                unit: renamed_leaf,
                expected_path: "root.leaf".to_string(),
            },
        ],
        ..UnitBatch::default()
    };
    let err = store.update_batch(&batch).unwrap_err();
    assert!(matches!(err, UnitRepoError::StaleWrite(_)));
    assert_eq!(err.code(), "stale_write");

    assert_eq!(store.get(root.id).unwrap(), Some(root));
    assert_eq!(store.get(mid.id).unwrap(), Some(mid));
    assert_eq!(store.get(leaf.id).unwrap(), Some(leaf));
}

#[test]
fn update_batch_fails_when_guarded_row_moved() {
    let conn = setup();
    let store = SqliteUnitStore::try_new(&conn).unwrap();
    let (root, mid, _leaf) = seed_chain(&store);
    let other = store.insert(&unit("other", None)).unwrap();

    let mut moved = other.clone();
    moved.parent_id = Some(mid.id);
    moved.path = "root.mid.other".to_string();
    moved.level = 2;

    let batch = UnitBatch {
        guards: vec![PathGuard {
            id: mid.id,
            expected_path: "somewhere.mid".to_string(),
        }],
        updates: vec![UnitUpdate {
            unit: moved,
            expected_path: other.path.clone(),
        }],
        vacated_prefix: None,
    };
    let err = store.update_batch(&batch).unwrap_err();
    assert!(matches!(err, UnitRepoError::StaleWrite(_)));
    assert_eq!(store.get(other.id).unwrap(), Some(other));
    assert_eq!(store.get(root.id).unwrap(), Some(root));
}

#[test]
fn update_batch_fails_when_rows_remain_under_vacated_prefix() {
    let conn = setup();
    let store = SqliteUnitStore::try_new(&conn).unwrap();
    let (_root, mid, leaf) = seed_chain(&store);

    // Move `mid` to root level but forget its child.
    let mut detached = mid.clone();
    detached.parent_id = None;
    detached.path = "mid".to_string();
    detached.level = 0;

    let batch = UnitBatch {
        updates: vec![UnitUpdate {
            unit: detached,
            expected_path: mid.path.clone(),
        }],
        vacated_prefix: Some(mid.path.clone()),
        ..UnitBatch::default()
    };
    let err = store.update_batch(&batch).unwrap_err();
    assert!(matches!(err, UnitRepoError::StaleWrite(_)));
    assert_eq!(store.get(mid.id).unwrap(), Some(mid));
    assert_eq!(store.get(leaf.id).unwrap(), Some(leaf));
}

#[test]
fn empty_batch_is_noop() {
    let conn = setup();
    let store = SqliteUnitStore::try_new(&conn).unwrap();
    store.update_batch(&UnitBatch::default()).unwrap();
}

#[test]
fn set_status_on_missing_unit_returns_not_found() {
    let conn = setup();
    let store = SqliteUnitStore::try_new(&conn).unwrap();
    let missing = Uuid::new_v4();

    let err = store.set_status(missing, UnitStatus::Inactive).unwrap_err();
    assert!(matches!(err, UnitRepoError::UnitNotFound(id) if id == missing));
}

#[test]
fn children_listing_orders_by_sort_order_then_name() {
    let conn = setup();
    let store = SqliteUnitStore::try_new(&conn).unwrap();
    let root = store.insert(&unit("root", None)).unwrap();

    let mut late = unit("late", Some(&root));
    late.sort_order = 2;
    let mut beta = unit("beta", Some(&root));
    beta.sort_order = 1;
    let mut alpha = unit("alpha", Some(&root));
    alpha.sort_order = 1;
    for child in [&late, &beta, &alpha] {
        store.insert(child).unwrap();
    }

    let codes: Vec<String> = store
        .list_children(root.id)
        .unwrap()
        .into_iter()
        .map(|unit| unit.code)
        .collect();
    assert_eq!(codes, vec!["alpha", "beta", "late"]);
}
