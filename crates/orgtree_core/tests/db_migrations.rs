use orgtree_core::db::migrations::{current_user_version, latest_version};
use orgtree_core::db::{open_db, open_db_in_memory, DbError};
use orgtree_core::{
    HierarchyService, NewUnit, SqliteMemberDirectory, SqliteUnitStore, UnitType,
};
use rusqlite::Connection;

#[test]
fn open_db_in_memory_applies_all_migrations() {
    let conn = open_db_in_memory().unwrap();

    assert_eq!(current_user_version(&conn).unwrap(), latest_version());
    assert_table_exists(&conn, "units");
    assert_table_exists(&conn, "unit_members");
}

#[test]
fn units_table_enforces_placement_constraints() {
    let conn = open_db_in_memory().unwrap();
    conn.execute(
        "INSERT INTO units (unit_uuid, code, code_key, name, unit_type, path, level)
         VALUES ('a', 'SGU', 'sgu', 'SGU', 'TRUONG', 'sgu', 0);",
        [],
    )
    .unwrap();

    let self_parent = conn.execute(
        "INSERT INTO units (unit_uuid, code, code_key, name, unit_type, parent_uuid, path, level)
         VALUES ('b', 'b', 'b', 'B', 'KHOA', 'b', 'b', 0);",
        [],
    );
    assert!(self_parent.is_err());

    let negative_level = conn.execute(
        "INSERT INTO units (unit_uuid, code, code_key, name, unit_type, path, level)
         VALUES ('c', 'c', 'c', 'C', 'KHOA', 'c', -1);",
        [],
    );
    assert!(negative_level.is_err());

    let unknown_type = conn.execute(
        "INSERT INTO units (unit_uuid, code, code_key, name, unit_type, path, level)
         VALUES ('d', 'd', 'd', 'D', 'VIEN', 'd', 0);",
        [],
    );
    assert!(unknown_type.is_err());

    let dangling_parent = conn.execute(
        "INSERT INTO units (unit_uuid, code, code_key, name, unit_type, parent_uuid, path, level)
         VALUES ('e', 'e', 'e', 'E', 'KHOA', 'missing', 'missing.e', 1);",
        [],
    );
    assert!(dangling_parent.is_err());

    let foreign_segment = conn.execute(
        "INSERT INTO units (unit_uuid, code, code_key, name, unit_type, parent_uuid, path, level)
         VALUES ('f', 'f', 'f', 'F', 'KHOA', 'a', 'sgu.g', 1);",
        [],
    );
    assert!(foreign_segment.is_err());

    let folded_duplicate = conn.execute(
        "INSERT INTO units (unit_uuid, code, code_key, name, unit_type, parent_uuid, path, level)
         VALUES ('g', 'sgu', 'sgu', 'Other', 'KHOA', 'a', 'sgu.sgu', 1);",
        [],
    );
    assert!(folded_duplicate.is_err());
}

#[test]
fn opening_same_database_twice_keeps_units() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("orgtree.db");

    let conn_first = open_db(&path).unwrap();
    let created = {
        let service = HierarchyService::new(
            SqliteUnitStore::try_new(&conn_first).unwrap(),
            SqliteMemberDirectory::try_new(&conn_first).unwrap(),
        );
        service
            .create_unit(NewUnit::new("sgu", "Đại học Sài Gòn", UnitType::Truong))
            .unwrap()
    };
    drop(conn_first);

    let conn_second = open_db(&path).unwrap();
    assert_eq!(current_user_version(&conn_second).unwrap(), latest_version());
    let service = HierarchyService::new(
        SqliteUnitStore::try_new(&conn_second).unwrap(),
        SqliteMemberDirectory::try_new(&conn_second).unwrap(),
    );
    assert_eq!(service.get_unit(created.id).unwrap(), created);
}

#[test]
fn opening_database_with_newer_schema_version_returns_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("future.db");

    let conn = Connection::open(&path).unwrap();
    conn.execute_batch("PRAGMA user_version = 999;").unwrap();
    drop(conn);

    let err = open_db(&path).unwrap_err();
    match err {
        DbError::UnsupportedSchemaVersion {
            db_version,
            latest_supported,
        } => {
            assert_eq!(db_version, 999);
            assert_eq!(latest_supported, latest_version());
        }
        other => panic!("unexpected error: {other}"),
    }
}

fn assert_table_exists(conn: &Connection, table_name: &str) {
    let exists: i64 = conn
        .query_row(
            "SELECT EXISTS(
                SELECT 1
                FROM sqlite_master
                WHERE type = 'table' AND name = ?1
            );",
            [table_name],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(exists, 1, "table {table_name} does not exist");
}
