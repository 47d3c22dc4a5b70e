//! CLI smoke entry point.
//!
//! # Responsibility
//! - Verify `orgtree_core` linkage and schema bootstrap.
//! - Dump the current unit forest as JSON.
//!
//! Reads `ORGTREE_DB` (database file, in-memory when unset) and
//! `ORGTREE_LOG_DIR` (absolute log directory, no file logging when unset).

use orgtree_core::db::{migrations::current_user_version, open_db, open_db_in_memory};
use orgtree_core::{HierarchyService, SqliteMemberDirectory, SqliteUnitStore};
use std::process::ExitCode;

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("orgtree: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    if let Ok(log_dir) = std::env::var("ORGTREE_LOG_DIR") {
        orgtree_core::init_logging(orgtree_core::default_log_level(), &log_dir)?;
    }

    let conn = match std::env::var("ORGTREE_DB") {
        Ok(path) => open_db(path)?,
        Err(_) => open_db_in_memory()?,
    };

    println!("orgtree_core ping={}", orgtree_core::ping());
    println!("orgtree_core version={}", orgtree_core::core_version());
    println!("orgtree_core schema_version={}", current_user_version(&conn)?);

    let service = HierarchyService::new(
        SqliteUnitStore::try_new(&conn)?,
        SqliteMemberDirectory::try_new(&conn)?,
    );
    let tree = service.get_tree()?;
    log::info!("event=cli_tree_dump module=cli status=ok roots={}", tree.len());
    println!("{}", serde_json::to_string_pretty(&tree)?);
    Ok(())
}
