use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use stagehand_core::models::{CoreErrorKind, PipelineFind};
use stagehand_core::persistence::{MigrationStore, PipelineStore};
use stagehand_core::sqlite::{SqliteStore, current_schema_version, migration, migrations};

fn test_db_path(test_name: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_nanos();
    std::env::temp_dir().join(format!("stagehand-{test_name}-{nanos}.sqlite3"))
}

#[test]
fn migration_versions_are_strictly_increasing() {
    let entries = migrations();
    assert!(!entries.is_empty());

    let mut previous = 0;
    for entry in entries {
        assert!(entry.version > previous);
        previous = entry.version;
    }
}

#[test]
fn migration_lookup_and_schema_version_are_consistent() {
    let latest = current_schema_version();
    let latest_entry = migration(latest).expect("latest migration must exist");
    assert_eq!(latest_entry.version, latest);
}

#[test]
fn migration_sql_is_defined_for_up_and_down_paths() {
    for entry in migrations() {
        assert!(!entry.up_sql.trim().is_empty(), "up sql must not be empty");
        assert!(
            !entry.down_sql.trim().is_empty(),
            "down sql must not be empty"
        );
    }
}

#[test]
fn planned_migrations_include_versions_after_requested_version() {
    let store = SqliteStore::new(test_db_path("planned-migrations"));
    let planned = store.planned_migrations(0);

    assert_eq!(planned.len(), migrations().len());
    assert_eq!(planned[0].version, 1);
    assert!(store.planned_migrations(current_schema_version()).is_empty());
}

#[test]
fn migrate_to_latest_is_repeatable() {
    let path = test_db_path("migrate-repeatable");
    let store = SqliteStore::new(&path);
    assert_eq!(store.current_version().unwrap(), 0);

    store.migrate_to_latest().unwrap();
    store.migrate_to_latest().unwrap();
    assert_eq!(store.current_version().unwrap(), current_schema_version());

    let _ = std::fs::remove_file(path);
}

#[test]
fn applying_undefined_migration_fails_with_storage_error() {
    let path = test_db_path("undefined-migration");
    let store = SqliteStore::new(&path);
    let error = store
        .apply_migration(current_schema_version() + 1)
        .unwrap_err();

    assert_eq!(error.kind, CoreErrorKind::StorageFailure);

    let _ = std::fs::remove_file(path);
}

#[test]
fn operations_on_unmigrated_store_ask_for_migration() {
    let path = test_db_path("unmigrated");
    let store = SqliteStore::new(&path);
    let error = store.find_pipelines(&PipelineFind::default()).unwrap_err();

    assert_eq!(error.kind, CoreErrorKind::StorageFailure);
    assert!(error.message.contains("migrate-store"));

    let _ = std::fs::remove_file(path);
}
