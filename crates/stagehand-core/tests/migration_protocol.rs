use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use stagehand_core::driver::{DriverConnection, DriverRegistry};
use stagehand_core::migration::{
    MigrationInfo, MigrationKind, MigrationOutcome, MigrationRecord, apply_migration,
    parse_migration_info, setup_migration_schema,
};
use stagehand_core::models::{CoreErrorKind, EngineType, EnvironmentId, Instance, InstanceId};

fn test_data_dir(test_name: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_nanos();
    let dir = std::env::temp_dir().join(format!("stagehand-{test_name}-{nanos}"));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn sqlite_instance(data_dir: &Path) -> Instance {
    Instance {
        id: InstanceId(1),
        name: "staging".to_string(),
        environment_id: EnvironmentId(1),
        engine: EngineType::Sqlite,
        host: data_dir.display().to_string(),
        port: None,
        username: None,
        password: None,
    }
}

/// Creates database `app` in the instance and opens a connection to it.
fn connect_app(drivers: &DriverRegistry, instance: &Instance) -> Box<dyn DriverConnection> {
    drivers
        .connect(instance, None)
        .unwrap()
        .create_database("app")
        .unwrap();
    drivers.connect(instance, Some("app")).unwrap()
}

fn table_exists(data_dir: &Path, table: &str) -> bool {
    let connection = rusqlite::Connection::open(data_dir.join("app.db")).unwrap();
    connection
        .query_row(
            "SELECT EXISTS (SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
            [table],
            |row| row.get(0),
        )
        .unwrap()
}

fn versioned(file: &str, statement: &str) -> MigrationRecord {
    let mut info = parse_migration_info(file).unwrap();
    info.creator = "dev@example.com".to_string();
    MigrationRecord::new(info, statement)
}

#[test]
fn migration_requires_tracking_schema() {
    let dir = test_data_dir("migration-missing-schema");
    let drivers = DriverRegistry::with_defaults();
    let instance = sqlite_instance(&dir);
    let mut connection = connect_app(&drivers, &instance);

    let record = versioned(
        "migrations/0001__create_users.sql",
        "CREATE TABLE users (id INTEGER PRIMARY KEY)",
    );
    let error = apply_migration(connection.as_mut(), &instance, &record).unwrap_err();

    assert_eq!(error.kind, CoreErrorKind::SetupRequired);
    assert_eq!(error.message, "missing migration schema for instance: staging");
    assert!(!table_exists(&dir, "users"));

    let _ = std::fs::remove_dir_all(dir);
}

#[test]
fn setup_is_idempotent() {
    let dir = test_data_dir("migration-setup");
    let drivers = DriverRegistry::with_defaults();
    let instance = sqlite_instance(&dir);
    let mut connection = connect_app(&drivers, &instance);

    assert!(setup_migration_schema(connection.as_mut(), &instance).unwrap());
    assert!(!setup_migration_schema(connection.as_mut(), &instance).unwrap());
    assert!(connection.migration_history().unwrap().is_empty());

    let _ = std::fs::remove_dir_all(dir);
}

#[test]
fn replaying_a_migration_applies_it_once() {
    let dir = test_data_dir("migration-replay");
    let drivers = DriverRegistry::with_defaults();
    let instance = sqlite_instance(&dir);
    let mut connection = connect_app(&drivers, &instance);
    setup_migration_schema(connection.as_mut(), &instance).unwrap();

    // Executing this twice would fail because the table already exists.
    let record = versioned(
        "0001__create_users.sql",
        "CREATE TABLE users (id INTEGER PRIMARY KEY)",
    );
    let first = apply_migration(connection.as_mut(), &instance, &record).unwrap();
    assert!(matches!(first, MigrationOutcome::Applied { .. }));

    let mut reconnected = drivers.connect(&instance, Some("app")).unwrap();
    let second = apply_migration(reconnected.as_mut(), &instance, &record).unwrap();
    let MigrationOutcome::AlreadyApplied(existing) = second else {
        panic!("expected the replay to be recognized");
    };
    assert_eq!(existing.checksum, record.checksum);

    let history = reconnected.migration_history().unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].version, "0001");
    assert_eq!(history[0].kind, MigrationKind::Migrate);
    assert_eq!(history[0].description, "create users");
    assert_eq!(history[0].creator, "dev@example.com");
    assert!(table_exists(&dir, "users"));

    let _ = std::fs::remove_dir_all(dir);
}

#[test]
fn same_version_with_different_statement_conflicts() {
    let dir = test_data_dir("migration-conflict");
    let drivers = DriverRegistry::with_defaults();
    let instance = sqlite_instance(&dir);
    let mut connection = connect_app(&drivers, &instance);
    setup_migration_schema(connection.as_mut(), &instance).unwrap();

    let original = versioned(
        "0002__add_orders__migrate.sql",
        "CREATE TABLE orders (id INTEGER PRIMARY KEY)",
    );
    apply_migration(connection.as_mut(), &instance, &original).unwrap();

    let edited = versioned(
        "0002__add_orders__migrate.sql",
        "CREATE TABLE orders (id INTEGER PRIMARY KEY, total INTEGER)",
    );
    let error = apply_migration(connection.as_mut(), &instance, &edited).unwrap_err();
    assert_eq!(error.kind, CoreErrorKind::MigrationConflict);
    assert_eq!(connection.migration_history().unwrap().len(), 1);

    let _ = std::fs::remove_dir_all(dir);
}

#[test]
fn baseline_is_recorded_without_running_its_statement() {
    let dir = test_data_dir("migration-baseline");
    let drivers = DriverRegistry::with_defaults();
    let instance = sqlite_instance(&dir);
    let mut connection = connect_app(&drivers, &instance);
    setup_migration_schema(connection.as_mut(), &instance).unwrap();

    let record = versioned(
        "0100__existing_schema__baseline.sql",
        "CREATE TABLE legacy (id INTEGER PRIMARY KEY)",
    );
    apply_migration(connection.as_mut(), &instance, &record).unwrap();

    let history = connection.migration_history().unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].kind, MigrationKind::Baseline);
    assert!(!table_exists(&dir, "legacy"));

    let _ = std::fs::remove_dir_all(dir);
}

#[test]
fn failed_statement_leaves_no_history() {
    let dir = test_data_dir("migration-failed-statement");
    let drivers = DriverRegistry::with_defaults();
    let instance = sqlite_instance(&dir);
    let mut connection = connect_app(&drivers, &instance);
    setup_migration_schema(connection.as_mut(), &instance).unwrap();

    let record = versioned("0003__broken.sql", "CREATE TABLEE broken (id INTEGER)");
    let error = apply_migration(connection.as_mut(), &instance, &record).unwrap_err();
    assert_eq!(error.kind, CoreErrorKind::ExecutionFailure);
    assert!(connection.migration_history().unwrap().is_empty());

    let _ = std::fs::remove_dir_all(dir);
}

#[test]
fn ad_hoc_statements_are_not_versioned() {
    let dir = test_data_dir("migration-ad-hoc");
    let drivers = DriverRegistry::with_defaults();
    let instance = sqlite_instance(&dir);
    let mut connection = connect_app(&drivers, &instance);
    setup_migration_schema(connection.as_mut(), &instance).unwrap();

    let record = MigrationRecord::new(MigrationInfo::ad_hoc("console"), "SELECT 1");
    let error = apply_migration(connection.as_mut(), &instance, &record).unwrap_err();
    assert_eq!(error.kind, CoreErrorKind::InvalidInput);

    let _ = std::fs::remove_dir_all(dir);
}
