use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::{Connection, ErrorCode, OpenFlags, OptionalExtension, TransactionBehavior, params};

use crate::driver::{DatabaseDriver, DriverConnection, DriverResult};
use crate::migration::{MigrationHistory, MigrationOutcome, MigrationRecord};
use crate::models::{CoreError, CoreErrorKind, EngineType, Instance};

const HISTORY_TABLE: &str = "stagehand_migration_history";
const BUSY_TIMEOUT: Duration = Duration::from_millis(500);

/// Driver for the SQLite engine. An instance is a data directory and each
/// database is a `<name>.db` file inside it.
#[derive(Clone, Debug, Default)]
pub struct SqliteDriver;

impl SqliteDriver {
    pub fn new() -> Self {
        Self
    }
}

impl DatabaseDriver for SqliteDriver {
    fn engine(&self) -> EngineType {
        EngineType::Sqlite
    }

    fn connect(
        &self,
        instance: &Instance,
        database: Option<&str>,
    ) -> DriverResult<Box<dyn DriverConnection>> {
        let data_dir = PathBuf::from(&instance.host);
        if !data_dir.is_dir() {
            return Err(CoreError::new(
                CoreErrorKind::Connection,
                format!("data directory '{}' does not exist", data_dir.display()),
            ));
        }

        let connection = match database {
            Some(name) => {
                let path = database_path(&data_dir, name)?;
                Connection::open_with_flags(
                    &path,
                    OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
                )
                .map_err(|error| {
                    CoreError::new(
                        CoreErrorKind::Connection,
                        format!("cannot open database '{name}': {error}"),
                    )
                })?
            }
            None => Connection::open_in_memory()
                .map_err(|error| CoreError::new(CoreErrorKind::Connection, error.to_string()))?,
        };
        connection
            .busy_timeout(BUSY_TIMEOUT)
            .map_err(|error| driver_error("configure connection", error))?;

        Ok(Box::new(SqliteConnection {
            data_dir,
            database: database.map(str::to_string),
            connection,
        }))
    }
}

struct SqliteConnection {
    data_dir: PathBuf,
    database: Option<String>,
    connection: Connection,
}

impl SqliteConnection {
    fn require_database(&self) -> DriverResult<&str> {
        self.database.as_deref().ok_or_else(|| {
            CoreError::new(
                CoreErrorKind::InvalidInput,
                "migration history lives inside a database; connect with a database name",
            )
        })
    }
}

impl DriverConnection for SqliteConnection {
    fn ping(&mut self) -> DriverResult<()> {
        self.connection
            .query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .map_err(|error| driver_error("ping", error))?;
        Ok(())
    }

    fn create_database(&mut self, name: &str) -> DriverResult<()> {
        let path = database_path(&self.data_dir, name)?;
        if path.exists() {
            return Err(CoreError::new(
                CoreErrorKind::ExecutionFailure,
                format!("database '{name}' already exists"),
            ));
        }
        let created = Connection::open_with_flags(
            &path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
        )
        .map_err(|error| driver_error("create database", error))?;
        // Writing the header makes the file a real database right away.
        created
            .pragma_update(None, "user_version", 0)
            .map_err(|error| driver_error("create database", error))?;
        Ok(())
    }

    fn execute(&mut self, statement: &str) -> DriverResult<()> {
        let transaction = self
            .connection
            .transaction()
            .map_err(|error| driver_error("execute", error))?;
        transaction
            .execute_batch(statement)
            .map_err(|error| driver_error("execute", error))?;
        transaction
            .commit()
            .map_err(|error| driver_error("execute", error))
    }

    fn needs_setup_migration(&mut self) -> DriverResult<bool> {
        self.require_database()?;
        let exists: bool = self
            .connection
            .query_row(
                "SELECT EXISTS (SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
                [HISTORY_TABLE],
                |row| row.get(0),
            )
            .map_err(|error| driver_error("check migration schema", error))?;
        Ok(!exists)
    }

    fn setup_migration_schema(&mut self) -> DriverResult<()> {
        self.require_database()?;
        self.connection
            .execute_batch(
                "
CREATE TABLE IF NOT EXISTS stagehand_migration_history (
    sequence INTEGER PRIMARY KEY AUTOINCREMENT,
    version TEXT NOT NULL UNIQUE,
    kind TEXT NOT NULL,
    description TEXT NOT NULL,
    creator TEXT NOT NULL,
    statement TEXT NOT NULL,
    checksum TEXT NOT NULL,
    applied_at_unix INTEGER NOT NULL
);
",
            )
            .map_err(|error| driver_error("setup migration schema", error))
    }

    fn execute_migration(&mut self, record: &MigrationRecord) -> DriverResult<MigrationOutcome> {
        self.require_database()?;
        let transaction = self
            .connection
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|error| driver_error("begin migration", error))?;

        let existing = transaction
            .query_row(
                &format!("{HISTORY_SELECT} WHERE version = ?1"),
                [record.info.version.as_str()],
                history_from_row,
            )
            .optional()
            .map_err(|error| driver_error("read migration history", error))?;
        if let Some(existing) = existing {
            return Ok(MigrationOutcome::AlreadyApplied(existing));
        }

        if record.executes_statement() {
            transaction
                .execute_batch(&record.statement)
                .map_err(|error| driver_error("apply migration", error))?;
        }

        transaction
            .execute(
                &format!(
                    "
INSERT INTO {HISTORY_TABLE} (
    version, kind, description, creator, statement, checksum, applied_at_unix
) VALUES (?1, ?2, ?3, ?4, ?5, ?6, strftime('%s', 'now'))
"
                ),
                params![
                    record.info.version,
                    record.info.kind.as_str(),
                    record.info.description,
                    record.info.creator,
                    record.statement,
                    record.checksum
                ],
            )
            .map_err(|error| driver_error("record migration", error))?;
        let sequence = transaction.last_insert_rowid();
        transaction
            .commit()
            .map_err(|error| driver_error("commit migration", error))?;

        Ok(MigrationOutcome::Applied { sequence })
    }

    fn migration_history(&mut self) -> DriverResult<Vec<MigrationHistory>> {
        self.require_database()?;
        let mut statement = self
            .connection
            .prepare(&format!("{HISTORY_SELECT} ORDER BY sequence"))
            .map_err(|error| driver_error("read migration history", error))?;
        let rows = statement
            .query_map([], history_from_row)
            .map_err(|error| driver_error("read migration history", error))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|error| driver_error("read migration history", error))
    }
}

const HISTORY_SELECT: &str = "SELECT sequence, version, kind, description, creator, statement, checksum, applied_at_unix FROM stagehand_migration_history";

fn history_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MigrationHistory> {
    let kind: String = row.get(2)?;
    let applied_at: i64 = row.get(7)?;
    Ok(MigrationHistory {
        sequence: row.get(0)?,
        version: row.get(1)?,
        kind: kind.parse().map_err(|error: CoreError| {
            rusqlite::Error::FromSqlConversionFailure(
                2,
                rusqlite::types::Type::Text,
                Box::new(std::io::Error::other(error.message)),
            )
        })?,
        description: row.get(3)?,
        creator: row.get(4)?,
        statement: row.get(5)?,
        checksum: row.get(6)?,
        applied_at: std::time::UNIX_EPOCH
            + Duration::from_secs(u64::try_from(applied_at).unwrap_or_default()),
    })
}

fn database_path(data_dir: &Path, name: &str) -> DriverResult<PathBuf> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if !valid {
        return Err(CoreError::new(
            CoreErrorKind::InvalidInput,
            format!("invalid database name '{name}'"),
        ));
    }
    Ok(data_dir.join(format!("{name}.db")))
}

fn driver_error(operation: &str, error: rusqlite::Error) -> CoreError {
    let kind = match error.sqlite_error_code() {
        Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) => CoreErrorKind::Transient,
        _ => CoreErrorKind::ExecutionFailure,
    };
    CoreError::new(kind, format!("{operation} failed: {error}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn database_names_cannot_escape_the_data_dir() {
        let dir = Path::new("/tmp/instance");
        assert!(database_path(dir, "../etc/passwd").is_err());
        assert!(database_path(dir, "").is_err());
        assert_eq!(
            database_path(dir, "orders_v2").unwrap(),
            dir.join("orders_v2.db")
        );
    }
}
