mod sqlite;

pub use sqlite::SqliteDriver;

use std::collections::HashMap;
use std::sync::Arc;

use crate::migration::{MigrationHistory, MigrationOutcome, MigrationRecord};
use crate::models::{CoreError, CoreErrorKind, EngineType, Instance};

pub type DriverResult<T> = Result<T, CoreError>;

/// Opens connections to target databases of one engine.
pub trait DatabaseDriver: Send + Sync {
    fn engine(&self) -> EngineType;

    /// Connects to `database` on the instance, or to the instance itself when
    /// no database is given.
    fn connect(
        &self,
        instance: &Instance,
        database: Option<&str>,
    ) -> DriverResult<Box<dyn DriverConnection>>;
}

/// Connection to a target. Lock contention surfaces as `CoreErrorKind::Transient`.
pub trait DriverConnection: Send {
    fn ping(&mut self) -> DriverResult<()>;

    fn create_database(&mut self, name: &str) -> DriverResult<()>;

    fn execute(&mut self, statement: &str) -> DriverResult<()>;

    fn needs_setup_migration(&mut self) -> DriverResult<bool>;

    fn setup_migration_schema(&mut self) -> DriverResult<()>;

    /// Executes the statement and records the history row in one transaction,
    /// or reports the row already recorded for the version.
    fn execute_migration(&mut self, record: &MigrationRecord) -> DriverResult<MigrationOutcome>;

    fn migration_history(&mut self) -> DriverResult<Vec<MigrationHistory>>;
}

#[derive(Clone, Default)]
pub struct DriverRegistry {
    drivers: HashMap<EngineType, Arc<dyn DatabaseDriver>>,
}

impl DriverRegistry {
    pub fn new(drivers: impl IntoIterator<Item = Arc<dyn DatabaseDriver>>) -> DriverResult<Self> {
        let mut mapped = HashMap::new();
        for driver in drivers {
            let engine = driver.engine();
            if mapped.insert(engine, driver).is_some() {
                return Err(CoreError::new(
                    CoreErrorKind::InvalidInput,
                    format!("duplicate driver registration for engine '{}'", engine.as_str()),
                ));
            }
        }
        Ok(Self { drivers: mapped })
    }

    pub fn with_defaults() -> Self {
        let mut drivers: HashMap<EngineType, Arc<dyn DatabaseDriver>> = HashMap::new();
        drivers.insert(EngineType::Sqlite, Arc::new(SqliteDriver::new()));
        Self { drivers }
    }

    pub fn connect(
        &self,
        instance: &Instance,
        database: Option<&str>,
    ) -> DriverResult<Box<dyn DriverConnection>> {
        let driver = self.drivers.get(&instance.engine).ok_or_else(|| {
            CoreError::new(
                CoreErrorKind::InvalidInput,
                format!(
                    "no driver is registered for engine '{}'",
                    instance.engine.as_str()
                ),
            )
        })?;
        driver.connect(instance, database)
    }
}
