mod info;

pub use info::{MigrationInfo, MigrationKind, parse_migration_info};

use std::time::SystemTime;

use sha2::{Digest, Sha256};
use tracing::info;

use crate::driver::DriverConnection;
use crate::models::{CoreError, CoreErrorKind, Instance};

/// A migration ready to hand to a driver: identity, statement and the
/// statement's checksum.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MigrationRecord {
    pub info: MigrationInfo,
    pub statement: String,
    pub checksum: String,
}

impl MigrationRecord {
    pub fn new(info: MigrationInfo, statement: impl Into<String>) -> Self {
        let statement = statement.into();
        let checksum = statement_checksum(&statement);
        Self {
            info,
            statement,
            checksum,
        }
    }

    /// Baselines are recorded but never run; empty statements have nothing to run.
    pub fn executes_statement(&self) -> bool {
        self.info.kind != MigrationKind::Baseline && !self.statement.trim().is_empty()
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MigrationHistory {
    pub sequence: i64,
    pub version: String,
    pub kind: MigrationKind,
    pub description: String,
    pub creator: String,
    pub statement: String,
    pub checksum: String,
    pub applied_at: SystemTime,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum MigrationOutcome {
    Applied { sequence: i64 },
    AlreadyApplied(MigrationHistory),
}

pub fn statement_checksum(statement: &str) -> String {
    format!("{:x}", Sha256::digest(statement.as_bytes()))
}

/// Applies a versioned migration to an open target connection at most once.
///
/// The tracking schema must already exist. Replaying a recorded version with
/// the same statement is a no-op; replaying it with a different statement is
/// a `MigrationConflict`.
pub fn apply_migration(
    connection: &mut dyn DriverConnection,
    instance: &Instance,
    record: &MigrationRecord,
) -> Result<MigrationOutcome, CoreError> {
    if record.info.kind == MigrationKind::Sql {
        return Err(CoreError::new(
            CoreErrorKind::InvalidInput,
            "ad-hoc sql statements are not versioned migrations",
        ));
    }

    if connection.needs_setup_migration()? {
        return Err(CoreError::new(
            CoreErrorKind::SetupRequired,
            format!("missing migration schema for instance: {}", instance.name),
        ));
    }

    let outcome = connection.execute_migration(record)?;
    match &outcome {
        MigrationOutcome::Applied { sequence } => {
            info!(
                instance = %instance.name,
                version = %record.info.version,
                kind = record.info.kind.as_str(),
                sequence,
                "applied migration"
            );
        }
        MigrationOutcome::AlreadyApplied(existing) if existing.checksum == record.checksum => {
            info!(
                instance = %instance.name,
                version = %record.info.version,
                "migration already applied; skipping"
            );
        }
        MigrationOutcome::AlreadyApplied(existing) => {
            return Err(CoreError::new(
                CoreErrorKind::MigrationConflict,
                format!(
                    "migration version {} was already applied on instance {} with a different statement (recorded checksum {}, new checksum {})",
                    record.info.version, instance.name, existing.checksum, record.checksum
                ),
            ));
        }
    }
    Ok(outcome)
}

/// Operator action: creates the migration-tracking schema on a target database.
/// Returns false when it was already present.
pub fn setup_migration_schema(
    connection: &mut dyn DriverConnection,
    instance: &Instance,
) -> Result<bool, CoreError> {
    if !connection.needs_setup_migration()? {
        return Ok(false);
    }
    connection.setup_migration_schema()?;
    info!(instance = %instance.name, "created migration schema");
    Ok(true)
}
