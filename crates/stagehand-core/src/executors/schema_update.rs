use tracing::debug;

use crate::executors::{ExecutionContext, ExecutorOutcome, TaskExecutor};
use crate::migration::{
    MigrationInfo, MigrationKind, MigrationRecord, apply_migration, parse_migration_info,
};
use crate::models::{CoreError, CoreErrorKind, SchemaUpdatePayload, Task, TaskPayload, TaskType};

pub struct SchemaUpdateExecutor;

impl TaskExecutor for SchemaUpdateExecutor {
    fn task_type(&self) -> TaskType {
        TaskType::DatabaseSchemaUpdate
    }

    fn run_once(&self, context: &ExecutionContext, task: &Task) -> ExecutorOutcome {
        let TaskPayload::DatabaseSchemaUpdate(payload) = &task.payload else {
            return ExecutorOutcome::PermanentFailure(CoreError::new(
                CoreErrorKind::InvalidInput,
                "invalid schema update payload",
            ));
        };
        apply_schema_update(context, task, payload).into()
    }
}

/// Reads the migration identity carried by the payload's VCS artifact, or an
/// ad-hoc identity when the statement was submitted directly.
pub fn migration_info(payload: &SchemaUpdatePayload) -> Result<MigrationInfo, CoreError> {
    let Some(event) = &payload.vcs_push_event else {
        return Ok(MigrationInfo::ad_hoc("ad-hoc statement"));
    };
    let mut info = parse_migration_info(&event.file_commit.added).map_err(|error| {
        CoreError::new(
            error.kind,
            format!("failed to start schema migration, error: {}", error.message),
        )
    })?;
    info.creator = event.file_commit.author_name.clone();
    Ok(info)
}

fn apply_schema_update(
    context: &ExecutionContext,
    task: &Task,
    payload: &SchemaUpdatePayload,
) -> Result<(), CoreError> {
    let info = migration_info(payload)?;

    let statement = payload.statement.trim();
    if info.kind != MigrationKind::Baseline && statement.is_empty() {
        return Err(CoreError::new(
            CoreErrorKind::InvalidInput,
            "empty sql statement",
        ));
    }

    let instance = context.instance(task)?;
    let database = context.database(task)?;
    let mut connection = context.connect_database(&instance, &database)?;

    if payload.vcs_push_event.is_none() {
        debug!(task_id = %task.id, database = %database.name, "executing sql statement");
        return connection.execute(statement);
    }

    debug!(
        task_id = %task.id,
        database = %database.name,
        kind = info.kind.as_str(),
        version = %info.version,
        "starting sql migration"
    );
    let record = MigrationRecord::new(info, statement);
    apply_migration(connection.as_mut(), &instance, &record)?;
    Ok(())
}
