use tracing::info;

use crate::executors::{ExecutionContext, ExecutorOutcome, TaskExecutor, connect_error};
use crate::models::{
    CoreError, CoreErrorKind, DatabaseCreatePayload, DatabaseFind, NewDatabase, Task,
    TaskPayload, TaskType,
};

pub struct DatabaseCreateExecutor;

impl TaskExecutor for DatabaseCreateExecutor {
    fn task_type(&self) -> TaskType {
        TaskType::DatabaseCreate
    }

    fn run_once(&self, context: &ExecutionContext, task: &Task) -> ExecutorOutcome {
        let TaskPayload::DatabaseCreate(payload) = &task.payload else {
            return ExecutorOutcome::PermanentFailure(CoreError::new(
                CoreErrorKind::InvalidInput,
                "invalid database create payload",
            ));
        };
        create_database(context, task, payload).into()
    }
}

fn create_database(
    context: &ExecutionContext,
    task: &Task,
    payload: &DatabaseCreatePayload,
) -> Result<(), CoreError> {
    let instance = context.instance(task)?;

    let recorded = context.store.find_databases(&DatabaseFind {
        instance_id: Some(instance.id),
        name: Some(payload.database_name.clone()),
        ..DatabaseFind::default()
    })?;
    if !recorded.is_empty() {
        // A previous attempt finished the work before its verdict was persisted.
        info!(
            task_id = %task.id,
            database = %payload.database_name,
            "database already recorded; nothing to create"
        );
        return Ok(());
    }

    let mut connection = context
        .drivers
        .connect(&instance, None)
        .map_err(|error| connect_error(&instance, error))?;
    connection.create_database(&payload.database_name)?;
    context.store.create_database(&NewDatabase {
        instance_id: instance.id,
        name: payload.database_name.clone(),
    })?;

    info!(
        task_id = %task.id,
        instance = %instance.name,
        database = %payload.database_name,
        "created database"
    );
    Ok(())
}
