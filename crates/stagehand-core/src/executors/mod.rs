mod database_create;
mod general;
mod schema_update;

pub use database_create::DatabaseCreateExecutor;
pub use general::GeneralExecutor;
pub use schema_update::SchemaUpdateExecutor;

use std::collections::HashMap;
use std::sync::Arc;

use crate::driver::{DriverConnection, DriverRegistry};
use crate::models::{
    CoreError, CoreErrorKind, Database, DatabaseFind, Instance, Task, TaskType, not_found,
};
use crate::persistence::ControlPlaneStore;

/// Verdict of one `run_once` attempt.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ExecutorOutcome {
    Success,
    PermanentFailure(CoreError),
    /// The task stays Running and is attempted again on a later tick.
    Retry { reason: String },
}

impl From<Result<(), CoreError>> for ExecutorOutcome {
    fn from(result: Result<(), CoreError>) -> Self {
        match result {
            Ok(()) => Self::Success,
            Err(error) if error.is_retryable() => Self::Retry {
                reason: error.message,
            },
            Err(error) => Self::PermanentFailure(error),
        }
    }
}

/// Shared handles every executor and check executor works through.
#[derive(Clone)]
pub struct ExecutionContext {
    pub store: Arc<dyn ControlPlaneStore>,
    pub drivers: Arc<DriverRegistry>,
}

impl ExecutionContext {
    pub fn new(store: Arc<dyn ControlPlaneStore>, drivers: Arc<DriverRegistry>) -> Self {
        Self { store, drivers }
    }

    pub fn instance(&self, task: &Task) -> Result<Instance, CoreError> {
        self.store
            .find_instance(task.instance_id)?
            .ok_or_else(|| not_found(format!("instance {} not found", task.instance_id)))
    }

    pub fn database(&self, task: &Task) -> Result<Database, CoreError> {
        let database_id = task.database_id.ok_or_else(|| {
            CoreError::new(
                CoreErrorKind::InvalidInput,
                format!("task {} has no target database", task.id),
            )
        })?;
        let find = DatabaseFind {
            id: Some(database_id),
            ..Default::default()
        };
        let database = self
            .store
            .find_databases(&find)?
            .into_iter()
            .next()
            .ok_or_else(|| not_found(format!("database {database_id} not found")))?;
        if database.instance_id != task.instance_id {
            return Err(CoreError::new(
                CoreErrorKind::InvalidInput,
                format!(
                    "database {database_id} belongs to instance {}, not to the task's instance {}",
                    database.instance_id, task.instance_id
                ),
            ));
        }
        Ok(database)
    }

    /// Opens a connection to the task's target database. Failures keep their
    /// kind so lock contention still reads as transient.
    pub fn connect_database(
        &self,
        instance: &Instance,
        database: &Database,
    ) -> Result<Box<dyn DriverConnection>, CoreError> {
        self.drivers
            .connect(instance, Some(&database.name))
            .map_err(|error| connect_error(instance, error))
    }
}

pub(crate) fn connect_error(instance: &Instance, error: CoreError) -> CoreError {
    let kind = match error.kind {
        CoreErrorKind::Transient => CoreErrorKind::Transient,
        CoreErrorKind::InvalidInput => CoreErrorKind::InvalidInput,
        _ => CoreErrorKind::Connection,
    };
    CoreError::new(
        kind,
        format!(
            "failed to connect instance: {} with user: {}. {}",
            instance.name,
            instance.username.as_deref().unwrap_or_default(),
            error.message
        ),
    )
}

/// Performs one attempt of a task's work. Implementations run on the
/// blocking pool and must tolerate being invoked again for the same task.
pub trait TaskExecutor: Send + Sync {
    fn task_type(&self) -> TaskType;

    fn run_once(&self, context: &ExecutionContext, task: &Task) -> ExecutorOutcome;
}

#[derive(Clone)]
pub struct ExecutorRegistry {
    executors: Arc<HashMap<TaskType, Arc<dyn TaskExecutor>>>,
}

impl ExecutorRegistry {
    pub fn new(
        executors: impl IntoIterator<Item = Arc<dyn TaskExecutor>>,
    ) -> Result<Self, CoreError> {
        let mut mapped = HashMap::new();
        for executor in executors {
            let task_type = executor.task_type();
            if mapped.insert(task_type, executor).is_some() {
                return Err(CoreError::new(
                    CoreErrorKind::InvalidInput,
                    format!(
                        "duplicate executor registration for task type '{}'",
                        task_type.as_str()
                    ),
                ));
            }
        }
        Ok(Self {
            executors: Arc::new(mapped),
        })
    }

    pub fn with_defaults() -> Self {
        let executors: [(TaskType, Arc<dyn TaskExecutor>); 3] = [
            (TaskType::General, Arc::new(GeneralExecutor)),
            (TaskType::DatabaseCreate, Arc::new(DatabaseCreateExecutor)),
            (TaskType::DatabaseSchemaUpdate, Arc::new(SchemaUpdateExecutor)),
        ];
        Self {
            executors: Arc::new(executors.into_iter().collect()),
        }
    }

    pub fn get(&self, task_type: TaskType) -> Option<Arc<dyn TaskExecutor>> {
        self.executors.get(&task_type).cloned()
    }
}
