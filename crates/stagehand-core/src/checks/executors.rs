use std::collections::HashMap;
use std::sync::Arc;

use crate::executors::ExecutionContext;
use crate::models::{
    Advice, CoreError, CoreErrorKind, EngineType, Task, TaskCheckResult, TaskCheckType,
    TaskPayload,
};

/// Performs one TaskCheckRun for a task. An `Err` completes the run as Failed;
/// findings about the task itself belong in the advice list.
pub trait TaskCheckExecutor: Send + Sync {
    fn check_type(&self) -> TaskCheckType;

    fn run(&self, context: &ExecutionContext, task: &Task) -> Result<TaskCheckResult, CoreError>;
}

/// External statement review capability.
pub trait StatementAdvisor: Send + Sync {
    fn advise(&self, engine: EngineType, statement: &str) -> Result<Vec<Advice>, CoreError>;
}

pub struct AcceptAllAdvisor;

impl StatementAdvisor for AcceptAllAdvisor {
    fn advise(&self, _engine: EngineType, _statement: &str) -> Result<Vec<Advice>, CoreError> {
        Ok(vec![Advice::ok()])
    }
}

pub struct ConnectivityCheck;

impl TaskCheckExecutor for ConnectivityCheck {
    fn check_type(&self) -> TaskCheckType {
        TaskCheckType::Connectivity
    }

    fn run(&self, context: &ExecutionContext, task: &Task) -> Result<TaskCheckResult, CoreError> {
        let instance = context.instance(task)?;
        let ping = match task.database_id {
            Some(_) => {
                let database = context.database(task)?;
                context
                    .connect_database(&instance, &database)
                    .and_then(|mut connection| connection.ping())
            }
            None => context
                .drivers
                .connect(&instance, None)
                .and_then(|mut connection| connection.ping()),
        };

        let advice = match ping {
            Ok(()) => Advice::ok(),
            Err(error) => Advice::error(1, "Connection failure", error.message),
        };
        Ok(TaskCheckResult::new(vec![advice]))
    }
}

pub struct StatementAdviseCheck {
    advisor: Arc<dyn StatementAdvisor>,
}

impl StatementAdviseCheck {
    pub fn new(advisor: Arc<dyn StatementAdvisor>) -> Self {
        Self { advisor }
    }
}

impl TaskCheckExecutor for StatementAdviseCheck {
    fn check_type(&self) -> TaskCheckType {
        TaskCheckType::StatementAdvise
    }

    fn run(&self, context: &ExecutionContext, task: &Task) -> Result<TaskCheckResult, CoreError> {
        let TaskPayload::DatabaseSchemaUpdate(payload) = &task.payload else {
            return Err(CoreError::new(
                CoreErrorKind::InvalidInput,
                format!("task {} carries no statement to advise on", task.id),
            ));
        };
        let statement = payload.statement.trim();
        if statement.is_empty() {
            return Ok(TaskCheckResult::new(vec![Advice::ok()]));
        }
        let instance = context.instance(task)?;
        let advice_list = self.advisor.advise(instance.engine, statement)?;
        Ok(TaskCheckResult::new(advice_list))
    }
}

#[derive(Clone)]
pub struct CheckExecutorRegistry {
    executors: Arc<HashMap<TaskCheckType, Arc<dyn TaskCheckExecutor>>>,
}

impl CheckExecutorRegistry {
    pub fn new(
        executors: impl IntoIterator<Item = Arc<dyn TaskCheckExecutor>>,
    ) -> Result<Self, CoreError> {
        let mut mapped = HashMap::new();
        for executor in executors {
            let check_type = executor.check_type();
            if mapped.insert(check_type, executor).is_some() {
                return Err(CoreError::new(
                    CoreErrorKind::InvalidInput,
                    format!(
                        "duplicate check executor registration for '{}'",
                        check_type.as_str()
                    ),
                ));
            }
        }
        Ok(Self {
            executors: Arc::new(mapped),
        })
    }

    pub fn with_advisor(advisor: Arc<dyn StatementAdvisor>) -> Self {
        let executors: [(TaskCheckType, Arc<dyn TaskCheckExecutor>); 2] = [
            (TaskCheckType::Connectivity, Arc::new(ConnectivityCheck)),
            (
                TaskCheckType::StatementAdvise,
                Arc::new(StatementAdviseCheck::new(advisor)),
            ),
        ];
        Self {
            executors: Arc::new(executors.into_iter().collect()),
        }
    }

    pub fn with_defaults() -> Self {
        Self::with_advisor(Arc::new(AcceptAllAdvisor))
    }

    pub fn get(&self, check_type: TaskCheckType) -> Option<Arc<dyn TaskCheckExecutor>> {
        self.executors.get(&check_type).cloned()
    }
}
