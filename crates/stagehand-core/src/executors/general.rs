use crate::executors::{ExecutionContext, ExecutorOutcome, TaskExecutor};
use crate::models::{Task, TaskType};

/// Placeholder work such as approvals; finishes as soon as it runs.
pub struct GeneralExecutor;

impl TaskExecutor for GeneralExecutor {
    fn task_type(&self) -> TaskType {
        TaskType::General
    }

    fn run_once(&self, _context: &ExecutionContext, _task: &Task) -> ExecutorOutcome {
        ExecutorOutcome::Success
    }
}
