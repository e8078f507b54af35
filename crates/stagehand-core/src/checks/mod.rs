mod executors;

pub use executors::{
    AcceptAllAdvisor, CheckExecutorRegistry, ConnectivityCheck, StatementAdviseCheck,
    StatementAdvisor, TaskCheckExecutor,
};

use std::sync::Arc;

use tracing::{debug, warn};

use crate::models::{
    CheckRunLookup, CoreError, NewTaskCheckRun, PrincipalId, SYSTEM_BOT, Task, TaskCheckResult,
    TaskCheckRun, TaskCheckRunFind, TaskCheckRunId, TaskCheckRunStatus, TaskCheckRunStatusPatch,
    TaskCheckType, TaskId, invalid_input,
};
use crate::persistence::ControlPlaneStore;

/// Whether a task's required checks allow it to start.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CheckGate {
    Passed,
    /// Checks are missing or still running; missing ones were requested.
    Pending { waiting_on: Vec<TaskCheckType> },
    Blocked {
        check_type: TaskCheckType,
        reason: String,
    },
}

#[derive(Clone)]
pub struct TaskCheckRegistry {
    store: Arc<dyn ControlPlaneStore>,
}

impl TaskCheckRegistry {
    pub fn new(store: Arc<dyn ControlPlaneStore>) -> Self {
        Self { store }
    }

    /// Returns the Running run for (task, check type), or the latest Done one
    /// when `skip_if_done` is set, creating a Running run only when neither
    /// exists.
    pub fn ensure_check_run(
        &self,
        task_id: TaskId,
        check_type: TaskCheckType,
        skip_if_done: bool,
        creator_id: PrincipalId,
    ) -> Result<TaskCheckRun, CoreError> {
        let (run, lookup) = self
            .store
            .create_task_check_run_if_needed(&NewTaskCheckRun {
                task_id,
                creator_id,
                name: format!("{} check", check_type.as_str()),
                check_type,
                skip_if_done,
            })?;

        match lookup {
            CheckRunLookup::Created => {
                debug!(
                    task_id = %task_id,
                    check_type = check_type.as_str(),
                    check_run_id = %run.id,
                    "created task check run"
                );
            }
            CheckRunLookup::ReusedRunning { running } if running > 1 => {
                warn!(
                    task_id = %task_id,
                    check_type = check_type.as_str(),
                    running,
                    "found more than one running task check run"
                );
            }
            CheckRunLookup::ReusedRunning { .. } | CheckRunLookup::ReusedDone => {}
        }
        Ok(run)
    }

    pub fn complete_check_run(
        &self,
        id: TaskCheckRunId,
        status: TaskCheckRunStatus,
        comment: impl Into<String>,
        result: Option<TaskCheckResult>,
        updater_id: PrincipalId,
    ) -> Result<TaskCheckRun, CoreError> {
        if status == TaskCheckRunStatus::Running {
            return Err(invalid_input(format!(
                "task check run {id} can only be completed as done or failed"
            )));
        }
        self.store
            .patch_task_check_run_status(&TaskCheckRunStatusPatch {
                id,
                updater_id,
                status,
                comment: comment.into(),
                result,
            })
    }

    pub fn list_check_runs(&self, find: &TaskCheckRunFind) -> Result<Vec<TaskCheckRun>, CoreError> {
        self.store.find_task_check_runs(find)
    }

    /// Starts a run of every check the task type requires. With
    /// `skip_if_done` unset this re-runs checks that already finished.
    pub fn request_checks(
        &self,
        task: &Task,
        skip_if_done: bool,
        creator_id: PrincipalId,
    ) -> Result<Vec<TaskCheckRun>, CoreError> {
        task.task_type
            .required_checks()
            .iter()
            .map(|check_type| self.ensure_check_run(task.id, *check_type, skip_if_done, creator_id))
            .collect()
    }

    pub fn check_gate(&self, task: &Task) -> Result<CheckGate, CoreError> {
        let mut waiting_on = Vec::new();
        for check_type in task.task_type.required_checks() {
            let latest = self
                .list_check_runs(&TaskCheckRunFind {
                    task_id: Some(task.id),
                    check_type: Some(*check_type),
                    ..TaskCheckRunFind::default()
                })?
                .into_iter()
                .last();

            let Some(run) = latest else {
                self.ensure_check_run(task.id, *check_type, true, SYSTEM_BOT)?;
                waiting_on.push(*check_type);
                continue;
            };

            match run.status {
                TaskCheckRunStatus::Running => waiting_on.push(*check_type),
                TaskCheckRunStatus::Failed => {
                    return Ok(CheckGate::Blocked {
                        check_type: *check_type,
                        reason: run.comment,
                    });
                }
                TaskCheckRunStatus::Done => {
                    if let Some(advice) = run.result.as_ref().and_then(TaskCheckResult::first_error)
                    {
                        return Ok(CheckGate::Blocked {
                            check_type: *check_type,
                            reason: format!("{}: {}", advice.title, advice.content),
                        });
                    }
                }
            }
        }

        if waiting_on.is_empty() {
            Ok(CheckGate::Passed)
        } else {
            Ok(CheckGate::Pending { waiting_on })
        }
    }
}
