use std::str::FromStr;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::models::{CoreError, PrincipalId, TaskCheckRunId, TaskId, invalid_input};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskCheckType {
    Connectivity,
    StatementAdvise,
}

impl TaskCheckType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connectivity => "connectivity",
            Self::StatementAdvise => "statement_advise",
        }
    }
}

impl FromStr for TaskCheckType {
    type Err = CoreError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "connectivity" => Ok(Self::Connectivity),
            "statement_advise" => Ok(Self::StatementAdvise),
            other => Err(invalid_input(format!("unknown task check type '{other}'"))),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskCheckRunStatus {
    Running,
    Done,
    Failed,
}

impl TaskCheckRunStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

impl FromStr for TaskCheckRunStatus {
    type Err = CoreError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "running" => Ok(Self::Running),
            "done" => Ok(Self::Done),
            "failed" => Ok(Self::Failed),
            other => Err(invalid_input(format!(
                "unknown task check run status '{other}'"
            ))),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdviceStatus {
    Success,
    Warning,
    Error,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Advice {
    pub status: AdviceStatus,
    pub code: i32,
    pub title: String,
    #[serde(default)]
    pub content: String,
}

impl Advice {
    pub fn ok() -> Self {
        Self {
            status: AdviceStatus::Success,
            code: 0,
            title: "OK".to_string(),
            content: String::new(),
        }
    }

    pub fn error(code: i32, title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            status: AdviceStatus::Error,
            code,
            title: title.into(),
            content: content.into(),
        }
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct TaskCheckResult {
    pub advice_list: Vec<Advice>,
}

impl TaskCheckResult {
    pub fn new(advice_list: Vec<Advice>) -> Self {
        Self { advice_list }
    }

    pub fn has_error(&self) -> bool {
        self.advice_list
            .iter()
            .any(|advice| advice.status == AdviceStatus::Error)
    }

    pub fn first_error(&self) -> Option<&Advice> {
        self.advice_list
            .iter()
            .find(|advice| advice.status == AdviceStatus::Error)
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TaskCheckRun {
    pub id: TaskCheckRunId,
    pub task_id: TaskId,
    pub name: String,
    pub status: TaskCheckRunStatus,
    pub check_type: TaskCheckType,
    pub comment: String,
    pub result: Option<TaskCheckResult>,
    pub creator_id: PrincipalId,
    pub updater_id: PrincipalId,
    pub created_at: SystemTime,
    pub updated_at: SystemTime,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NewTaskCheckRun {
    pub task_id: TaskId,
    pub creator_id: PrincipalId,
    pub name: String,
    pub check_type: TaskCheckType,
    /// Reuse an existing Done run instead of creating a fresh one.
    pub skip_if_done: bool,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TaskCheckRunFind {
    pub id: Option<TaskCheckRunId>,
    pub task_id: Option<TaskId>,
    pub check_type: Option<TaskCheckType>,
    pub status_list: Option<Vec<TaskCheckRunStatus>>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TaskCheckRunStatusPatch {
    pub id: TaskCheckRunId,
    pub updater_id: PrincipalId,
    pub status: TaskCheckRunStatus,
    pub comment: String,
    pub result: Option<TaskCheckResult>,
}

/// How `create_task_check_run_if_needed` satisfied the request.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CheckRunLookup {
    Created,
    ReusedDone,
    /// `running` counts the Running rows seen; more than one is an anomaly.
    ReusedRunning { running: usize },
}
