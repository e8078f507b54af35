use std::str::FromStr;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::models::{
    CoreError, DatabaseId, InstanceId, PipelineId, PipelineStatus, PrincipalId, StageId,
    TaskCheckType, TaskId, TaskPayload, TaskRunId, invalid_input,
};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    General,
    DatabaseCreate,
    DatabaseSchemaUpdate,
}

const SCHEMA_UPDATE_CHECKS: &[TaskCheckType] =
    &[TaskCheckType::Connectivity, TaskCheckType::StatementAdvise];

impl TaskType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::General => "general",
            Self::DatabaseCreate => "database_create",
            Self::DatabaseSchemaUpdate => "database_schema_update",
        }
    }

    /// Checks that must reach a non-blocking Done before a task of this type may start.
    pub const fn required_checks(self) -> &'static [TaskCheckType] {
        match self {
            Self::General | Self::DatabaseCreate => &[],
            Self::DatabaseSchemaUpdate => SCHEMA_UPDATE_CHECKS,
        }
    }
}

impl FromStr for TaskType {
    type Err = CoreError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "general" => Ok(Self::General),
            "database_create" => Ok(Self::DatabaseCreate),
            "database_schema_update" => Ok(Self::DatabaseSchemaUpdate),
            other => Err(invalid_input(format!("unknown task type '{other}'"))),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Done,
    Failed,
    Canceled,
}

impl TaskStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Done => "done",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
        }
    }

    /// Done and Canceled accept no further writes. Failed stays open for an
    /// operator retry.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Canceled)
    }

    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running)
                | (Self::Pending, Self::Canceled)
                | (Self::Running, Self::Done)
                | (Self::Running, Self::Failed)
                | (Self::Running, Self::Canceled)
                | (Self::Failed, Self::Pending)
        )
    }
}

impl FromStr for TaskStatus {
    type Err = CoreError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "done" => Ok(Self::Done),
            "failed" => Ok(Self::Failed),
            "canceled" => Ok(Self::Canceled),
            other => Err(invalid_input(format!("unknown task status '{other}'"))),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Task {
    pub id: TaskId,
    pub pipeline_id: PipelineId,
    pub stage_id: StageId,
    pub instance_id: InstanceId,
    pub database_id: Option<DatabaseId>,
    pub name: String,
    pub task_type: TaskType,
    pub status: TaskStatus,
    pub payload: TaskPayload,
    pub depends_on: Vec<TaskId>,
    pub creator_id: PrincipalId,
    pub updater_id: PrincipalId,
    pub created_at: SystemTime,
    pub updated_at: SystemTime,
}

#[derive(Clone, Debug, Eq, PartialEq, Deserialize)]
pub struct NewTask {
    pub name: String,
    pub instance_id: InstanceId,
    #[serde(default)]
    pub database_id: Option<DatabaseId>,
    pub payload: TaskPayload,
    /// Indexes of earlier tasks in the same stage that must be Done first.
    #[serde(default)]
    pub depends_on: Vec<usize>,
}

impl NewTask {
    pub fn new(name: impl Into<String>, instance_id: InstanceId, payload: TaskPayload) -> Self {
        Self {
            name: name.into(),
            instance_id,
            database_id: None,
            payload,
            depends_on: Vec::new(),
        }
    }

    pub fn database(mut self, database_id: DatabaseId) -> Self {
        self.database_id = Some(database_id);
        self
    }

    pub fn depends_on(mut self, index: usize) -> Self {
        self.depends_on.push(index);
        self
    }

    pub fn task_type(&self) -> TaskType {
        self.payload.task_type()
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TaskFind {
    pub id: Option<TaskId>,
    pub pipeline_id: Option<PipelineId>,
    pub stage_id: Option<StageId>,
    pub status_list: Option<Vec<TaskStatus>>,
    /// Restricts to tasks whose pipeline has one of these statuses.
    pub pipeline_status_list: Option<Vec<PipelineStatus>>,
}

/// A Running to Running patch starts the next attempt: the open TaskRun is
/// closed as Failed with the patch comment and a fresh one is opened.
#[derive(Clone, Debug, PartialEq)]
pub struct TaskStatusPatch {
    pub id: TaskId,
    pub updater_id: PrincipalId,
    pub status: TaskStatus,
    /// Recorded on the TaskRun the transition closes.
    pub comment: Option<String>,
    pub result: Option<serde_json::Value>,
}

impl TaskStatusPatch {
    pub fn new(id: TaskId, updater_id: PrincipalId, status: TaskStatus) -> Self {
        Self {
            id,
            updater_id,
            status,
            comment: None,
            result: None,
        }
    }

    pub fn comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskRunStatus {
    Running,
    Done,
    Failed,
    Canceled,
}

impl TaskRunStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Done => "done",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
        }
    }

    pub const fn closing(status: TaskStatus) -> Option<Self> {
        match status {
            TaskStatus::Done => Some(Self::Done),
            TaskStatus::Failed => Some(Self::Failed),
            TaskStatus::Canceled => Some(Self::Canceled),
            TaskStatus::Pending | TaskStatus::Running => None,
        }
    }
}

impl FromStr for TaskRunStatus {
    type Err = CoreError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "running" => Ok(Self::Running),
            "done" => Ok(Self::Done),
            "failed" => Ok(Self::Failed),
            "canceled" => Ok(Self::Canceled),
            other => Err(invalid_input(format!("unknown task run status '{other}'"))),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TaskRun {
    pub id: TaskRunId,
    pub task_id: TaskId,
    pub name: String,
    pub status: TaskRunStatus,
    pub comment: String,
    pub result: Option<serde_json::Value>,
    pub creator_id: PrincipalId,
    pub started_at: SystemTime,
    pub ended_at: Option<SystemTime>,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TaskRunFind {
    pub task_id: Option<TaskId>,
    pub status_list: Option<Vec<TaskRunStatus>>,
}
