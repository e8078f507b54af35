use std::str::FromStr;
use std::time::SystemTime;

use serde::Deserialize;

use crate::models::{
    CoreError, EnvironmentId, NewTask, PipelineId, PrincipalId, StageId, Task, TaskStatus,
    invalid_input,
};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum PipelineStatus {
    Open,
    Done,
    Canceled,
}

impl PipelineStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Done => "done",
            Self::Canceled => "canceled",
        }
    }
}

impl FromStr for PipelineStatus {
    type Err = CoreError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "open" => Ok(Self::Open),
            "done" => Ok(Self::Done),
            "canceled" => Ok(Self::Canceled),
            other => Err(invalid_input(format!("unknown pipeline status '{other}'"))),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Pipeline {
    pub id: PipelineId,
    pub name: String,
    pub status: PipelineStatus,
    pub creator_id: PrincipalId,
    pub updater_id: PrincipalId,
    pub created_at: SystemTime,
    pub updated_at: SystemTime,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Stage {
    pub id: StageId,
    pub pipeline_id: PipelineId,
    pub environment_id: EnvironmentId,
    pub name: String,
    pub position: i64,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum StageStatus {
    Pending,
    Running,
    Done,
    Failed,
    Canceled,
}

/// Stage status is a pure function of its tasks; it is never stored.
pub fn derive_stage_status(tasks: &[Task]) -> StageStatus {
    if tasks.iter().any(|task| task.status == TaskStatus::Failed) {
        return StageStatus::Failed;
    }
    if tasks.iter().all(|task| task.status == TaskStatus::Done) {
        return StageStatus::Done;
    }
    if tasks.iter().all(|task| task.status.is_terminal()) {
        return StageStatus::Canceled;
    }
    if tasks
        .iter()
        .any(|task| matches!(task.status, TaskStatus::Running | TaskStatus::Done))
    {
        return StageStatus::Running;
    }
    StageStatus::Pending
}

#[derive(Clone, Debug, Eq, PartialEq, Deserialize)]
pub struct NewPipeline {
    pub name: String,
    pub stages: Vec<NewStage>,
}

#[derive(Clone, Debug, Eq, PartialEq, Deserialize)]
pub struct NewStage {
    pub name: String,
    pub environment_id: EnvironmentId,
    pub tasks: Vec<NewTask>,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PipelineFind {
    pub id: Option<PipelineId>,
    pub status_list: Option<Vec<PipelineStatus>>,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct StageFind {
    pub id: Option<StageId>,
    pub pipeline_id: Option<PipelineId>,
}
