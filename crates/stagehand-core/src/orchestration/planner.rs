use std::collections::HashMap;

use crate::models::{Stage, StageId, StageStatus, Task, TaskId, TaskStatus, derive_stage_status};

/// What the scheduler may do with one Open pipeline on this tick.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PipelineStep {
    /// Every stage is Done.
    Complete,
    Active(ActiveStage),
    /// The earliest unfinished stage can make no progress on its own.
    Stalled { stage_id: StageId, status: StageStatus },
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ActiveStage {
    pub stage_id: StageId,
    /// Pending tasks whose same-stage dependencies are all Done.
    pub startable: Vec<Task>,
    pub running: Vec<Task>,
    /// A Failed task freezes the stage: nothing new starts.
    pub frozen: bool,
}

/// Stages must be in position order, each paired with its tasks.
pub fn next_step(stages: &[(Stage, Vec<Task>)]) -> PipelineStep {
    let Some((stage, tasks)) = stages
        .iter()
        .find(|(_, tasks)| derive_stage_status(tasks) != StageStatus::Done)
    else {
        return PipelineStep::Complete;
    };

    let status = derive_stage_status(tasks);
    if status == StageStatus::Canceled {
        return PipelineStep::Stalled {
            stage_id: stage.id,
            status,
        };
    }

    let frozen = status == StageStatus::Failed;
    let statuses: HashMap<TaskId, TaskStatus> =
        tasks.iter().map(|task| (task.id, task.status)).collect();

    let startable = if frozen {
        Vec::new()
    } else {
        tasks
            .iter()
            .filter(|task| task.status == TaskStatus::Pending)
            .filter(|task| {
                task.depends_on
                    .iter()
                    .all(|dependency| statuses.get(dependency) == Some(&TaskStatus::Done))
            })
            .cloned()
            .collect()
    };
    let running: Vec<Task> = tasks
        .iter()
        .filter(|task| task.status == TaskStatus::Running)
        .cloned()
        .collect();

    if frozen && running.is_empty() {
        return PipelineStep::Stalled {
            stage_id: stage.id,
            status,
        };
    }

    PipelineStep::Active(ActiveStage {
        stage_id: stage.id,
        startable,
        running,
        frozen,
    })
}
