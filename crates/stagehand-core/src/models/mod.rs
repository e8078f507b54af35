pub mod error;
pub mod ids;
pub mod instance;
pub mod issue;
pub mod payload;
pub mod pipeline;
pub mod task;
pub mod task_check;

pub use error::{CoreError, CoreErrorKind, internal_error, invalid_input, not_found};
pub use ids::{
    DatabaseId, EnvironmentId, InstanceId, IssueId, PipelineId, PrincipalId, SYSTEM_BOT, StageId,
    TaskCheckRunId, TaskId, TaskRunId,
};
pub use instance::{Database, DatabaseFind, EngineType, Instance, NewDatabase, NewInstance};
pub use issue::{Issue, IssueFind, IssueStatus, NewIssue};
pub use payload::{
    DatabaseCreatePayload, FileCommit, SchemaUpdatePayload, TaskPayload, VcsPushEvent,
};
pub use pipeline::{
    NewPipeline, NewStage, Pipeline, PipelineFind, PipelineStatus, Stage, StageFind, StageStatus,
    derive_stage_status,
};
pub use task::{
    NewTask, Task, TaskFind, TaskRun, TaskRunFind, TaskRunStatus, TaskStatus, TaskStatusPatch,
    TaskType,
};
pub use task_check::{
    Advice, AdviceStatus, CheckRunLookup, NewTaskCheckRun, TaskCheckResult, TaskCheckRun,
    TaskCheckRunFind, TaskCheckRunStatus, TaskCheckRunStatusPatch, TaskCheckType,
};
