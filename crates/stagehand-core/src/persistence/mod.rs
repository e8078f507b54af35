use crate::models::{
    CheckRunLookup, CoreError, Database, DatabaseFind, Instance, InstanceId, Issue, IssueFind,
    IssueId, NewDatabase, NewInstance, NewIssue, NewTaskCheckRun, Pipeline, PipelineFind,
    PipelineId, PrincipalId, Stage, StageFind, Task, TaskCheckRun, TaskCheckRunFind,
    TaskCheckRunStatusPatch, TaskFind, TaskRun, TaskRunFind, TaskStatusPatch,
};

pub type PersistenceResult<T> = Result<T, CoreError>;

pub trait MigrationStore: Send + Sync {
    fn current_version(&self) -> PersistenceResult<i64>;

    fn apply_migration(&self, target_version: i64) -> PersistenceResult<()>;
}

pub trait IssueStore: Send + Sync {
    /// Creates the issue with its pipeline, stages, tasks and dependencies atomically.
    fn create_issue(&self, issue: &NewIssue) -> PersistenceResult<Issue>;

    fn find_issues(&self, find: &IssueFind) -> PersistenceResult<Vec<Issue>>;

    /// Marks issue and pipeline Canceled and every Pending task Canceled in one transaction.
    fn cancel_issue(&self, id: IssueId, updater_id: PrincipalId) -> PersistenceResult<Issue>;
}

pub trait PipelineStore: Send + Sync {
    fn find_pipelines(&self, find: &PipelineFind) -> PersistenceResult<Vec<Pipeline>>;

    /// Stages come back ordered by position.
    fn find_stages(&self, find: &StageFind) -> PersistenceResult<Vec<Stage>>;

    /// Moves an Open pipeline and its issue to Done. Returns false when the
    /// pipeline was no longer Open.
    fn complete_pipeline(&self, id: PipelineId, updater_id: PrincipalId)
    -> PersistenceResult<bool>;
}

pub trait TaskStore: Send + Sync {
    fn find_tasks(&self, find: &TaskFind) -> PersistenceResult<Vec<Task>>;

    /// Applies one status transition and the matching TaskRun bookkeeping atomically.
    /// Fails with `InvalidTransition` when the stored status does not allow it.
    fn patch_task_status(&self, patch: &TaskStatusPatch) -> PersistenceResult<Task>;
}

pub trait TaskRunStore: Send + Sync {
    fn find_task_runs(&self, find: &TaskRunFind) -> PersistenceResult<Vec<TaskRun>>;
}

pub trait TaskCheckRunStore: Send + Sync {
    fn create_task_check_run_if_needed(
        &self,
        create: &NewTaskCheckRun,
    ) -> PersistenceResult<(TaskCheckRun, CheckRunLookup)>;

    fn find_task_check_runs(&self, find: &TaskCheckRunFind)
    -> PersistenceResult<Vec<TaskCheckRun>>;

    fn patch_task_check_run_status(
        &self,
        patch: &TaskCheckRunStatusPatch,
    ) -> PersistenceResult<TaskCheckRun>;
}

pub trait InstanceStore: Send + Sync {
    fn create_instance(&self, instance: &NewInstance) -> PersistenceResult<Instance>;

    fn find_instance(&self, id: InstanceId) -> PersistenceResult<Option<Instance>>;

    fn create_database(&self, database: &NewDatabase) -> PersistenceResult<Database>;

    fn find_databases(&self, find: &DatabaseFind) -> PersistenceResult<Vec<Database>>;
}

pub trait ControlPlaneStore:
    IssueStore + PipelineStore + TaskStore + TaskRunStore + TaskCheckRunStore + InstanceStore
{
}

impl<T> ControlPlaneStore for T where
    T: IssueStore + PipelineStore + TaskStore + TaskRunStore + TaskCheckRunStore + InstanceStore
{
}
