use std::collections::HashSet;
use std::sync::Arc;

use tracing::info;

use crate::checks::TaskCheckRegistry;
use crate::driver::DriverRegistry;
use crate::migration::{self, MigrationHistory, parse_migration_info};
use crate::models::{
    CoreError, CoreErrorKind, DatabaseFind, DatabaseId, Instance, InstanceId, Issue, IssueId,
    NewIssue, NewTask, PrincipalId, Task, TaskCheckRun, TaskFind, TaskId, TaskPayload,
    TaskStatus, TaskStatusPatch, invalid_input, not_found,
};
use crate::persistence::ControlPlaneStore;

/// Operator-facing actions on issues, tasks and target databases.
#[derive(Clone)]
pub struct ControlPlane {
    store: Arc<dyn ControlPlaneStore>,
    drivers: Arc<DriverRegistry>,
    checks: TaskCheckRegistry,
}

impl ControlPlane {
    pub fn new(store: Arc<dyn ControlPlaneStore>, drivers: Arc<DriverRegistry>) -> Self {
        Self {
            checks: TaskCheckRegistry::new(store.clone()),
            store,
            drivers,
        }
    }

    /// Validates the whole request before anything is written, then stores it
    /// in one transaction.
    pub fn create_issue(&self, issue: &NewIssue) -> Result<Issue, CoreError> {
        validate_issue(issue)?;

        let tasks = || issue.pipeline.stages.iter().flat_map(|stage| &stage.tasks);
        let instances: HashSet<InstanceId> = tasks().map(|task| task.instance_id).collect();
        for instance_id in instances {
            self.instance(instance_id)?;
        }
        let targets: HashSet<(InstanceId, DatabaseId)> = tasks()
            .filter_map(|task| task.database_id.map(|id| (task.instance_id, id)))
            .collect();
        for (instance_id, database_id) in targets {
            self.require_database_on(instance_id, database_id)?;
        }

        let created = self.store.create_issue(issue)?;
        info!(
            issue_id = %created.id,
            pipeline_id = %created.pipeline_id,
            stages = issue.pipeline.stages.len(),
            "created issue"
        );
        Ok(created)
    }

    pub fn cancel_issue(&self, id: IssueId, updater_id: PrincipalId) -> Result<Issue, CoreError> {
        let issue = self.store.cancel_issue(id, updater_id)?;
        info!(issue_id = %issue.id, pipeline_id = %issue.pipeline_id, "canceled issue");
        Ok(issue)
    }

    /// Sends a Failed task back to Pending so the scheduler picks it up again.
    pub fn retry_task(&self, task_id: TaskId, updater_id: PrincipalId) -> Result<Task, CoreError> {
        let task = self.task(task_id)?;
        if task.status != TaskStatus::Failed {
            return Err(CoreError::new(
                CoreErrorKind::InvalidTransition,
                format!(
                    "task {task_id} is {}; only failed tasks can be retried",
                    task.status.as_str()
                ),
            ));
        }
        let task = self.store.patch_task_status(
            &TaskStatusPatch::new(task_id, updater_id, TaskStatus::Pending)
                .comment("retried by operator"),
        )?;
        info!(task_id = %task.id, "task queued for retry");
        Ok(task)
    }

    /// Starts fresh runs of every check the task requires.
    pub fn rerun_checks(
        &self,
        task_id: TaskId,
        creator_id: PrincipalId,
    ) -> Result<Vec<TaskCheckRun>, CoreError> {
        let task = self.task(task_id)?;
        self.checks.request_checks(&task, false, creator_id)
    }

    /// Creates the migration-tracking schema on a target database. Returns
    /// false when it already existed.
    pub fn setup_migration(
        &self,
        instance_id: InstanceId,
        database_name: &str,
    ) -> Result<bool, CoreError> {
        let instance = self.instance(instance_id)?;
        self.require_database(&instance, database_name)?;
        let mut connection = self.drivers.connect(&instance, Some(database_name))?;
        migration::setup_migration_schema(connection.as_mut(), &instance)
    }

    pub fn migration_history(
        &self,
        instance_id: InstanceId,
        database_name: &str,
    ) -> Result<Vec<MigrationHistory>, CoreError> {
        let instance = self.instance(instance_id)?;
        self.require_database(&instance, database_name)?;
        let mut connection = self.drivers.connect(&instance, Some(database_name))?;
        connection.migration_history()
    }

    fn instance(&self, id: InstanceId) -> Result<Instance, CoreError> {
        self.store
            .find_instance(id)?
            .ok_or_else(|| not_found(format!("instance {id} not found")))
    }

    fn task(&self, id: TaskId) -> Result<Task, CoreError> {
        self.store
            .find_tasks(&TaskFind {
                id: Some(id),
                ..TaskFind::default()
            })?
            .into_iter()
            .next()
            .ok_or_else(|| not_found(format!("task {id} not found")))
    }

    fn require_database_on(
        &self,
        instance_id: InstanceId,
        database_id: DatabaseId,
    ) -> Result<(), CoreError> {
        let database = self
            .store
            .find_databases(&DatabaseFind {
                id: Some(database_id),
                ..DatabaseFind::default()
            })?
            .into_iter()
            .next()
            .ok_or_else(|| invalid_input(format!("database {database_id} is not registered")))?;
        if database.instance_id != instance_id {
            return Err(invalid_input(format!(
                "database {database_id} belongs to instance {}, not to instance {instance_id}",
                database.instance_id
            )));
        }
        Ok(())
    }

    fn require_database(&self, instance: &Instance, name: &str) -> Result<(), CoreError> {
        let known = self.store.find_databases(&DatabaseFind {
            instance_id: Some(instance.id),
            name: Some(name.to_string()),
            ..DatabaseFind::default()
        })?;
        if known.is_empty() {
            return Err(not_found(format!(
                "database '{name}' is not registered on instance {}",
                instance.name
            )));
        }
        Ok(())
    }
}

fn validate_issue(issue: &NewIssue) -> Result<(), CoreError> {
    if issue.name.trim().is_empty() {
        return Err(invalid_input("issue name must not be empty"));
    }
    if issue.pipeline.stages.is_empty() {
        return Err(invalid_input("pipeline must have at least one stage"));
    }
    for stage in &issue.pipeline.stages {
        if stage.tasks.is_empty() {
            return Err(invalid_input(format!(
                "stage '{}' must have at least one task",
                stage.name
            )));
        }
        for (index, task) in stage.tasks.iter().enumerate() {
            validate_task(index, task).map_err(|error| {
                CoreError::new(
                    error.kind,
                    format!("stage '{}' task '{}': {}", stage.name, task.name, error.message),
                )
            })?;
        }
    }
    Ok(())
}

fn validate_task(index: usize, task: &NewTask) -> Result<(), CoreError> {
    if task.name.trim().is_empty() {
        return Err(invalid_input("task name must not be empty"));
    }
    if let Some(dependency) = task.depends_on.iter().find(|dependency| **dependency >= index) {
        return Err(invalid_input(format!(
            "dependency on index {dependency} must point at an earlier task of the same stage"
        )));
    }

    match &task.payload {
        TaskPayload::General => {}
        TaskPayload::DatabaseCreate(payload) => {
            if payload.database_name.trim().is_empty() {
                return Err(invalid_input("database name must not be empty"));
            }
        }
        TaskPayload::DatabaseSchemaUpdate(payload) => {
            if task.database_id.is_none() {
                return Err(invalid_input("schema update needs a target database"));
            }
            if let Some(event) = &payload.vcs_push_event {
                parse_migration_info(&event.file_commit.added)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        DatabaseId, EnvironmentId, FileCommit, NewPipeline, NewStage, SchemaUpdatePayload,
        VcsPushEvent,
    };

    fn issue_with(tasks: Vec<NewTask>) -> NewIssue {
        NewIssue {
            name: "add orders".to_string(),
            description: String::new(),
            creator_id: PrincipalId(7),
            subscriber_ids: Vec::new(),
            pipeline: NewPipeline {
                name: "rollout".to_string(),
                stages: vec![NewStage {
                    name: "dev".to_string(),
                    environment_id: EnvironmentId(1),
                    tasks,
                }],
            },
        }
    }

    fn schema_update(added: &str) -> NewTask {
        NewTask::new(
            "migrate",
            InstanceId(1),
            TaskPayload::DatabaseSchemaUpdate(SchemaUpdatePayload {
                statement: "CREATE TABLE orders (id INTEGER);".to_string(),
                vcs_push_event: Some(VcsPushEvent {
                    file_commit: FileCommit {
                        added: added.to_string(),
                        author_name: "dana".to_string(),
                        ..FileCommit::default()
                    },
                    ..VcsPushEvent::default()
                }),
            }),
        )
        .database(DatabaseId(1))
    }

    #[test]
    fn rejects_forward_dependencies() {
        let issue = issue_with(vec![
            NewTask::new("first", InstanceId(1), TaskPayload::General).depends_on(1),
            NewTask::new("second", InstanceId(1), TaskPayload::General),
        ]);
        let error = validate_issue(&issue).unwrap_err();
        assert_eq!(error.kind, CoreErrorKind::InvalidInput);
        assert!(error.message.contains("earlier task"));
    }

    #[test]
    fn rejects_unparseable_migration_file_at_creation() {
        let issue = issue_with(vec![schema_update("migrations/add_orders.sql")]);
        let error = validate_issue(&issue).unwrap_err();
        assert_eq!(error.kind, CoreErrorKind::ParseFailure);
    }

    #[test]
    fn accepts_well_formed_issue() {
        let issue = issue_with(vec![
            schema_update("migrations/0002__add_orders.sql"),
            NewTask::new("verify", InstanceId(1), TaskPayload::General).depends_on(0),
        ]);
        validate_issue(&issue).unwrap();
    }

    #[test]
    fn rejects_empty_stage() {
        let issue = issue_with(Vec::new());
        assert_eq!(
            validate_issue(&issue).unwrap_err().kind,
            CoreErrorKind::InvalidInput
        );
    }
}
