use rusqlite::{Connection, OptionalExtension, Row, params};

use crate::models::{
    CoreError, CoreErrorKind, DatabaseId, EnvironmentId, InstanceId, Issue, IssueFind, IssueId,
    IssueStatus, NewIssue, Pipeline, PipelineFind, PipelineId, PipelineStatus, PrincipalId, Stage,
    StageFind, StageId, Task, TaskFind, TaskId, TaskPayload, TaskRun, TaskRunFind, TaskRunId,
    TaskRunStatus, TaskStatus, TaskStatusPatch, TaskType, invalid_input, not_found,
};
use crate::persistence::{IssueStore, PersistenceResult, PipelineStore, TaskRunStore, TaskStore};
use crate::sqlite::store::{
    SqliteStore, StoreError, StoreResult, from_unix_seconds, now_unix, parse_column,
    status_list_param, storage_error_sqlite,
};

const ISSUE_COLUMNS: &str = "id, name, description, status, pipeline_id, creator_id, updater_id, created_at_unix, updated_at_unix";
const PIPELINE_COLUMNS: &str =
    "id, name, status, creator_id, updater_id, created_at_unix, updated_at_unix";
const TASK_COLUMNS: &str = "id, pipeline_id, stage_id, instance_id, database_id, name, task_type, status, payload, creator_id, updater_id, created_at_unix, updated_at_unix";
const TASK_RUN_COLUMNS: &str =
    "id, task_id, name, status, comment, result, creator_id, started_at_unix, ended_at_unix";

impl IssueStore for SqliteStore {
    fn create_issue(&self, issue: &NewIssue) -> PersistenceResult<Issue> {
        self.with_write_transaction("create_issue", |transaction| {
            let now = now_unix()?;
            let creator = issue.creator_id.0;

            transaction.execute(
                "
INSERT INTO pipelines (name, status, creator_id, updater_id, created_at_unix, updated_at_unix)
VALUES (?1, ?2, ?3, ?3, ?4, ?4)
",
                params![
                    issue.pipeline.name,
                    PipelineStatus::Open.as_str(),
                    creator,
                    now
                ],
            )?;
            let pipeline_id = transaction.last_insert_rowid();

            transaction.execute(
                "
INSERT INTO issues (
    name, description, status, pipeline_id, creator_id, updater_id, created_at_unix, updated_at_unix
) VALUES (?1, ?2, ?3, ?4, ?5, ?5, ?6, ?6)
",
                params![
                    issue.name,
                    issue.description,
                    IssueStatus::Open.as_str(),
                    pipeline_id,
                    creator,
                    now
                ],
            )?;
            let issue_id = transaction.last_insert_rowid();

            for subscriber in &issue.subscriber_ids {
                transaction.execute(
                    "INSERT OR IGNORE INTO issue_subscribers (issue_id, subscriber_id) VALUES (?1, ?2)",
                    params![issue_id, subscriber.0],
                )?;
            }

            for (stage_position, stage) in issue.pipeline.stages.iter().enumerate() {
                transaction.execute(
                    "
INSERT INTO stages (pipeline_id, environment_id, name, position)
VALUES (?1, ?2, ?3, ?4)
",
                    params![
                        pipeline_id,
                        stage.environment_id.0,
                        stage.name,
                        stage_position as i64
                    ],
                )?;
                let stage_id = transaction.last_insert_rowid();

                let mut task_ids: Vec<i64> = Vec::with_capacity(stage.tasks.len());
                for (task_position, task) in stage.tasks.iter().enumerate() {
                    transaction.execute(
                        "
INSERT INTO tasks (
    pipeline_id, stage_id, instance_id, database_id, name, task_type, status, payload,
    position, creator_id, updater_id, created_at_unix, updated_at_unix
) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10, ?11, ?11)
",
                        params![
                            pipeline_id,
                            stage_id,
                            task.instance_id.0,
                            task.database_id.map(|id| id.0),
                            task.name,
                            task.task_type().as_str(),
                            TaskStatus::Pending.as_str(),
                            task.payload.to_json()?,
                            task_position as i64,
                            creator,
                            now
                        ],
                    )?;
                    let task_id = transaction.last_insert_rowid();

                    for dependency in &task.depends_on {
                        let depends_on = task_ids.get(*dependency).copied().ok_or_else(|| {
                            invalid_input(format!(
                                "task '{}' depends on index {dependency}, which is not an earlier task of stage '{}'",
                                task.name, stage.name
                            ))
                        })?;
                        transaction.execute(
                            "INSERT OR IGNORE INTO task_dependencies (task_id, depends_on_task_id) VALUES (?1, ?2)",
                            params![task_id, depends_on],
                        )?;
                    }
                    task_ids.push(task_id);
                }
            }

            load_issue(transaction, IssueId(issue_id))
        })
    }

    fn find_issues(&self, find: &IssueFind) -> PersistenceResult<Vec<Issue>> {
        self.with_reader("find_issues", |connection| {
            Ok(query_issues(connection, find)?)
        })
    }

    fn cancel_issue(&self, id: IssueId, updater_id: PrincipalId) -> PersistenceResult<Issue> {
        self.with_write_transaction("cancel_issue", |transaction| {
            let issue = load_issue(transaction, id)?;
            if issue.status != IssueStatus::Open {
                return Err(CoreError::new(
                    CoreErrorKind::InvalidTransition,
                    format!("issue {id} is already {}", issue.status.as_str()),
                )
                .into());
            }
            let now = now_unix()?;

            transaction.execute(
                "UPDATE issues SET status = ?2, updater_id = ?3, updated_at_unix = ?4 WHERE id = ?1",
                params![id.0, IssueStatus::Canceled.as_str(), updater_id.0, now],
            )?;
            transaction.execute(
                "UPDATE pipelines SET status = ?2, updater_id = ?3, updated_at_unix = ?4 WHERE id = ?1",
                params![
                    issue.pipeline_id.0,
                    PipelineStatus::Canceled.as_str(),
                    updater_id.0,
                    now
                ],
            )?;
            transaction.execute(
                "
UPDATE tasks SET status = ?2, updater_id = ?3, updated_at_unix = ?4
WHERE pipeline_id = ?1 AND status = ?5
",
                params![
                    issue.pipeline_id.0,
                    TaskStatus::Canceled.as_str(),
                    updater_id.0,
                    now,
                    TaskStatus::Pending.as_str()
                ],
            )?;

            load_issue(transaction, id)
        })
    }
}

impl PipelineStore for SqliteStore {
    fn find_pipelines(&self, find: &PipelineFind) -> PersistenceResult<Vec<Pipeline>> {
        self.with_reader("find_pipelines", |connection| {
            let mut statement = connection.prepare(&format!(
                "
SELECT {PIPELINE_COLUMNS} FROM pipelines
WHERE (?1 IS NULL OR id = ?1)
  AND (?2 IS NULL OR status IN (SELECT value FROM json_each(?2)))
ORDER BY id
"
            ))?;
            let rows = statement.query_map(
                params![
                    find.id.map(|id| id.0),
                    status_list_param(find.status_list.as_ref(), PipelineStatus::as_str)
                ],
                pipeline_from_row,
            )?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    fn find_stages(&self, find: &StageFind) -> PersistenceResult<Vec<Stage>> {
        self.with_reader("find_stages", |connection| {
            let mut statement = connection.prepare(
                "
SELECT id, pipeline_id, environment_id, name, position
FROM stages
WHERE (?1 IS NULL OR id = ?1) AND (?2 IS NULL OR pipeline_id = ?2)
ORDER BY pipeline_id, position
",
            )?;
            let rows = statement.query_map(
                params![find.id.map(|id| id.0), find.pipeline_id.map(|id| id.0)],
                |row| {
                    Ok(Stage {
                        id: StageId(row.get(0)?),
                        pipeline_id: PipelineId(row.get(1)?),
                        environment_id: EnvironmentId(row.get(2)?),
                        name: row.get(3)?,
                        position: row.get(4)?,
                    })
                },
            )?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    fn complete_pipeline(
        &self,
        id: PipelineId,
        updater_id: PrincipalId,
    ) -> PersistenceResult<bool> {
        self.with_write_transaction("complete_pipeline", |transaction| {
            let now = now_unix()?;
            let updated = transaction.execute(
                "
UPDATE pipelines SET status = ?2, updater_id = ?3, updated_at_unix = ?4
WHERE id = ?1 AND status = ?5
",
                params![
                    id.0,
                    PipelineStatus::Done.as_str(),
                    updater_id.0,
                    now,
                    PipelineStatus::Open.as_str()
                ],
            )?;
            if updated == 0 {
                return Ok(false);
            }
            transaction.execute(
                "
UPDATE issues SET status = ?2, updater_id = ?3, updated_at_unix = ?4
WHERE pipeline_id = ?1 AND status = ?5
",
                params![
                    id.0,
                    IssueStatus::Done.as_str(),
                    updater_id.0,
                    now,
                    IssueStatus::Open.as_str()
                ],
            )?;
            Ok(true)
        })
    }
}

impl TaskStore for SqliteStore {
    fn find_tasks(&self, find: &TaskFind) -> PersistenceResult<Vec<Task>> {
        self.with_reader("find_tasks", |connection| {
            Ok(query_tasks(connection, find)?)
        })
    }

    fn patch_task_status(&self, patch: &TaskStatusPatch) -> PersistenceResult<Task> {
        self.with_write_transaction("patch_task_status", |transaction| {
            let task = load_task(transaction, patch.id)?;
            let from = task.status;
            let to = patch.status;
            let next_attempt = from == TaskStatus::Running && to == TaskStatus::Running;
            if !next_attempt && !from.can_transition_to(to) {
                return Err(invalid_transition(format!(
                    "task {} cannot move from {} to {}",
                    task.id,
                    from.as_str(),
                    to.as_str()
                ))
                .into());
            }

            let starts_work = next_attempt
                || matches!(
                    (from, to),
                    (TaskStatus::Pending, TaskStatus::Running)
                        | (TaskStatus::Failed, TaskStatus::Pending)
                );
            if starts_work {
                let pipeline = load_pipeline(transaction, task.pipeline_id)?;
                if pipeline.status != PipelineStatus::Open {
                    return Err(invalid_transition(format!(
                        "task {} cannot move to {}: pipeline {} is {}",
                        task.id,
                        to.as_str(),
                        pipeline.id,
                        pipeline.status.as_str()
                    ))
                    .into());
                }
            }

            let now = now_unix()?;
            transaction.execute(
                "UPDATE tasks SET status = ?2, updater_id = ?3, updated_at_unix = ?4 WHERE id = ?1",
                params![task.id.0, to.as_str(), patch.updater_id.0, now],
            )?;

            let closing = match (from, to) {
                (TaskStatus::Running, TaskStatus::Running) => Some(TaskRunStatus::Failed),
                (TaskStatus::Running, next) => TaskRunStatus::closing(next),
                _ => None,
            };
            if let Some(run_status) = closing {
                let result = patch
                    .result
                    .as_ref()
                    .map(serde_json::Value::to_string);
                transaction.execute(
                    "
UPDATE task_runs SET status = ?2, comment = ?3, result = ?4, ended_at_unix = ?5
WHERE task_id = ?1 AND status = ?6
",
                    params![
                        task.id.0,
                        run_status.as_str(),
                        patch.comment.as_deref().unwrap_or_default(),
                        result,
                        now,
                        TaskRunStatus::Running.as_str()
                    ],
                )?;
            }

            if to == TaskStatus::Running {
                let opening_comment = if next_attempt {
                    ""
                } else {
                    patch.comment.as_deref().unwrap_or_default()
                };
                transaction.execute(
                    "
INSERT INTO task_runs (task_id, name, status, comment, creator_id, started_at_unix)
VALUES (?1, ?2, ?3, ?4, ?5, ?6)
",
                    params![
                        task.id.0,
                        format!("{} {}", task.name, now),
                        TaskRunStatus::Running.as_str(),
                        opening_comment,
                        patch.updater_id.0,
                        now
                    ],
                )?;
            }

            load_task(transaction, task.id)
        })
    }
}

impl TaskRunStore for SqliteStore {
    fn find_task_runs(&self, find: &TaskRunFind) -> PersistenceResult<Vec<TaskRun>> {
        self.with_reader("find_task_runs", |connection| {
            let mut statement = connection.prepare(&format!(
                "
SELECT {TASK_RUN_COLUMNS} FROM task_runs
WHERE (?1 IS NULL OR task_id = ?1)
  AND (?2 IS NULL OR status IN (SELECT value FROM json_each(?2)))
ORDER BY id
"
            ))?;
            let rows = statement.query_map(
                params![
                    find.task_id.map(|id| id.0),
                    status_list_param(find.status_list.as_ref(), TaskRunStatus::as_str)
                ],
                task_run_from_row,
            )?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }
}

fn invalid_transition(message: String) -> CoreError {
    CoreError::new(CoreErrorKind::InvalidTransition, message)
}

fn query_issues(connection: &Connection, find: &IssueFind) -> rusqlite::Result<Vec<Issue>> {
    let mut statement = connection.prepare(&format!(
        "
SELECT {ISSUE_COLUMNS} FROM issues
WHERE (?1 IS NULL OR id = ?1)
  AND (?2 IS NULL OR pipeline_id = ?2)
  AND (?3 IS NULL OR status IN (SELECT value FROM json_each(?3)))
ORDER BY id
"
    ))?;
    let rows = statement.query_map(
        params![
            find.id.map(|id| id.0),
            find.pipeline_id.map(|id| id.0),
            status_list_param(find.status_list.as_ref(), IssueStatus::as_str)
        ],
        issue_from_row,
    )?;

    let mut subscribers = connection.prepare_cached(
        "SELECT subscriber_id FROM issue_subscribers WHERE issue_id = ?1 ORDER BY subscriber_id",
    )?;
    let mut issues = Vec::new();
    for row in rows {
        let mut issue = row?;
        issue.subscriber_ids = subscribers
            .query_map([issue.id.0], |row| Ok(PrincipalId(row.get(0)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        issues.push(issue);
    }
    Ok(issues)
}

fn load_issue(connection: &Connection, id: IssueId) -> StoreResult<Issue> {
    let find = IssueFind {
        id: Some(id),
        ..IssueFind::default()
    };
    query_issues(connection, &find)?
        .into_iter()
        .next()
        .ok_or_else(|| StoreError::Domain(not_found(format!("issue {id} not found"))))
}

fn issue_from_row(row: &Row<'_>) -> rusqlite::Result<Issue> {
    let status: String = row.get(3)?;
    Ok(Issue {
        id: IssueId(row.get(0)?),
        name: row.get(1)?,
        description: row.get(2)?,
        status: parse_column(&status, "issue status")?,
        pipeline_id: PipelineId(row.get(4)?),
        creator_id: PrincipalId(row.get(5)?),
        updater_id: PrincipalId(row.get(6)?),
        subscriber_ids: Vec::new(),
        created_at: from_unix_seconds(row.get(7)?)?,
        updated_at: from_unix_seconds(row.get(8)?)?,
    })
}

fn load_pipeline(connection: &Connection, id: PipelineId) -> StoreResult<Pipeline> {
    connection
        .query_row(
            &format!("SELECT {PIPELINE_COLUMNS} FROM pipelines WHERE id = ?1"),
            [id.0],
            pipeline_from_row,
        )
        .optional()?
        .ok_or_else(|| StoreError::Domain(not_found(format!("pipeline {id} not found"))))
}

fn pipeline_from_row(row: &Row<'_>) -> rusqlite::Result<Pipeline> {
    let status: String = row.get(2)?;
    Ok(Pipeline {
        id: PipelineId(row.get(0)?),
        name: row.get(1)?,
        status: parse_column(&status, "pipeline status")?,
        creator_id: PrincipalId(row.get(3)?),
        updater_id: PrincipalId(row.get(4)?),
        created_at: from_unix_seconds(row.get(5)?)?,
        updated_at: from_unix_seconds(row.get(6)?)?,
    })
}

pub(crate) fn query_tasks(connection: &Connection, find: &TaskFind) -> rusqlite::Result<Vec<Task>> {
    let mut statement = connection.prepare(&format!(
        "
SELECT {TASK_COLUMNS} FROM tasks
WHERE (?1 IS NULL OR id = ?1)
  AND (?2 IS NULL OR pipeline_id = ?2)
  AND (?3 IS NULL OR stage_id = ?3)
  AND (?4 IS NULL OR status IN (SELECT value FROM json_each(?4)))
  AND (?5 IS NULL OR pipeline_id IN (
      SELECT id FROM pipelines WHERE status IN (SELECT value FROM json_each(?5))
  ))
ORDER BY pipeline_id, stage_id, position, id
"
    ))?;
    let rows = statement.query_map(
        params![
            find.id.map(|id| id.0),
            find.pipeline_id.map(|id| id.0),
            find.stage_id.map(|id| id.0),
            status_list_param(find.status_list.as_ref(), TaskStatus::as_str),
            status_list_param(find.pipeline_status_list.as_ref(), PipelineStatus::as_str)
        ],
        task_from_row,
    )?;

    let mut dependencies = connection.prepare_cached(
        "SELECT depends_on_task_id FROM task_dependencies WHERE task_id = ?1 ORDER BY depends_on_task_id",
    )?;
    let mut tasks = Vec::new();
    for row in rows {
        let mut task = row?;
        task.depends_on = dependencies
            .query_map([task.id.0], |row| Ok(TaskId(row.get(0)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        tasks.push(task);
    }
    Ok(tasks)
}

pub(crate) fn load_task(connection: &Connection, id: TaskId) -> StoreResult<Task> {
    let find = TaskFind {
        id: Some(id),
        ..TaskFind::default()
    };
    query_tasks(connection, &find)?
        .into_iter()
        .next()
        .ok_or_else(|| StoreError::Domain(not_found(format!("task {id} not found"))))
}

fn task_from_row(row: &Row<'_>) -> rusqlite::Result<Task> {
    let task_type_raw: String = row.get(6)?;
    let status_raw: String = row.get(7)?;
    let payload_raw: String = row.get(8)?;
    let task_type: TaskType = parse_column(&task_type_raw, "task type")?;
    let payload = TaskPayload::parse(task_type, &payload_raw)
        .map_err(|error| storage_error_sqlite(&error.message))?;

    Ok(Task {
        id: TaskId(row.get(0)?),
        pipeline_id: PipelineId(row.get(1)?),
        stage_id: StageId(row.get(2)?),
        instance_id: InstanceId(row.get(3)?),
        database_id: row.get::<_, Option<i64>>(4)?.map(DatabaseId),
        name: row.get(5)?,
        task_type,
        status: parse_column(&status_raw, "task status")?,
        payload,
        depends_on: Vec::new(),
        creator_id: PrincipalId(row.get(9)?),
        updater_id: PrincipalId(row.get(10)?),
        created_at: from_unix_seconds(row.get(11)?)?,
        updated_at: from_unix_seconds(row.get(12)?)?,
    })
}

fn task_run_from_row(row: &Row<'_>) -> rusqlite::Result<TaskRun> {
    let status: String = row.get(3)?;
    let result: Option<String> = row.get(5)?;
    let result = result
        .map(|raw| serde_json::from_str(&raw))
        .transpose()
        .map_err(|error| storage_error_sqlite(&format!("invalid task run result: {error}")))?;
    let ended_at: Option<i64> = row.get(8)?;

    Ok(TaskRun {
        id: TaskRunId(row.get(0)?),
        task_id: TaskId(row.get(1)?),
        name: row.get(2)?,
        status: parse_column(&status, "task run status")?,
        comment: row.get(4)?,
        result,
        creator_id: PrincipalId(row.get(6)?),
        started_at: from_unix_seconds(row.get(7)?)?,
        ended_at: ended_at.map(from_unix_seconds).transpose()?,
    })
}
