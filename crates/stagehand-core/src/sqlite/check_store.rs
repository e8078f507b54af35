use rusqlite::{Connection, Row, params};

use crate::models::{
    CheckRunLookup, NewTaskCheckRun, PrincipalId, TaskCheckResult, TaskCheckRun,
    TaskCheckRunFind, TaskCheckRunId, TaskCheckRunStatus, TaskCheckRunStatusPatch, TaskCheckType,
    TaskId, internal_error, not_found,
};
use crate::persistence::{PersistenceResult, TaskCheckRunStore};
use crate::sqlite::store::{
    SqliteStore, StoreError, StoreResult, from_unix_seconds, is_unique_violation, now_unix,
    parse_column, status_list_param, storage_error_sqlite,
};

const CHECK_RUN_COLUMNS: &str = "id, task_id, name, status, check_type, comment, result, creator_id, updater_id, created_at_unix, updated_at_unix";

impl TaskCheckRunStore for SqliteStore {
    fn create_task_check_run_if_needed(
        &self,
        create: &NewTaskCheckRun,
    ) -> PersistenceResult<(TaskCheckRun, CheckRunLookup)> {
        self.with_write_transaction("create_task_check_run_if_needed", |transaction| {
            let task_exists: bool = transaction.query_row(
                "SELECT EXISTS (SELECT 1 FROM tasks WHERE id = ?1)",
                [create.task_id.0],
                |row| row.get(0),
            )?;
            if !task_exists {
                return Err(not_found(format!("task {} not found", create.task_id)).into());
            }

            if create.skip_if_done {
                let done = runs_with_status(
                    transaction,
                    create.task_id,
                    create.check_type,
                    TaskCheckRunStatus::Done,
                )?;
                if let Some(latest) = done.into_iter().last() {
                    return Ok((latest, CheckRunLookup::ReusedDone));
                }
            }

            if let Some(lookup) = reuse_running(transaction, create.task_id, create.check_type)? {
                return Ok(lookup);
            }

            let now = now_unix()?;
            let inserted = transaction.execute(
                "
INSERT INTO task_check_runs (
    task_id, name, status, check_type, comment, creator_id, updater_id,
    created_at_unix, updated_at_unix
) VALUES (?1, ?2, ?3, ?4, '', ?5, ?5, ?6, ?6)
",
                params![
                    create.task_id.0,
                    create.name,
                    TaskCheckRunStatus::Running.as_str(),
                    create.check_type.as_str(),
                    create.creator_id.0,
                    now
                ],
            );

            match inserted {
                Ok(_) => {
                    let id = TaskCheckRunId(transaction.last_insert_rowid());
                    Ok((load_check_run(transaction, id)?, CheckRunLookup::Created))
                }
                // The partial unique index caught a Running row this
                // transaction did not see; hand that row back instead.
                Err(error) if is_unique_violation(&error) => {
                    reuse_running(transaction, create.task_id, create.check_type)?
                        .ok_or(StoreError::Sqlite(error))
                }
                Err(error) => Err(error.into()),
            }
        })
    }

    fn find_task_check_runs(
        &self,
        find: &TaskCheckRunFind,
    ) -> PersistenceResult<Vec<TaskCheckRun>> {
        self.with_reader("find_task_check_runs", |connection| {
            Ok(query_check_runs(connection, find)?)
        })
    }

    fn patch_task_check_run_status(
        &self,
        patch: &TaskCheckRunStatusPatch,
    ) -> PersistenceResult<TaskCheckRun> {
        self.with_write_transaction("patch_task_check_run_status", |transaction| {
            let result = patch
                .result
                .as_ref()
                .map(serde_json::to_string)
                .transpose()
                .map_err(|error| {
                    internal_error(format!("failed to encode task check result: {error}"))
                })?;
            let updated = transaction.execute(
                "
UPDATE task_check_runs
SET status = ?2, comment = ?3, result = ?4, updater_id = ?5, updated_at_unix = ?6
WHERE id = ?1
",
                params![
                    patch.id.0,
                    patch.status.as_str(),
                    patch.comment,
                    result,
                    patch.updater_id.0,
                    now_unix()?
                ],
            )?;
            if updated == 0 {
                return Err(not_found(format!("task check run {} not found", patch.id)).into());
            }
            load_check_run(transaction, patch.id)
        })
    }
}

fn reuse_running(
    connection: &Connection,
    task_id: TaskId,
    check_type: TaskCheckType,
) -> StoreResult<Option<(TaskCheckRun, CheckRunLookup)>> {
    let running = runs_with_status(connection, task_id, check_type, TaskCheckRunStatus::Running)?;
    let count = running.len();
    Ok(running
        .into_iter()
        .next()
        .map(|first| (first, CheckRunLookup::ReusedRunning { running: count })))
}

fn runs_with_status(
    connection: &Connection,
    task_id: TaskId,
    check_type: TaskCheckType,
    status: TaskCheckRunStatus,
) -> rusqlite::Result<Vec<TaskCheckRun>> {
    query_check_runs(
        connection,
        &TaskCheckRunFind {
            id: None,
            task_id: Some(task_id),
            check_type: Some(check_type),
            status_list: Some(vec![status]),
        },
    )
}

fn query_check_runs(
    connection: &Connection,
    find: &TaskCheckRunFind,
) -> rusqlite::Result<Vec<TaskCheckRun>> {
    let mut statement = connection.prepare(&format!(
        "
SELECT {CHECK_RUN_COLUMNS} FROM task_check_runs
WHERE (?1 IS NULL OR id = ?1)
  AND (?2 IS NULL OR task_id = ?2)
  AND (?3 IS NULL OR check_type = ?3)
  AND (?4 IS NULL OR status IN (SELECT value FROM json_each(?4)))
ORDER BY id
"
    ))?;
    let rows = statement.query_map(
        params![
            find.id.map(|id| id.0),
            find.task_id.map(|id| id.0),
            find.check_type.map(TaskCheckType::as_str),
            status_list_param(find.status_list.as_ref(), TaskCheckRunStatus::as_str)
        ],
        check_run_from_row,
    )?;
    rows.collect()
}

fn load_check_run(connection: &Connection, id: TaskCheckRunId) -> StoreResult<TaskCheckRun> {
    let find = TaskCheckRunFind {
        id: Some(id),
        ..TaskCheckRunFind::default()
    };
    query_check_runs(connection, &find)?
        .into_iter()
        .next()
        .ok_or_else(|| StoreError::Domain(not_found(format!("task check run {id} not found"))))
}

fn check_run_from_row(row: &Row<'_>) -> rusqlite::Result<TaskCheckRun> {
    let status: String = row.get(3)?;
    let check_type: String = row.get(4)?;
    let result: Option<String> = row.get(6)?;
    let result = result
        .map(|raw| serde_json::from_str::<TaskCheckResult>(&raw))
        .transpose()
        .map_err(|error| storage_error_sqlite(&format!("invalid task check result: {error}")))?;

    Ok(TaskCheckRun {
        id: TaskCheckRunId(row.get(0)?),
        task_id: TaskId(row.get(1)?),
        name: row.get(2)?,
        status: parse_column(&status, "task check run status")?,
        check_type: parse_column(&check_type, "task check type")?,
        comment: row.get(5)?,
        result,
        creator_id: PrincipalId(row.get(7)?),
        updater_id: PrincipalId(row.get(8)?),
        created_at: from_unix_seconds(row.get(9)?)?,
        updated_at: from_unix_seconds(row.get(10)?)?,
    })
}
