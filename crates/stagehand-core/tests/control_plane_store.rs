use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use stagehand_core::driver::DriverRegistry;
use stagehand_core::models::{
    CoreErrorKind, DatabaseId, EnvironmentId, InstanceId, IssueFind, IssueStatus, NewDatabase,
    NewInstance, NewIssue, NewPipeline, NewStage, NewTask, PipelineFind, PipelineStatus,
    PrincipalId, SYSTEM_BOT, StageFind, TaskCheckType, TaskFind, TaskId, TaskPayload, TaskRunFind,
    TaskRunStatus, TaskStatus, TaskStatusPatch,
};
use stagehand_core::persistence::{
    InstanceStore, IssueStore, PipelineStore, TaskRunStore, TaskStore,
};
use stagehand_core::service::ControlPlane;
use stagehand_core::sqlite::SqliteStore;

const OPERATOR: PrincipalId = PrincipalId(9);

fn test_dir(test_name: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_nanos();
    let dir = std::env::temp_dir().join(format!("stagehand-{test_name}-{nanos}"));
    std::fs::create_dir_all(dir.join("data")).unwrap();
    dir
}

fn migrated_store(dir: &std::path::Path) -> Arc<SqliteStore> {
    let store = Arc::new(SqliteStore::new(dir.join("control.sqlite3")));
    store.migrate_to_latest().unwrap();
    store
}

fn two_stage_issue(instance_id: InstanceId) -> NewIssue {
    NewIssue {
        name: "rollout".to_string(),
        description: String::new(),
        creator_id: OPERATOR,
        subscriber_ids: vec![OPERATOR, PrincipalId(10), OPERATOR],
        pipeline: NewPipeline {
            name: "rollout pipeline".to_string(),
            stages: vec![
                NewStage {
                    name: "test".to_string(),
                    environment_id: EnvironmentId(1),
                    tasks: vec![
                        NewTask::new("a", instance_id, TaskPayload::General),
                        NewTask::new("b", instance_id, TaskPayload::General).depends_on(0),
                    ],
                },
                NewStage {
                    name: "prod".to_string(),
                    environment_id: EnvironmentId(2),
                    tasks: vec![NewTask::new("c", instance_id, TaskPayload::General)],
                },
            ],
        },
    }
}

#[test]
fn create_issue_stores_the_whole_pipeline() {
    let dir = test_dir("store-create-issue");
    let store = migrated_store(&dir);
    let instance = store
        .create_instance(&NewInstance::sqlite("test", EnvironmentId(1), "/tmp"))
        .unwrap();

    let issue = store.create_issue(&two_stage_issue(instance.id)).unwrap();
    assert_eq!(issue.status, IssueStatus::Open);
    assert_eq!(issue.subscriber_ids, vec![OPERATOR, PrincipalId(10)]);

    let stages = store
        .find_stages(&StageFind {
            id: None,
            pipeline_id: Some(issue.pipeline_id),
        })
        .unwrap();
    assert_eq!(stages.len(), 2);
    assert_eq!(stages[0].name, "test");
    assert_eq!(stages[1].position, 1);

    let tasks = store
        .find_tasks(&TaskFind {
            pipeline_id: Some(issue.pipeline_id),
            ..TaskFind::default()
        })
        .unwrap();
    assert_eq!(tasks.len(), 3);
    assert!(tasks.iter().all(|task| task.status == TaskStatus::Pending));
    assert_eq!(tasks[1].depends_on, vec![tasks[0].id]);
    assert_eq!(tasks[2].stage_id, stages[1].id);
    assert_eq!(tasks[0].creator_id, OPERATOR);

    let _ = std::fs::remove_dir_all(dir);
}

#[test]
fn task_transitions_open_and_close_task_runs() {
    let dir = test_dir("store-transitions");
    let store = migrated_store(&dir);
    let instance = store
        .create_instance(&NewInstance::sqlite("test", EnvironmentId(1), "/tmp"))
        .unwrap();
    let issue = store.create_issue(&two_stage_issue(instance.id)).unwrap();
    let task = store
        .find_tasks(&TaskFind {
            pipeline_id: Some(issue.pipeline_id),
            ..TaskFind::default()
        })
        .unwrap()
        .remove(0);

    let error = store
        .patch_task_status(&TaskStatusPatch::new(task.id, SYSTEM_BOT, TaskStatus::Done))
        .unwrap_err();
    assert_eq!(error.kind, CoreErrorKind::InvalidTransition);

    let running = store
        .patch_task_status(&TaskStatusPatch::new(task.id, SYSTEM_BOT, TaskStatus::Running))
        .unwrap();
    assert_eq!(running.status, TaskStatus::Running);
    assert_eq!(running.updater_id, SYSTEM_BOT);

    let runs = store
        .find_task_runs(&TaskRunFind {
            task_id: Some(task.id),
            status_list: Some(vec![TaskRunStatus::Running]),
        })
        .unwrap();
    assert_eq!(runs.len(), 1);
    assert!(runs[0].ended_at.is_none());

    store
        .patch_task_status(
            &TaskStatusPatch::new(task.id, SYSTEM_BOT, TaskStatus::Done).comment("applied"),
        )
        .unwrap();
    let runs = store
        .find_task_runs(&TaskRunFind {
            task_id: Some(task.id),
            ..TaskRunFind::default()
        })
        .unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, TaskRunStatus::Done);
    assert_eq!(runs[0].comment, "applied");
    assert!(runs[0].ended_at.is_some());

    let error = store
        .patch_task_status(&TaskStatusPatch::new(task.id, SYSTEM_BOT, TaskStatus::Pending))
        .unwrap_err();
    assert_eq!(error.kind, CoreErrorKind::InvalidTransition);

    let _ = std::fs::remove_dir_all(dir);
}

#[test]
fn running_to_running_starts_a_new_attempt() {
    let dir = test_dir("store-next-attempt");
    let store = migrated_store(&dir);
    let instance = store
        .create_instance(&NewInstance::sqlite("test", EnvironmentId(1), "/tmp"))
        .unwrap();
    let issue = store.create_issue(&two_stage_issue(instance.id)).unwrap();
    let task = store
        .find_tasks(&TaskFind {
            pipeline_id: Some(issue.pipeline_id),
            ..TaskFind::default()
        })
        .unwrap()
        .remove(0);

    store
        .patch_task_status(&TaskStatusPatch::new(task.id, SYSTEM_BOT, TaskStatus::Running))
        .unwrap();
    let again = store
        .patch_task_status(
            &TaskStatusPatch::new(task.id, SYSTEM_BOT, TaskStatus::Running)
                .comment("database is locked"),
        )
        .unwrap();
    assert_eq!(again.status, TaskStatus::Running);

    let runs = store
        .find_task_runs(&TaskRunFind {
            task_id: Some(task.id),
            ..TaskRunFind::default()
        })
        .unwrap();
    assert_eq!(runs.len(), 2);
    assert_eq!(runs[0].status, TaskRunStatus::Failed);
    assert_eq!(runs[0].comment, "database is locked");
    assert_eq!(runs[1].status, TaskRunStatus::Running);
    assert_eq!(runs[1].comment, "");

    store.cancel_issue(issue.id, OPERATOR).unwrap();
    let error = store
        .patch_task_status(&TaskStatusPatch::new(task.id, SYSTEM_BOT, TaskStatus::Running))
        .unwrap_err();
    assert_eq!(error.kind, CoreErrorKind::InvalidTransition);

    let _ = std::fs::remove_dir_all(dir);
}

#[test]
fn status_filters_select_matching_rows() {
    let dir = test_dir("store-status-filters");
    let store = migrated_store(&dir);
    let instance = store
        .create_instance(&NewInstance::sqlite("test", EnvironmentId(1), "/tmp"))
        .unwrap();
    let kept = store.create_issue(&two_stage_issue(instance.id)).unwrap();
    let dropped = store.create_issue(&two_stage_issue(instance.id)).unwrap();
    store.cancel_issue(dropped.id, OPERATOR).unwrap();

    let open = store
        .find_issues(&IssueFind {
            status_list: Some(vec![IssueStatus::Open]),
            ..IssueFind::default()
        })
        .unwrap();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].id, kept.id);
    assert_eq!(open[0].subscriber_ids, vec![OPERATOR, PrincipalId(10)]);

    let canceled = store
        .find_pipelines(&PipelineFind {
            id: None,
            status_list: Some(vec![PipelineStatus::Canceled]),
        })
        .unwrap();
    assert_eq!(canceled.len(), 1);
    assert_eq!(canceled[0].id, dropped.pipeline_id);

    let pending_in_open = store
        .find_tasks(&TaskFind {
            status_list: Some(vec![TaskStatus::Pending]),
            pipeline_status_list: Some(vec![PipelineStatus::Open]),
            ..TaskFind::default()
        })
        .unwrap();
    assert_eq!(pending_in_open.len(), 3);
    assert!(
        pending_in_open
            .iter()
            .all(|task| task.pipeline_id == kept.pipeline_id)
    );
    assert_eq!(pending_in_open[1].depends_on, vec![pending_in_open[0].id]);

    let none = store
        .find_tasks(&TaskFind {
            status_list: Some(Vec::new()),
            ..TaskFind::default()
        })
        .unwrap();
    assert!(none.is_empty());

    let _ = std::fs::remove_dir_all(dir);
}

#[test]
fn canceled_pipeline_refuses_to_start_tasks() {
    let dir = test_dir("store-canceled-start");
    let store = migrated_store(&dir);
    let instance = store
        .create_instance(&NewInstance::sqlite("test", EnvironmentId(1), "/tmp"))
        .unwrap();
    let issue = store.create_issue(&two_stage_issue(instance.id)).unwrap();
    let tasks = store
        .find_tasks(&TaskFind {
            pipeline_id: Some(issue.pipeline_id),
            ..TaskFind::default()
        })
        .unwrap();

    store
        .patch_task_status(&TaskStatusPatch::new(tasks[0].id, SYSTEM_BOT, TaskStatus::Running))
        .unwrap();
    store.cancel_issue(issue.id, OPERATOR).unwrap();

    let finished = store
        .patch_task_status(&TaskStatusPatch::new(tasks[0].id, SYSTEM_BOT, TaskStatus::Failed))
        .unwrap();
    assert_eq!(finished.status, TaskStatus::Failed);

    // Retrying needs an open pipeline.
    let error = store
        .patch_task_status(&TaskStatusPatch::new(tasks[0].id, OPERATOR, TaskStatus::Pending))
        .unwrap_err();
    assert_eq!(error.kind, CoreErrorKind::InvalidTransition);

    let _ = std::fs::remove_dir_all(dir);
}

#[test]
fn control_plane_rejects_invalid_issues_without_writing() {
    let dir = test_dir("service-invalid-issue");
    let store = migrated_store(&dir);
    let control = ControlPlane::new(store.clone(), Arc::new(DriverRegistry::with_defaults()));
    let instance = store
        .create_instance(&NewInstance::sqlite("test", EnvironmentId(1), "/tmp"))
        .unwrap();

    let mut forward = two_stage_issue(instance.id);
    forward.pipeline.stages[0].tasks[0].depends_on.push(1);
    let error = control.create_issue(&forward).unwrap_err();
    assert_eq!(error.kind, CoreErrorKind::InvalidInput);

    let unknown = two_stage_issue(InstanceId(404));
    let error = control.create_issue(&unknown).unwrap_err();
    assert_eq!(error.kind, CoreErrorKind::NotFound);

    assert!(store.find_issues(&IssueFind::default()).unwrap().is_empty());

    let _ = std::fs::remove_dir_all(dir);
}

#[test]
fn control_plane_rejects_database_of_another_instance() {
    let dir = test_dir("service-foreign-database");
    let store = migrated_store(&dir);
    let control = ControlPlane::new(store.clone(), Arc::new(DriverRegistry::with_defaults()));
    let staging = store
        .create_instance(&NewInstance::sqlite("staging", EnvironmentId(1), "/tmp"))
        .unwrap();
    let prod = store
        .create_instance(&NewInstance::sqlite("prod", EnvironmentId(2), "/tmp"))
        .unwrap();
    let prod_app = store
        .create_database(&NewDatabase {
            instance_id: prod.id,
            name: "app".to_string(),
        })
        .unwrap();

    let migrate = |database_id| {
        let mut request = two_stage_issue(staging.id);
        request.pipeline.stages[1].tasks = vec![
            NewTask::new(
                "migrate",
                staging.id,
                TaskPayload::DatabaseSchemaUpdate(Default::default()),
            )
            .database(database_id),
        ];
        request
    };

    let error = control.create_issue(&migrate(prod_app.id)).unwrap_err();
    assert_eq!(error.kind, CoreErrorKind::InvalidInput);
    assert!(error.message.contains("belongs to instance"));

    let error = control.create_issue(&migrate(DatabaseId(404))).unwrap_err();
    assert_eq!(error.kind, CoreErrorKind::InvalidInput);

    assert!(store.find_issues(&IssueFind::default()).unwrap().is_empty());

    let _ = std::fs::remove_dir_all(dir);
}

#[test]
fn retry_is_only_for_failed_tasks() {
    let dir = test_dir("service-retry");
    let store = migrated_store(&dir);
    let control = ControlPlane::new(store.clone(), Arc::new(DriverRegistry::with_defaults()));
    let instance = store
        .create_instance(&NewInstance::sqlite("test", EnvironmentId(1), "/tmp"))
        .unwrap();
    let issue = control.create_issue(&two_stage_issue(instance.id)).unwrap();
    let task = store
        .find_tasks(&TaskFind {
            pipeline_id: Some(issue.pipeline_id),
            ..TaskFind::default()
        })
        .unwrap()
        .remove(0);

    let error = control.retry_task(task.id, OPERATOR).unwrap_err();
    assert_eq!(error.kind, CoreErrorKind::InvalidTransition);
    let error = control.retry_task(TaskId(404), OPERATOR).unwrap_err();
    assert_eq!(error.kind, CoreErrorKind::NotFound);

    store
        .patch_task_status(&TaskStatusPatch::new(task.id, SYSTEM_BOT, TaskStatus::Running))
        .unwrap();
    store
        .patch_task_status(&TaskStatusPatch::new(task.id, SYSTEM_BOT, TaskStatus::Failed))
        .unwrap();
    let retried = control.retry_task(task.id, OPERATOR).unwrap();
    assert_eq!(retried.status, TaskStatus::Pending);
    assert_eq!(retried.updater_id, OPERATOR);

    let _ = std::fs::remove_dir_all(dir);
}

#[test]
fn rerun_checks_starts_required_checks() {
    let dir = test_dir("service-rerun-checks");
    let store = migrated_store(&dir);
    let control = ControlPlane::new(store.clone(), Arc::new(DriverRegistry::with_defaults()));
    let instance = store
        .create_instance(&NewInstance::sqlite("test", EnvironmentId(1), "/tmp"))
        .unwrap();
    let database = store
        .create_database(&NewDatabase {
            instance_id: instance.id,
            name: "app".to_string(),
        })
        .unwrap();
    let mut request = two_stage_issue(instance.id);
    request.pipeline.stages[1].tasks = vec![
        NewTask::new(
            "migrate",
            instance.id,
            TaskPayload::DatabaseSchemaUpdate(Default::default()),
        )
        .database(database.id),
    ];
    let issue = control.create_issue(&request).unwrap();
    let tasks = store
        .find_tasks(&TaskFind {
            pipeline_id: Some(issue.pipeline_id),
            ..TaskFind::default()
        })
        .unwrap();

    let general_runs = control.rerun_checks(tasks[0].id, OPERATOR).unwrap();
    assert!(general_runs.is_empty());

    let runs = control.rerun_checks(tasks[2].id, OPERATOR).unwrap();
    let types: Vec<TaskCheckType> = runs.iter().map(|run| run.check_type).collect();
    assert_eq!(
        types,
        vec![TaskCheckType::Connectivity, TaskCheckType::StatementAdvise]
    );
    assert!(runs.iter().all(|run| run.creator_id == OPERATOR));

    let _ = std::fs::remove_dir_all(dir);
}

#[test]
fn setup_migration_needs_a_registered_database() {
    let dir = test_dir("service-setup-migration");
    let store = migrated_store(&dir);
    let drivers = Arc::new(DriverRegistry::with_defaults());
    let control = ControlPlane::new(store.clone(), drivers.clone());
    let instance = store
        .create_instance(&NewInstance::sqlite(
            "test",
            EnvironmentId(1),
            dir.join("data").display().to_string(),
        ))
        .unwrap();

    let error = control.setup_migration(instance.id, "app").unwrap_err();
    assert_eq!(error.kind, CoreErrorKind::NotFound);

    drivers
        .connect(&instance, None)
        .unwrap()
        .create_database("app")
        .unwrap();
    store
        .create_database(&NewDatabase {
            instance_id: instance.id,
            name: "app".to_string(),
        })
        .unwrap();

    assert!(control.setup_migration(instance.id, "app").unwrap());
    assert!(!control.setup_migration(instance.id, "app").unwrap());
    assert!(control.migration_history(instance.id, "app").unwrap().is_empty());

    let _ = std::fs::remove_dir_all(dir);
}

#[test]
fn duplicate_database_is_rejected() {
    let dir = test_dir("store-duplicate-database");
    let store = migrated_store(&dir);
    let instance = store
        .create_instance(&NewInstance::sqlite("test", EnvironmentId(1), "/tmp"))
        .unwrap();
    let database = NewDatabase {
        instance_id: instance.id,
        name: "app".to_string(),
    };

    store.create_database(&database).unwrap();
    let error = store.create_database(&database).unwrap_err();
    assert_eq!(error.kind, CoreErrorKind::InvalidInput);

    let error = store
        .create_database(&NewDatabase {
            instance_id: InstanceId(404),
            name: "app".to_string(),
        })
        .unwrap_err();
    assert_eq!(error.kind, CoreErrorKind::NotFound);

    let _ = std::fs::remove_dir_all(dir);
}

#[test]
fn issue_requests_parse_from_json() {
    let request: NewIssue = serde_json::from_str(
        r#"{
            "name": "add orders",
            "creator_id": 9,
            "pipeline": {
                "name": "rollout",
                "stages": [{
                    "name": "prod",
                    "environment_id": 2,
                    "tasks": [{
                        "name": "migrate",
                        "instance_id": 1,
                        "database_id": 4,
                        "payload": {
                            "type": "database_schema_update",
                            "statement": "CREATE TABLE orders (id INTEGER)"
                        }
                    }]
                }]
            }
        }"#,
    )
    .unwrap();

    assert_eq!(request.creator_id, OPERATOR);
    assert!(request.subscriber_ids.is_empty());
    let task = &request.pipeline.stages[0].tasks[0];
    assert_eq!(task.task_type(), stagehand_core::models::TaskType::DatabaseSchemaUpdate);
    assert!(task.depends_on.is_empty());
}
