#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SqliteMigration {
    pub version: i64,
    pub name: &'static str,
    pub up_sql: &'static str,
    pub down_sql: &'static str,
}

const MIGRATION_0001: SqliteMigration = SqliteMigration {
    version: 1,
    name: "initial_pipeline_schema",
    up_sql: r#"
CREATE TABLE IF NOT EXISTS pipelines (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    status TEXT NOT NULL,
    creator_id INTEGER NOT NULL,
    updater_id INTEGER NOT NULL,
    created_at_unix INTEGER NOT NULL,
    updated_at_unix INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS issues (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    status TEXT NOT NULL,
    pipeline_id INTEGER NOT NULL UNIQUE REFERENCES pipelines (id),
    creator_id INTEGER NOT NULL,
    updater_id INTEGER NOT NULL,
    created_at_unix INTEGER NOT NULL,
    updated_at_unix INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS issue_subscribers (
    issue_id INTEGER NOT NULL REFERENCES issues (id),
    subscriber_id INTEGER NOT NULL,
    PRIMARY KEY (issue_id, subscriber_id)
);

CREATE TABLE IF NOT EXISTS stages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    pipeline_id INTEGER NOT NULL REFERENCES pipelines (id),
    environment_id INTEGER NOT NULL,
    name TEXT NOT NULL,
    position INTEGER NOT NULL,
    UNIQUE (pipeline_id, position)
);

CREATE TABLE IF NOT EXISTS instances (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    environment_id INTEGER NOT NULL,
    engine TEXT NOT NULL,
    host TEXT NOT NULL,
    port INTEGER,
    username TEXT,
    password TEXT
);

CREATE TABLE IF NOT EXISTS databases (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    instance_id INTEGER NOT NULL REFERENCES instances (id),
    name TEXT NOT NULL,
    created_at_unix INTEGER NOT NULL,
    UNIQUE (instance_id, name)
);

CREATE TABLE IF NOT EXISTS tasks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    pipeline_id INTEGER NOT NULL REFERENCES pipelines (id),
    stage_id INTEGER NOT NULL REFERENCES stages (id),
    instance_id INTEGER NOT NULL REFERENCES instances (id),
    database_id INTEGER REFERENCES databases (id),
    name TEXT NOT NULL,
    task_type TEXT NOT NULL,
    status TEXT NOT NULL,
    payload TEXT NOT NULL,
    position INTEGER NOT NULL,
    creator_id INTEGER NOT NULL,
    updater_id INTEGER NOT NULL,
    created_at_unix INTEGER NOT NULL,
    updated_at_unix INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_tasks_stage_status
    ON tasks (stage_id, status);

CREATE TABLE IF NOT EXISTS task_dependencies (
    task_id INTEGER NOT NULL REFERENCES tasks (id),
    depends_on_task_id INTEGER NOT NULL REFERENCES tasks (id),
    PRIMARY KEY (task_id, depends_on_task_id)
);

CREATE TABLE IF NOT EXISTS task_runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    task_id INTEGER NOT NULL REFERENCES tasks (id),
    name TEXT NOT NULL,
    status TEXT NOT NULL,
    comment TEXT NOT NULL DEFAULT '',
    result TEXT,
    creator_id INTEGER NOT NULL,
    started_at_unix INTEGER NOT NULL,
    ended_at_unix INTEGER
);

CREATE INDEX IF NOT EXISTS idx_task_runs_task
    ON task_runs (task_id, status);
"#,
    down_sql: r#"
DROP INDEX IF EXISTS idx_task_runs_task;
DROP TABLE IF EXISTS task_runs;
DROP TABLE IF EXISTS task_dependencies;
DROP INDEX IF EXISTS idx_tasks_stage_status;
DROP TABLE IF EXISTS tasks;
DROP TABLE IF EXISTS databases;
DROP TABLE IF EXISTS instances;
DROP TABLE IF EXISTS stages;
DROP TABLE IF EXISTS issue_subscribers;
DROP TABLE IF EXISTS issues;
DROP TABLE IF EXISTS pipelines;
"#,
};

const MIGRATION_0002: SqliteMigration = SqliteMigration {
    version: 2,
    name: "add_task_check_runs",
    up_sql: r#"
CREATE TABLE IF NOT EXISTS task_check_runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    task_id INTEGER NOT NULL REFERENCES tasks (id),
    name TEXT NOT NULL,
    status TEXT NOT NULL,
    check_type TEXT NOT NULL,
    comment TEXT NOT NULL DEFAULT '',
    result TEXT,
    creator_id INTEGER NOT NULL,
    updater_id INTEGER NOT NULL,
    created_at_unix INTEGER NOT NULL,
    updated_at_unix INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_task_check_runs_task_type
    ON task_check_runs (task_id, check_type, status);

CREATE UNIQUE INDEX IF NOT EXISTS idx_task_check_runs_running_unique
    ON task_check_runs (task_id, check_type)
    WHERE status = 'running';
"#,
    down_sql: r#"
DROP INDEX IF EXISTS idx_task_check_runs_running_unique;
DROP INDEX IF EXISTS idx_task_check_runs_task_type;
DROP TABLE IF EXISTS task_check_runs;
"#,
};

const MIGRATION_0003: SqliteMigration = SqliteMigration {
    version: 3,
    name: "add_status_indexes",
    up_sql: r#"
CREATE INDEX IF NOT EXISTS idx_pipelines_status
    ON pipelines (status);

CREATE INDEX IF NOT EXISTS idx_tasks_status_pipeline
    ON tasks (status, pipeline_id);

CREATE INDEX IF NOT EXISTS idx_task_check_runs_status
    ON task_check_runs (status);
"#,
    down_sql: r#"
DROP INDEX IF EXISTS idx_task_check_runs_status;
DROP INDEX IF EXISTS idx_tasks_status_pipeline;
DROP INDEX IF EXISTS idx_pipelines_status;
"#,
};

const MIGRATIONS: [SqliteMigration; 3] = [MIGRATION_0001, MIGRATION_0002, MIGRATION_0003];

pub fn migrations() -> &'static [SqliteMigration] {
    &MIGRATIONS
}

pub fn migration(version: i64) -> Option<&'static SqliteMigration> {
    MIGRATIONS.iter().find(|entry| entry.version == version)
}

pub fn current_schema_version() -> i64 {
    MIGRATIONS.last().map(|entry| entry.version).unwrap_or(0)
}
