use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, anyhow, bail};
use stagehand_core::config::StagehandConfig;
use stagehand_core::driver::DriverRegistry;
use stagehand_core::models::{
    EnvironmentId, InstanceId, IssueId, NewInstance, NewIssue, SYSTEM_BOT, TaskId,
};
use stagehand_core::orchestration::{Scheduler, ShutdownToken};
use stagehand_core::persistence::{ControlPlaneStore, InstanceStore};
use stagehand_core::service::ControlPlane;
use stagehand_core::sqlite::{SqliteStore, current_schema_version};
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG_PATH: &str = "stagehand.toml";

fn main() -> anyhow::Result<()> {
    let mut args: Vec<String> = std::env::args().skip(1).collect();
    let config_path = take_config_flag(&mut args)?;

    match args.first().map(String::as_str) {
        Some("--version" | "-V") => {
            println!("stagehand {}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        None | Some("--help" | "-h") => {
            print_usage();
            return Ok(());
        }
        Some(_) => {}
    }

    let config = StagehandConfig::load(&config_path)
        .with_context(|| format!("failed to load config '{}'", config_path.display()))?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log.filter)),
        )
        .init();

    let store = Arc::new(SqliteStore::new(config.store.path.clone()));
    execute(&args[0], &args[1..], store, &config)
}

/// Only `migrate-store` changes the store schema; every other command
/// fails on an outdated store and names `migrate-store` in the error.
fn execute(
    command: &str,
    rest: &[String],
    store: Arc<SqliteStore>,
    config: &StagehandConfig,
) -> anyhow::Result<()> {
    match command {
        "migrate-store" => {
            store
                .migrate_to_latest()
                .context("failed to migrate the control-plane store")?;
            info!(
                path = %store.database_path().display(),
                version = current_schema_version(),
                "control-plane store is up to date"
            );
            Ok(())
        }
        "run" => run_scheduler(store, config),
        "add-instance" => {
            let [name, environment_id, data_dir] = expect_args::<3>(command, rest)?;
            let instance = store.create_instance(&NewInstance::sqlite(
                name,
                EnvironmentId(parse_id(environment_id)?),
                data_dir,
            ))?;
            println!("instance {} '{}'", instance.id, instance.name);
            Ok(())
        }
        "create-issue" => {
            let [path] = expect_args::<1>(command, rest)?;
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read issue file '{path}'"))?;
            let request: NewIssue = serde_json::from_str(&raw)
                .with_context(|| format!("invalid issue file '{path}'"))?;
            let issue = control_plane(store).create_issue(&request)?;
            println!("issue {} pipeline {}", issue.id, issue.pipeline_id);
            Ok(())
        }
        "cancel-issue" => {
            let [id] = expect_args::<1>(command, rest)?;
            let issue = control_plane(store).cancel_issue(IssueId(parse_id(id)?), SYSTEM_BOT)?;
            println!("issue {} {}", issue.id, issue.status.as_str());
            Ok(())
        }
        "retry-task" => {
            let [id] = expect_args::<1>(command, rest)?;
            let task = control_plane(store).retry_task(TaskId(parse_id(id)?), SYSTEM_BOT)?;
            println!("task {} {}", task.id, task.status.as_str());
            Ok(())
        }
        "rerun-checks" => {
            let [id] = expect_args::<1>(command, rest)?;
            let runs = control_plane(store).rerun_checks(TaskId(parse_id(id)?), SYSTEM_BOT)?;
            for run in runs {
                println!(
                    "check run {} {} {}",
                    run.id,
                    run.check_type.as_str(),
                    run.status.as_str()
                );
            }
            Ok(())
        }
        "setup-migration" => {
            let [instance_id, database] = expect_args::<2>(command, rest)?;
            let created = control_plane(store)
                .setup_migration(InstanceId(parse_id(instance_id)?), database)?;
            if created {
                println!("created migration schema on '{database}'");
            } else {
                println!("migration schema already present on '{database}'");
            }
            Ok(())
        }
        "migration-history" => {
            let [instance_id, database] = expect_args::<2>(command, rest)?;
            let history = control_plane(store)
                .migration_history(InstanceId(parse_id(instance_id)?), database)?;
            for entry in history {
                println!(
                    "{}\t{}\t{}\t{}\t{}",
                    entry.sequence,
                    entry.version,
                    entry.kind.as_str(),
                    entry.description,
                    entry.creator
                );
            }
            Ok(())
        }
        other => {
            print_usage();
            bail!("unknown command '{other}'")
        }
    }
}

fn run_scheduler(store: Arc<SqliteStore>, config: &StagehandConfig) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start the async runtime")?;

    runtime.block_on(async {
        let shutdown = ShutdownToken::new();
        let signal_token = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("received interrupt; shutting down");
            }
            signal_token.cancel();
        });

        let store: Arc<dyn ControlPlaneStore> = store;
        Scheduler::with_defaults(store, config.scheduler_config())
            .run(shutdown)
            .await;
    });
    Ok(())
}

fn control_plane(store: Arc<SqliteStore>) -> ControlPlane {
    ControlPlane::new(store, Arc::new(DriverRegistry::with_defaults()))
}

fn take_config_flag(args: &mut Vec<String>) -> anyhow::Result<PathBuf> {
    let Some(position) = args.iter().position(|arg| arg == "--config") else {
        return Ok(PathBuf::from(DEFAULT_CONFIG_PATH));
    };
    if position + 1 >= args.len() {
        bail!("--config requires a path");
    }
    let path = args.remove(position + 1);
    args.remove(position);
    Ok(PathBuf::from(path))
}

fn expect_args<'a, const N: usize>(
    command: &str,
    rest: &'a [String],
) -> anyhow::Result<[&'a str; N]> {
    let values: Vec<&str> = rest.iter().map(String::as_str).collect();
    values
        .try_into()
        .map_err(|_| anyhow!("'{command}' expects {N} argument(s); see --help"))
}

fn parse_id(raw: &str) -> anyhow::Result<i64> {
    raw.parse::<i64>()
        .with_context(|| format!("'{raw}' is not a valid id"))
}

fn print_usage() {
    println!("stagehand {}", env!("CARGO_PKG_VERSION"));
    println!("Usage: stagehand [--config PATH] <COMMAND>\n");
    println!("Commands:");
    println!("  run                                      Run the scheduler until interrupted");
    println!("  migrate-store                            Bring the control-plane store schema up to date");
    println!("  add-instance <name> <env-id> <data-dir>  Register a SQLite instance");
    println!("  create-issue <file.json>                 Create an issue and its pipeline");
    println!("  cancel-issue <issue-id>                  Cancel an open issue");
    println!("  retry-task <task-id>                     Send a failed task back to pending");
    println!("  rerun-checks <task-id>                   Start fresh check runs for a task");
    println!("  setup-migration <instance-id> <db>       Create the migration history schema");
    println!("  migration-history <instance-id> <db>     List applied migrations");
    println!("\nOptions:");
    println!("  --config PATH    Config file (default: {DEFAULT_CONFIG_PATH})");
    println!("  -h, --help       Print help");
    println!("  -V, --version    Print version");
}
