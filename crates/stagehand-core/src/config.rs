use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::models::{CoreError, CoreErrorKind};
use crate::orchestration::SchedulerConfig;

#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
pub struct StagehandConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub scheduler: SchedulerSettings,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct SchedulerSettings {
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    /// Upper bound on one executor attempt before the task is failed.
    #[serde(default = "default_task_run_timeout_secs")]
    pub task_run_timeout_secs: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            task_run_timeout_secs: default_task_run_timeout_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct LogConfig {
    /// `EnvFilter` directives used when `RUST_LOG` is unset.
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

fn default_store_path() -> PathBuf {
    PathBuf::from("stagehand.sqlite3")
}

fn default_interval_ms() -> u64 {
    1000
}

fn default_task_run_timeout_secs() -> u64 {
    3600
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl StagehandConfig {
    /// Reads the TOML file at `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, CoreError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|error| {
            CoreError::new(
                CoreErrorKind::InvalidInput,
                format!("failed to read config '{}': {error}", path.display()),
            )
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, CoreError> {
        let config: Self = toml::from_str(content).map_err(|error| {
            CoreError::new(
                CoreErrorKind::ParseFailure,
                format!("invalid config: {error}"),
            )
        })?;
        if config.scheduler.interval_ms == 0 {
            return Err(CoreError::new(
                CoreErrorKind::InvalidInput,
                "scheduler.interval_ms must be greater than zero",
            ));
        }
        if config.scheduler.task_run_timeout_secs == 0 {
            return Err(CoreError::new(
                CoreErrorKind::InvalidInput,
                "scheduler.task_run_timeout_secs must be greater than zero",
            ));
        }
        Ok(config)
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            interval: Duration::from_millis(self.scheduler.interval_ms),
            task_run_timeout: Duration::from_secs(self.scheduler.task_run_timeout_secs),
        }
    }
}
