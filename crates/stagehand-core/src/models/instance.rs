use std::str::FromStr;
use std::time::SystemTime;

use crate::models::{CoreError, DatabaseId, EnvironmentId, InstanceId, invalid_input};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum EngineType {
    Sqlite,
}

impl EngineType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sqlite => "sqlite",
        }
    }
}

impl FromStr for EngineType {
    type Err = CoreError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "sqlite" => Ok(Self::Sqlite),
            other => Err(invalid_input(format!("unsupported engine '{other}'"))),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Instance {
    pub id: InstanceId,
    pub name: String,
    pub environment_id: EnvironmentId,
    pub engine: EngineType,
    /// For the SQLite engine this is the data directory holding one file per database.
    pub host: String,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NewInstance {
    pub name: String,
    pub environment_id: EnvironmentId,
    pub engine: EngineType,
    pub host: String,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl NewInstance {
    pub fn sqlite(
        name: impl Into<String>,
        environment_id: EnvironmentId,
        data_dir: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            environment_id,
            engine: EngineType::Sqlite,
            host: data_dir.into(),
            port: None,
            username: None,
            password: None,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Database {
    pub id: DatabaseId,
    pub instance_id: InstanceId,
    pub name: String,
    pub created_at: SystemTime,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NewDatabase {
    pub instance_id: InstanceId,
    pub name: String,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DatabaseFind {
    pub id: Option<DatabaseId>,
    pub instance_id: Option<InstanceId>,
    pub name: Option<String>,
}
