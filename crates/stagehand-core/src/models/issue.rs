use std::str::FromStr;
use std::time::SystemTime;

use serde::Deserialize;

use crate::models::{CoreError, IssueId, NewPipeline, PipelineId, PrincipalId, invalid_input};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum IssueStatus {
    Open,
    Done,
    Canceled,
}

impl IssueStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Done => "done",
            Self::Canceled => "canceled",
        }
    }
}

impl FromStr for IssueStatus {
    type Err = CoreError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "open" => Ok(Self::Open),
            "done" => Ok(Self::Done),
            "canceled" => Ok(Self::Canceled),
            other => Err(invalid_input(format!("unknown issue status '{other}'"))),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Issue {
    pub id: IssueId,
    pub name: String,
    pub description: String,
    pub status: IssueStatus,
    pub pipeline_id: PipelineId,
    pub creator_id: PrincipalId,
    pub updater_id: PrincipalId,
    pub subscriber_ids: Vec<PrincipalId>,
    pub created_at: SystemTime,
    pub updated_at: SystemTime,
}

#[derive(Clone, Debug, Eq, PartialEq, Deserialize)]
pub struct NewIssue {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub creator_id: PrincipalId,
    #[serde(default)]
    pub subscriber_ids: Vec<PrincipalId>,
    pub pipeline: NewPipeline,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct IssueFind {
    pub id: Option<IssueId>,
    pub pipeline_id: Option<PipelineId>,
    pub status_list: Option<Vec<IssueStatus>>,
}

