use serde::{Deserialize, Serialize};

use crate::models::{CoreError, CoreErrorKind, EnvironmentId, TaskType, invalid_input};

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskPayload {
    General,
    DatabaseCreate(DatabaseCreatePayload),
    DatabaseSchemaUpdate(SchemaUpdatePayload),
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct DatabaseCreatePayload {
    pub environment_id: EnvironmentId,
    pub database_name: String,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct SchemaUpdatePayload {
    #[serde(default)]
    pub statement: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vcs_push_event: Option<VcsPushEvent>,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct VcsPushEvent {
    pub repository_url: String,
    #[serde(rename = "ref")]
    pub git_ref: String,
    #[serde(default)]
    pub base_directory: String,
    pub file_commit: FileCommit,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct FileCommit {
    pub id: String,
    #[serde(default)]
    pub title: String,
    pub author_name: String,
    /// Repository path of the migration file this commit added.
    pub added: String,
}

impl TaskPayload {
    pub fn task_type(&self) -> TaskType {
        match self {
            Self::General => TaskType::General,
            Self::DatabaseCreate(_) => TaskType::DatabaseCreate,
            Self::DatabaseSchemaUpdate(_) => TaskType::DatabaseSchemaUpdate,
        }
    }

    pub fn parse(task_type: TaskType, raw: &str) -> Result<Self, CoreError> {
        let payload: Self = serde_json::from_str(raw).map_err(|error| {
            CoreError::new(
                CoreErrorKind::ParseFailure,
                format!("invalid {} payload: {error}", task_type.as_str()),
            )
        })?;
        if payload.task_type() != task_type {
            return Err(invalid_input(format!(
                "payload of type '{}' does not match task type '{}'",
                payload.task_type().as_str(),
                task_type.as_str()
            )));
        }
        Ok(payload)
    }

    pub fn to_json(&self) -> Result<String, CoreError> {
        serde_json::to_string(self).map_err(|error| {
            CoreError::new(
                CoreErrorKind::Internal,
                format!("failed to encode task payload: {error}"),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_update_payload_accepts_missing_statement() {
        let payload = TaskPayload::parse(
            TaskType::DatabaseSchemaUpdate,
            r#"{"type":"database_schema_update"}"#,
        )
        .unwrap();
        assert_eq!(
            payload,
            TaskPayload::DatabaseSchemaUpdate(SchemaUpdatePayload::default())
        );
    }

    #[test]
    fn payload_type_must_match_task_type() {
        let error = TaskPayload::parse(TaskType::DatabaseCreate, r#"{"type":"general"}"#)
            .unwrap_err();
        assert_eq!(error.kind, CoreErrorKind::InvalidInput);
    }

    #[test]
    fn vcs_event_uses_ref_key() {
        let raw = r#"{
            "type": "database_schema_update",
            "statement": "CREATE TABLE t (id INTEGER);",
            "vcs_push_event": {
                "repository_url": "https://git.example.com/db.git",
                "ref": "refs/heads/main",
                "file_commit": {
                    "id": "abc123",
                    "author_name": "dana",
                    "added": "migrations/0002__add_t__migrate.sql"
                }
            }
        }"#;
        let TaskPayload::DatabaseSchemaUpdate(update) =
            TaskPayload::parse(TaskType::DatabaseSchemaUpdate, raw).unwrap()
        else {
            panic!("expected schema update payload");
        };
        let event = update.vcs_push_event.unwrap();
        assert_eq!(event.git_ref, "refs/heads/main");
        assert_eq!(event.file_commit.author_name, "dana");
    }
}
