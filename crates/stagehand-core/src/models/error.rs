use thiserror::Error;

use crate::models::{TaskId, TaskType};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum CoreErrorKind {
    InvalidInput,
    ParseFailure,
    NotFound,
    InvalidTransition,
    Connection,
    Transient,
    SetupRequired,
    ExecutionFailure,
    MigrationConflict,
    Timeout,
    StorageFailure,
    Internal,
}

#[derive(Clone, Debug, Eq, PartialEq, Error)]
#[error("{kind:?}: {message}")]
pub struct CoreError {
    pub task: Option<TaskId>,
    pub task_type: Option<TaskType>,
    pub kind: CoreErrorKind,
    pub message: String,
}

impl CoreError {
    pub fn new(kind: CoreErrorKind, message: impl Into<String>) -> Self {
        Self {
            task: None,
            task_type: None,
            kind,
            message: message.into(),
        }
    }

    /// Fills in task attribution without overwriting what the origin already set.
    pub fn attribute(self, task: TaskId, task_type: TaskType) -> Self {
        Self {
            task: self.task.or(Some(task)),
            task_type: self.task_type.or(Some(task_type)),
            kind: self.kind,
            message: self.message,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind == CoreErrorKind::Transient
    }
}

pub fn invalid_input(message: impl Into<String>) -> CoreError {
    CoreError::new(CoreErrorKind::InvalidInput, message)
}

pub fn not_found(message: impl Into<String>) -> CoreError {
    CoreError::new(CoreErrorKind::NotFound, message)
}

pub fn internal_error(message: impl Into<String>) -> CoreError {
    CoreError::new(CoreErrorKind::Internal, message)
}
