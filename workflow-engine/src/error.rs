//! Error taxonomy for the phase engine
//!
//! Every failure maps onto one of four kinds. `NotFound`, `Conflict` and
//! `Invalid` are recoverable and carry the lists a caller needs to retry
//! correctly; `StorageFailure` means the state document could not be written
//! (the previously committed document is left untouched).

use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Coarse classification of an [`EngineError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    Conflict,
    Invalid,
    StorageFailure,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("workflow '{id}' not found (available: {})", list(.available))]
    WorkflowNotFound { id: String, available: Vec<String> },

    #[error("phase '{phase}' is not available in workflow '{workflow_id}' (valid phases: {})", list(.valid))]
    PhaseNotFound {
        workflow_id: String,
        phase: String,
        valid: Vec<String>,
    },

    #[error("task '{0}' has no workflow state")]
    TaskNotFound(String),

    #[error("task '{task_id}' has no workflow assigned (available: {})", list(.available))]
    NoWorkflowAssigned {
        task_id: String,
        available: Vec<String>,
    },

    #[error("task '{task_id}' already uses workflow '{current}'; pass force to switch to '{requested}'")]
    WorkflowConflict {
        task_id: String,
        current: String,
        requested: String,
    },

    #[error("phase '{phase}' of task '{task_id}' is already completed; pass force to re-run it (next: {})", .next.as_deref().unwrap_or("workflow complete"))]
    PhaseAlreadyCompleted {
        task_id: String,
        phase: String,
        next: Option<String>,
    },

    #[error("invalid definition {}: {reason}", .path.display())]
    InvalidDefinition { path: PathBuf, reason: String },

    #[error("context content for phase '{phase}' must not be empty")]
    EmptyContext { phase: String },

    #[error("invalid task id '{task_id}': {reason}")]
    InvalidTaskId { task_id: String, reason: String },

    #[error("artifact key for phase '{phase}' must not be empty")]
    EmptyArtifactKey { phase: String },

    #[error("state storage failure at {}: {context}", .path.display())]
    Storage {
        path: PathBuf,
        context: String,
        #[source]
        source: std::io::Error,
    },
}

fn list(items: &[String]) -> String {
    if items.is_empty() {
        "none".to_string()
    } else {
        items.join(", ")
    }
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::WorkflowNotFound { .. }
            | EngineError::PhaseNotFound { .. }
            | EngineError::TaskNotFound(_)
            | EngineError::NoWorkflowAssigned { .. } => ErrorKind::NotFound,
            EngineError::WorkflowConflict { .. } | EngineError::PhaseAlreadyCompleted { .. } => {
                ErrorKind::Conflict
            }
            EngineError::InvalidDefinition { .. }
            | EngineError::EmptyContext { .. }
            | EngineError::InvalidTaskId { .. }
            | EngineError::EmptyArtifactKey { .. } => ErrorKind::Invalid,
            EngineError::Storage { .. } => ErrorKind::StorageFailure,
        }
    }

    pub fn is_recoverable(&self) -> bool {
        self.kind() != ErrorKind::StorageFailure
    }

    pub(crate) fn storage(
        path: impl Into<PathBuf>,
        context: impl Into<String>,
        source: std::io::Error,
    ) -> Self {
        EngineError::Storage {
            path: path.into(),
            context: context.into(),
            source,
        }
    }

    pub(crate) fn invalid_definition(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        EngineError::InvalidDefinition {
            path: path.into(),
            reason: reason.into(),
        }
    }
}
