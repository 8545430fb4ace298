//! Error types for the automation core

use crate::graph::GraphError;
use crate::models::ValidationIssue;
use thiserror::Error;

/// Domain failures surfaced by flow services and the engine facade.
#[derive(Error, Debug)]
pub enum NurtureError {
    #[error("Flow not found: {0}")]
    FlowNotFound(String),

    #[error("Enrollment not found: {0}")]
    EnrollmentNotFound(String),

    #[error("Version conflict: expected version {expected}, stored version is {actual}")]
    VersionConflict { expected: u64, actual: u64 },

    #[error("Activation blocked by {} issue(s)", .issues.len())]
    ActivationBlocked { issues: Vec<ValidationIssue> },

    #[error("Flow is archived: {0}")]
    ArchivedFlow(String),

    #[error("Cannot {action} flow {id} while it is {status}")]
    InvalidTransition {
        id: String,
        status: &'static str,
        action: &'static str,
    },

    #[error("Invalid graph: {0}")]
    InvalidGraph(#[from] GraphError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, NurtureError>;
