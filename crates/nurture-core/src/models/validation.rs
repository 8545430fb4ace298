use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationSeverity {
    Error,
    Warning,
    /// The installation lacks a capability a node needs.
    Integration,
}

/// A single finding about a flow graph. Issues are data, never errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationIssue {
    pub severity: ValidationSeverity,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
}

impl ValidationIssue {
    pub fn error(message: impl Into<String>, node_id: Option<&str>) -> Self {
        Self::new(ValidationSeverity::Error, message, node_id)
    }

    pub fn warning(message: impl Into<String>, node_id: Option<&str>) -> Self {
        Self::new(ValidationSeverity::Warning, message, node_id)
    }

    pub fn integration(message: impl Into<String>, node_id: Option<&str>) -> Self {
        Self::new(ValidationSeverity::Integration, message, node_id)
    }

    fn new(severity: ValidationSeverity, message: impl Into<String>, node_id: Option<&str>) -> Self {
        Self {
            severity,
            message: message.into(),
            node_id: node_id.map(str::to_string),
        }
    }

    /// Warnings never block activation.
    pub fn blocks_activation(&self) -> bool {
        !matches!(self.severity, ValidationSeverity::Warning)
    }
}
