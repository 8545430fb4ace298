use super::node::{FlowNode, NodeConfig, TriggerConfig};
use nurture_storage::time_utils;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Edge handles with routing meaning.
pub const HANDLE_YES: &str = "yes";
pub const HANDLE_NO: &str = "no";
pub const HANDLE_TIMEOUT: &str = "timeout";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowStatus {
    #[default]
    Draft,
    Active,
    Paused,
    Archived,
}

impl FlowStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            FlowStatus::Draft => "draft",
            FlowStatus::Active => "active",
            FlowStatus::Paused => "paused",
            FlowStatus::Archived => "archived",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowEdge {
    pub id: String,
    pub source: String,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_handle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl FlowEdge {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        let source = source.into();
        let target = target.into();
        Self {
            id: format!("{source}->{target}"),
            source,
            target,
            source_handle: None,
            label: None,
        }
    }

    pub fn with_handle(mut self, handle: impl Into<String>) -> Self {
        let handle = handle.into();
        self.id = format!("{}:{}->{}", self.source, handle, self.target);
        self.source_handle = Some(handle);
        self
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowSettings {
    /// Exit enrollments whose user no longer meets the entry criteria.
    #[serde(default = "default_true")]
    pub exit_on_disqualify: bool,
    /// Fallback IANA zone for time-of-day delays and schedules.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
}

impl Default for FlowSettings {
    fn default() -> Self {
        Self {
            exit_on_disqualify: true,
            timezone: None,
        }
    }
}

/// Counters maintained by the engine. Updating them never bumps the flow version.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowMetrics {
    pub enrolled: u64,
    pub active: u64,
    pub completed: u64,
    pub exited: u64,
    pub errored: u64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub variant_assignments: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowDefinition {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub status: FlowStatus,
    /// Incremented on every save; a save carrying a stale version is rejected.
    #[serde(default)]
    pub version: u64,
    #[serde(default)]
    pub nodes: Vec<FlowNode>,
    #[serde(default)]
    pub edges: Vec<FlowEdge>,
    #[serde(default)]
    pub settings: FlowSettings,
    #[serde(default)]
    pub metrics: FlowMetrics,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub updated_at: i64,
}

impl FlowDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        let now = time_utils::now_ms();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            description: String::new(),
            status: FlowStatus::Draft,
            version: 0,
            nodes: Vec::new(),
            edges: Vec::new(),
            settings: FlowSettings::default(),
            metrics: FlowMetrics::default(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn node(&self, id: &str) -> Option<&FlowNode> {
        self.nodes.iter().find(|node| node.id == id)
    }

    pub fn has_node(&self, id: &str) -> bool {
        self.node(id).is_some()
    }

    /// The first trigger node and its config.
    pub fn trigger(&self) -> Option<(&FlowNode, &TriggerConfig)> {
        self.nodes.iter().find_map(|node| match &node.config {
            NodeConfig::Trigger(trigger) => Some((node, trigger)),
            _ => None,
        })
    }

    pub fn outgoing<'a>(&'a self, node_id: &str) -> impl Iterator<Item = &'a FlowEdge> {
        self.edges.iter().filter(move |edge| edge.source == node_id)
    }

    pub fn incoming<'a>(&'a self, node_id: &str) -> impl Iterator<Item = &'a FlowEdge> {
        self.edges.iter().filter(move |edge| edge.target == node_id)
    }

    /// Target of the edge leaving `node_id` through `handle`.
    pub fn target_via(&self, node_id: &str, handle: &str) -> Option<&str> {
        self.outgoing(node_id)
            .find(|edge| edge.source_handle.as_deref() == Some(handle))
            .map(|edge| edge.target.as_str())
    }

    /// Target of the default edge leaving `node_id`.
    ///
    /// Unlabelled edges win; otherwise the first edge that is not a timeout
    /// branch. When several candidates exist the first in edge order is used.
    pub fn default_target(&self, node_id: &str) -> Option<&str> {
        self.outgoing(node_id)
            .find(|edge| edge.source_handle.is_none())
            .or_else(|| {
                self.outgoing(node_id)
                    .find(|edge| edge.source_handle.as_deref() != Some(HANDLE_TIMEOUT))
            })
            .map(|edge| edge.target.as_str())
    }

    /// Zone configured in the flow settings.
    pub fn timezone(&self) -> Option<&str> {
        self.settings.timezone.as_deref()
    }
}
