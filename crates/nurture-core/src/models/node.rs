use super::condition::ConditionGroup;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Trigger,
    Action,
    Condition,
    Delay,
    Split,
    Filter,
    Goto,
    Exit,
}

impl NodeType {
    pub fn as_str(self) -> &'static str {
        match self {
            NodeType::Trigger => "trigger",
            NodeType::Action => "action",
            NodeType::Condition => "condition",
            NodeType::Delay => "delay",
            NodeType::Split => "split",
            NodeType::Filter => "filter",
            NodeType::Goto => "goto",
            NodeType::Exit => "exit",
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NodePosition {
    pub x: f64,
    pub y: f64,
}

/// A node in a flow graph. The type tag and its config always travel together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowNode {
    pub id: String,
    #[serde(default)]
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<NodePosition>,
    #[serde(flatten)]
    pub config: NodeConfig,
}

impl FlowNode {
    pub fn new(id: impl Into<String>, label: impl Into<String>, config: NodeConfig) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            position: None,
            config,
        }
    }

    pub fn node_type(&self) -> NodeType {
        self.config.node_type()
    }

    pub fn is_trigger(&self) -> bool {
        matches!(self.config, NodeConfig::Trigger(_))
    }

    /// Key used to look up the external capability a node needs,
    /// e.g. `action:send_webhook` or `trigger:segment_entry`.
    pub fn capability_key(&self) -> String {
        match &self.config {
            NodeConfig::Trigger(trigger) => format!("trigger:{}", trigger.kind.as_str()),
            NodeConfig::Action(action) => format!("action:{}", action.kind().as_str()),
            NodeConfig::Delay(delay) => format!("delay:{}", delay.as_str()),
            other => other.node_type().as_str().to_string(),
        }
    }
}

/// Type-specific node configuration, serialized as `{"type": ..., "config": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "config", rename_all = "snake_case")]
pub enum NodeConfig {
    Trigger(TriggerConfig),
    Action(ActionConfig),
    Condition(ConditionGroup),
    Delay(DelayConfig),
    Split(SplitConfig),
    Filter(ConditionGroup),
    Goto(GotoConfig),
    Exit(ExitConfig),
}

impl NodeConfig {
    pub fn node_type(&self) -> NodeType {
        match self {
            NodeConfig::Trigger(_) => NodeType::Trigger,
            NodeConfig::Action(_) => NodeType::Action,
            NodeConfig::Condition(_) => NodeType::Condition,
            NodeConfig::Delay(_) => NodeType::Delay,
            NodeConfig::Split(_) => NodeType::Split,
            NodeConfig::Filter(_) => NodeType::Filter,
            NodeConfig::Goto(_) => NodeType::Goto,
            NodeConfig::Exit(_) => NodeType::Exit,
        }
    }

    /// Starting configuration for a freshly placed node.
    pub fn default_for(node_type: NodeType) -> Self {
        match node_type {
            NodeType::Trigger => NodeConfig::Trigger(TriggerConfig::new(TriggerKind::Manual)),
            NodeType::Action => NodeConfig::Action(ActionConfig::SendEmail {
                template_id: String::new(),
                subject: None,
                from_name: None,
            }),
            NodeType::Condition => NodeConfig::Condition(ConditionGroup::default()),
            NodeType::Delay => NodeConfig::Delay(DelayConfig::FixedDuration {
                duration_minutes: 60,
            }),
            NodeType::Split => NodeConfig::Split(SplitConfig::even(&["a", "b"])),
            NodeType::Filter => NodeConfig::Filter(ConditionGroup::default()),
            NodeType::Goto => NodeConfig::Goto(GotoConfig {
                target_node_id: String::new(),
                max_loops: 1,
            }),
            NodeType::Exit => NodeConfig::Exit(ExitConfig::default()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerConfig {
    #[serde(flatten)]
    pub kind: TriggerKind,
    #[serde(default)]
    pub allow_re_entry: bool,
    #[serde(default)]
    pub re_entry_cooldown_minutes: u64,
    /// Extra entry criteria evaluated against the user and triggering event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<ConditionGroup>,
}

impl TriggerConfig {
    pub fn new(kind: TriggerKind) -> Self {
        Self {
            kind,
            allow_re_entry: false,
            re_entry_cooldown_minutes: 0,
            filter: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum TriggerKind {
    /// Fires when a user's lifecycle state moves into one of `lifecycle_to`.
    /// Empty lists match any state.
    LifecycleChange {
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        lifecycle_from: Vec<String>,
        #[serde(default)]
        lifecycle_to: Vec<String>,
    },
    EventReceived {
        event_name: String,
    },
    Schedule {
        cron_expression: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timezone: Option<String>,
        /// Segment whose members are enrolled on each fire; all known users when absent.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        audience_segment: Option<String>,
    },
    Manual,
    SegmentEntry {
        segment_id: String,
    },
    WebhookReceived {
        webhook_path: String,
    },
    DateProperty {
        date_property: String,
        #[serde(default, alias = "dateOffsetDays")]
        offset_days: i64,
    },
}

impl TriggerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerKind::LifecycleChange { .. } => "lifecycle_change",
            TriggerKind::EventReceived { .. } => "event_received",
            TriggerKind::Schedule { .. } => "schedule",
            TriggerKind::Manual => "manual",
            TriggerKind::SegmentEntry { .. } => "segment_entry",
            TriggerKind::WebhookReceived { .. } => "webhook_received",
            TriggerKind::DateProperty { .. } => "date_property",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    SendEmail,
    SendWebhook,
    AddTag,
    RemoveTag,
    UpdateUser,
    SetVariable,
    ApiCall,
    CreateTask,
    SendNotification,
}

impl ActionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ActionKind::SendEmail => "send_email",
            ActionKind::SendWebhook => "send_webhook",
            ActionKind::AddTag => "add_tag",
            ActionKind::RemoveTag => "remove_tag",
            ActionKind::UpdateUser => "update_user",
            ActionKind::SetVariable => "set_variable",
            ActionKind::ApiCall => "api_call",
            ActionKind::CreateTask => "create_task",
            ActionKind::SendNotification => "send_notification",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_http_method() -> String {
    "POST".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ActionConfig {
    SendEmail {
        template_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        subject: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from_name: Option<String>,
    },
    SendWebhook {
        url: String,
        #[serde(default = "default_http_method")]
        method: String,
        #[serde(default)]
        headers: BTreeMap<String, String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },
    AddTag {
        tag: String,
    },
    RemoveTag {
        tag: String,
    },
    UpdateUser {
        properties: Map<String, Value>,
    },
    SetVariable {
        name: String,
        value: Value,
    },
    ApiCall {
        url: String,
        #[serde(default = "default_http_method")]
        method: String,
        #[serde(default)]
        headers: BTreeMap<String, String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        body: Option<Value>,
        /// Flow variable that receives the dispatcher output.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        save_response_as: Option<String>,
    },
    CreateTask {
        title: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        assignee: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        due_in_days: Option<u32>,
    },
    SendNotification {
        channel: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
        message: String,
    },
}

impl ActionConfig {
    pub fn kind(&self) -> ActionKind {
        match self {
            ActionConfig::SendEmail { .. } => ActionKind::SendEmail,
            ActionConfig::SendWebhook { .. } => ActionKind::SendWebhook,
            ActionConfig::AddTag { .. } => ActionKind::AddTag,
            ActionConfig::RemoveTag { .. } => ActionKind::RemoveTag,
            ActionConfig::UpdateUser { .. } => ActionKind::UpdateUser,
            ActionConfig::SetVariable { .. } => ActionKind::SetVariable,
            ActionConfig::ApiCall { .. } => ActionKind::ApiCall,
            ActionConfig::CreateTask { .. } => ActionKind::CreateTask,
            ActionConfig::SendNotification { .. } => ActionKind::SendNotification,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum DelayConfig {
    FixedDuration {
        duration_minutes: u64,
    },
    UntilEvent {
        wait_for_event: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_minutes: Option<u64>,
    },
    UntilDate {
        /// RFC 3339 timestamp or `YYYY-MM-DD`.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        until_date: Option<String>,
        /// User property holding the date, used when `until_date` is absent.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        date_property: Option<String>,
    },
    UntilTimeOfDay {
        /// Local wall-clock time, `HH:MM`.
        time_of_day: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timezone: Option<String>,
        /// Allowed weekdays (`mon`, `tuesday`, ...); any day when empty.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        days_of_week: Vec<String>,
    },
    SmartSendTime {
        window_start_hour: u32,
        window_end_hour: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timezone: Option<String>,
        /// User property holding the hour (0-23) the user tends to engage.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        preferred_hour_property: Option<String>,
    },
}

impl DelayConfig {
    pub fn as_str(&self) -> &'static str {
        match self {
            DelayConfig::FixedDuration { .. } => "fixed_duration",
            DelayConfig::UntilEvent { .. } => "until_event",
            DelayConfig::UntilDate { .. } => "until_date",
            DelayConfig::UntilTimeOfDay { .. } => "until_time_of_day",
            DelayConfig::SmartSendTime { .. } => "smart_send_time",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SplitVariant {
    pub id: String,
    #[serde(default)]
    pub label: String,
    pub percentage: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SplitConfig {
    pub variants: Vec<SplitVariant>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub winner_metric: Option<String>,
    /// Hours after which a winner would be picked. Stored for the editor only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_pick_after: Option<u32>,
}

impl SplitConfig {
    /// Variants sharing 100% as evenly as possible; earlier variants absorb the remainder.
    pub fn even(ids: &[&str]) -> Self {
        let mut config = Self {
            variants: ids
                .iter()
                .map(|id| SplitVariant {
                    id: (*id).to_string(),
                    label: format!("Variant {}", id.to_uppercase()),
                    percentage: 0,
                })
                .collect(),
            winner_metric: None,
            auto_pick_after: None,
        };
        config.rebalance();
        config
    }

    /// Sum of variant percentages, widened so oversized values can't overflow.
    pub fn total_percentage(&self) -> u64 {
        self.variants.iter().map(|v| u64::from(v.percentage)).sum()
    }

    pub fn rebalance(&mut self) {
        let count = self.variants.len() as u32;
        if count == 0 {
            return;
        }
        let share = 100 / count;
        let remainder = 100 % count;
        for (index, variant) in self.variants.iter_mut().enumerate() {
            variant.percentage = share + u32::from((index as u32) < remainder);
        }
    }
}

/// Edge handle used by split nodes for a variant.
pub fn variant_handle(variant_id: &str) -> String {
    format!("variant-{variant_id}")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GotoConfig {
    pub target_node_id: String,
    pub max_loops: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExitConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}
