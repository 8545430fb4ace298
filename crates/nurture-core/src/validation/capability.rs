//! Integration readiness: which external capabilities this installation has.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    EmailDelivery,
    WebhookEgress,
    HttpEgress,
    NotificationChannel,
    TaskTracker,
    WebhookIngress,
    SegmentSync,
}

impl Capability {
    pub const ALL: [Capability; 7] = [
        Capability::EmailDelivery,
        Capability::WebhookEgress,
        Capability::HttpEgress,
        Capability::NotificationChannel,
        Capability::TaskTracker,
        Capability::WebhookIngress,
        Capability::SegmentSync,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Capability::EmailDelivery => "email_delivery",
            Capability::WebhookEgress => "webhook_egress",
            Capability::HttpEgress => "http_egress",
            Capability::NotificationChannel => "notification_channel",
            Capability::TaskTracker => "task_tracker",
            Capability::WebhookIngress => "webhook_ingress",
            Capability::SegmentSync => "segment_sync",
        }
    }

    /// Human readable name used in validation messages.
    pub fn label(self) -> &'static str {
        match self {
            Capability::EmailDelivery => "email delivery",
            Capability::WebhookEgress => "webhook egress",
            Capability::HttpEgress => "outbound HTTP",
            Capability::NotificationChannel => "notification channel",
            Capability::TaskTracker => "task tracker",
            Capability::WebhookIngress => "webhook ingress",
            Capability::SegmentSync => "segment sync",
        }
    }
}

impl FromStr for Capability {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase().replace([' ', '-'], "_");
        Capability::ALL
            .into_iter()
            .find(|capability| capability.as_str() == normalized)
            .ok_or_else(|| format!("Unknown capability: {value}"))
    }
}

/// Capability a node key needs, if any. Node keys look like `action:send_webhook`.
pub fn required_capability(node_key: &str) -> Option<Capability> {
    match node_key {
        "action:send_email" => Some(Capability::EmailDelivery),
        "action:send_webhook" => Some(Capability::WebhookEgress),
        "action:api_call" => Some(Capability::HttpEgress),
        "action:send_notification" => Some(Capability::NotificationChannel),
        "action:create_task" => Some(Capability::TaskTracker),
        "trigger:webhook_received" => Some(Capability::WebhookIngress),
        "trigger:segment_entry" => Some(Capability::SegmentSync),
        _ => None,
    }
}

/// Answers whether the hosting environment can run a node.
pub trait CapabilityProvider: Send + Sync {
    fn is_capability_available(&self, node_key: &str) -> bool;
}

/// Every capability present.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllCapabilities;

impl CapabilityProvider for AllCapabilities {
    fn is_capability_available(&self, _node_key: &str) -> bool {
        true
    }
}

/// A fixed set of capabilities, typically read from configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticCapabilities {
    available: HashSet<Capability>,
}

impl StaticCapabilities {
    pub fn new(available: impl IntoIterator<Item = Capability>) -> Self {
        Self {
            available: available.into_iter().collect(),
        }
    }

    pub fn none() -> Self {
        Self::default()
    }

    pub fn contains(&self, capability: Capability) -> bool {
        self.available.contains(&capability)
    }
}

impl CapabilityProvider for StaticCapabilities {
    fn is_capability_available(&self, node_key: &str) -> bool {
        required_capability(node_key).is_none_or(|capability| self.contains(capability))
    }
}
