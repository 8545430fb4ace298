//! Static analysis of flow graphs.
//!
//! Issues come back as data, ordered by rule: trigger cardinality, exit
//! presence, connectivity, type-specific checks, then integration readiness.

mod capability;

pub use capability::{
    AllCapabilities, Capability, CapabilityProvider, StaticCapabilities, required_capability,
};

use crate::engine::delay::{parse_date_string, parse_time_of_day, parse_timezone, parse_weekday};
use crate::engine::schedule::parse_schedule;
use crate::models::{
    ActionConfig, ConditionGroup, DelayConfig, FlowDefinition, FlowEdge, FlowNode, GotoConfig,
    HANDLE_NO, HANDLE_YES, NodeConfig, SplitConfig, TriggerConfig, TriggerKind, ValidationIssue,
    variant_handle,
};
use std::collections::HashSet;

/// Validate a candidate node and edge set.
pub fn validate_flow(
    nodes: &[FlowNode],
    edges: &[FlowEdge],
    capabilities: Option<&dyn CapabilityProvider>,
) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();

    check_trigger_cardinality(nodes, &mut issues);
    check_exit_presence(nodes, &mut issues);
    check_connectivity(nodes, edges, &mut issues);
    for node in nodes {
        check_node(node, nodes, edges, &mut issues);
    }
    if let Some(capabilities) = capabilities {
        check_integrations(nodes, capabilities, &mut issues);
    }

    issues
}

/// Validate a whole definition, including its settings.
pub fn validate_definition(
    flow: &FlowDefinition,
    capabilities: Option<&dyn CapabilityProvider>,
) -> Vec<ValidationIssue> {
    let mut issues = validate_flow(&flow.nodes, &flow.edges, capabilities);
    if let Some(timezone) = flow.settings.timezone.as_deref()
        && parse_timezone(timezone).is_none()
    {
        issues.push(ValidationIssue::error(
            format!("Flow timezone '{timezone}' is not a known IANA zone"),
            None,
        ));
    }
    issues
}

/// Whether any issue prevents activation.
pub fn has_blocking_issues(issues: &[ValidationIssue]) -> bool {
    issues.iter().any(ValidationIssue::blocks_activation)
}

fn check_trigger_cardinality(nodes: &[FlowNode], issues: &mut Vec<ValidationIssue>) {
    let triggers: Vec<&FlowNode> = nodes.iter().filter(|node| node.is_trigger()).collect();
    match triggers.len() {
        0 => issues.push(ValidationIssue::error("Flow must have a trigger", None)),
        1 => {}
        _ => {
            for extra in &triggers[1..] {
                issues.push(ValidationIssue::error(
                    "Only one trigger allowed",
                    Some(&extra.id),
                ));
            }
        }
    }
}

fn check_exit_presence(nodes: &[FlowNode], issues: &mut Vec<ValidationIssue>) {
    let has_exit = nodes
        .iter()
        .any(|node| matches!(node.config, NodeConfig::Exit(_)));
    if !nodes.is_empty() && !has_exit {
        issues.push(ValidationIssue::warning(
            "Flow has no exit node; enrollments complete when they run out of edges",
            None,
        ));
    }
}

fn check_connectivity(nodes: &[FlowNode], edges: &[FlowEdge], issues: &mut Vec<ValidationIssue>) {
    let mut seen = HashSet::new();
    for node in nodes {
        if !seen.insert(node.id.as_str()) {
            issues.push(ValidationIssue::error(
                format!("Duplicate node id '{}'", node.id),
                Some(&node.id),
            ));
        }
    }

    for edge in edges {
        for end in [&edge.source, &edge.target] {
            if !seen.contains(end.as_str()) {
                issues.push(ValidationIssue::error(
                    format!("Edge '{}' references unknown node '{}'", edge.id, end),
                    None,
                ));
            }
        }
    }

    for node in nodes {
        let has_incoming = edges.iter().any(|edge| edge.target == node.id);
        let has_outgoing = edges.iter().any(|edge| edge.source == node.id);

        if !node.is_trigger() && !has_incoming {
            issues.push(ValidationIssue::error(
                format!("Node '{}' is not connected to the flow", display_name(node)),
                Some(&node.id),
            ));
        }
        // Goto nodes jump by config rather than by edge
        let needs_outgoing = !matches!(node.config, NodeConfig::Exit(_) | NodeConfig::Goto(_));
        if needs_outgoing && !has_outgoing {
            issues.push(ValidationIssue::warning(
                format!(
                    "Node '{}' has no outgoing connection; enrollments complete here",
                    display_name(node)
                ),
                Some(&node.id),
            ));
        }
    }
}

fn check_node(
    node: &FlowNode,
    nodes: &[FlowNode],
    edges: &[FlowEdge],
    issues: &mut Vec<ValidationIssue>,
) {
    let id = Some(node.id.as_str());
    match &node.config {
        NodeConfig::Trigger(trigger) => check_trigger(trigger, id, issues),
        NodeConfig::Action(action) => check_action(action, id, issues),
        NodeConfig::Condition(group) => {
            check_rules(group, id, issues);
            for handle in [HANDLE_YES, HANDLE_NO] {
                let connected = edges.iter().any(|edge| {
                    edge.source == node.id && edge.source_handle.as_deref() == Some(handle)
                });
                if !connected {
                    issues.push(ValidationIssue::warning(
                        format!("Condition has no '{handle}' branch"),
                        id,
                    ));
                }
            }
        }
        NodeConfig::Filter(group) => check_rules(group, id, issues),
        NodeConfig::Delay(delay) => check_delay(delay, id, issues),
        NodeConfig::Split(split) => check_split(node, split, edges, issues),
        NodeConfig::Goto(goto) => check_goto(node, goto, nodes, issues),
        NodeConfig::Exit(_) => {}
    }
}

fn check_trigger(trigger: &TriggerConfig, id: Option<&str>, issues: &mut Vec<ValidationIssue>) {
    match &trigger.kind {
        TriggerKind::EventReceived { event_name } => {
            require(event_name, "Trigger needs an event name", id, issues);
        }
        TriggerKind::Schedule {
            cron_expression,
            timezone,
            ..
        } => {
            if let Err(err) = parse_schedule(cron_expression) {
                issues.push(ValidationIssue::error(
                    format!("Invalid cron expression '{cron_expression}': {err}"),
                    id,
                ));
            }
            check_timezone(timezone.as_deref(), id, issues);
        }
        TriggerKind::SegmentEntry { segment_id } => {
            require(segment_id, "Trigger needs a segment", id, issues);
        }
        TriggerKind::WebhookReceived { webhook_path } => {
            require(webhook_path, "Trigger needs a webhook path", id, issues);
        }
        TriggerKind::DateProperty { date_property, .. } => {
            require(date_property, "Trigger needs a date property", id, issues);
        }
        TriggerKind::LifecycleChange {
            lifecycle_from,
            lifecycle_to,
        } => {
            if lifecycle_to.is_empty() {
                issues.push(ValidationIssue::warning(
                    "Lifecycle trigger has no target states and fires on every change",
                    id,
                ));
            }
            if lifecycle_from.iter().chain(lifecycle_to).any(|s| s.trim().is_empty()) {
                issues.push(ValidationIssue::error("Lifecycle states must not be blank", id));
            }
        }
        TriggerKind::Manual => {}
    }
    if let Some(filter) = &trigger.filter {
        check_rule_values(filter, id, issues);
    }
}

fn check_action(action: &ActionConfig, id: Option<&str>, issues: &mut Vec<ValidationIssue>) {
    match action {
        ActionConfig::SendEmail { template_id, .. } => {
            require(template_id, "Email action needs a template", id, issues)
        }
        ActionConfig::SendWebhook { url, .. } => {
            require(url, "Webhook action needs a URL", id, issues)
        }
        ActionConfig::ApiCall { url, .. } => require(url, "API call needs a URL", id, issues),
        ActionConfig::AddTag { tag } | ActionConfig::RemoveTag { tag } => {
            require(tag, "Tag action needs a tag", id, issues)
        }
        ActionConfig::SetVariable { name, .. } => {
            require(name, "Set variable needs a variable name", id, issues)
        }
        ActionConfig::CreateTask { title, .. } => {
            require(title, "Task action needs a title", id, issues)
        }
        ActionConfig::SendNotification { message, .. } => {
            require(message, "Notification needs a message", id, issues)
        }
        ActionConfig::UpdateUser { properties } => {
            if properties.is_empty() {
                issues.push(ValidationIssue::warning(
                    "Update user action sets no properties",
                    id,
                ));
            }
        }
    }
}

fn check_rules(group: &ConditionGroup, id: Option<&str>, issues: &mut Vec<ValidationIssue>) {
    if group.rules.is_empty() {
        issues.push(ValidationIssue::warning(
            "No rules configured; every user matches",
            id,
        ));
    }
    check_rule_values(group, id, issues);
}

fn check_rule_values(group: &ConditionGroup, id: Option<&str>, issues: &mut Vec<ValidationIssue>) {
    for (index, rule) in group.rules.iter().enumerate() {
        if rule.field.trim().is_empty() {
            issues.push(ValidationIssue::error(
                format!("Rule {} has no field", index + 1),
                id,
            ));
        }
        if rule.operator.requires_value() && rule.value.as_ref().is_none_or(|v| v.is_null()) {
            issues.push(ValidationIssue::error(
                format!("Rule {} on '{}' needs a value", index + 1, rule.field),
                id,
            ));
        }
    }
}

fn check_delay(delay: &DelayConfig, id: Option<&str>, issues: &mut Vec<ValidationIssue>) {
    match delay {
        DelayConfig::FixedDuration { .. } => {}
        DelayConfig::UntilEvent { wait_for_event, .. } => {
            require(wait_for_event, "Delay needs an event to wait for", id, issues);
        }
        DelayConfig::UntilDate {
            until_date,
            date_property,
        } => match (until_date.as_deref(), date_property.as_deref()) {
            (Some(date), _) if parse_date_string(date).is_none() => {
                issues.push(ValidationIssue::error(
                    format!("Invalid date '{date}'"),
                    id,
                ));
            }
            (None, None) => issues.push(ValidationIssue::error(
                "Delay needs a date or a date property",
                id,
            )),
            _ => {}
        },
        DelayConfig::UntilTimeOfDay {
            time_of_day,
            timezone,
            days_of_week,
        } => {
            if parse_time_of_day(time_of_day).is_none() {
                issues.push(ValidationIssue::error(
                    format!("Invalid time of day '{time_of_day}', expected HH:MM"),
                    id,
                ));
            }
            for day in days_of_week {
                if parse_weekday(day).is_none() {
                    issues.push(ValidationIssue::error(
                        format!("Unknown weekday '{day}'"),
                        id,
                    ));
                }
            }
            check_timezone(timezone.as_deref(), id, issues);
        }
        DelayConfig::SmartSendTime {
            window_start_hour,
            window_end_hour,
            timezone,
            ..
        } => {
            if window_start_hour >= window_end_hour || *window_end_hour > 24 {
                issues.push(ValidationIssue::error(
                    format!("Invalid send window {window_start_hour}:00-{window_end_hour}:00"),
                    id,
                ));
            }
            check_timezone(timezone.as_deref(), id, issues);
        }
    }
}

fn check_split(
    node: &FlowNode,
    split: &SplitConfig,
    edges: &[FlowEdge],
    issues: &mut Vec<ValidationIssue>,
) {
    let id = Some(node.id.as_str());
    let total = split.total_percentage();
    if total != 100 {
        issues.push(ValidationIssue::error(
            format!("Split percentages must sum to 100 (currently {total})"),
            id,
        ));
    }

    let mut seen = HashSet::new();
    for variant in &split.variants {
        if !seen.insert(variant.id.as_str()) {
            issues.push(ValidationIssue::error(
                format!("Duplicate split variant '{}'", variant.id),
                id,
            ));
            continue;
        }
        let handle = variant_handle(&variant.id);
        let connected = edges
            .iter()
            .any(|edge| edge.source == node.id && edge.source_handle.as_deref() == Some(&handle));
        if !connected {
            issues.push(ValidationIssue::warning(
                format!("Split variant '{}' has no outgoing connection", variant.id),
                id,
            ));
        }
    }
}

fn check_goto(
    node: &FlowNode,
    goto: &GotoConfig,
    nodes: &[FlowNode],
    issues: &mut Vec<ValidationIssue>,
) {
    let id = Some(node.id.as_str());
    if goto.target_node_id.is_empty() {
        issues.push(ValidationIssue::error("Goto needs a target node", id));
    } else if goto.target_node_id == node.id {
        issues.push(ValidationIssue::error("Goto cannot target itself", id));
    } else if !nodes.iter().any(|n| n.id == goto.target_node_id) {
        issues.push(ValidationIssue::error(
            format!("Goto target '{}' does not exist", goto.target_node_id),
            id,
        ));
    }
    if goto.max_loops == 0 {
        issues.push(ValidationIssue::error("Goto max loops must be at least 1", id));
    }
}

fn check_integrations(
    nodes: &[FlowNode],
    capabilities: &dyn CapabilityProvider,
    issues: &mut Vec<ValidationIssue>,
) {
    for node in nodes {
        let key = node.capability_key();
        if capabilities.is_capability_available(&key) {
            continue;
        }
        let needed = required_capability(&key)
            .map(|capability| capability.label().to_string())
            .unwrap_or_else(|| key.clone());
        issues.push(ValidationIssue::integration(
            format!(
                "Node '{}' requires {} which is not configured",
                display_name(node),
                needed
            ),
            Some(&node.id),
        ));
    }
}

fn check_timezone(timezone: Option<&str>, id: Option<&str>, issues: &mut Vec<ValidationIssue>) {
    if let Some(timezone) = timezone
        && parse_timezone(timezone).is_none()
    {
        issues.push(ValidationIssue::error(
            format!("Unknown timezone '{timezone}'"),
            id,
        ));
    }
}

fn require(value: &str, message: &str, id: Option<&str>, issues: &mut Vec<ValidationIssue>) {
    if value.trim().is_empty() {
        issues.push(ValidationIssue::error(message, id));
    }
}

fn display_name(node: &FlowNode) -> &str {
    if node.label.is_empty() {
        &node.id
    } else {
        &node.label
    }
}
