//! Trigger signals and how they match flow triggers.

use super::conditions::{EvaluationContext, evaluate_group};
use super::delay::parse_timestamp;
use crate::models::{EventSnapshot, StoredEvent, TriggerConfig, TriggerKind, UserProfile};
use chrono::{DateTime, Days, NaiveDate};
use chrono_tz::Tz;
use serde_json::{Map, Value, json};

/// Something that may start enrollments.
#[derive(Debug, Clone, PartialEq)]
pub enum TriggerSignal {
    Event(StoredEvent),
    LifecycleChanged {
        user_id: String,
        from: Option<String>,
        to: String,
    },
    SegmentEntered {
        user_id: String,
        segment_id: String,
    },
    WebhookReceived {
        path: String,
        user_id: String,
        payload: Map<String, Value>,
    },
    /// Operator-initiated enrollment into one flow.
    Manual { flow_id: String, user_id: String },
    /// A cron slot of one flow fired for this user.
    Scheduled {
        flow_id: String,
        user_id: String,
        slot: i64,
    },
    /// A user's date property reached one flow's offset on `day` (`YYYY-MM-DD`).
    DateReached {
        flow_id: String,
        user_id: String,
        day: String,
    },
}

impl TriggerSignal {
    pub fn user_id(&self) -> &str {
        match self {
            TriggerSignal::Event(event) => &event.user_id,
            TriggerSignal::LifecycleChanged { user_id, .. }
            | TriggerSignal::SegmentEntered { user_id, .. }
            | TriggerSignal::WebhookReceived { user_id, .. }
            | TriggerSignal::Manual { user_id, .. }
            | TriggerSignal::Scheduled { user_id, .. }
            | TriggerSignal::DateReached { user_id, .. } => user_id,
        }
    }

    pub fn account_id(&self) -> Option<&str> {
        match self {
            TriggerSignal::Event(event) => event.account_id.as_deref(),
            _ => None,
        }
    }

    /// Short name used in logs.
    pub fn name(&self) -> &str {
        match self {
            TriggerSignal::Event(event) => &event.event,
            TriggerSignal::LifecycleChanged { .. } => "lifecycle_changed",
            TriggerSignal::SegmentEntered { .. } => "segment_entered",
            TriggerSignal::WebhookReceived { .. } => "webhook_received",
            TriggerSignal::Manual { .. } => "manual",
            TriggerSignal::Scheduled { .. } => "schedule",
            TriggerSignal::DateReached { .. } => "date_property",
        }
    }

    /// Key of this particular occurrence, for signals that can be delivered
    /// more than once: a replayed event, a re-swept cron slot or day.
    pub fn occurrence_key(&self) -> Option<String> {
        match self {
            TriggerSignal::Event(event) => Some(format!("event:{}", event.message_id)),
            TriggerSignal::Scheduled { slot, .. } => Some(format!("schedule:{slot}")),
            TriggerSignal::DateReached { day, .. } => Some(format!("date:{day}")),
            _ => None,
        }
    }

    /// The signal as an event, stored on the enrollment and visible to rules as `event.*`.
    pub fn snapshot(&self, now: i64) -> EventSnapshot {
        let properties = match self {
            TriggerSignal::Event(event) => return event.snapshot(),
            TriggerSignal::LifecycleChanged { from, to, .. } => {
                json!({"from": from, "to": to})
            }
            TriggerSignal::SegmentEntered { segment_id, .. } => json!({"segmentId": segment_id}),
            TriggerSignal::WebhookReceived { path, payload, .. } => {
                json!({"path": path, "payload": payload})
            }
            TriggerSignal::Manual { .. }
            | TriggerSignal::Scheduled { .. }
            | TriggerSignal::DateReached { .. } => json!({}),
        };
        let properties = match properties {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        EventSnapshot::new(self.name(), properties, now)
    }
}

/// Whether `signal` fires the trigger of flow `flow_id`.
pub fn matches_trigger(kind: &TriggerKind, flow_id: &str, signal: &TriggerSignal) -> bool {
    match (kind, signal) {
        (TriggerKind::EventReceived { event_name }, TriggerSignal::Event(event)) => {
            event.event == *event_name
        }
        (
            TriggerKind::LifecycleChange {
                lifecycle_from,
                lifecycle_to,
            },
            TriggerSignal::LifecycleChanged { from, to, .. },
        ) => {
            let from_ok = lifecycle_from.is_empty()
                || from.as_deref().is_some_and(|f| in_states(f, lifecycle_from));
            from_ok && (lifecycle_to.is_empty() || in_states(to, lifecycle_to))
        }
        (
            TriggerKind::SegmentEntry { segment_id },
            TriggerSignal::SegmentEntered {
                segment_id: entered,
                ..
            },
        ) => segment_id == entered,
        (TriggerKind::WebhookReceived { webhook_path }, TriggerSignal::WebhookReceived { path, .. }) => {
            normalize_path(webhook_path) == normalize_path(path)
        }
        (TriggerKind::Manual, TriggerSignal::Manual { flow_id: target, .. })
        | (TriggerKind::Schedule { .. }, TriggerSignal::Scheduled { flow_id: target, .. })
        | (TriggerKind::DateProperty { .. }, TriggerSignal::DateReached { flow_id: target, .. }) => {
            target == flow_id
        }
        _ => false,
    }
}

/// Whether the trigger's filter accepts the user and triggering event.
pub fn passes_filter(
    trigger: &TriggerConfig,
    user: Option<&UserProfile>,
    event: Option<&EventSnapshot>,
) -> bool {
    trigger
        .filter
        .as_ref()
        .is_none_or(|filter| evaluate_group(filter, &EvaluationContext::new(user, event)))
}

/// Whether a user still satisfies the flow's entry criteria.
///
/// State-based criteria (target lifecycle state, segment membership, trigger
/// filter) are re-evaluated against the current profile. Point-in-time signals
/// such as events and webhooks cannot be lost once received. Unknown users are
/// given the benefit of the doubt.
pub fn still_eligible(
    trigger: &TriggerConfig,
    user: Option<&UserProfile>,
    entry_event: Option<&EventSnapshot>,
) -> bool {
    let Some(user) = user else {
        return true;
    };

    let state_ok = match &trigger.kind {
        TriggerKind::LifecycleChange { lifecycle_to, .. } if !lifecycle_to.is_empty() => user
            .lifecycle_state
            .as_deref()
            .is_some_and(|state| in_states(state, lifecycle_to)),
        TriggerKind::SegmentEntry { segment_id } => user.in_segment(segment_id),
        TriggerKind::Schedule {
            audience_segment: Some(segment_id),
            ..
        } => user.in_segment(segment_id),
        _ => true,
    };

    state_ok && passes_filter(trigger, Some(user), entry_event)
}

/// Whether a user's `property` date shifted by `offset_days` falls on `today` in `tz`.
pub fn date_property_due(
    user: &UserProfile,
    property: &str,
    offset_days: i64,
    today: NaiveDate,
    tz: Tz,
) -> bool {
    let Some(at) = user.properties.get(property).and_then(parse_timestamp) else {
        return false;
    };
    let Some(date) = DateTime::from_timestamp_millis(at).map(|d| d.with_timezone(&tz).date_naive())
    else {
        return false;
    };
    shift_days(date, offset_days) == Some(today)
}

fn shift_days(date: NaiveDate, offset_days: i64) -> Option<NaiveDate> {
    let days = Days::new(offset_days.unsigned_abs());
    if offset_days >= 0 {
        date.checked_add_days(days)
    } else {
        date.checked_sub_days(days)
    }
}

fn in_states(actual: &str, states: &[String]) -> bool {
    states.iter().any(|state| actual.eq_ignore_ascii_case(state))
}

fn normalize_path(path: &str) -> &str {
    path.trim().trim_matches('/')
}
