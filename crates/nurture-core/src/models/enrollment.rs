use super::event::EventSnapshot;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrollmentStatus {
    Active,
    Completed,
    Exited,
    Error,
}

impl EnrollmentStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, EnrollmentStatus::Active)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EnrollmentStatus::Active => "active",
            EnrollmentStatus::Completed => "completed",
            EnrollmentStatus::Exited => "exited",
            EnrollmentStatus::Error => "error",
        }
    }
}

/// The fields a writer must observe unchanged before replacing an enrollment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrollmentGuard {
    pub status: EnrollmentStatus,
    pub current_node_id: String,
    pub revision: u64,
}

/// One user's traversal of a flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowEnrollment {
    pub id: String,
    pub flow_id: String,
    /// Flow version at enrollment time
    pub flow_version: u64,
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    pub status: EnrollmentStatus,
    pub current_node_id: String,
    pub entered_at: i64,
    pub next_process_at: Option<i64>,
    #[serde(default)]
    pub loop_counts: BTreeMap<String, u32>,
    #[serde(default)]
    pub variables: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_reason: Option<String>,
    /// Failed dispatch attempts at the current node
    #[serde(default)]
    pub attempts: u32,
    /// When the current delay node was first reached
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_started_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wake_at: Option<i64>,
    /// Timestamp of the event an `until_event` delay was waiting for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub awaited_event_at: Option<i64>,
    /// Split node id -> assigned variant id
    #[serde(default)]
    pub split_assignments: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_event: Option<EventSnapshot>,
    /// Identifies the signal occurrence that started this enrollment; the
    /// same occurrence never enrolls a user into the flow twice.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_key: Option<String>,
    /// Bumped by the store on every successful write
    #[serde(default)]
    pub revision: u64,
    #[serde(default)]
    pub updated_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<i64>,
}

impl FlowEnrollment {
    /// A new active enrollment positioned at `first_node_id`, due immediately.
    pub fn new(
        flow_id: impl Into<String>,
        flow_version: u64,
        user_id: impl Into<String>,
        first_node_id: impl Into<String>,
        now: i64,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            flow_id: flow_id.into(),
            flow_version,
            user_id: user_id.into(),
            account_id: None,
            status: EnrollmentStatus::Active,
            current_node_id: first_node_id.into(),
            entered_at: now,
            next_process_at: Some(now),
            loop_counts: BTreeMap::new(),
            variables: Map::new(),
            last_error: None,
            exit_reason: None,
            attempts: 0,
            delay_started_at: None,
            wake_at: None,
            awaited_event_at: None,
            split_assignments: BTreeMap::new(),
            entry_event: None,
            trigger_key: None,
            revision: 0,
            updated_at: now,
            finished_at: None,
        }
    }

    pub fn guard(&self) -> EnrollmentGuard {
        EnrollmentGuard {
            status: self.status,
            current_node_id: self.current_node_id.clone(),
            revision: self.revision,
        }
    }

    pub fn matches_guard(&self, guard: &EnrollmentGuard) -> bool {
        self.status == guard.status
            && self.current_node_id == guard.current_node_id
            && self.revision == guard.revision
    }

    pub fn is_due(&self, now: i64) -> bool {
        self.status == EnrollmentStatus::Active && self.next_process_at.is_some_and(|at| at <= now)
    }

    /// Jump to another node and make the enrollment due again right away.
    pub fn move_to(&mut self, node_id: impl Into<String>, now: i64) {
        self.current_node_id = node_id.into();
        self.next_process_at = Some(now);
        self.attempts = 0;
        self.last_error = None;
        self.clear_delay();
    }

    /// Stay on the current node until `wake_at`; `None` waits for an external wake-up.
    pub fn park(&mut self, wake_at: Option<i64>) {
        self.wake_at = wake_at;
        self.next_process_at = wake_at;
    }

    pub fn complete(&mut self, now: i64) {
        self.finish(EnrollmentStatus::Completed, now);
    }

    pub fn exit(&mut self, reason: impl Into<String>, now: i64) {
        self.exit_reason = Some(reason.into());
        self.finish(EnrollmentStatus::Exited, now);
    }

    pub fn fail(&mut self, error: impl Into<String>, now: i64) {
        self.last_error = Some(error.into());
        self.finish(EnrollmentStatus::Error, now);
    }

    fn finish(&mut self, status: EnrollmentStatus, now: i64) {
        self.status = status;
        self.next_process_at = None;
        self.finished_at = Some(now);
        self.clear_delay();
    }

    fn clear_delay(&mut self) {
        self.delay_started_at = None;
        self.wake_at = None;
        self.awaited_event_at = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_enrollment_is_due() {
        let enrollment = FlowEnrollment::new("flow", 3, "user", "email", 1_000);
        assert!(enrollment.is_due(1_000));
        assert!(!enrollment.is_due(999));
        assert_eq!(enrollment.flow_version, 3);
    }

    #[test]
    fn test_terminal_transitions_clear_schedule() {
        let mut enrollment = FlowEnrollment::new("flow", 1, "user", "delay", 0);
        enrollment.delay_started_at = Some(0);
        enrollment.park(Some(5_000));
        assert_eq!(enrollment.next_process_at, Some(5_000));

        enrollment.exit("filtered out", 6_000);
        assert_eq!(enrollment.status, EnrollmentStatus::Exited);
        assert_eq!(enrollment.exit_reason.as_deref(), Some("filtered out"));
        assert_eq!(enrollment.next_process_at, None);
        assert_eq!(enrollment.finished_at, Some(6_000));
        assert!(enrollment.delay_started_at.is_none());
        assert!(!enrollment.is_due(i64::MAX));
    }

    #[test]
    fn test_guard_tracks_revision() {
        let mut enrollment = FlowEnrollment::new("flow", 1, "user", "a", 0);
        let guard = enrollment.guard();
        assert!(enrollment.matches_guard(&guard));

        enrollment.revision += 1;
        assert!(!enrollment.matches_guard(&guard));
    }
}
