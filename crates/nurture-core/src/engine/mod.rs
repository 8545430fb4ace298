//! The automation engine: trigger matching, enrollment creation and the
//! scheduler that walks enrollments through flow graphs.
//!
//! [`AutomationEngine`] is an explicitly constructed instance over injected
//! storage, user directory and dispatchers. Intake lives in `ingestor`,
//! stepping in `scheduler`, cron and date triggers in `sweep`.

pub mod conditions;
pub mod delay;
pub mod ingestor;
pub mod runner;
pub mod schedule;
pub mod scheduler;
pub mod split;
pub mod step;
pub mod sweep;
pub mod triggers;

pub use runner::{EngineRunner, RunnerCommand, RunnerHandle};
pub use scheduler::ProcessReport;
pub use sweep::SweepReport;
pub use triggers::TriggerSignal;

use crate::dispatch::ActionRegistry;
use crate::error::{NurtureError, Result};
use crate::models::{
    EnrollmentStatus, EventSnapshot, FlowDefinition, FlowEnrollment, FlowStatus, TriggerConfig,
    UserProfile,
};
use crate::storage::{CreateOutcome, EntryPolicy, Storage, SystemConfig, UserDirectory};
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};
use triggers::{matches_trigger, passes_filter};

/// Outcome of one scheduler tick.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TickReport {
    pub events_resumed: usize,
    pub sweep: SweepReport,
    pub process: ProcessReport,
}

pub struct AutomationEngine {
    storage: Arc<Storage>,
    users: Arc<dyn UserDirectory>,
    dispatchers: Arc<ActionRegistry>,
    config: SystemConfig,
}

impl AutomationEngine {
    pub fn new(
        storage: Arc<Storage>,
        users: Arc<dyn UserDirectory>,
        dispatchers: ActionRegistry,
        config: SystemConfig,
    ) -> Self {
        Self {
            storage,
            users,
            dispatchers: Arc::new(dispatchers),
            config,
        }
    }

    /// Engine over the profiles stored next to flows, with default dispatchers
    /// and the persisted system config.
    pub fn from_storage(storage: Arc<Storage>) -> Result<Self> {
        let users: Arc<dyn UserDirectory> = Arc::new(storage.users.clone());
        let dispatchers = ActionRegistry::with_defaults(users.clone());
        let config = storage.system_config()?;
        Ok(Self::new(storage, users, dispatchers, config))
    }

    pub fn with_dispatchers(mut self, dispatchers: ActionRegistry) -> Self {
        self.dispatchers = Arc::new(dispatchers);
        self
    }

    pub fn with_config(mut self, config: SystemConfig) -> Self {
        self.config = config;
        self
    }

    pub fn storage(&self) -> &Arc<Storage> {
        &self.storage
    }

    pub fn users(&self) -> &Arc<dyn UserDirectory> {
        &self.users
    }

    pub fn config(&self) -> &SystemConfig {
        &self.config
    }

    /// Enroll the signal's user into every active flow whose trigger matches.
    pub fn signal(&self, signal: &TriggerSignal, now: i64) -> Result<Vec<FlowEnrollment>> {
        let flows = self.storage.flows.list_by_status(FlowStatus::Active)?;
        if flows.is_empty() {
            return Ok(Vec::new());
        }

        let user = self.users.get(signal.user_id())?;
        let snapshot = signal.snapshot(now);
        let mut created = Vec::new();

        for flow in &flows {
            if let Some(enrollment) = self.enroll_into(flow, signal, user.as_ref(), &snapshot, now)? {
                created.push(enrollment);
            }
        }

        Ok(created)
    }

    /// Set a user's lifecycle state and fire lifecycle triggers when it changed.
    pub fn change_lifecycle(
        &self,
        user_id: &str,
        state: &str,
        now: i64,
    ) -> Result<Vec<FlowEnrollment>> {
        let mut previous = None;
        self.users.update(user_id, &mut |profile: &mut UserProfile| {
            previous = profile.lifecycle_state.replace(state.to_string());
        })?;
        self.recheck_user(user_id, now)?;

        if previous.as_deref() == Some(state) {
            return Ok(Vec::new());
        }
        self.signal(
            &TriggerSignal::LifecycleChanged {
                user_id: user_id.to_string(),
                from: previous,
                to: state.to_string(),
            },
            now,
        )
    }

    /// Add a user to a segment and fire segment-entry triggers on first entry.
    pub fn enter_segment(
        &self,
        user_id: &str,
        segment_id: &str,
        now: i64,
    ) -> Result<Vec<FlowEnrollment>> {
        let mut added = false;
        self.users.update(user_id, &mut |profile: &mut UserProfile| {
            added = profile.segments.insert(segment_id.to_string());
        })?;
        if !added {
            return Ok(Vec::new());
        }
        self.signal(
            &TriggerSignal::SegmentEntered {
                user_id: user_id.to_string(),
                segment_id: segment_id.to_string(),
            },
            now,
        )
    }

    /// Remove a user from a segment; enrollments that required it may exit.
    pub fn leave_segment(&self, user_id: &str, segment_id: &str, now: i64) -> Result<usize> {
        self.users.update(user_id, &mut |profile: &mut UserProfile| {
            profile.segments.remove(segment_id);
        })?;
        self.recheck_user(user_id, now)
    }

    /// Enroll one user into a flow with a manual trigger.
    pub fn enroll_manually(
        &self,
        flow_id: &str,
        user_id: &str,
        now: i64,
    ) -> Result<Option<FlowEnrollment>> {
        if !self.storage.flows.exists(flow_id)? {
            return Err(NurtureError::FlowNotFound(flow_id.to_string()));
        }
        let created = self.signal(
            &TriggerSignal::Manual {
                flow_id: flow_id.to_string(),
                user_id: user_id.to_string(),
            },
            now,
        )?;
        Ok(created.into_iter().next())
    }

    pub fn receive_webhook(
        &self,
        path: &str,
        user_id: &str,
        payload: Map<String, Value>,
        now: i64,
    ) -> Result<Vec<FlowEnrollment>> {
        self.signal(
            &TriggerSignal::WebhookReceived {
                path: path.to_string(),
                user_id: user_id.to_string(),
                payload,
            },
            now,
        )
    }

    /// Finish pending events, fire due cron and date triggers, then advance
    /// due enrollments.
    pub async fn tick(&self, now: i64) -> Result<TickReport> {
        let events_resumed = self.resume_pending_events(now)?;
        let sweep = self.sweep(now)?;
        let process = self.process_due(now).await?;
        Ok(TickReport {
            events_resumed,
            sweep,
            process,
        })
    }

    /// Enroll the signal's user into `flow` if its trigger matches and its filter passes.
    fn enroll_into(
        &self,
        flow: &FlowDefinition,
        signal: &TriggerSignal,
        user: Option<&UserProfile>,
        snapshot: &EventSnapshot,
        now: i64,
    ) -> Result<Option<FlowEnrollment>> {
        let Some((trigger_node, trigger)) = flow.trigger() else {
            return Ok(None);
        };
        if !matches_trigger(&trigger.kind, &flow.id, signal) {
            return Ok(None);
        }
        if !passes_filter(trigger, user, Some(snapshot)) {
            debug!(flow_id = %flow.id, user_id = %signal.user_id(), "Trigger filter rejected user");
            return Ok(None);
        }

        let account_id = signal
            .account_id()
            .or_else(|| user.and_then(|u| u.account_id.as_deref()));
        let entry = Entry {
            trigger_node_id: &trigger_node.id,
            trigger,
            user_id: signal.user_id(),
            account_id,
            snapshot,
            occurrence: signal.occurrence_key(),
        };
        self.enroll(flow, entry, now)
    }

    fn enroll(&self, flow: &FlowDefinition, entry: Entry<'_>, now: i64) -> Result<Option<FlowEnrollment>> {
        let Some(first_node) = flow.default_target(entry.trigger_node_id) else {
            warn!(flow_id = %flow.id, "Trigger has no outgoing edge, skipping enrollment");
            return Ok(None);
        };

        let mut candidate = FlowEnrollment::new(&flow.id, flow.version, entry.user_id, first_node, now);
        candidate.account_id = entry.account_id.map(str::to_string);
        candidate.entry_event = Some(entry.snapshot.clone());
        candidate.trigger_key = entry.occurrence;

        let policy = EntryPolicy::from_trigger(entry.trigger);
        match self.storage.enrollments.create_if_eligible(&candidate, policy, now)? {
            CreateOutcome::Created(enrollment) => {
                self.storage.flows.update_metrics(&flow.id, |metrics| {
                    metrics.enrolled += 1;
                    metrics.active += 1;
                })?;
                info!(
                    flow_id = %flow.id,
                    enrollment_id = %enrollment.id,
                    user_id = %enrollment.user_id,
                    trigger = %entry.snapshot.name,
                    "Enrollment created"
                );
                Ok(Some(enrollment))
            }
            outcome => {
                debug!(flow_id = %flow.id, user_id = %entry.user_id, ?outcome, "Enrollment skipped");
                Ok(None)
            }
        }
    }

    /// Fold a finished enrollment and newly assigned split variants into flow metrics.
    fn record_progress(
        &self,
        flow_id: &str,
        finished: Option<EnrollmentStatus>,
        variants: &[String],
    ) -> Result<()> {
        if finished.is_none() && variants.is_empty() {
            return Ok(());
        }
        self.storage.flows.update_metrics(flow_id, |metrics| {
            for variant in variants {
                *metrics.variant_assignments.entry(variant.clone()).or_insert(0) += 1;
            }
            if let Some(status) = finished {
                metrics.active = metrics.active.saturating_sub(1);
                match status {
                    EnrollmentStatus::Completed => metrics.completed += 1,
                    EnrollmentStatus::Exited => metrics.exited += 1,
                    EnrollmentStatus::Error => metrics.errored += 1,
                    EnrollmentStatus::Active => {}
                }
            }
        })?;
        Ok(())
    }
}

struct Entry<'a> {
    trigger_node_id: &'a str,
    trigger: &'a TriggerConfig,
    user_id: &'a str,
    account_id: Option<&'a str>,
    snapshot: &'a EventSnapshot,
    occurrence: Option<String>,
}
