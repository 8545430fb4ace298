//! Event intake: dedup, append, then fan out to triggers and waiting delays.

use super::AutomationEngine;
use super::triggers::TriggerSignal;
use crate::error::Result;
use crate::models::{
    BatchIngestReport, DelayConfig, FlowDefinition, FlowEnrollment, IngestOutcome, NodeConfig,
    StoredEvent, UserProfile,
};
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// CAS attempts when marking a waiting enrollment as woken.
const WAKE_RETRIES: usize = 3;

impl AutomationEngine {
    /// Store an event once per `message_id` and let it fire triggers.
    ///
    /// Replays of a known `message_id` are reported as
    /// [`IngestOutcome::Duplicate`]. A replay of an event whose processing
    /// failed earlier finishes that processing.
    pub fn ingest_event(&self, event: StoredEvent, now: i64) -> Result<IngestOutcome> {
        let event = with_message_id(event);
        let appended = self.storage.events.append(&event)?;
        match appended.outcome {
            IngestOutcome::Ingested => self.process_event(appended.seq, &event, now)?,
            IngestOutcome::Duplicate => {
                if !self.resume_if_pending(appended.seq, now)? {
                    debug!(message_id = %event.message_id, "Duplicate event ignored");
                }
            }
        }
        Ok(appended.outcome)
    }

    /// Batch form of [`Self::ingest_event`], deduplicating within the batch too.
    ///
    /// Events are stored together; if processing one of them fails the rest
    /// stay pending and are finished by a replay or the next tick.
    pub fn ingest_events(&self, events: Vec<StoredEvent>, now: i64) -> Result<BatchIngestReport> {
        let events: Vec<StoredEvent> = events.into_iter().map(with_message_id).collect();
        let appended = self.storage.events.append_batch(&events)?;

        let mut report = BatchIngestReport::default();
        for (event, entry) in events.iter().zip(&appended.entries) {
            match entry.outcome {
                IngestOutcome::Ingested => {
                    report.ingested += 1;
                    self.process_event(entry.seq, event, now)?;
                }
                IngestOutcome::Duplicate => {
                    report.duplicates += 1;
                    self.resume_if_pending(entry.seq, now)?;
                }
            }
        }

        info!(
            ingested = report.ingested,
            duplicates = report.duplicates,
            evicted = appended.evicted,
            "Event batch ingested"
        );
        Ok(report)
    }

    /// Finish events whose processing failed after they were stored.
    /// Returns how many completed; failures stay pending for the next call.
    pub fn resume_pending_events(&self, now: i64) -> Result<usize> {
        let mut resumed = 0;
        for (seq, event) in self.storage.events.pending(self.config.due_batch_size)? {
            match self.process_event(seq, &event, now) {
                Ok(()) => resumed += 1,
                Err(e) => {
                    warn!(message_id = %event.message_id, error = %e, "Pending event still failing");
                }
            }
        }
        if resumed > 0 {
            info!(resumed, "Pending events processed");
        }
        Ok(resumed)
    }

    fn resume_if_pending(&self, seq: u64, now: i64) -> Result<bool> {
        if !self.storage.events.is_pending(seq)? {
            return Ok(false);
        }
        let Some(stored) = self.storage.events.get_seq(seq)? else {
            return Ok(false);
        };
        info!(message_id = %stored.message_id, "Replay resumes unfinished event");
        self.process_event(seq, &stored, now)?;
        Ok(true)
    }

    /// Fan an event out to profiles, waiting delays and triggers, then clear
    /// its pending mark. Every step tolerates being repeated.
    fn process_event(&self, seq: u64, event: &StoredEvent, now: i64) -> Result<()> {
        if self.users.get(&event.user_id)?.is_none() {
            let mut profile = UserProfile::new(&event.user_id);
            profile.account_id = event.account_id.clone();
            profile.updated_at = now;
            self.users.upsert(&profile)?;
        }

        self.wake_waiting(event, now)?;
        self.signal(&TriggerSignal::Event(event.clone()), now)?;
        self.storage.events.complete(seq)?;
        Ok(())
    }

    /// Mark the user's enrollments parked on an `until_event` delay for this
    /// event as woken and due now.
    fn wake_waiting(&self, event: &StoredEvent, now: i64) -> Result<usize> {
        let mut flows: HashMap<String, Option<FlowDefinition>> = HashMap::new();
        let mut woken = 0;

        for enrollment in self.storage.enrollments.list_by_user(&event.user_id)? {
            if enrollment.status.is_terminal() {
                continue;
            }
            if !flows.contains_key(&enrollment.flow_id) {
                let flow = self.storage.flows.get(&enrollment.flow_id)?;
                flows.insert(enrollment.flow_id.clone(), flow);
            }
            let Some(Some(flow)) = flows.get(&enrollment.flow_id) else {
                continue;
            };

            let mut current = enrollment;
            for _ in 0..WAKE_RETRIES {
                if !awaits_event(flow, &current, &event.event) {
                    break;
                }
                let mut next = current.clone();
                next.awaited_event_at = Some(now);
                next.next_process_at = Some(now);

                if self.storage.enrollments.compare_and_swap(&current.guard(), &next)?.is_some() {
                    debug!(enrollment_id = %next.id, event = %event.event, "Waiting enrollment woken");
                    woken += 1;
                    break;
                }
                match self.storage.enrollments.get(&current.id)? {
                    Some(reloaded) => current = reloaded,
                    None => break,
                }
            }
        }

        Ok(woken)
    }
}

fn awaits_event(flow: &FlowDefinition, enrollment: &FlowEnrollment, event_name: &str) -> bool {
    if enrollment.status.is_terminal()
        || enrollment.delay_started_at.is_none()
        || enrollment.awaited_event_at.is_some()
    {
        return false;
    }
    matches!(
        flow.node(&enrollment.current_node_id).map(|node| &node.config),
        Some(NodeConfig::Delay(DelayConfig::UntilEvent { wait_for_event, .. })) if wait_for_event == event_name
    )
}

fn with_message_id(mut event: StoredEvent) -> StoredEvent {
    if event.message_id.trim().is_empty() {
        event.message_id = uuid::Uuid::new_v4().to_string();
    }
    event
}
