//! `process_due`: advance every due enrollment of an active flow.
//!
//! Each enrollment is first claimed with a compare-and-set that pushes its
//! `next_process_at` out by the claim lease. Only the winner steps it, so
//! concurrent passes never dispatch the same action twice. Every step is
//! written back with another compare-and-set; a lost write abandons the pass
//! for that enrollment. A worker that dies mid-pass leaves the enrollment due
//! again once the lease expires.

use super::AutomationEngine;
use super::step::{StepContext, StepOutcome, step};
use super::triggers::still_eligible;
use crate::error::Result;
use crate::models::{EnrollmentStatus, FlowDefinition, FlowEnrollment, FlowStatus};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub const EXIT_DISQUALIFIED: &str = "no longer matches entry criteria";

/// CAS attempts when exiting a disqualified enrollment outside a pass.
const DISQUALIFY_RETRIES: usize = 3;

/// Counters for one `process_due` pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessReport {
    /// Due enrollments of active flows picked up by this pass.
    pub due: usize,
    /// Enrollments this pass claimed and stepped.
    pub processed: usize,
    /// Node steps written.
    pub steps: usize,
    /// Enrollments another writer got to first.
    pub conflicts: usize,
    pub completed: usize,
    pub exited: usize,
    pub errored: usize,
    /// Enrollments whose pass failed on a storage error.
    pub failures: usize,
}

enum Advance {
    Conflict,
    Done { steps: usize, status: EnrollmentStatus },
}

impl AutomationEngine {
    /// Advance every enrollment with `next_process_at <= now` whose flow is active.
    ///
    /// Enrollments of paused or archived flows stay untouched and due.
    pub async fn process_due(&self, now: i64) -> Result<ProcessReport> {
        let flows: HashMap<String, Arc<FlowDefinition>> = self
            .storage
            .flows
            .list_by_status(FlowStatus::Active)?
            .into_iter()
            .map(|flow| (flow.id.clone(), Arc::new(flow)))
            .collect();

        let mut report = ProcessReport::default();
        if flows.is_empty() {
            return Ok(report);
        }

        let due = self.storage.enrollments.due_where(
            now,
            self.config.due_batch_size.max(1),
            |enrollment| flows.contains_key(&enrollment.flow_id),
        )?;
        report.due = due.len();
        if due.is_empty() {
            return Ok(report);
        }

        let work: Vec<(FlowEnrollment, Arc<FlowDefinition>)> = due
            .into_iter()
            .filter_map(|enrollment| {
                let flow = flows.get(&enrollment.flow_id)?.clone();
                Some((enrollment, flow))
            })
            .collect();

        let results: Vec<(String, Result<Advance>)> = stream::iter(work)
            .map(|(enrollment, flow)| async move {
                let id = enrollment.id.clone();
                (id, self.advance(enrollment, &flow, now).await)
            })
            .buffer_unordered(self.config.worker_count.max(1))
            .collect()
            .await;

        for (enrollment_id, result) in results {
            match result {
                Ok(Advance::Conflict) => report.conflicts += 1,
                Ok(Advance::Done { steps, status }) => {
                    report.processed += 1;
                    report.steps += steps;
                    match status {
                        EnrollmentStatus::Completed => report.completed += 1,
                        EnrollmentStatus::Exited => report.exited += 1,
                        EnrollmentStatus::Error => report.errored += 1,
                        EnrollmentStatus::Active => {}
                    }
                }
                Err(e) => {
                    error!(enrollment_id = %enrollment_id, error = %e, "Failed to advance enrollment");
                    report.failures += 1;
                }
            }
        }

        if report.processed > 0 || report.conflicts > 0 {
            info!(
                due = report.due,
                processed = report.processed,
                steps = report.steps,
                conflicts = report.conflicts,
                "Scheduler pass finished"
            );
        }
        Ok(report)
    }

    async fn advance(
        &self,
        snapshot: FlowEnrollment,
        flow: &FlowDefinition,
        now: i64,
    ) -> Result<Advance> {
        let lease_ms = i64::try_from(self.config.claim_lease_seconds.saturating_mul(1000)).unwrap_or(i64::MAX);
        let mut claim = snapshot.clone();
        claim.next_process_at = Some(now.saturating_add(lease_ms));
        let Some(claimed) = self
            .storage
            .enrollments
            .compare_and_swap(&snapshot.guard(), &claim)?
        else {
            debug!(enrollment_id = %snapshot.id, "Enrollment claimed by another worker");
            return Ok(Advance::Conflict);
        };

        let mut guard = claimed.guard();
        let mut working = claimed;
        working.next_process_at = snapshot.next_process_at;

        let mut user = self.users.get(&working.user_id)?;
        let trigger = flow.trigger().map(|(_, trigger)| trigger);
        let mut variants = Vec::new();
        let mut steps = 0;

        loop {
            let disqualified = flow.settings.exit_on_disqualify
                && trigger.is_some_and(|trigger| {
                    !still_eligible(trigger, user.as_ref(), working.entry_event.as_ref())
                });

            let (outcome, variant, dispatched) = if disqualified {
                info!(
                    enrollment_id = %working.id,
                    user_id = %working.user_id,
                    "Enrollment no longer matches entry criteria"
                );
                working.exit(EXIT_DISQUALIFIED, now);
                (StepOutcome::Finished, None, false)
            } else {
                let ctx = StepContext {
                    flow,
                    user: user.as_ref(),
                    dispatchers: &self.dispatchers,
                    config: &self.config,
                    now,
                };
                let (outcome, effects) = step(&mut working, &ctx).await;
                (outcome, effects.variant, effects.dispatched)
            };

            match self.storage.enrollments.compare_and_swap(&guard, &working)? {
                Some(stored) => {
                    guard = stored.guard();
                    working = stored;
                    steps += 1;
                    variants.extend(variant);
                }
                None => {
                    warn!(
                        enrollment_id = %working.id,
                        node_id = %guard.current_node_id,
                        "Enrollment changed during a pass, dropping the step"
                    );
                    self.record_progress(&flow.id, None, &variants)?;
                    return Ok(Advance::Conflict);
                }
            }

            if outcome != StepOutcome::Advanced || steps >= self.config.max_steps_per_pass as usize {
                break;
            }
            if dispatched {
                user = self.users.get(&working.user_id)?;
            }
        }

        let status = working.status;
        let finished = status.is_terminal().then_some(status);
        self.record_progress(&flow.id, finished, &variants)?;

        debug!(
            enrollment_id = %working.id,
            node_id = %working.current_node_id,
            status = status.as_str(),
            steps,
            "Enrollment advanced"
        );
        Ok(Advance::Done { steps, status })
    }

    /// Exit the user's enrollments that no longer satisfy their flow's entry
    /// criteria, for flows with `exit_on_disqualify` set.
    ///
    /// Scheduler passes run the same check before every step; this catches
    /// enrollments parked on long delays as soon as the profile changes.
    pub fn recheck_user(&self, user_id: &str, now: i64) -> Result<usize> {
        let user = self.users.get(user_id)?;
        let mut flows: HashMap<String, Option<FlowDefinition>> = HashMap::new();
        let mut exited = 0;

        for enrollment in self.storage.enrollments.list_by_user(user_id)? {
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
            if flow.status != FlowStatus::Active || !flow.settings.exit_on_disqualify {
                continue;
            }
            let Some((_, trigger)) = flow.trigger() else {
                continue;
            };
            if still_eligible(trigger, user.as_ref(), enrollment.entry_event.as_ref()) {
                continue;
            }

            let mut current = enrollment;
            for _ in 0..DISQUALIFY_RETRIES {
                let mut next = current.clone();
                next.exit(EXIT_DISQUALIFIED, now);
                if self.storage.enrollments.compare_and_swap(&current.guard(), &next)?.is_some() {
                    info!(enrollment_id = %next.id, user_id = %user_id, "Enrollment exited after disqualification");
                    self.record_progress(&flow.id, Some(EnrollmentStatus::Exited), &[])?;
                    exited += 1;
                    break;
                }
                match self.storage.enrollments.get(&current.id)? {
                    Some(reloaded) if !reloaded.status.is_terminal() => current = reloaded,
                    _ => break,
                }
            }
        }

        Ok(exited)
    }
}
