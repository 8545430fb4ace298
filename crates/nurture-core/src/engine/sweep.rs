//! Time-driven triggers: cron schedules and date properties.
//!
//! Neither has an inbound signal, so every tick sweeps active flows and
//! fires what became due. The audience is enrolled first and the cron slot
//! or calendar day is claimed afterwards, so a sweep that fails part way is
//! retried by the next one. Enrollments carry the slot or day as their
//! occurrence key, which keeps a retried or concurrent sweep from enrolling
//! anyone twice.

use super::AutomationEngine;
use super::delay::resolve_timezone;
use super::schedule::{latest_fire_between, parse_schedule};
use super::triggers::{TriggerSignal, date_property_due};
use crate::error::Result;
use crate::models::{FlowDefinition, FlowStatus, TriggerKind, UserProfile};
use chrono::DateTime;
use serde::Serialize;
use tracing::{info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    /// Cron slots fired.
    pub schedules_fired: usize,
    /// Date-property flows swept for a new day.
    pub dates_swept: usize,
    pub enrolled: usize,
}

impl AutomationEngine {
    /// Fire schedule and date-property triggers of active flows due at `now`.
    pub fn sweep(&self, now: i64) -> Result<SweepReport> {
        let mut report = SweepReport::default();

        for flow in self.storage.flows.list_by_status(FlowStatus::Active)? {
            let Some((_, trigger)) = flow.trigger() else {
                continue;
            };
            match &trigger.kind {
                TriggerKind::Schedule {
                    cron_expression,
                    timezone,
                    audience_segment,
                } => {
                    let schedule = match parse_schedule(cron_expression) {
                        Ok(schedule) => schedule,
                        Err(e) => {
                            warn!(flow_id = %flow.id, cron = %cron_expression, error = %e, "Skipping flow with invalid cron");
                            continue;
                        }
                    };
                    let zone = timezone.as_deref().or(flow.timezone());
                    let after = self
                        .storage
                        .trigger_state
                        .get(&flow.id)?
                        .last_fired_at
                        .unwrap_or(flow.updated_at);
                    let Some(slot) = latest_fire_between(&schedule, zone, after, now) else {
                        continue;
                    };
                    let audience = match audience_segment {
                        Some(segment_id) => self.users.list_in_segment(segment_id)?,
                        None => self.users.list()?,
                    };
                    let enrolled = self.enroll_each(&flow, audience, now, |user_id| {
                        TriggerSignal::Scheduled {
                            flow_id: flow.id.clone(),
                            user_id,
                            slot,
                        }
                    })?;
                    if !self.storage.trigger_state.claim_slot(&flow.id, slot)? {
                        continue;
                    }
                    info!(flow_id = %flow.id, slot, enrolled, "Schedule trigger fired");
                    report.schedules_fired += 1;
                    report.enrolled += enrolled;
                }
                TriggerKind::DateProperty {
                    date_property,
                    offset_days,
                } => {
                    let tz = resolve_timezone([flow.timezone()]);
                    let Some(today) =
                        DateTime::from_timestamp_millis(now).map(|d| d.with_timezone(&tz).date_naive())
                    else {
                        continue;
                    };
                    let day = today.format("%Y-%m-%d").to_string();
                    let swept = self.storage.trigger_state.get(&flow.id)?.last_swept_day;
                    if swept.as_deref() == Some(day.as_str()) {
                        continue;
                    }

                    let audience: Vec<UserProfile> = self
                        .users
                        .list()?
                        .into_iter()
                        .filter(|user| date_property_due(user, date_property, *offset_days, today, tz))
                        .collect();
                    let enrolled = self.enroll_each(&flow, audience, now, |user_id| {
                        TriggerSignal::DateReached {
                            flow_id: flow.id.clone(),
                            user_id,
                            day: day.clone(),
                        }
                    })?;
                    if !self.storage.trigger_state.claim_day(&flow.id, &day)? {
                        continue;
                    }
                    info!(flow_id = %flow.id, day = %day, enrolled, "Date property trigger swept");
                    report.dates_swept += 1;
                    report.enrolled += enrolled;
                }
                _ => {}
            }
        }

        Ok(report)
    }

    fn enroll_each(
        &self,
        flow: &FlowDefinition,
        audience: Vec<UserProfile>,
        now: i64,
        signal_for: impl Fn(String) -> TriggerSignal,
    ) -> Result<usize> {
        let mut enrolled = 0;
        for user in audience {
            let signal = signal_for(user.user_id.clone());
            let snapshot = signal.snapshot(now);
            if self
                .enroll_into(flow, &signal, Some(&user), &snapshot, now)?
                .is_some()
            {
                enrolled += 1;
            }
        }
        Ok(enrolled)
    }
}
