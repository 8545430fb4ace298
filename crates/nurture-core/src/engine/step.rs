//! One node's worth of progress for an enrollment.
//!
//! A step mutates a working copy of the enrollment. The scheduler decides
//! whether that copy gets written, so an abandoned step leaves the stored
//! record untouched.

use super::conditions::{EvaluationContext, evaluate_group};
use super::delay::{DelayContext, DelayPlan, plan_delay};
use super::split::assign_variant;
use crate::dispatch::{ActionRegistry, ActionRequest};
use crate::models::{
    ActionConfig, DelayConfig, FlowDefinition, FlowEnrollment, HANDLE_NO, HANDLE_TIMEOUT,
    HANDLE_YES, NodeConfig, UserProfile, variant_handle,
};
use nurture_storage::SystemConfig;
use serde_json::Value;
use tracing::{debug, warn};

pub const EXIT_FILTERED: &str = "filtered out";
pub const EXIT_DEFAULT: &str = "exit node reached";
pub const ERROR_LOOP_BUDGET: &str = "loop budget exceeded";

/// Shared inputs for every step of one pass.
pub struct StepContext<'a> {
    pub flow: &'a FlowDefinition,
    pub user: Option<&'a UserProfile>,
    pub dispatchers: &'a ActionRegistry,
    pub config: &'a SystemConfig,
    pub now: i64,
}

/// What happened during a step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// Moved to another node and may step again right away.
    Advanced,
    /// Waiting on time, an event, or a dispatch retry.
    Waiting,
    /// Reached a terminal status.
    Finished,
}

/// Side facts the scheduler folds into flow metrics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepEffects {
    /// Variant assigned for the first time at a split node.
    pub variant: Option<String>,
    /// An external action was dispatched successfully.
    pub dispatched: bool,
}

/// Advance `enrollment` by one node.
pub async fn step(
    enrollment: &mut FlowEnrollment,
    ctx: &StepContext<'_>,
) -> (StepOutcome, StepEffects) {
    let mut effects = StepEffects::default();
    let now = ctx.now;

    let Some(node) = ctx.flow.node(&enrollment.current_node_id) else {
        warn!(
            enrollment_id = %enrollment.id,
            node_id = %enrollment.current_node_id,
            "Current node no longer exists"
        );
        let error = format!("Node '{}' not found in flow", enrollment.current_node_id);
        enrollment.fail(error, now);
        return (StepOutcome::Finished, effects);
    };

    let outcome = match &node.config {
        NodeConfig::Trigger(_) => follow_default(enrollment, ctx.flow, now),

        NodeConfig::Action(ActionConfig::SetVariable { name, value }) => {
            enrollment.variables.insert(name.clone(), value.clone());
            follow_default(enrollment, ctx.flow, now)
        }

        NodeConfig::Action(action) => {
            let request = ActionRequest {
                flow_id: ctx.flow.id.clone(),
                enrollment_id: enrollment.id.clone(),
                node_id: node.id.clone(),
                action: action.clone(),
                user_id: enrollment.user_id.clone(),
                account_id: enrollment.account_id.clone(),
                user: ctx.user.cloned(),
                variables: enrollment.variables.clone(),
                attempt: enrollment.attempts + 1,
            };
            let result = ctx.dispatchers.dispatch(&request).await;

            if result.ok {
                effects.dispatched = true;
                if let ActionConfig::ApiCall {
                    save_response_as: Some(variable),
                    ..
                } = action
                {
                    enrollment
                        .variables
                        .insert(variable.clone(), result.output.unwrap_or(Value::Null));
                }
                follow_default(enrollment, ctx.flow, now)
            } else {
                let error = result
                    .error
                    .unwrap_or_else(|| format!("{} failed", action.kind()));
                enrollment.attempts += 1;
                if enrollment.attempts >= ctx.config.max_dispatch_attempts {
                    warn!(
                        enrollment_id = %enrollment.id,
                        node_id = %node.id,
                        attempts = enrollment.attempts,
                        error = %error,
                        "Action failed, giving up"
                    );
                    enrollment.fail(error, now);
                    StepOutcome::Finished
                } else {
                    let delay = i64::try_from(ctx.config.retry_delay_ms(enrollment.attempts)).unwrap_or(i64::MAX);
                    let retry_at = now.saturating_add(delay);
                    debug!(
                        enrollment_id = %enrollment.id,
                        node_id = %node.id,
                        attempts = enrollment.attempts,
                        retry_at,
                        "Action failed, retrying later"
                    );
                    enrollment.last_error = Some(error);
                    enrollment.next_process_at = Some(retry_at);
                    StepOutcome::Waiting
                }
            }
        }

        NodeConfig::Condition(group) => {
            let eval = EvaluationContext::new(ctx.user, enrollment.entry_event.as_ref())
                .with_variables(&enrollment.variables);
            let handle = if evaluate_group(group, &eval) {
                HANDLE_YES
            } else {
                HANDLE_NO
            };
            match ctx.flow.target_via(&node.id, handle) {
                Some(target) => {
                    enrollment.move_to(target, now);
                    StepOutcome::Advanced
                }
                None => {
                    enrollment.complete(now);
                    StepOutcome::Finished
                }
            }
        }

        NodeConfig::Filter(group) => {
            let eval = EvaluationContext::new(ctx.user, enrollment.entry_event.as_ref())
                .with_variables(&enrollment.variables);
            if evaluate_group(group, &eval) {
                follow_default(enrollment, ctx.flow, now)
            } else {
                enrollment.exit(EXIT_FILTERED, now);
                StepOutcome::Finished
            }
        }

        NodeConfig::Delay(delay) => step_delay(enrollment, delay, ctx),

        NodeConfig::Split(split) => {
            let assigned = match enrollment.split_assignments.get(&node.id) {
                Some(existing) => Some(existing.clone()),
                None => assign_variant(split, &enrollment.id).map(|variant| {
                    effects.variant = Some(variant.id.clone());
                    variant.id.clone()
                }),
            };
            let Some(variant_id) = assigned else {
                enrollment.fail("Split has no variants", now);
                return (StepOutcome::Finished, effects);
            };
            enrollment
                .split_assignments
                .insert(node.id.clone(), variant_id.clone());

            match ctx.flow.target_via(&node.id, &variant_handle(&variant_id)) {
                Some(target) => {
                    enrollment.move_to(target, now);
                    StepOutcome::Advanced
                }
                None => {
                    enrollment.complete(now);
                    StepOutcome::Finished
                }
            }
        }

        NodeConfig::Goto(goto) => {
            let count = enrollment
                .loop_counts
                .get(&goto.target_node_id)
                .copied()
                .unwrap_or(0)
                + 1;
            if count > goto.max_loops {
                warn!(
                    enrollment_id = %enrollment.id,
                    target = %goto.target_node_id,
                    max_loops = goto.max_loops,
                    "Loop budget exceeded"
                );
                enrollment.fail(ERROR_LOOP_BUDGET, now);
                StepOutcome::Finished
            } else if !ctx.flow.has_node(&goto.target_node_id) {
                let error = format!("Goto target '{}' does not exist", goto.target_node_id);
                enrollment.fail(error, now);
                StepOutcome::Finished
            } else {
                enrollment
                    .loop_counts
                    .insert(goto.target_node_id.clone(), count);
                enrollment.move_to(goto.target_node_id.clone(), now);
                StepOutcome::Advanced
            }
        }

        NodeConfig::Exit(exit) => {
            let reason = exit.reason.as_deref().unwrap_or(EXIT_DEFAULT);
            enrollment.exit(reason, now);
            StepOutcome::Finished
        }
    };

    (outcome, effects)
}

fn step_delay(enrollment: &mut FlowEnrollment, delay: &DelayConfig, ctx: &StepContext<'_>) -> StepOutcome {
    let now = ctx.now;

    let Some(_started_at) = enrollment.delay_started_at else {
        // First visit: resolve the wait and yield until the next pass.
        let plan = plan_delay(
            delay,
            now,
            &DelayContext {
                user: ctx.user,
                flow_timezone: ctx.flow.timezone(),
            },
        );
        enrollment.delay_started_at = Some(now);
        match plan {
            DelayPlan::WakeAt(at) => enrollment.park(Some(at)),
            DelayPlan::AwaitEvent { timeout_at } => enrollment.park(timeout_at),
        }
        return StepOutcome::Waiting;
    };

    if let DelayConfig::UntilEvent { .. } = delay {
        if enrollment.awaited_event_at.is_some() {
            return follow_default(enrollment, ctx.flow, now);
        }
        return match enrollment.wake_at {
            Some(timeout_at) if timeout_at <= now => {
                let target = ctx
                    .flow
                    .target_via(&enrollment.current_node_id, HANDLE_TIMEOUT)
                    .or_else(|| ctx.flow.default_target(&enrollment.current_node_id))
                    .map(str::to_string);
                move_or_complete(enrollment, target, now)
            }
            wake_at => {
                enrollment.park(wake_at);
                StepOutcome::Waiting
            }
        };
    }

    match enrollment.wake_at {
        Some(at) if at > now => {
            enrollment.park(Some(at));
            StepOutcome::Waiting
        }
        _ => follow_default(enrollment, ctx.flow, now),
    }
}

fn follow_default(enrollment: &mut FlowEnrollment, flow: &FlowDefinition, now: i64) -> StepOutcome {
    let target = flow
        .default_target(&enrollment.current_node_id)
        .map(str::to_string);
    move_or_complete(enrollment, target, now)
}

fn move_or_complete(enrollment: &mut FlowEnrollment, target: Option<String>, now: i64) -> StepOutcome {
    match target {
        Some(target) => {
            enrollment.move_to(target, now);
            StepOutcome::Advanced
        }
        None => {
            enrollment.complete(now);
            StepOutcome::Finished
        }
    }
}
