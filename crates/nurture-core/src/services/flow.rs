//! Flow service layer
//!
//! Every save path that can leave a flow `active` runs the validation engine
//! first. Pausing and archiving never touch enrollment progress.

use crate::AppCore;
use crate::error::{NurtureError, Result};
use crate::models::{
    EnrollmentStatus, FlowDefinition, FlowMetrics, FlowStatus, ValidationIssue,
};
use crate::storage::SaveOutcome;
use crate::validation::{has_blocking_issues, validate_definition};
use nurture_storage::time_utils;
use tracing::info;

pub const EXIT_ARCHIVED: &str = "flow archived";

/// A flow together with the non-blocking issues found while activating it.
#[derive(Debug, Clone)]
pub struct Activation {
    pub flow: FlowDefinition,
    pub issues: Vec<ValidationIssue>,
}

pub fn list_flows(core: &AppCore) -> Result<Vec<FlowDefinition>> {
    Ok(core.storage.flows.list()?)
}

pub fn get_flow(core: &AppCore, id: &str) -> Result<FlowDefinition> {
    core.storage
        .flows
        .get(id)?
        .ok_or_else(|| NurtureError::FlowNotFound(id.to_string()))
}

/// Validation issues for `flow` against the core's capabilities.
pub fn check_flow(core: &AppCore, flow: &FlowDefinition) -> Vec<ValidationIssue> {
    validate_definition(flow, Some(core.capabilities.as_ref()))
}

/// Create or update a flow. `flow.version` must equal the stored version.
///
/// Saving with `status = active` is rejected when validation finds blocking
/// issues.
pub fn save_flow(core: &AppCore, flow: &FlowDefinition) -> Result<FlowDefinition> {
    if let Some(stored) = core.storage.flows.get(&flow.id)?
        && stored.status == FlowStatus::Archived
    {
        return Err(NurtureError::ArchivedFlow(flow.id.clone()));
    }
    if flow.status == FlowStatus::Active {
        ensure_activatable(core, flow)?;
    }
    store(core, flow)
}

pub fn create_flow(core: &AppCore, name: &str) -> Result<FlowDefinition> {
    let flow = FlowDefinition::new(name);
    let saved = store(core, &flow)?;
    info!(flow_id = %saved.id, name = %saved.name, "Flow created");
    Ok(saved)
}

pub fn activate_flow(core: &AppCore, id: &str) -> Result<Activation> {
    let mut flow = get_flow(core, id)?;
    match flow.status {
        FlowStatus::Archived => return Err(NurtureError::ArchivedFlow(id.to_string())),
        FlowStatus::Active => {
            let issues = check_flow(core, &flow);
            return Ok(Activation { flow, issues });
        }
        FlowStatus::Draft | FlowStatus::Paused => {}
    }

    let issues = ensure_activatable(core, &flow)?;
    flow.status = FlowStatus::Active;
    let flow = store(core, &flow)?;
    info!(flow_id = %flow.id, version = flow.version, "Flow activated");
    Ok(Activation { flow, issues })
}

/// Stop enrolling and advancing. In-flight enrollments keep their state.
pub fn pause_flow(core: &AppCore, id: &str) -> Result<FlowDefinition> {
    let mut flow = get_flow(core, id)?;
    match flow.status {
        FlowStatus::Paused => return Ok(flow),
        FlowStatus::Active => {}
        other => {
            return Err(NurtureError::InvalidTransition {
                id: id.to_string(),
                status: other.as_str(),
                action: "pause",
            });
        }
    }
    flow.status = FlowStatus::Paused;
    let flow = store(core, &flow)?;
    info!(flow_id = %flow.id, "Flow paused");
    Ok(flow)
}

/// Re-activate a paused flow; enrollments continue where they stopped.
pub fn resume_flow(core: &AppCore, id: &str) -> Result<Activation> {
    let flow = get_flow(core, id)?;
    if flow.status != FlowStatus::Paused {
        return Err(NurtureError::InvalidTransition {
            id: id.to_string(),
            status: flow.status.as_str(),
            action: "resume",
        });
    }
    activate_flow(core, id)
}

/// Archive a flow and exit its open enrollments.
pub fn archive_flow(core: &AppCore, id: &str) -> Result<FlowDefinition> {
    let mut flow = get_flow(core, id)?;
    if flow.status == FlowStatus::Archived {
        return Ok(flow);
    }
    flow.status = FlowStatus::Archived;
    let flow = store(core, &flow)?;

    let now = time_utils::now_ms();
    let mut exited = 0u64;
    for enrollment in core
        .storage
        .enrollments
        .list_by_flow(id, Some(EnrollmentStatus::Active))?
    {
        let mut next = enrollment.clone();
        next.exit(EXIT_ARCHIVED, now);
        if core
            .storage
            .enrollments
            .compare_and_swap(&enrollment.guard(), &next)?
            .is_some()
        {
            exited += 1;
        }
    }
    if exited > 0 {
        core.storage.flows.update_metrics(id, |metrics| {
            metrics.active = metrics.active.saturating_sub(exited);
            metrics.exited += exited;
        })?;
    }

    info!(flow_id = %flow.id, exited, "Flow archived");
    get_flow(core, id)
}

/// Copy a flow as a fresh draft with cleared metrics.
pub fn duplicate_flow(core: &AppCore, id: &str) -> Result<FlowDefinition> {
    let source = get_flow(core, id)?;
    let mut copy = FlowDefinition::new(format!("{} (copy)", source.name));
    copy.description = source.description;
    copy.nodes = source.nodes;
    copy.edges = source.edges;
    copy.settings = source.settings;
    copy.metrics = FlowMetrics::default();

    let saved = store(core, &copy)?;
    info!(source_id = %id, flow_id = %saved.id, "Flow duplicated");
    Ok(saved)
}

/// Delete a flow with its enrollments and trigger state. Returns the number
/// of enrollments removed.
///
/// The flow record goes last, so an interrupted delete leaves it in place
/// and can simply be repeated.
pub fn delete_flow(core: &AppCore, id: &str) -> Result<usize> {
    if !core.storage.flows.exists(id)? {
        return Err(NurtureError::FlowNotFound(id.to_string()));
    }
    let removed = core.storage.enrollments.delete_by_flow(id)?;
    core.storage.trigger_state.delete(id)?;
    if !core.storage.flows.delete(id)? {
        return Err(NurtureError::FlowNotFound(id.to_string()));
    }
    info!(flow_id = %id, removed, "Flow deleted");
    Ok(removed)
}

fn ensure_activatable(core: &AppCore, flow: &FlowDefinition) -> Result<Vec<ValidationIssue>> {
    let issues = check_flow(core, flow);
    if has_blocking_issues(&issues) {
        return Err(NurtureError::ActivationBlocked { issues });
    }
    Ok(issues)
}

fn store(core: &AppCore, flow: &FlowDefinition) -> Result<FlowDefinition> {
    match core.storage.flows.save(flow, time_utils::now_ms())? {
        SaveOutcome::Saved(saved) => Ok(saved),
        SaveOutcome::Conflict { expected, actual } => {
            Err(NurtureError::VersionConflict { expected, actual })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        ActionConfig, ExitConfig, FlowEdge, FlowEnrollment, FlowNode, NodeConfig, TriggerConfig,
        TriggerKind,
    };
    use crate::models::StoredEvent;
    use crate::validation::{Capability, StaticCapabilities};
    use std::sync::Arc;

    fn draft(core: &AppCore) -> FlowDefinition {
        let mut flow = create_flow(core, "Onboarding").unwrap();
        flow.nodes = vec![
            FlowNode::new(
                "t",
                "Signed up",
                NodeConfig::Trigger(TriggerConfig::new(TriggerKind::EventReceived {
                    event_name: "signup".to_string(),
                })),
            ),
            FlowNode::new(
                "email",
                "Welcome",
                NodeConfig::Action(ActionConfig::SendEmail {
                    template_id: "welcome".to_string(),
                    subject: None,
                    from_name: None,
                }),
            ),
            FlowNode::new("x", "Done", NodeConfig::Exit(ExitConfig::default())),
        ];
        flow.edges = vec![FlowEdge::new("t", "email"), FlowEdge::new("email", "x")];
        save_flow(core, &flow).unwrap()
    }

    #[test]
    fn test_save_bumps_version_and_detects_conflicts() {
        let core = AppCore::in_memory().unwrap();
        let flow = draft(&core);
        assert_eq!(flow.version, 2);

        let mut stale = flow.clone();
        stale.version = 1;
        let err = save_flow(&core, &stale).unwrap_err();
        assert!(matches!(err, NurtureError::VersionConflict { expected: 1, actual: 2 }));
    }

    #[test]
    fn test_active_save_requires_valid_graph() {
        let core = AppCore::in_memory().unwrap();
        let mut flow = create_flow(&core, "Broken").unwrap();
        flow.status = FlowStatus::Active;

        let err = save_flow(&core, &flow).unwrap_err();
        let NurtureError::ActivationBlocked { issues } = err else {
            panic!("expected activation to be blocked");
        };
        assert_eq!(issues[0].message, "Flow must have a trigger");
    }

    #[test]
    fn test_activation_respects_capabilities() {
        let core = AppCore::in_memory()
            .unwrap()
            .with_capabilities(Arc::new(StaticCapabilities::none()));
        let flow = draft(&core);

        let err = activate_flow(&core, &flow.id).unwrap_err();
        assert!(matches!(err, NurtureError::ActivationBlocked { .. }));

        let core = core.with_capabilities(Arc::new(StaticCapabilities::new([Capability::EmailDelivery])));
        let activation = activate_flow(&core, &flow.id).unwrap();
        assert_eq!(activation.flow.status, FlowStatus::Active);
    }

    #[test]
    fn test_pause_resume_and_transitions() {
        let core = AppCore::in_memory().unwrap();
        let flow = draft(&core);

        let err = pause_flow(&core, &flow.id).unwrap_err();
        assert!(matches!(err, NurtureError::InvalidTransition { action: "pause", .. }));

        activate_flow(&core, &flow.id).unwrap();
        assert_eq!(pause_flow(&core, &flow.id).unwrap().status, FlowStatus::Paused);
        assert_eq!(resume_flow(&core, &flow.id).unwrap().flow.status, FlowStatus::Active);
        assert!(resume_flow(&core, &flow.id).is_err());
    }

    #[test]
    fn test_archive_exits_open_enrollments() {
        let core = AppCore::in_memory().unwrap();
        let flow = draft(&core);
        activate_flow(&core, &flow.id).unwrap();
        core.engine
            .ingest_event(StoredEvent::new("m1", "u1", "signup", 0), 0)
            .unwrap();
        let enrollment = core
            .storage
            .enrollments
            .list_by_flow(&flow.id, None)
            .unwrap()
            .remove(0);

        let archived = archive_flow(&core, &flow.id).unwrap();
        assert_eq!(archived.status, FlowStatus::Archived);
        assert_eq!(archived.metrics.exited, 1);
        assert_eq!(archived.metrics.active, 0);

        let stored = core.storage.enrollments.get(&enrollment.id).unwrap().unwrap();
        assert_eq!(stored.exit_reason.as_deref(), Some(EXIT_ARCHIVED));

        let mut edit = archived.clone();
        edit.name = "Renamed".to_string();
        assert!(matches!(save_flow(&core, &edit), Err(NurtureError::ArchivedFlow(_))));
    }

    #[test]
    fn test_duplicate_resets_state() {
        let core = AppCore::in_memory().unwrap();
        let flow = draft(&core);
        activate_flow(&core, &flow.id).unwrap();
        core.storage
            .flows
            .update_metrics(&flow.id, |metrics| metrics.enrolled = 7)
            .unwrap();

        let copy = duplicate_flow(&core, &flow.id).unwrap();
        assert_ne!(copy.id, flow.id);
        assert_eq!(copy.name, "Onboarding (copy)");
        assert_eq!(copy.status, FlowStatus::Draft);
        assert_eq!(copy.version, 1);
        assert_eq!(copy.metrics, FlowMetrics::default());
        assert_eq!(copy.nodes.len(), 3);
    }

    #[test]
    fn test_delete_cascades() {
        let core = AppCore::in_memory().unwrap();
        let flow = draft(&core);
        core.storage
            .enrollments
            .upsert(&FlowEnrollment::new(&flow.id, 1, "u1", "email", 0))
            .unwrap();

        assert_eq!(delete_flow(&core, &flow.id).unwrap(), 1);
        assert!(core.storage.enrollments.list_by_user("u1").unwrap().is_empty());
        assert!(matches!(get_flow(&core, &flow.id), Err(NurtureError::FlowNotFound(_))));
        assert!(matches!(delete_flow(&core, &flow.id), Err(NurtureError::FlowNotFound(_))));
    }

    #[test]
    fn test_delete_after_interrupted_cleanup() {
        let core = AppCore::in_memory().unwrap();
        let flow = draft(&core);
        core.storage
            .enrollments
            .upsert(&FlowEnrollment::new(&flow.id, 1, "u1", "email", 0))
            .unwrap();
        core.storage
            .enrollments
            .upsert(&FlowEnrollment::new(&flow.id, 1, "u2", "email", 0))
            .unwrap();
        core.storage.trigger_state.claim_day(&flow.id, "2030-01-01").unwrap();

        // A delete that stopped after removing the enrollments.
        core.storage.enrollments.delete_by_flow(&flow.id).unwrap();
        assert!(get_flow(&core, &flow.id).is_ok());

        assert_eq!(delete_flow(&core, &flow.id).unwrap(), 0);
        assert!(matches!(get_flow(&core, &flow.id), Err(NurtureError::FlowNotFound(_))));
        assert_eq!(core.storage.trigger_state.get(&flow.id).unwrap().last_swept_day, None);
    }
}
