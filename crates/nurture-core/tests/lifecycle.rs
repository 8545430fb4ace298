mod common;

use common::{MINUTE, T0, edge, harness, node};
use nurture_core::AppCore;
use nurture_core::engine::scheduler::EXIT_DISQUALIFIED;
use nurture_core::models::{
    ActionConfig, DelayConfig, EnrollmentStatus, ExitConfig, FlowStatus, NodeConfig, StoredEvent,
    TriggerConfig, TriggerKind,
};
use nurture_core::services::flow::{activate_flow, create_flow, pause_flow, resume_flow, save_flow};

fn delayed_email_nodes(trigger: TriggerKind) -> Vec<nurture_core::models::FlowNode> {
    vec![
        node("t", NodeConfig::Trigger(TriggerConfig::new(trigger))),
        node(
            "wait",
            NodeConfig::Delay(DelayConfig::FixedDuration {
                duration_minutes: 10,
            }),
        ),
        node(
            "email",
            NodeConfig::Action(ActionConfig::SendEmail {
                template_id: "nudge".to_string(),
                subject: None,
                from_name: None,
            }),
        ),
        node(
            "x",
            NodeConfig::Exit(ExitConfig {
                reason: Some("sent".to_string()),
            }),
        ),
    ]
}

#[tokio::test]
async fn paused_flow_keeps_state_and_resumes_in_place() {
    let h = harness();
    let core = AppCore::from_storage(h.storage.clone())
        .unwrap()
        .with_engine(common::engine_over(
            &h.storage,
            &h.recorder,
            nurture_core::storage::SystemConfig::default(),
        ));

    let mut flow = create_flow(&core, "Nudge").unwrap();
    flow.nodes = delayed_email_nodes(TriggerKind::EventReceived {
        event_name: "signup".to_string(),
    });
    flow.edges = vec![edge("t", "wait"), edge("wait", "email"), edge("email", "x")];
    let flow = save_flow(&core, &flow).unwrap();
    activate_flow(&core, &flow.id).unwrap();

    core.engine
        .ingest_event(StoredEvent::new("m1", "u1", "signup", T0), T0)
        .unwrap();
    core.engine.process_due(T0).await.unwrap();
    let parked = core.storage.enrollments.list_by_flow(&flow.id, None).unwrap().remove(0);
    assert_eq!(parked.current_node_id, "wait");

    assert_eq!(pause_flow(&core, &flow.id).unwrap().status, FlowStatus::Paused);

    core.engine
        .ingest_event(StoredEvent::new("m2", "u2", "signup", T0 + MINUTE), T0 + MINUTE)
        .unwrap();
    let report = core.engine.process_due(T0 + 20 * MINUTE).await.unwrap();
    assert_eq!(report.due, 0);

    let held = core.storage.enrollments.get(&parked.id).unwrap().unwrap();
    assert_eq!(held.current_node_id, "wait");
    assert_eq!(held.revision, parked.revision);
    assert_eq!(core.storage.enrollments.list_by_flow(&flow.id, None).unwrap().len(), 1);
    assert_eq!(h.recorder.count(), 0);

    resume_flow(&core, &flow.id).unwrap();
    core.engine.process_due(T0 + 20 * MINUTE).await.unwrap();

    let done = core.storage.enrollments.get(&parked.id).unwrap().unwrap();
    assert_eq!(done.status, EnrollmentStatus::Exited);
    assert_eq!(done.exit_reason.as_deref(), Some("sent"));
    assert_eq!(h.recorder.count(), 1);
}

#[tokio::test]
async fn leaving_entry_segment_exits_parked_enrollment() {
    let h = harness();
    let flow = common::active_flow(
        &h.storage,
        "Beta onboarding",
        delayed_email_nodes(TriggerKind::SegmentEntry {
            segment_id: "beta".to_string(),
        }),
        vec![edge("t", "wait"), edge("wait", "email"), edge("email", "x")],
    );

    let created = h.engine.enter_segment("u1", "beta", T0).unwrap();
    assert_eq!(created.len(), 1);
    assert!(h.engine.enter_segment("u1", "beta", T0).unwrap().is_empty());

    h.engine.process_due(T0).await.unwrap();
    assert_eq!(h.engine.leave_segment("u1", "beta", T0 + MINUTE).unwrap(), 1);

    let exited = h.storage.enrollments.get(&created[0].id).unwrap().unwrap();
    assert_eq!(exited.status, EnrollmentStatus::Exited);
    assert_eq!(exited.exit_reason.as_deref(), Some(EXIT_DISQUALIFIED));

    h.engine.process_due(T0 + 20 * MINUTE).await.unwrap();
    assert_eq!(h.recorder.count(), 0);

    let metrics = h.storage.flows.get(&flow.id).unwrap().unwrap().metrics;
    assert_eq!(metrics.exited, 1);
    assert_eq!(metrics.active, 0);
}

#[tokio::test]
async fn lifecycle_trigger_matches_target_state() {
    let h = harness();
    let flow = common::active_flow(
        &h.storage,
        "Win back",
        delayed_email_nodes(TriggerKind::LifecycleChange {
            lifecycle_from: Vec::new(),
            lifecycle_to: vec!["churned".to_string()],
        }),
        vec![edge("t", "wait"), edge("wait", "email"), edge("email", "x")],
    );

    assert!(h.engine.change_lifecycle("u1", "active", T0).unwrap().is_empty());
    let created = h.engine.change_lifecycle("u1", "Churned", T0).unwrap();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].flow_id, flow.id);
    assert!(h.engine.change_lifecycle("u1", "Churned", T0).unwrap().is_empty());

    h.engine.process_due(T0).await.unwrap();
    h.engine.change_lifecycle("u1", "active", T0 + MINUTE).unwrap();
    let exited = h.storage.enrollments.get(&created[0].id).unwrap().unwrap();
    assert_eq!(exited.status, EnrollmentStatus::Exited);
}

#[tokio::test]
async fn lifecycle_trigger_with_several_target_states() {
    let h = harness();
    let trigger: TriggerKind = serde_json::from_value(serde_json::json!({
        "kind": "lifecycle_change",
        "lifecycleTo": ["AtRisk", "Churned"]
    }))
    .unwrap();
    let flow = common::active_flow(
        &h.storage,
        "Retention",
        delayed_email_nodes(trigger),
        vec![edge("t", "wait"), edge("wait", "email"), edge("email", "x")],
    );

    assert!(h.engine.change_lifecycle("u1", "Active", T0).unwrap().is_empty());
    assert!(h.engine.change_lifecycle("u2", "Trial", T0).unwrap().is_empty());

    let at_risk = h.engine.change_lifecycle("u1", "AtRisk", T0).unwrap();
    let churned = h.engine.change_lifecycle("u2", "churned", T0).unwrap();
    assert_eq!(at_risk.len(), 1);
    assert_eq!(churned.len(), 1);
    assert_eq!(at_risk[0].flow_id, flow.id);

    h.engine.process_due(T0).await.unwrap();

    // Moving between target states keeps the enrollment.
    h.engine.change_lifecycle("u1", "Churned", T0 + MINUTE).unwrap();
    let still_active = h.storage.enrollments.get(&at_risk[0].id).unwrap().unwrap();
    assert_eq!(still_active.status, EnrollmentStatus::Active);

    // Leaving the target set exits it.
    h.engine.change_lifecycle("u2", "Active", T0 + MINUTE).unwrap();
    let exited = h.storage.enrollments.get(&churned[0].id).unwrap().unwrap();
    assert_eq!(exited.status, EnrollmentStatus::Exited);
    assert_eq!(exited.exit_reason.as_deref(), Some(EXIT_DISQUALIFIED));

    h.engine.process_due(T0 + 20 * MINUTE).await.unwrap();
    assert_eq!(h.recorder.count(), 1);
}

#[tokio::test]
async fn lifecycle_trigger_restricted_by_source_state() {
    let h = harness();
    common::active_flow(
        &h.storage,
        "Converted",
        delayed_email_nodes(TriggerKind::LifecycleChange {
            lifecycle_from: vec!["Trial".to_string()],
            lifecycle_to: vec!["Active".to_string()],
        }),
        vec![edge("t", "wait"), edge("wait", "email"), edge("email", "x")],
    );

    assert!(h.engine.change_lifecycle("u1", "Active", T0).unwrap().is_empty());
    h.engine.change_lifecycle("u2", "Trial", T0).unwrap();
    assert_eq!(h.engine.change_lifecycle("u2", "Active", T0).unwrap().len(), 1);
}
