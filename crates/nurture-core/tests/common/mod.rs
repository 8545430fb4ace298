#![allow(dead_code)]

use nurture_core::dispatch::{ActionRegistry, RecordingDispatcher};
use nurture_core::engine::AutomationEngine;
use nurture_core::models::{FlowDefinition, FlowEdge, FlowNode, FlowStatus, NodeConfig};
use nurture_core::storage::{Storage, SystemConfig, UserDirectory};
use std::sync::Arc;

pub const MINUTE: i64 = 60_000;

/// 2030-01-01T00:00:00Z
pub const T0: i64 = 1_893_456_000_000;

pub struct Harness {
    pub storage: Arc<Storage>,
    pub engine: Arc<AutomationEngine>,
    pub recorder: Arc<RecordingDispatcher>,
}

pub fn harness() -> Harness {
    harness_with(SystemConfig::default())
}

pub fn harness_with(config: SystemConfig) -> Harness {
    let storage = Arc::new(Storage::in_memory().expect("failed to open storage"));
    let recorder = Arc::new(RecordingDispatcher::new());
    let engine = Arc::new(engine_over(&storage, &recorder, config));
    Harness {
        storage,
        engine,
        recorder,
    }
}

/// A second engine over the same storage, as another worker process would be.
pub fn engine_over(
    storage: &Arc<Storage>,
    recorder: &Arc<RecordingDispatcher>,
    config: SystemConfig,
) -> AutomationEngine {
    let mut dispatchers = ActionRegistry::new();
    dispatchers.set_fallback(recorder.clone());
    let users: Arc<dyn UserDirectory> = Arc::new(storage.users.clone());
    AutomationEngine::new(storage.clone(), users, dispatchers, config)
}

pub fn node(id: &str, config: NodeConfig) -> FlowNode {
    FlowNode::new(id, id, config)
}

pub fn edge(source: &str, target: &str) -> FlowEdge {
    FlowEdge::new(source, target)
}

/// Store an active flow built from `nodes` and `edges`.
pub fn active_flow(
    storage: &Storage,
    name: &str,
    nodes: Vec<FlowNode>,
    edges: Vec<FlowEdge>,
) -> FlowDefinition {
    let mut flow = FlowDefinition::new(name);
    flow.status = FlowStatus::Active;
    flow.nodes = nodes;
    flow.edges = edges;
    match storage.flows.save(&flow, T0).expect("failed to save flow") {
        nurture_core::storage::SaveOutcome::Saved(saved) => saved,
        other => panic!("unexpected save outcome: {other:?}"),
    }
}
