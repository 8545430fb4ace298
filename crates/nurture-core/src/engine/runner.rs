//! Background loop that ticks the engine on an interval.

use super::AutomationEngine;
use anyhow::{Result, anyhow};
use nurture_storage::time_utils;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{Duration, MissedTickBehavior, interval};
use tracing::{debug, error, info};

/// Message types for controlling the runner
#[derive(Debug)]
pub enum RunnerCommand {
    /// Stop the runner
    Stop,
    /// Tick immediately instead of waiting for the next interval
    CheckNow,
}

/// Handle to control a running [`EngineRunner`]
#[derive(Clone)]
pub struct RunnerHandle {
    command_tx: mpsc::Sender<RunnerCommand>,
}

impl RunnerHandle {
    /// Stop the runner
    pub async fn stop(&self) -> Result<()> {
        self.command_tx
            .send(RunnerCommand::Stop)
            .await
            .map_err(|e| anyhow!("Failed to send stop command: {}", e))
    }

    /// Trigger an immediate tick
    pub async fn check_now(&self) -> Result<()> {
        self.command_tx
            .send(RunnerCommand::CheckNow)
            .await
            .map_err(|e| anyhow!("Failed to send check command: {}", e))
    }
}

/// Calls [`AutomationEngine::tick`] every `poll_interval_ms`.
pub struct EngineRunner {
    engine: Arc<AutomationEngine>,
    poll_interval: Duration,
}

impl EngineRunner {
    pub fn new(engine: Arc<AutomationEngine>) -> Self {
        let poll_interval = Duration::from_millis(engine.config().poll_interval_ms.max(1));
        Self {
            engine,
            poll_interval,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Start the runner and return a handle for controlling it
    pub fn start(self: Arc<Self>) -> RunnerHandle {
        let (command_tx, command_rx) = mpsc::channel(32);
        let runner = self.clone();

        tokio::spawn(async move {
            runner.run_loop(command_rx).await;
        });

        RunnerHandle { command_tx }
    }

    async fn run_loop(self: Arc<Self>, mut command_rx: mpsc::Receiver<RunnerCommand>) {
        let mut poll_interval = interval(self.poll_interval);
        poll_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            "EngineRunner started (poll_interval={}ms, workers={})",
            self.poll_interval.as_millis(),
            self.engine.config().worker_count
        );

        loop {
            tokio::select! {
                _ = poll_interval.tick() => {
                    self.tick().await;
                }
                cmd = command_rx.recv() => {
                    match cmd {
                        Some(RunnerCommand::Stop) => {
                            info!("EngineRunner stopping...");
                            break;
                        }
                        Some(RunnerCommand::CheckNow) => {
                            debug!("Manual tick triggered");
                            self.tick().await;
                        }
                        None => {
                            info!("Command channel closed, stopping runner");
                            break;
                        }
                    }
                }
            }
        }

        info!("EngineRunner stopped");
    }

    async fn tick(&self) {
        match self.engine.tick(time_utils::now_ms()).await {
            Ok(report) => debug!(?report, "Tick finished"),
            Err(e) => error!(error = %e, "Tick failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{ActionRegistry, RecordingDispatcher};
    use crate::models::{
        ActionConfig, EnrollmentStatus, FlowDefinition, FlowEdge, FlowNode, FlowStatus,
        NodeConfig, TriggerConfig, TriggerKind,
    };
    use crate::storage::{Storage, SystemConfig, UserDirectory};

    fn manual_flow() -> FlowDefinition {
        let mut flow = FlowDefinition::new("Manual welcome");
        flow.status = FlowStatus::Active;
        flow.nodes = vec![
            FlowNode::new("t", "Manual", NodeConfig::Trigger(TriggerConfig::new(TriggerKind::Manual))),
            FlowNode::new(
                "email",
                "Welcome",
                NodeConfig::Action(ActionConfig::SendEmail {
                    template_id: "welcome".to_string(),
                    subject: None,
                    from_name: None,
                }),
            ),
        ];
        flow.edges = vec![FlowEdge::new("t", "email")];
        flow
    }

    #[tokio::test]
    async fn test_runner_start_stop() {
        let storage = Arc::new(Storage::in_memory().unwrap());
        let engine = Arc::new(AutomationEngine::from_storage(storage).unwrap());
        let runner = Arc::new(EngineRunner::new(engine).with_poll_interval(Duration::from_millis(50)));

        let handle = runner.start();
        tokio::time::sleep(Duration::from_millis(120)).await;
        handle.stop().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn test_check_now_advances_enrollments() {
        let storage = Arc::new(Storage::in_memory().unwrap());
        let flow = manual_flow();
        storage.flows.save(&flow, 0).unwrap();

        let recorder = Arc::new(RecordingDispatcher::new());
        let mut dispatchers = ActionRegistry::new();
        dispatchers.set_fallback(recorder.clone());
        let users: Arc<dyn UserDirectory> = Arc::new(storage.users.clone());
        let engine = Arc::new(AutomationEngine::new(
            storage.clone(),
            users,
            dispatchers,
            SystemConfig::default(),
        ));

        let enrollment = engine
            .enroll_manually(&flow.id, "u1", time_utils::now_ms())
            .unwrap()
            .unwrap();

        let runner = Arc::new(EngineRunner::new(engine).with_poll_interval(Duration::from_secs(3600)));
        let handle = runner.start();
        handle.check_now().await.unwrap();

        let mut status = EnrollmentStatus::Active;
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            status = storage.enrollments.get(&enrollment.id).unwrap().unwrap().status;
            if status.is_terminal() {
                break;
            }
        }
        handle.stop().await.unwrap();

        assert_eq!(status, EnrollmentStatus::Completed);
        assert_eq!(recorder.count(), 1);
    }
}
