use super::{ActionDispatcher, ActionRequest, DispatchResult};
use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;

/// Records every request it sees. Can be told to fail a number of calls first.
///
/// Handy for embedding tests and dry runs: nothing leaves the process.
#[derive(Debug, Default)]
pub struct RecordingDispatcher {
    requests: Mutex<Vec<ActionRequest>>,
    failures_left: Mutex<u32>,
}

impl RecordingDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` dispatches.
    pub fn failing(count: u32) -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
            failures_left: Mutex::new(count),
        }
    }

    pub fn requests(&self) -> Vec<ActionRequest> {
        self.requests.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.requests.lock().len()
    }

    /// Requests sent for one enrollment.
    pub fn for_enrollment(&self, enrollment_id: &str) -> Vec<ActionRequest> {
        self.requests
            .lock()
            .iter()
            .filter(|request| request.enrollment_id == enrollment_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ActionDispatcher for RecordingDispatcher {
    async fn dispatch(&self, request: &ActionRequest) -> Result<DispatchResult> {
        self.requests.lock().push(request.clone());

        let mut failures_left = self.failures_left.lock();
        if *failures_left > 0 {
            *failures_left -= 1;
            return Ok(DispatchResult::failure(format!(
                "Simulated failure on attempt {}",
                request.attempt
            )));
        }
        Ok(DispatchResult::success(Some(json!({
            "node": request.node_id,
            "attempt": request.attempt,
        }))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ActionConfig;
    use serde_json::Map;

    #[tokio::test]
    async fn test_scripted_failures() {
        let dispatcher = RecordingDispatcher::failing(1);
        let request = ActionRequest {
            flow_id: "flow".to_string(),
            enrollment_id: "e1".to_string(),
            node_id: "n1".to_string(),
            action: ActionConfig::AddTag {
                tag: "vip".to_string(),
            },
            user_id: "u1".to_string(),
            account_id: None,
            user: None,
            variables: Map::new(),
            attempt: 1,
        };

        assert!(!dispatcher.dispatch(&request).await.unwrap().ok);
        assert!(dispatcher.dispatch(&request).await.unwrap().ok);
        assert_eq!(dispatcher.count(), 2);
        assert_eq!(dispatcher.for_enrollment("e1").len(), 2);
        assert!(dispatcher.for_enrollment("e2").is_empty());
    }
}
