use super::{ActionDispatcher, ActionRequest, DispatchResult};
use crate::models::{ActionConfig, UserProfile};
use crate::storage::UserDirectory;
use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use tracing::info;

/// Logs the action and reports success. Stands in for delivery channels an
/// installation has not wired up yet.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingDispatcher;

#[async_trait]
impl ActionDispatcher for LoggingDispatcher {
    async fn dispatch(&self, request: &ActionRequest) -> Result<DispatchResult> {
        info!(
            flow_id = %request.flow_id,
            enrollment_id = %request.enrollment_id,
            user_id = %request.user_id,
            action = %request.kind(),
            attempt = request.attempt,
            "Dispatching action"
        );
        Ok(DispatchResult::success(Some(json!({
            "action": request.kind().as_str(),
            "userId": request.user_id,
        }))))
    }
}

/// Applies `add_tag`, `remove_tag` and `update_user` to the user directory.
pub struct ProfileDispatcher {
    users: Arc<dyn UserDirectory>,
}

impl ProfileDispatcher {
    pub fn new(users: Arc<dyn UserDirectory>) -> Self {
        Self { users }
    }
}

#[async_trait]
impl ActionDispatcher for ProfileDispatcher {
    async fn dispatch(&self, request: &ActionRequest) -> Result<DispatchResult> {
        let mut apply: Box<dyn FnMut(&mut UserProfile) + Send> =
            match &request.action {
                ActionConfig::AddTag { tag } => {
                    let tag = tag.clone();
                    Box::new(move |profile: &mut UserProfile| {
                        profile.tags.insert(tag.clone());
                    })
                }
                ActionConfig::RemoveTag { tag } => {
                    let tag = tag.clone();
                    Box::new(move |profile: &mut UserProfile| {
                        profile.tags.remove(&tag);
                    })
                }
                ActionConfig::UpdateUser { properties } => {
                    let properties = properties.clone();
                    Box::new(move |profile: &mut UserProfile| {
                        for (key, value) in &properties {
                            profile.properties.insert(key.clone(), value.clone());
                        }
                    })
                }
                other => {
                    return Ok(DispatchResult::failure(format!(
                        "Profile dispatcher cannot handle {}",
                        other.kind()
                    )));
                }
            };

        let profile = self.users.update(&request.user_id, &mut *apply)?;
        Ok(DispatchResult::success(Some(json!({
            "userId": profile.user_id,
            "tags": profile.tags,
        }))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ActionKind;
    use crate::storage::InMemoryUserDirectory;
    use serde_json::Map;

    fn request(action: ActionConfig) -> ActionRequest {
        ActionRequest {
            flow_id: "flow".to_string(),
            enrollment_id: "e1".to_string(),
            node_id: "n1".to_string(),
            action,
            user_id: "u1".to_string(),
            account_id: None,
            user: None,
            variables: Map::new(),
            attempt: 1,
        }
    }

    #[tokio::test]
    async fn test_profile_dispatcher_mutates_directory() {
        let users = Arc::new(InMemoryUserDirectory::with_profiles([UserProfile::new("u1")]));
        let dispatcher = ProfileDispatcher::new(users.clone());

        let added = dispatcher
            .dispatch(&request(ActionConfig::AddTag {
                tag: "vip".to_string(),
            }))
            .await
            .unwrap();
        assert!(added.ok);
        assert!(users.get("u1").unwrap().unwrap().tags.contains("vip"));

        let mut properties = Map::new();
        properties.insert("plan".to_string(), json!("pro"));
        dispatcher
            .dispatch(&request(ActionConfig::UpdateUser { properties }))
            .await
            .unwrap();
        dispatcher
            .dispatch(&request(ActionConfig::RemoveTag {
                tag: "vip".to_string(),
            }))
            .await
            .unwrap();

        let profile = users.get("u1").unwrap().unwrap();
        assert!(profile.tags.is_empty());
        assert_eq!(profile.properties["plan"], json!("pro"));
    }

    #[tokio::test]
    async fn test_profile_dispatcher_rejects_other_kinds() {
        let dispatcher = ProfileDispatcher::new(Arc::new(InMemoryUserDirectory::new()));
        let result = dispatcher
            .dispatch(&request(ActionConfig::SendNotification {
                channel: "slack".to_string(),
                title: None,
                message: "hi".to_string(),
            }))
            .await
            .unwrap();

        assert!(!result.ok);
        assert_eq!(
            result.error.unwrap(),
            format!("Profile dispatcher cannot handle {}", ActionKind::SendNotification)
        );
    }

    #[tokio::test]
    async fn test_logging_dispatcher_succeeds() {
        let result = LoggingDispatcher
            .dispatch(&request(ActionConfig::CreateTask {
                title: "Call".to_string(),
                assignee: None,
                due_in_days: Some(2),
            }))
            .await
            .unwrap();
        assert!(result.ok);
        assert_eq!(result.output.unwrap()["action"], json!("create_task"));
    }
}
