//! Action dispatch: the seam between the engine and side effects.
//!
//! The engine only sequences, retries and records progress. Sending mail,
//! calling webhooks or touching user records happens behind
//! [`ActionDispatcher`] implementations registered per action kind.

mod builtin;
mod recording;

pub use builtin::{LoggingDispatcher, ProfileDispatcher};
pub use recording::RecordingDispatcher;

use crate::models::{ActionConfig, ActionKind, UserProfile};
use crate::storage::UserDirectory;
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// Everything a dispatcher gets to perform one action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionRequest {
    pub flow_id: String,
    pub enrollment_id: String,
    pub node_id: String,
    pub action: ActionConfig,
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<UserProfile>,
    #[serde(default)]
    pub variables: Map<String, Value>,
    /// 1-based attempt number.
    pub attempt: u32,
}

impl ActionRequest {
    pub fn kind(&self) -> ActionKind {
        self.action.kind()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchResult {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DispatchResult {
    pub fn success(output: Option<Value>) -> Self {
        Self {
            ok: true,
            output,
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            output: None,
            error: Some(error.into()),
        }
    }
}

/// Performs the side effect of an action node.
#[async_trait]
pub trait ActionDispatcher: Send + Sync {
    async fn dispatch(&self, request: &ActionRequest) -> Result<DispatchResult>;
}

/// Dispatchers keyed by action kind, with an optional catch-all.
#[derive(Default, Clone)]
pub struct ActionRegistry {
    dispatchers: HashMap<ActionKind, Arc<dyn ActionDispatcher>>,
    fallback: Option<Arc<dyn ActionDispatcher>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Profile mutations go to `users`; everything else is logged.
    pub fn with_defaults(users: Arc<dyn UserDirectory>) -> Self {
        let mut registry = Self::new();

        let profile = Arc::new(ProfileDispatcher::new(users));
        registry.register(ActionKind::AddTag, profile.clone());
        registry.register(ActionKind::RemoveTag, profile.clone());
        registry.register(ActionKind::UpdateUser, profile);
        registry.set_fallback(Arc::new(LoggingDispatcher));

        registry
    }

    pub fn register(&mut self, kind: ActionKind, dispatcher: Arc<dyn ActionDispatcher>) {
        self.dispatchers.insert(kind, dispatcher);
    }

    pub fn set_fallback(&mut self, dispatcher: Arc<dyn ActionDispatcher>) {
        self.fallback = Some(dispatcher);
    }

    pub fn get(&self, kind: ActionKind) -> Option<Arc<dyn ActionDispatcher>> {
        self.dispatchers
            .get(&kind)
            .or(self.fallback.as_ref())
            .cloned()
    }

    /// Dispatch and fold every failure mode into a [`DispatchResult`].
    pub async fn dispatch(&self, request: &ActionRequest) -> DispatchResult {
        let Some(dispatcher) = self.get(request.kind()) else {
            return DispatchResult::failure(format!(
                "No dispatcher registered for {}",
                request.kind()
            ));
        };

        match dispatcher.dispatch(request).await {
            Ok(result) => result,
            Err(e) => {
                warn!(
                    enrollment_id = %request.enrollment_id,
                    node_id = %request.node_id,
                    error = %e,
                    "Dispatcher returned an error"
                );
                DispatchResult::failure(e.to_string())
            }
        }
    }
}
