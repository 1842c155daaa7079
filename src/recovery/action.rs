//! Recovery actions and the handlers that carry them out.

use crate::core::types::duration_ms;
use crate::core::BoxError;
use crate::recovery::issue::Issue;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::future::Future;
use std::time::Duration;

/// The kind of a recovery action. Handlers are registered per kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// Restart a service or reconnect a client.
    RestartService,
    /// Drop cached state, such as idle pooled resources.
    ClearCache,
    /// Change capacity, such as pool bounds.
    ScaleResources,
    /// Switch traffic to a standby.
    Failover,
    /// Shed or slow incoming load.
    ThrottleRequests,
    /// A caller-defined action.
    Custom(String),
}

impl ActionKind {
    /// Creates a custom action kind.
    pub fn custom(name: impl Into<String>) -> Self {
        Self::Custom(name.into())
    }

    /// Returns the name of the action kind.
    pub fn as_str(&self) -> &str {
        match self {
            Self::RestartService => "restart_service",
            Self::ClearCache => "clear_cache",
            Self::ScaleResources => "scale_resources",
            Self::Failover => "failover",
            Self::ThrottleRequests => "throttle_requests",
            Self::Custom(name) => name,
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One step of a recovery strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryAction {
    /// What to do.
    pub kind: ActionKind,

    /// Parameters passed to the handler.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub config: Map<String, Value>,

    /// Deadline for the handler.
    #[serde(with = "duration_ms")]
    pub timeout: Duration,

    /// A failing critical action aborts the rest of the strategy.
    #[serde(default)]
    pub critical: bool,
}

impl RecoveryAction {
    /// Creates a non-critical action with a 30 second timeout.
    pub fn new(kind: ActionKind) -> Self {
        Self {
            kind,
            config: Map::new(),
            timeout: Duration::from_secs(30),
            critical: false,
        }
    }

    /// Adds a parameter.
    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    /// Sets the timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Marks the action as critical.
    pub fn critical(mut self) -> Self {
        self.critical = true;
        self
    }
}

/// What a handler is asked to do.
#[derive(Debug, Clone)]
pub struct ActionRequest {
    /// The action, parameters included.
    pub action: RecoveryAction,
    /// The issue being recovered from.
    pub issue: Issue,
    /// The strategy running the action.
    pub strategy_id: String,
    /// The execution the action belongs to.
    pub execution_id: String,
}

impl ActionRequest {
    /// Returns a parameter of the action.
    pub fn param(&self, key: &str) -> Option<&Value> {
        self.action.config.get(key)
    }
}

/// Carries out recovery actions of one or more kinds.
///
/// # Example Implementation
///
/// ```rust,ignore
/// use bulwark::recovery::{ActionHandler, ActionRequest};
/// use bulwark::core::BoxError;
/// use async_trait::async_trait;
///
/// struct Restarter { supervisor: Supervisor }
///
/// #[async_trait]
/// impl ActionHandler for Restarter {
///     async fn execute(&self, request: &ActionRequest) -> Result<(), BoxError> {
///         self.supervisor.restart(&request.issue.source).await?;
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait ActionHandler: Send + Sync + 'static {
    /// Performs the action.
    async fn execute(&self, request: &ActionRequest) -> Result<(), BoxError>;
}

/// A handler backed by a closure. See [`handler_fn`].
pub struct FnHandler<F> {
    f: F,
}

/// Wraps an async closure as an [`ActionHandler`].
///
/// The closure receives an owned copy of the request.
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(ActionRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    FnHandler { f }
}

#[async_trait]
impl<F, Fut> ActionHandler for FnHandler<F>
where
    F: Fn(ActionRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    async fn execute(&self, request: &ActionRequest) -> Result<(), BoxError> {
        (self.f)(request.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_kind_names() {
        assert_eq!(ActionKind::ClearCache.as_str(), "clear_cache");
        assert_eq!(ActionKind::custom("page_oncall").to_string(), "page_oncall");
        assert_eq!(
            serde_json::to_value(ActionKind::ScaleResources).unwrap(),
            "scale_resources"
        );
    }

    #[test]
    fn test_action_builder() {
        let action = RecoveryAction::new(ActionKind::ScaleResources)
            .with_config("max_size", 20)
            .with_timeout(Duration::from_secs(5))
            .critical();
        assert!(action.critical);
        assert_eq!(action.config["max_size"], 20);

        let json = serde_json::to_value(&action).unwrap();
        assert_eq!(json["timeout"], 5000);
        let back: RecoveryAction = serde_json::from_value(json).unwrap();
        assert_eq!(back, action);
    }
}
