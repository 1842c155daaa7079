//! Mock collaborators for testing.
//!
//! These mocks stand in for real resources, probes and recovery handlers so
//! pools, health checks and recovery strategies can be exercised without
//! external systems. Every mock is cheap to clone and clones share state,
//! so a test can keep a handle while the component under test owns another.
//!
//! # Examples
//!
//! ```rust
//! use bulwark::mock::{MockFactory, MockProbe};
//! use std::time::Duration;
//!
//! let factory = MockFactory::new().with_latency(Duration::from_millis(5));
//! let probe = MockProbe::new();
//! probe.set_failing(true);
//! assert_eq!(factory.created(), 0);
//! ```

use crate::core::{BoxError, HealthError, ResourceFactory};
use crate::health::{HealthCheckResult, HealthProbe, HealthStatus};
use crate::recovery::{ActionHandler, ActionRequest};

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A resource produced by [`MockFactory`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockConnection {
    /// Sequence number, starting at 0.
    pub id: u64,
    /// Number of times the pool cleaned this connection.
    pub cleanups: u64,
}

#[derive(Debug, Default)]
struct FactoryState {
    created: AtomicU64,
    destroyed: AtomicU64,
    failing: AtomicBool,
    invalid: AtomicBool,
}

/// A [`ResourceFactory`] producing [`MockConnection`]s.
#[derive(Debug, Clone, Default)]
pub struct MockFactory {
    state: Arc<FactoryState>,
    latency: Option<Duration>,
}

impl MockFactory {
    /// Creates a factory that always succeeds.
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays every `create` call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Makes `create` fail while set.
    pub fn set_failing(&self, failing: bool) {
        self.state.failing.store(failing, Ordering::SeqCst);
    }

    /// Makes `validate` reject every connection while set.
    pub fn set_invalid(&self, invalid: bool) {
        self.state.invalid.store(invalid, Ordering::SeqCst);
    }

    /// Returns the number of connections created.
    pub fn created(&self) -> u64 {
        self.state.created.load(Ordering::SeqCst)
    }

    /// Returns the number of connections destroyed.
    pub fn destroyed(&self) -> u64 {
        self.state.destroyed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ResourceFactory for MockFactory {
    type Resource = MockConnection;

    async fn create(&self) -> Result<MockConnection, BoxError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if self.state.failing.load(Ordering::SeqCst) {
            return Err("mock factory failure".into());
        }
        let id = self.state.created.fetch_add(1, Ordering::SeqCst);
        Ok(MockConnection { id, cleanups: 0 })
    }

    async fn cleanup(&self, resource: &mut MockConnection) {
        resource.cleanups += 1;
    }

    async fn validate(&self, _resource: &MockConnection) -> bool {
        !self.state.invalid.load(Ordering::SeqCst)
    }

    async fn destroy(&self, _resource: MockConnection) {
        self.state.destroyed.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Debug)]
struct ProbeState {
    status: Mutex<HealthStatus>,
    failing: AtomicBool,
    checks: AtomicU64,
}

/// A [`HealthProbe`] whose answer is set by the test.
#[derive(Debug, Clone)]
pub struct MockProbe {
    state: Arc<ProbeState>,
    latency: Option<Duration>,
}

impl Default for MockProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl MockProbe {
    /// Creates a probe that reports healthy.
    pub fn new() -> Self {
        Self {
            state: Arc::new(ProbeState {
                status: Mutex::new(HealthStatus::Healthy),
                failing: AtomicBool::new(false),
                checks: AtomicU64::new(0),
            }),
            latency: None,
        }
    }

    /// Delays every check.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Makes the probe return an error while set.
    pub fn set_failing(&self, failing: bool) {
        self.state.failing.store(failing, Ordering::SeqCst);
    }

    /// Sets the status reported when not failing.
    pub fn set_status(&self, status: HealthStatus) {
        *self
            .state
            .status
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = status;
    }

    /// Returns the number of checks started.
    pub fn check_count(&self) -> u64 {
        self.state.checks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HealthProbe for MockProbe {
    async fn check(&self) -> Result<HealthCheckResult, HealthError> {
        self.state.checks.fetch_add(1, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if self.state.failing.load(Ordering::SeqCst) {
            return Err(HealthError::probe_failed("mock probe failure"));
        }
        let status = *self
            .state
            .status
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(HealthCheckResult::new(status))
    }
}

#[derive(Debug, Default)]
struct HandlerState {
    calls: Mutex<Vec<ActionRequest>>,
    failing: AtomicBool,
}

/// An [`ActionHandler`] that records every request.
#[derive(Debug, Clone, Default)]
pub struct MockActionHandler {
    state: Arc<HandlerState>,
    latency: Option<Duration>,
}

impl MockActionHandler {
    /// Creates a handler that always succeeds.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a handler that always fails.
    pub fn failing() -> Self {
        let handler = Self::new();
        handler.set_failing(true);
        handler
    }

    /// Delays every execution.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Makes the handler fail while set.
    pub fn set_failing(&self, failing: bool) {
        self.state.failing.store(failing, Ordering::SeqCst);
    }

    /// Returns the requests received so far.
    pub fn calls(&self) -> Vec<ActionRequest> {
        self.state
            .calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Returns the number of requests received.
    pub fn call_count(&self) -> usize {
        self.state
            .calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

#[async_trait]
impl ActionHandler for MockActionHandler {
    async fn execute(&self, request: &ActionRequest) -> Result<(), BoxError> {
        self.state
            .calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(request.clone());
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if self.state.failing.load(Ordering::SeqCst) {
            return Err(format!("mock handler failed {}", request.action.kind).into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_factory() {
        let factory = MockFactory::new();
        let mut conn = factory.create().await.unwrap();
        assert_eq!(conn.id, 0);
        factory.cleanup(&mut conn).await;
        assert_eq!(conn.cleanups, 1);
        assert!(factory.validate(&conn).await);

        factory.set_invalid(true);
        assert!(!factory.validate(&conn).await);
        factory.destroy(conn).await;
        assert_eq!(factory.destroyed(), 1);

        factory.set_failing(true);
        assert!(factory.create().await.is_err());
        assert_eq!(factory.created(), 1);
    }

    #[tokio::test]
    async fn test_mock_probe() {
        let probe = MockProbe::new();
        assert_eq!(probe.check().await.unwrap().status, HealthStatus::Healthy);

        probe.set_status(HealthStatus::Degraded);
        assert_eq!(probe.check().await.unwrap().status, HealthStatus::Degraded);

        probe.set_failing(true);
        assert!(matches!(
            probe.check().await,
            Err(HealthError::ProbeFailed { .. })
        ));
        assert_eq!(probe.check_count(), 3);
    }
}
