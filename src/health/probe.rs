//! Health probes.

use crate::circuit_breaker::{CircuitBreaker, CircuitPhase};
use crate::core::{HealthError, ResourceFactory};
use crate::health::result::HealthCheckResult;
use crate::pool::ResourcePool;

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;

/// A check the [`HealthCheckRegistry`](crate::health::HealthCheckRegistry)
/// runs periodically.
///
/// Returning `Err` (or overrunning the configured timeout) triggers a retry.
/// A returned degraded or unhealthy result is accepted as is.
#[async_trait]
pub trait HealthProbe: Send + Sync + 'static {
    /// Runs the check once.
    async fn check(&self) -> Result<HealthCheckResult, HealthError>;
}

/// A probe backed by a closure. See [`probe_fn`].
pub struct FnProbe<F> {
    f: F,
}

/// Wraps an async closure as a [`HealthProbe`].
///
/// ```rust,ignore
/// let probe = probe_fn(|| async { Ok(HealthCheckResult::healthy()) });
/// ```
pub fn probe_fn<F, Fut>(f: F) -> FnProbe<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<HealthCheckResult, HealthError>> + Send + 'static,
{
    FnProbe { f }
}

#[async_trait]
impl<F, Fut> HealthProbe for FnProbe<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<HealthCheckResult, HealthError>> + Send + 'static,
{
    async fn check(&self) -> Result<HealthCheckResult, HealthError> {
        (self.f)().await
    }
}

/// Reports the state of a [`ResourcePool`].
///
/// Unhealthy once the pool is closed; degraded while acquisitions are
/// queued or utilization is at or above the threshold.
pub struct PoolProbe<F: ResourceFactory> {
    pool: ResourcePool<F>,
    utilization_threshold: f64,
}

impl<F: ResourceFactory> PoolProbe<F> {
    /// Creates a probe with a 90% utilization threshold.
    pub fn new(pool: ResourcePool<F>) -> Self {
        Self {
            pool,
            utilization_threshold: 0.9,
        }
    }

    /// Sets the utilization (0.0 to 1.0) at which the pool reports degraded.
    pub fn with_utilization_threshold(mut self, threshold: f64) -> Self {
        self.utilization_threshold = threshold.clamp(0.0, 1.0);
        self
    }
}

#[async_trait]
impl<F: ResourceFactory> HealthProbe for PoolProbe<F> {
    async fn check(&self) -> Result<HealthCheckResult, HealthError> {
        let stats = self.pool.stats();
        let utilization = stats.utilization();

        let result = if stats.closed {
            HealthCheckResult::unhealthy(format!("pool '{}' is closed", stats.name))
        } else if stats.pending > 0 {
            HealthCheckResult::degraded(format!(
                "{} acquisitions waiting on pool '{}'",
                stats.pending, stats.name
            ))
        } else if utilization >= self.utilization_threshold {
            HealthCheckResult::degraded(format!(
                "pool '{}' is {:.0}% utilized",
                stats.name,
                utilization * 100.0
            ))
        } else {
            HealthCheckResult::healthy()
        };

        Ok(result
            .with_detail("total", stats.total)
            .with_detail("available", stats.available)
            .with_detail("borrowed", stats.borrowed)
            .with_detail("pending", stats.pending)
            .with_detail("utilization", utilization))
    }
}

/// Reports the phase of a [`CircuitBreaker`]: closed is healthy, half-open
/// degraded, open unhealthy.
pub struct CircuitProbe {
    breaker: Arc<CircuitBreaker>,
}

impl CircuitProbe {
    /// Creates a probe for `breaker`.
    pub fn new(breaker: Arc<CircuitBreaker>) -> Self {
        Self { breaker }
    }
}

#[async_trait]
impl HealthProbe for CircuitProbe {
    async fn check(&self) -> Result<HealthCheckResult, HealthError> {
        let state = self.breaker.state();
        let name = self.breaker.name();
        let result = match state.phase {
            CircuitPhase::Closed => HealthCheckResult::healthy(),
            CircuitPhase::HalfOpen => {
                HealthCheckResult::degraded(format!("circuit '{name}' is half-open"))
            }
            CircuitPhase::Open => HealthCheckResult::unhealthy(format!("circuit '{name}' is open")),
        };
        Ok(result
            .with_detail("phase", state.phase.as_str())
            .with_detail("window_calls", state.window_calls)
            .with_detail("window_failures", state.window_failures))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::CircuitBreakerConfig;
    use crate::health::HealthStatus;
    use crate::mock::MockFactory;
    use crate::pool::PoolConfig;

    #[tokio::test]
    async fn test_probe_fn() {
        let probe = probe_fn(|| async { Ok(HealthCheckResult::degraded("warming up")) });
        let result = probe.check().await.unwrap();
        assert_eq!(result.status, HealthStatus::Degraded);
    }

    #[tokio::test]
    async fn test_circuit_probe() {
        let breaker = Arc::new(CircuitBreaker::new(CircuitBreakerConfig::new()));
        let probe = CircuitProbe::new(Arc::clone(&breaker));
        assert_eq!(probe.check().await.unwrap().status, HealthStatus::Healthy);

        breaker.force_open();
        let result = probe.check().await.unwrap();
        assert_eq!(result.status, HealthStatus::Unhealthy);
        assert_eq!(result.details["phase"], "open");
    }

    #[tokio::test]
    async fn test_pool_probe() {
        let config = PoolConfig::new()
            .with_size(0, 2)
            .with_reap_interval(None);
        let pool = ResourcePool::new(MockFactory::new(), config).await.unwrap();
        let probe = PoolProbe::new(pool.clone()).with_utilization_threshold(0.5);
        assert_eq!(probe.check().await.unwrap().status, HealthStatus::Healthy);

        let held = pool.acquire().await.unwrap();
        assert_eq!(probe.check().await.unwrap().status, HealthStatus::Degraded);

        pool.release(held).await.unwrap();
        pool.close().await;
        assert_eq!(probe.check().await.unwrap().status, HealthStatus::Unhealthy);
    }
}
