//! The health check registry.

use crate::core::{retry_async, HealthError, HealthResult, RetryConfig, Scheduler, Tick};
use crate::health::probe::HealthProbe;
use crate::health::result::{
    CheckReport, HealthCheckConfig, HealthCheckResult, HealthEvent, HealthReport, HealthStatus,
};

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const EVENT_CAPACITY: usize = 256;

struct RegisteredCheck {
    probe: Arc<dyn HealthProbe>,
    config: HealthCheckConfig,
    /// Cancels this check's loop when it is unregistered.
    token: Option<CancellationToken>,
    last_result: Option<HealthCheckResult>,
    consecutive_failures: u32,
}

struct Inner {
    checks: Mutex<HashMap<String, RegisteredCheck>>,
    scheduler: Mutex<Option<Arc<Scheduler>>>,
    events: broadcast::Sender<HealthEvent>,
}

impl Inner {
    fn checks(&self) -> MutexGuard<'_, HashMap<String, RegisteredCheck>> {
        self.checks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn scheduler(&self) -> Option<Arc<Scheduler>> {
        self.scheduler
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    async fn run_check(&self, id: &str) -> HealthResult<HealthCheckResult> {
        let (probe, config) = {
            let checks = self.checks();
            let check = checks
                .get(id)
                .ok_or_else(|| HealthError::UnknownCheck(id.to_string()))?;
            (Arc::clone(&check.probe), check.config.clone())
        };

        let started = Instant::now();
        let timeout = config.timeout;
        let retry = RetryConfig::linear(config.retries, config.retry_delay);
        let outcome = retry_async(&retry, || {
            let probe = Arc::clone(&probe);
            async move {
                match tokio::time::timeout(timeout, probe.check()).await {
                    Ok(result) => result,
                    Err(_) => Err(HealthError::Timeout {
                        check: id.to_string(),
                        timeout,
                    }),
                }
            }
        })
        .await;

        let result = match outcome {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(check = id, error = %e, "Health check failed after retries");
                HealthCheckResult::unhealthy(e.to_string())
            }
        }
        .with_duration(started.elapsed());

        self.record(id, &result);
        Ok(result)
    }

    fn record(&self, id: &str, result: &HealthCheckResult) {
        let (previous, criticality) = {
            let mut checks = self.checks();
            // Unregistered while the probe was running.
            let Some(check) = checks.get_mut(id) else {
                return;
            };
            let previous = check.last_result.as_ref().map(|r| r.status);
            check.last_result = Some(result.clone());
            if result.status.is_healthy() {
                check.consecutive_failures = 0;
            } else {
                check.consecutive_failures += 1;
            }
            (previous, check.config.criticality)
        };

        let event = if !result.status.is_healthy() {
            crate::audit::emit_health_failure(
                id,
                result.status,
                criticality,
                result.message.as_deref(),
            );
            Some(HealthEvent::Failure {
                check_id: id.to_string(),
                criticality,
                result: result.clone(),
            })
        } else if previous.is_some_and(|status| !status.is_healthy()) {
            crate::audit::emit_health_recovery(id, criticality);
            Some(HealthEvent::Recovery {
                check_id: id.to_string(),
                criticality,
                result: result.clone(),
            })
        } else {
            None
        };

        if let Some(event) = event {
            // No subscribers is fine.
            let _ = self.events.send(event);
        }
    }
}

/// Spawns the loop for check `id` on `scheduler`, returning its token.
fn schedule(
    inner: &Arc<Inner>,
    scheduler: &Scheduler,
    id: &str,
    config: &HealthCheckConfig,
) -> CancellationToken {
    let token = scheduler.child_token();
    let weak: Weak<Inner> = Arc::downgrade(inner);
    let id = id.to_string();
    scheduler.spawn_periodic(
        "health-check",
        token.clone(),
        config.interval,
        true,
        move || {
            let weak = Weak::clone(&weak);
            let id = id.clone();
            async move {
                let Some(inner) = weak.upgrade() else {
                    return Tick::Stop;
                };
                match inner.run_check(&id).await {
                    Ok(_) => Tick::Continue,
                    Err(_) => Tick::Stop,
                }
            }
        },
    );
    token
}

/// Runs registered health probes and aggregates their results.
///
/// Cloning the registry is cheap; all clones share the same checks.
///
/// # Example
///
/// ```rust,ignore
/// use bulwark::health::{HealthCheckConfig, HealthCheckRegistry, PoolProbe};
///
/// let registry = HealthCheckRegistry::new();
/// registry.register("db-pool", PoolProbe::new(pool.clone()), HealthCheckConfig::default())?;
/// registry.start();
///
/// let report = registry.report();
/// println!("{} ({:.0})", report.status, report.score);
/// ```
#[derive(Clone)]
pub struct HealthCheckRegistry {
    inner: Arc<Inner>,
}

impl Default for HealthCheckRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthCheckRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                checks: Mutex::new(HashMap::new()),
                scheduler: Mutex::new(None),
                events,
            }),
        }
    }

    /// Registers a check.
    ///
    /// If the registry is running, the check is scheduled immediately.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateCheck` if `id` is already registered.
    pub fn register(
        &self,
        id: impl Into<String>,
        probe: impl HealthProbe,
        config: HealthCheckConfig,
    ) -> HealthResult<()> {
        config.validate()?;
        let id = id.into();
        let scheduler = self.inner.scheduler();
        let mut checks = self.inner.checks();
        if checks.contains_key(&id) {
            return Err(HealthError::DuplicateCheck(id));
        }

        let token = scheduler
            .as_deref()
            .map(|scheduler| schedule(&self.inner, scheduler, &id, &config));

        tracing::debug!(
            check = %id,
            interval_ms = config.interval.as_millis() as u64,
            criticality = %config.criticality,
            "Registered health check"
        );
        checks.insert(
            id,
            RegisteredCheck {
                probe: Arc::new(probe),
                config,
                token,
                last_result: None,
                consecutive_failures: 0,
            },
        );
        Ok(())
    }

    /// Removes a check and stops its loop. Returns `false` if it was not
    /// registered.
    pub fn unregister(&self, id: &str) -> bool {
        match self.inner.checks().remove(id) {
            Some(check) => {
                if let Some(token) = check.token {
                    token.cancel();
                }
                true
            }
            None => false,
        }
    }

    /// Returns the ids of registered checks.
    pub fn check_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.checks().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Starts one loop per check; each runs immediately, then every
    /// `interval`. Does nothing if already running.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) {
        let scheduler = {
            let mut slot = self
                .inner
                .scheduler
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if slot.is_some() {
                return;
            }
            let scheduler = Arc::new(Scheduler::new("health"));
            *slot = Some(Arc::clone(&scheduler));
            scheduler
        };

        let mut checks = self.inner.checks();
        for (id, check) in checks.iter_mut() {
            check.token = Some(schedule(&self.inner, &scheduler, id, &check.config));
        }
        tracing::info!(checks = checks.len(), "Started health checks");
    }

    /// Stops every check loop and waits for them to finish.
    pub async fn stop(&self) {
        let scheduler = self
            .inner
            .scheduler
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(scheduler) = scheduler {
            for check in self.inner.checks().values_mut() {
                check.token = None;
            }
            scheduler.shutdown().await;
            tracing::info!("Stopped health checks");
        }
    }

    /// Returns `true` while the check loops are running.
    pub fn is_running(&self) -> bool {
        self.inner.scheduler().is_some()
    }

    /// Runs check `id` once, with timeout and retries, and records the
    /// result.
    ///
    /// Probe errors and timeouts are retried up to `retries` times, waiting
    /// `retry_delay × attempt` between attempts. If every attempt fails the
    /// recorded result is unhealthy and carries the last error.
    ///
    /// # Errors
    ///
    /// Returns `UnknownCheck` if `id` is not registered.
    pub async fn run_check(&self, id: &str) -> HealthResult<HealthCheckResult> {
        self.inner.run_check(id).await
    }

    /// Runs every registered check once, concurrently.
    pub async fn run_all(&self) -> BTreeMap<String, HealthCheckResult> {
        let ids = self.check_ids();
        let runs = ids.iter().map(|id| self.inner.run_check(id));
        let results = futures::future::join_all(runs).await;
        ids.into_iter()
            .zip(results)
            .filter_map(|(id, result)| result.ok().map(|r| (id, r)))
            .collect()
    }

    /// Returns the last result of check `id`, if it has run.
    pub fn last_result(&self, id: &str) -> Option<HealthCheckResult> {
        self.inner
            .checks()
            .get(id)
            .and_then(|check| check.last_result.clone())
    }

    /// Aggregates the latest results into a report.
    pub fn report(&self) -> HealthReport {
        let checks = self
            .inner
            .checks()
            .iter()
            .map(|(id, check)| {
                (
                    id.clone(),
                    CheckReport {
                        criticality: check.config.criticality,
                        last_result: check.last_result.clone(),
                        consecutive_failures: check.consecutive_failures,
                    },
                )
            })
            .collect();
        HealthReport::from_checks(checks)
    }

    /// Returns the overall status: the worst status among checks that have
    /// run.
    pub fn status(&self) -> HealthStatus {
        self.report().status
    }

    /// Subscribes to failure and recovery events.
    pub fn subscribe(&self) -> broadcast::Receiver<HealthEvent> {
        self.inner.events.subscribe()
    }
}

impl fmt::Debug for HealthCheckRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HealthCheckRegistry")
            .field("checks", &self.check_ids())
            .field("running", &self.is_running())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Severity;
    use crate::health::probe::probe_fn;
    use crate::mock::MockProbe;
    use std::time::Duration;

    fn config() -> HealthCheckConfig {
        HealthCheckConfig::new()
            .with_interval(Duration::from_secs(30))
            .with_timeout(Duration::from_secs(5))
            .with_retries(2, Duration::from_secs(1))
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_probe_reports_unhealthy_after_retries() {
        let registry = HealthCheckRegistry::new();
        let probe = MockProbe::new();
        probe.set_failing(true);
        registry.register("db", probe.clone(), config()).unwrap();
        let mut events = registry.subscribe();

        let started = Instant::now();
        let result = registry.run_check("db").await.unwrap();
        assert_eq!(result.status, HealthStatus::Unhealthy);
        assert_eq!(probe.check_count(), 3);
        // Retries wait 1s then 2s.
        assert_eq!(started.elapsed(), Duration::from_secs(3));

        match events.try_recv().unwrap() {
            HealthEvent::Failure {
                check_id, result, ..
            } => {
                assert_eq!(check_id, "db");
                assert_eq!(result.status, HealthStatus::Unhealthy);
            }
            other => panic!("unexpected event: {other:?}"),
        }

        probe.set_failing(false);
        let result = registry.run_check("db").await.unwrap();
        assert_eq!(result.status, HealthStatus::Healthy);
        registry.run_check("db").await.unwrap();

        let recoveries = std::iter::from_fn(|| events.try_recv().ok())
            .filter(|e| matches!(e, HealthEvent::Recovery { .. }))
            .count();
        assert_eq!(recoveries, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_timeout_is_retried() {
        let registry = HealthCheckRegistry::new();
        let probe = MockProbe::new().with_latency(Duration::from_secs(10));
        registry.register("slow", probe.clone(), config()).unwrap();

        let started = Instant::now();
        let result = registry.run_check("slow").await.unwrap();
        assert_eq!(result.status, HealthStatus::Unhealthy);
        assert!(result.message.unwrap().contains("timed out"));
        assert_eq!(probe.check_count(), 3);
        assert_eq!(started.elapsed(), Duration::from_secs(18));
        assert_eq!(result.duration, Duration::from_secs(18));
    }

    #[tokio::test(start_paused = true)]
    async fn test_degraded_result_is_not_retried() {
        let registry = HealthCheckRegistry::new();
        let probe = MockProbe::new();
        probe.set_status(HealthStatus::Degraded);
        registry.register("cache", probe.clone(), config()).unwrap();

        let result = registry.run_check("cache").await.unwrap();
        assert_eq!(result.status, HealthStatus::Degraded);
        assert_eq!(probe.check_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_loops_run_on_interval_until_stopped() {
        let registry = HealthCheckRegistry::new();
        let probe = MockProbe::new();
        registry.register("db", probe.clone(), config()).unwrap();

        registry.start();
        assert!(registry.is_running());
        tokio::time::sleep(Duration::from_secs(65)).await;
        assert_eq!(probe.check_count(), 3);

        let late = MockProbe::new();
        registry.register("late", late.clone(), config()).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(late.check_count(), 1);

        registry.stop().await;
        assert!(!registry.is_running());
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(probe.check_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unregister_stops_loop() {
        let registry = HealthCheckRegistry::new();
        let probe = MockProbe::new();
        registry.register("db", probe.clone(), config()).unwrap();
        registry.start();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(registry.unregister("db"));
        assert!(!registry.unregister("db"));
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(probe.check_count(), 1);
        registry.stop().await;
    }

    #[tokio::test]
    async fn test_registration_errors() {
        let registry = HealthCheckRegistry::new();
        let probe = || probe_fn(|| async { Ok(HealthCheckResult::healthy()) });
        registry.register("a", probe(), config()).unwrap();
        assert!(matches!(
            registry.register("a", probe(), config()),
            Err(HealthError::DuplicateCheck(_))
        ));
        assert!(matches!(
            registry.run_check("missing").await,
            Err(HealthError::UnknownCheck(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_or_timeout_is_rejected() {
        let registry = HealthCheckRegistry::new();
        registry.start();
        let probe = || probe_fn(|| async { Ok(HealthCheckResult::healthy()) });

        assert!(matches!(
            registry.register("a", probe(), config().with_interval(Duration::ZERO)),
            Err(HealthError::Configuration { .. })
        ));
        assert!(matches!(
            registry.register("a", probe(), config().with_timeout(Duration::ZERO)),
            Err(HealthError::Configuration { .. })
        ));
        assert!(registry.check_ids().is_empty());

        registry.register("a", probe(), config()).unwrap();
        registry.stop().await;
    }

    #[tokio::test]
    async fn test_report_weights_by_criticality() {
        let registry = HealthCheckRegistry::new();
        registry
            .register(
                "db",
                probe_fn(|| async { Ok(HealthCheckResult::healthy()) }),
                config().with_criticality(Severity::Critical),
            )
            .unwrap();
        registry
            .register(
                "cache",
                probe_fn(|| async { Ok(HealthCheckResult::unhealthy("down")) }),
                config().with_criticality(Severity::Low),
            )
            .unwrap();
        assert_eq!(registry.report().score, 100.0);

        let results = registry.run_all().await;
        assert_eq!(results.len(), 2);

        let report = registry.report();
        assert_eq!(report.status, HealthStatus::Unhealthy);
        assert!((report.score - 80.0).abs() < f64::EPSILON);
        assert_eq!(report.checks["cache"].consecutive_failures, 1);
    }
}
