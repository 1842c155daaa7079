//! Circuit breaker implementation.

use crate::circuit_breaker::config::CircuitBreakerConfig;
use crate::circuit_breaker::state::{
    BreakerMetrics, BreakerState, CallWindow, CircuitEvent, CircuitPhase, CircuitState,
};
use crate::core::CircuitError;

use std::fmt;
use std::future::Future;
use std::sync::{RwLock, RwLockWriteGuard};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;

const EVENT_CAPACITY: usize = 64;

struct Inner {
    state: BreakerState,
    last_change: Instant,
    window: CallWindow,
    metrics: BreakerMetrics,
}

impl Inner {
    /// Moves to `next`, returning the edge taken if the phase changed.
    fn transition(&mut self, next: BreakerState) -> Option<(CircuitPhase, CircuitPhase)> {
        let from = self.state.phase();
        let to = next.phase();
        self.state = next;
        if from == to {
            return None;
        }
        self.last_change = Instant::now();
        self.metrics.record_transition(to);
        if to == CircuitPhase::Closed {
            self.window.clear();
        }
        Some((from, to))
    }
}

/// A circuit breaker guarding calls to an unreliable dependency.
///
/// The circuit breaker monitors failures and prevents cascading failures
/// by temporarily rejecting calls to unhealthy dependencies.
///
/// # States
///
/// - **Closed**: Normal operation. Calls pass through, failures are counted.
/// - **Open**: The dependency is failing. Calls are rejected immediately.
/// - **Half-Open**: Probing. A limited number of trial calls are allowed
///   through to test if the dependency has recovered.
///
/// # Example
///
/// ```rust,ignore
/// use bulwark::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
///
/// let breaker = CircuitBreaker::new(CircuitBreakerConfig::new().with_name("payments"));
///
/// let receipt = breaker.execute(|| client.charge(order)).await?;
/// ```
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: RwLock<Inner>,
    events: broadcast::Sender<CircuitEvent>,
}

impl CircuitBreaker {
    /// Creates a new circuit breaker with the given configuration.
    pub fn new(config: CircuitBreakerConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: RwLock::new(Inner {
                state: BreakerState::closed(),
                last_change: Instant::now(),
                window: CallWindow::new(config.monitoring_period),
                metrics: BreakerMetrics::new(),
            }),
            config,
            events,
        }
    }

    /// Creates a new circuit breaker with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }

    /// Returns the circuit name.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Returns a reference to the configuration.
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Returns the current phase.
    pub fn phase(&self) -> CircuitPhase {
        self.read().state.phase()
    }

    /// Returns a snapshot of the circuit.
    pub fn state(&self) -> CircuitState {
        let inner = self.read();
        let (window_calls, window_failures) = inner.window.counts();
        let mut snapshot = CircuitState {
            phase: inner.state.phase(),
            consecutive_failures: 0,
            half_open_successes: 0,
            half_open_trials: 0,
            last_change: inner.last_change,
            retry_after: None,
            window_calls,
            window_failures,
        };
        match inner.state {
            BreakerState::Closed {
                consecutive_failures,
            } => snapshot.consecutive_failures = consecutive_failures,
            BreakerState::Open { until } => {
                snapshot.retry_after = Some(until.saturating_duration_since(Instant::now()));
            }
            BreakerState::HalfOpen {
                success_count,
                trial_count,
            } => {
                snapshot.half_open_successes = success_count;
                snapshot.half_open_trials = trial_count;
            }
        }
        snapshot
    }

    /// Returns a copy of the current metrics.
    pub fn metrics(&self) -> BreakerMetrics {
        self.read().metrics.clone()
    }

    /// Subscribes to phase transitions.
    pub fn subscribe(&self) -> broadcast::Receiver<CircuitEvent> {
        self.events.subscribe()
    }

    /// Forces the circuit into the open state.
    pub fn force_open(&self) {
        let edge = self
            .write()
            .transition(BreakerState::open(self.config.reset_timeout));
        self.publish(edge);
    }

    /// Forces the circuit into the closed state.
    pub fn force_close(&self) {
        let edge = self.write().transition(BreakerState::closed());
        self.publish(edge);
    }

    /// Resets the circuit breaker state, window and metrics.
    pub fn reset(&self) {
        let edge = {
            let mut inner = self.write();
            let edge = inner.transition(BreakerState::closed());
            inner.window.clear();
            inner.metrics = BreakerMetrics::new();
            edge
        };
        self.publish(edge);
    }

    /// Runs `operation` through the circuit.
    ///
    /// Every error returned by the operation counts as a failure.
    ///
    /// # Errors
    ///
    /// - `Open` if the circuit is open and the reset timeout has not elapsed.
    /// - `HalfOpenLimitExceeded` if all trial calls are already admitted.
    /// - `Timeout` if `call_timeout` is set and the operation overran it.
    /// - `Operation` if the operation itself failed.
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.execute_with(operation, |_| true).await
    }

    /// Like [`execute`](Self::execute), but only errors for which
    /// `is_failure` returns `true` count against the circuit. Other errors
    /// are returned to the caller and recorded as successful calls.
    pub async fn execute_with<F, Fut, T, E, C>(
        &self,
        operation: F,
        is_failure: C,
    ) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: FnOnce(&E) -> bool,
    {
        let trial = self.admit()?;

        let mut call = AdmittedCall {
            breaker: self,
            trial,
            started: Instant::now(),
        };
        let outcome = match self.config.call_timeout {
            Some(limit) => tokio::time::timeout(limit, operation()).await.ok(),
            None => Some(operation().await),
        };
        let latency = call.started.elapsed();
        call.trial = false;

        match outcome {
            Some(Ok(value)) => {
                self.record_success(latency);
                Ok(value)
            }
            Some(Err(e)) => {
                if is_failure(&e) {
                    self.record_failure(latency, false);
                } else {
                    self.record_success(latency);
                }
                Err(CircuitError::Operation(e))
            }
            None => {
                self.record_failure(latency, true);
                Err(CircuitError::Timeout {
                    name: self.config.name.clone(),
                    elapsed: latency,
                })
            }
        }
    }

    /// Decides whether a call may proceed, moving open to half-open once
    /// the reset timeout has elapsed. Returns `true` for a half-open trial.
    fn admit<E>(&self) -> Result<bool, CircuitError<E>> {
        let (result, edge) = {
            let mut inner = self.write();
            let now = Instant::now();
            match inner.state {
                BreakerState::Closed { .. } => (Ok(false), None),
                BreakerState::Open { until } if now >= until => {
                    let edge = inner.transition(BreakerState::HalfOpen {
                        success_count: 0,
                        trial_count: 1,
                    });
                    (Ok(true), edge)
                }
                BreakerState::Open { until } => {
                    inner.metrics.record_rejected();
                    let err = CircuitError::Open {
                        name: self.config.name.clone(),
                        retry_after: until - now,
                    };
                    (Err(err), None)
                }
                BreakerState::HalfOpen {
                    success_count,
                    trial_count,
                } => {
                    if trial_count < self.config.half_open_max_calls {
                        inner.state = BreakerState::HalfOpen {
                            success_count,
                            trial_count: trial_count + 1,
                        };
                        (Ok(true), None)
                    } else {
                        inner.metrics.record_rejected();
                        let err = CircuitError::HalfOpenLimitExceeded {
                            name: self.config.name.clone(),
                        };
                        (Err(err), None)
                    }
                }
            }
        };
        self.publish(edge);
        result
    }

    fn record_success(&self, latency: Duration) {
        let edge = {
            let mut inner = self.write();
            inner.metrics.record_success(latency);
            inner.window.record(false);

            match inner.state {
                BreakerState::Closed {
                    consecutive_failures,
                } => {
                    inner.state = BreakerState::Closed {
                        consecutive_failures: consecutive_failures
                            .saturating_sub(self.config.failure_decay),
                    };
                    None
                }
                BreakerState::HalfOpen {
                    success_count,
                    trial_count,
                } => {
                    let success_count = success_count + 1;
                    if success_count >= self.config.half_open_max_calls {
                        inner.transition(BreakerState::closed())
                    } else {
                        inner.state = BreakerState::HalfOpen {
                            success_count,
                            trial_count,
                        };
                        None
                    }
                }
                // A call admitted before a forced open finished late.
                BreakerState::Open { .. } => None,
            }
        };
        self.publish(edge);
    }

    fn record_failure(&self, latency: Duration, timed_out: bool) {
        let edge = {
            let mut inner = self.write();
            inner.metrics.record_failure(latency, timed_out);
            inner.window.record(true);

            match inner.state {
                BreakerState::Closed {
                    consecutive_failures,
                } => {
                    let consecutive_failures = consecutive_failures + 1;
                    let (calls, _) = inner.window.counts();
                    let error_rate_tripped = calls >= self.config.volume_threshold
                        && inner.window.error_percentage()
                            >= self.config.error_threshold_percentage;

                    if consecutive_failures >= self.config.failure_threshold || error_rate_tripped
                    {
                        inner.transition(BreakerState::open(self.config.reset_timeout))
                    } else {
                        inner.state = BreakerState::Closed {
                            consecutive_failures,
                        };
                        None
                    }
                }
                BreakerState::HalfOpen { .. } => {
                    inner.transition(BreakerState::open(self.config.reset_timeout))
                }
                BreakerState::Open { .. } => None,
            }
        };
        self.publish(edge);
    }

    fn publish(&self, edge: Option<(CircuitPhase, CircuitPhase)>) {
        let Some((from, to)) = edge else {
            return;
        };
        crate::audit::emit_circuit_transition(&self.config.name, from, to);
        // No subscribers is fine.
        let _ = self.events.send(CircuitEvent::StateChanged {
            name: self.config.name.clone(),
            from,
            to,
            at: chrono::Utc::now(),
        });
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Inner> {
        self.inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// An admitted call whose outcome is not yet recorded.
///
/// A half-open trial dropped before it finishes counts as a failed trial,
/// so an abandoned call cannot hold a trial slot forever.
struct AdmittedCall<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    started: Instant,
}

impl Drop for AdmittedCall<'_> {
    fn drop(&mut self) {
        if self.trial {
            tracing::debug!(
                circuit = %self.breaker.config.name,
                "half-open trial abandoned"
            );
            self.breaker.record_failure(self.started.elapsed(), false);
        }
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.config.name)
            .field("phase", &self.phase())
            .field("config", &self.config)
            .finish()
    }
}
