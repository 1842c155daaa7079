//! Circuit breaker state machine.

use crate::core::types::duration_ms;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

/// The phase of a circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitPhase {
    /// Calls pass through; failures are counted.
    Closed,
    /// Calls are rejected without being attempted.
    Open,
    /// A limited number of trial calls are admitted.
    HalfOpen,
}

impl CircuitPhase {
    /// Returns the name of the phase.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for CircuitPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The internal state of a circuit breaker.
#[derive(Debug, Clone)]
pub(crate) enum BreakerState {
    Closed {
        consecutive_failures: u32,
    },
    Open {
        until: Instant,
    },
    HalfOpen {
        success_count: u32,
        trial_count: u32,
    },
}

impl BreakerState {
    pub(crate) fn closed() -> Self {
        Self::Closed {
            consecutive_failures: 0,
        }
    }

    pub(crate) fn open(reset_timeout: Duration) -> Self {
        Self::Open {
            until: Instant::now() + reset_timeout,
        }
    }

    pub(crate) fn phase(&self) -> CircuitPhase {
        match self {
            Self::Closed { .. } => CircuitPhase::Closed,
            Self::Open { .. } => CircuitPhase::Open,
            Self::HalfOpen { .. } => CircuitPhase::HalfOpen,
        }
    }
}

impl Default for BreakerState {
    fn default() -> Self {
        Self::closed()
    }
}

#[derive(Debug, Clone, Copy)]
struct CallRecord {
    at: Instant,
    failed: bool,
}

/// Call outcomes within the monitoring period.
#[derive(Debug, Clone)]
pub(crate) struct CallWindow {
    period: Duration,
    calls: VecDeque<CallRecord>,
}

impl CallWindow {
    pub(crate) fn new(period: Duration) -> Self {
        Self {
            period,
            calls: VecDeque::new(),
        }
    }

    pub(crate) fn record(&mut self, failed: bool) {
        let now = Instant::now();
        self.prune(now);
        self.calls.push_back(CallRecord { at: now, failed });
    }

    fn prune(&mut self, now: Instant) {
        while let Some(front) = self.calls.front() {
            if now.saturating_duration_since(front.at) > self.period {
                self.calls.pop_front();
            } else {
                break;
            }
        }
    }

    pub(crate) fn clear(&mut self) {
        self.calls.clear();
    }

    /// Returns `(calls, failures)` in the window.
    pub(crate) fn counts(&self) -> (u32, u32) {
        let now = Instant::now();
        self.calls
            .iter()
            .filter(|c| now.saturating_duration_since(c.at) <= self.period)
            .fold((0, 0), |(calls, failures), c| {
                (calls + 1, failures + u32::from(c.failed))
            })
    }

    pub(crate) fn error_percentage(&self) -> f64 {
        match self.counts() {
            (0, _) => 0.0,
            (calls, failures) => f64::from(failures) * 100.0 / f64::from(calls),
        }
    }
}

/// A point-in-time snapshot of a circuit.
#[derive(Debug, Clone)]
pub struct CircuitState {
    /// Current phase.
    pub phase: CircuitPhase,
    /// Consecutive failure count (closed only).
    pub consecutive_failures: u32,
    /// Successful trial calls (half-open only).
    pub half_open_successes: u32,
    /// Admitted trial calls (half-open only).
    pub half_open_trials: u32,
    /// When the phase last changed.
    pub last_change: Instant,
    /// Time until a trial call is admitted (open only).
    pub retry_after: Option<Duration>,
    /// Calls recorded in the rolling window.
    pub window_calls: u32,
    /// Failures recorded in the rolling window.
    pub window_failures: u32,
}

/// Metrics about circuit breaker behavior.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BreakerMetrics {
    /// Total number of calls, rejected ones included.
    pub total_calls: u64,
    /// Number of successful calls.
    pub successful_calls: u64,
    /// Number of failed calls, timeouts included.
    pub failed_calls: u64,
    /// Number of calls that exceeded the call timeout.
    pub timeouts: u64,
    /// Number of calls rejected without being attempted.
    pub rejected_calls: u64,
    /// Number of times the circuit has opened.
    pub times_opened: u64,
    /// Number of times the circuit has closed.
    pub times_closed: u64,
    /// Summed latency of attempted calls.
    #[serde(with = "duration_ms")]
    pub total_latency: Duration,
}

impl BreakerMetrics {
    /// Creates new empty metrics.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_success(&mut self, latency: Duration) {
        self.total_calls += 1;
        self.successful_calls += 1;
        self.total_latency += latency;
    }

    pub(crate) fn record_failure(&mut self, latency: Duration, timed_out: bool) {
        self.total_calls += 1;
        self.failed_calls += 1;
        if timed_out {
            self.timeouts += 1;
        }
        self.total_latency += latency;
    }

    pub(crate) fn record_rejected(&mut self) {
        self.total_calls += 1;
        self.rejected_calls += 1;
    }

    pub(crate) fn record_transition(&mut self, to: CircuitPhase) {
        match to {
            CircuitPhase::Open => self.times_opened += 1,
            CircuitPhase::Closed => self.times_closed += 1,
            CircuitPhase::HalfOpen => {}
        }
    }

    /// Returns the success rate of attempted calls (0.0 to 1.0).
    pub fn success_rate(&self) -> f64 {
        let attempted = self.successful_calls + self.failed_calls;
        if attempted == 0 {
            return 1.0;
        }
        self.successful_calls as f64 / attempted as f64
    }

    /// Returns the mean latency of attempted calls.
    pub fn mean_latency(&self) -> Duration {
        let attempted = self.successful_calls + self.failed_calls;
        if attempted == 0 {
            return Duration::ZERO;
        }
        self.total_latency / attempted.min(u64::from(u32::MAX)) as u32
    }
}

/// Events published by a circuit breaker.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CircuitEvent {
    /// The circuit moved from one phase to another.
    StateChanged {
        /// Name of the circuit.
        name: String,
        /// Previous phase.
        from: CircuitPhase,
        /// New phase.
        to: CircuitPhase,
        /// When the transition happened.
        at: DateTime<Utc>,
    },
}
