//! Health check results, descriptors and reports.

use crate::core::types::duration_ms;
use crate::core::{HealthError, Severity};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Outcome of a health check.
///
/// Ordered from best to worst, so the maximum of several statuses is the
/// worst one.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Fully operational.
    #[default]
    Healthy,
    /// Operational with reduced capacity or elevated latency.
    Degraded,
    /// Not operational.
    Unhealthy,
}

impl HealthStatus {
    /// Returns the contribution of this status to a health score.
    pub fn score(&self) -> f64 {
        match self {
            Self::Healthy => 100.0,
            Self::Degraded => 50.0,
            Self::Unhealthy => 0.0,
        }
    }

    /// Returns `true` if the status is `Healthy`.
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }

    /// Returns the name of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unhealthy => "unhealthy",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The result of running one health check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheckResult {
    /// The reported status.
    pub status: HealthStatus,
    /// When the check completed.
    pub timestamp: DateTime<Utc>,
    /// How long the check took, retries included.
    #[serde(with = "duration_ms")]
    pub duration: Duration,
    /// Optional human-readable explanation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Free-form details supplied by the probe.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub details: Map<String, Value>,
}

impl HealthCheckResult {
    /// Creates a result with the given status.
    pub fn new(status: HealthStatus) -> Self {
        Self {
            status,
            timestamp: Utc::now(),
            duration: Duration::ZERO,
            message: None,
            details: Map::new(),
        }
    }

    /// Creates a healthy result.
    pub fn healthy() -> Self {
        Self::new(HealthStatus::Healthy)
    }

    /// Creates a degraded result with a message.
    pub fn degraded(message: impl Into<String>) -> Self {
        Self::new(HealthStatus::Degraded).with_message(message)
    }

    /// Creates an unhealthy result with a message.
    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self::new(HealthStatus::Unhealthy).with_message(message)
    }

    /// Sets the message.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Adds a detail entry.
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    /// Sets the duration.
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }
}

/// Describes how a registered check is run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckConfig {
    /// Time between runs.
    #[serde(with = "duration_ms")]
    pub interval: Duration,
    /// Deadline for a single probe attempt.
    #[serde(with = "duration_ms")]
    pub timeout: Duration,
    /// Retries after a failed or timed-out attempt.
    pub retries: u32,
    /// Base delay between retries; the n-th retry waits `n × retry_delay`.
    #[serde(with = "duration_ms")]
    pub retry_delay: Duration,
    /// Weight of the check in the aggregate score.
    pub criticality: Severity,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            timeout: Duration::from_secs(5),
            retries: 2,
            retry_delay: Duration::from_secs(1),
            criticality: Severity::Medium,
        }
    }
}

impl HealthCheckConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Sets the per-attempt timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the retry count and base delay.
    pub fn with_retries(mut self, retries: u32, delay: Duration) -> Self {
        self.retries = retries;
        self.retry_delay = delay;
        self
    }

    /// Sets the criticality.
    pub fn with_criticality(mut self, criticality: Severity) -> Self {
        self.criticality = criticality;
        self
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), HealthError> {
        if self.interval.is_zero() {
            return Err(HealthError::configuration(
                "interval must be greater than zero",
            ));
        }
        if self.timeout.is_zero() {
            return Err(HealthError::configuration(
                "timeout must be greater than zero",
            ));
        }
        Ok(())
    }
}

/// Events published by the health check registry.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HealthEvent {
    /// A check reported a degraded or unhealthy result.
    Failure {
        /// Identifier of the check.
        check_id: String,
        /// Criticality of the check.
        criticality: Severity,
        /// The failing result.
        result: HealthCheckResult,
    },
    /// A previously failing check reported healthy.
    Recovery {
        /// Identifier of the check.
        check_id: String,
        /// Criticality of the check.
        criticality: Severity,
        /// The healthy result.
        result: HealthCheckResult,
    },
}

impl HealthEvent {
    /// Returns the identifier of the check the event is about.
    pub fn check_id(&self) -> &str {
        match self {
            Self::Failure { check_id, .. } | Self::Recovery { check_id, .. } => check_id,
        }
    }
}

/// The state of one check within a report.
#[derive(Debug, Clone, Serialize)]
pub struct CheckReport {
    /// Criticality of the check.
    pub criticality: Severity,
    /// Most recent result, if the check has run.
    pub last_result: Option<HealthCheckResult>,
    /// Number of non-healthy results in a row.
    pub consecutive_failures: u32,
}

/// Aggregate health of every registered check.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// Worst status among checks that have run.
    pub status: HealthStatus,
    /// Criticality-weighted average score, 0 to 100.
    pub score: f64,
    /// Per-check state, keyed by check id.
    pub checks: BTreeMap<String, CheckReport>,
    /// When the report was produced.
    pub generated_at: DateTime<Utc>,
}

impl HealthReport {
    pub(crate) fn from_checks(checks: BTreeMap<String, CheckReport>) -> Self {
        let mut status = HealthStatus::Healthy;
        let mut weighted = 0.0;
        let mut total_weight = 0u32;

        for check in checks.values() {
            if let Some(result) = &check.last_result {
                let weight = check.criticality.weight();
                status = status.max(result.status);
                weighted += result.status.score() * f64::from(weight);
                total_weight += weight;
            }
        }

        let score = if total_weight == 0 {
            100.0
        } else {
            weighted / f64::from(total_weight)
        };

        Self {
            status,
            score,
            checks,
            generated_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(criticality: Severity, status: Option<HealthStatus>) -> CheckReport {
        CheckReport {
            criticality,
            last_result: status.map(HealthCheckResult::new),
            consecutive_failures: 0,
        }
    }

    #[test]
    fn test_worst_status_wins() {
        assert_eq!(
            HealthStatus::Healthy.max(HealthStatus::Degraded),
            HealthStatus::Degraded
        );
        assert_eq!(
            HealthStatus::Unhealthy.max(HealthStatus::Degraded),
            HealthStatus::Unhealthy
        );
    }

    #[test]
    fn test_weighted_score() {
        let mut checks = BTreeMap::new();
        checks.insert(
            "db".to_string(),
            check(Severity::Critical, Some(HealthStatus::Healthy)),
        );
        checks.insert(
            "cache".to_string(),
            check(Severity::Low, Some(HealthStatus::Unhealthy)),
        );
        checks.insert("pending".to_string(), check(Severity::High, None));

        let report = HealthReport::from_checks(checks);
        assert_eq!(report.status, HealthStatus::Unhealthy);
        assert!((report.score - 80.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_empty_report_is_healthy() {
        let report = HealthReport::from_checks(BTreeMap::new());
        assert_eq!(report.status, HealthStatus::Healthy);
        assert_eq!(report.score, 100.0);
    }

    #[test]
    fn test_result_serialization() {
        let result = HealthCheckResult::degraded("slow")
            .with_detail("latency_ms", 250)
            .with_duration(Duration::from_millis(12));
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["status"], "degraded");
        assert_eq!(json["duration"], 12);
        assert_eq!(json["details"]["latency_ms"], 250);
    }
}
