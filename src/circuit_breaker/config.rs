//! Circuit breaker configuration.

use std::time::Duration;

/// Configuration for a circuit breaker.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Name used in errors, logs and events.
    pub name: String,

    /// Number of consecutive failures before opening the circuit.
    pub failure_threshold: u32,

    /// How long to keep the circuit open before admitting a trial call.
    pub reset_timeout: Duration,

    /// Trial calls admitted while half-open; this many consecutive
    /// successes close the circuit.
    pub half_open_max_calls: u32,

    /// Length of the rolling window used for the error percentage.
    pub monitoring_period: Duration,

    /// Minimum calls in the window before the error percentage can open
    /// the circuit.
    pub volume_threshold: u32,

    /// Error percentage (0-100) over the window that opens the circuit.
    pub error_threshold_percentage: f64,

    /// How much each success while closed lowers the consecutive failure
    /// count.
    pub failure_decay: u32,

    /// Optional deadline for each call. A timed-out call counts as a
    /// failure.
    pub call_timeout: Option<Duration>,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            name: "circuit".to_string(),
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(60),
            half_open_max_calls: 3,
            monitoring_period: Duration::from_secs(60),
            volume_threshold: 10,
            error_threshold_percentage: 50.0,
            failure_decay: 1,
            call_timeout: None,
        }
    }
}

impl CircuitBreakerConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the circuit name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the failure threshold.
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }

    /// Sets the reset timeout.
    pub fn with_reset_timeout(mut self, timeout: Duration) -> Self {
        self.reset_timeout = timeout;
        self
    }

    /// Sets the number of half-open trial calls.
    pub fn with_half_open_max_calls(mut self, max: u32) -> Self {
        self.half_open_max_calls = max.max(1);
        self
    }

    /// Sets the rolling window length.
    pub fn with_monitoring_period(mut self, period: Duration) -> Self {
        self.monitoring_period = period;
        self
    }

    /// Sets the volume threshold and error percentage for the rolling
    /// window.
    pub fn with_error_threshold(mut self, volume: u32, percentage: f64) -> Self {
        self.volume_threshold = volume;
        self.error_threshold_percentage = percentage.clamp(0.0, 100.0);
        self
    }

    /// Sets the failure decay applied on success.
    pub fn with_failure_decay(mut self, decay: u32) -> Self {
        self.failure_decay = decay;
        self
    }

    /// Sets the per-call timeout.
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }

    /// Creates a configuration that trips early and stays open longer.
    ///
    /// This configuration:
    /// - Opens after 3 consecutive failures or 25% errors over 5 calls
    /// - Stays open for 2 minutes
    /// - Requires 5 successful trial calls to close
    /// - Resets the failure count on success
    pub fn strict() -> Self {
        Self {
            failure_threshold: 3,
            reset_timeout: Duration::from_secs(120),
            half_open_max_calls: 5,
            volume_threshold: 5,
            error_threshold_percentage: 25.0,
            failure_decay: u32::MAX,
            ..Self::default()
        }
    }

    /// Creates a configuration that tolerates more failures.
    ///
    /// This configuration:
    /// - Opens after 10 consecutive failures or 75% errors over 20 calls
    /// - Admits a trial call after 10 seconds
    /// - Closes after 2 successful trial calls
    pub fn high_availability() -> Self {
        Self {
            failure_threshold: 10,
            reset_timeout: Duration::from_secs(10),
            half_open_max_calls: 2,
            volume_threshold: 20,
            error_threshold_percentage: 75.0,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CircuitBreakerConfig::default();
        assert_eq!(config.failure_threshold, 5);
        assert_eq!(config.reset_timeout, Duration::from_secs(60));
        assert_eq!(config.half_open_max_calls, 3);
        assert_eq!(config.failure_decay, 1);
        assert!(config.call_timeout.is_none());
    }

    #[test]
    fn test_config_builder() {
        let config = CircuitBreakerConfig::new()
            .with_name("db")
            .with_failure_threshold(0)
            .with_error_threshold(4, 150.0)
            .with_call_timeout(Duration::from_secs(1));

        assert_eq!(config.name, "db");
        assert_eq!(config.failure_threshold, 1);
        assert_eq!(config.volume_threshold, 4);
        assert_eq!(config.error_threshold_percentage, 100.0);
        assert_eq!(config.call_timeout, Some(Duration::from_secs(1)));
    }

    #[test]
    fn test_presets() {
        let strict = CircuitBreakerConfig::strict();
        let ha = CircuitBreakerConfig::high_availability();
        assert!(strict.failure_threshold < ha.failure_threshold);
        assert!(strict.reset_timeout > ha.reset_timeout);
    }
}
