//! Resource pool configuration.

use crate::core::PoolError;

use std::time::Duration;

/// Configuration for a [`ResourcePool`](crate::pool::ResourcePool).
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Name used in logs and audit events.
    pub name: String,

    /// Number of resources the pool keeps alive even when idle.
    pub min_size: usize,

    /// Upper bound on borrowed plus available resources.
    pub max_size: usize,

    /// How long `acquire` waits for a resource before failing.
    pub acquire_timeout: Duration,

    /// Available resources unused for longer than this are reaped.
    pub idle_timeout: Duration,

    /// How often the reaper runs. `None` disables background reaping.
    pub reap_interval: Option<Duration>,

    /// Resources are destroyed on release after this many borrows.
    pub max_uses: Option<u64>,

    /// Maximum number of queued acquisitions. `None` means unbounded.
    pub max_waiters: Option<usize>,

    /// Validate resources when they are borrowed.
    pub validate_on_borrow: bool,

    /// Validate resources when they are returned.
    pub validate_on_return: bool,

    /// Number of acquire latencies kept for percentile reporting.
    pub latency_sample_size: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            name: "pool".to_string(),
            min_size: 1,
            max_size: 10,
            acquire_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
            reap_interval: Some(Duration::from_secs(60)),
            max_uses: None,
            max_waiters: None,
            validate_on_borrow: true,
            validate_on_return: false,
            latency_sample_size: 1000,
        }
    }
}

impl PoolConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the pool name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the minimum and maximum pool size.
    pub fn with_size(mut self, min_size: usize, max_size: usize) -> Self {
        self.min_size = min_size;
        self.max_size = max_size;
        self
    }

    /// Sets the acquire timeout.
    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Sets the idle timeout.
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Sets the reap interval.
    pub fn with_reap_interval(mut self, interval: Option<Duration>) -> Self {
        self.reap_interval = interval;
        self
    }

    /// Sets the maximum number of uses per resource.
    pub fn with_max_uses(mut self, max_uses: u64) -> Self {
        self.max_uses = Some(max_uses.max(1));
        self
    }

    /// Bounds the queue of waiting acquisitions.
    pub fn with_max_waiters(mut self, max_waiters: usize) -> Self {
        self.max_waiters = Some(max_waiters);
        self
    }

    /// Enables or disables validation on borrow and on return.
    pub fn with_validation(mut self, on_borrow: bool, on_return: bool) -> Self {
        self.validate_on_borrow = on_borrow;
        self.validate_on_return = on_return;
        self
    }

    /// Sets the latency sample size.
    pub fn with_latency_sample_size(mut self, size: usize) -> Self {
        self.latency_sample_size = size.max(1);
        self
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), PoolError> {
        validate_bounds(self.min_size, self.max_size)?;
        if self.acquire_timeout.is_zero() {
            return Err(PoolError::configuration(
                "acquire_timeout must be greater than zero",
            ));
        }
        if matches!(self.reap_interval, Some(interval) if interval.is_zero()) {
            return Err(PoolError::configuration(
                "reap_interval must be greater than zero",
            ));
        }
        Ok(())
    }
}

/// Checks a `(min_size, max_size)` pair.
pub(crate) fn validate_bounds(min_size: usize, max_size: usize) -> Result<(), PoolError> {
    if max_size == 0 {
        return Err(PoolError::configuration("max_size must be greater than 0"));
    }
    if min_size > max_size {
        return Err(PoolError::configuration(format!(
            "min_size ({min_size}) must not exceed max_size ({max_size})"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PoolConfig::default();
        assert_eq!(config.min_size, 1);
        assert_eq!(config.max_size, 10);
        assert_eq!(config.acquire_timeout, Duration::from_secs(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        assert!(PoolConfig::new().with_size(0, 0).validate().is_err());
        assert!(PoolConfig::new().with_size(6, 5).validate().is_err());
        assert!(PoolConfig::new()
            .with_acquire_timeout(Duration::ZERO)
            .validate()
            .is_err());
        assert!(PoolConfig::new()
            .with_reap_interval(Some(Duration::ZERO))
            .validate()
            .is_err());
        assert!(PoolConfig::new().with_size(5, 5).validate().is_ok());
    }
}
