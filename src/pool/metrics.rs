//! Pool counters and acquire latency sampling.

use crate::core::types::duration_ms;

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;

/// Rolling sample of acquire latencies, capped at a fixed size.
#[derive(Debug, Clone)]
pub(crate) struct LatencySample {
    samples: VecDeque<Duration>,
    capacity: usize,
}

impl LatencySample {
    pub(crate) fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    pub(crate) fn record(&mut self, latency: Duration) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(latency);
    }

    pub(crate) fn percentiles(&self) -> LatencyPercentiles {
        if self.samples.is_empty() {
            return LatencyPercentiles::default();
        }
        let mut sorted: Vec<Duration> = self.samples.iter().copied().collect();
        sorted.sort_unstable();
        let total: Duration = sorted.iter().sum();
        LatencyPercentiles {
            p50: nearest_rank(&sorted, 50.0),
            p95: nearest_rank(&sorted, 95.0),
            p99: nearest_rank(&sorted, 99.0),
            mean: total / sorted.len() as u32,
            samples: sorted.len(),
        }
    }
}

fn nearest_rank(sorted: &[Duration], percentile: f64) -> Duration {
    let rank = ((percentile / 100.0) * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

/// Acquire latency percentiles over the rolling sample.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencyPercentiles {
    /// Median latency.
    #[serde(with = "duration_ms")]
    pub p50: Duration,
    /// 95th percentile latency.
    #[serde(with = "duration_ms")]
    pub p95: Duration,
    /// 99th percentile latency.
    #[serde(with = "duration_ms")]
    pub p99: Duration,
    /// Mean latency.
    #[serde(with = "duration_ms")]
    pub mean: Duration,
    /// Number of samples the figures are computed from.
    pub samples: usize,
}

/// Lifetime counters kept under the pool lock.
#[derive(Debug, Clone)]
pub(crate) struct PoolCounters {
    pub(crate) created: u64,
    pub(crate) destroyed: u64,
    pub(crate) create_errors: u64,
    pub(crate) acquire_successes: u64,
    pub(crate) acquire_failures: u64,
    pub(crate) timeouts: u64,
    pub(crate) latency: LatencySample,
}

impl PoolCounters {
    pub(crate) fn new(sample_size: usize) -> Self {
        Self {
            created: 0,
            destroyed: 0,
            create_errors: 0,
            acquire_successes: 0,
            acquire_failures: 0,
            timeouts: 0,
            latency: LatencySample::new(sample_size),
        }
    }
}

/// A point-in-time snapshot of pool state and counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolStats {
    /// Pool name.
    pub name: String,
    /// Borrowed plus available resources.
    pub total: usize,
    /// Resources idle in the pool.
    pub available: usize,
    /// Resources currently lent out.
    pub borrowed: usize,
    /// Acquisitions waiting for a release.
    pub pending: usize,
    /// Current minimum size.
    pub min_size: usize,
    /// Current maximum size.
    pub max_size: usize,
    /// Whether the pool has been closed.
    pub closed: bool,
    /// Resources ever created.
    pub created: u64,
    /// Resources ever destroyed.
    pub destroyed: u64,
    /// Failed resource constructions.
    pub create_errors: u64,
    /// Successful acquisitions.
    pub acquire_successes: u64,
    /// Failed acquisitions (timeouts, exhaustion, closed pool).
    pub acquire_failures: u64,
    /// Acquisitions that hit their deadline.
    pub timeouts: u64,
    /// Acquire latency percentiles.
    pub latency: LatencyPercentiles,
}

impl PoolStats {
    /// Returns the fraction of `max_size` currently borrowed (0.0 to 1.0).
    pub fn utilization(&self) -> f64 {
        if self.max_size == 0 {
            return 0.0;
        }
        self.borrowed as f64 / self.max_size as f64
    }
}
