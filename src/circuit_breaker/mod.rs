//! Circuit breaker for calls to unreliable dependencies.
//!
//! The circuit breaker pattern prevents cascading failures by temporarily
//! stopping traffic to failing dependencies and periodically probing them to
//! detect recovery.
//!
//! ## States
//!
//! - **Closed**: Normal operation; calls pass through.
//! - **Open**: The dependency is failing; calls are rejected immediately.
//! - **Half-Open**: Trial calls probe whether the dependency has recovered.
//!
//! The circuit opens after `failure_threshold` consecutive failures, or when
//! the error percentage over the last `monitoring_period` crosses
//! `error_threshold_percentage` with at least `volume_threshold` calls.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use bulwark::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
//! use std::time::Duration;
//!
//! let config = CircuitBreakerConfig::default()
//!     .with_name("inventory")
//!     .with_failure_threshold(5)
//!     .with_reset_timeout(Duration::from_secs(30));
//!
//! let breaker = CircuitBreaker::new(config);
//! let stock = breaker.execute(|| inventory.lookup(sku)).await?;
//! ```

mod breaker;
mod config;
mod state;

pub use breaker::CircuitBreaker;
pub use config::CircuitBreakerConfig;
pub use state::{BreakerMetrics, CircuitEvent, CircuitPhase, CircuitState};
