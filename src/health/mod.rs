//! Periodic health checks.
//!
//! Probes implementing [`HealthProbe`] are registered with a
//! [`HealthCheckRegistry`] under an id and a [`HealthCheckConfig`]. Each
//! check runs on its own interval with a timeout and linear-backoff retries.
//! Results roll up into a [`HealthReport`] whose status is the worst
//! constituent status and whose score is weighted by criticality.
//!
//! Subscribers receive a [`HealthEvent::Failure`] for every degraded or
//! unhealthy result and a [`HealthEvent::Recovery`] when a failing check
//! turns healthy again.

mod probe;
mod registry;
mod result;

pub use probe::{probe_fn, CircuitProbe, FnProbe, HealthProbe, PoolProbe};
pub use registry::HealthCheckRegistry;
pub use result::{
    CheckReport, HealthCheckConfig, HealthCheckResult, HealthEvent, HealthReport, HealthStatus,
};
