//! # Bulwark
//!
//! Resilience building blocks for async services: resource pooling,
//! circuit breaking, health checking and automated recovery, with
//! structured audit logging.
//!
//! ## Overview
//!
//! Bulwark provides four cooperating components:
//!
//! - A [`ResourcePool`] that bounds, recycles and reaps expensive resources
//! - A [`CircuitBreaker`] that stops calling a failing dependency
//! - A [`HealthCheckRegistry`] that runs probes on a schedule and reports
//!   a weighted health score
//! - A [`RecoveryOrchestrator`] that turns failures into issues and runs
//!   recovery strategies for them
//!
//! Each component is constructed explicitly and can be used alone. They
//! connect through typed event channels: the orchestrator can watch a
//! registry and a breaker, and built-in probes report on pools and
//! circuits.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use bulwark::prelude::*;
//! use bulwark::mock::MockFactory;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let pool = ResourcePool::new(
//!         MockFactory::new(),
//!         PoolConfig::new().with_name("db").with_size(2, 10),
//!     )
//!     .await?;
//!
//!     let breaker = CircuitBreaker::new(CircuitBreakerConfig::new().with_name("db"));
//!     let conn = pool.acquire().await?;
//!     let id = breaker.execute(|| async { Ok::<_, std::io::Error>(conn.id()) }).await?;
//!     pool.release(conn).await?;
//!
//!     let registry = HealthCheckRegistry::new();
//!     registry.register("db-pool", PoolProbe::new(pool.clone()), HealthCheckConfig::new())?;
//!
//!     let orchestrator = RecoveryOrchestrator::default();
//!     orchestrator.register_handler(ActionKind::ClearCache, PoolHandler::new(pool.clone()));
//!     orchestrator.add_strategy(
//!         RecoveryStrategy::new("reset-db-pool")
//!             .with_trigger(Trigger::source("db-pool"))
//!             .with_action(RecoveryAction::new(ActionKind::ClearCache)),
//!     )?;
//!     orchestrator.watch_health(&registry);
//!     registry.start();
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - **Core**: Errors, shared types, the `ResourceFactory` trait, retry and
//!   the background task scheduler
//! - **Pool**: Bounded resource pooling with FIFO waiters
//! - **Circuit Breaker**: Closed, open and half-open call gating
//! - **Health**: Probes, scheduled checks and weighted reports
//! - **Recovery**: Issues, strategies and action execution
//! - **Audit**: Structured logging under the `bulwark::audit` target
//! - **Mock**: Test doubles for every collaborator trait

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod audit;
pub mod circuit_breaker;
pub mod core;
pub mod health;
pub mod mock;
pub mod pool;
pub mod recovery;

// Re-export commonly used types at the crate root
pub use crate::core::{
    BoxError, CircuitError, HealthError, PoolError, RecoveryError, ResourceFactory, Severity,
};

pub use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitPhase};
pub use crate::health::{HealthCheckConfig, HealthCheckRegistry, HealthProbe, HealthStatus};
pub use crate::pool::{PoolConfig, PooledResource, ResourcePool};
pub use crate::recovery::{ActionHandler, ActionKind, RecoveryOrchestrator, RecoveryStrategy};

/// Prelude module for convenient imports.
///
/// ```rust
/// use bulwark::prelude::*;
/// ```
pub mod prelude {
    pub use crate::circuit_breaker::{
        CircuitBreaker, CircuitBreakerConfig, CircuitEvent, CircuitPhase,
    };
    pub use crate::core::{
        BoxError, CircuitError, HealthError, PoolError, RecoveryError, ResourceFactory, Severity,
    };
    pub use crate::health::{
        probe_fn, CircuitProbe, HealthCheckConfig, HealthCheckRegistry, HealthCheckResult,
        HealthEvent, HealthProbe, HealthStatus, PoolProbe,
    };
    pub use crate::pool::{PoolConfig, PooledResource, ResourcePool};
    pub use crate::recovery::{
        handler_fn, ActionHandler, ActionKind, IssueReport, OrchestratorConfig, PoolHandler,
        RecoveryAction, RecoveryOrchestrator, RecoveryStrategy, Trigger,
    };
}
