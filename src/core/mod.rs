//! Core types and traits for the bulwark library.
//!
//! - [`error`] - Structured error types for every component
//! - [`types`] - Shared types like `Severity`
//! - [`traits`] - The `ResourceFactory` collaborator trait
//! - [`retry`] - Linear retry policy
//! - [`scheduler`] - Cancellable background task scheduler

pub mod error;
pub mod retry;
pub mod scheduler;
pub mod traits;
pub mod types;

pub use error::{
    BoxError, CircuitError, HealthError, HealthResult, PoolError, PoolResult, RecoveryError,
    RecoveryResult,
};
pub use retry::{retry_async, RetryConfig};
pub use scheduler::{Scheduler, Tick};
pub use traits::ResourceFactory;
pub use types::Severity;
