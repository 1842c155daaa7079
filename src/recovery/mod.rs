//! Automated recovery.
//!
//! The [`RecoveryOrchestrator`] tracks [`Issue`]s reported by callers, by
//! health checks and by circuit breakers, and runs the
//! [`RecoveryStrategy`]s whose triggers match them. Strategies are
//! ordered lists of [`RecoveryAction`]s carried out by registered
//! [`ActionHandler`]s; every run is recorded as a [`RecoveryExecution`].

mod action;
mod execution;
mod handlers;
mod issue;
mod orchestrator;
mod strategy;

pub use action::{handler_fn, ActionHandler, ActionKind, ActionRequest, FnHandler, RecoveryAction};
pub use execution::{ActionOutcome, ActionStatus, ExecutionOutcome, RecoveryExecution};
pub use handlers::PoolHandler;
pub use issue::{Issue, IssueReport, IssueStatus};
pub use orchestrator::{
    circuit_source, IssueHandling, OrchestratorConfig, RecoveryEvent, RecoveryOrchestrator,
    SkipReason, SweepStats,
};
pub use strategy::{RecoveryStrategy, Trigger};
