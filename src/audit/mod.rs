//! Structured audit logging.
//!
//! This module provides functions for emitting structured audit events
//! using the `tracing` crate under the `bulwark::audit` target. Events can
//! be captured by any tracing subscriber (JSON file, OpenTelemetry, etc.).

mod events;

pub use events::{
    emit_circuit_transition, emit_execution_completed, emit_health_failure, emit_health_recovery,
    emit_issue_closed, emit_issue_detected, emit_resource_destroyed, ActionSummary, AuditEvent,
    ExecutionAuditEvent,
};
