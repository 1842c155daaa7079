//! Audit event types and emission functions.

use crate::circuit_breaker::CircuitPhase;
use crate::core::Severity;
use crate::health::HealthStatus;
use crate::pool::DestroyReason;
use crate::recovery::{ActionOutcome, Issue, RecoveryExecution};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Base trait for audit events.
pub trait AuditEvent: Serialize {
    /// Returns the event type name.
    fn event_type(&self) -> &'static str;

    /// Returns the timestamp of the event.
    fn timestamp(&self) -> DateTime<Utc>;
}

/// Audit event for a finished recovery execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionAuditEvent {
    /// Timestamp of the event.
    pub timestamp: DateTime<Utc>,

    /// Execution ID.
    pub execution_id: String,

    /// Strategy that ran.
    pub strategy_id: String,

    /// Issue the strategy ran for.
    pub issue_id: String,

    /// Overall outcome.
    pub outcome: String,

    /// Execution duration in milliseconds.
    pub duration_ms: u64,

    /// Per-action results.
    pub actions: Vec<ActionSummary>,
}

impl ExecutionAuditEvent {
    /// Builds the audit record of `execution`.
    pub fn from_execution(execution: &RecoveryExecution) -> Self {
        Self {
            timestamp: execution.completed_at,
            execution_id: execution.id.clone(),
            strategy_id: execution.strategy_id.clone(),
            issue_id: execution.issue_id.clone(),
            outcome: execution.outcome.as_str().to_string(),
            duration_ms: execution.duration().as_millis() as u64,
            actions: execution.actions.iter().map(ActionSummary::from).collect(),
        }
    }
}

impl AuditEvent for ExecutionAuditEvent {
    fn event_type(&self) -> &'static str {
        "recovery_execution"
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// Summary of one recovery action for audit logging.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionSummary {
    /// Action kind.
    pub kind: String,
    /// Result status.
    pub status: String,
    /// Whether the action was critical.
    pub critical: bool,
}

impl From<&ActionOutcome> for ActionSummary {
    fn from(a: &ActionOutcome) -> Self {
        Self {
            kind: a.kind.to_string(),
            status: serde_json::to_value(a.status)
                .ok()
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_default(),
            critical: a.critical,
        }
    }
}

/// Emits an audit event for a pooled resource being destroyed.
pub fn emit_resource_destroyed(pool: &str, resource_id: u64, reason: DestroyReason, use_count: u64) {
    tracing::info!(
        target: "bulwark::audit",
        event_type = "resource_destroyed",
        pool = %pool,
        resource_id,
        reason = reason.as_str(),
        use_count,
        "Pooled resource destroyed"
    );
}

/// Emits an audit event for a circuit state transition.
pub fn emit_circuit_transition(name: &str, from: CircuitPhase, to: CircuitPhase) {
    tracing::info!(
        target: "bulwark::audit",
        event_type = "circuit_transition",
        circuit = %name,
        from = %from,
        to = %to,
        "Circuit state changed"
    );
}

/// Emits an audit event for a failing health check.
pub fn emit_health_failure(
    check: &str,
    status: HealthStatus,
    criticality: Severity,
    message: Option<&str>,
) {
    tracing::warn!(
        target: "bulwark::audit",
        event_type = "health_failure",
        check = %check,
        status = %status,
        criticality = %criticality,
        message = ?message,
        "Health check failing"
    );
}

/// Emits an audit event for a health check that recovered.
pub fn emit_health_recovery(check: &str, criticality: Severity) {
    tracing::info!(
        target: "bulwark::audit",
        event_type = "health_recovery",
        check = %check,
        criticality = %criticality,
        "Health check recovered"
    );
}

/// Emits an audit event for a newly detected issue.
pub fn emit_issue_detected(issue: &Issue) {
    tracing::warn!(
        target: "bulwark::audit",
        event_type = "issue_detected",
        issue_id = %issue.id,
        source = %issue.source,
        severity = %issue.severity,
        description = %issue.description,
        "Issue detected"
    );
}

/// Emits an audit event for an issue leaving the open state.
pub fn emit_issue_closed(issue: &Issue) {
    tracing::info!(
        target: "bulwark::audit",
        event_type = "issue_closed",
        issue_id = %issue.id,
        source = %issue.source,
        status = %issue.status,
        "Issue closed"
    );
}

/// Emits an audit event for a finished recovery execution.
pub fn emit_execution_completed(execution: &RecoveryExecution) {
    let event = ExecutionAuditEvent::from_execution(execution);
    tracing::info!(
        target: "bulwark::audit",
        event_type = event.event_type(),
        execution_id = %event.execution_id,
        strategy_id = %event.strategy_id,
        issue_id = %event.issue_id,
        outcome = %event.outcome,
        duration_ms = event.duration_ms,
        actions = ?event.actions,
        "Recovery execution completed"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recovery::{ActionKind, ActionStatus, ExecutionOutcome};
    use std::time::Duration;

    #[test]
    fn test_execution_audit_event() {
        let started_at = Utc::now();
        let execution = RecoveryExecution {
            id: "e1".to_string(),
            strategy_id: "restart".to_string(),
            issue_id: "i1".to_string(),
            actions: vec![ActionOutcome {
                kind: ActionKind::RestartService,
                status: ActionStatus::TimedOut,
                critical: true,
                duration: Duration::from_secs(2),
                error: Some("timed out".to_string()),
            }],
            started_at,
            completed_at: started_at + chrono::Duration::milliseconds(2500),
            outcome: ExecutionOutcome::Failed,
        };

        let event = ExecutionAuditEvent::from_execution(&execution);
        assert_eq!(event.event_type(), "recovery_execution");
        assert_eq!(event.outcome, "failed");
        assert_eq!(event.duration_ms, 2500);
        assert_eq!(event.actions[0].kind, "restart_service");
        assert_eq!(event.actions[0].status, "timed_out");
    }
}
