//! Records of strategy executions.

use crate::core::types::duration_ms;
use crate::recovery::action::ActionKind;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How one action of an execution went.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    /// The handler returned success.
    Succeeded,
    /// The handler returned an error, or no handler was registered.
    Failed,
    /// The handler overran the action timeout.
    TimedOut,
    /// Not attempted because an earlier critical action failed.
    Skipped,
}

impl ActionStatus {
    /// Returns `true` for `Failed` and `TimedOut`.
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed | Self::TimedOut)
    }
}

/// The outcome of one action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionOutcome {
    /// The action kind.
    pub kind: ActionKind,
    /// What happened.
    pub status: ActionStatus,
    /// Whether the action was critical.
    pub critical: bool,
    /// How long the handler ran.
    #[serde(with = "duration_ms")]
    pub duration: Duration,
    /// The error, for failed and timed-out actions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ActionOutcome {
    pub(crate) fn skipped(kind: ActionKind, critical: bool) -> Self {
        Self {
            kind,
            status: ActionStatus::Skipped,
            critical,
            duration: Duration::ZERO,
            error: None,
        }
    }
}

/// The overall outcome of an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionOutcome {
    /// Every action succeeded.
    Succeeded,
    /// Some non-critical actions failed; the rest ran.
    CompletedWithErrors,
    /// A critical action failed and the execution was aborted.
    Failed,
}

impl ExecutionOutcome {
    /// Returns the name of the outcome.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::CompletedWithErrors => "completed_with_errors",
            Self::Failed => "failed",
        }
    }

    pub(crate) fn from_actions(actions: &[ActionOutcome]) -> Self {
        let failed = |a: &&ActionOutcome| a.status.is_failure();
        if actions.iter().filter(failed).any(|a| a.critical) {
            Self::Failed
        } else if actions.iter().any(|a| a.status.is_failure()) {
            Self::CompletedWithErrors
        } else {
            Self::Succeeded
        }
    }
}

/// A record of one strategy run against one issue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryExecution {
    /// Unique identifier.
    pub id: String,
    /// The strategy that ran.
    pub strategy_id: String,
    /// The issue it ran for.
    pub issue_id: String,
    /// Per-action outcomes, in strategy order.
    pub actions: Vec<ActionOutcome>,
    /// When the execution started.
    pub started_at: DateTime<Utc>,
    /// When the execution finished.
    pub completed_at: DateTime<Utc>,
    /// Overall outcome.
    pub outcome: ExecutionOutcome,
}

impl RecoveryExecution {
    /// Returns the execution's wall-clock duration.
    pub fn duration(&self) -> Duration {
        (self.completed_at - self.started_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(status: ActionStatus, critical: bool) -> ActionOutcome {
        ActionOutcome {
            kind: ActionKind::ClearCache,
            status,
            critical,
            duration: Duration::ZERO,
            error: None,
        }
    }

    #[test]
    fn test_execution_outcome() {
        use ActionStatus::*;

        assert_eq!(
            ExecutionOutcome::from_actions(&[outcome(Succeeded, true), outcome(Succeeded, false)]),
            ExecutionOutcome::Succeeded
        );
        assert_eq!(
            ExecutionOutcome::from_actions(&[outcome(Failed, false), outcome(Succeeded, true)]),
            ExecutionOutcome::CompletedWithErrors
        );
        assert_eq!(
            ExecutionOutcome::from_actions(&[outcome(TimedOut, true), outcome(Skipped, false)]),
            ExecutionOutcome::Failed
        );
        assert_eq!(
            ExecutionOutcome::from_actions(&[]),
            ExecutionOutcome::Succeeded
        );
    }
}
