//! Issues tracked by the recovery orchestrator.

use crate::core::Severity;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Lifecycle status of an issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueStatus {
    /// Detected and not yet resolved.
    Open,
    /// The underlying condition cleared.
    Resolved,
    /// Dismissed by an operator.
    Suppressed,
}

impl IssueStatus {
    /// Returns the name of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Resolved => "resolved",
            Self::Suppressed => "suppressed",
        }
    }
}

impl fmt::Display for IssueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A detected problem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    /// Unique identifier.
    pub id: String,
    /// How serious the problem is.
    pub severity: Severity,
    /// Where the problem was detected, such as a health check id.
    pub source: String,
    /// Human-readable description.
    pub description: String,
    /// Lifecycle status.
    pub status: IssueStatus,
    /// When the issue was reported.
    pub detected_at: DateTime<Utc>,
    /// When the issue was resolved or suppressed.
    pub resolved_at: Option<DateTime<Utc>>,
    /// Free-form context supplied by the reporter.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl Issue {
    pub(crate) fn from_report(report: IssueReport) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            severity: report.severity,
            source: report.source,
            description: report.description,
            status: IssueStatus::Open,
            detected_at: Utc::now(),
            resolved_at: None,
            metadata: report.metadata,
        }
    }

    /// Returns `true` while the issue is open.
    pub fn is_open(&self) -> bool {
        self.status == IssueStatus::Open
    }
}

/// A report of a new issue, as passed to
/// [`RecoveryOrchestrator::report_issue`](crate::recovery::RecoveryOrchestrator::report_issue).
#[derive(Debug, Clone)]
pub struct IssueReport {
    /// Where the problem was detected.
    pub source: String,
    /// How serious the problem is.
    pub severity: Severity,
    /// Human-readable description.
    pub description: String,
    /// Free-form context.
    pub metadata: Map<String, Value>,
}

impl IssueReport {
    /// Creates a report.
    pub fn new(
        source: impl Into<String>,
        severity: Severity,
        description: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            severity,
            description: description.into(),
            metadata: Map::new(),
        }
    }

    /// Adds a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}
