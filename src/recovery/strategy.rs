//! Recovery strategies and their triggers.

use crate::core::types::duration_ms;
use crate::core::Severity;
use crate::recovery::action::RecoveryAction;
use crate::recovery::issue::Issue;

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A recovery strategy: when to act, and what to do.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryStrategy {
    /// Unique identifier for this strategy.
    pub id: String,

    /// Human-readable name for the strategy.
    pub name: String,

    /// Description of what this strategy does.
    pub description: Option<String>,

    /// The strategy applies when any trigger matches.
    pub triggers: Vec<Trigger>,

    /// Actions run in order.
    pub actions: Vec<RecoveryAction>,

    /// Minimum time between two executions, measured from execution start.
    #[serde(with = "duration_ms")]
    pub cooldown: Duration,

    /// Priority of the strategy (higher = considered first).
    pub priority: i32,

    /// Whether this strategy is enabled.
    pub enabled: bool,
}

impl RecoveryStrategy {
    /// Creates an enabled strategy with no triggers, no actions and a
    /// five minute cooldown.
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            description: None,
            triggers: Vec::new(),
            actions: Vec::new(),
            cooldown: Duration::from_secs(300),
            priority: 0,
            enabled: true,
        }
    }

    /// Sets the name of the strategy.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Adds a trigger.
    pub fn with_trigger(mut self, trigger: Trigger) -> Self {
        self.triggers.push(trigger);
        self
    }

    /// Appends an action.
    pub fn with_action(mut self, action: RecoveryAction) -> Self {
        self.actions.push(action);
        self
    }

    /// Sets the cooldown.
    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    /// Sets the priority.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Enables or disables the strategy.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Evaluates whether this strategy applies to `issue`.
    pub fn matches(&self, issue: &Issue) -> bool {
        self.enabled && self.triggers.iter().any(|t| t.matches(issue))
    }
}

/// A condition on an issue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Trigger {
    /// Matches issues from exactly this source.
    Source {
        /// Source to match.
        source: String,
    },

    /// Matches issues whose source starts with this prefix.
    SourcePrefix {
        /// Prefix to match, such as `"circuit:"`.
        prefix: String,
    },

    /// Matches issues at or above this severity.
    SeverityAtLeast {
        /// Minimum severity to match.
        severity: Severity,
    },

    /// Always matches.
    Always,

    /// Logical AND of multiple triggers.
    And {
        /// Triggers that must all match.
        triggers: Vec<Trigger>,
    },

    /// Logical OR of multiple triggers.
    Or {
        /// Triggers where at least one must match.
        triggers: Vec<Trigger>,
    },

    /// Logical NOT of a trigger.
    Not {
        /// Trigger to negate.
        trigger: Box<Trigger>,
    },
}

impl Trigger {
    /// Creates a trigger on an exact source.
    pub fn source(source: impl Into<String>) -> Self {
        Self::Source {
            source: source.into(),
        }
    }

    /// Creates a trigger on a source prefix.
    pub fn source_prefix(prefix: impl Into<String>) -> Self {
        Self::SourcePrefix {
            prefix: prefix.into(),
        }
    }

    /// Creates a trigger on severity at or above the given level.
    pub fn severity_at_least(severity: Severity) -> Self {
        Self::SeverityAtLeast { severity }
    }

    /// Combines two triggers; both must match.
    pub fn and(self, other: Trigger) -> Self {
        Self::And {
            triggers: vec![self, other],
        }
    }

    /// Evaluates this trigger against `issue`.
    pub fn matches(&self, issue: &Issue) -> bool {
        match self {
            Self::Source { source } => issue.source == *source,
            Self::SourcePrefix { prefix } => issue.source.starts_with(prefix.as_str()),
            Self::SeverityAtLeast { severity } => issue.severity >= *severity,
            Self::Always => true,
            Self::And { triggers } => triggers.iter().all(|t| t.matches(issue)),
            Self::Or { triggers } => triggers.iter().any(|t| t.matches(issue)),
            Self::Not { trigger } => !trigger.matches(issue),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recovery::issue::IssueReport;

    fn issue(source: &str, severity: Severity) -> Issue {
        Issue::from_report(IssueReport::new(source, severity, "test"))
    }

    #[test]
    fn test_source_triggers() {
        let db = issue("db", Severity::Medium);
        assert!(Trigger::source("db").matches(&db));
        assert!(!Trigger::source("cache").matches(&db));

        let circuit = issue("circuit:payments", Severity::High);
        assert!(Trigger::source_prefix("circuit:").matches(&circuit));
        assert!(!Trigger::source_prefix("circuit:").matches(&db));
    }

    #[test]
    fn test_severity_and_combinators() {
        let trigger = Trigger::source("db").and(Trigger::severity_at_least(Severity::High));
        assert!(!trigger.matches(&issue("db", Severity::Medium)));
        assert!(trigger.matches(&issue("db", Severity::Critical)));

        let not = Trigger::Not {
            trigger: Box::new(Trigger::Always),
        };
        assert!(!not.matches(&issue("db", Severity::Low)));
    }

    #[test]
    fn test_strategy_matches_any_trigger() {
        let strategy = RecoveryStrategy::new("reset")
            .with_trigger(Trigger::source("db"))
            .with_trigger(Trigger::source("cache"));
        assert!(strategy.matches(&issue("cache", Severity::Low)));
        assert!(!strategy.matches(&issue("queue", Severity::Low)));

        assert!(!RecoveryStrategy::new("empty").matches(&issue("db", Severity::Low)));
        assert!(!strategy
            .with_enabled(false)
            .matches(&issue("db", Severity::Low)));
    }

    #[test]
    fn test_trigger_serialization() {
        let trigger = Trigger::severity_at_least(Severity::High);
        let json = serde_json::to_value(&trigger).unwrap();
        assert_eq!(json["type"], "severity_at_least");
        assert_eq!(json["severity"], "high");
        let back: Trigger = serde_json::from_value(json).unwrap();
        assert_eq!(back, trigger);
    }
}
