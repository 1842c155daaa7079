//! The recovery orchestrator.

use crate::circuit_breaker::{CircuitBreaker, CircuitEvent, CircuitPhase};
use crate::core::types::duration_ms;
use crate::core::{RecoveryError, RecoveryResult, Scheduler, Severity, Tick};
use crate::health::{HealthCheckRegistry, HealthEvent};
use crate::recovery::action::{ActionHandler, ActionKind, ActionRequest, RecoveryAction};
use crate::recovery::execution::{
    ActionOutcome, ActionStatus, ExecutionOutcome, RecoveryExecution,
};
use crate::recovery::issue::{Issue, IssueReport, IssueStatus};
use crate::recovery::strategy::RecoveryStrategy;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, Weak};
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::Instant;

/// Configuration for the recovery orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Run only the highest-priority matching strategy per issue.
    pub first_match_wins: bool,

    /// How long resolved and suppressed issues are kept.
    #[serde(with = "duration_ms")]
    pub issue_retention: Duration,

    /// Maximum number of execution records kept.
    pub max_history: usize,

    /// How often the cleanup sweep runs after `start`.
    #[serde(with = "duration_ms")]
    pub cleanup_interval: Duration,

    /// Capacity of the event channel.
    pub event_capacity: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            first_match_wins: false,
            issue_retention: Duration::from_secs(24 * 60 * 60),
            max_history: 1000,
            cleanup_interval: Duration::from_secs(60 * 60),
            event_capacity: 256,
        }
    }
}

impl OrchestratorConfig {
    /// Creates a new configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether first match wins.
    pub fn with_first_match_wins(mut self, enabled: bool) -> Self {
        self.first_match_wins = enabled;
        self
    }

    /// Sets the retention of closed issues.
    pub fn with_issue_retention(mut self, retention: Duration) -> Self {
        self.issue_retention = retention;
        self
    }

    /// Sets the execution history bound.
    pub fn with_max_history(mut self, max: usize) -> Self {
        self.max_history = max;
        self
    }

    /// Sets the cleanup interval.
    pub fn with_cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    /// Validates the configuration.
    pub fn validate(&self) -> RecoveryResult<()> {
        if self.cleanup_interval.is_zero() {
            return Err(RecoveryError::configuration(
                "cleanup_interval must be greater than zero",
            ));
        }
        Ok(())
    }
}

/// Why a matching strategy did not run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    /// The strategy ran too recently.
    Cooldown {
        /// Time until the strategy may run again.
        #[serde(with = "duration_ms")]
        remaining: Duration,
    },
    /// An execution of the strategy is still running.
    Active,
}

/// What happened when an issue was reported.
#[derive(Debug, Clone)]
pub struct IssueHandling {
    /// The recorded issue.
    pub issue: Issue,
    /// Executions run for the issue, in priority order.
    pub executions: Vec<RecoveryExecution>,
    /// Matching strategies that did not run.
    pub skipped: Vec<(String, SkipReason)>,
}

/// Events published by the orchestrator.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RecoveryEvent {
    /// A new issue was recorded.
    IssueDetected {
        /// The issue.
        issue: Issue,
    },
    /// An issue was resolved or suppressed.
    IssueClosed {
        /// The issue, with its final status.
        issue: Issue,
    },
    /// A strategy started running.
    ExecutionStarted {
        /// Execution id.
        execution_id: String,
        /// Strategy id.
        strategy_id: String,
        /// Issue id.
        issue_id: String,
    },
    /// A strategy finished running.
    ExecutionCompleted {
        /// The execution record.
        execution: RecoveryExecution,
    },
}

/// Counts from one cleanup sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    /// Closed issues dropped.
    pub issues_removed: usize,
    /// Execution records dropped.
    pub executions_trimmed: usize,
}

struct IssueRecord {
    issue: Issue,
    closed_at: Option<Instant>,
}

#[derive(Default)]
struct State {
    issues: Vec<IssueRecord>,
    executions: VecDeque<RecoveryExecution>,
    last_started: HashMap<String, Instant>,
    active: HashSet<String>,
}

struct Inner {
    config: OrchestratorConfig,
    handlers: RwLock<HashMap<ActionKind, Arc<dyn ActionHandler>>>,
    /// Kept sorted by priority, highest first.
    strategies: RwLock<Vec<RecoveryStrategy>>,
    state: Mutex<State>,
    events: broadcast::Sender<RecoveryEvent>,
    scheduler: Scheduler,
    started: AtomicBool,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn publish(&self, event: RecoveryEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn matching_strategies(&self, issue: &Issue) -> Vec<RecoveryStrategy> {
        let strategies = self
            .strategies
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let matching = strategies.iter().filter(|s| s.matches(issue)).cloned();
        if self.config.first_match_wins {
            matching.take(1).collect()
        } else {
            matching.collect()
        }
    }

    /// Claims `strategy` for a new execution unless it is active or cooling
    /// down. The strategy stays active until the claim is dropped.
    fn claim(&self, strategy: &RecoveryStrategy) -> Result<ActiveClaim<'_>, SkipReason> {
        let mut state = self.state();
        if state.active.contains(&strategy.id) {
            return Err(SkipReason::Active);
        }
        let now = Instant::now();
        if let Some(last) = state.last_started.get(&strategy.id) {
            let elapsed = now.saturating_duration_since(*last);
            if elapsed < strategy.cooldown {
                return Err(SkipReason::Cooldown {
                    remaining: strategy.cooldown - elapsed,
                });
            }
        }
        state.active.insert(strategy.id.clone());
        state.last_started.insert(strategy.id.clone(), now);
        Ok(ActiveClaim {
            inner: self,
            strategy_id: strategy.id.clone(),
        })
    }

    async fn report_issue(&self, report: IssueReport) -> IssueHandling {
        let issue = Issue::from_report(report);
        self.state().issues.push(IssueRecord {
            issue: issue.clone(),
            closed_at: None,
        });
        crate::audit::emit_issue_detected(&issue);
        self.publish(RecoveryEvent::IssueDetected {
            issue: issue.clone(),
        });

        let mut handling = IssueHandling {
            issue,
            executions: Vec::new(),
            skipped: Vec::new(),
        };

        for strategy in self.matching_strategies(&handling.issue) {
            match self.claim(&strategy) {
                Ok(claim) => {
                    let execution = self.execute(&strategy, &handling.issue).await;
                    drop(claim);
                    handling.executions.push(execution);
                }
                Err(reason) => {
                    tracing::debug!(
                        strategy_id = %strategy.id,
                        issue_id = %handling.issue.id,
                        reason = ?reason,
                        "Skipping recovery strategy"
                    );
                    handling.skipped.push((strategy.id.clone(), reason));
                }
            }
        }

        if handling.executions.is_empty() && handling.skipped.is_empty() {
            tracing::debug!(
                issue_id = %handling.issue.id,
                source = %handling.issue.source,
                "No recovery strategy matched issue"
            );
        }
        handling
    }

    async fn execute(&self, strategy: &RecoveryStrategy, issue: &Issue) -> RecoveryExecution {
        let execution_id = uuid::Uuid::new_v4().to_string();
        let started_at = Utc::now();
        self.publish(RecoveryEvent::ExecutionStarted {
            execution_id: execution_id.clone(),
            strategy_id: strategy.id.clone(),
            issue_id: issue.id.clone(),
        });
        tracing::info!(
            execution_id = %execution_id,
            strategy_id = %strategy.id,
            issue_id = %issue.id,
            actions = strategy.actions.len(),
            "Starting recovery strategy"
        );

        let mut outcomes = Vec::with_capacity(strategy.actions.len());
        let mut aborted = false;
        for action in &strategy.actions {
            if aborted {
                outcomes.push(ActionOutcome::skipped(action.kind.clone(), action.critical));
                continue;
            }
            let request = ActionRequest {
                action: action.clone(),
                issue: issue.clone(),
                strategy_id: strategy.id.clone(),
                execution_id: execution_id.clone(),
            };
            let outcome = self.run_action(action, &request).await;
            if outcome.status.is_failure() && action.critical {
                aborted = true;
            }
            outcomes.push(outcome);
        }

        let execution = RecoveryExecution {
            id: execution_id,
            strategy_id: strategy.id.clone(),
            issue_id: issue.id.clone(),
            outcome: ExecutionOutcome::from_actions(&outcomes),
            actions: outcomes,
            started_at,
            completed_at: Utc::now(),
        };

        {
            let mut state = self.state();
            state.executions.push_back(execution.clone());
            while state.executions.len() > self.config.max_history {
                state.executions.pop_front();
            }
        }

        crate::audit::emit_execution_completed(&execution);
        self.publish(RecoveryEvent::ExecutionCompleted {
            execution: execution.clone(),
        });
        execution
    }

    async fn run_action(&self, action: &RecoveryAction, request: &ActionRequest) -> ActionOutcome {
        let handler = self
            .handlers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&action.kind)
            .cloned();

        let started = Instant::now();
        let result = match handler {
            None => Err(RecoveryError::NoHandler(action.kind.to_string())),
            Some(handler) => {
                match tokio::time::timeout(action.timeout, handler.execute(request)).await {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(source)) => Err(RecoveryError::ActionFailed {
                        action: action.kind.to_string(),
                        source,
                    }),
                    Err(_) => Err(RecoveryError::ActionTimeout {
                        action: action.kind.to_string(),
                        timeout: action.timeout,
                    }),
                }
            }
        };
        let duration = started.elapsed();

        let (status, error) = match result {
            Ok(()) => (ActionStatus::Succeeded, None),
            Err(e) => {
                tracing::warn!(
                    execution_id = %request.execution_id,
                    action = %action.kind,
                    critical = action.critical,
                    error = %e,
                    "Recovery action failed"
                );
                let status = match e {
                    RecoveryError::ActionTimeout { .. } => ActionStatus::TimedOut,
                    _ => ActionStatus::Failed,
                };
                (status, Some(e.to_string()))
            }
        };

        ActionOutcome {
            kind: action.kind.clone(),
            status,
            critical: action.critical,
            duration,
            error,
        }
    }

    /// Moves an open issue to `status`. Closed issues are returned as is.
    fn close_issue(&self, id: &str, status: IssueStatus) -> RecoveryResult<Issue> {
        let (issue, changed) = {
            let mut state = self.state();
            let record = state
                .issues
                .iter_mut()
                .find(|r| r.issue.id == id)
                .ok_or_else(|| RecoveryError::UnknownIssue(id.to_string()))?;
            let changed = record.issue.is_open();
            if changed {
                record.issue.status = status;
                record.issue.resolved_at = Some(Utc::now());
                record.closed_at = Some(Instant::now());
            }
            (record.issue.clone(), changed)
        };
        if changed {
            crate::audit::emit_issue_closed(&issue);
            self.publish(RecoveryEvent::IssueClosed {
                issue: issue.clone(),
            });
        }
        Ok(issue)
    }

    fn resolve_source(&self, source: &str) -> Vec<Issue> {
        let ids: Vec<String> = self
            .state()
            .issues
            .iter()
            .filter(|r| r.issue.is_open() && r.issue.source == source)
            .map(|r| r.issue.id.clone())
            .collect();
        ids.iter()
            .filter_map(|id| self.close_issue(id, IssueStatus::Resolved).ok())
            .collect()
    }

    fn has_open_issue(&self, source: &str) -> bool {
        self.state()
            .issues
            .iter()
            .any(|r| r.issue.is_open() && r.issue.source == source)
    }

    async fn on_health_event(&self, event: HealthEvent) {
        match event {
            HealthEvent::Failure {
                check_id,
                criticality,
                result,
            } => {
                if self.has_open_issue(&check_id) {
                    return;
                }
                let description = result
                    .message
                    .clone()
                    .unwrap_or_else(|| format!("health check '{check_id}' is {}", result.status));
                let report = IssueReport::new(check_id, criticality, description)
                    .with_metadata("health_status", result.status.as_str());
                self.report_issue(report).await;
            }
            HealthEvent::Recovery { check_id, .. } => {
                self.resolve_source(&check_id);
            }
        }
    }

    async fn on_circuit_event(&self, event: CircuitEvent) {
        let CircuitEvent::StateChanged { name, to, .. } = event;
        let source = circuit_source(&name);
        match to {
            CircuitPhase::Open => {
                if self.has_open_issue(&source) {
                    return;
                }
                let report = IssueReport::new(
                    source,
                    Severity::High,
                    format!("circuit '{name}' opened"),
                )
                .with_metadata("circuit", name);
                self.report_issue(report).await;
            }
            CircuitPhase::Closed => {
                self.resolve_source(&source);
            }
            CircuitPhase::HalfOpen => {}
        }
    }

    fn sweep(&self) -> SweepStats {
        let known: HashSet<String> = self
            .strategies
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .map(|s| s.id.clone())
            .collect();

        let now = Instant::now();
        let retention = self.config.issue_retention;
        let mut state = self.state();

        let before = state.issues.len();
        state.issues.retain(|r| match r.closed_at {
            Some(closed_at) => now.saturating_duration_since(closed_at) < retention,
            None => true,
        });
        let issues_removed = before - state.issues.len();

        let excess = state.executions.len().saturating_sub(self.config.max_history);
        state.executions.drain(..excess);

        state.last_started.retain(|id, _| known.contains(id));

        let stats = SweepStats {
            issues_removed,
            executions_trimmed: excess,
        };
        if stats != SweepStats::default() {
            tracing::debug!(
                issues_removed = stats.issues_removed,
                executions_trimmed = stats.executions_trimmed,
                "Recovery sweep"
            );
        }
        stats
    }
}

/// Marks a strategy active; dropping it, even mid-execution, clears the mark.
struct ActiveClaim<'a> {
    inner: &'a Inner,
    strategy_id: String,
}

impl Drop for ActiveClaim<'_> {
    fn drop(&mut self) {
        self.inner.state().active.remove(&self.strategy_id);
    }
}

/// Issue source used for circuit transitions.
pub fn circuit_source(name: &str) -> String {
    format!("circuit:{name}")
}

/// Tracks issues and runs recovery strategies for them.
///
/// Cloning the orchestrator is cheap; all clones share the same state.
///
/// # Example
///
/// ```rust,ignore
/// use bulwark::recovery::*;
///
/// let orchestrator = RecoveryOrchestrator::new(OrchestratorConfig::default());
/// orchestrator.register_handler(ActionKind::ClearCache, PoolHandler::new(pool.clone()));
/// orchestrator.add_strategy(
///     RecoveryStrategy::new("reset-pool")
///         .with_trigger(Trigger::source("db-pool"))
///         .with_action(RecoveryAction::new(ActionKind::ClearCache))
///         .with_cooldown(Duration::from_secs(60)),
/// )?;
/// orchestrator.watch_health(&registry);
/// orchestrator.start()?;
/// ```
#[derive(Clone)]
pub struct RecoveryOrchestrator {
    inner: Arc<Inner>,
}

impl Default for RecoveryOrchestrator {
    fn default() -> Self {
        Self::new(OrchestratorConfig::default())
    }
}

impl RecoveryOrchestrator {
    /// Creates an orchestrator with no handlers and no strategies.
    pub fn new(config: OrchestratorConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                config,
                handlers: RwLock::new(HashMap::new()),
                strategies: RwLock::new(Vec::new()),
                state: Mutex::new(State::default()),
                events,
                scheduler: Scheduler::new("recovery"),
                started: AtomicBool::new(false),
            }),
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &OrchestratorConfig {
        &self.inner.config
    }

    /// Registers the handler for `kind`, replacing any previous one.
    pub fn register_handler(&self, kind: ActionKind, handler: impl ActionHandler) {
        tracing::debug!(action = %kind, "Registered recovery action handler");
        self.inner
            .handlers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(kind, Arc::new(handler));
    }

    /// Adds a strategy.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateStrategy` if a strategy with the same id exists.
    pub fn add_strategy(&self, strategy: RecoveryStrategy) -> RecoveryResult<()> {
        let mut strategies = self
            .inner
            .strategies
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if strategies.iter().any(|s| s.id == strategy.id) {
            return Err(RecoveryError::DuplicateStrategy(strategy.id));
        }
        strategies.push(strategy);
        // Sort by priority (highest first); equal priorities keep insertion order.
        strategies.sort_by(|a, b| b.priority.cmp(&a.priority));
        Ok(())
    }

    /// Removes a strategy.
    ///
    /// # Errors
    ///
    /// Returns `UnknownStrategy` if no strategy has this id.
    pub fn remove_strategy(&self, id: &str) -> RecoveryResult<RecoveryStrategy> {
        let mut strategies = self
            .inner
            .strategies
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let pos = strategies
            .iter()
            .position(|s| s.id == id)
            .ok_or_else(|| RecoveryError::UnknownStrategy(id.to_string()))?;
        Ok(strategies.remove(pos))
    }

    /// Enables or disables a strategy.
    ///
    /// # Errors
    ///
    /// Returns `UnknownStrategy` if no strategy has this id.
    pub fn set_strategy_enabled(&self, id: &str, enabled: bool) -> RecoveryResult<()> {
        let mut strategies = self
            .inner
            .strategies
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let strategy = strategies
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| RecoveryError::UnknownStrategy(id.to_string()))?;
        strategy.enabled = enabled;
        Ok(())
    }

    /// Returns the strategies, highest priority first.
    pub fn strategies(&self) -> Vec<RecoveryStrategy> {
        self.inner
            .strategies
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Records an issue and runs every matching strategy that is neither
    /// cooling down nor already running.
    ///
    /// Strategies run one after another in priority order; with
    /// `first_match_wins` only the highest-priority match is considered.
    pub async fn report_issue(&self, report: IssueReport) -> IssueHandling {
        self.inner.report_issue(report).await
    }

    /// Marks an issue resolved.
    ///
    /// # Errors
    ///
    /// Returns `UnknownIssue` if the issue is not tracked.
    pub fn resolve_issue(&self, id: &str) -> RecoveryResult<Issue> {
        self.inner.close_issue(id, IssueStatus::Resolved)
    }

    /// Resolves every open issue from `source`, returning them.
    pub fn resolve_source(&self, source: &str) -> Vec<Issue> {
        self.inner.resolve_source(source)
    }

    /// Marks an issue suppressed.
    ///
    /// # Errors
    ///
    /// Returns `UnknownIssue` if the issue is not tracked.
    pub fn suppress_issue(&self, id: &str) -> RecoveryResult<Issue> {
        self.inner.close_issue(id, IssueStatus::Suppressed)
    }

    /// Returns every tracked issue, oldest first.
    pub fn issues(&self) -> Vec<Issue> {
        self.inner
            .state()
            .issues
            .iter()
            .map(|r| r.issue.clone())
            .collect()
    }

    /// Returns the open issues, oldest first.
    pub fn open_issues(&self) -> Vec<Issue> {
        self.inner
            .state()
            .issues
            .iter()
            .filter(|r| r.issue.is_open())
            .map(|r| r.issue.clone())
            .collect()
    }

    /// Returns an issue by id.
    pub fn issue(&self, id: &str) -> Option<Issue> {
        self.inner
            .state()
            .issues
            .iter()
            .find(|r| r.issue.id == id)
            .map(|r| r.issue.clone())
    }

    /// Returns the execution history, oldest first.
    pub fn executions(&self) -> Vec<RecoveryExecution> {
        self.inner.state().executions.iter().cloned().collect()
    }

    /// Returns `true` if the strategy started less than its cooldown ago.
    pub fn in_cooldown(&self, strategy_id: &str) -> bool {
        let cooldown = self
            .inner
            .strategies
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .find(|s| s.id == strategy_id)
            .map(|s| s.cooldown);
        let Some(cooldown) = cooldown else {
            return false;
        };
        self.inner
            .state()
            .last_started
            .get(strategy_id)
            .is_some_and(|last| last.elapsed() < cooldown)
    }

    /// Turns health check failures into issues and recoveries into
    /// resolutions.
    ///
    /// A failing check opens at most one issue at a time. Must be called
    /// from within a tokio runtime.
    pub fn watch_health(&self, registry: &HealthCheckRegistry) {
        let mut events = registry.subscribe();
        let weak = Arc::downgrade(&self.inner);
        self.inner.scheduler.spawn("watch-health", async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        let Some(inner) = Weak::upgrade(&weak) else {
                            break;
                        };
                        inner.on_health_event(event).await;
                    }
                    Err(RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "Recovery watcher fell behind health events");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
    }

    /// Opens an issue with source `circuit:<name>` when the circuit opens
    /// and resolves it when the circuit closes.
    ///
    /// Must be called from within a tokio runtime.
    pub fn watch_circuit(&self, breaker: &CircuitBreaker) {
        let mut events = breaker.subscribe();
        let weak = Arc::downgrade(&self.inner);
        self.inner.scheduler.spawn("watch-circuit", async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        let Some(inner) = Weak::upgrade(&weak) else {
                            break;
                        };
                        inner.on_circuit_event(event).await;
                    }
                    Err(RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "Recovery watcher fell behind circuit events");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
    }

    /// Drops closed issues past `issue_retention` and trims the execution
    /// history to `max_history`.
    pub fn sweep(&self) -> SweepStats {
        self.inner.sweep()
    }

    /// Starts the periodic cleanup sweep. Does nothing if already started.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the configuration is invalid.
    pub fn start(&self) -> RecoveryResult<()> {
        self.inner.config.validate()?;
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let weak = Arc::downgrade(&self.inner);
        self.inner.scheduler.spawn_periodic(
            "recovery-sweep",
            self.inner.scheduler.child_token(),
            self.inner.config.cleanup_interval,
            false,
            move || {
                let inner = Weak::upgrade(&weak);
                async move {
                    match inner {
                        Some(inner) => {
                            inner.sweep();
                            Tick::Continue
                        }
                        None => Tick::Stop,
                    }
                }
            },
        );
        tracing::info!(
            strategies = self.strategies().len(),
            "Started recovery orchestrator"
        );
        Ok(())
    }

    /// Subscribes to orchestrator events.
    pub fn subscribe(&self) -> broadcast::Receiver<RecoveryEvent> {
        self.inner.events.subscribe()
    }

    /// Stops the sweep and the watchers and waits for them to finish.
    pub async fn shutdown(&self) {
        self.inner.scheduler.shutdown().await;
        tracing::info!("Recovery orchestrator shut down");
    }
}

impl fmt::Debug for RecoveryOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecoveryOrchestrator")
            .field("config", &self.inner.config)
            .field("strategies", &self.strategies().len())
            .field("open_issues", &self.open_issues().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::CircuitBreakerConfig;
    use crate::health::{HealthCheckConfig, HealthStatus};
    use crate::mock::{MockActionHandler, MockProbe};
    use crate::recovery::strategy::Trigger;

    fn report(source: &str) -> IssueReport {
        IssueReport::new(source, Severity::High, "connection refused")
    }

    fn strategy(id: &str, source: &str) -> RecoveryStrategy {
        RecoveryStrategy::new(id)
            .with_trigger(Trigger::source(source))
            .with_action(RecoveryAction::new(ActionKind::RestartService))
            .with_cooldown(Duration::from_secs(60))
    }

    fn orchestrator(handler: &MockActionHandler) -> RecoveryOrchestrator {
        let orchestrator = RecoveryOrchestrator::default();
        orchestrator.register_handler(ActionKind::RestartService, handler.clone());
        orchestrator
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooldown_gates_executions() {
        let handler = MockActionHandler::new();
        let orchestrator = orchestrator(&handler);
        orchestrator.add_strategy(strategy("restart", "db")).unwrap();

        let handling = orchestrator.report_issue(report("db")).await;
        assert_eq!(handling.executions.len(), 1);
        assert_eq!(handling.executions[0].outcome, ExecutionOutcome::Succeeded);
        assert!(orchestrator.in_cooldown("restart"));

        tokio::time::advance(Duration::from_secs(30)).await;
        let handling = orchestrator.report_issue(report("db")).await;
        assert!(handling.executions.is_empty());
        match &handling.skipped[..] {
            [(id, SkipReason::Cooldown { remaining })] => {
                assert_eq!(id, "restart");
                assert_eq!(*remaining, Duration::from_secs(30));
            }
            other => panic!("unexpected skips: {other:?}"),
        }

        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(!orchestrator.in_cooldown("restart"));
        let handling = orchestrator.report_issue(report("db")).await;
        assert_eq!(handling.executions.len(), 1);
        assert_eq!(handler.call_count(), 2);
        assert_eq!(orchestrator.executions().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_active_strategy_is_skipped() {
        let handler = MockActionHandler::new().with_latency(Duration::from_secs(5));
        let orchestrator = orchestrator(&handler);
        orchestrator
            .add_strategy(strategy("restart", "db").with_cooldown(Duration::ZERO))
            .unwrap();

        let first = tokio::spawn({
            let orchestrator = orchestrator.clone();
            async move { orchestrator.report_issue(report("db")).await }
        });
        tokio::time::sleep(Duration::from_secs(1)).await;

        let second = orchestrator.report_issue(report("db")).await;
        assert_eq!(second.skipped, vec![("restart".to_string(), SkipReason::Active)]);

        let first = first.await.unwrap();
        assert_eq!(first.executions.len(), 1);
        assert_eq!(handler.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_execution_releases_strategy() {
        let handler = MockActionHandler::new().with_latency(Duration::from_secs(5));
        let orchestrator = orchestrator(&handler);
        orchestrator.add_strategy(strategy("restart", "db")).unwrap();

        let cancelled = tokio::time::timeout(
            Duration::from_secs(1),
            orchestrator.report_issue(report("db")),
        )
        .await;
        assert!(cancelled.is_err());
        assert!(orchestrator.executions().is_empty());

        // Only the cooldown gates the next run.
        tokio::time::advance(Duration::from_secs(30)).await;
        let handling = orchestrator.report_issue(report("db")).await;
        assert!(matches!(
            handling.skipped[..],
            [(_, SkipReason::Cooldown { .. })]
        ));

        tokio::time::advance(Duration::from_secs(90)).await;
        let handling = orchestrator.report_issue(report("db")).await;
        assert_eq!(handling.executions.len(), 1);
        assert!(handling.skipped.is_empty());
        assert_eq!(handler.call_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_critical_failure_aborts_execution() {
        let failing = MockActionHandler::failing();
        let handler = MockActionHandler::new();
        let orchestrator = orchestrator(&handler);
        orchestrator.register_handler(ActionKind::Failover, failing.clone());
        orchestrator
            .add_strategy(
                RecoveryStrategy::new("failover")
                    .with_trigger(Trigger::source("db"))
                    .with_action(RecoveryAction::new(ActionKind::Failover).critical())
                    .with_action(RecoveryAction::new(ActionKind::RestartService)),
            )
            .unwrap();

        let handling = orchestrator.report_issue(report("db")).await;
        let execution = &handling.executions[0];
        assert_eq!(execution.outcome, ExecutionOutcome::Failed);
        assert_eq!(execution.actions[0].status, ActionStatus::Failed);
        assert_eq!(execution.actions[1].status, ActionStatus::Skipped);
        assert_eq!(failing.call_count(), 1);
        assert_eq!(handler.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_critical_failures_continue() {
        let handler = MockActionHandler::new();
        let orchestrator = orchestrator(&handler);
        orchestrator
            .add_strategy(
                RecoveryStrategy::new("mixed")
                    .with_trigger(Trigger::source("db"))
                    .with_action(RecoveryAction::new(ActionKind::ClearCache))
                    .with_action(
                        RecoveryAction::new(ActionKind::RestartService).with_config("grace", 5),
                    ),
            )
            .unwrap();

        let handling = orchestrator.report_issue(report("db")).await;
        let execution = &handling.executions[0];
        assert_eq!(execution.outcome, ExecutionOutcome::CompletedWithErrors);
        assert_eq!(execution.actions[0].status, ActionStatus::Failed);
        assert!(execution.actions[0]
            .error
            .as_deref()
            .unwrap()
            .contains("no handler"));
        assert_eq!(execution.actions[1].status, ActionStatus::Succeeded);

        let calls = handler.calls();
        assert_eq!(calls[0].param("grace"), Some(&serde_json::json!(5)));
        assert_eq!(calls[0].issue.source, "db");
        assert_eq!(calls[0].strategy_id, "mixed");
    }

    #[tokio::test(start_paused = true)]
    async fn test_action_timeout() {
        let handler = MockActionHandler::new().with_latency(Duration::from_secs(10));
        let orchestrator = orchestrator(&handler);
        orchestrator
            .add_strategy(
                RecoveryStrategy::new("slow").with_trigger(Trigger::Always).with_action(
                    RecoveryAction::new(ActionKind::RestartService)
                        .with_timeout(Duration::from_secs(2)),
                ),
            )
            .unwrap();

        let started = Instant::now();
        let handling = orchestrator.report_issue(report("db")).await;
        assert_eq!(started.elapsed(), Duration::from_secs(2));
        let action = &handling.executions[0].actions[0];
        assert_eq!(action.status, ActionStatus::TimedOut);
        assert_eq!(handling.executions[0].outcome, ExecutionOutcome::CompletedWithErrors);
    }

    #[tokio::test]
    async fn test_priority_and_first_match_wins() {
        let handler = MockActionHandler::new();
        let orchestrator = RecoveryOrchestrator::new(
            OrchestratorConfig::new().with_first_match_wins(true),
        );
        orchestrator.register_handler(ActionKind::RestartService, handler.clone());
        orchestrator.add_strategy(strategy("low", "db")).unwrap();
        orchestrator
            .add_strategy(strategy("high", "db").with_priority(10))
            .unwrap();
        assert!(matches!(
            orchestrator.add_strategy(strategy("low", "db")),
            Err(RecoveryError::DuplicateStrategy(_))
        ));

        let ids: Vec<_> = orchestrator.strategies().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, ["high", "low"]);

        let handling = orchestrator.report_issue(report("db")).await;
        assert_eq!(handling.executions.len(), 1);
        assert_eq!(handling.executions[0].strategy_id, "high");

        orchestrator.set_strategy_enabled("high", false).unwrap();
        let handling = orchestrator.report_issue(report("db")).await;
        assert_eq!(handling.executions[0].strategy_id, "low");

        orchestrator.remove_strategy("low").unwrap();
        assert!(matches!(
            orchestrator.remove_strategy("low"),
            Err(RecoveryError::UnknownStrategy(_))
        ));
    }

    #[tokio::test]
    async fn test_issue_lifecycle() {
        let orchestrator = RecoveryOrchestrator::default();
        let mut events = orchestrator.subscribe();

        let a = orchestrator.report_issue(report("db")).await.issue;
        let b = orchestrator.report_issue(report("db")).await.issue;
        let c = orchestrator.report_issue(report("cache")).await.issue;
        assert_eq!(orchestrator.open_issues().len(), 3);

        let suppressed = orchestrator.suppress_issue(&c.id).unwrap();
        assert_eq!(suppressed.status, IssueStatus::Suppressed);
        assert!(suppressed.resolved_at.is_some());

        let resolved = orchestrator.resolve_source("db");
        assert_eq!(resolved.len(), 2);
        assert!(orchestrator.open_issues().is_empty());
        assert_eq!(
            orchestrator.issue(&a.id).unwrap().status,
            IssueStatus::Resolved
        );

        // Closing again changes nothing.
        let again = orchestrator.resolve_issue(&b.id).unwrap();
        assert_eq!(again.status, IssueStatus::Resolved);
        assert!(matches!(
            orchestrator.resolve_issue("missing"),
            Err(RecoveryError::UnknownIssue(_))
        ));

        let closed = std::iter::from_fn(|| events.try_recv().ok())
            .filter(|e| matches!(e, RecoveryEvent::IssueClosed { .. }))
            .count();
        assert_eq!(closed, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_health_opens_and_resolves() {
        let registry = HealthCheckRegistry::new();
        let probe = MockProbe::new();
        probe.set_failing(true);
        let config = HealthCheckConfig::new()
            .with_retries(0, Duration::ZERO)
            .with_criticality(Severity::Critical);
        registry.register("db", probe.clone(), config).unwrap();

        let handler = MockActionHandler::new();
        let orchestrator = orchestrator(&handler);
        orchestrator
            .add_strategy(
                RecoveryStrategy::new("page")
                    .with_trigger(Trigger::severity_at_least(Severity::Critical))
                    .with_action(RecoveryAction::new(ActionKind::RestartService)),
            )
            .unwrap();
        orchestrator.watch_health(&registry);

        registry.run_check("db").await.unwrap();
        registry.run_check("db").await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let open = orchestrator.open_issues();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].source, "db");
        assert_eq!(open[0].severity, Severity::Critical);
        assert_eq!(handler.call_count(), 1);

        probe.set_failing(false);
        let result = registry.run_check("db").await.unwrap();
        assert_eq!(result.status, HealthStatus::Healthy);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(orchestrator.open_issues().is_empty());

        orchestrator.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_circuit() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig::new().with_name("payments"));
        let orchestrator = RecoveryOrchestrator::default();
        orchestrator.watch_circuit(&breaker);

        breaker.force_open();
        tokio::time::sleep(Duration::from_millis(10)).await;
        let open = orchestrator.open_issues();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].source, "circuit:payments");
        assert_eq!(open[0].severity, Severity::High);

        breaker.force_close();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(orchestrator.open_issues().is_empty());

        orchestrator.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_retention_and_history() {
        let handler = MockActionHandler::new();
        let orchestrator = RecoveryOrchestrator::new(
            OrchestratorConfig::new()
                .with_issue_retention(Duration::from_secs(3600))
                .with_max_history(2)
                .with_cleanup_interval(Duration::from_secs(600)),
        );
        orchestrator.register_handler(ActionKind::RestartService, handler.clone());
        orchestrator
            .add_strategy(strategy("restart", "db").with_cooldown(Duration::ZERO))
            .unwrap();

        for _ in 0..3 {
            orchestrator.report_issue(report("db")).await;
        }
        assert_eq!(orchestrator.executions().len(), 2);

        let kept = orchestrator.report_issue(report("cache")).await.issue;
        orchestrator.resolve_source("db");
        orchestrator.start().unwrap();

        tokio::time::sleep(Duration::from_secs(1800)).await;
        assert_eq!(orchestrator.issues().len(), 4);

        tokio::time::sleep(Duration::from_secs(2400)).await;
        let issues = orchestrator.issues();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].id, kept.id);

        assert_eq!(orchestrator.sweep(), SweepStats::default());
        orchestrator.shutdown().await;
    }

    #[tokio::test]
    async fn test_zero_cleanup_interval_is_rejected() {
        let orchestrator = RecoveryOrchestrator::new(
            OrchestratorConfig::new().with_cleanup_interval(Duration::ZERO),
        );
        assert!(matches!(
            orchestrator.start(),
            Err(RecoveryError::Configuration { .. })
        ));

        let orchestrator = RecoveryOrchestrator::default();
        orchestrator.start().unwrap();
        orchestrator.start().unwrap();
        orchestrator.shutdown().await;
    }
}
