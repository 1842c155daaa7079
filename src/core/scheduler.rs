//! Cancellable background task scheduler.
//!
//! Every component that runs timers (pool reaper, health loops, recovery
//! sweep, event watchers) owns a [`Scheduler`]. Tasks stop when the
//! scheduler is shut down or dropped, so no task outlives its owner.

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Whether a periodic task wants to keep running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// Run again after the next period.
    Continue,
    /// Stop this task.
    Stop,
}

/// Owns a set of background tasks bound to one cancellation token.
#[derive(Debug)]
pub struct Scheduler {
    name: String,
    token: CancellationToken,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    /// Creates a new scheduler.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            token: CancellationToken::new(),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Returns the scheduler name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns `true` once the scheduler has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Returns a token cancelled together with this scheduler.
    pub fn child_token(&self) -> CancellationToken {
        self.token.child_token()
    }

    /// Runs `future` until it completes or the scheduler is cancelled.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn<Fut>(&self, task: &'static str, future: Fut)
    where
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.spawn_with_token(task, self.token.child_token(), future);
    }

    /// Like [`spawn`](Self::spawn) but stops when `token` is cancelled.
    ///
    /// `token` should be a child of [`child_token`](Self::child_token) so
    /// shutting down the scheduler still stops the task.
    pub fn spawn_with_token<Fut>(&self, task: &'static str, token: CancellationToken, future: Fut)
    where
        Fut: Future<Output = ()> + Send + 'static,
    {
        if self.token.is_cancelled() {
            return;
        }
        let scheduler = self.name.clone();
        let handle = tokio::spawn(async move {
            tokio::select! {
                () = token.cancelled() => {
                    tracing::debug!(scheduler = %scheduler, task, "Background task cancelled");
                }
                () = future => {}
            }
        });
        let mut handles = self
            .handles
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        handles.retain(|h| !h.is_finished());
        handles.push(handle);
    }

    /// Calls `tick` every `period` until it returns [`Tick::Stop`] or the
    /// token is cancelled.
    ///
    /// When `immediate` is set the first call happens right away, otherwise
    /// after one period.
    pub fn spawn_periodic<F, Fut>(
        &self,
        task: &'static str,
        token: CancellationToken,
        period: Duration,
        immediate: bool,
        mut tick: F,
    ) where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Tick> + Send + 'static,
    {
        let start = if immediate {
            tokio::time::Instant::now()
        } else {
            tokio::time::Instant::now() + period
        };
        self.spawn_with_token(task, token, async move {
            let mut interval = tokio::time::interval_at(start, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if tick().await == Tick::Stop {
                    break;
                }
            }
        });
    }

    /// Cancels all tasks without waiting for them.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Cancels all tasks and waits for them to finish.
    pub async fn shutdown(&self) {
        self.token.cancel();
        let handles: Vec<_> = self
            .handles
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .drain(..)
            .collect();
        let count = handles.len();
        for handle in handles {
            let _ = handle.await;
        }
        tracing::debug!(scheduler = %self.name, tasks = count, "Scheduler shut down");
    }

    /// Returns the number of tasks that have not finished yet.
    pub fn active_tasks(&self) -> usize {
        self.handles
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .filter(|h| !h.is_finished())
            .count()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_periodic_runs_until_shutdown() {
        let scheduler = Scheduler::new("test");
        let count = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&count);

        scheduler.spawn_periodic(
            "counter",
            scheduler.child_token(),
            Duration::from_secs(1),
            true,
            move || {
                let c = Arc::clone(&c);
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Tick::Continue
                }
            },
        );

        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert_eq!(count.load(Ordering::SeqCst), 4);

        scheduler.shutdown().await;
        assert_eq!(scheduler.active_tasks(), 0);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(count.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_delayed_start_and_stop() {
        let scheduler = Scheduler::new("test");
        let count = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&count);

        scheduler.spawn_periodic(
            "twice",
            scheduler.child_token(),
            Duration::from_secs(1),
            false,
            move || {
                let c = Arc::clone(&c);
                async move {
                    if c.fetch_add(1, Ordering::SeqCst) + 1 >= 2 {
                        Tick::Stop
                    } else {
                        Tick::Continue
                    }
                }
            },
        );

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_spawn_after_cancel_is_ignored() {
        let scheduler = Scheduler::new("test");
        scheduler.cancel();
        scheduler.spawn("noop", async {});
        assert_eq!(scheduler.active_tasks(), 0);
    }
}
