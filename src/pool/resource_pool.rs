//! The resource pool implementation.

use crate::core::{PoolError, PoolResult, ResourceFactory, Scheduler, Tick};
use crate::pool::config::{validate_bounds, PoolConfig};
use crate::pool::entry::{DestroyReason, Entry, Lease, LeaseGuard, PooledResource};
use crate::pool::metrics::{PoolCounters, PoolStats};

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tokio::sync::oneshot;
use tokio::time::Instant;

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

/// A queued acquisition waiting for a release.
struct Waiter<T> {
    id: u64,
    tx: oneshot::Sender<Entry<T>>,
}

/// Everything guarded by the pool lock.
struct PoolState<T> {
    min_size: usize,
    max_size: usize,
    available: VecDeque<Entry<T>>,
    borrowed: HashSet<u64>,
    waiters: VecDeque<Waiter<T>>,
    /// Slots reserved for constructions in flight.
    creating: usize,
    next_resource_id: u64,
    next_waiter_id: u64,
    closed: bool,
    counters: PoolCounters,
}

impl<T> PoolState<T> {
    fn total(&self) -> usize {
        self.available.len() + self.borrowed.len()
    }

    fn has_room(&self) -> bool {
        self.total() + self.creating < self.max_size
    }

    fn live_waiters(&self) -> usize {
        self.waiters.iter().filter(|w| !w.tx.is_closed()).count()
    }

    fn allocate_resource_id(&mut self) -> u64 {
        self.next_resource_id += 1;
        self.next_resource_id
    }

    /// Gives `entry` to the oldest live waiter, or parks it as available.
    fn hand_off(&mut self, mut entry: Entry<T>) {
        while let Some(waiter) = self.waiters.pop_front() {
            if waiter.tx.is_closed() {
                continue;
            }
            self.borrowed.insert(entry.id);
            match waiter.tx.send(entry) {
                Ok(()) => return,
                Err(returned) => {
                    self.borrowed.remove(&returned.id);
                    entry = returned;
                }
            }
        }
        self.available.push_back(entry);
    }

    fn exhausted(&self) -> PoolError {
        PoolError::PoolExhausted {
            borrowed: self.borrowed.len(),
            max_size: self.max_size,
            waiters: self.live_waiters(),
        }
    }
}

/// Shared pool internals; background tasks hold it weakly.
struct Shared<F: ResourceFactory> {
    pool_id: u64,
    factory: F,
    config: PoolConfig,
    state: Mutex<PoolState<F::Resource>>,
    scheduler: Scheduler,
}

impl<F: ResourceFactory> Shared<F> {
    fn lock(&self) -> MutexGuard<'_, PoolState<F::Resource>> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn name(&self) -> &str {
        &self.config.name
    }

    /// Removes a borrowed entry from the books and destroys it.
    async fn discard(&self, entry: Entry<F::Resource>, reason: DestroyReason) {
        {
            let mut state = self.lock();
            state.borrowed.remove(&entry.id);
            state.counters.destroyed += 1;
        }
        self.destroy(entry, reason).await;
    }

    /// Destroys an entry already removed from the books.
    async fn destroy(&self, entry: Entry<F::Resource>, reason: DestroyReason) {
        crate::audit::emit_resource_destroyed(self.name(), entry.id, reason, entry.use_count);
        self.factory.destroy(entry.resource).await;
    }

    /// Creates resources for live waiters, then up to `min_size`.
    async fn refill(&self) -> usize {
        let mut created = 0;
        loop {
            let id = {
                let mut state = self.lock();
                let below_min = state.total() + state.creating < state.min_size;
                if state.closed || !state.has_room() || (!below_min && state.live_waiters() == 0)
                {
                    return created;
                }
                state.creating += 1;
                state.allocate_resource_id()
            };
            let mut slot = CreateSlot::new(self);

            match self.factory.create().await {
                Ok(resource) => {
                    let entry = Entry::new(id, resource);
                    let rejected = {
                        let mut state = self.lock();
                        slot.settle(&mut state);
                        state.counters.created += 1;
                        if state.closed {
                            state.counters.destroyed += 1;
                            Some(entry)
                        } else {
                            state.hand_off(entry);
                            None
                        }
                    };
                    if let Some(entry) = rejected {
                        self.destroy(entry, DestroyReason::Closed).await;
                        return created;
                    }
                    created += 1;
                }
                Err(e) => {
                    {
                        let mut state = self.lock();
                        slot.settle(&mut state);
                        state.counters.create_errors += 1;
                    }
                    tracing::warn!(pool = %self.name(), error = %e, "Failed to refill pool");
                    return created;
                }
            }
        }
    }

    fn spawn_refill(self: &Arc<Self>) {
        if tokio::runtime::Handle::try_current().is_err() {
            return;
        }
        let shared = Arc::clone(self);
        self.scheduler.spawn("refill", async move {
            shared.refill().await;
        });
    }

    async fn reap(&self) -> usize {
        let now = Instant::now();
        let victims: Vec<Entry<F::Resource>> = {
            let mut state = self.lock();
            let mut removable = state.total().saturating_sub(state.min_size);
            let mut kept = VecDeque::with_capacity(state.available.len());
            let mut victims = Vec::new();
            // Front of the queue holds the longest-idle resources.
            while let Some(entry) = state.available.pop_front() {
                if removable > 0 && entry.idle_for(now) > self.config.idle_timeout {
                    removable -= 1;
                    victims.push(entry);
                } else {
                    kept.push_back(entry);
                }
            }
            state.available = kept;
            state.counters.destroyed += victims.len() as u64;
            victims
        };

        let count = victims.len();
        for entry in victims {
            self.destroy(entry, DestroyReason::Idle).await;
        }
        if count > 0 {
            tracing::debug!(pool = %self.name(), reaped = count, "Reaped idle resources");
        }
        count
    }

    /// Removes available resources, `limit` at most, oldest first.
    async fn drain_available(&self, limit: usize, reason: DestroyReason) -> usize {
        let drained: Vec<Entry<F::Resource>> = {
            let mut state = self.lock();
            let count = limit.min(state.available.len());
            let drained: Vec<_> = state.available.drain(..count).collect();
            state.counters.destroyed += drained.len() as u64;
            drained
        };
        let count = drained.len();
        for entry in drained {
            self.destroy(entry, reason).await;
        }
        count
    }
}

impl<F: ResourceFactory> Lease for Shared<F> {
    fn forfeit(self: Arc<Self>, id: u64) {
        let removed = {
            let mut state = self.lock();
            let removed = state.borrowed.remove(&id);
            if removed {
                state.counters.destroyed += 1;
            }
            removed
        };
        if removed {
            tracing::warn!(
                pool = %self.name(),
                resource_id = id,
                "Pooled resource dropped without release"
            );
            crate::audit::emit_resource_destroyed(self.name(), id, DestroyReason::Forfeited, 0);
            self.spawn_refill();
        }
    }
}

/// A reserved construction slot. Dropping it unsettled gives the slot back.
struct CreateSlot<'a, F: ResourceFactory> {
    shared: &'a Shared<F>,
    armed: bool,
}

impl<'a, F: ResourceFactory> CreateSlot<'a, F> {
    /// Reserves a slot; the caller has already bumped `creating`.
    fn new(shared: &'a Shared<F>) -> Self {
        Self {
            shared,
            armed: true,
        }
    }

    fn settle(&mut self, state: &mut PoolState<F::Resource>) {
        state.creating -= 1;
        self.armed = false;
    }
}

impl<F: ResourceFactory> Drop for CreateSlot<'_, F> {
    fn drop(&mut self) {
        if self.armed {
            self.shared.lock().creating -= 1;
        }
    }
}

/// A queued acquisition.
///
/// Dropping it leaves the queue; an entry already handed to it goes to the
/// next waiter or back to the available set.
struct PendingWaiter<'a, F: ResourceFactory> {
    shared: &'a Shared<F>,
    id: u64,
    rx: oneshot::Receiver<Entry<F::Resource>>,
}

impl<F: ResourceFactory> Drop for PendingWaiter<'_, F> {
    fn drop(&mut self) {
        let mut state = self.shared.lock();
        if let Some(pos) = state.waiters.iter().position(|w| w.id == self.id) {
            state.waiters.remove(pos);
        }
        if let Ok(entry) = self.rx.try_recv() {
            state.borrowed.remove(&entry.id);
            state.hand_off(entry);
        }
    }
}

/// A bounded pool of interchangeable, expensive-to-create resources.
///
/// Cloning the pool is cheap; all clones share the same resources.
///
/// # Example
///
/// ```rust,ignore
/// use bulwark::pool::{PoolConfig, ResourcePool};
///
/// let pool = ResourcePool::new(ConnectionFactory::new(url), PoolConfig::new().with_size(2, 5)).await?;
///
/// let conn = pool.acquire().await?;
/// conn.query("SELECT 1").await?;
/// pool.release(conn).await?;
/// ```
pub struct ResourcePool<F: ResourceFactory> {
    shared: Arc<Shared<F>>,
}

impl<F: ResourceFactory> Clone for ResourcePool<F> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<F: ResourceFactory> ResourcePool<F> {
    /// Creates a pool, warms it to `min_size` and starts the reaper.
    ///
    /// Construction failures while warming up are counted as create errors
    /// and do not fail the pool. Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::Configuration` if `config` is invalid.
    pub async fn new(factory: F, config: PoolConfig) -> PoolResult<Self> {
        config.validate()?;

        let name = config.name.clone();
        let shared = Arc::new(Shared {
            pool_id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
            factory,
            state: Mutex::new(PoolState {
                min_size: config.min_size,
                max_size: config.max_size,
                available: VecDeque::with_capacity(config.max_size),
                borrowed: HashSet::with_capacity(config.max_size),
                waiters: VecDeque::new(),
                creating: 0,
                next_resource_id: 0,
                next_waiter_id: 0,
                closed: false,
                counters: PoolCounters::new(config.latency_sample_size),
            }),
            scheduler: Scheduler::new(format!("pool:{name}")),
            config,
        });

        let warmed = shared.refill().await;

        if let Some(interval) = shared.config.reap_interval {
            let weak = Arc::downgrade(&shared);
            shared.scheduler.spawn_periodic(
                "reaper",
                shared.scheduler.child_token(),
                interval,
                false,
                move || {
                    let weak = Weak::clone(&weak);
                    async move {
                        match weak.upgrade() {
                            Some(shared) => {
                                shared.reap().await;
                                Tick::Continue
                            }
                            None => Tick::Stop,
                        }
                    }
                },
            );
        }

        tracing::info!(
            pool = %name,
            min_size = shared.config.min_size,
            max_size = shared.config.max_size,
            warmed,
            "Created resource pool"
        );

        Ok(Self { shared })
    }

    /// Borrows a resource, waiting up to `acquire_timeout` for one.
    ///
    /// # Errors
    ///
    /// - `AcquireTimeout` if no resource became available in time.
    /// - `PoolExhausted` if the waiter queue is full.
    /// - `PoolClosed` if the pool is closed before or while waiting.
    pub async fn acquire(&self) -> PoolResult<PooledResource<F::Resource>> {
        let started = Instant::now();
        let result = self.acquire_inner(started, true).await;
        self.record_acquire(&result, started);
        result
    }

    /// Borrows a resource without waiting.
    ///
    /// # Errors
    ///
    /// - `PoolExhausted` if the pool is at capacity with nothing available.
    /// - `CreateFailed` if a new resource could not be constructed.
    /// - `PoolClosed` if the pool is closed.
    pub async fn try_acquire(&self) -> PoolResult<PooledResource<F::Resource>> {
        let started = Instant::now();
        let result = self.acquire_inner(started, false).await;
        self.record_acquire(&result, started);
        result
    }

    async fn acquire_inner(
        &self,
        started: Instant,
        wait: bool,
    ) -> PoolResult<PooledResource<F::Resource>> {
        enum Step<T> {
            Borrow(Entry<T>),
            Create(u64),
            Wait(oneshot::Receiver<Entry<T>>, u64),
        }

        let shared = &self.shared;
        let mut create_failed = false;

        loop {
            let step = {
                let mut state = shared.lock();
                if state.closed {
                    return Err(PoolError::PoolClosed);
                }
                if let Some(entry) = state.available.pop_back() {
                    state.borrowed.insert(entry.id);
                    Step::Borrow(entry)
                } else if state.has_room() && !create_failed {
                    state.creating += 1;
                    Step::Create(state.allocate_resource_id())
                } else if !wait {
                    return Err(state.exhausted());
                } else {
                    if let Some(max) = shared.config.max_waiters {
                        if state.live_waiters() >= max {
                            return Err(state.exhausted());
                        }
                    }
                    let (tx, rx) = oneshot::channel();
                    state.next_waiter_id += 1;
                    let waiter_id = state.next_waiter_id;
                    state.waiters.push_back(Waiter { id: waiter_id, tx });
                    Step::Wait(rx, waiter_id)
                }
            };

            match step {
                Step::Borrow(entry) => {
                    let resource = self.checkout(entry);
                    if shared.config.validate_on_borrow
                        && !shared.factory.validate(&resource).await
                    {
                        let PooledResource { entry, mut guard } = resource;
                        guard.disarm();
                        tracing::debug!(
                            pool = %shared.name(),
                            resource_id = entry.id,
                            "Discarding resource that failed validation on borrow"
                        );
                        shared.discard(entry, DestroyReason::ValidationFailed).await;
                        continue;
                    }
                    return Ok(resource);
                }
                Step::Create(id) => {
                    let mut slot = CreateSlot::new(&**shared);
                    match shared.factory.create().await {
                        Ok(resource) => {
                            let entry = Entry::new(id, resource);
                            let closed = {
                                let mut state = shared.lock();
                                slot.settle(&mut state);
                                state.counters.created += 1;
                                if state.closed {
                                    state.counters.destroyed += 1;
                                } else {
                                    state.borrowed.insert(id);
                                }
                                state.closed
                            };
                            if closed {
                                shared.destroy(entry, DestroyReason::Closed).await;
                                return Err(PoolError::PoolClosed);
                            }
                            return Ok(self.checkout(entry));
                        }
                        Err(e) => {
                            {
                                let mut state = shared.lock();
                                slot.settle(&mut state);
                                state.counters.create_errors += 1;
                            }
                            tracing::warn!(pool = %shared.name(), error = %e, "Failed to create resource");
                            if !wait {
                                return Err(PoolError::CreateFailed(e));
                            }
                            create_failed = true;
                        }
                    }
                }
                Step::Wait(rx, waiter_id) => {
                    return self.wait_for_release(rx, waiter_id, started).await;
                }
            }
        }
    }

    async fn wait_for_release(
        &self,
        rx: oneshot::Receiver<Entry<F::Resource>>,
        waiter_id: u64,
        started: Instant,
    ) -> PoolResult<PooledResource<F::Resource>> {
        let mut pending = PendingWaiter {
            shared: &*self.shared,
            id: waiter_id,
            rx,
        };
        let deadline = started + self.shared.config.acquire_timeout;
        match tokio::time::timeout_at(deadline, &mut pending.rx).await {
            Ok(Ok(entry)) => Ok(self.checkout(entry)),
            Ok(Err(_)) => Err(PoolError::PoolClosed),
            Err(_) => {
                {
                    let mut state = self.shared.lock();
                    if let Some(pos) = state.waiters.iter().position(|w| w.id == waiter_id) {
                        state.waiters.remove(pos);
                        state.counters.timeouts += 1;
                        return Err(PoolError::AcquireTimeout {
                            waited: started.elapsed(),
                        });
                    }
                }
                // A release dequeued this waiter before the deadline took the lock.
                match pending.rx.try_recv() {
                    Ok(entry) => Ok(self.checkout(entry)),
                    Err(_) => Err(PoolError::PoolClosed),
                }
            }
        }
    }

    fn checkout(&self, mut entry: Entry<F::Resource>) -> PooledResource<F::Resource> {
        entry.use_count += 1;
        let weak = Arc::downgrade(&self.shared);
        let lease: Weak<dyn Lease> = weak;
        let guard = LeaseGuard::new(self.shared.pool_id, entry.id, lease);
        PooledResource { entry, guard }
    }

    fn record_acquire(&self, result: &PoolResult<PooledResource<F::Resource>>, started: Instant) {
        let mut state = self.shared.lock();
        match result {
            Ok(_) => {
                state.counters.acquire_successes += 1;
                state.counters.latency.record(started.elapsed());
            }
            Err(e) => {
                state.counters.acquire_failures += 1;
                drop(state);
                tracing::debug!(pool = %self.shared.name(), error = %e, "Acquire failed");
            }
        }
    }

    /// Returns a borrowed resource to the pool.
    ///
    /// Runs the factory's cleanup, then either recycles the resource (handing
    /// it straight to the oldest waiter, if any) or destroys it when it fails
    /// validation or has reached `max_uses`. A destroyed resource is replaced
    /// in the background up to `min_size`.
    ///
    /// # Errors
    ///
    /// Returns `UnknownResource` if the resource was not borrowed from this
    /// pool.
    pub async fn release(&self, resource: PooledResource<F::Resource>) -> PoolResult<()> {
        let shared = &self.shared;
        let PooledResource {
            mut entry,
            mut guard,
        } = resource;

        if guard.pool_id != shared.pool_id || !shared.lock().borrowed.contains(&entry.id) {
            return Err(PoolError::UnknownResource { id: entry.id });
        }

        // Armed until the books are updated; a dropped release forfeits the slot.
        shared.factory.cleanup(&mut entry.resource).await;

        let worn_out = shared
            .config
            .max_uses
            .is_some_and(|max| entry.use_count >= max);
        let reason = if worn_out {
            Some(DestroyReason::MaxUses)
        } else if shared.config.validate_on_return && !shared.factory.validate(&entry.resource).await
        {
            Some(DestroyReason::ValidationFailed)
        } else {
            None
        };

        guard.disarm();
        if let Some(reason) = reason {
            shared.discard(entry, reason).await;
            shared.spawn_refill();
            return Ok(());
        }

        let rejected = {
            let mut state = shared.lock();
            state.borrowed.remove(&entry.id);
            let reason = if state.closed {
                Some(DestroyReason::Closed)
            } else if state.total() >= state.max_size {
                Some(DestroyReason::Surplus)
            } else {
                None
            };
            match reason {
                Some(reason) => {
                    state.counters.destroyed += 1;
                    Some((entry, reason))
                }
                None => {
                    entry.last_used_at = Instant::now();
                    state.hand_off(entry);
                    None
                }
            }
        };
        if let Some((entry, reason)) = rejected {
            shared.destroy(entry, reason).await;
        }
        Ok(())
    }

    /// Destroys available resources idle longer than `idle_timeout`, never
    /// dropping the pool below `min_size`. Returns the number destroyed.
    pub async fn reap(&self) -> usize {
        self.shared.reap().await
    }

    /// Destroys every available resource and refills to `min_size`.
    /// Returns the number destroyed.
    pub async fn clear(&self) -> usize {
        let cleared = self
            .shared
            .drain_available(usize::MAX, DestroyReason::Cleared)
            .await;
        self.shared.refill().await;
        tracing::info!(pool = %self.shared.name(), cleared, "Cleared pool");
        cleared
    }

    /// Changes the pool bounds at runtime.
    ///
    /// Shrinking destroys surplus available resources immediately; borrowed
    /// surplus is destroyed as it is released. Growing serves queued waiters.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::Configuration` for invalid bounds.
    pub async fn resize(&self, min_size: usize, max_size: usize) -> PoolResult<()> {
        validate_bounds(min_size, max_size)?;
        let surplus = {
            let mut state = self.shared.lock();
            if state.closed {
                return Err(PoolError::PoolClosed);
            }
            state.min_size = min_size;
            state.max_size = max_size;
            state.total().saturating_sub(max_size)
        };
        self.shared
            .drain_available(surplus, DestroyReason::Surplus)
            .await;
        self.shared.refill().await;
        tracing::info!(pool = %self.shared.name(), min_size, max_size, "Resized pool");
        Ok(())
    }

    /// Closes the pool.
    ///
    /// Pending acquisitions are rejected with `PoolClosed`, the reaper stops
    /// and available resources are destroyed. Borrowed resources are
    /// destroyed when released.
    pub async fn close(&self) {
        let drained: Vec<Entry<F::Resource>> = {
            let mut state = self.shared.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            let rejected = state.waiters.len();
            state.waiters.clear();
            state.counters.destroyed += state.available.len() as u64;
            tracing::info!(
                pool = %self.shared.name(),
                rejected_waiters = rejected,
                borrowed = state.borrowed.len(),
                "Closing pool"
            );
            state.available.drain(..).collect()
        };
        self.shared.scheduler.shutdown().await;
        for entry in drained {
            self.shared.destroy(entry, DestroyReason::Closed).await;
        }
    }

    /// Returns `true` once [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }

    /// Returns a snapshot of pool state and counters.
    pub fn stats(&self) -> PoolStats {
        let state = self.shared.lock();
        PoolStats {
            name: self.shared.config.name.clone(),
            total: state.total(),
            available: state.available.len(),
            borrowed: state.borrowed.len(),
            pending: state.live_waiters(),
            min_size: state.min_size,
            max_size: state.max_size,
            closed: state.closed,
            created: state.counters.created,
            destroyed: state.counters.destroyed,
            create_errors: state.counters.create_errors,
            acquire_successes: state.counters.acquire_successes,
            acquire_failures: state.counters.acquire_failures,
            timeouts: state.counters.timeouts,
            latency: state.counters.latency.percentiles(),
        }
    }

    /// Returns the pool configuration as given at construction.
    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    /// Returns the resource factory.
    pub fn factory(&self) -> &F {
        &self.shared.factory
    }
}

impl<F: ResourceFactory> fmt::Debug for ResourcePool<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourcePool")
            .field("name", &self.shared.config.name)
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::BoxError;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    #[derive(Default)]
    struct Counter {
        next: AtomicU64,
        destroyed: AtomicU64,
        invalid: AtomicBool,
        failing: AtomicBool,
    }

    #[derive(Clone, Default)]
    struct CountingFactory(Arc<Counter>);

    #[async_trait]
    impl ResourceFactory for CountingFactory {
        type Resource = u64;

        async fn create(&self) -> Result<u64, BoxError> {
            if self.0.failing.load(Ordering::SeqCst) {
                return Err("backend down".into());
            }
            Ok(self.0.next.fetch_add(1, Ordering::SeqCst))
        }

        async fn validate(&self, _resource: &u64) -> bool {
            !self.0.invalid.load(Ordering::SeqCst)
        }

        async fn destroy(&self, _resource: u64) {
            self.0.destroyed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn config(min: usize, max: usize) -> PoolConfig {
        PoolConfig::new()
            .with_name("test")
            .with_size(min, max)
            .with_acquire_timeout(Duration::from_millis(100))
            .with_reap_interval(None)
    }

    async fn pool(min: usize, max: usize) -> ResourcePool<CountingFactory> {
        ResourcePool::new(CountingFactory::default(), config(min, max))
            .await
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_warms_to_min_size() {
        let pool = pool(2, 5).await;
        let stats = pool.stats();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.available, 2);
        assert_eq!(stats.created, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_exceeds_max_size() {
        let pool = pool(2, 5).await;

        let mut held = Vec::new();
        for _ in 0..5 {
            held.push(pool.acquire().await.unwrap());
        }
        assert_eq!(pool.stats().total, 5);

        let err = pool.acquire().await.unwrap_err();
        assert!(matches!(err, PoolError::AcquireTimeout { .. }));

        let stats = pool.stats();
        assert_eq!(stats.total, 5);
        assert_eq!(stats.borrowed, 5);
        assert_eq!(stats.timeouts, 1);
        assert_eq!(stats.pending, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_recycles_most_recent() {
        let pool = pool(2, 5).await;

        let first = pool.acquire().await.unwrap();
        let id = first.id();
        assert_eq!(first.use_count(), 1);
        pool.release(first).await.unwrap();

        let again = pool.acquire().await.unwrap();
        assert_eq!(again.id(), id);
        assert_eq!(again.use_count(), 2);
        assert_eq!(pool.stats().created, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiters_served_in_arrival_order() {
        let pool = pool(1, 1).await;
        let held = pool.acquire().await.unwrap();
        let id = held.id();

        let p1 = pool.clone();
        let first = tokio::spawn(async move { p1.acquire().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        let p2 = pool.clone();
        let second = tokio::spawn(async move { p2.acquire().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(pool.stats().pending, 2);

        pool.release(held).await.unwrap();
        let got = first.await.unwrap().unwrap();
        assert_eq!(got.id(), id);
        assert!(!second.is_finished());

        pool.release(got).await.unwrap();
        let got = second.await.unwrap().unwrap();
        assert_eq!(got.id(), id);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiter_queue_bound() {
        let pool = ResourcePool::new(CountingFactory::default(), config(1, 1).with_max_waiters(1))
            .await
            .unwrap();
        let _held = pool.acquire().await.unwrap();

        let p = pool.clone();
        let _waiting = tokio::spawn(async move { p.acquire().await });
        tokio::time::sleep(Duration::from_millis(10)).await;

        let err = pool.acquire().await.unwrap_err();
        assert!(matches!(err, PoolError::PoolExhausted { waiters: 1, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reaper_shrinks_idle_pool_to_min() {
        let config = config(1, 5)
            .with_idle_timeout(Duration::from_millis(100))
            .with_reap_interval(Some(Duration::from_millis(50)));
        let pool = ResourcePool::new(CountingFactory::default(), config)
            .await
            .unwrap();

        let a = pool.acquire().await.unwrap();
        let b = pool.acquire().await.unwrap();
        let c = pool.acquire().await.unwrap();
        for r in [a, b, c] {
            pool.release(r).await.unwrap();
        }
        assert_eq!(pool.stats().total, 3);

        tokio::time::sleep(Duration::from_millis(500)).await;
        let stats = pool.stats();
        assert_eq!(stats.total, 1);
        assert_eq!(stats.destroyed, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_uses_retires_resource() {
        let pool = ResourcePool::new(CountingFactory::default(), config(0, 2).with_max_uses(2))
            .await
            .unwrap();

        let r = pool.acquire().await.unwrap();
        let id = r.id();
        pool.release(r).await.unwrap();
        let r = pool.acquire().await.unwrap();
        assert_eq!(r.id(), id);
        pool.release(r).await.unwrap();

        let r = pool.acquire().await.unwrap();
        assert_ne!(r.id(), id);
        assert_eq!(pool.stats().destroyed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_resource_replaced_on_borrow() {
        let factory = CountingFactory::default();
        let pool = ResourcePool::new(factory.clone(), config(1, 2)).await.unwrap();

        factory.0.invalid.store(true, Ordering::SeqCst);
        let r = pool.acquire().await.unwrap();
        assert_eq!(*r, 1);
        assert_eq!(factory.0.destroyed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_resource_is_forfeited() {
        let pool = pool(1, 2).await;
        let r = pool.acquire().await.unwrap();
        drop(r);

        let stats = pool.stats();
        assert_eq!(stats.borrowed, 0);
        assert_eq!(stats.destroyed, 1);

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(pool.stats().available, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_to_wrong_pool() {
        let a = pool(1, 1).await;
        let b = pool(1, 1).await;
        let r = a.acquire().await.unwrap();
        let err = b.release(r).await.unwrap_err();
        assert!(matches!(err, PoolError::UnknownResource { .. }));
        assert_eq!(a.stats().borrowed, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_rejects_waiters() {
        let pool = pool(1, 1).await;
        let held = pool.acquire().await.unwrap();

        let p = pool.clone();
        let waiting = tokio::spawn(async move { p.acquire().await });
        tokio::time::sleep(Duration::from_millis(10)).await;

        pool.close().await;
        assert!(matches!(
            waiting.await.unwrap().unwrap_err(),
            PoolError::PoolClosed
        ));
        assert!(matches!(pool.acquire().await, Err(PoolError::PoolClosed)));

        pool.release(held).await.unwrap();
        let stats = pool.stats();
        assert!(stats.closed);
        assert_eq!(stats.total, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resize_and_clear() {
        let pool = pool(0, 5).await;
        let held: Vec<_> = [
            pool.acquire().await.unwrap(),
            pool.acquire().await.unwrap(),
            pool.acquire().await.unwrap(),
            pool.acquire().await.unwrap(),
        ]
        .into();
        for r in held {
            pool.release(r).await.unwrap();
        }
        assert_eq!(pool.stats().available, 4);

        pool.resize(1, 2).await.unwrap();
        let stats = pool.stats();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.max_size, 2);

        assert_eq!(pool.clear().await, 2);
        assert_eq!(pool.stats().total, 1);

        assert!(pool.resize(3, 2).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_try_acquire() {
        let factory = CountingFactory::default();
        let pool = ResourcePool::new(factory.clone(), config(0, 1)).await.unwrap();

        factory.0.failing.store(true, Ordering::SeqCst);
        assert!(matches!(
            pool.try_acquire().await,
            Err(PoolError::CreateFailed(_))
        ));
        assert_eq!(pool.stats().create_errors, 1);

        factory.0.failing.store(false, Ordering::SeqCst);
        let _r = pool.try_acquire().await.unwrap();
        assert!(matches!(
            pool.try_acquire().await,
            Err(PoolError::PoolExhausted { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_aborted_waiter_returns_handed_off_resource() {
        let pool = pool(1, 1).await;
        let held = pool.acquire().await.unwrap();
        let held_id = held.id();

        let waiter = tokio::spawn({
            let pool = pool.clone();
            async move { pool.acquire().await.map(|r| r.id()) }
        });
        tokio::task::yield_now().await;
        assert_eq!(pool.stats().pending, 1);

        // The release hands the resource to the waiter, which is aborted
        // before it wakes up to take it.
        pool.release(held).await.unwrap();
        waiter.abort();
        assert!(waiter.await.unwrap_err().is_cancelled());

        let stats = pool.stats();
        assert_eq!(stats.total, 1);
        assert_eq!(stats.borrowed, 0);
        assert_eq!(stats.available, 1);
        assert_eq!(stats.pending, 0);

        let again = pool.acquire().await.unwrap();
        assert_eq!(again.id(), held_id);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_create_frees_its_slot() {
        let factory = crate::mock::MockFactory::new().with_latency(Duration::from_secs(1));
        let pool = ResourcePool::new(factory, config(0, 1)).await.unwrap();

        let cancelled = tokio::time::timeout(Duration::from_millis(10), pool.acquire()).await;
        assert!(cancelled.is_err());
        assert_eq!(pool.stats().total, 0);

        let resource = pool.try_acquire().await.unwrap();
        assert_eq!(pool.stats().borrowed, 1);
        pool.release(resource).await.unwrap();
    }
}
