//! Pooled resource handles.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Weak};

use tokio::time::Instant;

/// Why a resource left the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestroyReason {
    /// The validator rejected the resource.
    ValidationFailed,
    /// The resource reached `max_uses`.
    MaxUses,
    /// The resource sat idle past `idle_timeout`.
    Idle,
    /// The pool shrank below the number of live resources.
    Surplus,
    /// The borrower dropped the resource without releasing it.
    Forfeited,
    /// The pool was cleared.
    Cleared,
    /// The pool was closed.
    Closed,
}

impl DestroyReason {
    /// Returns the reason as a static string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ValidationFailed => "validation_failed",
            Self::MaxUses => "max_uses",
            Self::Idle => "idle",
            Self::Surplus => "surplus",
            Self::Forfeited => "forfeited",
            Self::Cleared => "cleared",
            Self::Closed => "closed",
        }
    }
}

/// A resource together with its bookkeeping.
pub(crate) struct Entry<T> {
    pub(crate) id: u64,
    pub(crate) resource: T,
    pub(crate) created_at: Instant,
    pub(crate) last_used_at: Instant,
    pub(crate) use_count: u64,
}

impl<T> Entry<T> {
    pub(crate) fn new(id: u64, resource: T) -> Self {
        let now = Instant::now();
        Self {
            id,
            resource,
            created_at: now,
            last_used_at: now,
            use_count: 0,
        }
    }

    pub(crate) fn idle_for(&self, now: Instant) -> std::time::Duration {
        now.saturating_duration_since(self.last_used_at)
    }
}

/// Implemented by the pool so an unreleased handle can give its slot back.
pub(crate) trait Lease: Send + Sync {
    fn forfeit(self: Arc<Self>, id: u64);
}

/// Returns the slot to the pool if the handle is dropped unreleased.
pub(crate) struct LeaseGuard {
    pub(crate) pool_id: u64,
    id: u64,
    lease: Option<Weak<dyn Lease>>,
}

impl LeaseGuard {
    pub(crate) fn new(pool_id: u64, id: u64, lease: Weak<dyn Lease>) -> Self {
        Self {
            pool_id,
            id,
            lease: Some(lease),
        }
    }

    pub(crate) fn disarm(&mut self) {
        self.lease = None;
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        if let Some(pool) = self.lease.take().and_then(|weak| weak.upgrade()) {
            pool.forfeit(self.id);
        }
    }
}

/// A resource borrowed from a [`ResourcePool`](crate::pool::ResourcePool).
///
/// Hand it back with [`ResourcePool::release`](crate::pool::ResourcePool::release).
/// Dropping it instead destroys the resource and frees its slot.
pub struct PooledResource<T> {
    pub(crate) entry: Entry<T>,
    pub(crate) guard: LeaseGuard,
}

impl<T> PooledResource<T> {
    /// Returns the pool-unique identifier of this resource.
    pub fn id(&self) -> u64 {
        self.entry.id
    }

    /// Returns when the resource was created.
    pub fn created_at(&self) -> Instant {
        self.entry.created_at
    }

    /// Returns when the resource was last returned to the pool.
    pub fn last_used_at(&self) -> Instant {
        self.entry.last_used_at
    }

    /// Returns how many times the resource has been borrowed, this borrow
    /// included.
    pub fn use_count(&self) -> u64 {
        self.entry.use_count
    }
}

impl<T> Deref for PooledResource<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.entry.resource
    }
}

impl<T> DerefMut for PooledResource<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.entry.resource
    }
}

impl<T: fmt::Debug> fmt::Debug for PooledResource<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledResource")
            .field("id", &self.entry.id)
            .field("use_count", &self.entry.use_count)
            .field("resource", &self.entry.resource)
            .finish()
    }
}
