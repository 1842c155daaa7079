//! Generic resource pooling.
//!
//! A [`ResourcePool`] lends out resources built by a
//! [`ResourceFactory`](crate::core::ResourceFactory), keeping between
//! `min_size` and `max_size` of them alive:
//!
//! - Idle resources are recycled most-recently-used first.
//! - Acquisitions that cannot be served wait in arrival order.
//! - Resources idle past `idle_timeout` are reaped down to `min_size`.
//! - Resources are validated on borrow and retired after `max_uses`.

mod config;
mod entry;
mod metrics;
mod resource_pool;

pub use config::PoolConfig;
pub use entry::{DestroyReason, PooledResource};
pub use metrics::{LatencyPercentiles, PoolStats};
pub use resource_pool::ResourcePool;
