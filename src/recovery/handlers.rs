//! Built-in action handlers.

use crate::core::{BoxError, ResourceFactory};
use crate::pool::ResourcePool;
use crate::recovery::action::{ActionHandler, ActionKind, ActionRequest};

use async_trait::async_trait;

/// Applies `ClearCache` and `ScaleResources` actions to a resource pool.
///
/// `ClearCache` destroys every idle resource. `ScaleResources` reads the
/// `min_size` and `max_size` parameters; a missing one keeps the current
/// bound. Other action kinds are rejected.
pub struct PoolHandler<F: ResourceFactory> {
    pool: ResourcePool<F>,
}

impl<F: ResourceFactory> PoolHandler<F> {
    /// Creates a handler for `pool`.
    pub fn new(pool: ResourcePool<F>) -> Self {
        Self { pool }
    }
}

fn size_param(request: &ActionRequest, key: &str, current: usize) -> Result<usize, BoxError> {
    match request.param(key) {
        None => Ok(current),
        Some(value) => value
            .as_u64()
            .map(|n| n as usize)
            .ok_or_else(|| format!("parameter '{key}' must be a non-negative integer").into()),
    }
}

#[async_trait]
impl<F: ResourceFactory> ActionHandler for PoolHandler<F> {
    async fn execute(&self, request: &ActionRequest) -> Result<(), BoxError> {
        match &request.action.kind {
            ActionKind::ClearCache => {
                let cleared = self.pool.clear().await;
                tracing::info!(
                    pool = %self.pool.config().name,
                    cleared,
                    issue_id = %request.issue.id,
                    "Cleared idle pool resources"
                );
                Ok(())
            }
            ActionKind::ScaleResources => {
                let stats = self.pool.stats();
                let min_size = size_param(request, "min_size", stats.min_size)?;
                let max_size = size_param(request, "max_size", stats.max_size)?;
                self.pool.resize(min_size, max_size).await?;
                Ok(())
            }
            other => Err(format!("pool handler cannot perform '{other}'").into()),
        }
    }
}
