//! Collaborator traits for pooled resources.
//!
//! Callers describe how their resources are built, cleaned, validated and
//! torn down by implementing [`ResourceFactory`]. The pool only sequences
//! these calls; it never inspects the resource itself.

use crate::core::error::BoxError;

use async_trait::async_trait;

/// Creates and maintains the resources held by a
/// [`ResourcePool`](crate::pool::ResourcePool).
///
/// # Implementation Notes
///
/// - `create` may fail; failures are counted as create errors and the
///   acquiring caller falls through to waiting for a release.
/// - `cleanup` runs on every release before the resource is reused and
///   must not fail.
/// - `validate` runs on borrow and/or return depending on the pool config.
/// - `destroy` receives ownership of resources leaving the pool.
///
/// # Example Implementation
///
/// ```rust,ignore
/// use bulwark::core::{BoxError, ResourceFactory};
/// use async_trait::async_trait;
///
/// struct ConnectionFactory { url: String }
///
/// #[async_trait]
/// impl ResourceFactory for ConnectionFactory {
///     type Resource = Connection;
///
///     async fn create(&self) -> Result<Connection, BoxError> {
///         Ok(Connection::open(&self.url).await?)
///     }
///
///     async fn validate(&self, conn: &Connection) -> bool {
///         conn.ping().await.is_ok()
///     }
/// }
/// ```
#[async_trait]
pub trait ResourceFactory: Send + Sync + 'static {
    /// The pooled resource type.
    type Resource: Send + 'static;

    /// Constructs a new resource.
    async fn create(&self) -> Result<Self::Resource, BoxError>;

    /// Resets a resource before it is returned to the pool.
    async fn cleanup(&self, _resource: &mut Self::Resource) {}

    /// Returns `true` if the resource is still usable.
    async fn validate(&self, _resource: &Self::Resource) -> bool {
        true
    }

    /// Tears down a resource that is leaving the pool.
    async fn destroy(&self, resource: Self::Resource) {
        drop(resource);
    }
}
