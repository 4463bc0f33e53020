//! Caching in front of a remote resource API that is also written to.
//!
//! [`ResourceRepo`] reads through a [`TimedCache`] and drops the cached entry of a resource
//! whenever it writes that resource. Writes are guarded by an ETag, and a conflicting write also
//! drops the entry, as it proves that the cached copy is outdated.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use thiserror::Error;

use crate::caching::{CacheError, Loader, ReadType, TimedCache};

/// An error returned by a [`ResourceClient`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    /// The resource changed since the given ETag was read.
    #[error("precondition failed for etag {etag:?}")]
    PreconditionFailed { etag: Option<String> },
    /// The operation was preempted by another operation on the same resource.
    #[error("operation canceled: {0}")]
    Canceled(String),
    /// The remote side answered with an unexpected status code.
    #[error("remote error {status}: {message}")]
    Status { status: u16, message: String },
    /// The remote side could not be reached.
    #[error("transport error: {0}")]
    Transport(String),
}

impl RemoteError {
    /// Whether the error proves that somebody else changed the resource concurrently.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::PreconditionFailed { .. } | Self::Canceled(_))
    }
}

/// An error returned by a [`ResourceRepo`].
#[derive(Debug, Clone, Error)]
pub enum RepoError {
    /// The loader confirmed that the resource does not exist.
    #[error("resource {0} is not configured")]
    NotConfigured(String),
    /// The remote side failed.
    #[error(transparent)]
    Remote(#[from] RemoteError),
    /// The cache failed for a reason other than the remote side.
    #[error(transparent)]
    Cache(CacheError),
}

impl From<CacheError> for RepoError {
    fn from(err: CacheError) -> Self {
        // recover the client error so callers can match on it
        if let Some(remote) = err.loader_error().and_then(|e| e.downcast_ref::<RemoteError>()) {
            return Self::Remote(remote.clone());
        }
        Self::Cache(err)
    }
}

/// A client of a remote API managing one kind of resource.
#[async_trait]
pub trait ResourceClient: Send + Sync + 'static {
    type Resource: Clone + Send + Sync + 'static;

    /// A short name of the resource kind, used to name the cache.
    const KIND: &'static str;

    /// Fetches the resource, `Ok(None)` if it does not exist.
    async fn get(&self, name: &str) -> Result<Option<Self::Resource>, RemoteError>;

    /// Writes the resource, only if it still matches `etag` when one is given.
    async fn create_or_update(
        &self,
        name: &str,
        resource: Self::Resource,
        etag: Option<String>,
    ) -> Result<(), RemoteError>;

    async fn delete(&self, name: &str) -> Result<(), RemoteError>;
}

/// Loads cache misses through a [`ResourceClient`].
pub struct ClientLoader<C> {
    client: Arc<C>,
}

impl<C: ResourceClient> Loader for ClientLoader<C> {
    type Value = C::Resource;

    fn load(&self, key: String) -> BoxFuture<'static, anyhow::Result<Option<C::Resource>>> {
        let client = Arc::clone(&self.client);
        async move { client.get(&key).await.map_err(anyhow::Error::from) }.boxed()
    }
}

/// A repository of remote resources with a read-through cache in front of it.
pub struct ResourceRepo<C: ResourceClient> {
    client: Arc<C>,
    cache: TimedCache<ClientLoader<C>>,
}

impl<C: ResourceClient> fmt::Debug for ResourceRepo<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceRepo")
            .field("cache", &self.cache)
            .finish()
    }
}

impl<C: ResourceClient> ResourceRepo<C> {
    /// Creates a repository whose cache keeps resources for `ttl`.
    pub fn new(client: C, ttl: Duration) -> Result<Self, RepoError> {
        let client = Arc::new(client);
        let loader = ClientLoader {
            client: Arc::clone(&client),
        };
        let cache = TimedCache::new(C::KIND, ttl, loader, false).map_err(RepoError::Cache)?;
        Ok(Self { client, cache })
    }

    pub fn cache(&self) -> &TimedCache<ClientLoader<C>> {
        &self.cache
    }

    /// Reads the resource `name`, sharing the cached instance.
    pub async fn get(
        &self,
        name: &str,
        read_type: ReadType,
    ) -> Result<Arc<C::Resource>, RepoError> {
        self.cache
            .get(name, read_type)
            .await?
            .ok_or_else(|| RepoError::NotConfigured(name.into()))
    }

    /// Reads the resource `name` as a copy that can be modified and written back.
    pub async fn get_for_update(&self, name: &str) -> Result<C::Resource, RepoError> {
        self.cache
            .get_with_deep_copy(name, ReadType::Default)
            .await?
            .ok_or_else(|| RepoError::NotConfigured(name.into()))
    }

    /// Writes the resource `name` and drops its cached entry.
    ///
    /// The entry is not repopulated with `resource`, the next read fetches whatever the remote
    /// side made of it.
    pub async fn create_or_update(
        &self,
        name: &str,
        resource: C::Resource,
        etag: Option<String>,
    ) -> Result<(), RepoError> {
        let result = self.client.create_or_update(name, resource, etag).await;
        self.invalidate_after(name, result)
    }

    /// Deletes the resource `name` remotely and drops its cached entry.
    pub async fn delete(&self, name: &str) -> Result<(), RepoError> {
        let result = self.client.delete(name).await;
        self.invalidate_after(name, result)
    }

    fn invalidate_after(
        &self,
        name: &str,
        result: Result<(), RemoteError>,
    ) -> Result<(), RepoError> {
        match result {
            Ok(()) => {
                self.cache.delete(name);
                Ok(())
            }
            Err(err) if err.is_conflict() => {
                tracing::warn!(
                    kind = C::KIND,
                    name,
                    error = %err,
                    "Write conflicted, invalidating cache entry"
                );
                self.cache.delete(name);
                Err(err.into())
            }
            Err(err) => Err(err.into()),
        }
    }
}
