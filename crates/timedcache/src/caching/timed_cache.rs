use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use serde::Deserialize;
use tokio::time::Instant;

use super::{CacheEntry, CacheError, DeepCopier, KeyedSingleFlight, TtlStore};
use crate::config::CacheConfig;

/// Fetches the authoritative value for a key on a cache miss.
///
/// `Ok(None)` means the value is confirmed to not exist. It is cached like any other value, so
/// repeated lookups of something missing do not hit the remote side every time. Errors are never
/// cached.
///
/// The cache does not impose any deadline on a load. A loader that talks to a remote service
/// should bound its own calls, for example with [`tokio::time::timeout`].
pub trait Loader: Send + Sync + 'static {
    type Value: Send + Sync + 'static;

    fn load(&self, key: String) -> BoxFuture<'static, anyhow::Result<Option<Self::Value>>>;
}

impl<L: Loader + ?Sized> Loader for Box<L> {
    type Value = L::Value;

    fn load(&self, key: String) -> BoxFuture<'static, anyhow::Result<Option<L::Value>>> {
        (**self).load(key)
    }
}

impl<L: Loader + ?Sized> Loader for Arc<L> {
    type Value = L::Value;

    fn load(&self, key: String) -> BoxFuture<'static, anyhow::Result<Option<L::Value>>> {
        (**self).load(key)
    }
}

/// A [`Loader`] backed by an async closure, see [`loader_fn`].
#[derive(Clone)]
pub struct LoaderFn<F> {
    f: F,
}

/// Creates a [`Loader`] from a closure returning a future.
pub fn loader_fn<F, Fut, V>(f: F) -> LoaderFn<F>
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Option<V>>> + Send + 'static,
    V: Send + Sync + 'static,
{
    LoaderFn { f }
}

impl<F, Fut, V> Loader for LoaderFn<F>
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Option<V>>> + Send + 'static,
    V: Send + Sync + 'static,
{
    type Value = V;

    fn load(&self, key: String) -> BoxFuture<'static, anyhow::Result<Option<V>>> {
        (self.f)(key).boxed()
    }
}

/// How a read treats stored entries.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReadType {
    /// Serve a fresh entry, load otherwise.
    #[default]
    Default,
    /// Always load and overwrite whatever is stored.
    ///
    /// A load that another read already started for the key is not joined, as it may predate
    /// the change. This read loads again once that one has finished.
    ///
    /// Meant for callers that know the remote resource just changed but cannot delete the
    /// entry themselves.
    ForceRefresh,
    /// Serve any stored entry, even an expired one. Load only when nothing is stored.
    Unsafe,
    /// Serve any stored entry, even an expired one. Never load.
    ///
    /// Fails with [`CacheError::NotFound`] when nothing is stored.
    CacheOnly,
}

impl ReadType {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::ForceRefresh => "force-refresh",
            Self::Unsafe => "unsafe",
            Self::CacheOnly => "cache-only",
        }
    }
}

impl fmt::Display for ReadType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

type Stored<V> = Option<Arc<V>>;

struct Inner<L: Loader> {
    name: Arc<str>,
    disabled: bool,
    loader: L,
    store: TtlStore<Stored<L::Value>>,
    flights: KeyedSingleFlight<String, CacheEntry<Stored<L::Value>>>,
    copier: DeepCopier<L::Value>,
}

/// A read-through cache with a fixed time-to-live for all entries.
///
/// On a miss the [`Loader`] is asked for the value. Concurrent misses for the same key share a
/// single load, misses for different keys load in parallel. The outcome of a load is stored
/// unless it is an error.
///
/// Reads return an `Arc` that is shared with every other reader of the same entry. Use
/// [`get_with_deep_copy`](Self::get_with_deep_copy) to get a value that can be modified.
///
/// Cloning a `TimedCache` is cheap and the clones share their entries.
///
/// # Staleness
///
/// A [`delete`](Self::delete) that races with a load which started before it does not stop
/// that load from storing its result afterwards. The remote side stays the source of truth, the
/// cache only trades freshness for fewer remote calls within the TTL.
pub struct TimedCache<L: Loader> {
    inner: Arc<Inner<L>>,
}

impl<L: Loader> Clone for TimedCache<L> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<L: Loader> fmt::Debug for TimedCache<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimedCache")
            .field("name", &self.inner.name)
            .field("ttl", &self.inner.store.ttl())
            .field("disabled", &self.inner.disabled)
            .field("entries", &self.inner.store.len())
            .field("flights", &self.inner.flights)
            .finish()
    }
}

impl<L> TimedCache<L>
where
    L: Loader,
    L::Value: Clone,
{
    /// Creates a new cache that copies values with `Clone`.
    ///
    /// Fails if `ttl` is zero and the cache is not `disabled`: such a cache would never serve
    /// anything and only hide the misconfiguration.
    pub fn new(
        name: impl Into<Arc<str>>,
        ttl: Duration,
        loader: L,
        disabled: bool,
    ) -> Result<Self, CacheError> {
        Self::with_copier(name, ttl, loader, disabled, DeepCopier::default())
    }

    /// Creates a new cache from its configuration.
    pub fn from_config(
        name: impl Into<Arc<str>>,
        config: &CacheConfig,
        loader: L,
    ) -> Result<Self, CacheError> {
        Self::build(
            name.into(),
            config.ttl,
            config.sweep_interval,
            loader,
            config.disabled,
            DeepCopier::default(),
        )
    }
}

impl<L: Loader> TimedCache<L> {
    /// Creates a new cache with a custom [`DeepCopier`].
    pub fn with_copier(
        name: impl Into<Arc<str>>,
        ttl: Duration,
        loader: L,
        disabled: bool,
        copier: DeepCopier<L::Value>,
    ) -> Result<Self, CacheError> {
        Self::build(name.into(), ttl, None, loader, disabled, copier)
    }

    fn build(
        name: Arc<str>,
        ttl: Duration,
        sweep_interval: Option<Duration>,
        loader: L,
        disabled: bool,
        copier: DeepCopier<L::Value>,
    ) -> Result<Self, CacheError> {
        if ttl.is_zero() && !disabled {
            return Err(CacheError::InvalidTtl(ttl));
        }

        Ok(Self {
            inner: Arc::new(Inner {
                name,
                disabled,
                loader,
                store: TtlStore::new(ttl, sweep_interval),
                flights: KeyedSingleFlight::new(),
                copier,
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn ttl(&self) -> Duration {
        self.inner.store.ttl()
    }

    pub fn is_disabled(&self) -> bool {
        self.inner.disabled
    }

    /// Reads the value for `key`.
    ///
    /// `Ok(None)` is a cached "does not exist" answer from the loader.
    pub async fn get(&self, key: &str, read_type: ReadType) -> CacheEntry<Stored<L::Value>> {
        let inner = &self.inner;
        let name = inner.name.as_ref();
        metric!(
            counter("caches.access") += 1,
            "cache" => name,
            "read_type" => read_type.as_str(),
        );

        if inner.disabled {
            return Inner::load(Arc::clone(inner), key.to_owned()).await;
        }

        match read_type {
            ReadType::Default => {
                if let Some(value) = inner.store.get(key) {
                    metric!(counter("caches.memory.hit") += 1, "cache" => name);
                    tracing::trace!(cache = name, key, "Cache hit");
                    return Ok(value);
                }
            }
            ReadType::Unsafe | ReadType::CacheOnly => {
                if let Some(value) = inner.store.get_stale(key) {
                    metric!(counter("caches.memory.stale_hit") += 1, "cache" => name);
                    return Ok(value);
                }
                if read_type == ReadType::CacheOnly {
                    return Err(CacheError::NotFound);
                }
            }
            ReadType::ForceRefresh => {}
        }

        tracing::trace!(cache = name, key, %read_type, "Cache miss");
        let this = Arc::clone(inner);
        let owned_key = key.to_owned();
        if read_type == ReadType::ForceRefresh {
            inner
                .flights
                .run_fresh(owned_key.clone(), move || this.load_and_store(owned_key, false))
                .await
        } else {
            inner
                .flights
                .run(owned_key.clone(), move || this.load_and_store(owned_key, true))
                .await
        }
    }

    /// Reads the value for `key` and returns a copy that the caller owns.
    ///
    /// Modifying the returned value has no effect on the cache or on other readers.
    pub async fn get_with_deep_copy(
        &self,
        key: &str,
        read_type: ReadType,
    ) -> CacheEntry<Option<L::Value>> {
        let value = self.get(key, read_type).await?;
        Ok(value.map(|value| self.inner.copier.copy(&value)))
    }

    /// Stores `value` for `key` without asking the loader.
    ///
    /// Used to populate the cache right after the caller changed the remote resource itself.
    pub fn set(&self, key: &str, value: Option<L::Value>) {
        self.inner.store.add(key, value.map(Arc::new));
    }

    /// Removes the entry for `key`, so the next read loads it again.
    pub fn delete(&self, key: &str) {
        metric!(counter("caches.invalidate") += 1, "cache" => self.inner.name.as_ref());
        tracing::debug!(cache = %self.inner.name, key, "Invalidating cache entry");
        self.inner.store.delete(key);
    }

    /// Removes all expired entries from memory.
    pub fn sweep(&self) -> usize {
        let swept = self.inner.store.sweep();
        metric!(counter("caches.sweep") += swept as i64, "cache" => self.inner.name.as_ref());
        swept
    }

    /// The number of entries held in memory, including expired ones.
    pub fn len(&self) -> usize {
        self.inner.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.store.is_empty()
    }
}

impl<L: Loader> Inner<L> {
    /// Runs inside a single flight, so at most one of these is active per key.
    async fn load_and_store(
        self: Arc<Self>,
        key: String,
        recheck: bool,
    ) -> CacheEntry<Stored<L::Value>> {
        // another flight may have stored the value between our miss and getting here
        if recheck {
            if let Some(value) = self.store.get(&key) {
                metric!(counter("caches.memory.hit") += 1, "cache" => self.name.as_ref());
                return Ok(value);
            }
        }

        let value = Self::load(Arc::clone(&self), key.clone()).await?;
        self.store.add(key, value.clone());
        Ok(value)
    }

    async fn load(self: Arc<Self>, key: String) -> CacheEntry<Stored<L::Value>> {
        let name = self.name.as_ref();
        metric!(counter("caches.computation") += 1, "cache" => name);
        tracing::debug!(cache = name, key, "Loading cache entry");

        let start = Instant::now();
        let result = self.loader.load(key).await;
        metric!(timer("caches.computation.duration") = start.elapsed(), "cache" => name);

        match result {
            Ok(value) => Ok(value.map(Arc::new)),
            Err(err) => {
                let err = CacheError::from(err);
                metric!(
                    counter("caches.computation.error") += 1,
                    "cache" => name,
                    "error" => err.metrics_tag(),
                );
                tracing::debug!(
                    cache = name,
                    error = %err,
                    "Loader failed, result is not cached"
                );
                Err(err)
            }
        }
    }
}
