//! # Caching infrastructure
//!
//! Callers of remote resource APIs read the same resources over and over, and most of the time
//! the answer has not changed since the last time. This module holds a small read-through cache
//! that sits in front of such an API, together with the primitives it is made of.
//!
//! ## Layers
//!
//! - [`TtlStore`] keeps the values together with the time they were stored. An entry is fresh
//!   while it is younger than the store's time-to-live. Expired entries are not removed when
//!   they are read, they are swept out every once in a while during writes.
//! - [`KeyedSingleFlight`] deduplicates concurrent loads of the same key. N callers missing the
//!   same cold key result in a single call to the remote side, and all of them receive its
//!   result.
//! - [`TimedCache`] ties both together with a [`Loader`] that fetches the authoritative value.
//!   A miss checks the store, joins or starts a flight for the key, checks the store again
//!   inside the flight, and only then calls the loader. A forced refresh skips both checks and
//!   never joins a flight started by a plain read.
//! - [`DeepCopier`] produces owned copies for callers that want to modify what they read.
//!
//! ## [`CacheEntry`] / [`CacheError`]
//!
//! Reads return a [`CacheEntry`], which is just an alias for a [`Result`] around a
//! [`CacheError`]. A successful read of `None` is a *negative* entry: the loader confirmed that
//! the resource does not exist, and that answer is cached for the full time-to-live just like a
//! positive one.
//!
//! Loader failures are handed to everybody who waited on that load and are never stored. The next
//! read after a failure calls the loader again.
//!
//! ## Invalidation
//!
//! Owners of a cache delete the entry of a resource right after they changed it remotely, or
//! when a write failed because somebody else changed it first. See
//! [`ResourceRepo`](crate::resource::ResourceRepo) for this pattern.
//!
//! ### Metrics
//!
//! All metrics are tagged with a `cache` field that corresponds to the cache name:
//!
//! - `caches.access`: All reads, additionally tagged with `read_type`.
//! - `caches.memory.hit`: Reads served by a fresh entry.
//! - `caches.memory.stale_hit`: Reads served by a possibly expired entry.
//! - `caches.computation`: Actual loader calls.
//! - `caches.computation.duration`: How long loader calls took.
//! - `caches.computation.error`: Loader calls that failed, additionally tagged with `error`.
//! - `caches.coalesced`: Reads that joined a load already in flight (untagged).
//! - `caches.invalidate`: Explicit deletes.
//! - `caches.sweep`: Expired entries removed from memory.

mod cache_error;
mod deep_copy;
mod single_flight;
mod store;
mod timed_cache;

pub use cache_error::{CacheEntry, CacheError};
pub use deep_copy::DeepCopier;
pub use single_flight::KeyedSingleFlight;
pub use store::{TtlEntry, TtlStore};
pub use timed_cache::{Loader, LoaderFn, ReadType, TimedCache, loader_fn};
