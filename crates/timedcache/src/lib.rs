//! A TTL-bounded read-through cache with per-key request coalescing.
//!
//! See the [`caching`] module for an overview of how the pieces fit together.

#[macro_use]
pub mod metrics;

pub mod caching;
pub mod config;
pub mod credentials;
pub mod registry;
pub mod resource;


pub use caching::{
    CacheEntry, CacheError, DeepCopier, KeyedSingleFlight, Loader, ReadType, TimedCache, TtlStore,
    loader_fn,
};
