use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// An error that happens when reading through a [`TimedCache`](super::TimedCache).
///
/// None of these variants are ever stored in the cache. A failed load is retried by the next
/// caller.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    /// Nothing is stored for the key and the read was not allowed to call the loader.
    #[error("not found in cache")]
    NotFound,
    /// The loader failed.
    ///
    /// The error is shared between all callers that were waiting on the same load, and it
    /// displays exactly like the loader's own error.
    #[error("{0}")]
    Loader(Arc<anyhow::Error>),
    /// The cache was configured with a time-to-live that can never be fresh.
    #[error("invalid cache ttl {0:?}, must be greater than zero")]
    InvalidTtl(Duration),
}

impl CacheError {
    /// Returns the error the loader failed with, if this is a loader failure.
    ///
    /// Use this to [`downcast_ref`](anyhow::Error::downcast_ref) to the concrete remote error.
    pub fn loader_error(&self) -> Option<&anyhow::Error> {
        match self {
            Self::Loader(err) => Some(err),
            _ => None,
        }
    }

    /// A short, stable name for this error, used as a metrics tag.
    pub fn metrics_tag(&self) -> &'static str {
        match self {
            Self::NotFound => "not-found",
            Self::Loader(_) => "loader",
            Self::InvalidTtl(_) => "invalid-ttl",
        }
    }
}

impl From<anyhow::Error> for CacheError {
    fn from(err: anyhow::Error) -> Self {
        Self::Loader(Arc::new(err))
    }
}

/// An entry in a cache, containing either `Ok(T)` or the reason why the value could not be
/// produced.
pub type CacheEntry<T = ()> = Result<T, CacheError>;
