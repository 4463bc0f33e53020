use std::collections::HashMap;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::time::Instant;

/// A value together with the time it was stored.
#[derive(Clone, Debug)]
pub struct TtlEntry<V> {
    pub value: V,
    pub created_at: Instant,
}

impl<V> TtlEntry<V> {
    fn new(value: V) -> Self {
        Self {
            value,
            created_at: Instant::now(),
        }
    }

    /// An entry is fresh while it is younger than `ttl`.
    pub fn is_fresh(&self, ttl: Duration) -> bool {
        self.created_at.elapsed() < ttl
    }
}

/// Thread-safe storage of [`TtlEntry`]s with a single time-to-live shared by all keys.
///
/// Expired entries are treated as absent by [`get`](Self::get) but stay in the map until they are
/// overwritten, deleted, or swept. Sweeping happens during [`add`](Self::add) once every
/// `sweep_interval`, or explicitly via [`sweep`](Self::sweep).
#[derive(Debug)]
pub struct TtlStore<V> {
    ttl: Duration,
    entries: RwLock<HashMap<String, TtlEntry<V>>>,
    sweep_interval: Option<Duration>,
    last_sweep: Mutex<Instant>,
}

impl<V: Clone> TtlStore<V> {
    pub fn new(ttl: Duration, sweep_interval: Option<Duration>) -> Self {
        Self {
            ttl,
            entries: Default::default(),
            sweep_interval,
            last_sweep: Mutex::new(Instant::now()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Inserts or replaces the entry for `key`, stamped with the current time.
    pub fn add(&self, key: impl Into<String>, value: V) {
        self.entries.write().insert(key.into(), TtlEntry::new(value));
        self.maybe_sweep();
    }

    /// Returns the value for `key` if it exists and is still fresh.
    pub fn get(&self, key: &str) -> Option<V> {
        let entries = self.entries.read();
        let entry = entries.get(key)?;
        entry.is_fresh(self.ttl).then(|| entry.value.clone())
    }

    /// Returns the value for `key` even if it has already expired.
    pub fn get_stale(&self, key: &str) -> Option<V> {
        self.entries.read().get(key).map(|entry| entry.value.clone())
    }

    /// Removes the entry for `key`. Does nothing if there is none.
    pub fn delete(&self, key: &str) {
        self.entries.write().remove(key);
    }

    /// Removes all expired entries and returns how many were removed.
    pub fn sweep(&self) -> usize {
        *self.last_sweep.lock() = Instant::now();
        self.remove_expired()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn maybe_sweep(&self) {
        if !self.claim_sweep() {
            return;
        }
        let swept = self.remove_expired();
        if swept > 0 {
            tracing::trace!(swept, "Swept expired cache entries");
        }
    }

    /// Whether a sweep is due, in which case the next one is scheduled right away.
    ///
    /// Of concurrent callers, only one sees a due sweep.
    fn claim_sweep(&self) -> bool {
        let Some(interval) = self.sweep_interval else {
            return false;
        };
        let mut last_sweep = self.last_sweep.lock();
        if last_sweep.elapsed() < interval {
            return false;
        }
        *last_sweep = Instant::now();
        true
    }

    fn remove_expired(&self) -> usize {
        let ttl = self.ttl;
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| entry.is_fresh(ttl));
        before - entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_fresh_until_ttl() {
        let store = TtlStore::new(Duration::from_millis(10), None);
        store.add("one", 1);

        tokio::time::advance(Duration::from_millis(5)).await;
        assert_eq!(store.get("one"), Some(1));

        tokio::time::advance(Duration::from_millis(5)).await;
        assert_eq!(store.get("one"), None);
        // expired entries are still physically present
        assert_eq!(store.get_stale("one"), Some(1));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overwrite_restamps() {
        let store = TtlStore::new(Duration::from_millis(10), None);
        store.add("one", 1);
        tokio::time::advance(Duration::from_millis(8)).await;
        store.add("one", 2);
        tokio::time::advance(Duration::from_millis(8)).await;
        assert_eq!(store.get("one"), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_is_idempotent() {
        let store = TtlStore::<u32>::new(Duration::from_secs(1), None);
        store.delete("missing");
        store.add("one", 1);
        store.delete("one");
        store.delete("one");
        assert!(store.is_empty());
        assert_eq!(store.get_stale("one"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep() {
        let store = TtlStore::new(Duration::from_millis(10), None);
        store.add("old", 1);
        tokio::time::advance(Duration::from_millis(20)).await;
        store.add("new", 2);

        assert_eq!(store.sweep(), 1);
        assert_eq!(store.get_stale("old"), None);
        assert_eq!(store.get("new"), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_on_add() {
        let store = TtlStore::new(Duration::from_millis(10), Some(Duration::from_millis(50)));
        store.add("old", 1);

        tokio::time::advance(Duration::from_millis(20)).await;
        store.add("middle", 2);
        // not due yet
        assert_eq!(store.len(), 2);

        tokio::time::advance(Duration::from_millis(40)).await;
        store.add("new", 3);
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("new"), Some(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_due_sweep_is_claimed_once() {
        let interval = Some(Duration::from_millis(50));
        let store = TtlStore::<u32>::new(Duration::from_millis(10), interval);
        assert!(!store.claim_sweep());

        tokio::time::advance(Duration::from_millis(50)).await;
        assert!(store.claim_sweep());
        assert!(!store.claim_sweep());

        tokio::time::advance(Duration::from_millis(50)).await;
        assert!(store.claim_sweep());

        let unscheduled = TtlStore::<u32>::new(Duration::from_millis(10), None);
        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(!unscheduled.claim_sweep());
    }
}
