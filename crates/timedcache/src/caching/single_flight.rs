use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::channel::oneshot;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;

/// The published result of a flight: the computed value, or the message of a panic.
type Outcome<T> = Result<T, Arc<str>>;
type Flight<T> = Shared<BoxFuture<'static, Outcome<T>>>;
type FlightMap<K, T> = Arc<Mutex<HashMap<K, FlightEntry<T>>>>;

struct FlightEntry<T> {
    id: u64,
    /// Started by [`KeyedSingleFlight::run_fresh`].
    fresh: bool,
    flight: Flight<T>,
}

/// Removes the marker of flight `id` when dropped, unless a newer flight replaced it.
struct RemoveFlight<K: Eq + Hash, T> {
    flights: FlightMap<K, T>,
    key: K,
    id: u64,
}

impl<K: Eq + Hash, T> Drop for RemoveFlight<K, T> {
    fn drop(&mut self) {
        let mut flights = self.flights.lock();
        if flights.get(&self.key).is_some_and(|entry| entry.id == self.id) {
            flights.remove(&self.key);
        }
    }
}

/// Deduplicates concurrent computations per key.
///
/// While a computation for a key is running, further calls for the same key wait for it and
/// receive a clone of its result instead of starting their own. Calls for different keys never
/// wait on each other: the map lock is only held to look up or register a flight.
///
/// Computations are spawned onto the runtime, so they run to completion even when every caller
/// waiting on them is dropped. A flight removes itself from the map as soon as its computation
/// finishes, so the next call after that starts fresh. Errors are not special in any way here,
/// they are just a value that is handed to every waiter of that one flight.
pub struct KeyedSingleFlight<K, T> {
    flights: FlightMap<K, T>,
    next_id: AtomicU64,
}

impl<K, T> fmt::Debug for KeyedSingleFlight<K, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let in_flight = self.flights.try_lock().map(|f| f.len()).unwrap_or_default();
        f.debug_struct("KeyedSingleFlight")
            .field("in_flight", &in_flight)
            .finish()
    }
}

impl<K, T> Default for KeyedSingleFlight<K, T> {
    fn default() -> Self {
        Self {
            flights: Default::default(),
            next_id: AtomicU64::new(0),
        }
    }
}

impl<K, T> KeyedSingleFlight<K, T>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `computation` for `key`, unless one is already running, in which case its result is
    /// awaited instead.
    ///
    /// Must be called within a tokio runtime.
    ///
    /// # Panics
    ///
    /// If the computation panics, the panic is re-raised in every caller waiting on it.
    pub async fn run<F, Fut>(&self, key: K, computation: F) -> T
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        self.join_or_start(key, false, computation).await
    }

    /// Like [`run`](Self::run), but only joins computations that were started by `run_fresh`.
    ///
    /// A computation started by [`run`](Self::run) may have read its data before this call was
    /// made. In that case `computation` starts once that one has finished, and takes its place
    /// in the map, so calls arriving in the meantime join the newer computation.
    pub async fn run_fresh<F, Fut>(&self, key: K, computation: F) -> T
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        self.join_or_start(key, true, computation).await
    }

    /// The number of computations currently running.
    pub fn in_flight(&self) -> usize {
        self.flights.lock().len()
    }

    /// Whether a computation for `key` is currently running.
    pub fn is_in_flight(&self, key: &K) -> bool {
        self.flights.lock().contains_key(key)
    }

    async fn join_or_start<F, Fut>(&self, key: K, fresh: bool, computation: F) -> T
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        let flight = {
            let mut flights = self.flights.lock();
            let running = flights
                .get(&key)
                .map(|entry| (entry.fresh, entry.flight.clone()));
            match running {
                Some((running_fresh, flight)) if running_fresh || !fresh => {
                    metric!(counter("caches.coalesced") += 1);
                    flight
                }
                previous => {
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    let previous = previous.map(|(_, flight)| flight);
                    let flight = self.start(id, key.clone(), previous, computation);
                    flights.insert(
                        key,
                        FlightEntry {
                            id,
                            fresh,
                            flight: flight.clone(),
                        },
                    );
                    flight
                }
            }
        };

        match flight.await {
            Ok(value) => value,
            Err(message) => std::panic::resume_unwind(Box::new(message.to_string())),
        }
    }

    /// Spawns `computation` after `previous` has finished.
    fn start<F, Fut>(
        &self,
        id: u64,
        key: K,
        previous: Option<Flight<T>>,
        computation: F,
    ) -> Flight<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        let (sender, receiver) = oneshot::channel();
        let remove_flight = RemoveFlight {
            flights: Arc::clone(&self.flights),
            key,
            id,
        };

        let task = async move {
            if let Some(previous) = previous {
                previous.await.ok();
            }
            // `computation()` is called inside the guarded future so a panic while creating it is
            // caught as well.
            let outcome = AssertUnwindSafe(async move { computation().await })
                .catch_unwind()
                .await
                .map_err(panic_message);

            // Evict from the map before publishing, so callers either get a flight that will
            // receive the outcome, or start a new one.
            drop(remove_flight);
            sender.send(outcome).ok();
        };
        tokio::spawn(task);

        receiver
            .map(|received| received.unwrap_or_else(|_| Err(Arc::from("computation was dropped"))))
            .boxed()
            .shared()
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> Arc<str> {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        Arc::from(*message)
    } else if let Some(message) = payload.downcast_ref::<String>() {
        Arc::from(message.as_str())
    } else {
        Arc::from("computation panicked")
    }
}
