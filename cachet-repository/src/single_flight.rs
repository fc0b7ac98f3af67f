//! Coalescing of concurrent identical requests.
//!
//! The first caller for a key becomes the leader and runs the resolution;
//! callers arriving while it is in flight wait for the leader's outcome and
//! receive a clone of it. If the leader is cancelled, one of the waiters
//! runs its own resolution in its place.
//!
//! The registry is a synchronous mutex held only for map bookkeeping, never
//! across an `.await`.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::OnceCell;

type Flight<T> = Arc<OnceCell<T>>;

/// Registry of in-flight resolutions keyed by `K`, each producing a `T`.
pub struct SingleFlight<K, T> {
    inflight: Mutex<HashMap<K, Flight<T>>>,
}

impl<K, T> SingleFlight<K, T>
where
    K: Eq + Hash + Clone,
    T: Clone,
{
    pub fn new() -> Self {
        Self {
            inflight: Mutex::new(HashMap::new()),
        }
    }

    fn table(&self) -> MutexGuard<'_, HashMap<K, Flight<T>>> {
        self.inflight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `resolve` for `key` unless a resolution for `key` is already in
    /// flight, in which case wait for and return its outcome.
    pub async fn run<F, Fut>(&self, key: &K, resolve: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let flight = self
            .table()
            .entry(key.clone())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        let landing = Landing {
            registry: self,
            key: key.clone(),
            flight,
        };
        landing.flight.get_or_init(resolve).await.clone()
    }

    /// Number of keys with a resolution in flight.
    pub fn in_flight(&self) -> usize {
        self.table().len()
    }
}

impl<K, T> Default for SingleFlight<K, T>
where
    K: Eq + Hash + Clone,
    T: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Retires a flight from the registry once it has landed, or once its last
/// participant has gone.
struct Landing<'a, K, T>
where
    K: Eq + Hash + Clone,
    T: Clone,
{
    registry: &'a SingleFlight<K, T>,
    key: K,
    flight: Flight<T>,
}

impl<K, T> Drop for Landing<'_, K, T>
where
    K: Eq + Hash + Clone,
    T: Clone,
{
    fn drop(&mut self) {
        let mut table = self.registry.table();
        let retire = table.get(&self.key).is_some_and(|current| {
            // The table's handle and ours are the only ones left when no
            // waiter still depends on this flight.
            Arc::ptr_eq(current, &self.flight)
                && (self.flight.initialized() || Arc::strong_count(&self.flight) == 2)
        });
        if retire {
            table.remove(&self.key);
        }
    }
}
