//! Per-key async write locks.
//!
//! Writers to the same key queue on one `tokio::sync::Mutex`; writers to
//! different keys never block each other. Lock entries are created on demand
//! and dropped again once no guard or waiter refers to them, so the table
//! only holds keys with in-flight writes.
//!
//! Guards own a handle to the table, so a guard can be moved into a
//! blocking task and keep the key locked until that task finishes.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::OwnedMutexGuard;

type KeyMutex = Arc<tokio::sync::Mutex<()>>;
type LockTable<K> = Arc<Mutex<HashMap<K, KeyMutex>>>;

// The table mutex is never held across an await and only guards map
// bookkeeping, so a poisoned table is still consistent.
fn entries<K>(table: &LockTable<K>) -> MutexGuard<'_, HashMap<K, KeyMutex>> {
    table.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Table of per-key mutexes.
pub struct KeyLocks<K> {
    table: LockTable<K>,
}

impl<K> KeyLocks<K>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self {
            table: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Wait for exclusive access to `key`.
    ///
    /// Cancel safe: dropping the returned future before it resolves releases
    /// the caller's claim on the table entry.
    pub async fn lock(&self, key: K) -> KeyGuard<K> {
        let mutex = entries(&self.table).entry(key.clone()).or_default().clone();
        let mut guard = KeyGuard {
            table: self.table.clone(),
            key,
            mutex: mutex.clone(),
            held: None,
        };
        guard.held = Some(mutex.lock_owned().await);
        guard
    }

    /// Number of keys with a live guard or waiter.
    pub fn active_keys(&self) -> usize {
        entries(&self.table).len()
    }
}

impl<K> Default for KeyLocks<K>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Exclusive access to one key, released on drop.
pub struct KeyGuard<K>
where
    K: Eq + Hash + Clone,
{
    table: LockTable<K>,
    key: K,
    mutex: KeyMutex,
    held: Option<OwnedMutexGuard<()>>,
}

impl<K> Drop for KeyGuard<K>
where
    K: Eq + Hash + Clone,
{
    fn drop(&mut self) {
        // Release first so the strong count below only sees the table's
        // handle, ours, and any queued waiters.
        self.held.take();

        let mut table = entries(&self.table);
        let idle = table
            .get(&self.key)
            .is_some_and(|entry| Arc::ptr_eq(entry, &self.mutex) && Arc::strong_count(entry) == 2);
        if idle {
            table.remove(&self.key);
        }
    }
}
