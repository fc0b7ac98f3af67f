//! The store abstraction shared by every backend and combinator.

use std::sync::Arc;

use async_trait::async_trait;
use cachet_core::StoreResult;

/// Asynchronous key/value persistence.
///
/// A store keeps at most one value per key. Implementations are expected to
/// be shared across tasks behind an `Arc`, so every operation takes `&self`
/// and must be safe to call concurrently.
///
/// # Contract
///
/// - `get` returns `Ok(None)` for a missing key, never an error.
/// - After a successful `save(k, v)` with no later writes to `k`, `get(k)`
///   returns `v`.
/// - After a successful `remove(k)` with no later writes to `k`, `get(k)`
///   returns `None`. Removing a missing key succeeds.
/// - Concurrent writers to the same key leave exactly one of the written
///   values in place, never a blend of the two.
///
/// Failures are reported as [`StoreError`](cachet_core::StoreError) with the
/// backend's native error attached as the inner cause.
#[async_trait]
pub trait Store<K, V>: Send + Sync {
    /// Read the value stored under `key`.
    async fn get(&self, key: &K) -> StoreResult<Option<V>>;

    /// Insert or overwrite the value stored under `key`.
    async fn save(&self, key: &K, value: V) -> StoreResult<()>;

    /// Delete the value stored under `key`, if any.
    async fn remove(&self, key: &K) -> StoreResult<()>;

    /// Short backend name used in logs (e.g. `"memory"`, `"file"`).
    fn backend_type(&self) -> &'static str;
}

#[async_trait]
impl<K, V, S> Store<K, V> for Arc<S>
where
    K: Send + Sync + 'static,
    V: Send + 'static,
    S: Store<K, V> + ?Sized,
{
    async fn get(&self, key: &K) -> StoreResult<Option<V>> {
        (**self).get(key).await
    }

    async fn save(&self, key: &K, value: V) -> StoreResult<()> {
        (**self).save(key, value).await
    }

    async fn remove(&self, key: &K) -> StoreResult<()> {
        (**self).remove(key).await
    }

    fn backend_type(&self) -> &'static str {
        (**self).backend_type()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tokio::sync::Mutex;

    /// Minimal store used to check that the trait stays object safe.
    #[derive(Default)]
    struct VecStore {
        entries: Mutex<HashMap<u32, String>>,
    }

    #[async_trait]
    impl Store<u32, String> for VecStore {
        async fn get(&self, key: &u32) -> StoreResult<Option<String>> {
            Ok(self.entries.lock().await.get(key).cloned())
        }

        async fn save(&self, key: &u32, value: String) -> StoreResult<()> {
            self.entries.lock().await.insert(*key, value);
            Ok(())
        }

        async fn remove(&self, key: &u32) -> StoreResult<()> {
            self.entries.lock().await.remove(key);
            Ok(())
        }

        fn backend_type(&self) -> &'static str {
            "vec"
        }
    }

    #[tokio::test]
    async fn test_store_behind_dyn_handle() {
        let store: Arc<dyn Store<u32, String>> = Arc::new(VecStore::default());

        assert_eq!(store.get(&1).await.unwrap(), None);
        store.save(&1, "one".to_string()).await.unwrap();
        assert_eq!(store.get(&1).await.unwrap().as_deref(), Some("one"));

        store.remove(&1).await.unwrap();
        store.remove(&1).await.unwrap();
        assert_eq!(store.get(&1).await.unwrap(), None);
        assert_eq!(store.backend_type(), "vec");
    }

    #[tokio::test]
    async fn test_shared_handle_is_a_store() {
        let shared = Arc::new(VecStore::default());
        let nested: Arc<dyn Store<u32, String>> = Arc::new(shared.clone());

        nested.save(&2, "two".to_string()).await.unwrap();
        assert_eq!(shared.get(&2).await.unwrap().as_deref(), Some("two"));
        assert_eq!(nested.backend_type(), "vec");
    }
}
