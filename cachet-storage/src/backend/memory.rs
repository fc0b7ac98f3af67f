//! Volatile in-process store.

use std::collections::hash_map::RandomState;
use std::collections::HashMap;
use std::hash::{BuildHasher, Hash};

use async_trait::async_trait;
use cachet_core::{StoreResult, DEFAULT_MEMORY_SHARDS};
use tokio::sync::RwLock;

use crate::store::Store;

/// In-memory store over a fixed set of lock-striped hash maps.
///
/// Keys are spread over the shards by hash so writers to unrelated keys
/// rarely contend. Operations never fail. Contents are lost when the store
/// is dropped.
pub struct MemoryStore<K, V> {
    shards: Box<[RwLock<HashMap<K, V>>]>,
    hasher: RandomState,
}

impl<K, V> MemoryStore<K, V>
where
    K: Eq + Hash,
{
    pub fn new() -> Self {
        Self::with_shards(DEFAULT_MEMORY_SHARDS)
    }

    /// Create a store with `shards` lock stripes (at least one).
    pub fn with_shards(shards: usize) -> Self {
        let shards = (0..shards.max(1))
            .map(|_| RwLock::new(HashMap::new()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            shards,
            hasher: RandomState::new(),
        }
    }

    fn shard(&self, key: &K) -> &RwLock<HashMap<K, V>> {
        let index = (self.hasher.hash_one(key) % self.shards.len() as u64) as usize;
        &self.shards[index]
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Number of stored entries.
    pub async fn len(&self) -> usize {
        let mut total = 0;
        for shard in self.shards.iter() {
            total += shard.read().await.len();
        }
        total
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drop every entry.
    pub async fn clear(&self) {
        for shard in self.shards.iter() {
            shard.write().await.clear();
        }
    }
}

impl<K, V> Default for MemoryStore<K, V>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<K, V> Store<K, V> for MemoryStore<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    async fn get(&self, key: &K) -> StoreResult<Option<V>> {
        Ok(self.shard(key).read().await.get(key).cloned())
    }

    async fn save(&self, key: &K, value: V) -> StoreResult<()> {
        self.shard(key).write().await.insert(key.clone(), value);
        Ok(())
    }

    async fn remove(&self, key: &K) -> StoreResult<()> {
        self.shard(key).write().await.remove(key);
        Ok(())
    }

    fn backend_type(&self) -> &'static str {
        "memory"
    }
}
