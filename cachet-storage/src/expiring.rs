//! TTL layer over stores of [`ExpiringEntry`] values.
//!
//! Expiry is checked right after every read; an expired entry is reported
//! as absent and removed from the inner store on a best-effort basis.
//!
//! Saves, removes and expired-entry cleanup for a key are serialized on a
//! per-key lock, and cleanup re-reads the entry under that lock. A save that
//! completes while a reader is looking at the expired entry it replaces is
//! therefore never removed by that reader.

use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cachet_core::{ExpiringEntry, StoreResult, TtlConfig};

use crate::key_lock::KeyLocks;
use crate::store::Store;
use crate::tiered::{PromotionFilter, TieredStore};

/// Promotion filter that keeps expired entries out of faster tiers.
pub fn reject_expired<V>() -> PromotionFilter<ExpiringEntry<V>>
where
    V: 'static,
{
    Arc::new(|entry: &ExpiringEntry<V>| !entry.is_expired())
}

/// Store exposing plain values on top of a store of expiring entries.
pub struct ExpiringStore<K, V> {
    inner: Arc<dyn Store<K, ExpiringEntry<V>>>,
    ttl: Option<Duration>,
    locks: KeyLocks<K>,
}

impl<K, V> ExpiringStore<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Wrap `inner`; entries saved through this store expire after `ttl`
    /// (`None` means never).
    pub fn new(inner: Arc<dyn Store<K, ExpiringEntry<V>>>, ttl: Option<Duration>) -> Self {
        Self {
            inner,
            ttl,
            locks: KeyLocks::new(),
        }
    }

    pub fn from_config(inner: Arc<dyn Store<K, ExpiringEntry<V>>>, config: &TtlConfig) -> Self {
        Self::new(inner, config.ttl())
    }

    /// Tiered store of expiring entries that never promotes an expired
    /// entry from `slow` into `fast`.
    pub fn tiered(
        fast: Arc<dyn Store<K, ExpiringEntry<V>>>,
        slow: Arc<dyn Store<K, ExpiringEntry<V>>>,
        ttl: Option<Duration>,
    ) -> Self {
        let tiered = TieredStore::new(fast, slow).with_shared_filter(Some(reject_expired()));
        Self::new(Arc::new(tiered), ttl)
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    pub fn inner(&self) -> &Arc<dyn Store<K, ExpiringEntry<V>>> {
        &self.inner
    }

    /// Save with a TTL other than the store default.
    pub async fn save_with_ttl(
        &self,
        key: &K,
        value: V,
        ttl: Option<Duration>,
    ) -> StoreResult<()> {
        let _guard = self.locks.lock(key.clone()).await;
        self.inner.save(key, ExpiringEntry::new(value, ttl)).await
    }

    /// Read the raw entry, including its expiry, without filtering.
    pub async fn get_entry(&self, key: &K) -> StoreResult<Option<ExpiringEntry<V>>> {
        self.inner.get(key).await
    }
}

#[async_trait]
impl<K, V> Store<K, V> for ExpiringStore<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    async fn get(&self, key: &K) -> StoreResult<Option<V>> {
        match self.inner.get(key).await? {
            None => return Ok(None),
            Some(entry) if !entry.is_expired() => return Ok(Some(entry.into_value())),
            Some(_) => {}
        }

        // A save may have replaced the expired entry since the read above.
        let _guard = self.locks.lock(key.clone()).await;
        match self.inner.get(key).await? {
            Some(entry) if !entry.is_expired() => Ok(Some(entry.into_value())),
            Some(_) => {
                tracing::debug!(backend = self.inner.backend_type(), "Expired entry dropped");
                if let Err(e) = self.inner.remove(key).await {
                    tracing::warn!(
                        error = %e,
                        backend = self.inner.backend_type(),
                        "Failed to remove expired entry"
                    );
                }
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn save(&self, key: &K, value: V) -> StoreResult<()> {
        self.save_with_ttl(key, value, self.ttl).await
    }

    async fn remove(&self, key: &K) -> StoreResult<()> {
        let _guard = self.locks.lock(key.clone()).await;
        self.inner.remove(key).await
    }

    fn backend_type(&self) -> &'static str {
        "expiring"
    }
}
