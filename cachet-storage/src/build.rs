//! Store assembly from configuration.
//!
//! Assembly happens once, synchronously, while the object graph is built.
//! Tiered configs are assembled depth-first, so every nested tier exists
//! before the composite that owns it.

use std::hash::Hash;
use std::sync::Arc;

use cachet_core::{CachetConfig, ConfigError, ExpiringEntry, StoreConfig, StoreError, TtlConfig};
use serde::Serialize;
use thiserror::Error;

use crate::backend::{FileStore, LmdbStore, MemoryStore};
use crate::codec::Codec;
use crate::expiring::{reject_expired, ExpiringStore};
use crate::store::Store;
use crate::tiered::{PromotionFilter, TieredStore};

/// Errors raised while assembling stores.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Invalid store configuration")]
    Config(#[from] ConfigError),

    #[error("Failed to open {backend} store")]
    Open {
        backend: &'static str,
        #[source]
        inner: StoreError,
    },
}

/// Assemble the store described by `config`.
///
/// # Errors
///
/// Returns `BuildError::Config` if any level of the configuration is
/// invalid, or `BuildError::Open` if a durable backend cannot be opened.
pub fn build_store<K, V>(
    config: &StoreConfig,
    codec: Arc<dyn Codec<V>>,
) -> Result<Arc<dyn Store<K, V>>, BuildError>
where
    K: Eq + Hash + Clone + Serialize + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    config.validate()?;
    assemble(config, &codec, None)
}

/// Assemble an expiring store over `config`. Every tiered level refuses
/// to promote expired entries.
pub fn build_expiring_store<K, V>(
    config: &StoreConfig,
    ttl: &TtlConfig,
    codec: Arc<dyn Codec<ExpiringEntry<V>>>,
) -> Result<Arc<ExpiringStore<K, V>>, BuildError>
where
    K: Eq + Hash + Clone + Serialize + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    config.validate()?;
    let inner = assemble::<K, ExpiringEntry<V>>(config, &codec, Some(reject_expired()))?;
    Ok(Arc::new(ExpiringStore::from_config(inner, ttl)))
}

/// Assemble the store for a full [`CachetConfig`]: an expiring store when
/// a TTL is configured, the plain store otherwise.
pub fn build_configured<K, V, C>(
    config: &CachetConfig,
    codec: C,
) -> Result<Arc<dyn Store<K, V>>, BuildError>
where
    K: Eq + Hash + Clone + Serialize + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    C: Codec<V> + Codec<ExpiringEntry<V>> + 'static,
{
    if config.ttl.ttl().is_some() {
        let store: Arc<dyn Store<K, V>> =
            build_expiring_store::<K, V>(&config.store, &config.ttl, Arc::new(codec))?;
        Ok(store)
    } else {
        build_store::<K, V>(&config.store, Arc::new(codec))
    }
}

fn assemble<K, V>(
    config: &StoreConfig,
    codec: &Arc<dyn Codec<V>>,
    promote_if: Option<PromotionFilter<V>>,
) -> Result<Arc<dyn Store<K, V>>, BuildError>
where
    K: Eq + Hash + Clone + Serialize + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    let store: Arc<dyn Store<K, V>> = match config {
        StoreConfig::Memory { shards } => Arc::new(MemoryStore::<K, V>::with_shards(*shards)),
        StoreConfig::File { root } => {
            let store = FileStore::<K, V>::open(root, codec.clone()).map_err(|inner| {
                BuildError::Open {
                    backend: "file",
                    inner,
                }
            })?;
            Arc::new(store)
        }
        StoreConfig::Lmdb { path, max_size_mb } => Arc::new(
            LmdbStore::<K, V>::open(path, *max_size_mb, codec.clone()).map_err(|inner| {
                BuildError::Open {
                    backend: "lmdb",
                    inner,
                }
            })?,
        ),
        StoreConfig::Tiered { fast, slow } => {
            let fast = assemble(fast, codec, promote_if.clone())?;
            let slow = assemble(slow, codec, promote_if.clone())?;
            Arc::new(TieredStore::<K, V>::new(fast, slow).with_shared_filter(promote_if))
        }
    };
    tracing::debug!(backend = config.backend_type(), "Assembled store");
    Ok(store)
}
