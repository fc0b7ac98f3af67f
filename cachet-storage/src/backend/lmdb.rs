//! LMDB-backed durable store.
//!
//! Uses the heed crate (Rust bindings for LMDB) to keep records in a single
//! memory-mapped database. Keys are the 32-byte [`RecordId`] digest of the
//! caller's key; values are the codec's bytes.
//!
//! # Thread Safety
//!
//! LMDB provides ACID transactions. The store uses:
//! - Read transactions for `get`
//! - Write transactions for `save`, `remove` and `clear`
//!
//! LMDB admits one writer at a time per environment, so same-key writes are
//! serialized and every committed value is whole.

use std::marker::PhantomData;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use cachet_core::{RecordId, StoreError, StoreResult};
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};
use serde::Serialize;

use crate::codec::Codec;
use crate::store::Store;

/// LMDB store handle.
///
/// # Example
///
/// ```ignore
/// use cachet_storage::{JsonCodec, LmdbStore, Store};
/// use std::sync::Arc;
///
/// let store: LmdbStore<String, Profile> =
///     LmdbStore::open("/var/cache/profiles", 256, Arc::new(JsonCodec))?;
/// store.save(&"ada".to_string(), profile).await?;
/// ```
pub struct LmdbStore<K, V> {
    env: Env,
    db: Database<Bytes, Bytes>,
    codec: Arc<dyn Codec<V>>,
    _key: PhantomData<fn(&K)>,
}

fn transaction_error(e: heed::Error) -> StoreError {
    StoreError::io(e).with_detail("LMDB transaction failed")
}

impl<K, V> LmdbStore<K, V>
where
    K: Serialize,
{
    /// Open (creating if needed) an LMDB environment at `path`.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `max_size_mb` - Maximum size of the memory map in megabytes
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Io` if:
    /// - The directory cannot be created
    /// - The LMDB environment cannot be opened
    /// - The database cannot be created
    pub fn open<P: AsRef<Path>>(
        path: P,
        max_size_mb: usize,
        codec: Arc<dyn Codec<V>>,
    ) -> StoreResult<Self> {
        let path = path.as_ref();
        std::fs::create_dir_all(path).map_err(|e| {
            StoreError::io(e).with_detail(format!("cannot create {}", path.display()))
        })?;

        // SAFETY: the environment is opened once per store and the map is
        // not modified outside heed.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb.max(1) * 1024 * 1024)
                .max_dbs(1)
                .open(path)
        }
        .map_err(|e| StoreError::io(e).with_detail("failed to open LMDB environment"))?;

        let mut wtxn = env.write_txn().map_err(transaction_error)?;
        let db: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| StoreError::io(e).with_detail("failed to open LMDB database"))?;
        wtxn.commit().map_err(transaction_error)?;

        tracing::debug!(path = %path.display(), max_size_mb, "Opened LMDB store");

        Ok(Self {
            env,
            db,
            codec,
            _key: PhantomData,
        })
    }

    /// Number of stored records.
    pub fn len(&self) -> StoreResult<u64> {
        let rtxn = self.env.read_txn().map_err(transaction_error)?;
        self.db.len(&rtxn).map_err(transaction_error)
    }

    pub fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Remove every record.
    pub fn clear(&self) -> StoreResult<()> {
        let mut wtxn = self.env.write_txn().map_err(transaction_error)?;
        self.db.clear(&mut wtxn).map_err(transaction_error)?;
        wtxn.commit().map_err(transaction_error)
    }
}

fn record_id<K: Serialize>(key: &K) -> StoreResult<RecordId> {
    RecordId::derive(key)
        .map_err(|e| StoreError::corrupt(e).with_detail("key cannot be encoded as a record id"))
}

#[async_trait]
impl<K, V> Store<K, V> for LmdbStore<K, V>
where
    K: Serialize + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    async fn get(&self, key: &K) -> StoreResult<Option<V>> {
        let id = record_id(key)?;
        let rtxn = self.env.read_txn().map_err(transaction_error)?;

        match self.db.get(&rtxn, id.as_bytes()) {
            Ok(Some(bytes)) => {
                self.codec
                    .decode(bytes)
                    .map(Some)
                    .map_err(|e| StoreError::Corrupt {
                        detail: Some(format!(
                            "record {id} failed to decode as {}",
                            self.codec.name()
                        )),
                        inner: Some(e),
                    })
            }
            Ok(None) => Ok(None),
            Err(e) => Err(transaction_error(e)),
        }
    }

    async fn save(&self, key: &K, value: V) -> StoreResult<()> {
        let id = record_id(key)?;
        let bytes = self.codec.encode(&value).map_err(|e| StoreError::Corrupt {
            detail: Some(format!("value failed to encode as {}", self.codec.name())),
            inner: Some(e),
        })?;

        let mut wtxn = self.env.write_txn().map_err(transaction_error)?;
        self.db
            .put(&mut wtxn, id.as_bytes(), bytes.as_slice())
            .map_err(transaction_error)?;
        wtxn.commit().map_err(transaction_error)
    }

    async fn remove(&self, key: &K) -> StoreResult<()> {
        let id = record_id(key)?;

        let mut wtxn = self.env.write_txn().map_err(transaction_error)?;
        self.db
            .delete(&mut wtxn, id.as_bytes())
            .map_err(transaction_error)?;
        wtxn.commit().map_err(transaction_error)
    }

    fn backend_type(&self) -> &'static str {
        "lmdb"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::JsonCodec;
    use tempfile::TempDir;

    fn create_test_store() -> (LmdbStore<String, Vec<u32>>, TempDir) {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let store = LmdbStore::open(temp_dir.path(), 10, Arc::new(JsonCodec))
            .expect("store creation should succeed");
        (store, temp_dir)
    }

    #[tokio::test]
    async fn test_put_and_get() {
        let (store, _temp_dir) = create_test_store();
        let key = "numbers".to_string();

        assert_eq!(store.get(&key).await.unwrap(), None);
        store.save(&key, vec![1, 2, 3]).await.unwrap();
        assert_eq!(store.get(&key).await.unwrap(), Some(vec![1, 2, 3]));
        assert_eq!(store.len().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_overwrite_and_delete() {
        let (store, _temp_dir) = create_test_store();
        let key = "k".to_string();

        store.save(&key, vec![1]).await.unwrap();
        store.save(&key, vec![2]).await.unwrap();
        assert_eq!(store.get(&key).await.unwrap(), Some(vec![2]));

        store.remove(&key).await.unwrap();
        assert_eq!(store.get(&key).await.unwrap(), None);
        store.remove(&key).await.unwrap();
        assert!(store.is_empty().unwrap());
    }

    #[tokio::test]
    async fn test_clear() {
        let (store, _temp_dir) = create_test_store();
        for i in 0..20u32 {
            store.save(&format!("k{i}"), vec![i]).await.unwrap();
        }
        assert_eq!(store.len().unwrap(), 20);
        store.clear().unwrap();
        assert!(store.is_empty().unwrap());
    }

    #[tokio::test]
    async fn test_undecodable_record_is_corrupt() {
        let temp_dir = TempDir::new().unwrap();
        {
            let writer: LmdbStore<String, String> =
                LmdbStore::open(temp_dir.path(), 10, Arc::new(JsonCodec)).unwrap();
            writer
                .save(&"k".to_string(), "not a list".to_string())
                .await
                .unwrap();
        }

        let reader: LmdbStore<String, Vec<u32>> =
            LmdbStore::open(temp_dir.path(), 10, Arc::new(JsonCodec)).unwrap();
        let err = reader.get(&"k".to_string()).await.unwrap_err();
        assert!(err.is_corrupt());
    }

    #[tokio::test]
    async fn test_records_survive_reopen() {
        let temp_dir = TempDir::new().unwrap();
        {
            let (key, value) = ("persist".to_string(), vec![7, 7]);
            let store: LmdbStore<String, Vec<u32>> =
                LmdbStore::open(temp_dir.path(), 10, Arc::new(JsonCodec)).unwrap();
            store.save(&key, value).await.unwrap();
        }
        let store: LmdbStore<String, Vec<u32>> =
            LmdbStore::open(temp_dir.path(), 10, Arc::new(JsonCodec)).unwrap();
        assert_eq!(
            store.get(&"persist".to_string()).await.unwrap(),
            Some(vec![7, 7])
        );
    }
}
