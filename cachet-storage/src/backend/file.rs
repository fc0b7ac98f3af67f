//! Durable store with one file per record.
//!
//! # Layout
//!
//! ```text
//! <root>/<first digest byte, hex>/<record id, hex>.rec
//! ```
//!
//! Record ids are SHA-256 digests of the key's JSON encoding (see
//! [`RecordId`]), so every key maps to a fixed, filesystem-safe path.
//!
//! # Write protocol
//!
//! A save encodes the value, writes it to a uniquely named temporary file in
//! the record's directory, flushes it to disk, then renames it over the
//! record. Readers therefore see either the previous record or the new one in
//! full. Writers to the same key are serialized by [`KeyLocks`]; a temporary
//! file left behind by a failed write is removed on drop.
//!
//! The filesystem half of a save or remove runs as one blocking task that
//! owns the key's guard. Cancelling the caller does not stop that task, and
//! the key stays locked until it finishes, so a later writer can never be
//! overtaken by an earlier one.

use std::io::{ErrorKind, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use cachet_core::{RecordId, StoreError, StoreResult};
use serde::Serialize;
use tokio::fs;
use tokio::task::{self, JoinError};
use uuid::Uuid;

use crate::codec::Codec;
use crate::key_lock::KeyLocks;
use crate::store::Store;

const RECORD_EXTENSION: &str = "rec";

/// File-backed store rooted at a directory.
pub struct FileStore<K, V> {
    root: PathBuf,
    codec: Arc<dyn Codec<V>>,
    locks: KeyLocks<RecordId>,
    _key: PhantomData<fn(&K)>,
}

impl<K, V> FileStore<K, V>
where
    K: Serialize,
{
    /// Open (creating if needed) a store rooted at `root`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Io` if the root directory cannot be created.
    pub fn open(root: impl Into<PathBuf>, codec: Arc<dyn Codec<V>>) -> StoreResult<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|e| {
            StoreError::io(e).with_detail(format!("cannot create store root {}", root.display()))
        })?;
        Ok(Self {
            root,
            codec,
            locks: KeyLocks::new(),
            _key: PhantomData,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the record that holds `key`.
    pub fn record_path(&self, key: &K) -> StoreResult<PathBuf> {
        Ok(self.path_for(&record_id(key)?))
    }

    fn path_for(&self, id: &RecordId) -> PathBuf {
        self.root
            .join(id.shard_prefix())
            .join(format!("{}.{}", id.to_hex(), RECORD_EXTENSION))
    }

    /// Remove every record under the root.
    pub async fn clear(&self) -> StoreResult<()> {
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(StoreError::io(e)),
        };
        while let Some(entry) = entries.next_entry().await.map_err(StoreError::io)? {
            let path = entry.path();
            let result = if entry.file_type().await.map_err(StoreError::io)?.is_dir() {
                fs::remove_dir_all(&path).await
            } else {
                fs::remove_file(&path).await
            };
            if let Err(e) = result {
                if e.kind() != ErrorKind::NotFound {
                    return Err(StoreError::io(e)
                        .with_detail(format!("cannot remove {}", path.display())));
                }
            }
        }
        tracing::debug!(root = %self.root.display(), "Cleared file store");
        Ok(())
    }
}

fn record_id<K: Serialize>(key: &K) -> StoreResult<RecordId> {
    RecordId::derive(key)
        .map_err(|e| StoreError::corrupt(e).with_detail("key cannot be encoded as a record id"))
}

fn task_error(e: JoinError) -> StoreError {
    StoreError::io(e).with_detail("record write task failed")
}

/// Write `bytes` to `tmp_path`, flush, and rename over `path`.
fn write_record(
    id: RecordId,
    dir: &Path,
    tmp_path: PathBuf,
    path: &Path,
    bytes: &[u8],
) -> StoreResult<()> {
    std::fs::create_dir_all(dir)
        .map_err(|e| StoreError::io(e).with_detail(format!("cannot create {}", dir.display())))?;

    let pending = PendingFile::new(tmp_path);
    let mut file = std::fs::File::create(&pending.path).map_err(StoreError::io)?;
    file.write_all(bytes).map_err(StoreError::io)?;
    file.sync_all().map_err(StoreError::io)?;
    drop(file);

    std::fs::rename(&pending.path, path)
        .map_err(|e| StoreError::io(e).with_detail(format!("cannot commit record {id}")))?;
    pending.commit();
    Ok(())
}

fn remove_record(id: RecordId, path: &Path) -> StoreResult<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StoreError::io(e).with_detail(format!("cannot remove record {id}"))),
    }
}

/// Deletes a temporary file unless the write it belongs to committed.
struct PendingFile {
    path: PathBuf,
    committed: bool,
}

impl PendingFile {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            committed: false,
        }
    }

    fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for PendingFile {
    fn drop(&mut self) {
        if !self.committed {
            if let Err(e) = std::fs::remove_file(&self.path) {
                if e.kind() != ErrorKind::NotFound {
                    tracing::warn!(
                        error = %e,
                        path = %self.path.display(),
                        "Failed to remove temporary record file"
                    );
                }
            }
        }
    }
}

#[async_trait]
impl<K, V> Store<K, V> for FileStore<K, V>
where
    K: Serialize + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    async fn get(&self, key: &K) -> StoreResult<Option<V>> {
        let id = record_id(key)?;
        let path = self.path_for(&id);

        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(StoreError::io(e).with_detail(format!("cannot read record {id}")));
            }
        };

        self.codec.decode(&bytes).map(Some).map_err(|e| StoreError::Corrupt {
            detail: Some(format!(
                "record {id} failed to decode as {}",
                self.codec.name()
            )),
            inner: Some(e),
        })
    }

    async fn save(&self, key: &K, value: V) -> StoreResult<()> {
        let id = record_id(key)?;
        let bytes = self.codec.encode(&value).map_err(|e| StoreError::Corrupt {
            detail: Some(format!("value failed to encode as {}", self.codec.name())),
            inner: Some(e),
        })?;

        let guard = self.locks.lock(id).await;

        let path = self.path_for(&id);
        let dir = self.root.join(id.shard_prefix());
        let tmp_path = dir.join(format!("{}.{}.tmp", id.to_hex(), Uuid::now_v7().simple()));
        let len = bytes.len();

        task::spawn_blocking(move || {
            let _guard = guard;
            write_record(id, &dir, tmp_path, &path, &bytes)
        })
        .await
        .map_err(task_error)??;

        tracing::trace!(record = %id, bytes = len, "Saved record");
        Ok(())
    }

    async fn remove(&self, key: &K) -> StoreResult<()> {
        let id = record_id(key)?;
        let guard = self.locks.lock(id).await;
        let path = self.path_for(&id);

        task::spawn_blocking(move || {
            let _guard = guard;
            remove_record(id, &path)
        })
        .await
        .map_err(task_error)?
    }

    fn backend_type(&self) -> &'static str {
        "file"
    }
}
