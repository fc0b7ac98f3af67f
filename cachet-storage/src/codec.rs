//! Value codecs for byte-oriented backends.
//!
//! The file and LMDB backends persist opaque bytes; a [`Codec`] turns values
//! into those bytes and back. Codec failures surface from the store as
//! [`StoreError::Corrupt`](cachet_core::StoreError::Corrupt).

use cachet_core::BoxError;
use serde::{de::DeserializeOwned, Serialize};

/// Converts values to and from their stored byte form.
pub trait Codec<V>: Send + Sync {
    fn encode(&self, value: &V) -> Result<Vec<u8>, BoxError>;

    fn decode(&self, bytes: &[u8]) -> Result<V, BoxError>;

    /// Codec name for diagnostics.
    fn name(&self) -> &'static str;
}

/// JSON codec backed by `serde_json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl<V> Codec<V> for JsonCodec
where
    V: Serialize + DeserializeOwned,
{
    fn encode(&self, value: &V) -> Result<Vec<u8>, BoxError> {
        Ok(serde_json::to_vec(value)?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<V, BoxError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    fn name(&self) -> &'static str {
        "json"
    }
}
