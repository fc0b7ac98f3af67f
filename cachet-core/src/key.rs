//! Stable record identifiers for durable stores.
//!
//! A durable store names each record by a digest of its key rather than by
//! `Hash`: `std` hashers are randomly seeded per process and not collision
//! resistant, so they cannot name records that must survive a restart.

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt;

/// SHA-256 digest identifying one durable record.
///
/// Derived from the key's canonical JSON encoding. Keys whose `Serialize`
/// output is not deterministic (e.g. `HashMap` fields) do not get stable
/// identifiers; use ordered collections in durable keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordId([u8; 32]);

impl RecordId {
    /// Derive the identifier for a key.
    pub fn derive<K: Serialize + ?Sized>(key: &K) -> Result<Self, serde_json::Error> {
        let encoded = serde_json::to_vec(key)?;
        Ok(Self::from_key_bytes(&encoded))
    }

    /// Digest of an already-encoded key.
    pub fn from_key_bytes(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        let result = hasher.finalize();
        let mut digest = [0u8; 32];
        digest.copy_from_slice(&result);
        Self(digest)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex form, 64 characters.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Two-character fan-out directory name (first digest byte).
    pub fn shard_prefix(&self) -> String {
        hex::encode(&self.0[..1])
    }

    /// Parse the hex form produced by [`RecordId::to_hex`].
    pub fn from_hex(s: &str) -> Option<Self> {
        let bytes = hex::decode(s).ok()?;
        let digest: [u8; 32] = bytes.try_into().ok()?;
        Some(Self(digest))
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[derive(Serialize)]
    struct CompositeKey<'a> {
        tenant: &'a str,
        id: u64,
    }

    #[test]
    fn test_derive_is_deterministic() {
        let a = RecordId::derive("user:42").unwrap();
        let b = RecordId::derive("user:42").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.to_hex().len(), 64);
    }

    #[test]
    fn test_known_digest() {
        // sha256 of the JSON string "\"abc\""
        let id = RecordId::derive("abc").unwrap();
        assert_eq!(id, RecordId::from_key_bytes(b"\"abc\""));
    }

    #[test]
    fn test_type_tagged_encoding_distinguishes_keys() {
        let string_key = RecordId::derive("1").unwrap();
        let int_key = RecordId::derive(&1u32).unwrap();
        assert_ne!(string_key, int_key);
    }

    #[test]
    fn test_composite_key() {
        let a = RecordId::derive(&CompositeKey { tenant: "t1", id: 7 }).unwrap();
        let b = RecordId::derive(&CompositeKey { tenant: "t2", id: 7 }).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_shard_prefix_matches_hex() {
        let id = RecordId::derive("shard-me").unwrap();
        assert_eq!(id.shard_prefix(), &id.to_hex()[..2]);
    }

    #[test]
    fn test_from_hex_rejects_garbage() {
        assert!(RecordId::from_hex("zz").is_none());
        assert!(RecordId::from_hex("abcd").is_none());
    }

    proptest! {
        #[test]
        fn prop_hex_roundtrip(key in ".*") {
            let id = RecordId::derive(&key).unwrap();
            prop_assert_eq!(RecordId::from_hex(&id.to_hex()), Some(id));
        }

        #[test]
        fn prop_distinct_keys_distinct_ids(a in "[a-z0-9]{1,16}", b in "[a-z0-9]{1,16}") {
            prop_assume!(a != b);
            prop_assert_ne!(RecordId::derive(&a).unwrap(), RecordId::derive(&b).unwrap());
        }
    }
}
