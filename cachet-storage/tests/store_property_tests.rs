//! Property-Based Tests for Store Implementations
//!
//! **Property 1: Read-after-write**
//!
//! For any set of entries, every backend and composite SHALL return the
//! last value saved under a key, and nothing for a key never saved.
//!
//! **Property 2: Tier consistency**
//!
//! A value found only in the slow tier SHALL be promoted into the fast tier
//! on read, and a failed fast-tier write SHALL leave the slow tier untouched.
//!
//! **Property 3: Expiry**
//!
//! An entry saved with a zero TTL SHALL never be returned.

use std::sync::Arc;
use std::time::Duration;

use cachet_core::{CachetConfig, ErrorChain, ExpiringEntry, StoreConfig, Tier};
use cachet_storage::{
    build_configured, build_store, ExpiringStore, FileStore, JsonCodec, LmdbStore, MemoryStore, Store, TieredStore,
};
use cachet_test_utils::generators::{
    arb_entries, arb_failure_kind, arb_key, arb_live_ttl, arb_value,
};
use cachet_test_utils::{test_runtime, FailureKind, SpyStore, TestFailure, TestValue};
use proptest::prelude::*;
use tempfile::TempDir;

// ============================================================================
// TEST CONFIGURATION
// ============================================================================

type Entries = Vec<(String, TestValue)>;

fn temp_dir() -> Result<TempDir, TestCaseError> {
    TempDir::new().map_err(|e| TestCaseError::fail(format!("Failed to create temp dir: {}", e)))
}

async fn assert_read_after_write(
    store: &dyn Store<String, TestValue>,
    entries: &Entries,
    missing: &str,
) -> Result<(), TestCaseError> {
    for (key, value) in entries {
        store
            .save(key, value.clone())
            .await
            .map_err(|e| TestCaseError::fail(format!("save failed: {}", e)))?;
    }
    for (key, value) in entries {
        let found = store
            .get(key)
            .await
            .map_err(|e| TestCaseError::fail(format!("get failed: {}", e)))?;
        prop_assert_eq!(found.as_ref(), Some(value));
    }

    let missing = missing.to_string();
    if !entries.iter().any(|(key, _)| *key == missing) {
        let found = store
            .get(&missing)
            .await
            .map_err(|e| TestCaseError::fail(format!("get failed: {}", e)))?;
        prop_assert!(found.is_none());
    }
    Ok(())
}

// ============================================================================
// PROPERTY TESTS
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_memory_read_after_write(entries in arb_entries(20), missing in arb_key()) {
        let rt = test_runtime()?;
        rt.block_on(async {
            let store = MemoryStore::<String, TestValue>::new();
            assert_read_after_write(&store, &entries, &missing).await
        })?;
    }

    #[test]
    fn prop_file_read_after_write(entries in arb_entries(10), missing in arb_key()) {
        let dir = temp_dir()?;
        let rt = test_runtime()?;
        rt.block_on(async {
            let store = FileStore::<String, TestValue>::open(dir.path(), Arc::new(JsonCodec))
                .map_err(|e| TestCaseError::fail(format!("open failed: {}", e)))?;
            assert_read_after_write(&store, &entries, &missing).await
        })?;
    }

    #[test]
    fn prop_lmdb_read_after_write(entries in arb_entries(10), missing in arb_key()) {
        let dir = temp_dir()?;
        let rt = test_runtime()?;
        rt.block_on(async {
            let store = LmdbStore::<String, TestValue>::open(dir.path(), 16, Arc::new(JsonCodec))
                .map_err(|e| TestCaseError::fail(format!("open failed: {}", e)))?;
            assert_read_after_write(&store, &entries, &missing).await
        })?;
    }

    #[test]
    fn prop_configured_tiers_read_after_write(entries in arb_entries(10), missing in arb_key()) {
        let dir = temp_dir()?;
        let config = StoreConfig::tiered(
            StoreConfig::memory(),
            StoreConfig::tiered(
                StoreConfig::file(dir.path().join("records")),
                StoreConfig::lmdb(dir.path().join("lmdb"), 16),
            ),
        );
        let rt = test_runtime()?;
        rt.block_on(async {
            let store = build_store::<String, TestValue>(&config, Arc::new(JsonCodec))
                .map_err(|e| TestCaseError::fail(format!("build failed: {}", e)))?;
            assert_read_after_write(store.as_ref(), &entries, &missing).await
        })?;
    }

    #[test]
    fn prop_last_write_wins(key in arb_key(), values in prop::collection::vec(arb_value(), 1..6)) {
        let dir = temp_dir()?;
        let rt = test_runtime()?;
        rt.block_on(async {
            let store = FileStore::<String, TestValue>::open(dir.path(), Arc::new(JsonCodec))
                .map_err(|e| TestCaseError::fail(format!("open failed: {}", e)))?;
            for value in &values {
                store.save(&key, value.clone()).await
                    .map_err(|e| TestCaseError::fail(format!("save failed: {}", e)))?;
            }
            let found = store.get(&key).await
                .map_err(|e| TestCaseError::fail(format!("get failed: {}", e)))?;
            prop_assert_eq!(found.as_ref(), values.last());
            Ok(())
        })?;
    }

    #[test]
    fn prop_slow_hit_promotes(entries in arb_entries(10)) {
        let rt = test_runtime()?;
        rt.block_on(async {
            let fast = Arc::new(SpyStore::<String, TestValue>::new());
            let slow = Arc::new(SpyStore::<String, TestValue>::new());
            for (key, value) in &entries {
                slow.preload(key.clone(), value.clone()).await;
            }
            let tiered = TieredStore::<String, TestValue>::new(fast.clone(), slow.clone());

            for (key, value) in &entries {
                let found = tiered.get(key).await
                    .map_err(|e| TestCaseError::fail(format!("get failed: {}", e)))?;
                prop_assert_eq!(found.as_ref(), Some(value));
                let peeked = fast.peek(key).await;
                prop_assert_eq!(peeked.as_ref(), Some(value));
            }

            let stats = tiered.stats();
            prop_assert_eq!(stats.slow_hits, entries.len() as u64);
            prop_assert_eq!(stats.promotions, entries.len() as u64);
            prop_assert_eq!(fast.saves(), entries.len());
            Ok(())
        })?;
    }

    #[test]
    fn prop_fast_write_failure_skips_slow(
        key in arb_key(),
        value in arb_value(),
        kind in arb_failure_kind(),
    ) {
        let rt = test_runtime()?;
        rt.block_on(async {
            let fast = Arc::new(SpyStore::<String, TestValue>::new());
            let slow = Arc::new(SpyStore::<String, TestValue>::new());
            fast.fail_saves(kind);
            let tiered = TieredStore::<String, TestValue>::new(fast.clone(), slow.clone());

            let err = match tiered.save(&key, value).await {
                Ok(()) => return Err(TestCaseError::fail("save should fail")),
                Err(err) => err,
            };
            prop_assert_eq!(err.failed_tier(), Some(Tier::Fast));
            prop_assert_eq!(slow.saves(), 0);
            prop_assert!(slow.peek(&key).await.is_none());
            Ok(())
        })?;
    }

    #[test]
    fn prop_zero_ttl_never_returned(key in arb_key(), value in arb_value()) {
        let rt = test_runtime()?;
        rt.block_on(async {
            let inner = Arc::new(MemoryStore::<String, ExpiringEntry<TestValue>>::new());
            let store = ExpiringStore::<String, TestValue>::new(inner, Some(Duration::ZERO));

            store.save(&key, value).await
                .map_err(|e| TestCaseError::fail(format!("save failed: {}", e)))?;
            let found = store.get(&key).await
                .map_err(|e| TestCaseError::fail(format!("get failed: {}", e)))?;
            prop_assert!(found.is_none());
            Ok(())
        })?;
    }

    #[test]
    fn prop_configured_ttl_keeps_live_entries(
        entries in arb_entries(10),
        missing in arb_key(),
        ttl in arb_live_ttl(),
    ) {
        let config = CachetConfig::new().with_ttl(Some(ttl));
        let rt = test_runtime()?;
        rt.block_on(async {
            let store = build_configured::<String, TestValue, _>(&config, JsonCodec)
                .map_err(|e| TestCaseError::fail(format!("build failed: {}", e)))?;
            assert_read_after_write(store.as_ref(), &entries, &missing).await
        })?;
    }

    #[test]
    fn prop_expiring_tiers_read_after_write(entries in arb_entries(10), missing in arb_key()) {
        let rt = test_runtime()?;
        rt.block_on(async {
            let store = ExpiringStore::<String, TestValue>::tiered(
                Arc::new(MemoryStore::<String, ExpiringEntry<TestValue>>::new()),
                Arc::new(MemoryStore::<String, ExpiringEntry<TestValue>>::new()),
                Some(Duration::from_secs(3600)),
            );
            assert_read_after_write(&store, &entries, &missing).await
        })?;
    }
}

// ============================================================================
// CONCURRENCY
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_saves_to_distinct_keys_all_land() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(
        FileStore::<String, TestValue>::open(dir.path(), Arc::new(JsonCodec)).unwrap(),
    );

    let mut handles = Vec::new();
    for i in 0..32u64 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            store
                .save(&format!("user:{i}"), TestValue::new(i, format!("user {i}")))
                .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    for i in 0..32u64 {
        let found = store.get(&format!("user:{i}")).await.unwrap();
        assert_eq!(found.map(|v| v.id), Some(i));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_saves_to_one_key_leave_a_whole_value() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(
        LmdbStore::<String, TestValue>::open(dir.path(), 16, Arc::new(JsonCodec)).unwrap(),
    );
    let key = "shared".to_string();

    let mut handles = Vec::new();
    for i in 0..16u64 {
        let store = store.clone();
        let key = key.clone();
        handles.push(tokio::spawn(async move {
            store.save(&key, TestValue::new(i, format!("writer {i}"))).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let found = store.get(&key).await.unwrap().unwrap();
    assert_eq!(found.name, format!("writer {}", found.id));
}

#[tokio::test]
async fn test_slow_read_failure_is_tagged() {
    let fast = Arc::new(SpyStore::<String, TestValue>::new());
    let slow = Arc::new(SpyStore::<String, TestValue>::new());
    slow.fail_gets(FailureKind::Io);
    let tiered = TieredStore::<String, TestValue>::new(fast, slow);

    let err = tiered.get(&"k".to_string()).await.unwrap_err();
    assert_eq!(err.failed_tier(), Some(Tier::Slow));
    assert!(err.find_cause::<TestFailure>().is_some());
}
