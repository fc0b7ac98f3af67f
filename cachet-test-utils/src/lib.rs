//! CACHET Test Utilities
//!
//! Centralized test infrastructure for the CACHET workspace:
//! - Spy and failing stores for observing and breaking the store layer
//! - A scripted source with call counting and programmable outcomes
//! - Proptest generators for keys, values, and configuration
//! - Tracing and runtime setup for tests

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// Re-export the types tests reach for most
pub use cachet_core::{
    CacheWriteFailure, CachetConfig, DomainError, DomainErrorKind, ErrorChain, ExpiringEntry,
    FetchPolicy, RepositoryConfig, StoreConfig, StoreError, StoreResult, Tier, TtlConfig,
};
pub use cachet_repository::{Origin, Repository, Resolved, Source, SourceExt};
pub use cachet_storage::{MemoryStore, Store};

// ============================================================================
// INJECTED FAILURES
// ============================================================================

/// Failure injected by the test doubles in this crate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("injected failure: {0}")]
pub struct TestFailure(pub String);

impl TestFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Which store error a test double produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Io,
    Corrupt,
}

impl FailureKind {
    /// Store error of this kind with a [`TestFailure`] as inner cause.
    pub fn to_error(self, operation: &str) -> StoreError {
        let cause = TestFailure::new(format!("{operation} failed"));
        match self {
            FailureKind::Io => StoreError::io(cause),
            FailureKind::Corrupt => StoreError::corrupt(cause),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Failures {
    get: Option<FailureKind>,
    save: Option<FailureKind>,
    remove: Option<FailureKind>,
}

// ============================================================================
// SPY STORE
// ============================================================================

/// In-memory store that counts calls and can be told to fail.
///
/// Counters only track calls made through the [`Store`] trait; `preload`
/// and `peek` bypass them so fixtures don't skew assertions.
pub struct SpyStore<K, V> {
    inner: MemoryStore<K, V>,
    gets: AtomicUsize,
    saves: AtomicUsize,
    removes: AtomicUsize,
    failures: RwLock<Failures>,
}

impl<K, V> SpyStore<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            gets: AtomicUsize::new(0),
            saves: AtomicUsize::new(0),
            removes: AtomicUsize::new(0),
            failures: RwLock::new(Failures::default()),
        }
    }

    fn update_failures(&self, f: impl FnOnce(&mut Failures)) {
        if let Ok(mut failures) = self.failures.write() {
            f(&mut failures);
        }
    }

    fn current_failures(&self) -> Failures {
        self.failures.read().map(|f| *f).unwrap_or_default()
    }

    pub fn fail_gets(&self, kind: FailureKind) {
        self.update_failures(|f| f.get = Some(kind));
    }

    pub fn fail_saves(&self, kind: FailureKind) {
        self.update_failures(|f| f.save = Some(kind));
    }

    pub fn fail_removes(&self, kind: FailureKind) {
        self.update_failures(|f| f.remove = Some(kind));
    }

    /// Stop injecting failures.
    pub fn heal(&self) {
        self.update_failures(|f| *f = Failures::default());
    }

    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn removes(&self) -> usize {
        self.removes.load(Ordering::SeqCst)
    }

    pub fn reset_counts(&self) {
        self.gets.store(0, Ordering::SeqCst);
        self.saves.store(0, Ordering::SeqCst);
        self.removes.store(0, Ordering::SeqCst);
    }

    /// Insert without counting or failure injection.
    pub async fn preload(&self, key: K, value: V) {
        // MemoryStore never fails.
        let _ = self.inner.save(&key, value).await;
    }

    /// Read without counting or failure injection.
    pub async fn peek(&self, key: &K) -> Option<V> {
        self.inner.get(key).await.ok().flatten()
    }
}

impl<K, V> Default for SpyStore<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<K, V> Store<K, V> for SpyStore<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    async fn get(&self, key: &K) -> StoreResult<Option<V>> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        if let Some(kind) = self.current_failures().get {
            return Err(kind.to_error("get"));
        }
        self.inner.get(key).await
    }

    async fn save(&self, key: &K, value: V) -> StoreResult<()> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        if let Some(kind) = self.current_failures().save {
            return Err(kind.to_error("save"));
        }
        self.inner.save(key, value).await
    }

    async fn remove(&self, key: &K) -> StoreResult<()> {
        self.removes.fetch_add(1, Ordering::SeqCst);
        if let Some(kind) = self.current_failures().remove {
            return Err(kind.to_error("remove"));
        }
        self.inner.remove(key).await
    }

    fn backend_type(&self) -> &'static str {
        "spy"
    }
}

// ============================================================================
// FAILING STORE
// ============================================================================

/// Store whose every operation fails with the configured kind.
#[derive(Debug)]
pub struct FailingStore {
    kind: FailureKind,
    attempts: AtomicUsize,
}

impl FailingStore {
    pub fn new(kind: FailureKind) -> Self {
        Self {
            kind,
            attempts: AtomicUsize::new(0),
        }
    }

    /// Number of operations attempted against this store.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    fn fail(&self, operation: &str) -> StoreError {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.kind.to_error(operation)
    }
}

#[async_trait]
impl<K, V> Store<K, V> for FailingStore
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    async fn get(&self, _key: &K) -> StoreResult<Option<V>> {
        Err(self.fail("get"))
    }

    async fn save(&self, _key: &K, _value: V) -> StoreResult<()> {
        Err(self.fail("save"))
    }

    async fn remove(&self, _key: &K) -> StoreResult<()> {
        Err(self.fail("remove"))
    }

    fn backend_type(&self) -> &'static str {
        "failing"
    }
}

// ============================================================================
// SCRIPTED SOURCE
// ============================================================================

/// Source answering from a table of scripted outcomes.
///
/// Keys with no scripted outcome fail with a [`TestFailure`]. `fail_all`
/// overrides every outcome until `recover` is called.
pub struct ScriptedSource<K, V> {
    outcomes: RwLock<HashMap<K, Result<V, TestFailure>>>,
    outage: RwLock<Option<TestFailure>>,
    calls: AtomicUsize,
    delay: Option<Duration>,
}

impl<K, V> ScriptedSource<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            outcomes: RwLock::new(HashMap::new()),
            outage: RwLock::new(None),
            calls: AtomicUsize::new(0),
            delay: None,
        }
    }

    /// Sleep for `delay` before answering each fetch.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_value(self, key: K, value: V) -> Self {
        self.set_value(key, value);
        self
    }

    pub fn with_failure(self, key: K, failure: TestFailure) -> Self {
        self.set_failure(key, failure);
        self
    }

    pub fn set_value(&self, key: K, value: V) {
        if let Ok(mut outcomes) = self.outcomes.write() {
            outcomes.insert(key, Ok(value));
        }
    }

    pub fn set_failure(&self, key: K, failure: TestFailure) {
        if let Ok(mut outcomes) = self.outcomes.write() {
            outcomes.insert(key, Err(failure));
        }
    }

    /// Fail every fetch with `failure`.
    pub fn fail_all(&self, failure: TestFailure) {
        if let Ok(mut outage) = self.outage.write() {
            *outage = Some(failure);
        }
    }

    /// End an outage started by `fail_all`.
    pub fn recover(&self) {
        if let Ok(mut outage) = self.outage.write() {
            *outage = None;
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn reset_calls(&self) {
        self.calls.store(0, Ordering::SeqCst);
    }

    fn outcome(&self, key: &K) -> Result<V, TestFailure> {
        if let Ok(outage) = self.outage.read() {
            if let Some(failure) = outage.as_ref() {
                return Err(failure.clone());
            }
        }
        self.outcomes
            .read()
            .ok()
            .and_then(|outcomes| outcomes.get(key).cloned())
            .unwrap_or_else(|| Err(TestFailure::new("no outcome scripted")))
    }
}

impl<K, V> Default for ScriptedSource<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<K, V> Source<K, V> for ScriptedSource<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    type Error = TestFailure;

    async fn fetch(&self, key: &K) -> Result<V, TestFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.outcome(key)
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

/// Serializable payload used across storage and repository tests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestValue {
    pub id: u64,
    pub name: String,
    pub tags: Vec<String>,
}

impl TestValue {
    pub fn new(id: u64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            tags: Vec::new(),
        }
    }
}

/// Install a fmt subscriber for test output, filtered by `RUST_LOG`.
/// Safe to call from every test; only the first call installs.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("cachet_storage=debug,cachet_repository=debug,warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// Current-thread runtime for driving async code from proptest bodies.
pub fn test_runtime() -> Result<tokio::runtime::Runtime, proptest::test_runner::TestCaseError> {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .map_err(|e| {
            proptest::test_runner::TestCaseError::fail(format!("Failed to create runtime: {}", e))
        })
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for CACHET keys, values, and configuration.

    use super::*;
    use proptest::prelude::*;

    /// Generate a namespaced string key.
    pub fn arb_key() -> impl Strategy<Value = String> {
        "[a-z]{1,8}:[0-9]{1,6}".prop_map(|s| s)
    }

    /// Generate a TestValue.
    pub fn arb_value() -> impl Strategy<Value = TestValue> {
        (
            any::<u64>(),
            "[a-zA-Z0-9 _-]{0,40}".prop_map(|s| s),
            prop::collection::vec("[a-z]{1,10}".prop_map(|s| s), 0..5),
        )
            .prop_map(|(id, name, tags)| TestValue { id, name, tags })
    }

    /// Generate up to `max` entries with distinct keys.
    pub fn arb_entries(max: usize) -> impl Strategy<Value = Vec<(String, TestValue)>> {
        prop::collection::hash_map(arb_key(), arb_value(), 1..max.max(2))
            .prop_map(|entries| entries.into_iter().collect())
    }

    /// Generate an injected failure.
    pub fn arb_test_failure() -> impl Strategy<Value = TestFailure> {
        "[a-z ]{1,30}".prop_map(TestFailure)
    }

    /// Generate a store failure kind.
    pub fn arb_failure_kind() -> impl Strategy<Value = FailureKind> {
        prop_oneof![Just(FailureKind::Io), Just(FailureKind::Corrupt)]
    }

    /// Generate a fetch policy.
    pub fn arb_fetch_policy() -> impl Strategy<Value = FetchPolicy> {
        prop_oneof![
            Just(FetchPolicy::CachePriority),
            Just(FetchPolicy::SourcePriority),
        ]
    }

    /// Generate a cache write failure behavior.
    pub fn arb_cache_write_failure() -> impl Strategy<Value = CacheWriteFailure> {
        prop_oneof![
            Just(CacheWriteFailure::Attach),
            Just(CacheWriteFailure::Fail),
        ]
    }

    /// Generate a TTL long enough to outlive a test case, including
    /// sub-second and fractional-second values.
    pub fn arb_live_ttl() -> impl Strategy<Value = Duration> {
        prop_oneof![
            (200..1_000u64).prop_map(Duration::from_millis),
            (1_000..10_000u64).prop_map(Duration::from_millis),
            (60..86_400u64).prop_map(Duration::from_secs),
        ]
    }

    /// Generate a memory store configuration.
    pub fn arb_memory_config() -> impl Strategy<Value = StoreConfig> {
        (1usize..32).prop_map(|shards| StoreConfig::Memory { shards })
    }
}
