//! Two-level composite store.
//!
//! Implements a CPU cache-inspired hierarchy over any two stores:
//! - fast: small or volatile tier checked first
//! - slow: authoritative (usually durable) tier
//!
//! Access pattern:
//! 1. Check fast first
//! 2. On fast miss, check slow
//! 3. On slow hit, promote into fast
//!
//! Promotion is advisory. A failed promotion is logged and the read still
//! succeeds with the slow tier's value. A failed fast-tier read is logged
//! and answered from the slow tier, unless the store was built with
//! [`TieredStore::with_strict_fast_reads`].

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use cachet_core::{StoreError, StoreResult, Tier};

use crate::store::Store;

/// Predicate deciding whether a value read from the slow tier may be
/// copied into the fast tier.
pub type PromotionFilter<V> = Arc<dyn Fn(&V) -> bool + Send + Sync>;

/// Snapshot of tiered store counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TierStats {
    /// Reads answered by the fast tier.
    pub fast_hits: u64,
    /// Reads answered by the slow tier.
    pub slow_hits: u64,
    /// Reads absent from both tiers.
    pub misses: u64,
    /// Successful slow to fast copies.
    pub promotions: u64,
    /// Promotions attempted and failed.
    pub failed_promotions: u64,
    /// Fast-tier reads that failed and fell through to the slow tier.
    pub fast_read_failures: u64,
}

impl TierStats {
    /// Fraction of reads answered by either tier.
    pub fn hit_rate(&self) -> f64 {
        let total = self.fast_hits + self.slow_hits + self.misses;
        if total == 0 {
            return 0.0;
        }
        (self.fast_hits + self.slow_hits) as f64 / total as f64
    }

    /// Fraction of hits answered by the fast tier.
    pub fn fast_hit_rate(&self) -> f64 {
        let hits = self.fast_hits + self.slow_hits;
        if hits == 0 {
            return 0.0;
        }
        self.fast_hits as f64 / hits as f64
    }
}

#[derive(Default)]
struct TierCounters {
    fast_hits: AtomicU64,
    slow_hits: AtomicU64,
    misses: AtomicU64,
    promotions: AtomicU64,
    failed_promotions: AtomicU64,
    fast_read_failures: AtomicU64,
}

impl TierCounters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> TierStats {
        TierStats {
            fast_hits: self.fast_hits.load(Ordering::Relaxed),
            slow_hits: self.slow_hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            promotions: self.promotions.load(Ordering::Relaxed),
            failed_promotions: self.failed_promotions.load(Ordering::Relaxed),
            fast_read_failures: self.fast_read_failures.load(Ordering::Relaxed),
        }
    }
}

/// Store composed of a fast and a slow tier.
///
/// # Write ordering
///
/// `save` writes fast first, then slow. If fast fails, slow is never
/// touched. If fast succeeds and slow fails, the slow error is returned and
/// fast keeps the new value; the two tiers converge on the next successful
/// save or remove.
///
/// `remove` goes slow first, then fast, so a failed removal never leaves a
/// value behind in slow that a later read would promote back.
///
/// # Example
///
/// ```ignore
/// let fast: Arc<dyn Store<String, Profile>> = Arc::new(MemoryStore::new());
/// let slow: Arc<dyn Store<String, Profile>> = Arc::new(FileStore::open(root, codec)?);
/// let store = TieredStore::new(fast, slow);
/// ```
pub struct TieredStore<K, V> {
    fast: Arc<dyn Store<K, V>>,
    slow: Arc<dyn Store<K, V>>,
    promote_if: Option<PromotionFilter<V>>,
    strict_fast_reads: bool,
    counters: TierCounters,
}

impl<K, V> TieredStore<K, V> {
    pub fn new(fast: Arc<dyn Store<K, V>>, slow: Arc<dyn Store<K, V>>) -> Self {
        Self {
            fast,
            slow,
            promote_if: None,
            strict_fast_reads: false,
            counters: TierCounters::default(),
        }
    }

    /// Only promote slow-tier values for which `filter` returns true.
    /// Rejected values are still returned to the caller.
    pub fn with_promotion_filter(
        mut self,
        filter: impl Fn(&V) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.promote_if = Some(Arc::new(filter));
        self
    }

    /// Fail reads whose fast-tier lookup fails instead of answering them
    /// from the slow tier.
    pub fn with_strict_fast_reads(mut self) -> Self {
        self.strict_fast_reads = true;
        self
    }

    pub(crate) fn with_shared_filter(mut self, filter: Option<PromotionFilter<V>>) -> Self {
        self.promote_if = filter;
        self
    }

    pub fn fast(&self) -> &Arc<dyn Store<K, V>> {
        &self.fast
    }

    pub fn slow(&self) -> &Arc<dyn Store<K, V>> {
        &self.slow
    }

    pub fn stats(&self) -> TierStats {
        self.counters.snapshot()
    }

    fn should_promote(&self, value: &V) -> bool {
        self.promote_if.as_ref().map_or(true, |filter| filter(value))
    }
}

impl<K, V> fmt::Debug for TieredStore<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TieredStore")
            .field("fast", &self.fast.backend_type())
            .field("slow", &self.slow.backend_type())
            .field("filtered", &self.promote_if.is_some())
            .field("strict_fast_reads", &self.strict_fast_reads)
            .field("stats", &self.stats())
            .finish()
    }
}

#[async_trait]
impl<K, V> Store<K, V> for TieredStore<K, V>
where
    K: Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    async fn get(&self, key: &K) -> StoreResult<Option<V>> {
        match self.fast.get(key).await {
            Ok(Some(value)) => {
                TierCounters::bump(&self.counters.fast_hits);
                tracing::trace!(tier = %Tier::Fast, backend = self.fast.backend_type(), "Tier hit");
                return Ok(Some(value));
            }
            Ok(None) => {}
            Err(e) if self.strict_fast_reads => return Err(StoreError::tier(Tier::Fast, e)),
            Err(e) => {
                TierCounters::bump(&self.counters.fast_read_failures);
                tracing::warn!(
                    error = %e,
                    backend = self.fast.backend_type(),
                    "Fast tier read failed, falling back to slow tier"
                );
            }
        }

        let Some(value) = self
            .slow
            .get(key)
            .await
            .map_err(|e| StoreError::tier(Tier::Slow, e))?
        else {
            TierCounters::bump(&self.counters.misses);
            return Ok(None);
        };

        TierCounters::bump(&self.counters.slow_hits);
        if !self.should_promote(&value) {
            tracing::debug!(
                backend = self.slow.backend_type(),
                "Slow tier value rejected for promotion"
            );
            return Ok(Some(value));
        }

        match self.fast.save(key, value.clone()).await {
            Ok(()) => {
                TierCounters::bump(&self.counters.promotions);
                tracing::debug!(
                    from = self.slow.backend_type(),
                    to = self.fast.backend_type(),
                    "Promoted value into fast tier"
                );
            }
            Err(e) => {
                TierCounters::bump(&self.counters.failed_promotions);
                tracing::warn!(
                    error = %e,
                    backend = self.fast.backend_type(),
                    "Promotion into fast tier failed"
                );
            }
        }
        Ok(Some(value))
    }

    async fn save(&self, key: &K, value: V) -> StoreResult<()> {
        self.fast
            .save(key, value.clone())
            .await
            .map_err(|e| StoreError::tier(Tier::Fast, e))?;
        self.slow
            .save(key, value)
            .await
            .map_err(|e| StoreError::tier(Tier::Slow, e))
    }

    async fn remove(&self, key: &K) -> StoreResult<()> {
        self.slow
            .remove(key)
            .await
            .map_err(|e| StoreError::tier(Tier::Slow, e))?;
        self.fast
            .remove(key)
            .await
            .map_err(|e| StoreError::tier(Tier::Fast, e))
    }

    fn backend_type(&self) -> &'static str {
        "tiered"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryStore;
    use cachet_core::ErrorChain;
    use std::sync::atomic::AtomicBool;

    /// Memory store that can be switched into failing mode.
    #[derive(Default)]
    struct Flaky {
        inner: MemoryStore<u32, String>,
        fail_reads: AtomicBool,
        fail_writes: AtomicBool,
        saves: AtomicU64,
    }

    #[derive(Debug, thiserror::Error)]
    #[error("flaky medium")]
    struct FlakyMedium;

    #[async_trait]
    impl Store<u32, String> for Flaky {
        async fn get(&self, key: &u32) -> StoreResult<Option<String>> {
            if self.fail_reads.load(Ordering::SeqCst) {
                return Err(StoreError::io(FlakyMedium));
            }
            self.inner.get(key).await
        }

        async fn save(&self, key: &u32, value: String) -> StoreResult<()> {
            self.saves.fetch_add(1, Ordering::SeqCst);
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(StoreError::io(FlakyMedium));
            }
            self.inner.save(key, value).await
        }

        async fn remove(&self, key: &u32) -> StoreResult<()> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(StoreError::io(FlakyMedium));
            }
            self.inner.remove(key).await
        }

        fn backend_type(&self) -> &'static str {
            "flaky"
        }
    }

    fn tiers() -> (Arc<Flaky>, Arc<Flaky>, TieredStore<u32, String>) {
        let fast = Arc::new(Flaky::default());
        let slow = Arc::new(Flaky::default());
        let tiered = TieredStore::<u32, String>::new(fast.clone(), slow.clone());
        (fast, slow, tiered)
    }

    #[tokio::test]
    async fn test_slow_hit_is_promoted() {
        let (fast, slow, tiered) = tiers();
        slow.inner.save(&1, "one".to_string()).await.unwrap();

        assert_eq!(tiered.get(&1).await.unwrap().as_deref(), Some("one"));
        assert_eq!(fast.inner.get(&1).await.unwrap().as_deref(), Some("one"));

        let stats = tiered.stats();
        assert_eq!(stats.slow_hits, 1);
        assert_eq!(stats.promotions, 1);

        tiered.get(&1).await.unwrap();
        assert_eq!(tiered.stats().fast_hits, 1);
    }

    #[tokio::test]
    async fn test_miss_in_both_tiers() {
        let (_fast, _slow, tiered) = tiers();
        assert_eq!(tiered.get(&9).await.unwrap(), None);
        assert_eq!(tiered.stats().misses, 1);
    }

    #[tokio::test]
    async fn test_failed_promotion_still_returns_value() {
        let (fast, slow, tiered) = tiers();
        slow.inner.save(&2, "two".to_string()).await.unwrap();
        fast.fail_writes.store(true, Ordering::SeqCst);

        assert_eq!(tiered.get(&2).await.unwrap().as_deref(), Some("two"));
        assert_eq!(tiered.stats().failed_promotions, 1);
    }

    #[tokio::test]
    async fn test_promotion_filter_vetoes_copy() {
        let fast = Arc::new(Flaky::default());
        let slow = Arc::new(Flaky::default());
        let tiered = TieredStore::<u32, String>::new(fast.clone(), slow.clone())
            .with_promotion_filter(|value: &String| !value.starts_with("stale"));

        slow.inner.save(&3, "stale-three".to_string()).await.unwrap();
        assert_eq!(tiered.get(&3).await.unwrap().as_deref(), Some("stale-three"));
        assert_eq!(fast.inner.get(&3).await.unwrap(), None);
        assert_eq!(fast.saves.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_fast_write_failure_skips_slow() {
        let (fast, slow, tiered) = tiers();
        fast.fail_writes.store(true, Ordering::SeqCst);

        let err = tiered.save(&4, "four".to_string()).await.unwrap_err();
        assert_eq!(err.failed_tier(), Some(Tier::Fast));
        assert_eq!(slow.saves.load(Ordering::SeqCst), 0);
        assert!(err.find_cause::<FlakyMedium>().is_some());
    }

    #[tokio::test]
    async fn test_slow_write_failure_leaves_fast_updated() {
        let (fast, slow, tiered) = tiers();
        slow.fail_writes.store(true, Ordering::SeqCst);

        let err = tiered.save(&5, "five".to_string()).await.unwrap_err();
        assert_eq!(err.failed_tier(), Some(Tier::Slow));
        assert_eq!(fast.inner.get(&5).await.unwrap().as_deref(), Some("five"));
    }

    #[tokio::test]
    async fn test_read_failure_is_wrapped_with_tier() {
        let (_fast, slow, tiered) = tiers();
        slow.fail_reads.store(true, Ordering::SeqCst);

        let err = tiered.get(&6).await.unwrap_err();
        assert_eq!(err.failed_tier(), Some(Tier::Slow));
        assert_eq!(err.depth(), 3);
    }

    #[tokio::test]
    async fn test_fast_read_failure_falls_back_to_slow() {
        let (fast, slow, tiered) = tiers();
        slow.inner.save(&11, "eleven".to_string()).await.unwrap();
        fast.fail_reads.store(true, Ordering::SeqCst);

        assert_eq!(tiered.get(&11).await.unwrap().as_deref(), Some("eleven"));
        let stats = tiered.stats();
        assert_eq!(stats.fast_read_failures, 1);
        assert_eq!(stats.slow_hits, 1);
    }

    #[tokio::test]
    async fn test_strict_fast_reads_surface_failure() {
        let fast = Arc::new(Flaky::default());
        let slow = Arc::new(Flaky::default());
        let tiered =
            TieredStore::<u32, String>::new(fast.clone(), slow.clone()).with_strict_fast_reads();
        slow.inner.save(&12, "twelve".to_string()).await.unwrap();
        fast.fail_reads.store(true, Ordering::SeqCst);

        let err = tiered.get(&12).await.unwrap_err();
        assert_eq!(err.failed_tier(), Some(Tier::Fast));
        assert!(err.find_cause::<FlakyMedium>().is_some());
    }

    #[tokio::test]
    async fn test_remove_clears_both_tiers() {
        let (fast, slow, tiered) = tiers();
        tiered.save(&7, "seven".to_string()).await.unwrap();
        tiered.remove(&7).await.unwrap();
        assert_eq!(fast.inner.get(&7).await.unwrap(), None);
        assert_eq!(slow.inner.get(&7).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_remove_failure_in_slow_keeps_fast() {
        let (fast, slow, tiered) = tiers();
        tiered.save(&8, "eight".to_string()).await.unwrap();
        slow.fail_writes.store(true, Ordering::SeqCst);

        let err = tiered.remove(&8).await.unwrap_err();
        assert_eq!(err.failed_tier(), Some(Tier::Slow));
        assert_eq!(fast.inner.get(&8).await.unwrap().as_deref(), Some("eight"));
    }

    #[tokio::test]
    async fn test_nested_tiers() {
        let l1: Arc<dyn Store<u32, String>> = Arc::new(MemoryStore::new());
        let l2: Arc<dyn Store<u32, String>> = Arc::new(MemoryStore::new());
        let l3 = Arc::new(MemoryStore::<u32, String>::new());

        let lower: Arc<dyn Store<u32, String>> =
            Arc::new(TieredStore::<u32, String>::new(l2.clone(), l3.clone()));
        let top = TieredStore::new(l1.clone(), lower);

        l3.save(&10, "ten".to_string()).await.unwrap();
        assert_eq!(top.get(&10).await.unwrap().as_deref(), Some("ten"));
        assert_eq!(l2.get(&10).await.unwrap().as_deref(), Some("ten"));
        assert_eq!(l1.get(&10).await.unwrap().as_deref(), Some("ten"));
    }

    #[test]
    fn test_hit_rates() {
        let stats = TierStats {
            fast_hits: 3,
            slow_hits: 1,
            misses: 4,
            ..Default::default()
        };
        assert!((stats.hit_rate() - 0.5).abs() < f64::EPSILON);
        assert!((stats.fast_hit_rate() - 0.75).abs() < f64::EPSILON);
        assert_eq!(TierStats::default().hit_rate(), 0.0);
    }
}
