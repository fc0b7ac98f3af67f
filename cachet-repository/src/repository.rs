//! Store and source orchestration.
//!
//! A [`Repository`] pairs one store with one source and resolves requests
//! according to its [`FetchPolicy`]:
//!
//! - `CachePriority`: store first; on miss, fetch from the source and write
//!   the value back.
//! - `SourcePriority`: source first, writing successes back; on source
//!   failure, fall back to whatever the store holds.
//!
//! Cache writes after a fetch are best-effort. What happens when one fails
//! is governed by [`CacheWriteFailure`].

use std::error::Error as StdError;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use cachet_core::{CacheWriteFailure, DomainError, DomainResult, FetchPolicy, RepositoryConfig};
use cachet_storage::Store;

use crate::resolved::Resolved;
use crate::single_flight::SingleFlight;
use crate::source::Source;

/// Outcome shared between coalesced callers.
pub type SharedOutcome<V> = Result<Resolved<V>, Arc<DomainError<V>>>;

/// Registry type used to coalesce a repository's requests.
pub type RequestFlights<K, V> = SingleFlight<K, SharedOutcome<V>>;

/// Read-through repository over a store and a source.
///
/// Stateless apart from shared handles: cloning is cheap, and clones share
/// the store, the source and the single-flight registry.
///
/// # Example
///
/// ```ignore
/// let store: Arc<dyn Store<UserId, Profile>> = build_store(&config.store, Arc::new(JsonCodec))?;
/// let repo = Repository::new(store, Arc::new(ProfileApi::new(client)))
///     .with_config(config.repository);
///
/// let profile = repo.request(&user_id).await?;
/// if profile.is_stale_fallback() {
///     tracing::warn!("serving cached profile, upstream unavailable");
/// }
/// ```
pub struct Repository<K, V, S> {
    store: Arc<dyn Store<K, V>>,
    source: Arc<S>,
    config: RepositoryConfig,
    flights: Option<Arc<RequestFlights<K, V>>>,
}

impl<K, V, S> Clone for Repository<K, V, S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            source: self.source.clone(),
            config: self.config.clone(),
            flights: self.flights.clone(),
        }
    }
}

impl<K, V, S> fmt::Debug for Repository<K, V, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Repository")
            .field("store", &self.store.backend_type())
            .field("config", &self.config)
            .finish()
    }
}

impl<K, V, S> Repository<K, V, S>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + fmt::Debug + Send + Sync + 'static,
    S: Source<K, V>,
{
    /// Create a repository with the default configuration (cache priority,
    /// attach cache write failures, no request coalescing).
    pub fn new(store: Arc<dyn Store<K, V>>, source: Arc<S>) -> Self {
        Self {
            store,
            source,
            config: RepositoryConfig::default(),
            flights: None,
        }
    }

    /// Replace the configuration. Enabling single-flight creates a fresh
    /// registry; disabling it drops the current one.
    pub fn with_config(mut self, config: RepositoryConfig) -> Self {
        self.flights = match (config.single_flight, self.flights.take()) {
            (true, Some(existing)) => Some(existing),
            (true, None) => Some(Arc::new(SingleFlight::new())),
            (false, _) => None,
        };
        self.config = config;
        self
    }

    pub fn with_policy(self, policy: FetchPolicy) -> Self {
        let config = self.config.clone().with_policy(policy);
        self.with_config(config)
    }

    pub fn with_cache_write_failure(self, behavior: CacheWriteFailure) -> Self {
        let config = self.config.clone().with_cache_write_failure(behavior);
        self.with_config(config)
    }

    /// Coalesce concurrent requests through `flights`, which may be shared
    /// with other repositories over the same store and source.
    pub fn with_flights(mut self, flights: Arc<RequestFlights<K, V>>) -> Self {
        self.config.single_flight = true;
        self.flights = Some(flights);
        self
    }

    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    pub fn policy(&self) -> FetchPolicy {
        self.config.policy
    }

    pub fn store(&self) -> &Arc<dyn Store<K, V>> {
        &self.store
    }

    pub fn source(&self) -> &Arc<S> {
        &self.source
    }

    /// Resolve `key` according to the fetch policy.
    ///
    /// # Errors
    ///
    /// - `DomainError::Source` when the source fails and no fallback applies
    /// - `DomainError::Store` when the post-fetch cache write fails under
    ///   `CacheWriteFailure::Fail`; the fetched value is carried in the error
    pub async fn request(&self, key: &K) -> DomainResult<Resolved<V>, V> {
        let Some(flights) = &self.flights else {
            return self.resolve(key).await;
        };

        flights
            .run(key, || async { self.resolve(key).await.map_err(Arc::new) })
            .await
            .map_err(|shared| share_error(&shared))
    }

    /// Fetch from the source without reading or writing the store.
    pub async fn passthrough(&self, key: &K) -> DomainResult<V, V> {
        self.source
            .fetch(key)
            .await
            .map_err(DomainError::from_source)
    }

    /// Fetch from the source and overwrite the cached value, regardless of
    /// policy.
    pub async fn refresh(&self, key: &K) -> DomainResult<Resolved<V>, V> {
        let value = self.passthrough(key).await?;
        self.write_back(key, value).await
    }

    /// Remove `key` from the store.
    pub async fn invalidate(&self, key: &K) -> DomainResult<(), V> {
        self.store.remove(key).await.map_err(|e| {
            tracing::warn!(error = %e, backend = self.store.backend_type(), "Invalidation failed");
            DomainError::from_store(None, e)
        })
    }

    async fn resolve(&self, key: &K) -> DomainResult<Resolved<V>, V> {
        match self.config.policy {
            FetchPolicy::CachePriority => self.resolve_cache_first(key).await,
            FetchPolicy::SourcePriority => self.resolve_source_first(key).await,
        }
    }

    async fn resolve_cache_first(&self, key: &K) -> DomainResult<Resolved<V>, V> {
        match self.store.get(key).await {
            Ok(Some(value)) => {
                tracing::debug!(backend = self.store.backend_type(), "Cache hit");
                return Ok(Resolved::from_cache(value));
            }
            Ok(None) => {
                tracing::debug!(backend = self.store.backend_type(), "Cache miss");
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    backend = self.store.backend_type(),
                    "Store read failed, treating as miss"
                );
            }
        }

        let value = self.passthrough(key).await?;
        self.write_back(key, value).await
    }

    async fn resolve_source_first(&self, key: &K) -> DomainResult<Resolved<V>, V> {
        let failure = match self.source.fetch(key).await {
            Ok(value) => return self.write_back(key, value).await,
            Err(e) => e,
        };

        tracing::debug!(error = %failure, "Source failed, consulting store");
        match self.store.get(key).await {
            Ok(Some(value)) => {
                tracing::warn!(
                    error = %failure,
                    backend = self.store.backend_type(),
                    "Serving cached value after source failure"
                );
                Ok(Resolved::stale_fallback(value))
            }
            Ok(None) => Err(DomainError::from_source(failure)),
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    backend = self.store.backend_type(),
                    "Store fallback read failed"
                );
                Err(DomainError::from_source(failure))
            }
        }
    }

    async fn write_back(&self, key: &K, value: V) -> DomainResult<Resolved<V>, V> {
        let Err(e) = self.store.save(key, value.clone()).await else {
            tracing::debug!(backend = self.store.backend_type(), "Cached fetched value");
            return Ok(Resolved::from_source(value));
        };

        tracing::warn!(
            error = %e,
            backend = self.store.backend_type(),
            on_failure = %self.config.cache_write_failure,
            "Cache write after fetch failed"
        );
        match self.config.cache_write_failure {
            CacheWriteFailure::Attach => Ok(Resolved::from_source(value).with_cache_error(e)),
            CacheWriteFailure::Fail => Err(DomainError::from_store(Some(value), e)),
        }
    }
}

/// Shared outcome of a coalesced request, exposed as a cause.
#[derive(Debug)]
struct Coalesced<V>(Arc<DomainError<V>>);

impl<V: fmt::Debug + 'static> fmt::Display for Coalesced<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Coalesced request failed: {}", self.0)
    }
}

impl<V: fmt::Debug + 'static> StdError for Coalesced<V> {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(self.0.as_ref())
    }
}

/// Give each coalesced caller its own error of the shared error's kind,
/// with the shared error as cause.
fn share_error<V>(shared: &Arc<DomainError<V>>) -> DomainError<V>
where
    V: Clone + fmt::Debug + Send + Sync + 'static,
{
    let cause: Option<cachet_core::BoxError> = Some(Box::new(Coalesced(shared.clone())));
    match shared.as_ref() {
        DomainError::Source { detail, .. } => DomainError::Source {
            detail: detail.clone(),
            inner: cause,
        },
        DomainError::Store { value, .. } => DomainError::Store {
            value: value.clone(),
            inner: cause,
        },
        DomainError::Generic { message, .. } => DomainError::Generic {
            message: message.clone(),
            inner: cause,
        },
    }
}
