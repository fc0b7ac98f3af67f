//! Provenance-carrying repository results.

use std::fmt;
use std::sync::Arc;

use cachet_core::StoreError;
use chrono::{DateTime, Utc};

/// Where a resolved value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Origin {
    /// Served from the store without contacting the source.
    Cache,
    /// Fetched from the source.
    Source,
    /// Served from the store after the source failed. The value may be
    /// out of date.
    StaleFallback,
}

impl Origin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Origin::Cache => "cache",
            Origin::Source => "source",
            Origin::StaleFallback => "stale_fallback",
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Successful repository result.
///
/// Carries the value together with where it came from and, when the value
/// was fetched but could not be written back, the cache failure.
#[derive(Debug, Clone)]
pub struct Resolved<V> {
    value: V,
    origin: Origin,
    resolved_at: DateTime<Utc>,
    cache_error: Option<Arc<StoreError>>,
}

impl<V> Resolved<V> {
    fn new(value: V, origin: Origin) -> Self {
        Self {
            value,
            origin,
            resolved_at: Utc::now(),
            cache_error: None,
        }
    }

    /// Value read from the store.
    pub fn from_cache(value: V) -> Self {
        Self::new(value, Origin::Cache)
    }

    /// Value fetched from the source.
    pub fn from_source(value: V) -> Self {
        Self::new(value, Origin::Source)
    }

    /// Value read from the store after a source failure.
    pub fn stale_fallback(value: V) -> Self {
        Self::new(value, Origin::StaleFallback)
    }

    /// Attach the failure of the best-effort cache write.
    pub fn with_cache_error(mut self, error: StoreError) -> Self {
        self.cache_error = Some(Arc::new(error));
        self
    }

    pub fn value(&self) -> &V {
        &self.value
    }

    /// Consume the wrapper and return the underlying value.
    pub fn into_value(self) -> V {
        self.value
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }

    pub fn resolved_at(&self) -> DateTime<Utc> {
        self.resolved_at
    }

    /// Failure of the cache write that followed a successful fetch.
    pub fn cache_error(&self) -> Option<&StoreError> {
        self.cache_error.as_deref()
    }

    pub fn was_cache_hit(&self) -> bool {
        self.origin == Origin::Cache
    }

    /// True when the source answered this request.
    pub fn is_fresh(&self) -> bool {
        self.origin == Origin::Source
    }

    pub fn is_stale_fallback(&self) -> bool {
        self.origin == Origin::StaleFallback
    }

    /// Map the value, keeping provenance.
    pub fn map<U>(self, f: impl FnOnce(V) -> U) -> Resolved<U> {
        Resolved {
            value: f(self.value),
            origin: self.origin,
            resolved_at: self.resolved_at,
            cache_error: self.cache_error,
        }
    }
}
