//! Upstream data sources.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Authoritative (usually remote) provider of values.
///
/// A source is consulted by a [`Repository`](crate::Repository) according to
/// its fetch policy. Its native failure type is kept as-is and attached as
/// the inner cause of the repository's `DomainError::Source`.
#[async_trait]
pub trait Source<K, V>: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Fetch the current value for `key`.
    async fn fetch(&self, key: &K) -> Result<V, Self::Error>;
}

/// Failure of a source wrapped by [`SourceExt::with_timeout`].
#[derive(Debug, Error)]
pub enum TimeoutError<E> {
    /// The deadline elapsed before the source answered.
    #[error("Source timed out after {after:?}")]
    TimedOut { after: Duration },

    /// The source answered in time with its own failure.
    #[error("Source failed before the deadline")]
    Source(#[source] E),
}

impl<E> TimeoutError<E> {
    pub fn is_timeout(&self) -> bool {
        matches!(self, TimeoutError::TimedOut { .. })
    }
}

/// Source adapter enforcing a per-fetch deadline.
#[derive(Debug, Clone)]
pub struct Timeout<S> {
    inner: S,
    after: Duration,
}

impl<S> Timeout<S> {
    pub fn new(inner: S, after: Duration) -> Self {
        Self { inner, after }
    }

    pub fn deadline(&self) -> Duration {
        self.after
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

#[async_trait]
impl<K, V, S> Source<K, V> for Timeout<S>
where
    K: Send + Sync + 'static,
    V: Send + 'static,
    S: Source<K, V>,
{
    type Error = TimeoutError<S::Error>;

    async fn fetch(&self, key: &K) -> Result<V, Self::Error> {
        match tokio::time::timeout(self.after, self.inner.fetch(key)).await {
            Ok(result) => result.map_err(TimeoutError::Source),
            Err(_) => {
                tracing::warn!(after_ms = self.after.as_millis() as u64, "Source fetch timed out");
                Err(TimeoutError::TimedOut { after: self.after })
            }
        }
    }
}

/// Combinators available on every [`Source`].
pub trait SourceExt<K, V>: Source<K, V> + Sized {
    /// Fail fetches that take longer than `after` with
    /// [`TimeoutError::TimedOut`].
    fn with_timeout(self, after: Duration) -> Timeout<Self> {
        Timeout::new(self, after)
    }
}

impl<K, V, S> SourceExt<K, V> for S where S: Source<K, V> {}
