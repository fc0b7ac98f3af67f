//! Error types for CACHET operations
//!
//! Every error crossing a component boundary is re-expressed as that
//! component's own kind with the lower-layer error attached as `inner`.
//! The `inner` cause is exposed through [`std::error::Error::source`], so the
//! whole chain can be walked with [`ErrorChain`].

use std::error::Error as StdError;
use std::fmt;

use thiserror::Error;

/// Boxed inner cause carried by every error node.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Position of a constituent store inside a tiered store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    /// The fast (L1) tier.
    Fast,
    /// The slow (L2) tier.
    Slow,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Fast => "fast",
            Tier::Slow => "slow",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Store layer errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A read or write against the backing medium produced unreadable or
    /// malformed data.
    #[error("Corrupt record: {}", .detail.as_deref().unwrap_or("unreadable data"))]
    Corrupt {
        detail: Option<String>,
        #[source]
        inner: Option<BoxError>,
    },

    /// The backing medium itself failed (permission, connectivity, disk).
    #[error("Store I/O failure: {}", .detail.as_deref().unwrap_or("backing medium unavailable"))]
    Io {
        detail: Option<String>,
        #[source]
        inner: Option<BoxError>,
    },

    /// A constituent tier of a composite store failed.
    #[error("Tier {tier} failed")]
    Tier {
        tier: Tier,
        #[source]
        inner: Box<StoreError>,
    },
}

impl StoreError {
    /// Corrupt record with the codec (or lookup) failure as inner cause.
    pub fn corrupt(inner: impl Into<BoxError>) -> Self {
        StoreError::Corrupt {
            detail: None,
            inner: Some(inner.into()),
        }
    }

    /// Backing medium failure with the native error as inner cause.
    pub fn io(inner: impl Into<BoxError>) -> Self {
        StoreError::Io {
            detail: None,
            inner: Some(inner.into()),
        }
    }

    /// Wrap a constituent store's failure.
    pub fn tier(tier: Tier, inner: StoreError) -> Self {
        StoreError::Tier {
            tier,
            inner: Box::new(inner),
        }
    }

    /// Attach a structured detail message. No-op for `Tier`.
    pub fn with_detail(mut self, message: impl Into<String>) -> Self {
        match &mut self {
            StoreError::Corrupt { detail, .. } | StoreError::Io { detail, .. } => {
                *detail = Some(message.into());
            }
            StoreError::Tier { .. } => {}
        }
        self
    }

    /// Returns true if this error (or the tier error it wraps) is corruption.
    pub fn is_corrupt(&self) -> bool {
        match self {
            StoreError::Corrupt { .. } => true,
            StoreError::Io { .. } => false,
            StoreError::Tier { inner, .. } => inner.is_corrupt(),
        }
    }

    /// The tier that failed, if this is a composite store error.
    pub fn failed_tier(&self) -> Option<Tier> {
        match self {
            StoreError::Tier { tier, .. } => Some(*tier),
            _ => None,
        }
    }
}

/// Discriminant of a [`DomainError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DomainErrorKind {
    Source,
    Store,
    Generic,
}

/// Errors surfaced by a repository (a Store and Source pairing).
///
/// `V` is the repository's value type, so a failed cache write can hand
/// back the payload that was already fetched.
#[derive(Debug, Error)]
pub enum DomainError<V> {
    /// The upstream source failed; `inner` carries its native failure.
    #[error("Source request failed: {}", .detail.as_deref().unwrap_or("upstream error"))]
    Source {
        detail: Option<String>,
        #[source]
        inner: Option<BoxError>,
    },

    /// A cache operation failed. After a successful fetch `value` holds the
    /// fetched payload.
    #[error("Cache store operation failed")]
    Store {
        value: Option<V>,
        #[source]
        inner: Option<BoxError>,
    },

    /// Condition not covered by the other kinds.
    #[error("{message}")]
    Generic {
        message: String,
        #[source]
        inner: Option<BoxError>,
    },
}

impl<V> DomainError<V> {
    /// Wrap an upstream source failure.
    pub fn from_source(inner: impl Into<BoxError>) -> Self {
        DomainError::Source {
            detail: None,
            inner: Some(inner.into()),
        }
    }

    /// Wrap a cache failure, optionally carrying the already-fetched value.
    pub fn from_store(value: Option<V>, inner: impl Into<BoxError>) -> Self {
        DomainError::Store {
            value,
            inner: Some(inner.into()),
        }
    }

    /// Generic failure with an optional cause.
    pub fn generic(message: impl Into<String>, inner: Option<BoxError>) -> Self {
        DomainError::Generic {
            message: message.into(),
            inner,
        }
    }

    pub fn kind(&self) -> DomainErrorKind {
        match self {
            DomainError::Source { .. } => DomainErrorKind::Source,
            DomainError::Store { .. } => DomainErrorKind::Store,
            DomainError::Generic { .. } => DomainErrorKind::Generic,
        }
    }

    /// The directly wrapped cause, if any.
    pub fn inner(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        match self {
            DomainError::Source { inner, .. }
            | DomainError::Store { inner, .. }
            | DomainError::Generic { inner, .. } => inner.as_deref(),
        }
    }

    /// Take the payload carried by a `Store` error.
    pub fn into_value(self) -> Option<V> {
        match self {
            DomainError::Store { value, .. } => value,
            _ => None,
        }
    }

    /// Convert the carried payload, keeping kind and cause.
    pub fn map_value<U>(self, f: impl FnOnce(V) -> U) -> DomainError<U> {
        match self {
            DomainError::Source { detail, inner } => DomainError::Source { detail, inner },
            DomainError::Store { value, inner } => DomainError::Store {
                value: value.map(f),
                inner,
            },
            DomainError::Generic { message, inner } => DomainError::Generic { message, inner },
        }
    }
}

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Result type alias for repository operations.
pub type DomainResult<T, V> = Result<T, DomainError<V>>;

// ============================================================================
// CAUSE CHAIN WALKING
// ============================================================================

/// Iterator over an error and its causes, outermost first.
#[derive(Clone)]
pub struct Chain<'a> {
    next: Option<&'a (dyn StdError + 'static)>,
}

impl<'a> Chain<'a> {
    pub fn new(head: &'a (dyn StdError + 'static)) -> Self {
        Self { next: Some(head) }
    }
}

impl<'a> Iterator for Chain<'a> {
    type Item = &'a (dyn StdError + 'static);

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = current.source();
        Some(current)
    }
}

/// Explicit, finite walk over a cause chain.
pub trait ErrorChain {
    /// The error at the head of the chain.
    fn head(&self) -> &(dyn StdError + 'static);

    /// The error itself followed by each `source()` in turn.
    fn chain(&self) -> Chain<'_> {
        Chain::new(self.head())
    }

    /// The innermost cause (the error itself when it wraps nothing).
    fn root_cause(&self) -> &(dyn StdError + 'static) {
        let mut err = self.head();
        while let Some(next) = err.source() {
            err = next;
        }
        err
    }

    /// First error in the chain whose concrete type is `T`.
    fn find_cause<T: StdError + 'static>(&self) -> Option<&T> {
        self.chain().find_map(|err| err.downcast_ref::<T>())
    }

    /// Number of nodes in the chain, including the head.
    fn depth(&self) -> usize {
        self.chain().count()
    }
}

impl<E: StdError + 'static> ErrorChain for E {
    fn head(&self) -> &(dyn StdError + 'static) {
        self
    }
}

impl ErrorChain for dyn StdError + Send + Sync + 'static {
    fn head(&self) -> &(dyn StdError + 'static) {
        self
    }
}

// =============================================================================
// TESTS
// =============================================================================
