//! CACHET Repository - Cache-Aside Orchestration
//!
//! Pairs a [`Store`](cachet_storage::Store) with an upstream [`Source`] and
//! resolves requests under one of two fetch policies:
//!
//! - cache priority: serve hits from the store, fetch and cache on miss
//! - source priority: fetch first, fall back to the store when the source
//!   fails
//!
//! Results are [`Resolved`] values that record where the value came from.
//! Failures are [`DomainError`](cachet_core::DomainError)s with the store or
//! source failure attached as the inner cause.

pub mod repository;
pub mod resolved;
pub mod single_flight;
pub mod source;

pub use repository::{Repository, RequestFlights, SharedOutcome};
pub use resolved::{Origin, Resolved};
pub use single_flight::SingleFlight;
pub use source::{Source, SourceExt, Timeout, TimeoutError};

// Re-exported so callers can configure a repository without naming
// cachet-core directly.
pub use cachet_core::{CacheWriteFailure, DomainError, DomainErrorKind, FetchPolicy, RepositoryConfig};
