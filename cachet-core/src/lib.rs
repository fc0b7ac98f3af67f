//! CACHET Core - Shared Types
//!
//! Pure data types with no I/O. The storage and repository crates depend on
//! this one for the chained error model, expiring entries, stable record
//! identifiers and configuration.

pub mod config;
pub mod entry;
pub mod error;
pub mod key;

pub use config::{
    CacheWriteFailure, CachetConfig, ConfigError, FetchPolicy, RepositoryConfig, StoreConfig,
    TtlConfig, DEFAULT_LMDB_MAX_SIZE_MB, DEFAULT_MEMORY_SHARDS,
};
pub use entry::ExpiringEntry;
pub use error::{
    BoxError, Chain, DomainError, DomainErrorKind, DomainResult, ErrorChain, StoreError,
    StoreResult, Tier,
};
pub use key::RecordId;
