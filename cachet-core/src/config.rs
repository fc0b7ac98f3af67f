//! Configuration types
//!
//! Plain data describing how stores and repositories are assembled. Values
//! deserialize with serde (durations as whole milliseconds) and can be loaded from
//! `CACHET_*` environment variables with sensible development defaults.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Default number of independently locked shards in a memory store.
pub const DEFAULT_MEMORY_SHARDS: usize = 16;

/// Default LMDB map size in megabytes.
pub const DEFAULT_LMDB_MAX_SIZE_MB: usize = 256;

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    fn invalid(field: &str, value: impl fmt::Display, reason: &str) -> Self {
        ConfigError::InvalidValue {
            field: field.to_string(),
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}

// ============================================================================
// REPOSITORY POLICY
// ============================================================================

/// Which side a repository consults first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchPolicy {
    /// Store is truth: serve from the store, fetch from the source on miss.
    #[default]
    CachePriority,
    /// Source is truth: fetch first, fall back to the store on failure.
    SourcePriority,
}

impl FetchPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchPolicy::CachePriority => "cache_priority",
            FetchPolicy::SourcePriority => "source_priority",
        }
    }
}

impl fmt::Display for FetchPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FetchPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "cache_priority" | "cache" => Ok(FetchPolicy::CachePriority),
            "source_priority" | "source" => Ok(FetchPolicy::SourcePriority),
            _ => Err(ConfigError::invalid(
                "policy",
                s,
                "expected cache_priority or source_priority",
            )),
        }
    }
}

/// What a repository does when caching a freshly fetched value fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheWriteFailure {
    /// Return the fetched value with the store error attached.
    #[default]
    Attach,
    /// Return `DomainError::Store` carrying the fetched value.
    Fail,
}

impl CacheWriteFailure {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheWriteFailure::Attach => "attach",
            CacheWriteFailure::Fail => "fail",
        }
    }
}

impl fmt::Display for CacheWriteFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CacheWriteFailure {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "attach" => Ok(CacheWriteFailure::Attach),
            "fail" => Ok(CacheWriteFailure::Fail),
            _ => Err(ConfigError::invalid(
                "cache_write_failure",
                s,
                "expected attach or fail",
            )),
        }
    }
}

/// Repository construction options.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RepositoryConfig {
    #[serde(default)]
    pub policy: FetchPolicy,
    #[serde(default)]
    pub cache_write_failure: CacheWriteFailure,
    /// Coalesce concurrent requests for the same key.
    #[serde(default)]
    pub single_flight: bool,
}

impl RepositoryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(mut self, policy: FetchPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_cache_write_failure(mut self, behavior: CacheWriteFailure) -> Self {
        self.cache_write_failure = behavior;
        self
    }

    pub fn with_single_flight(mut self, enabled: bool) -> Self {
        self.single_flight = enabled;
        self
    }
}

// ============================================================================
// STORE CONFIGURATION
// ============================================================================

fn default_memory_shards() -> usize {
    DEFAULT_MEMORY_SHARDS
}

fn default_lmdb_max_size_mb() -> usize {
    DEFAULT_LMDB_MAX_SIZE_MB
}

/// Store backend configuration. Tiered configs nest to any depth.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StoreConfig {
    /// Volatile in-process store.
    Memory {
        #[serde(default = "default_memory_shards")]
        shards: usize,
    },
    /// One record file per key under `root`.
    File { root: PathBuf },
    /// LMDB environment at `path`.
    Lmdb {
        path: PathBuf,
        #[serde(default = "default_lmdb_max_size_mb")]
        max_size_mb: usize,
    },
    /// Fast tier in front of a slow tier.
    Tiered {
        fast: Box<StoreConfig>,
        slow: Box<StoreConfig>,
    },
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig::memory()
    }
}

impl StoreConfig {
    pub fn memory() -> Self {
        StoreConfig::Memory {
            shards: DEFAULT_MEMORY_SHARDS,
        }
    }

    pub fn file(root: impl Into<PathBuf>) -> Self {
        StoreConfig::File { root: root.into() }
    }

    pub fn lmdb(path: impl Into<PathBuf>, max_size_mb: usize) -> Self {
        StoreConfig::Lmdb {
            path: path.into(),
            max_size_mb,
        }
    }

    pub fn tiered(fast: StoreConfig, slow: StoreConfig) -> Self {
        StoreConfig::Tiered {
            fast: Box::new(fast),
            slow: Box::new(slow),
        }
    }

    /// Backend name as used in logs.
    pub fn backend_type(&self) -> &'static str {
        match self {
            StoreConfig::Memory { .. } => "memory",
            StoreConfig::File { .. } => "file",
            StoreConfig::Lmdb { .. } => "lmdb",
            StoreConfig::Tiered { .. } => "tiered",
        }
    }

    /// Number of leaf stores this config assembles.
    pub fn leaf_count(&self) -> usize {
        match self {
            StoreConfig::Tiered { fast, slow } => fast.leaf_count() + slow.leaf_count(),
            _ => 1,
        }
    }

    /// Check every level of the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self {
            StoreConfig::Memory { shards } => {
                if *shards == 0 {
                    return Err(ConfigError::invalid("shards", shards, "must be at least 1"));
                }
                Ok(())
            }
            StoreConfig::File { root } => {
                if root.as_os_str().is_empty() {
                    return Err(ConfigError::invalid("root", "<empty>", "path required"));
                }
                Ok(())
            }
            StoreConfig::Lmdb { path, max_size_mb } => {
                if path.as_os_str().is_empty() {
                    return Err(ConfigError::invalid("path", "<empty>", "path required"));
                }
                if *max_size_mb == 0 {
                    return Err(ConfigError::invalid(
                        "max_size_mb",
                        max_size_mb,
                        "must be at least 1",
                    ));
                }
                Ok(())
            }
            StoreConfig::Tiered { fast, slow } => {
                fast.validate()?;
                slow.validate()
            }
        }
    }
}

/// TTL applied by an expiring store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TtlConfig {
    /// Entry lifetime in milliseconds. `None` disables expiry.
    #[serde(default)]
    pub ttl_ms: Option<u64>,
}

impl TtlConfig {
    /// TTL kept at millisecond precision. A non-zero TTL shorter than a
    /// millisecond rounds up to one, never down to zero.
    pub fn new(ttl: Option<Duration>) -> Self {
        Self {
            ttl_ms: ttl.map(whole_millis_ceil),
        }
    }

    pub fn from_millis(ttl_ms: u64) -> Self {
        Self {
            ttl_ms: Some(ttl_ms),
        }
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl_ms.map(Duration::from_millis)
    }
}

fn whole_millis_ceil(ttl: Duration) -> u64 {
    let millis = ttl.as_millis();
    let millis = if ttl.subsec_nanos() % 1_000_000 != 0 {
        millis + 1
    } else {
        millis
    };
    u64::try_from(millis).unwrap_or(u64::MAX)
}

// ============================================================================
// MASTER CONFIGURATION
// ============================================================================

/// Everything needed to assemble a store and a repository over it.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CachetConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub ttl: TtlConfig,
    #[serde(default)]
    pub repository: RepositoryConfig,
}

impl CachetConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_store(mut self, store: StoreConfig) -> Self {
        self.store = store;
        self
    }

    pub fn with_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.ttl = TtlConfig::new(ttl);
        self
    }

    pub fn with_repository(mut self, repository: RepositoryConfig) -> Self {
        self.repository = repository;
        self
    }

    /// Create a CachetConfig from environment variables.
    ///
    /// Environment variables:
    /// - `CACHET_STORE_ROOT`: directory for a file store behind a memory tier
    /// - `CACHET_LMDB_PATH`: LMDB directory behind a memory tier (used when
    ///   `CACHET_STORE_ROOT` is unset)
    /// - `CACHET_LMDB_MAX_SIZE_MB`: LMDB map size (default: 256)
    /// - `CACHET_TTL_MS`: entry lifetime in milliseconds (default: no expiry)
    /// - `CACHET_TTL_SECS`: entry lifetime in seconds, used when
    ///   `CACHET_TTL_MS` is unset
    /// - `CACHET_FETCH_POLICY`: `cache_priority` or `source_priority`
    /// - `CACHET_CACHE_WRITE_FAILURE`: `attach` or `fail`
    /// - `CACHET_SINGLE_FLIGHT`: "true" or "false" (default: false)
    ///
    /// Unparseable values fall back to the defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`CachetConfig::from_env`] with an injectable variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let lmdb_max_size_mb = lookup("CACHET_LMDB_MAX_SIZE_MB")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_LMDB_MAX_SIZE_MB);

        let store = if let Some(root) = lookup("CACHET_STORE_ROOT").filter(|s| !s.is_empty()) {
            StoreConfig::tiered(StoreConfig::memory(), StoreConfig::file(root))
        } else if let Some(path) = lookup("CACHET_LMDB_PATH").filter(|s| !s.is_empty()) {
            StoreConfig::tiered(
                StoreConfig::memory(),
                StoreConfig::lmdb(path, lmdb_max_size_mb),
            )
        } else {
            StoreConfig::memory()
        };

        let ttl = TtlConfig {
            ttl_ms: lookup("CACHET_TTL_MS")
                .and_then(|s| s.parse().ok())
                .or_else(|| {
                    lookup("CACHET_TTL_SECS")
                        .and_then(|s| s.parse::<u64>().ok())
                        .map(|secs| secs.saturating_mul(1000))
                }),
        };

        let policy = lookup("CACHET_FETCH_POLICY")
            .and_then(|s| s.parse().ok())
            .unwrap_or_default();

        let cache_write_failure = lookup("CACHET_CACHE_WRITE_FAILURE")
            .and_then(|s| s.parse().ok())
            .unwrap_or_default();

        let single_flight = lookup("CACHET_SINGLE_FLIGHT")
            .map(|s| s.to_lowercase() == "true")
            .unwrap_or(false);

        Self {
            store,
            ttl,
            repository: RepositoryConfig {
                policy,
                cache_write_failure,
                single_flight,
            },
        }
    }
}
