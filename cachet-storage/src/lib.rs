//! CACHET Storage - Store Trait and Backends
//!
//! Defines the [`Store`] abstraction and its implementations:
//!
//! - [`MemoryStore`], [`FileStore`] and [`LmdbStore`] leaf backends
//! - [`TieredStore`], a fast tier in front of a slow tier with read-through
//!   promotion
//! - [`ExpiringStore`], a TTL layer over stores of [`ExpiringEntry`] values
//!
//! Durable backends persist bytes produced by a [`Codec`]. Stores are built
//! once, either by hand or from a [`StoreConfig`](cachet_core::StoreConfig)
//! via [`build_store`], and shared behind `Arc<dyn Store<K, V>>`.
//!
//! [`ExpiringEntry`]: cachet_core::ExpiringEntry

pub mod backend;
pub mod build;
pub mod codec;
pub mod expiring;
pub mod key_lock;
pub mod store;
pub mod tiered;

pub use backend::{FileStore, LmdbStore, MemoryStore};
pub use build::{build_configured, build_expiring_store, build_store, BuildError};
pub use codec::{Codec, JsonCodec};
pub use expiring::{reject_expired, ExpiringStore};
pub use key_lock::{KeyGuard, KeyLocks};
pub use store::Store;
pub use tiered::{PromotionFilter, TierStats, TieredStore};
