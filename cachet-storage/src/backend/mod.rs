//! Leaf store backends.
//!
//! - [`MemoryStore`]: volatile, lock-striped hash maps
//! - [`FileStore`]: durable, one record file per key
//! - [`LmdbStore`]: durable, single memory-mapped LMDB database

pub mod file;
pub mod lmdb;
pub mod memory;

pub use file::FileStore;
pub use lmdb::LmdbStore;
pub use memory::MemoryStore;
