//! Off-host object storage with a local read-through cache
//!
//! Objects are keyed by the SHA-1 of their content. Writes go to the remote
//! store first and are then seeded into the disk cache; reads are served from
//! the cache and fall back to downloading into it. The remote store is always
//! authoritative and the cache can be cleared at any time.

pub mod config;
pub mod error;
pub mod storage;

pub use config::StorageConfig;
pub use error::{Result, StorageError};
pub use storage::{HashedFileStorage, ObjectStorage};

pub use offhost_cache::{CacheStats, CacheStore, ContentHash, EvictionReport};
