//! Content-addressed disk cache with byte-budget LRU eviction
//!
//! Entries are stored at `{root}/{h[0:2]}/{h[2:4]}/{h}`, mirroring the remote
//! object key layout. The filesystem is the index: a file's access time is its
//! recency and its length is its size, so nothing is held in memory between
//! calls apart from hit/miss counters.

mod cache;
mod error;
mod hash;
mod types;

pub use cache::{CacheStore, DEFAULT_HEADROOM, INDEX_FILENAME};
pub use error::{CacheError, Result};
pub use hash::{ContentHash, HashError};
pub use types::{CacheStats, EvictionReport};
