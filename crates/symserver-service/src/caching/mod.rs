//! The symcache caching infrastructure.
//!
//! Lookups go through two layers: a process-wide single-flight registry that
//! coalesces concurrent requests for the same module into one computation
//! ([`cacher`]), and a size-bounded on-disk store of symcache blobs with LRU
//! eviction and crash-safe publication ([`disk`]).

mod cache_error;
mod cache_key;
mod cacher;
mod disk;

pub use cache_error::{CacheContents, CacheError};
pub use cache_key::CacheKey;
pub use cacher::{FetchedSymCache, SymCacheProvider};
pub use disk::{CacheLease, DiskCache, GetOutcome};
