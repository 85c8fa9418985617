//! Cache Module
//!
//! In-memory result cache with TTL expiration and LRU eviction, the async
//! backend seam the caching decorator talks to, key derivation and
//! single-flight coalescing.

mod backend;
mod entry;
mod flight;
mod key;
mod lru;
mod stats;
mod store;


// Re-export public types
pub use backend::{CacheBackend, MemoryCache};
pub use entry::CacheEntry;
pub use flight::SingleFlight;
pub use key::CacheKeys;
pub use lru::LruTracker;
pub use stats::CacheStats;
pub use store::CacheStore;

// == Public Constants ==
/// Maximum allowed key length in bytes
pub const MAX_KEY_LENGTH: usize = 256;

/// Maximum allowed value size in bytes
pub const MAX_VALUE_SIZE: usize = 8 * 1024 * 1024; // 8 MB
