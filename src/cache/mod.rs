//! Read-through TTL cache with hit/miss statistics and store persistence.

pub mod manager;

pub use manager::{CacheEntry, CacheManager, CacheStats};
