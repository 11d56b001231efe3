//! In-memory caching of warmed assets.
//!
//! This module provides the `MemoryCache` that holds every asset warmed in
//! the current session, bounded by a configured capacity. Entries are
//! evicted in insertion order unless LRU is configured.

pub mod memory;

pub use memory::{CacheEntry, EvictionPolicy, MemoryCache, DEFAULT_MAX_CACHE_SIZE};
