use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::asset::AssetHandle;

/// Default number of warmed assets kept in memory.
/// 50 covers a typical gallery page plus its thumbnails.
pub const DEFAULT_MAX_CACHE_SIZE: usize = 50;

/// Which entry is evicted when the cache is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionPolicy {
    /// Earliest-inserted entry goes first; lookups do not affect order.
    #[default]
    Fifo,
    /// Least recently inserted or read entry goes first.
    Lru,
}

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub url: String,
    pub handle: AssetHandle,
    pub inserted_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(url: String, handle: AssetHandle) -> Self {
        Self {
            url,
            handle,
            inserted_at: Utc::now(),
        }
    }

    pub fn age_minutes(&self) -> i64 {
        (Utc::now() - self.inserted_at).num_minutes()
    }

    pub fn age_display(&self) -> String {
        let minutes = self.age_minutes();
        if minutes < 1 {
            // Includes negative ages from clock skew
            "just now".to_string()
        } else if minutes < 60 {
            format!("{}m ago", minutes)
        } else if minutes < 1440 {
            let hours = minutes / 60;
            if minutes % 60 >= 30 {
                format!("{}h ago", hours + 1)
            } else {
                format!("{}h ago", hours)
            }
        } else {
            let days = minutes / 1440;
            if (minutes % 1440) / 60 >= 12 {
                format!("{}d ago", days + 1)
            } else {
                format!("{}d ago", days)
            }
        }
    }
}

/// Bounded in-memory store of warmed assets with O(1) lookup by URL.
#[derive(Debug)]
pub struct MemoryCache {
    capacity: usize,
    policy: EvictionPolicy,
    entries: HashMap<String, CacheEntry>,
    /// Eviction order, front is evicted first
    order: VecDeque<String>,
}

impl MemoryCache {
    pub fn new(capacity: usize, policy: EvictionPolicy) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            policy,
            entries: HashMap::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn policy(&self) -> EvictionPolicy {
        self.policy
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, url: &str) -> bool {
        self.entries.contains_key(url)
    }

    /// Look up an entry. Under LRU this also marks it most recently used.
    pub fn get(&mut self, url: &str) -> Option<&CacheEntry> {
        if self.policy == EvictionPolicy::Lru && self.entries.contains_key(url) {
            self.touch(url);
        }
        self.entries.get(url)
    }

    /// Lookup that never changes eviction order.
    pub fn peek(&self, url: &str) -> Option<&CacheEntry> {
        self.entries.get(url)
    }

    /// Insert an entry, returning the URLs evicted to make room.
    pub fn insert(&mut self, entry: CacheEntry) -> Vec<String> {
        let url = entry.url.clone();

        if self.entries.contains_key(&url) {
            self.entries.insert(url.clone(), entry);
            if self.policy == EvictionPolicy::Lru {
                self.touch(&url);
            }
            return Vec::new();
        }

        let mut evicted = Vec::new();
        while self.entries.len() >= self.capacity {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            self.entries.remove(&oldest);
            evicted.push(oldest);
        }
        if !evicted.is_empty() {
            debug!(evicted = ?evicted, capacity = self.capacity, "Evicted memory cache entries");
        }

        self.order.push_back(url.clone());
        self.entries.insert(url, entry);
        evicted
    }

    pub fn remove(&mut self, url: &str) -> Option<CacheEntry> {
        let entry = self.entries.remove(url)?;
        if let Some(pos) = self.order.iter().position(|u| u == url) {
            self.order.remove(pos);
        }
        Some(entry)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    /// Cached URLs in eviction order (next to be evicted first).
    pub fn urls(&self) -> Vec<String> {
        self.order.iter().cloned().collect()
    }

    fn touch(&mut self, url: &str) {
        if let Some(pos) = self.order.iter().position(|u| u == url) {
            if let Some(key) = self.order.remove(pos) {
                self.order.push_back(key);
            }
        }
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CACHE_SIZE, EvictionPolicy::default())
    }
}

// ============================================================================
// Tests
// ============================================================================
