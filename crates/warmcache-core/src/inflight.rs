//! Per-session preload state and the in-flight deduplication table.
//!
//! Every validated URL is in exactly one of three states once its attempt
//! settles: succeeded (in the memory cache), permanently failed, or unseen
//! again after eviction or a clear. While an attempt runs, every caller
//! shares one registered future for it.

use std::collections::{HashMap, HashSet};

use futures::future::{BoxFuture, Shared};
use serde::Serialize;
use tracing::debug;

use crate::asset::AssetHandle;
use crate::cache::{CacheEntry, EvictionPolicy, MemoryCache};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PreloadOutcome {
    Succeeded,
    Failed,
}

/// Observable state of one asset URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PreloadState {
    Pending,
    Succeeded,
    PermanentlyFailed,
}

/// Failure bookkeeping for a URL that has not yet succeeded or given up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryRecord {
    pub url: String,
    pub attempt_count: u32,
}

pub(crate) type SharedPreload = Shared<BoxFuture<'static, PreloadOutcome>>;

pub(crate) enum Lookup {
    Succeeded,
    Failed,
    Pending(SharedPreload),
    Unseen,
}

pub(crate) struct SessionState {
    memory: MemoryCache,
    in_flight: HashMap<String, SharedPreload>,
    retries: HashMap<String, RetryRecord>,
    failed: HashSet<String>,
    /// Bumped on every clear; settlements from older generations are dropped
    generation: u64,
    preloaded_total: u64,
}

impl SessionState {
    pub(crate) fn new(capacity: usize, policy: EvictionPolicy) -> Self {
        Self {
            memory: MemoryCache::new(capacity, policy),
            in_flight: HashMap::new(),
            retries: HashMap::new(),
            failed: HashSet::new(),
            generation: 0,
            preloaded_total: 0,
        }
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn lookup(&self, url: &str) -> Lookup {
        if self.memory.contains(url) {
            Lookup::Succeeded
        } else if self.failed.contains(url) {
            Lookup::Failed
        } else if let Some(flight) = self.in_flight.get(url) {
            Lookup::Pending(flight.clone())
        } else {
            Lookup::Unseen
        }
    }

    pub(crate) fn state_of(&self, url: &str) -> Option<PreloadState> {
        match self.lookup(url) {
            Lookup::Succeeded => Some(PreloadState::Succeeded),
            Lookup::Failed => Some(PreloadState::PermanentlyFailed),
            Lookup::Pending(_) => Some(PreloadState::Pending),
            Lookup::Unseen => None,
        }
    }

    /// Count a repeat request for a cached URL as a use of its entry.
    pub(crate) fn record_hit(&mut self, url: &str) {
        self.memory.get(url);
    }

    pub(crate) fn register(&mut self, url: &str, flight: SharedPreload) {
        self.in_flight.insert(url.to_string(), flight);
    }

    /// Count a failed attempt, returning the new attempt count.
    pub(crate) fn record_failure(&mut self, url: &str, generation: u64) -> u32 {
        if generation != self.generation {
            return 0;
        }
        let record = self
            .retries
            .entry(url.to_string())
            .or_insert_with(|| RetryRecord {
                url: url.to_string(),
                attempt_count: 0,
            });
        record.attempt_count += 1;
        record.attempt_count
    }

    /// Move a URL into the succeeded state. Returns false for stale settlements.
    pub(crate) fn settle_success(&mut self, url: &str, handle: AssetHandle, generation: u64) -> bool {
        if generation != self.generation {
            debug!(url, "Discarding success from a cleared generation");
            return false;
        }
        self.in_flight.remove(url);
        self.retries.remove(url);
        self.memory.insert(CacheEntry::new(url.to_string(), handle));
        self.preloaded_total += 1;
        true
    }

    /// Move a URL into the permanently-failed state. Returns false for stale settlements.
    pub(crate) fn settle_failure(&mut self, url: &str, generation: u64) -> bool {
        if generation != self.generation {
            debug!(url, "Discarding failure from a cleared generation");
            return false;
        }
        self.in_flight.remove(url);
        self.retries.remove(url);
        self.failed.insert(url.to_string());
        true
    }

    pub(crate) fn clear(&mut self) {
        self.memory.clear();
        self.in_flight.clear();
        self.retries.clear();
        self.failed.clear();
        self.generation += 1;
    }

    pub(crate) fn memory(&self) -> &MemoryCache {
        &self.memory
    }

    pub(crate) fn memory_mut(&mut self) -> &mut MemoryCache {
        &mut self.memory
    }

    pub(crate) fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    pub(crate) fn retry_record(&self, url: &str) -> Option<&RetryRecord> {
        self.retries.get(url)
    }

    pub(crate) fn retrying_count(&self) -> usize {
        self.retries.len()
    }

    pub(crate) fn failed_count(&self) -> usize {
        self.failed.len()
    }

    pub(crate) fn preloaded_total(&self) -> u64 {
        self.preloaded_total
    }
}
