//! Read-model for UI layers.
//!
//! `CacheWatch` republishes readiness and counters after every batch
//! operation so a view can re-render from a `watch::Receiver` instead of
//! polling the cache.

use serde::Serialize;
use tokio::sync::watch;
use tracing::debug;

use crate::coordinator::{CacheStats, ImageCache, PreloadReport};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct CacheView {
    /// Set once `initialize` has run, whether or not a worker came up
    pub is_ready: bool,
    pub stats: CacheStats,
}

pub struct CacheWatch {
    cache: ImageCache,
    view: watch::Sender<CacheView>,
}

impl CacheWatch {
    pub fn new(cache: ImageCache) -> Self {
        let (view, _) = watch::channel(CacheView {
            is_ready: false,
            stats: cache.cache_stats(),
        });
        Self { cache, view }
    }

    pub fn cache(&self) -> &ImageCache {
        &self.cache
    }

    /// Bring up the worker bridge (if any) and mark the view ready.
    pub async fn initialize(&self) {
        if let Err(e) = self.cache.initialize().await {
            debug!(error = %e, "Cache ready without a background worker");
        }
        self.view.send_modify(|view| {
            view.is_ready = true;
        });
        self.publish();
    }

    pub async fn preload_images<I, S>(&self, urls: I) -> PreloadReport
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let report = self.cache.preload_images(urls).await;
        self.publish();
        report
    }

    /// Clears the memory cache and the worker's store.
    pub async fn clear_cache(&self) {
        self.cache.clear_all_caches().await;
        self.publish();
    }

    pub fn is_preloaded(&self, url: &str) -> bool {
        self.cache.is_preloaded(url)
    }

    pub fn subscribe(&self) -> watch::Receiver<CacheView> {
        self.view.subscribe()
    }

    pub fn current(&self) -> CacheView {
        *self.view.borrow()
    }

    fn publish(&self) {
        let stats = self.cache.cache_stats();
        self.view.send_if_modified(|view| {
            if view.stats == stats {
                return false;
            }
            view.stats = stats;
            true
        });
    }
}
