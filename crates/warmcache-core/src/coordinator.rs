//! Cache coordinator and public preload API.
//!
//! `ImageCache` validates and partitions incoming URLs, collapses concurrent
//! requests for the same asset into one attempt, runs the retry policy over
//! the strategy chain, and records each settlement. The worker bridge is
//! told about the same assets on the side; nothing it does affects the
//! outcome of a batch.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::stream::{self, StreamExt};
use futures::FutureExt;
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::asset::{partition_urls, AssetUrl};
use crate::cache::CacheEntry;
use crate::config::PreloadConfig;
use crate::error::{BridgeError, PreloadError, StrategyError};
use crate::inflight::{Lookup, PreloadOutcome, PreloadState, RetryRecord, SessionState, SharedPreload};
use crate::retry::RetryPolicy;
use crate::strategy::{HintRegistry, StrategyChain};
use crate::worker::{LoadMetrics, PerformanceMonitor, WorkerBridge};

/// HTTP request timeout in seconds for the shared client.
/// Individual strategies enforce their own, shorter budgets.
const REQUEST_TIMEOUT_SECS: u64 = 60;

/// Outcome of a batch preload. Every valid input URL appears in exactly one list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct PreloadReport {
    pub successful: Vec<String>,
    pub failed: Vec<String>,
}

impl PreloadReport {
    pub fn total(&self) -> usize {
        self.successful.len() + self.failed.len()
    }
}

/// Counters refreshed after every batch operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct CacheStats {
    /// Assets currently held in the memory cache
    pub ready: usize,
    /// Successful settlements this session, including since-evicted ones
    pub preloaded: u64,
    /// Assets permanently failed for the session
    pub failed: usize,
    /// Assets with at least one failed attempt still in flight
    pub retrying: usize,
}

/// Live view of the whole subsystem, including the worker bridge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct DetailedCacheStats {
    pub browser_cache_size: usize,
    /// Successful settlements this session, including since-evicted ones
    pub preloaded_count: u64,
    pub loading_count: usize,
    pub performance_metrics_count: usize,
    pub worker_available: bool,
    pub worker_controlling: bool,
}

/// Builder for [`ImageCache`].
pub struct ImageCacheBuilder {
    config: PreloadConfig,
    client: Option<Client>,
    chain: Option<StrategyChain>,
    bridge: Option<Arc<WorkerBridge>>,
    hints: HintRegistry,
}

impl ImageCacheBuilder {
    /// Share an existing HTTP client (and its connection pool).
    pub fn client(mut self, client: Client) -> Self {
        self.client = Some(client);
        self
    }

    /// Replace the standard element → fetch → prefetch chain.
    pub fn strategies(mut self, chain: StrategyChain) -> Self {
        self.chain = Some(chain);
        self
    }

    pub fn bridge(mut self, bridge: Arc<WorkerBridge>) -> Self {
        self.bridge = Some(bridge);
        self
    }

    pub fn hints(mut self, hints: HintRegistry) -> Self {
        self.hints = hints;
        self
    }

    pub fn build(self) -> Result<ImageCache, PreloadError> {
        let client = match self.client {
            Some(client) => client,
            None => Client::builder()
                .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
                .build()
                .map_err(PreloadError::Client)?,
        };

        let chain = self
            .chain
            .unwrap_or_else(|| StrategyChain::standard(client.clone(), self.config.strategy_timeout(), self.hints.clone()));

        // The cache and its bridge record into one monitor
        let (bridge, perf) = match self.bridge {
            Some(bridge) => {
                let perf = bridge.performance().clone();
                (Some(bridge), perf)
            }
            None if self.config.worker.enabled => {
                let perf = PerformanceMonitor::new();
                let bridge = WorkerBridge::new(self.config.worker.clone(), client.clone()).with_performance(perf.clone());
                (Some(Arc::new(bridge)), perf)
            }
            None => (None, PerformanceMonitor::new()),
        };

        let state = SessionState::new(self.config.max_cache_size, self.config.eviction);
        Ok(ImageCache {
            inner: Arc::new(Inner {
                policy: self.config.retry_policy(),
                concurrency: self.config.max_concurrent_preloads.max(1),
                config: self.config,
                chain,
                hints: self.hints,
                client,
                perf,
                bridge,
                state: Mutex::new(state),
                stats: Mutex::new(CacheStats::default()),
            }),
        })
    }
}

/// The asset preload cache. Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct ImageCache {
    inner: Arc<Inner>,
}

struct Inner {
    config: PreloadConfig,
    chain: StrategyChain,
    policy: RetryPolicy,
    concurrency: usize,
    hints: HintRegistry,
    client: Client,
    perf: PerformanceMonitor,
    bridge: Option<Arc<WorkerBridge>>,
    state: Mutex<SessionState>,
    stats: Mutex<CacheStats>,
}

impl ImageCache {
    pub fn builder(config: PreloadConfig) -> ImageCacheBuilder {
        ImageCacheBuilder {
            config,
            client: None,
            chain: None,
            bridge: None,
            hints: HintRegistry::default(),
        }
    }

    pub fn new(config: PreloadConfig) -> Result<Self, PreloadError> {
        Self::builder(config).build()
    }

    /// Register the background worker if one is configured.
    ///
    /// Failure leaves the cache fully usable from memory alone, so it is
    /// logged and reported but never fatal.
    pub async fn initialize(&self) -> Result<(), BridgeError> {
        let Some(bridge) = self.inner.bridge.as_ref() else {
            debug!("No worker bridge configured, running memory-only");
            return Err(BridgeError::Disabled);
        };
        match bridge.register().await {
            Ok(()) => {
                info!("Background worker registered");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Background worker unavailable, running memory-only");
                Err(e)
            }
        }
    }

    pub fn config(&self) -> &PreloadConfig {
        &self.inner.config
    }

    pub fn bridge(&self) -> Option<&Arc<WorkerBridge>> {
        self.inner.bridge.as_ref()
    }

    pub fn hints(&self) -> &HintRegistry {
        &self.inner.hints
    }

    // ===== Preloading =====

    /// Preload a batch of URLs.
    ///
    /// Invalid entries are dropped and appear in neither list. A failure on
    /// one URL never affects the others; the call returns once every URL
    /// has settled.
    pub async fn preload_images<I, S>(&self, urls: I) -> PreloadReport
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let (valid, rejected) = partition_urls(urls);
        if !rejected.is_empty() {
            debug!(count = rejected.len(), "Ignored invalid URLs in batch");
        }
        if valid.is_empty() {
            self.refresh_stats();
            return PreloadReport::default();
        }

        self.notify_worker(&valid);

        let outcomes: Vec<(AssetUrl, PreloadOutcome)> = stream::iter(valid)
            .map(|url| async move {
                let outcome = self.preload_one(&url).await;
                (url, outcome)
            })
            .buffered(self.inner.concurrency)
            .collect()
            .await;

        let mut report = PreloadReport::default();
        for (url, outcome) in outcomes {
            match outcome {
                PreloadOutcome::Succeeded => report.successful.push(url.to_string()),
                PreloadOutcome::Failed => report.failed.push(url.to_string()),
            }
        }

        self.refresh_stats();
        info!(
            successful = report.successful.len(),
            failed = report.failed.len(),
            "Preload batch complete"
        );
        report
    }

    /// Preload one URL, surfacing why it failed.
    pub async fn preload_image(&self, url: &str) -> Result<(), PreloadError> {
        let url = AssetUrl::parse(url)?;
        let outcome = self.preload_one(&url).await;
        self.refresh_stats();
        match outcome {
            PreloadOutcome::Succeeded => Ok(()),
            PreloadOutcome::Failed => Err(PreloadError::PermanentFailure(url.to_string())),
        }
    }

    /// Deduplicated single-asset preload.
    async fn preload_one(&self, url: &AssetUrl) -> PreloadOutcome {
        let flight = {
            let mut state = self.inner.lock_state();
            match state.lookup(url.as_str()) {
                Lookup::Succeeded => {
                    state.record_hit(url.as_str());
                    return PreloadOutcome::Succeeded;
                }
                Lookup::Failed => {
                    debug!(url = %url, "Skipping permanently failed asset");
                    return PreloadOutcome::Failed;
                }
                Lookup::Pending(flight) => {
                    debug!(url = %url, "Joining in-flight preload");
                    flight
                }
                Lookup::Unseen => {
                    let flight = self.start_flight(url, state.generation());
                    state.register(url.as_str(), flight.clone());
                    flight
                }
            }
        };
        flight.await
    }

    /// Spawn the attempt so it runs to settlement even if every caller
    /// stops waiting.
    fn start_flight(&self, url: &AssetUrl, generation: u64) -> SharedPreload {
        let task = tokio::spawn(Arc::clone(&self.inner).run_preload(url.clone(), generation));
        let inner = Arc::clone(&self.inner);
        let url = url.clone();
        task.map(move |joined| match joined {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(url = %url, error = %e, "Preload task aborted");
                inner.lock_state().settle_failure(url.as_str(), generation);
                PreloadOutcome::Failed
            }
        })
        .boxed()
        .shared()
    }

    fn notify_worker(&self, urls: &[AssetUrl]) {
        let Some(bridge) = self.inner.bridge.as_ref() else {
            return;
        };
        if !bridge.is_available() {
            return;
        }
        if let Err(e) = bridge.preload_assets(urls) {
            warn!(error = %e, count = urls.len(), "Could not hand assets to the background worker");
        }
    }

    // ===== Lookups =====

    /// True iff the URL is currently held in the memory cache.
    pub fn is_preloaded(&self, url: &str) -> bool {
        match AssetUrl::parse(url) {
            Ok(url) => self.inner.lock_state().memory().contains(url.as_str()),
            Err(_) => false,
        }
    }

    pub fn get(&self, url: &str) -> Option<CacheEntry> {
        let url = AssetUrl::parse(url).ok()?;
        self.inner.lock_state().memory_mut().get(url.as_str()).cloned()
    }

    pub fn state_of(&self, url: &str) -> Option<PreloadState> {
        let url = AssetUrl::parse(url).ok()?;
        self.inner.lock_state().state_of(url.as_str())
    }

    pub fn retry_record(&self, url: &str) -> Option<RetryRecord> {
        let url = AssetUrl::parse(url).ok()?;
        self.inner.lock_state().retry_record(url.as_str()).cloned()
    }

    /// Cached URLs, next to be evicted first.
    pub fn cached_urls(&self) -> Vec<String> {
        self.inner.lock_state().memory().urls()
    }

    // ===== Stats =====

    /// Counters as of the last completed batch operation.
    pub fn cache_stats(&self) -> CacheStats {
        *self.inner.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn detailed_stats(&self) -> DetailedCacheStats {
        let state = self.inner.lock_state();
        let bridge = self.inner.bridge.as_ref();
        DetailedCacheStats {
            browser_cache_size: state.memory().len(),
            preloaded_count: state.preloaded_total(),
            loading_count: state.in_flight_count(),
            performance_metrics_count: self.inner.perf.count(),
            worker_available: bridge.is_some_and(|b| b.is_available()),
            worker_controlling: bridge.is_some_and(|b| b.is_controlling()),
        }
    }

    fn refresh_stats(&self) -> CacheStats {
        let stats = {
            let state = self.inner.lock_state();
            CacheStats {
                ready: state.memory().len(),
                preloaded: state.preloaded_total(),
                failed: state.failed_count(),
                retrying: state.retrying_count(),
            }
        };
        *self.inner.stats.lock().unwrap_or_else(PoisonError::into_inner) = stats;
        stats
    }

    // ===== Clearing =====

    /// Reset the memory cache, in-flight table, retry records and failures.
    ///
    /// Attempts still running finish in the background; their results are
    /// discarded.
    pub fn clear_cache(&self) {
        self.inner.lock_state().clear();
        self.refresh_stats();
        info!("Memory cache cleared");
    }

    /// Clear local state and ask the worker to purge its store.
    ///
    /// A worker that is missing or fails to answer is logged and ignored.
    pub async fn clear_all_caches(&self) {
        self.clear_cache();
        self.inner.perf.clear();
        let Some(bridge) = self.inner.bridge.as_ref() else {
            return;
        };
        if !bridge.is_available() {
            return;
        }
        match bridge.clear_cache().await {
            Ok(removed) => info!(removed, "Worker cache cleared"),
            Err(e) => warn!(error = %e, "Failed to clear worker cache"),
        }
    }

    // ===== Performance =====

    /// Time one load of `url` and record it. Works with or without a worker.
    pub async fn measure_load_performance(&self, url: &str) -> Result<LoadMetrics, PreloadError> {
        let url = AssetUrl::parse(url)?;
        Ok(self.inner.perf.measure(&self.inner.client, &url).await?)
    }

    pub fn performance(&self) -> &PerformanceMonitor {
        &self.inner.perf
    }
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn run_preload(self: Arc<Self>, url: AssetUrl, generation: u64) -> PreloadOutcome {
        let result = self
            .policy
            .run(
                url.as_str(),
                |_attempt| self.chain.execute(&url),
                |attempt, e: &StrategyError| {
                    let attempts = self.lock_state().record_failure(url.as_str(), generation);
                    warn!(url = %url, attempt, attempts, error = %e, "Preload attempt failed");
                },
            )
            .await;

        match result {
            Ok(handle) => {
                debug!(url = %url, strategy = handle.strategy.name(), "Asset preloaded");
                self.lock_state().settle_success(url.as_str(), handle, generation);
                PreloadOutcome::Succeeded
            }
            Err(e) => {
                warn!(url = %url, error = %e, "Asset permanently failed for this session");
                self.lock_state().settle_failure(url.as_str(), generation);
                PreloadOutcome::Failed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use futures::future::BoxFuture;

    use super::*;
    use crate::asset::AssetHandle;
    use crate::cache::EvictionPolicy;
    use crate::config::WorkerConfig;
    use crate::strategy::testing::{chain, ScriptedStrategy, Step};
    use crate::strategy::{PreloadStrategy, StrategyKind};

    /// Succeeds for every URL except those whose path contains "broken",
    /// after an optional delay. Counts executions per URL.
    struct UrlStrategy {
        delay: Duration,
        calls: std::sync::Mutex<HashMap<String, usize>>,
    }

    impl UrlStrategy {
        fn new(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                delay,
                calls: std::sync::Mutex::new(HashMap::new()),
            })
        }

        fn calls(&self, url: &str) -> usize {
            self.calls.lock().unwrap().get(url).copied().unwrap_or(0)
        }
    }

    impl PreloadStrategy for UrlStrategy {
        fn kind(&self) -> StrategyKind {
            StrategyKind::Custom("by-url")
        }

        fn timeout(&self) -> Duration {
            Duration::from_secs(5)
        }

        fn execute<'a>(&'a self, url: &'a AssetUrl) -> BoxFuture<'a, Result<AssetHandle, StrategyError>> {
            *self.calls.lock().unwrap().entry(url.to_string()).or_default() += 1;
            Box::pin(async move {
                if !self.delay.is_zero() {
                    tokio::time::sleep(self.delay).await;
                }
                if url.as_str().contains("broken") {
                    Err(StrategyError::Status { url: url.to_string(), status: 404 })
                } else {
                    Ok(AssetHandle::new(self.kind(), Some("image/png".into()), 1))
                }
            })
        }
    }

    fn config(max_cache_size: usize) -> PreloadConfig {
        PreloadConfig {
            max_cache_size,
            base_delay_ms: 100,
            worker: WorkerConfig {
                enabled: false,
                ..WorkerConfig::default()
            },
            ..PreloadConfig::default()
        }
    }

    fn cache_with(config: PreloadConfig, strategy: Arc<UrlStrategy>) -> ImageCache {
        ImageCache::builder(config)
            .strategies(StrategyChain::new(vec![strategy as Arc<dyn PreloadStrategy>]))
            .build()
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_partitions_valid_urls() {
        let strategy = UrlStrategy::new(Duration::ZERO);
        let cache = cache_with(config(10), strategy);

        let report = cache
            .preload_images([
                "https://x/a.jpg",
                "not a url",
                "https://x/broken.jpg",
                "",
                "https://x/b.jpg",
            ])
            .await;

        assert_eq!(report.successful, vec!["https://x/a.jpg", "https://x/b.jpg"]);
        assert_eq!(report.failed, vec!["https://x/broken.jpg"]);
        assert_eq!(report.total(), 3);
        assert_eq!(
            cache.cache_stats(),
            CacheStats { ready: 2, preloaded: 2, failed: 1, retrying: 0 }
        );
    }

    #[tokio::test]
    async fn test_empty_batch_is_empty_report() {
        let cache = cache_with(config(10), UrlStrategy::new(Duration::ZERO));
        let report = cache.preload_images(Vec::<String>::new()).await;
        assert_eq!(report, PreloadReport::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeat_preload_is_idempotent() {
        let strategy = UrlStrategy::new(Duration::ZERO);
        let cache = cache_with(config(10), strategy.clone());

        cache.preload_images(["https://x/a.jpg"]).await;
        let report = cache.preload_images(["https://x/a.jpg"]).await;

        assert_eq!(report.successful, vec!["https://x/a.jpg"]);
        assert_eq!(strategy.calls("https://x/a.jpg"), 1);
        assert!(cache.is_preloaded("https://x/a.jpg"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_share_one_attempt() {
        let strategy = UrlStrategy::new(Duration::from_millis(200));
        let cache = cache_with(config(10), strategy.clone());

        let (first, second) = tokio::join!(
            cache.preload_images(["https://x/a.jpg"]),
            cache.preload_images(["https://x/a.jpg"]),
        );

        assert_eq!(first.successful, vec!["https://x/a.jpg"]);
        assert_eq!(second.successful, vec!["https://x/a.jpg"]);
        assert_eq!(strategy.calls("https://x/a.jpg"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_bound_then_fail_fast() {
        let strategy = UrlStrategy::new(Duration::ZERO);
        let cache = cache_with(config(10), strategy.clone());

        let report = cache.preload_images(["https://x/broken.jpg"]).await;
        assert_eq!(report.failed, vec!["https://x/broken.jpg"]);
        assert_eq!(strategy.calls("https://x/broken.jpg"), 3);
        assert_eq!(cache.state_of("https://x/broken.jpg"), Some(PreloadState::PermanentlyFailed));
        assert!(cache.retry_record("https://x/broken.jpg").is_none());

        let again = cache.preload_images(["https://x/broken.jpg"]).await;
        assert_eq!(again.failed, vec!["https://x/broken.jpg"]);
        assert_eq!(strategy.calls("https://x/broken.jpg"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_record_visible_while_pending() {
        let flaky = ScriptedStrategy::scripted("flaky", vec![Step::Fail], Step::Delay(Duration::from_secs(1)));
        let cache = ImageCache::builder(config(10))
            .strategies(chain(&[flaky.clone()]))
            .build()
            .unwrap();

        let task = tokio::spawn({
            let cache = cache.clone();
            async move { cache.preload_images(["https://x/a.jpg"]).await }
        });

        // First attempt fails at once; the second starts after 100ms and sleeps 1s
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(cache.state_of("https://x/a.jpg"), Some(PreloadState::Pending));
        assert_eq!(cache.retry_record("https://x/a.jpg").map(|r| r.attempt_count), Some(1));
        assert_eq!(cache.detailed_stats().loading_count, 1);

        let report = task.await.unwrap();
        assert_eq!(report.successful, vec!["https://x/a.jpg"]);
        assert!(cache.retry_record("https://x/a.jpg").is_none());
        assert_eq!(flaky.calls(), 2);
    }

    #[tokio::test]
    async fn test_fifo_eviction_keeps_newest() {
        let cache = cache_with(config(2), UrlStrategy::new(Duration::ZERO));

        for url in ["https://x/a.jpg", "https://x/b.jpg", "https://x/c.jpg"] {
            cache.preload_images([url]).await;
        }

        assert_eq!(cache.cached_urls(), vec!["https://x/b.jpg", "https://x/c.jpg"]);
        assert!(!cache.is_preloaded("https://x/a.jpg"));
        assert_eq!(cache.state_of("https://x/a.jpg"), None);
        assert_eq!(cache.cache_stats().preloaded, 3);
        assert_eq!(cache.cache_stats().ready, 2);

        let detailed = cache.detailed_stats();
        assert_eq!(detailed.browser_cache_size, 2);
        assert_eq!(detailed.preloaded_count, 3);
    }

    #[tokio::test]
    async fn test_fallback_strategy_rescues_asset() {
        let element = ScriptedStrategy::always("element", Step::Fail);
        let fetch = ScriptedStrategy::always("fetch", Step::Succeed);
        let cache = ImageCache::builder(config(10))
            .strategies(chain(&[element.clone(), fetch.clone()]))
            .build()
            .unwrap();

        let report = cache.preload_images(["https://x/a.jpg"]).await;

        assert_eq!(report.successful, vec!["https://x/a.jpg"]);
        let entry = cache.get("https://x/a.jpg").unwrap();
        assert_eq!(entry.handle.strategy, StrategyKind::Custom("fetch"));
        assert_eq!(element.calls(), 1);
        assert_eq!(fetch.calls(), 1);
    }

    #[tokio::test]
    async fn test_unavailable_worker_does_not_affect_batch() {
        let mut config = config(10);
        config.worker.enabled = true;
        let cache = cache_with(config, UrlStrategy::new(Duration::ZERO));

        assert!(matches!(cache.initialize().await, Err(BridgeError::Registration(_))));

        let report = cache.preload_images(["https://x/a.jpg"]).await;
        assert_eq!(report.successful, vec!["https://x/a.jpg"]);

        let detailed = cache.detailed_stats();
        assert!(!detailed.worker_available);
        assert!(!detailed.worker_controlling);
        assert_eq!(detailed.browser_cache_size, 1);

        cache.clear_all_caches().await;
        assert!(!cache.is_preloaded("https://x/a.jpg"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_resets_session_state() {
        let strategy = UrlStrategy::new(Duration::ZERO);
        let cache = cache_with(config(10), strategy.clone());
        cache.preload_images(["https://x/a.jpg", "https://x/broken.jpg"]).await;

        cache.clear_cache();

        let stats = cache.cache_stats();
        assert_eq!((stats.ready, stats.failed, stats.retrying), (0, 0, 0));
        assert!(!cache.is_preloaded("https://x/a.jpg"));
        assert_eq!(cache.state_of("https://x/broken.jpg"), None);

        // Both URLs are unseen again and get fresh attempts
        cache.preload_images(["https://x/a.jpg", "https://x/broken.jpg"]).await;
        assert_eq!(strategy.calls("https://x/a.jpg"), 2);
        assert_eq!(strategy.calls("https://x/broken.jpg"), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_during_flight_discards_result() {
        let strategy = UrlStrategy::new(Duration::from_secs(1));
        let cache = cache_with(config(10), strategy);

        let task = tokio::spawn({
            let cache = cache.clone();
            async move { cache.preload_images(["https://x/a.jpg"]).await }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        cache.clear_cache();

        // The caller still learns the outcome, but the cleared cache stays empty
        let report = task.await.unwrap();
        assert_eq!(report.successful, vec!["https://x/a.jpg"]);
        assert!(!cache.is_preloaded("https://x/a.jpg"));
    }

    #[tokio::test]
    async fn test_single_preload_surfaces_errors() {
        let cache = cache_with(config(10), UrlStrategy::new(Duration::ZERO));

        assert!(matches!(cache.preload_image("ftp://x/a.jpg").await, Err(PreloadError::InvalidInput(_))));
        assert!(cache.preload_image("https://x/a.jpg").await.is_ok());
        assert!(!cache.is_preloaded("nonsense"));
    }

    #[tokio::test]
    async fn test_bridge_shares_performance_monitor() {
        let mut config = config(10);
        config.worker.enabled = true;
        let cache = cache_with(config, UrlStrategy::new(Duration::ZERO));
        let bridge = cache.bridge().cloned().unwrap();

        bridge.performance().record(LoadMetrics {
            url: "https://x/a.jpg".into(),
            duration_ms: 3.0,
            transfer_size: 1,
            decoded_size: 1,
            cache_hit: false,
            measured_at: chrono::Utc::now(),
        });
        assert_eq!(cache.performance().count(), 1);
        assert_eq!(cache.detailed_stats().performance_metrics_count, 1);

        cache.clear_all_caches().await;
        assert_eq!(bridge.performance().count(), 0);
    }

    #[tokio::test]
    async fn test_measure_rejects_invalid_url() {
        let cache = cache_with(config(10), UrlStrategy::new(Duration::ZERO));
        assert!(matches!(
            cache.measure_load_performance("not a url").await,
            Err(PreloadError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_lru_preload_hit_refreshes_recency() {
        let mut config = config(2);
        config.eviction = EvictionPolicy::Lru;
        let strategy = UrlStrategy::new(Duration::ZERO);
        let cache = cache_with(config, strategy.clone());

        cache.preload_images(["https://x/a.jpg"]).await;
        cache.preload_images(["https://x/b.jpg"]).await;
        // A repeat preload counts as a use of a
        cache.preload_images(["https://x/a.jpg"]).await;
        cache.preload_images(["https://x/c.jpg"]).await;

        assert_eq!(cache.cached_urls(), vec!["https://x/a.jpg", "https://x/c.jpg"]);
        assert!(!cache.is_preloaded("https://x/b.jpg"));
        assert_eq!(strategy.calls("https://x/a.jpg"), 1);
    }
}
