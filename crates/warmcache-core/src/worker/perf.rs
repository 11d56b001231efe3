//! Per-asset load timing with a cache-hit heuristic.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use reqwest::{header, Client};
use serde::Serialize;
use tokio::time::Instant;
use tracing::debug;

use crate::asset::AssetUrl;
use crate::error::StrategyError;
use crate::strategy::check_response;

/// Proxy header some CDNs set when the response came from their cache
const X_CACHE_HEADER: &str = "x-cache";

#[derive(Debug, Clone, Serialize)]
pub struct LoadMetrics {
    pub url: String,
    pub duration_ms: f64,
    pub transfer_size: u64,
    pub decoded_size: u64,
    pub cache_hit: bool,
    pub measured_at: DateTime<Utc>,
}

/// Records load timings per URL; the latest measurement wins.
#[derive(Clone, Default)]
pub struct PerformanceMonitor {
    metrics: Arc<Mutex<HashMap<String, LoadMetrics>>>,
}

impl PerformanceMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn measure(&self, client: &Client, url: &AssetUrl) -> Result<LoadMetrics, StrategyError> {
        let started = Instant::now();
        let response = client.get(url.as_url().clone()).send().await?;
        let response = check_response(url, response).await?;

        let headers = response.headers();
        let served_from_cache = headers.contains_key(header::AGE)
            || headers
                .get(X_CACHE_HEADER)
                .and_then(|v| v.to_str().ok())
                .is_some_and(|v| v.to_ascii_uppercase().contains("HIT"));
        let declared_length = response.content_length();

        let body = response.bytes().await?;
        let elapsed = started.elapsed();

        let decoded_size = body.len() as u64;
        let transfer_size = declared_length.unwrap_or(decoded_size);
        let metrics = LoadMetrics {
            url: url.to_string(),
            duration_ms: elapsed.as_secs_f64() * 1000.0,
            transfer_size,
            decoded_size,
            cache_hit: served_from_cache || looks_cached(transfer_size, decoded_size),
            measured_at: Utc::now(),
        };

        debug!(
            url = %url,
            duration_ms = metrics.duration_ms,
            cache_hit = metrics.cache_hit,
            "Measured asset load"
        );
        self.record(metrics.clone());
        Ok(metrics)
    }

    pub fn record(&self, metrics: LoadMetrics) {
        let mut map = self.metrics.lock().unwrap_or_else(PoisonError::into_inner);
        map.insert(metrics.url.clone(), metrics);
    }

    pub fn get(&self, url: &str) -> Option<LoadMetrics> {
        let map = self.metrics.lock().unwrap_or_else(PoisonError::into_inner);
        map.get(url).cloned()
    }

    pub fn count(&self) -> usize {
        self.metrics.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn clear(&self) {
        self.metrics.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

/// Nothing (or less than the body) crossed the wire, so a cache answered.
fn looks_cached(transfer_size: u64, decoded_size: u64) -> bool {
    transfer_size == 0 || transfer_size < decoded_size
}
