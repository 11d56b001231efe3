//! Prefetch-hint strategy.
//!
//! A hint is registered for the lifetime of the request and removed again on
//! every exit path: success, failure, and the chain dropping the future on
//! timeout. `HintRegistry::active` lets callers check nothing leaks across
//! batches.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::future::BoxFuture;
use reqwest::Client;
use tracing::debug;

use super::{check_response, content_type, PreloadStrategy, StrategyKind};
use crate::asset::{AssetHandle, AssetUrl};
use crate::error::StrategyError;

/// Header announcing a speculative, low-priority request.
const PURPOSE_HEADER: &str = "Sec-Purpose";
const PURPOSE_PREFETCH: &str = "prefetch";

/// Shared set of live prefetch hints, counted per URL.
#[derive(Clone, Default)]
pub struct HintRegistry {
    hints: Arc<Mutex<HashMap<String, usize>>>,
}

impl HintRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a hint; it is removed when the returned guard drops.
    pub fn insert(&self, url: &AssetUrl) -> HintGuard {
        let key = url.as_str().to_string();
        {
            let mut hints = self.hints.lock().unwrap_or_else(PoisonError::into_inner);
            *hints.entry(key.clone()).or_insert(0) += 1;
        }
        HintGuard {
            registry: self.clone(),
            url: key,
        }
    }

    /// Total number of hints currently registered.
    pub fn active(&self) -> usize {
        let hints = self.hints.lock().unwrap_or_else(PoisonError::into_inner);
        hints.values().sum()
    }

    pub fn contains(&self, url: &str) -> bool {
        let hints = self.hints.lock().unwrap_or_else(PoisonError::into_inner);
        hints.contains_key(url)
    }

    fn remove(&self, url: &str) {
        let mut hints = self.hints.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(count) = hints.get_mut(url) {
            *count -= 1;
            if *count == 0 {
                hints.remove(url);
            }
        }
    }
}

/// Removes its hint from the registry on drop.
pub struct HintGuard {
    registry: HintRegistry,
    url: String,
}

impl Drop for HintGuard {
    fn drop(&mut self) {
        self.registry.remove(&self.url);
        debug!(url = %self.url, "Prefetch hint removed");
    }
}

pub struct PrefetchHintStrategy {
    client: Client,
    timeout: Duration,
    hints: HintRegistry,
}

impl PrefetchHintStrategy {
    pub fn new(client: Client, timeout: Duration, hints: HintRegistry) -> Self {
        Self {
            client,
            timeout,
            hints,
        }
    }

    pub fn hints(&self) -> &HintRegistry {
        &self.hints
    }

    async fn prefetch(&self, url: &AssetUrl) -> Result<AssetHandle, StrategyError> {
        let _hint = self.hints.insert(url);

        let response = self
            .client
            .get(url.as_url().clone())
            .header(PURPOSE_HEADER, PURPOSE_PREFETCH)
            .send()
            .await?;
        let response = check_response(url, response).await?;
        let content_type = content_type(&response);
        let body = response.bytes().await?;

        Ok(AssetHandle::new(StrategyKind::PrefetchHint, content_type, body.len()))
    }
}

impl PreloadStrategy for PrefetchHintStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::PrefetchHint
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn execute<'a>(&'a self, url: &'a AssetUrl) -> BoxFuture<'a, Result<AssetHandle, StrategyError>> {
        Box::pin(self.prefetch(url))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_removes_hint() {
        let registry = HintRegistry::new();
        let url = AssetUrl::parse("https://x/a.jpg").unwrap();

        let first = registry.insert(&url);
        let second = registry.insert(&url);
        assert_eq!(registry.active(), 2);
        assert!(registry.contains("https://x/a.jpg"));

        drop(first);
        assert_eq!(registry.active(), 1);
        drop(second);
        assert_eq!(registry.active(), 0);
        assert!(!registry.contains("https://x/a.jpg"));
    }

    #[tokio::test]
    async fn test_hint_released_when_future_is_dropped() {
        let registry = HintRegistry::new();
        let url = AssetUrl::parse("https://x/slow.jpg").unwrap();

        let pending = {
            let registry = registry.clone();
            let url = url.clone();
            async move {
                let _hint = registry.insert(&url);
                futures::future::pending::<()>().await;
            }
        };

        let result = tokio::time::timeout(Duration::from_millis(10), pending).await;
        assert!(result.is_err());
        assert_eq!(registry.active(), 0);
    }
}
