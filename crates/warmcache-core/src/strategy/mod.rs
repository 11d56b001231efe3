//! Strategy executors for warming a single asset.
//!
//! This module provides three independent ways of loading an asset, tried in
//! priority order by [`StrategyChain`]:
//!
//! - `ElementLoadStrategy`: load and decode the image itself
//! - `FetchStrategy`: plain fetch with cache-forcing directives
//! - `PrefetchHintStrategy`: transient low-priority prefetch hint
//!
//! Each executor is stateless apart from its own timeout.

pub mod element;
pub mod fetch;
pub mod prefetch;

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use reqwest::{header, Client};
use serde::Serialize;
use tracing::debug;

use crate::asset::{AssetHandle, AssetUrl};
use crate::error::{truncate_text, StrategyError};

pub use element::ElementLoadStrategy;
pub use fetch::FetchStrategy;
pub use prefetch::{HintRegistry, PrefetchHintStrategy};

/// Identifies which executor produced a result or failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    ElementLoad,
    Fetch,
    PrefetchHint,
    Custom(&'static str),
}

impl StrategyKind {
    pub fn name(&self) -> &'static str {
        match self {
            StrategyKind::ElementLoad => "element-load",
            StrategyKind::Fetch => "fetch",
            StrategyKind::PrefetchHint => "prefetch-hint",
            StrategyKind::Custom(name) => name,
        }
    }
}

/// One technique for warming a single asset.
pub trait PreloadStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    /// Budget for a single execution; enforced by the chain, not the strategy.
    fn timeout(&self) -> Duration;

    fn execute<'a>(&'a self, url: &'a AssetUrl) -> BoxFuture<'a, Result<AssetHandle, StrategyError>>;
}

/// Ordered list of strategies tried in sequence until one succeeds.
#[derive(Clone, Default)]
pub struct StrategyChain {
    strategies: Vec<Arc<dyn PreloadStrategy>>,
}

impl StrategyChain {
    pub fn new(strategies: Vec<Arc<dyn PreloadStrategy>>) -> Self {
        Self { strategies }
    }

    /// Element load, then fetch, then prefetch hint, sharing one HTTP client.
    pub fn standard(client: Client, timeout: Duration, hints: HintRegistry) -> Self {
        Self::new(vec![
            Arc::new(ElementLoadStrategy::new(client.clone(), timeout)),
            Arc::new(FetchStrategy::new(client.clone(), timeout)),
            Arc::new(PrefetchHintStrategy::new(client, timeout, hints)),
        ])
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    pub fn kinds(&self) -> Vec<StrategyKind> {
        self.strategies.iter().map(|s| s.kind()).collect()
    }

    /// Run one attempt: every strategy in order, first success wins.
    pub async fn execute(&self, url: &AssetUrl) -> Result<AssetHandle, StrategyError> {
        let mut failures = Vec::with_capacity(self.strategies.len());

        for strategy in &self.strategies {
            let kind = strategy.kind();
            let budget = strategy.timeout();
            let outcome = match tokio::time::timeout(budget, strategy.execute(url)).await {
                Ok(result) => result,
                Err(_) => Err(StrategyError::Timeout(budget)),
            };

            match outcome {
                Ok(handle) => {
                    debug!(url = %url, strategy = kind.name(), bytes = handle.byte_len, "Strategy succeeded");
                    return Ok(handle);
                }
                Err(e) => {
                    debug!(url = %url, strategy = kind.name(), error = %e, "Strategy failed");
                    failures.push((kind, e));
                }
            }
        }

        Err(StrategyError::Exhausted(failures))
    }
}

/// Turn a non-success response into a `StrategyError`, quoting the body.
pub(crate) async fn check_response(url: &AssetUrl, response: reqwest::Response) -> Result<reqwest::Response, StrategyError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    debug!(url = %url, status = status.as_u16(), body = %truncate_text(&body), "Asset request rejected");
    Err(StrategyError::Status {
        url: url.to_string(),
        status: status.as_u16(),
    })
}

pub(crate) fn content_type(response: &reqwest::Response) -> Option<String> {
    response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
}
