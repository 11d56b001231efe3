//! Fetch strategy: a plain request that lets any cache layer answer.
//!
//! Used as the fallback when the element load fails, e.g. because the body
//! is served with a content type that does not decode as an image.

use std::time::Duration;

use futures::future::BoxFuture;
use reqwest::{header, Client};

use super::{check_response, content_type, PreloadStrategy, StrategyKind};
use crate::asset::{AssetHandle, AssetUrl};
use crate::error::StrategyError;

/// Accept a stored response of any staleness rather than revalidating.
const CACHE_FORCING_DIRECTIVE: &str = "max-stale";

pub struct FetchStrategy {
    client: Client,
    timeout: Duration,
}

impl FetchStrategy {
    pub fn new(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    async fn fetch(&self, url: &AssetUrl) -> Result<AssetHandle, StrategyError> {
        let response = self
            .client
            .get(url.as_url().clone())
            .header(header::CACHE_CONTROL, CACHE_FORCING_DIRECTIVE)
            .send()
            .await?;
        let response = check_response(url, response).await?;
        let content_type = content_type(&response);
        let body = response.bytes().await?;

        Ok(AssetHandle::new(StrategyKind::Fetch, content_type, body.len()))
    }
}

impl PreloadStrategy for FetchStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Fetch
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn execute<'a>(&'a self, url: &'a AssetUrl) -> BoxFuture<'a, Result<AssetHandle, StrategyError>> {
        Box::pin(self.fetch(url))
    }
}
