//! Asset identifiers and loaded-asset handles.
//!
//! Every URL handed to the cache is validated here before it can enter any
//! preload state. Malformed entries are dropped and logged, never reported
//! as failures.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use tracing::warn;
use url::Url;

use crate::error::PreloadError;
use crate::strategy::StrategyKind;

/// A validated, absolute `http`/`https` asset URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AssetUrl(Url);

impl AssetUrl {
    pub fn parse(input: &str) -> Result<Self, PreloadError> {
        let trimmed = input.trim();
        let url = Url::parse(trimmed).map_err(|e| PreloadError::InvalidInput(format!("{}: {}", trimmed, e)))?;
        match url.scheme() {
            "http" | "https" => Ok(Self(url)),
            other => Err(PreloadError::InvalidInput(format!(
                "{}: unsupported scheme '{}'",
                trimmed, other
            ))),
        }
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    pub fn as_url(&self) -> &Url {
        &self.0
    }
}

impl fmt::Display for AssetUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.as_str())
    }
}

/// Split raw inputs into valid asset URLs and rejected entries.
///
/// Valid URLs keep their first-seen order and duplicates collapse into one.
/// The rejected list holds the raw inputs as given.
pub fn partition_urls<I, S>(inputs: I) -> (Vec<AssetUrl>, Vec<String>)
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();
    let mut valid = Vec::new();
    let mut rejected = Vec::new();

    for input in inputs {
        let raw = input.as_ref();
        match AssetUrl::parse(raw) {
            Ok(url) => {
                if seen.insert(url.as_str().to_string()) {
                    valid.push(url);
                }
            }
            Err(e) => {
                warn!(input = raw, error = %e, "Dropping invalid asset URL");
                rejected.push(raw.to_string());
            }
        }
    }

    (valid, rejected)
}

/// Opaque handle to a successfully warmed asset.
#[derive(Debug, Clone)]
pub struct AssetHandle {
    pub strategy: StrategyKind,
    pub content_type: Option<String>,
    pub byte_len: usize,
    /// Decoded body, kept only by strategies that hold the image itself.
    pub body: Option<Arc<[u8]>>,
}

impl AssetHandle {
    pub fn new(strategy: StrategyKind, content_type: Option<String>, byte_len: usize) -> Self {
        Self {
            strategy,
            content_type,
            byte_len,
            body: None,
        }
    }

    pub fn with_body(mut self, body: &[u8]) -> Self {
        self.byte_len = body.len();
        self.body = Some(Arc::from(body));
        self
    }
}
