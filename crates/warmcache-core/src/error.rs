use std::time::Duration;

use thiserror::Error;

use crate::strategy::StrategyKind;

/// Errors surfaced by the single-asset preload path.
///
/// Batch preloads never return these; individual failures are folded into
/// the `failed` half of a [`crate::PreloadReport`].
#[derive(Error, Debug)]
pub enum PreloadError {
    #[error("Invalid asset URL: {0}")]
    InvalidInput(String),

    #[error("Preload of {url} gave up after {attempts} attempt(s): {last}")]
    ExhaustedRetries {
        url: String,
        attempts: u32,
        last: String,
    },

    #[error("Asset permanently failed for this session: {0}")]
    PermanentFailure(String),

    #[error("Failed to load asset: {0}")]
    Load(#[from] StrategyError),

    #[error(transparent)]
    Bridge(#[from] BridgeError),

    #[error("Failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

/// Failure of a single strategy execution (or of a whole attempt).
#[derive(Error, Debug)]
pub enum StrategyError {
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("HTTP status {status} for {url}")]
    Status { url: String, status: u16 },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Could not decode image: {0}")]
    Decode(String),

    #[error("All strategies failed: {}", summarize(.0))]
    Exhausted(Vec<(StrategyKind, StrategyError)>),
}

impl StrategyError {
    /// True when the failure was a time budget being exceeded.
    pub fn is_timeout(&self) -> bool {
        matches!(self, StrategyError::Timeout(_))
    }
}

fn summarize(failures: &[(StrategyKind, StrategyError)]) -> String {
    if failures.is_empty() {
        return "no strategies configured".to_string();
    }
    failures
        .iter()
        .map(|(kind, err)| format!("{}: {}", kind.name(), err))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors raised by the background-worker bridge.
///
/// None of these are fatal for the main preload path; callers log them and
/// continue with the memory cache alone.
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Background worker is disabled")]
    Disabled,

    #[error("Background worker has not been registered")]
    NotRegistered,

    #[error("Worker registration failed: {0}")]
    Registration(String),

    #[error("Worker did not respond within {0:?}")]
    Timeout(Duration),

    #[error("Worker channel closed")]
    ChannelClosed,

    #[error("Worker reported an error: {0}")]
    Worker(String),

    #[error("Unexpected worker response: {0}")]
    UnexpectedResponse(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
}

/// Maximum length for response bodies and messages quoted in errors
const MAX_ERROR_TEXT_LENGTH: usize = 200;

/// Truncate text to avoid logging excessive data
pub(crate) fn truncate_text(text: &str) -> String {
    if text.len() <= MAX_ERROR_TEXT_LENGTH {
        return text.to_string();
    }
    let mut end = MAX_ERROR_TEXT_LENGTH;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... (truncated, {} total bytes)", &text[..end], text.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exhausted_lists_every_strategy() {
        let err = StrategyError::Exhausted(vec![
            (StrategyKind::ElementLoad, StrategyError::Timeout(Duration::from_secs(1))),
            (StrategyKind::Fetch, StrategyError::Status { url: "https://x/a.jpg".into(), status: 404 }),
        ]);
        let msg = err.to_string();
        assert!(msg.contains("element-load: Timed out"));
        assert!(msg.contains("fetch: HTTP status 404"));
    }

    #[test]
    fn test_exhausted_empty_chain() {
        let err = StrategyError::Exhausted(Vec::new());
        assert_eq!(err.to_string(), "All strategies failed: no strategies configured");
    }

    #[test]
    fn test_truncate_text() {
        assert_eq!(truncate_text("short"), "short");
        let long = "é".repeat(300);
        let truncated = truncate_text(&long);
        assert!(truncated.contains("truncated, 600 total bytes"));
    }
}
