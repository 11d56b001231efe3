//! Messages exchanged with the background worker.
//!
//! The protocol is internal and carries no stability guarantee. Requests are
//! tagged by message type; an envelope without an id expects no reply.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerRequest {
    PreloadAssets { urls: Vec<String> },
    ClearCache,
    GetCacheStatus,
    SkipWaiting,
}

impl WorkerRequest {
    pub fn name(&self) -> &'static str {
        match self {
            WorkerRequest::PreloadAssets { .. } => "PRELOAD_ASSETS",
            WorkerRequest::ClearCache => "CLEAR_CACHE",
            WorkerRequest::GetCacheStatus => "GET_CACHE_STATUS",
            WorkerRequest::SkipWaiting => "SKIP_WAITING",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerResponse {
    Preloaded { cached: usize, failed: usize },
    Cleared { removed: usize },
    Status(WorkerCacheStatus),
    Ack,
    Error { message: String },
}

/// Aggregate view of the worker's persistent store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerCacheStatus {
    pub cache_name: String,
    pub entries: usize,
    pub total_bytes: u64,
    pub capacity: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerEnvelope {
    /// Correlation id; `None` for fire-and-forget messages
    pub id: Option<u64>,
    pub request: WorkerRequest,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerReply {
    pub id: u64,
    pub response: WorkerResponse,
}

/// Worker lifecycle, in the order a worker moves through it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    Installing,
    Installed,
    Activating,
    Activated,
    Redundant,
}

/// Notifications raised by the bridge to interested listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    StateChanged(WorkerState),
    /// A new worker is installed and waiting; activation is left to the caller.
    UpdateAvailable,
    ControllerChanged,
}
