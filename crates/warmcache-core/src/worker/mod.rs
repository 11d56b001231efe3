//! Background-worker bridge.
//!
//! This module provides an optional, best-effort channel to a worker that
//! keeps its own store of warmed assets:
//!
//! - `protocol`: request/response messages and lifecycle states
//! - `runtime`: the worker task and its bounded store
//! - `bridge`: registration, timed request correlation, update detection
//! - `perf`: per-asset load timing
//!
//! Nothing here is required for preloading; when registration fails the
//! cache keeps working from memory alone.

pub mod bridge;
pub mod perf;
pub mod protocol;
pub mod runtime;

pub use bridge::WorkerBridge;
pub use perf::{LoadMetrics, PerformanceMonitor};
pub use protocol::{WorkerCacheStatus, WorkerEnvelope, WorkerEvent, WorkerReply, WorkerRequest, WorkerResponse, WorkerState};
pub use runtime::{BackgroundWorker, WorkerStore, WORKER_CACHE_NAME};
