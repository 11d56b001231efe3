//! Warmcache - asset preloading with a bounded in-memory cache.
//!
//! This crate warms image and media assets ahead of use. Each asset is tried
//! through an ordered chain of loading strategies under a retry policy,
//! concurrent requests for the same URL share one attempt, and successes land
//! in a bounded memory cache. An optional background worker keeps its own
//! persistent store in step, reached only through message passing.

pub mod asset;
pub mod cache;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod inflight;
pub mod reactive;
pub mod retry;
pub mod strategy;
pub mod worker;

pub use asset::{AssetHandle, AssetUrl};
pub use cache::{CacheEntry, EvictionPolicy};
pub use config::{PreloadConfig, WorkerConfig};
pub use coordinator::{CacheStats, DetailedCacheStats, ImageCache, ImageCacheBuilder, PreloadReport};
pub use error::{BridgeError, PreloadError, StrategyError};
pub use inflight::{PreloadOutcome, PreloadState, RetryRecord};
pub use reactive::{CacheView, CacheWatch};
pub use retry::RetryPolicy;
pub use strategy::{HintRegistry, PreloadStrategy, StrategyChain, StrategyKind};
pub use worker::{LoadMetrics, WorkerBridge, WorkerEvent, WorkerState};
