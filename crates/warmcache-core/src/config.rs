//! Preload configuration management.
//!
//! This module handles loading the tuning knobs for the cache: capacity,
//! eviction order, retry budget, timeouts, and the background worker.
//!
//! Configuration is stored at `~/.config/warmcache/config.json`. A missing
//! file means defaults; a few values can be overridden from the environment.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cache::{EvictionPolicy, DEFAULT_MAX_CACHE_SIZE};
use crate::retry::{RetryPolicy, DEFAULT_ATTEMPT_TIMEOUT_SECS, DEFAULT_BASE_DELAY_MS, DEFAULT_MAX_ATTEMPTS};

/// Application name used for config directory paths
const APP_NAME: &str = "warmcache";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Per-strategy execution budget in seconds.
/// 10s fails over to the next strategy well inside one attempt's budget.
const DEFAULT_STRATEGY_TIMEOUT_SECS: u64 = 10;

/// Maximum assets preloaded concurrently within one batch.
/// Matches the per-host connection limit of common browsers.
const DEFAULT_MAX_CONCURRENT_PRELOADS: usize = 6;

/// Worker round-trip timeout in milliseconds.
const DEFAULT_WORKER_REQUEST_TIMEOUT_MS: u64 = 5000;

/// Entries kept in the worker's persistent store.
const DEFAULT_WORKER_STORE_CAPACITY: usize = 200;

const ENV_MAX_CACHE_SIZE: &str = "WARMCACHE_MAX_CACHE_SIZE";
const ENV_MAX_ATTEMPTS: &str = "WARMCACHE_MAX_ATTEMPTS";
const ENV_WORKER_SCRIPT: &str = "WARMCACHE_WORKER_SCRIPT";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreloadConfig {
    pub max_cache_size: usize,
    pub eviction: EvictionPolicy,
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub attempt_timeout_secs: u64,
    pub strategy_timeout_secs: u64,
    pub max_concurrent_preloads: usize,
    pub worker: WorkerConfig,
}

impl Default for PreloadConfig {
    fn default() -> Self {
        Self {
            max_cache_size: DEFAULT_MAX_CACHE_SIZE,
            eviction: EvictionPolicy::default(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            attempt_timeout_secs: DEFAULT_ATTEMPT_TIMEOUT_SECS,
            strategy_timeout_secs: DEFAULT_STRATEGY_TIMEOUT_SECS,
            max_concurrent_preloads: DEFAULT_MAX_CONCURRENT_PRELOADS,
            worker: WorkerConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub enabled: bool,
    /// Script resource validated before the worker is registered
    pub script_url: Option<String>,
    pub request_timeout_ms: u64,
    pub allowed_script_types: Vec<String>,
    pub store_capacity: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            script_url: None,
            request_timeout_ms: DEFAULT_WORKER_REQUEST_TIMEOUT_MS,
            allowed_script_types: vec![
                "application/javascript".to_string(),
                "text/javascript".to_string(),
                "application/x-javascript".to_string(),
            ],
            store_capacity: DEFAULT_WORKER_STORE_CAPACITY,
        }
    }
}

impl WorkerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl PreloadConfig {
    /// Load from the default location, falling back to defaults.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let mut config = if path.exists() {
            Self::load_from(&path)?
        } else {
            debug!(?path, "No config file, using defaults");
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Write the configuration as pretty JSON, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {}", parent.display()))?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        debug!(path = %path.display(), "Saved config");
        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Apply `WARMCACHE_*` environment overrides. Unparseable values are
    /// ignored with a warning.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(value) = lookup(ENV_MAX_CACHE_SIZE) {
            match value.parse() {
                Ok(size) => self.max_cache_size = size,
                Err(e) => warn!(var = ENV_MAX_CACHE_SIZE, value = %value, error = %e, "Ignoring invalid override"),
            }
        }
        if let Some(value) = lookup(ENV_MAX_ATTEMPTS) {
            match value.parse() {
                Ok(attempts) => self.max_attempts = attempts,
                Err(e) => warn!(var = ENV_MAX_ATTEMPTS, value = %value, error = %e, "Ignoring invalid override"),
            }
        }
        if let Some(value) = lookup(ENV_WORKER_SCRIPT) {
            if !value.trim().is_empty() {
                self.worker.script_url = Some(value.trim().to_string());
            }
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            Duration::from_millis(self.base_delay_ms),
            Duration::from_secs(self.attempt_timeout_secs),
        )
    }

    pub fn strategy_timeout(&self) -> Duration {
        Duration::from_secs(self.strategy_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: PreloadConfig = serde_json::from_str(r#"{"max_cache_size": 2, "eviction": "lru"}"#).unwrap();
        assert_eq!(config.max_cache_size, 2);
        assert_eq!(config.eviction, EvictionPolicy::Lru);
        assert_eq!(config.max_attempts, DEFAULT_MAX_ATTEMPTS);
        assert!(config.worker.enabled);
        assert_eq!(config.worker.request_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            (ENV_MAX_CACHE_SIZE, "12"),
            (ENV_MAX_ATTEMPTS, "many"),
            (ENV_WORKER_SCRIPT, " https://x/sw.js "),
        ]
        .into_iter()
        .collect();

        let mut config = PreloadConfig::default();
        config.apply_overrides(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.max_cache_size, 12);
        assert_eq!(config.max_attempts, DEFAULT_MAX_ATTEMPTS);
        assert_eq!(config.worker.script_url.as_deref(), Some("https://x/sw.js"));
    }

    #[test]
    fn test_save_then_load_round_trips() {
        let dir = std::env::temp_dir().join(format!("warmcache-config-{}", std::process::id()));
        let path = dir.join("nested").join(CONFIG_FILE);
        let config = PreloadConfig {
            max_cache_size: 7,
            eviction: EvictionPolicy::Lru,
            ..PreloadConfig::default()
        };

        config.save_to(&path).unwrap();
        let loaded = PreloadConfig::load_from(&path).unwrap();
        std::fs::remove_dir_all(&dir).unwrap();

        assert_eq!(loaded.max_cache_size, 7);
        assert_eq!(loaded.eviction, EvictionPolicy::Lru);
        assert_eq!(loaded.worker.store_capacity, DEFAULT_WORKER_STORE_CAPACITY);
    }

    #[test]
    fn test_load_from_reports_bad_json() {
        let path = std::env::temp_dir().join(format!("warmcache-bad-{}.json", std::process::id()));
        std::fs::write(&path, "{ not json").unwrap();
        let err = PreloadConfig::load_from(&path).unwrap_err();
        std::fs::remove_file(&path).unwrap();
        assert!(err.to_string().contains("Failed to parse config file"));
    }

    #[test]
    fn test_retry_policy_from_config() {
        let config = PreloadConfig {
            max_attempts: 0,
            base_delay_ms: 250,
            ..PreloadConfig::default()
        };
        let policy = config.retry_policy();
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.base_delay, Duration::from_millis(250));
    }
}
