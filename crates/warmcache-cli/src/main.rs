//! Warmcache CLI - preload assets and report cache health from the shell.
//!
//! Usage:
//!   warmcache [--config <path>] [--no-worker] [--log-file <path>] <command>
//!
//! Commands:
//!   preload <url|@file>...   warm the given URLs (`@file` reads one URL per line)
//!   measure <url>            time a single load and report the cache-hit signal
//!   stats                    print the initial cache counters and settings
//!   init-config              write a default config file (to `--config` if given)

use std::io;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde_json::json;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use warmcache_core::{CacheWatch, ImageCache, PreloadConfig};

// ============================================================================
// Arguments
// ============================================================================

const USAGE: &str = "usage: warmcache [--config <path>] [--no-worker] [--log-file <path>] <preload <url|@file>... | measure <url> | stats | init-config>";

#[derive(Debug, PartialEq)]
enum Command {
    Preload(Vec<String>),
    Measure(String),
    Stats,
    InitConfig,
}

#[derive(Debug, PartialEq)]
struct Args {
    config: Option<PathBuf>,
    no_worker: bool,
    log_file: Option<PathBuf>,
    command: Command,
}

fn parse_args(args: &[String]) -> Result<Args> {
    let mut config = None;
    let mut no_worker = false;
    let mut log_file = None;
    let mut rest = Vec::new();

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" => {
                let path = iter.next().context("--config needs a path")?;
                config = Some(PathBuf::from(path));
            }
            "--log-file" => {
                let path = iter.next().context("--log-file needs a path")?;
                log_file = Some(PathBuf::from(path));
            }
            "--no-worker" => no_worker = true,
            _ => rest.push(arg.clone()),
        }
    }

    let mut rest = rest.into_iter();
    let command = match rest.next().as_deref() {
        Some("preload") => {
            let targets: Vec<String> = rest.collect();
            if targets.is_empty() {
                bail!("preload needs at least one URL\n{}", USAGE);
            }
            Command::Preload(targets)
        }
        Some("measure") => match (rest.next(), rest.next()) {
            (Some(url), None) => Command::Measure(url),
            _ => bail!("measure takes exactly one URL\n{}", USAGE),
        },
        Some("stats") => Command::Stats,
        Some("init-config") => Command::InitConfig,
        Some(other) => bail!("unknown command '{}'\n{}", other, USAGE),
        None => bail!("{}", USAGE),
    };

    Ok(Args {
        config,
        no_worker,
        log_file,
        command,
    })
}

/// Expand `@file` arguments into the URLs listed in the file.
fn expand_targets(targets: &[String]) -> Result<Vec<String>> {
    let mut urls = Vec::new();
    for target in targets {
        match target.strip_prefix('@') {
            Some(path) => {
                let contents = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read URL list: {}", path))?;
                urls.extend(
                    contents
                        .lines()
                        .map(str::trim)
                        .filter(|line| !line.is_empty() && !line.starts_with('#'))
                        .map(str::to_string),
                );
            }
            None => urls.push(target.clone()),
        }
    }
    Ok(urls)
}

// ============================================================================
// Logging
// ============================================================================

/// Initialize the tracing subscriber for logging
fn init_tracing(log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    match log_file {
        Some(path) => {
            let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
            let name = path
                .file_name()
                .with_context(|| format!("Invalid log file path: {}", path.display()))?;
            let appender = tracing_appender::rolling::never(dir, name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(writer).with_ansi(false))
                .with(filter)
                .init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(io::stderr))
                .with(filter)
                .init();
            Ok(None)
        }
    }
}

// ============================================================================
// Commands
// ============================================================================

fn load_config(args: &Args) -> Result<PreloadConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let mut config = PreloadConfig::load_from(path)?;
            config.apply_env_overrides();
            config
        }
        None => PreloadConfig::load()?,
    };
    if args.no_worker {
        config.worker.enabled = false;
    }
    Ok(config)
}

async fn run_preload(cache: ImageCache, targets: &[String]) -> Result<()> {
    let urls = expand_targets(targets)?;
    let watch = CacheWatch::new(cache);
    watch.initialize().await;

    let report = watch.preload_images(&urls).await;
    let output = json!({
        "report": report,
        "stats": watch.current().stats,
        "detailed": watch.cache().detailed_stats(),
    });
    println!("{}", serde_json::to_string_pretty(&output)?);

    if !report.failed.is_empty() {
        eprintln!("{} of {} asset(s) failed", report.failed.len(), report.total());
    }
    Ok(())
}

async fn run_measure(cache: ImageCache, url: &str) -> Result<()> {
    let metrics = cache
        .measure_load_performance(url)
        .await
        .with_context(|| format!("Failed to measure {}", url))?;
    println!("{}", serde_json::to_string_pretty(&metrics)?);
    Ok(())
}

fn run_stats(cache: &ImageCache) -> Result<()> {
    let config = cache.config();
    let output = json!({
        "stats": cache.cache_stats(),
        "detailed": cache.detailed_stats(),
        "max_cache_size": config.max_cache_size,
        "eviction": config.eviction,
        "max_attempts": config.max_attempts,
        "worker_enabled": config.worker.enabled,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

/// Write a fresh default config, refusing to overwrite an existing file.
fn run_init_config(args: &Args) -> Result<PathBuf> {
    let path = match &args.config {
        Some(path) => path.clone(),
        None => PreloadConfig::config_path()?,
    };
    if path.exists() {
        bail!("Config file already exists: {}", path.display());
    }

    let mut config = PreloadConfig::default();
    if args.no_worker {
        config.worker.enabled = false;
    }
    config.save_to(&path)?;
    Ok(path)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let raw: Vec<String> = std::env::args().skip(1).collect();
    let args = parse_args(&raw)?;

    // Keep the guard alive so buffered log lines are flushed on exit
    let _guard = init_tracing(args.log_file.as_deref())?;
    info!("Warmcache starting");

    if args.command == Command::InitConfig {
        let path = run_init_config(&args)?;
        println!("{}", path.display());
        return Ok(());
    }

    let config = load_config(&args)?;
    let cache = ImageCache::new(config)?;

    match &args.command {
        Command::Preload(targets) => run_preload(cache, targets).await?,
        Command::Measure(url) => run_measure(cache, url).await?,
        Command::Stats => run_stats(&cache)?,
        Command::InitConfig => {}
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_preload_with_flags() {
        let parsed = parse_args(&args(&[
            "--no-worker",
            "preload",
            "https://x/a.png",
            "--config",
            "cfg.json",
            "@urls.txt",
        ]))
        .unwrap();

        assert!(parsed.no_worker);
        assert_eq!(parsed.config, Some(PathBuf::from("cfg.json")));
        assert_eq!(
            parsed.command,
            Command::Preload(args(&["https://x/a.png", "@urls.txt"]))
        );
    }

    #[test]
    fn test_parse_rejects_bad_commands() {
        assert!(parse_args(&args(&[])).is_err());
        assert!(parse_args(&args(&["preload"])).is_err());
        assert!(parse_args(&args(&["measure", "a", "b"])).is_err());
        assert!(parse_args(&args(&["frobnicate"])).is_err());
        assert!(parse_args(&args(&["stats", "--log-file"])).is_err());
    }

    #[test]
    fn test_init_config_writes_loadable_defaults() {
        let dir = std::env::temp_dir().join(format!("warmcache-init-{}", std::process::id()));
        let path = dir.join("config.json");
        let parsed = parse_args(&args(&["--no-worker", "--config", &path.display().to_string(), "init-config"])).unwrap();
        assert_eq!(parsed.command, Command::InitConfig);

        assert_eq!(run_init_config(&parsed).unwrap(), path);
        let loaded = PreloadConfig::load_from(&path).unwrap();
        assert!(!loaded.worker.enabled);
        assert_eq!(loaded.max_cache_size, PreloadConfig::default().max_cache_size);

        // Existing files are left alone
        assert!(run_init_config(&parsed).is_err());
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_expand_targets_reads_url_lists() {
        let path = std::env::temp_dir().join(format!("warmcache-urls-{}.txt", std::process::id()));
        std::fs::write(&path, "https://x/a.png\n\n# comment\n  https://x/b.png  \n").unwrap();

        let targets = vec![format!("@{}", path.display()), "https://x/c.png".to_string()];
        let urls = expand_targets(&targets).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(urls, args(&["https://x/a.png", "https://x/b.png", "https://x/c.png"]));
    }
}
