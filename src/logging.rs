//! Logging setup for the CLI and the daemon.
//!
//! Uses tracing with an `EnvFilter` read from `TIDYDRIVE_LOG`:
//! - `TIDYDRIVE_LOG=debug` for verbose output
//! - `TIDYDRIVE_LOG=info` for standard output (default)
//! - `TIDYDRIVE_LOG=warn` / `error` to quiet things down

use anyhow::Result;
use std::path::PathBuf;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize logging to stderr (CLI runs).
pub fn init() -> Result<()> {
    let env_filter =
        EnvFilter::try_from_env("TIDYDRIVE_LOG").unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    Ok(())
}

/// Initialize logging to a daily-rolling file (daemon runs).
pub fn init_with_file(log_dir: PathBuf) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_env("TIDYDRIVE_LOG").unwrap_or_else(|_| EnvFilter::new("info"));

    std::fs::create_dir_all(&log_dir)?;

    let file_appender = tracing_appender::rolling::daily(&log_dir, "tidydrive.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    // Store the guard in a static to prevent it from being dropped
    // This is safe because we only call init once at startup
    static GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
        std::sync::OnceLock::new();
    let _ = GUARD.set(_guard);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .init();

    tracing::info!("Logging initialized with file backend at {:?}", log_dir);
    Ok(())
}
