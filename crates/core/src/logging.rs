//! Logging setup: verbosity resolution plus console and rolling-file sinks.

use std::path::Path;

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

pub const DEFAULT_LOG_FILTER: &str = "info";
/// ffmpeg stderr is mirrored to its own target at debug level; keep it out
/// of normal output unless a filter asks for it explicitly.
pub const DEFAULT_NOISE_FILTER: &str = "ffmpeg_stderr=error";
pub const DEFAULT_LOG_DIR_NAME: &str = "logs";
pub const DEFAULT_LOG_FILE_PREFIX: &str = "clipforge";

/// Resolve the effective filter directive with the precedence:
/// explicit CLI filter > RUST_LOG > -v count > default. The noise filter is
/// appended only when the directive is implicit.
pub fn resolve_log_filter(
    verbose: u8,
    cli_filter: Option<&str>,
    rust_log_env: Option<&str>,
) -> String {
    if let Some(filter) = cli_filter.map(str::trim).filter(|f| !f.is_empty()) {
        return filter.to_string();
    }
    if let Some(env) = rust_log_env.map(str::trim).filter(|f| !f.is_empty()) {
        return env.to_string();
    }

    let base = match verbose {
        0 => DEFAULT_LOG_FILTER,
        1 => "debug",
        _ => "trace",
    };
    format!("{base},{DEFAULT_NOISE_FILTER}")
}

/// Install the global subscriber: a console sink always, plus a
/// daily-rolling file sink under `<data_dir>/logs` when a data directory is
/// given. The returned guard must be held for the lifetime of the process
/// so buffered file output is flushed.
pub fn init(filter: &str, data_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let console_filter =
        EnvFilter::try_new(filter).with_context(|| format!("invalid log filter: {filter}"))?;
    let console_layer = fmt::layer().with_target(true).with_filter(console_filter);

    let mut guard = None;
    let file_layer = match data_dir {
        Some(dir) => {
            let log_dir = dir.join(DEFAULT_LOG_DIR_NAME);
            std::fs::create_dir_all(&log_dir).with_context(|| {
                format!("failed to create log directory: {}", log_dir.display())
            })?;
            let appender =
                rolling::daily(&log_dir, format!("{DEFAULT_LOG_FILE_PREFIX}.log"));
            let (writer, worker_guard) = tracing_appender::non_blocking(appender);
            guard = Some(worker_guard);

            let file_filter = EnvFilter::try_new(filter)
                .with_context(|| format!("invalid log filter: {filter}"))?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_writer(writer)
                    .with_filter(file_filter),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .context("failed to install tracing subscriber")?;

    Ok(guard)
}
