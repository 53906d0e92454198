//! Diagnostics for the tally station.
//!
//! Provides:
//! - **Build info**: version, build timestamp, git SHA, platform
//! - **Logging**: console plus daily rolling file, filtered by `RUST_LOG`
//! - **Log rotation**: keeps the newest `MAX_LOG_FILES` log files

use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::Result;

/// Maximum number of log files to retain.
pub const MAX_LOG_FILES: usize = 10;

/// File name prefix of the rolling log (`tally.YYYY-MM-DD`).
pub const LOG_FILE_PREFIX: &str = "tally";

const DEFAULT_FILTER: &str = "info,ecr_tally=debug";

// ---------------------------------------------------------------------------
// Build info
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildInfo {
    pub version: &'static str,
    pub build_timestamp: &'static str,
    pub git_sha: &'static str,
    pub platform: &'static str,
    pub arch: &'static str,
}

impl BuildInfo {
    pub fn current() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION"),
            build_timestamp: env!("BUILD_TIMESTAMP"),
            git_sha: env!("BUILD_GIT_SHA"),
            platform: std::env::consts::OS,
            arch: std::env::consts::ARCH,
        }
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

/// Install the global subscriber. The returned guard flushes the file writer
/// on drop and must live until the process exits.
pub fn init_logging(log_dir: &Path) -> Result<WorkerGuard> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    fs::create_dir_all(log_dir)?;
    prune_old_logs(log_dir);

    let file_appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true);
    let console_layer = fmt::layer().with_target(true);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    Ok(guard)
}

// ---------------------------------------------------------------------------
// Log rotation
// ---------------------------------------------------------------------------

fn is_log_file(name: &str) -> bool {
    name == LOG_FILE_PREFIX
        || name
            .strip_prefix(LOG_FILE_PREFIX)
            .is_some_and(|rest| rest.starts_with('.'))
}

/// Prune old log files in `log_dir`, keeping only the most recent
/// `MAX_LOG_FILES`.
pub fn prune_old_logs(log_dir: &Path) {
    let Ok(entries) = fs::read_dir(log_dir) else {
        return;
    };

    let mut log_files: Vec<(PathBuf, std::time::SystemTime)> = entries
        .flatten()
        .filter(|entry| entry.path().is_file())
        .filter(|entry| entry.file_name().to_str().is_some_and(is_log_file))
        .map(|entry| {
            let modified = entry
                .metadata()
                .ok()
                .and_then(|m| m.modified().ok())
                .unwrap_or(std::time::UNIX_EPOCH);
            (entry.path(), modified)
        })
        .collect();

    // Newest first; daily names sort by date when mtimes tie
    log_files.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| b.0.cmp(&a.0)));

    for (path, _) in log_files.iter().skip(MAX_LOG_FILES) {
        if let Err(e) = fs::remove_file(path) {
            warn!("Failed to prune log file {}: {e}", path.display());
        }
    }
}
