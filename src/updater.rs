//! Self-update.
//!
//! While the shop is closed the station periodically fetches the published
//! binary and compares it byte-for-byte with the running one. A different
//! artifact is staged next to the executable, renamed over it, and the
//! process is restarted with the same arguments. Any failure just means "no
//! update this time"; the next idle interval retries.

use chrono::{Duration as ChronoDuration, NaiveDateTime};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::UpdateSettings;
use crate::error::{Result, TallyError};

/// Where candidate artifacts come from.
pub trait UpdateSource {
    fn fetch(&self) -> Result<Vec<u8>>;

    fn description(&self) -> String;
}

/// Fetches the artifact over HTTP(S).
pub struct HttpUpdateSource {
    url: String,
    client: reqwest::blocking::Client,
}

impl HttpUpdateSource {
    pub fn new(url: &str, timeout_secs: u64) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(|e| TallyError::Update(format!("update client: {e}")))?;
        Ok(Self {
            url: url.to_string(),
            client,
        })
    }
}

impl UpdateSource for HttpUpdateSource {
    fn fetch(&self) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .map_err(|e| TallyError::Update(format!("request {}: {e}", self.url)))?;
        let status = response.status();
        if !status.is_success() {
            return Err(TallyError::Update(format!("{} returned {status}", self.url)));
        }
        let body = response
            .bytes()
            .map_err(|e| TallyError::Update(format!("download {}: {e}", self.url)))?;
        Ok(body.to_vec())
    }

    fn description(&self) -> String {
        self.url.clone()
    }
}

/// One year; longer intervals are clamped.
const MAX_INTERVAL_SECS: u64 = 365 * 24 * 60 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    UpToDate,
    /// The artifact on disk was replaced; the process should restart.
    Replaced,
}

pub struct Updater {
    source: Box<dyn UpdateSource>,
    target: PathBuf,
    interval: ChronoDuration,
    last_check: Option<NaiveDateTime>,
}

impl Updater {
    pub fn new(source: Box<dyn UpdateSource>, target: &Path, interval_secs: u64) -> Self {
        Self {
            source,
            target: target.to_path_buf(),
            interval: ChronoDuration::seconds(interval_secs.min(MAX_INTERVAL_SECS) as i64),
            last_check: None,
        }
    }

    /// Updater for the running executable, or `None` when no URL is set.
    pub fn from_settings(settings: &UpdateSettings) -> Result<Option<Self>> {
        let Some(url) = settings.url.as_deref() else {
            return Ok(None);
        };
        let source = HttpUpdateSource::new(url, settings.timeout_secs)?;
        let target = std::env::current_exe()?;
        Ok(Some(Self::new(
            Box::new(source),
            &target,
            settings.check_interval_secs,
        )))
    }

    pub fn is_due(&self, now: NaiveDateTime) -> bool {
        self.last_check
            .map_or(true, |last| now - last >= self.interval)
    }

    /// Check if due. Returns `None` when not due or when the check failed.
    pub fn poll(&mut self, now: NaiveDateTime) -> Option<UpdateOutcome> {
        if !self.is_due(now) {
            return None;
        }
        self.last_check = Some(now);
        match self.check() {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                warn!(source = %self.source.description(), error = %e, "Update check failed");
                None
            }
        }
    }

    /// Fetch, compare, and replace if different.
    pub fn check(&self) -> Result<UpdateOutcome> {
        let candidate = self.source.fetch()?;
        if candidate.is_empty() {
            return Err(TallyError::Update(format!(
                "{} served an empty artifact",
                self.source.description()
            )));
        }
        let current = std::fs::read(&self.target)?;
        if candidate == current {
            info!(target = %self.target.display(), "Binary is up to date");
            return Ok(UpdateOutcome::UpToDate);
        }
        replace_artifact(&self.target, &candidate)?;
        info!(
            target = %self.target.display(),
            bytes = candidate.len(),
            "Binary replaced"
        );
        Ok(UpdateOutcome::Replaced)
    }
}

/// Stage `bytes` beside `target`, carry over its permissions, and rename
/// the staged file over it.
fn replace_artifact(target: &Path, bytes: &[u8]) -> Result<()> {
    let mut staged_name = target
        .file_name()
        .map(|n| n.to_os_string())
        .ok_or_else(|| TallyError::Update(format!("{} has no file name", target.display())))?;
    staged_name.push(".new");
    let staged = target.with_file_name(staged_name);

    std::fs::write(&staged, bytes)?;
    let permissions = std::fs::metadata(target)?.permissions();
    std::fs::set_permissions(&staged, permissions)?;
    if let Err(e) = std::fs::rename(&staged, target) {
        let _ = std::fs::remove_file(&staged);
        return Err(e.into());
    }
    Ok(())
}

/// Start a fresh copy of this executable with the same arguments. The
/// caller exits afterwards.
pub fn restart_process() -> Result<()> {
    let exe = std::env::current_exe()?;
    let args: Vec<String> = std::env::args().skip(1).collect();
    info!(exe = %exe.display(), "Restarting after update");
    Command::new(&exe).args(&args).spawn()?;
    Ok(())
}
