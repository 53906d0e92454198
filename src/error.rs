//! Error type shared by every fallible operation in the crate.
//!
//! Parse anomalies in the ECR feed are never errors: they are logged and the
//! line is dropped. Everything here is either fatal at startup, fatal for the
//! running loop (the supervisor restarts us), or an update failure that the
//! station logs and retries on the next idle cycle.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum TallyError {
    #[error("failed to read config {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid setting: {0}")]
    InvalidSetting(String),

    #[error("failed to read PLU registry {path}: {source}")]
    PluRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("PLU registry {0} contains no product codes")]
    EmptyPluRegistry(PathBuf),

    #[error("failed to read shop map {path}: {source}")]
    ShopMap {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("failed to open {target}: {reason}")]
    TransportOpen { target: String, reason: String },

    #[error("read from {target} failed: {source}")]
    TransportRead {
        target: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{0} is not connected")]
    NotConnected(String),

    #[error("failed to write hourly output {path}: {source}")]
    Output {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("update check failed: {0}")]
    Update(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = TallyError> = std::result::Result<T, E>;
