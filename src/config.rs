//! Runtime configuration.
//!
//! Settings come from a JSON file (camelCase keys, every field optional) and
//! a handful of command-line overrides. A missing file means "run with
//! defaults"; a file that exists but does not parse is fatal.

use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use crate::error::{Result, TallyError};

pub const DEFAULT_CONFIG_FILE: &str = "tally.json";

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SerialSettings {
    /// Port name (e.g. "/dev/ttyUSB0", "COM3").
    pub port: String,
    pub baud_rate: u32,
    /// Read timeout per poll, in milliseconds.
    pub timeout_ms: u64,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".into(),
            baud_rate: 9600,
            timeout_ms: 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ShopSettings {
    /// `id,name` rows used to resolve the output file identifier.
    pub map_file: PathBuf,
    /// Overrides the host name used for shop resolution.
    pub hostname: Option<String>,
}

impl Default for ShopSettings {
    fn default() -> Self {
        Self {
            map_file: PathBuf::from("shops.csv"),
            hostname: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UpdateSettings {
    /// Location of the candidate binary. Updates are disabled when unset.
    pub url: Option<String>,
    pub check_interval_secs: u64,
    pub timeout_secs: u64,
}

impl Default for UpdateSettings {
    fn default() -> Self {
        Self {
            url: None,
            check_interval_secs: 900,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    pub serial: SerialSettings,
    pub plu_file: PathBuf,
    pub shop: ShopSettings,
    pub output_dir: PathBuf,
    pub log_dir: PathBuf,
    /// First trading hour (inclusive, 0-23).
    pub opening_hour: u32,
    /// Last trading hour (inclusive, 0-23).
    pub closing_hour: u32,
    pub poll_interval_ms: u64,
    /// Ingest regardless of business hours and take hour boundaries from
    /// header timestamps only.
    pub debug: bool,
    pub update: UpdateSettings,
    /// Captured journal to replay instead of the serial port.
    #[serde(skip)]
    pub replay: Option<PathBuf>,
    /// File these settings were read from; `None` when running on defaults.
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            serial: SerialSettings::default(),
            plu_file: PathBuf::from("plu.txt"),
            shop: ShopSettings::default(),
            output_dir: PathBuf::from("output"),
            log_dir: PathBuf::from("logs"),
            opening_hour: 7,
            closing_hour: 22,
            poll_interval_ms: 250,
            debug: false,
            update: UpdateSettings::default(),
            replay: None,
            source: None,
        }
    }
}

impl Settings {
    /// Load settings from `path`, falling back to defaults if it does not
    /// exist. Runs before logging is up; callers report [`Settings::source`].
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path).map_err(|source| TallyError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        let mut settings: Self =
            serde_json::from_str(&raw).map_err(|source| TallyError::ConfigParse {
                path: path.to_path_buf(),
                source,
            })?;
        settings.source = Some(path.to_path_buf());
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.opening_hour > 23 || self.closing_hour > 23 {
            return Err(TallyError::InvalidSetting(format!(
                "business hours must be 0-23 (got {}-{})",
                self.opening_hour, self.closing_hour
            )));
        }
        if self.opening_hour > self.closing_hour {
            return Err(TallyError::InvalidSetting(format!(
                "openingHour {} is after closingHour {}",
                self.opening_hour, self.closing_hour
            )));
        }
        if self.serial.baud_rate == 0 {
            return Err(TallyError::InvalidSetting("serial.baudRate must be > 0".into()));
        }
        if self.serial.port.trim().is_empty() && self.replay.is_none() {
            return Err(TallyError::InvalidSetting("serial.port is empty".into()));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Command line
// ---------------------------------------------------------------------------

/// Tally an ECR journal feed into hourly CSV rows.
#[derive(Debug, Parser)]
#[command(name = "ecr-tally", version)]
pub struct Cli {
    /// JSON settings file.
    #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    /// Ingest outside business hours; hours follow header timestamps only.
    #[arg(long)]
    pub debug: bool,

    /// Serial port, overriding serial.port from the settings file.
    #[arg(long)]
    pub port: Option<String>,

    /// Replay a captured journal file instead of reading the serial port.
    #[arg(long, value_name = "CAPTURE")]
    pub replay: Option<PathBuf>,
}

impl Cli {
    /// Load the settings file and apply command-line overrides.
    pub fn into_settings(self) -> Result<Settings> {
        let mut settings = Settings::load(&self.config)?;
        if self.debug {
            settings.debug = true;
        }
        if let Some(port) = self.port {
            settings.serial.port = port;
        }
        if let Some(replay) = self.replay {
            settings.replay = Some(replay);
            settings.debug = true;
        }
        settings.validate()?;
        Ok(settings)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
