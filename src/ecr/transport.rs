//! Transport layer for the ECR journal feed.
//!
//! The register only ever talks to us, so the transport is receive-only:
//! [`SerialTransport`] reads the live COM/RS-232 link and [`ReplayTransport`]
//! serves a captured journal file for debugging and tests.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::config::Settings;
use crate::error::{Result, TallyError};

// ---------------------------------------------------------------------------
// Transport state
// ---------------------------------------------------------------------------

/// Connection state for transport layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

// ---------------------------------------------------------------------------
// Transport trait
// ---------------------------------------------------------------------------

/// Byte source for the journal feed.
pub trait EcrTransport: Send {
    /// Establish the connection.
    fn connect(&mut self) -> Result<()>;

    /// Tear down the connection.
    fn disconnect(&mut self);

    /// Receive whatever bytes arrive within `timeout_ms`. An empty vector
    /// means the link was quiet.
    fn receive(&mut self, timeout_ms: u64) -> Result<Vec<u8>>;

    /// Whether the transport is currently connected.
    fn is_connected(&self) -> bool;

    /// Current transport state.
    fn state(&self) -> TransportState;

    /// Human-readable description of the connection target.
    fn description(&self) -> String;

    /// True once a finite source has delivered everything it has.
    fn is_exhausted(&self) -> bool {
        false
    }
}

// ---------------------------------------------------------------------------
// Serial transport
// ---------------------------------------------------------------------------

/// Serial (COM / RS-232 / USB-serial) transport using the `serialport` crate.
pub struct SerialTransport {
    port_name: String,
    baud_rate: u32,
    timeout_ms: u64,
    port: Option<Box<dyn serialport::SerialPort>>,
    state: TransportState,
}

impl SerialTransport {
    pub fn new(port_name: &str, baud_rate: u32, timeout_ms: u64) -> Self {
        Self {
            port_name: port_name.to_string(),
            baud_rate,
            timeout_ms,
            port: None,
            state: TransportState::Disconnected,
        }
    }
}

impl EcrTransport for SerialTransport {
    fn connect(&mut self) -> Result<()> {
        self.state = TransportState::Connecting;
        info!(
            port = %self.port_name,
            baud = self.baud_rate,
            "Opening ECR serial port"
        );

        let port = serialport::new(&self.port_name, self.baud_rate)
            .timeout(Duration::from_millis(self.timeout_ms))
            .open()
            .map_err(|e| {
                self.state = TransportState::Error;
                TallyError::TransportOpen {
                    target: self.description(),
                    reason: e.to_string(),
                }
            })?;

        self.port = Some(port);
        self.state = TransportState::Connected;
        info!(port = %self.port_name, "ECR serial port connected");
        Ok(())
    }

    fn disconnect(&mut self) {
        self.port = None;
        self.state = TransportState::Disconnected;
        info!(port = %self.port_name, "ECR serial port disconnected");
    }

    fn receive(&mut self, timeout_ms: u64) -> Result<Vec<u8>> {
        let description = self.description();
        let port = self
            .port
            .as_mut()
            .ok_or_else(|| TallyError::NotConnected(description.clone()))?;

        port.set_timeout(Duration::from_millis(timeout_ms))
            .map_err(|e| TallyError::TransportRead {
                target: description.clone(),
                source: e.into(),
            })?;

        let mut buf = vec![0u8; 4096];
        match port.read(&mut buf) {
            Ok(n) => {
                buf.truncate(n);
                debug!("Serial RX ({n} bytes): {:02X?}", &buf);
                Ok(buf)
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(Vec::new()),
            Err(e) => {
                self.state = TransportState::Error;
                Err(TallyError::TransportRead {
                    target: description,
                    source: e,
                })
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.state == TransportState::Connected && self.port.is_some()
    }

    fn state(&self) -> TransportState {
        self.state
    }

    fn description(&self) -> String {
        format!("Serial({}@{})", self.port_name, self.baud_rate)
    }
}

// ---------------------------------------------------------------------------
// Replay transport
// ---------------------------------------------------------------------------

/// Serves a captured journal in fixed-size chunks, as if it arrived over the
/// wire, then reports itself exhausted.
pub struct ReplayTransport {
    path: PathBuf,
    chunk_size: usize,
    data: Vec<u8>,
    cursor: usize,
    state: TransportState,
}

impl ReplayTransport {
    pub const DEFAULT_CHUNK: usize = 256;

    pub fn new(path: &Path) -> Self {
        Self::with_chunk_size(path, Self::DEFAULT_CHUNK)
    }

    pub fn with_chunk_size(path: &Path, chunk_size: usize) -> Self {
        Self {
            path: path.to_path_buf(),
            chunk_size: chunk_size.max(1),
            data: Vec::new(),
            cursor: 0,
            state: TransportState::Disconnected,
        }
    }
}

impl EcrTransport for ReplayTransport {
    fn connect(&mut self) -> Result<()> {
        self.state = TransportState::Connecting;
        let data = std::fs::read(&self.path).map_err(|e| {
            self.state = TransportState::Error;
            TallyError::TransportOpen {
                target: self.description(),
                reason: e.to_string(),
            }
        })?;
        self.data = data;
        self.cursor = 0;
        self.state = TransportState::Connected;
        info!(
            path = %self.path.display(),
            bytes = self.data.len(),
            "Replaying captured journal"
        );
        Ok(())
    }

    fn disconnect(&mut self) {
        self.data.clear();
        self.cursor = 0;
        self.state = TransportState::Disconnected;
    }

    fn receive(&mut self, _timeout_ms: u64) -> Result<Vec<u8>> {
        if self.state != TransportState::Connected {
            return Err(TallyError::NotConnected(self.description()));
        }
        let end = (self.cursor + self.chunk_size).min(self.data.len());
        let chunk = self.data[self.cursor..end].to_vec();
        self.cursor = end;
        Ok(chunk)
    }

    fn is_connected(&self) -> bool {
        self.state == TransportState::Connected
    }

    fn state(&self) -> TransportState {
        self.state
    }

    fn description(&self) -> String {
        format!("Replay({})", self.path.display())
    }

    fn is_exhausted(&self) -> bool {
        self.state == TransportState::Connected && self.cursor >= self.data.len()
    }
}

// ---------------------------------------------------------------------------
// Factory
// ---------------------------------------------------------------------------

/// Create the journal transport described by the settings.
pub fn create_transport(settings: &Settings) -> Box<dyn EcrTransport> {
    match &settings.replay {
        Some(path) => Box::new(ReplayTransport::new(path)),
        None => Box::new(SerialTransport::new(
            &settings.serial.port,
            settings.serial.baud_rate,
            settings.serial.timeout_ms,
        )),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
