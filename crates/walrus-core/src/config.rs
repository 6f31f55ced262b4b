//! Runtime configuration.
//!
//! Configuration is read from a TOML file. Every field has a default, so an
//! empty file (or no file at all) yields a working configuration.
//!
//! ```toml
//! [manager]
//! handshake_timeout_ms = 3000
//! poll_interval_ms = 1000
//! event_capacity = 64
//!
//! [session]
//! read_chunk_size = 512
//! stall_threshold = 4096
//!
//! [serial]
//! baud_rate = 115200
//! ```

use crate::constants::{
    DEFAULT_BAUD_RATE, DEFAULT_EVENT_CAPACITY, DEFAULT_HANDSHAKE_TIMEOUT_MS,
    DEFAULT_POLL_INTERVAL_MS, DEFAULT_READ_CHUNK_SIZE, DEFAULT_STALL_THRESHOLD,
};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalrusConfig {
    #[serde(default)]
    pub manager: ManagerConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub serial: SerialConfig,
}

impl WalrusConfig {
    /// Load and validate configuration from a TOML file.
    ///
    /// # Errors
    /// Returns `Error::Io` if the file cannot be read, `Error::ConfigParse` if
    /// it is not valid TOML, and `Error::Config` if a value is out of range.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from a TOML string.
    ///
    /// # Errors
    /// Returns `Error::ConfigParse` on malformed TOML and `Error::Config` if a
    /// value is out of range.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: WalrusConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges.
    ///
    /// # Errors
    /// Returns `Error::Config` naming the first offending key.
    pub fn validate(&self) -> Result<()> {
        if self.manager.handshake_timeout_ms == 0 {
            return Err(Error::Config(
                "manager.handshake_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if self.manager.poll_interval_ms == 0 {
            return Err(Error::Config(
                "manager.poll_interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.manager.event_capacity == 0 {
            return Err(Error::Config(
                "manager.event_capacity must be greater than 0".to_string(),
            ));
        }
        if self.session.read_chunk_size == 0 {
            return Err(Error::Config(
                "session.read_chunk_size must be greater than 0".to_string(),
            ));
        }
        if self.session.stall_threshold == 0 {
            return Err(Error::Config(
                "session.stall_threshold must be greater than 0".to_string(),
            ));
        }
        if self.serial.baud_rate == 0 {
            return Err(Error::Config(
                "serial.baud_rate must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Device manager settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// Bound on the connect handshake of a newly attached reader.
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_ms: u64,

    /// Hotplug monitor enumeration interval.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Connectivity event channel capacity.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl ManagerConfig {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            handshake_timeout_ms: default_handshake_timeout(),
            poll_interval_ms: default_poll_interval(),
            event_capacity: default_event_capacity(),
        }
    }
}

/// Serial session settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Bytes requested per channel read.
    #[serde(default = "default_read_chunk_size")]
    pub read_chunk_size: usize,

    /// Buffered bytes at which a timed-out receive reports a framing stall.
    #[serde(default = "default_stall_threshold")]
    pub stall_threshold: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            read_chunk_size: default_read_chunk_size(),
            stall_threshold: default_stall_threshold(),
        }
    }
}

/// Serial port settings for the hardware transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialConfig {
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            baud_rate: default_baud_rate(),
        }
    }
}

fn default_handshake_timeout() -> u64 {
    DEFAULT_HANDSHAKE_TIMEOUT_MS
}

fn default_poll_interval() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

fn default_event_capacity() -> usize {
    DEFAULT_EVENT_CAPACITY
}

fn default_read_chunk_size() -> usize {
    DEFAULT_READ_CHUNK_SIZE
}

fn default_stall_threshold() -> usize {
    DEFAULT_STALL_THRESHOLD
}

fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}
