//! Swarm configuration
//!
//! This module contains all configuration options for sharing and
//! downloading files.

use crate::error::{Result, SwarmError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default chunk size (512 KiB)
pub const DEFAULT_CHUNK_SIZE: u64 = 512 * 1024;

/// Main configuration for a swarm participant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwarmConfig {
    /// Directory whose files are offered to other peers
    pub share_dir: PathBuf,

    /// Directory reassembled downloads are written to
    pub download_dir: PathBuf,

    /// Directory holding per-file chunk stores while downloading
    pub chunk_dir: PathBuf,

    /// Chunk size in bytes used when describing and serving files
    pub chunk_size: u64,

    /// Address the peer server listens on
    pub listen_addr: String,

    /// Peer transfer configuration
    #[serde(default)]
    pub transfer: TransferConfig,

    /// Tracker configuration
    #[serde(default)]
    pub tracker: TrackerConfig,
}

/// Peer transfer configuration, shared by the server and download sessions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Connection timeout in seconds
    pub connect_timeout: u64,

    /// Timeout for a single message read or write, in seconds
    pub io_timeout: u64,

    /// Largest accepted wire payload in bytes
    pub max_message_size: usize,

    /// How many times a download is repeated after failing verification
    #[serde(default = "default_integrity_retries")]
    pub integrity_retries: u32,

    /// Capacity of the event broadcast channel
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

/// Tracker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Base URL of the HTTP tracker
    pub url: String,

    /// Request timeout in seconds
    pub timeout: u64,
}

fn default_integrity_retries() -> u32 {
    1
}

fn default_event_capacity() -> usize {
    1024
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            share_dir: PathBuf::from("Share_File"),
            download_dir: PathBuf::from("Downloads"),
            chunk_dir: PathBuf::from("Downloads").join("Chunk_List"),
            chunk_size: DEFAULT_CHUNK_SIZE,
            listen_addr: "0.0.0.0:6881".to_string(),
            transfer: TransferConfig::default(),
            tracker: TrackerConfig::default(),
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            connect_timeout: 10,
            io_timeout: 30,
            max_message_size: 4 * 1024 * 1024,
            integrity_retries: default_integrity_retries(),
            event_capacity: default_event_capacity(),
        }
    }
}

impl TransferConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_secs(self.io_timeout)
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:5000".to_string(),
            timeout: 10,
        }
    }
}

impl SwarmConfig {
    /// Create a new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set shared directory
    pub fn share_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.share_dir = path.into();
        self
    }

    /// Set download directory
    pub fn download_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.download_dir = path.into();
        self
    }

    /// Set chunk store directory
    pub fn chunk_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.chunk_dir = path.into();
        self
    }

    /// Set chunk size
    pub fn chunk_size(mut self, size: u64) -> Self {
        self.chunk_size = size;
        self
    }

    /// Set listen address
    pub fn listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.listen_addr = addr.into();
        self
    }

    /// Set tracker URL
    pub fn tracker_url(mut self, url: impl Into<String>) -> Self {
        self.tracker.url = url.into();
        self
    }

    /// Set per-message I/O timeout in seconds
    pub fn io_timeout(mut self, secs: u64) -> Self {
        self.transfer.io_timeout = secs;
        self
    }

    /// Set integrity retry count
    pub fn integrity_retries(mut self, retries: u32) -> Self {
        self.transfer.integrity_retries = retries;
        self
    }

    /// Set maximum wire payload size
    pub fn max_message_size(mut self, size: usize) -> Self {
        self.transfer.max_message_size = size;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if !self.share_dir.is_dir() {
            return Err(SwarmError::invalid_input(
                "share_dir",
                format!("Path is not a directory: {:?}", self.share_dir),
            ));
        }

        if self.download_dir.exists() && !self.download_dir.is_dir() {
            return Err(SwarmError::invalid_input(
                "download_dir",
                format!("Path is not a directory: {:?}", self.download_dir),
            ));
        }

        if self.chunk_size == 0 {
            return Err(SwarmError::invalid_input("chunk_size", "Must be at least 1"));
        }

        if self.chunk_size > u32::MAX as u64 {
            return Err(SwarmError::invalid_input(
                "chunk_size",
                "Must fit in 32 bits",
            ));
        }

        // A full chunk plus its index header must fit in one message
        if self.chunk_size + 4 > self.transfer.max_message_size as u64 {
            return Err(SwarmError::invalid_input(
                "max_message_size",
                format!(
                    "Must exceed chunk size {} by at least 4 bytes",
                    self.chunk_size
                ),
            ));
        }

        if self.transfer.connect_timeout == 0 || self.transfer.io_timeout == 0 {
            return Err(SwarmError::invalid_input("transfer", "Timeouts must be non-zero"));
        }

        if self.transfer.event_capacity == 0 {
            return Err(SwarmError::invalid_input(
                "event_capacity",
                "Must be at least 1",
            ));
        }

        url::Url::parse(&self.tracker.url)?;

        Ok(())
    }
}
