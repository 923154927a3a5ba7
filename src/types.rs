//! Core types for swarmshare
//!
//! Identifiers, endpoints, download results and events shared by the
//! tracker, the peer server and the download coordinator.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SwarmError;
use crate::swarm::ChunkRange;

/// Unique identifier for one download run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DownloadId(Uuid);

impl DownloadId {
    /// Create a new random download ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the underlying UUID
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for DownloadId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DownloadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // First 8 bytes are plenty for log lines
        write!(f, "{}", hex::encode(&self.0.as_bytes()[0..8]))
    }
}

/// Network address of a peer server
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PeerEndpoint {
    pub ip: String,
    pub port: u16,
}

impl PeerEndpoint {
    pub fn new(ip: impl Into<String>, port: u16) -> Self {
        Self {
            ip: ip.into(),
            port,
        }
    }

    /// Registry key, `ip:port`
    pub fn key(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }

    /// Address suitable for `TcpStream::connect`
    pub fn socket_addr(&self) -> String {
        if self.ip.contains(':') {
            format!("[{}]:{}", self.ip, self.port)
        } else {
            self.key()
        }
    }
}

impl From<std::net::SocketAddr> for PeerEndpoint {
    fn from(addr: std::net::SocketAddr) -> Self {
        Self::new(addr.ip().to_string(), addr.port())
    }
}

impl fmt::Display for PeerEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.socket_addr())
    }
}

/// Terminal status of a download run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadStatus {
    Finished,
    Failed,
}

/// Outcome of a coordinator run
#[derive(Debug, Clone)]
pub struct DownloadResult {
    pub id: DownloadId,
    pub status: DownloadStatus,
    pub file_name: String,
    /// Reassembled file, present when finished
    pub path: Option<PathBuf>,
    /// Number of full download attempts made (integrity retries included)
    pub attempts: u32,
    pub failure: Option<SwarmError>,
}

impl DownloadResult {
    pub(crate) fn finished(id: DownloadId, file_name: &str, path: PathBuf, attempts: u32) -> Self {
        Self {
            id,
            status: DownloadStatus::Finished,
            file_name: file_name.to_string(),
            path: Some(path),
            attempts,
            failure: None,
        }
    }

    pub(crate) fn failed(
        id: DownloadId,
        file_name: &str,
        attempts: u32,
        error: SwarmError,
    ) -> Self {
        Self {
            id,
            status: DownloadStatus::Failed,
            file_name: file_name.to_string(),
            path: None,
            attempts,
            failure: Some(error),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.status == DownloadStatus::Finished
    }
}

/// Events emitted while downloading
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SwarmEvent {
    /// A download run started
    Started {
        id: DownloadId,
        file_name: String,
        chunk_count: u32,
        peers: usize,
    },
    /// A session began pulling its range
    SessionStarted {
        id: DownloadId,
        peer: PeerEndpoint,
        range: ChunkRange,
    },
    /// A chunk landed in the store
    ChunkReceived {
        id: DownloadId,
        index: u32,
        received: u32,
        total: u32,
    },
    /// A session delivered its whole range
    SessionCompleted {
        id: DownloadId,
        peer: PeerEndpoint,
        range: ChunkRange,
    },
    /// A session gave up
    SessionFailed {
        id: DownloadId,
        peer: PeerEndpoint,
        range: ChunkRange,
        error: String,
    },
    /// Reassembled file is being hashed
    Verifying { id: DownloadId },
    /// Verification failed and the download starts over
    Retrying { id: DownloadId, attempt: u32 },
    /// Download completed successfully
    Completed { id: DownloadId, path: PathBuf },
    /// Download failed
    Failed {
        id: DownloadId,
        error: String,
        retryable: bool,
    },
}

impl SwarmEvent {
    /// The download run this event belongs to
    pub fn id(&self) -> DownloadId {
        match self {
            Self::Started { id, .. }
            | Self::SessionStarted { id, .. }
            | Self::ChunkReceived { id, .. }
            | Self::SessionCompleted { id, .. }
            | Self::SessionFailed { id, .. }
            | Self::Verifying { id }
            | Self::Retrying { id, .. }
            | Self::Completed { id, .. }
            | Self::Failed { id, .. } => *id,
        }
    }
}
