//! Tracker
//!
//! Peers announce which files they share; downloaders ask which peers
//! hold a file. Payload never passes through the tracker.

#[cfg(feature = "http-tracker")]
pub mod client;
pub mod registry;

#[cfg(feature = "http-tracker")]
pub use client::TrackerClient;
pub use registry::{PeerRecord, TrackerRegistry};

use async_trait::async_trait;

use crate::descriptor::ContentHash;
use crate::error::Result;
use crate::types::PeerEndpoint;

/// A file offered by an announcing peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnouncedFile {
    pub name: String,
    pub content_hash: Option<ContentHash>,
}

impl AnnouncedFile {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content_hash: None,
        }
    }

    pub fn with_hash(mut self, hash: ContentHash) -> Self {
        self.content_hash = Some(hash);
        self
    }
}

/// A peer's registration request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Announcement {
    pub ip: String,
    pub port: u16,
    pub files: Vec<AnnouncedFile>,
}

impl Announcement {
    /// Announce plain file names without content hashes
    pub fn new<I, S>(ip: impl Into<String>, port: u16, files: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            ip: ip.into(),
            port,
            files: files.into_iter().map(AnnouncedFile::new).collect(),
        }
    }

    pub fn endpoint(&self) -> PeerEndpoint {
        PeerEndpoint::new(self.ip.clone(), self.port)
    }
}

/// Query interface of a tracker, local or remote
#[async_trait]
pub trait PeerDirectory: Send + Sync {
    /// Register or replace the announcing peer's entry
    async fn announce(&self, announcement: &Announcement) -> Result<()>;

    /// Peers that advertise `file_name`
    async fn peers_for_file(&self, file_name: &str) -> Result<Vec<PeerEndpoint>>;

    /// Number of registered peers
    async fn peer_count(&self) -> Result<usize>;

    /// Content hash some peer advertised for `file_name`
    async fn content_hash(&self, file_name: &str) -> Result<Option<ContentHash>>;
}
