//! # swarmshare
//!
//! A small swarm file distribution engine.
//!
//! ## Features
//!
//! - **Tracker**: in-process registry of which peers share which files, plus
//!   an HTTP client for a remote tracker
//! - **Peer server**: slices shared files into chunks and streams requested
//!   chunk ranges over a framed wire protocol
//! - **Swarm downloads**: splits a file across peers, pulls the ranges
//!   concurrently, reassembles in order and verifies the content hash
//! - **Descriptors**: canonical bencode and magnet locator forms
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use swarmshare::{SwarmConfig, SwarmDownloader, TrackerRegistry, decode_locator};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = TrackerRegistry::new();
//!     registry.register("127.0.0.1", 6881, &["movie.mp4"])?;
//!
//!     let descriptor = decode_locator("magnet:?xt=urn:btih:...")?;
//!     let downloader = SwarmDownloader::new(SwarmConfig::default());
//!
//!     let mut events = downloader.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let result = downloader.download_from(&registry, &descriptor).await?;
//!     println!("{:?}", result.status);
//!     Ok(())
//! }
//! ```

// Modules
pub mod config;
pub mod descriptor;
pub mod error;
pub mod peer;
pub mod swarm;
pub mod tracker;
pub mod types;

// Re-exports for convenience
pub use config::{SwarmConfig, TrackerConfig, TransferConfig, DEFAULT_CHUNK_SIZE};
pub use descriptor::{
    decode_descriptor, decode_locator, encode_descriptor, encode_locator, ChunkLayout,
    ContentHash, Descriptor, HashAlgorithm,
};
pub use error::{
    NetworkErrorKind, ProtocolErrorKind, Result, SessionFailure, StorageErrorKind, SwarmError,
};
pub use types::{DownloadId, DownloadResult, DownloadStatus, PeerEndpoint, SwarmEvent};

// Tracker exports
pub use tracker::{AnnouncedFile, Announcement, PeerDirectory, PeerRecord, TrackerRegistry};
#[cfg(feature = "http-tracker")]
pub use tracker::TrackerClient;

// Peer exports
pub use peer::{PeerServer, ServerHandle, ServerStatsSnapshot, SharedDirectory};

// Swarm exports
pub use swarm::{partition, ChunkRange, ChunkStore, StoreKind, SwarmDownloader};
