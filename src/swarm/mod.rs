//! Swarm downloads
//!
//! Partitioning, download sessions, chunk stores, reassembly and
//! verification.

pub mod checksum;
pub mod coordinator;
pub mod partition;
pub mod session;
pub mod store;

pub use coordinator::{StoreKind, SwarmDownloader};
pub use partition::{partition, ChunkRange};
pub use session::{DownloadSession, LayoutAgreement};
pub use store::{ChunkStore, DiskChunkStore, MemoryChunkStore};
