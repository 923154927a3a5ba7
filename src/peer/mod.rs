//! Peer side of the swarm
//!
//! A peer shares a directory of files and serves chunk ranges of them to
//! downloaders over the envelope wire protocol.

pub mod server;
pub mod share;
pub mod wire;

pub use server::{ConnectionState, PeerServer, ServerHandle, ServerStats, ServerStatsSnapshot};
pub use share::{ChunkReader, SharedDirectory};
pub use wire::{WireConnection, WireMessage};
