#![allow(dead_code)]
//! Mock Swarm Peer for Testing
//!
//! A stand-in for a peer server that speaks the chunk-range wire protocol
//! byte for byte, with knobs to misbehave: drop mid-range, corrupt chunk
//! bytes, send chunks out of order, go slow, or reject outright.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::RwLock;

use swarmshare::PeerEndpoint;

// Envelope kinds
const FILE_REQUEST: u8 = 1;
const READY: u8 = 2;
const RANGE_REQUEST: u8 = 3;
const AWAIT_START: u8 = 4;
const START_INDEX: u8 = 5;
const AWAIT_END: u8 = 6;
const END_INDEX: u8 = 7;
const CHUNK: u8 = 8;
const REJECT: u8 = 9;

/// Mock peer configuration
#[derive(Clone)]
pub struct MockPeerConfig {
    /// Name of the one file this peer shares
    pub file_name: String,
    /// File content
    pub content: Vec<u8>,
    /// Chunk size used when the client leaves it to the server
    pub chunk_size: u64,
    /// Close the connection after this many chunks
    pub drop_after: Option<u32>,
    /// Flip a byte in every chunk for this many initial connections
    pub corrupt_connections: u32,
    /// Send the range highest index first
    pub reverse_order: bool,
    /// Pause before each chunk
    pub chunk_delay: Option<Duration>,
    /// Answer the file request with this Reject reason
    pub reject: Option<String>,
}

impl MockPeerConfig {
    pub fn new(file_name: impl Into<String>, content: Vec<u8>, chunk_size: u64) -> Self {
        Self {
            file_name: file_name.into(),
            content,
            chunk_size,
            drop_after: None,
            corrupt_connections: 0,
            reverse_order: false,
            chunk_delay: None,
            reject: None,
        }
    }

    pub fn drop_after(mut self, chunks: u32) -> Self {
        self.drop_after = Some(chunks);
        self
    }

    pub fn corrupt_first(mut self, connections: u32) -> Self {
        self.corrupt_connections = connections;
        self
    }

    pub fn reverse_order(mut self) -> Self {
        self.reverse_order = true;
        self
    }

    pub fn chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = Some(delay);
        self
    }

    pub fn reject(mut self, reason: impl Into<String>) -> Self {
        self.reject = Some(reason.into());
        self
    }
}

/// A mock peer serving one file
pub struct MockPeer {
    config: MockPeerConfig,
    listener: TcpListener,
    connections_seen: AtomicU32,
    connections: Arc<RwLock<Vec<tokio::task::JoinHandle<()>>>>,
}

impl MockPeer {
    /// Create a new mock peer listening on an ephemeral local port
    pub async fn new(config: MockPeerConfig) -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        Ok(Self {
            config,
            listener,
            connections_seen: AtomicU32::new(0),
            connections: Arc::new(RwLock::new(Vec::new())),
        })
    }

    /// Create, start accepting and return the shared peer
    pub async fn spawn(config: MockPeerConfig) -> std::io::Result<Arc<Self>> {
        let peer = Arc::new(Self::new(config).await?);
        Arc::clone(&peer).start_accepting();
        Ok(peer)
    }

    pub fn addr(&self) -> SocketAddr {
        self.listener.local_addr().unwrap()
    }

    pub fn endpoint(&self) -> PeerEndpoint {
        PeerEndpoint::from(self.addr())
    }

    /// Connections accepted so far
    pub fn connections_seen(&self) -> u32 {
        self.connections_seen.load(Ordering::SeqCst)
    }

    /// Start accepting connections in the background
    pub fn start_accepting(self: Arc<Self>) {
        let peer = Arc::clone(&self);
        tokio::spawn(async move {
            loop {
                match peer.listener.accept().await {
                    Ok((stream, _addr)) => {
                        let ordinal = peer.connections_seen.fetch_add(1, Ordering::SeqCst);
                        let peer_clone = Arc::clone(&peer);
                        let handle = tokio::spawn(async move {
                            if let Err(e) = peer_clone.handle_connection(stream, ordinal).await {
                                tracing::debug!("Mock peer connection error: {}", e);
                            }
                        });
                        peer.connections.write().await.push(handle);
                    }
                    Err(e) => {
                        tracing::error!("Mock peer accept error: {}", e);
                        break;
                    }
                }
            }
        });
    }

    /// Walk one connection through the transfer exchange
    async fn handle_connection(&self, mut stream: TcpStream, ordinal: u32) -> std::io::Result<()> {
        let (kind, payload) = read_frame(&mut stream).await?;
        if kind != FILE_REQUEST || payload.len() < 4 {
            return Err(invalid("expected FileRequest"));
        }
        let requested = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
        let name = String::from_utf8_lossy(&payload[4..]).to_string();

        if let Some(reason) = &self.config.reject {
            return write_frame(&mut stream, REJECT, reason.as_bytes()).await;
        }
        if name != self.config.file_name {
            return write_frame(&mut stream, REJECT, format!("Unknown file: {}", name).as_bytes())
                .await;
        }

        let chunk_size = if requested == 0 {
            self.config.chunk_size
        } else {
            requested as u64
        };
        let file_size = self.config.content.len() as u64;
        let chunk_count = file_size.div_ceil(chunk_size) as u32;

        let mut ready = Vec::with_capacity(20);
        ready.extend_from_slice(&chunk_count.to_be_bytes());
        ready.extend_from_slice(&chunk_size.to_be_bytes());
        ready.extend_from_slice(&file_size.to_be_bytes());
        write_frame(&mut stream, READY, &ready).await?;

        expect_kind(&mut stream, RANGE_REQUEST).await?;
        write_frame(&mut stream, AWAIT_START, &[]).await?;
        let start = read_index(&mut stream, START_INDEX).await?;
        write_frame(&mut stream, AWAIT_END, &[]).await?;
        let end = read_index(&mut stream, END_INDEX).await?;

        let mut indices: Vec<u32> = (start..=end).collect();
        if self.config.reverse_order {
            indices.reverse();
        }
        let corrupt = ordinal < self.config.corrupt_connections;

        for (sent, index) in indices.into_iter().enumerate() {
            if self.config.drop_after == Some(sent as u32) {
                return Ok(());
            }
            if let Some(delay) = self.config.chunk_delay {
                tokio::time::sleep(delay).await;
            }

            let offset = (index as u64 * chunk_size) as usize;
            let len = (chunk_size as usize).min(self.config.content.len() - offset);
            let mut data = self.config.content[offset..offset + len].to_vec();
            if corrupt {
                data[0] ^= 0xFF;
            }

            let mut payload = Vec::with_capacity(4 + data.len());
            payload.extend_from_slice(&index.to_be_bytes());
            payload.extend_from_slice(&data);
            write_frame(&mut stream, CHUNK, &payload).await?;
        }

        stream.shutdown().await
    }
}

async fn read_frame(stream: &mut TcpStream) -> std::io::Result<(u8, Vec<u8>)> {
    let mut header = [0u8; 5];
    stream.read_exact(&mut header).await?;
    let len = u32::from_be_bytes([header[1], header[2], header[3], header[4]]) as usize;
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).await?;
    Ok((header[0], payload))
}

async fn write_frame(stream: &mut TcpStream, kind: u8, payload: &[u8]) -> std::io::Result<()> {
    let mut frame = Vec::with_capacity(5 + payload.len());
    frame.push(kind);
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(payload);
    stream.write_all(&frame).await
}

async fn expect_kind(stream: &mut TcpStream, kind: u8) -> std::io::Result<Vec<u8>> {
    let (got, payload) = read_frame(stream).await?;
    if got != kind {
        return Err(invalid(&format!("expected kind {}, got {}", kind, got)));
    }
    Ok(payload)
}

async fn read_index(stream: &mut TcpStream, kind: u8) -> std::io::Result<u32> {
    let payload = expect_kind(stream, kind).await?;
    if payload.len() != 4 {
        return Err(invalid("index payload must be 4 bytes"));
    }
    Ok(u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]))
}

fn invalid(msg: &str) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, msg.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_peer_creation() {
        let config = MockPeerConfig::new("a.bin", vec![1, 2, 3], 2);
        let peer = MockPeer::new(config).await.unwrap();

        assert!(peer.addr().port() > 0);
        assert_eq!(peer.connections_seen(), 0);
    }
}
