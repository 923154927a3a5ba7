//! Peer transfer server
//!
//! Serves chunk ranges of shared files. Each connection walks a fixed
//! state machine:
//!
//! ```text
//! AwaitFileRequest -> Preparing -> Ready -> AwaitStart -> AwaitEnd -> Sending -> Done
//! ```
//!
//! Any unexpected message, bad index or unknown file moves the connection to
//! `Failed`; the client is sent a `Reject` with the reason before the socket
//! closes.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::share::{ChunkReader, SharedDirectory};
use super::wire::{WireConnection, WireMessage, CHUNK_HEADER_LEN};
use crate::config::{SwarmConfig, TransferConfig};
use crate::error::{NetworkErrorKind, Result, SwarmError};

/// Per-connection protocol state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    AwaitFileRequest,
    Preparing,
    Ready,
    AwaitStart,
    AwaitEnd,
    Sending,
    Done,
    Failed,
}

/// Connection counters
#[derive(Debug, Default)]
pub struct ServerStats {
    served: AtomicU64,
    failed: AtomicU64,
    chunks_sent: AtomicU64,
}

/// Point-in-time copy of [`ServerStats`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ServerStatsSnapshot {
    /// Connections that delivered their whole range
    pub served: u64,
    /// Connections that ended in `Failed`
    pub failed: u64,
    pub chunks_sent: u64,
}

impl ServerStats {
    pub fn snapshot(&self) -> ServerStatsSnapshot {
        ServerStatsSnapshot {
            served: self.served.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            chunks_sent: self.chunks_sent.load(Ordering::Relaxed),
        }
    }
}

/// Whether a full chunk plus its index header fits in one message
fn fits_in_message(chunk_size: u64, max_message_size: usize) -> bool {
    chunk_size
        .checked_add(CHUNK_HEADER_LEN as u64)
        .is_some_and(|len| len <= max_message_size as u64)
}

/// Accepts client connections and serves chunk ranges
pub struct PeerServer {
    listener: TcpListener,
    share: SharedDirectory,
    chunk_size: u64,
    transfer: TransferConfig,
    stats: Arc<ServerStats>,
    cancel_token: CancellationToken,
}

impl PeerServer {
    /// Bind a server for `share`, slicing files into `chunk_size` chunks
    /// unless a client asks for another size
    pub async fn bind(
        addr: &str,
        share: SharedDirectory,
        chunk_size: u64,
        transfer: TransferConfig,
    ) -> Result<Self> {
        if chunk_size == 0 {
            return Err(SwarmError::invalid_input("chunk_size", "Must be at least 1"));
        }
        if !fits_in_message(chunk_size, transfer.max_message_size) {
            return Err(SwarmError::invalid_input(
                "chunk_size",
                format!(
                    "{} bytes exceeds the message limit of {}",
                    chunk_size, transfer.max_message_size
                ),
            ));
        }

        let listener = TcpListener::bind(addr).await.map_err(|e| {
            SwarmError::network(
                NetworkErrorKind::Other,
                format!("Failed to bind {}: {}", addr, e),
            )
        })?;

        Ok(Self {
            listener,
            share,
            chunk_size,
            transfer,
            stats: Arc::new(ServerStats::default()),
            cancel_token: CancellationToken::new(),
        })
    }

    /// Bind using the share directory, chunk size and address from `config`
    pub async fn from_config(config: &SwarmConfig) -> Result<Self> {
        config.validate()?;
        Self::bind(
            &config.listen_addr,
            SharedDirectory::new(&config.share_dir),
            config.chunk_size,
            config.transfer.clone(),
        )
        .await
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr().map_err(|e| {
            SwarmError::network(NetworkErrorKind::Other, format!("No local address: {}", e))
        })
    }

    pub fn stats(&self) -> Arc<ServerStats> {
        Arc::clone(&self.stats)
    }

    /// Token that stops the accept loop and open connections
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// Run the accept loop until cancelled
    pub async fn run(self) -> Result<()> {
        let addr = self.local_addr()?;
        tracing::info!("Peer server listening on {} sharing {:?}", addr, self.share.root());

        let ctx = Arc::new(ConnectionContext {
            share: self.share,
            chunk_size: self.chunk_size,
            transfer: self.transfer,
            stats: self.stats,
        });

        loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    tracing::info!("Peer server on {} shutting down", addr);
                    return Ok(());
                }
                accepted = self.listener.accept() => {
                    let (stream, remote) = match accepted {
                        Ok(conn) => conn,
                        Err(e) => {
                            tracing::warn!("Accept failed on {}: {}", addr, e);
                            continue;
                        }
                    };

                    let ctx = Arc::clone(&ctx);
                    let cancel = self.cancel_token.child_token();
                    tokio::spawn(async move {
                        tokio::select! {
                            _ = cancel.cancelled() => {
                                tracing::debug!("Dropping connection from {} on shutdown", remote);
                            }
                            _ = ctx.handle(stream, remote) => {}
                        }
                    });
                }
            }
        }
    }

    /// Run the server on a background task
    pub fn spawn(self) -> Result<ServerHandle> {
        let addr = self.local_addr()?;
        let cancel_token = self.cancel_token();
        let stats = self.stats();
        let join = tokio::spawn(self.run());
        Ok(ServerHandle {
            addr,
            cancel_token,
            stats,
            join,
        })
    }
}

/// Handle to a server running in the background
pub struct ServerHandle {
    addr: SocketAddr,
    cancel_token: CancellationToken,
    stats: Arc<ServerStats>,
    join: JoinHandle<Result<()>>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn stats(&self) -> ServerStatsSnapshot {
        self.stats.snapshot()
    }

    /// Stop accepting, drop open connections and wait for the loop to exit
    pub async fn shutdown(self) -> Result<()> {
        self.cancel_token.cancel();
        self.join
            .await
            .map_err(|e| SwarmError::Internal(format!("Server task panicked: {}", e)))?
    }
}

struct ConnectionContext {
    share: SharedDirectory,
    chunk_size: u64,
    transfer: TransferConfig,
    stats: Arc<ServerStats>,
}

impl ConnectionContext {
    async fn handle(&self, stream: TcpStream, remote: SocketAddr) {
        stream.set_nodelay(true).ok();
        let mut conn = Connection {
            wire: WireConnection::new(stream, &self.transfer),
            state: ConnectionState::AwaitFileRequest,
            remote,
        };

        match conn.serve(self).await {
            Ok(sent) => {
                self.stats.served.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("Served {} chunk(s) to {}", sent, remote);
            }
            Err(e) => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    "Connection from {} failed after {:?}: {}",
                    remote,
                    conn.state,
                    e
                );
                conn.state = ConnectionState::Failed;
                // Socket errors leave nothing to reply on
                if !matches!(e, SwarmError::Network { .. }) {
                    let reject = WireMessage::Reject {
                        reason: e.to_string(),
                    };
                    if let Err(send_err) = conn.wire.send(&reject).await {
                        tracing::debug!("Could not send Reject to {}: {}", remote, send_err);
                    }
                }
            }
        }
    }
}

struct Connection {
    wire: WireConnection<TcpStream>,
    state: ConnectionState,
    remote: SocketAddr,
}

impl Connection {
    fn transition(&mut self, next: ConnectionState) {
        tracing::debug!("{}: {:?} -> {:?}", self.remote, self.state, next);
        self.state = next;
    }

    fn unexpected(&self, expected: &str, got: &WireMessage) -> SwarmError {
        SwarmError::violation(format!(
            "Expected {} in state {:?}, got {}",
            expected,
            self.state,
            got.name()
        ))
    }

    async fn serve(&mut self, ctx: &ConnectionContext) -> Result<u32> {
        let (requested, file_name) = match self.wire.recv().await? {
            WireMessage::FileRequest {
                chunk_size,
                file_name,
            } => (chunk_size, file_name),
            other => return Err(self.unexpected("FileRequest", &other)),
        };

        self.transition(ConnectionState::Preparing);
        let chunk_size = if requested == 0 {
            ctx.chunk_size
        } else {
            requested as u64
        };
        if !fits_in_message(chunk_size, ctx.transfer.max_message_size) {
            return Err(SwarmError::invalid_input(
                "chunk_size",
                format!(
                    "{} bytes exceeds the message limit of {}",
                    chunk_size, ctx.transfer.max_message_size
                ),
            ));
        }

        let mut reader = ctx.share.open(&file_name, chunk_size).await?;
        let layout = *reader.layout();
        tracing::debug!(
            "{} requested {} ({} chunks of {} bytes)",
            self.remote,
            file_name,
            layout.chunk_count(),
            chunk_size
        );

        self.wire
            .send(&WireMessage::Ready {
                chunk_count: layout.chunk_count(),
                chunk_size,
                file_size: layout.file_size(),
            })
            .await?;
        self.transition(ConnectionState::Ready);

        match self.wire.recv().await? {
            WireMessage::RangeRequest => {}
            other => return Err(self.unexpected("RangeRequest", &other)),
        }

        self.wire.send(&WireMessage::AwaitStart).await?;
        self.transition(ConnectionState::AwaitStart);

        let start = match self.wire.recv().await? {
            WireMessage::StartIndex(index) => index,
            other => return Err(self.unexpected("StartIndex", &other)),
        };
        if start >= layout.chunk_count() {
            return Err(SwarmError::violation(format!(
                "Start index {} out of range [0, {})",
                start,
                layout.chunk_count()
            )));
        }

        self.wire.send(&WireMessage::AwaitEnd).await?;
        self.transition(ConnectionState::AwaitEnd);

        let end = match self.wire.recv().await? {
            WireMessage::EndIndex(index) => index,
            other => return Err(self.unexpected("EndIndex", &other)),
        };
        if end >= layout.chunk_count() {
            return Err(SwarmError::violation(format!(
                "End index {} out of range [0, {})",
                end,
                layout.chunk_count()
            )));
        }
        if start > end {
            return Err(SwarmError::violation(format!(
                "Empty range: start {} > end {}",
                start, end
            )));
        }

        self.transition(ConnectionState::Sending);
        let sent = self.send_range(&mut reader, start, end, ctx).await?;

        self.wire.shutdown().await?;
        self.transition(ConnectionState::Done);
        Ok(sent)
    }

    async fn send_range(
        &mut self,
        reader: &mut ChunkReader,
        start: u32,
        end: u32,
        ctx: &ConnectionContext,
    ) -> Result<u32> {
        for index in start..=end {
            let data = reader.read_chunk(index).await?;
            self.wire.send(&WireMessage::Chunk { index, data }).await?;
            ctx.stats.chunks_sent.fetch_add(1, Ordering::Relaxed);
        }
        Ok(end - start + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PeerEndpoint;
    use tempfile::{tempdir, TempDir};

    async fn start_server(content: &[u8], chunk_size: u64) -> (TempDir, ServerHandle) {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("data.bin"), content).unwrap();
        let server = PeerServer::bind(
            "127.0.0.1:0",
            SharedDirectory::new(dir.path()),
            chunk_size,
            TransferConfig::default(),
        )
        .await
        .unwrap();
        let handle = server.spawn().unwrap();
        (dir, handle)
    }

    async fn connect(handle: &ServerHandle) -> WireConnection {
        let peer = PeerEndpoint::from(handle.local_addr());
        WireConnection::connect(&peer, &TransferConfig::default())
            .await
            .unwrap()
    }

    async fn open_range(wire: &mut WireConnection, start: u32) {
        wire.send(&WireMessage::FileRequest {
            chunk_size: 0,
            file_name: "data.bin".to_string(),
        })
        .await
        .unwrap();
        assert!(matches!(wire.recv().await.unwrap(), WireMessage::Ready { .. }));
        wire.send(&WireMessage::RangeRequest).await.unwrap();
        assert_eq!(wire.recv().await.unwrap(), WireMessage::AwaitStart);
        wire.send(&WireMessage::StartIndex(start)).await.unwrap();
    }

    #[tokio::test]
    async fn test_serves_range_in_order() {
        let content: Vec<u8> = (0..10u8).collect();
        let (_dir, handle) = start_server(&content, 4).await;
        let mut wire = connect(&handle).await;

        wire.send(&WireMessage::FileRequest {
            chunk_size: 0,
            file_name: "data.bin".to_string(),
        })
        .await
        .unwrap();
        assert_eq!(
            wire.recv().await.unwrap(),
            WireMessage::Ready {
                chunk_count: 3,
                chunk_size: 4,
                file_size: 10
            }
        );
        wire.send(&WireMessage::RangeRequest).await.unwrap();
        assert_eq!(wire.recv().await.unwrap(), WireMessage::AwaitStart);
        wire.send(&WireMessage::StartIndex(1)).await.unwrap();
        assert_eq!(wire.recv().await.unwrap(), WireMessage::AwaitEnd);
        wire.send(&WireMessage::EndIndex(2)).await.unwrap();

        match wire.recv().await.unwrap() {
            WireMessage::Chunk { index, data } => {
                assert_eq!(index, 1);
                assert_eq!(&data[..], &[4, 5, 6, 7]);
            }
            other => panic!("unexpected {:?}", other),
        }
        match wire.recv().await.unwrap() {
            WireMessage::Chunk { index, data } => {
                assert_eq!(index, 2);
                assert_eq!(&data[..], &[8, 9]);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(wire.recv().await.is_err());

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_client_chosen_chunk_size() {
        let (_dir, handle) = start_server(&[1u8; 100], 64).await;
        let mut wire = connect(&handle).await;
        wire.send(&WireMessage::FileRequest {
            chunk_size: 10,
            file_name: "data.bin".to_string(),
        })
        .await
        .unwrap();
        assert_eq!(
            wire.recv().await.unwrap(),
            WireMessage::Ready {
                chunk_count: 10,
                chunk_size: 10,
                file_size: 100
            }
        );
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_rejects_inverted_range() {
        let (_dir, handle) = start_server(&[0u8; 40], 4).await;
        let mut wire = connect(&handle).await;
        open_range(&mut wire, 5).await;
        assert_eq!(wire.recv().await.unwrap(), WireMessage::AwaitEnd);
        wire.send(&WireMessage::EndIndex(3)).await.unwrap();

        match wire.recv().await.unwrap() {
            WireMessage::Reject { reason } => assert!(reason.contains("start 5 > end 3")),
            other => panic!("unexpected {:?}", other),
        }
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_rejects_out_of_range_start() {
        let (_dir, handle) = start_server(&[0u8; 40], 4).await;
        let mut wire = connect(&handle).await;
        open_range(&mut wire, 10).await;

        assert!(matches!(
            wire.recv().await.unwrap(),
            WireMessage::Reject { .. }
        ));
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_rejects_unknown_file_and_traversal() {
        let (_dir, handle) = start_server(&[0u8; 4], 4).await;

        for name in ["missing.bin", "../etc/passwd"] {
            let mut wire = connect(&handle).await;
            wire.send(&WireMessage::FileRequest {
                chunk_size: 0,
                file_name: name.to_string(),
            })
            .await
            .unwrap();
            assert!(matches!(
                wire.recv().await.unwrap(),
                WireMessage::Reject { .. }
            ));
        }
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_rejects_out_of_sequence_message() {
        let (_dir, handle) = start_server(&[0u8; 4], 4).await;
        let mut wire = connect(&handle).await;
        wire.send(&WireMessage::StartIndex(0)).await.unwrap();
        match wire.recv().await.unwrap() {
            WireMessage::Reject { reason } => assert!(reason.contains("FileRequest")),
            other => panic!("unexpected {:?}", other),
        }
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_bind_rejects_chunk_size_beyond_message_limit() {
        let dir = tempdir().unwrap();
        for chunk_size in [u64::MAX, 4 * 1024 * 1024] {
            let result = PeerServer::bind(
                "127.0.0.1:0",
                SharedDirectory::new(dir.path()),
                chunk_size,
                TransferConfig::default(),
            )
            .await;
            assert!(matches!(
                result,
                Err(SwarmError::InvalidInput { field: "chunk_size", .. })
            ));
        }
    }

    #[tokio::test]
    async fn test_from_config_validates_first() {
        let dir = tempdir().unwrap();
        let config = SwarmConfig::new()
            .share_dir(dir.path())
            .listen_addr("127.0.0.1:0")
            .chunk_size(8 * 1024 * 1024);
        assert!(matches!(
            PeerServer::from_config(&config).await,
            Err(SwarmError::InvalidInput { .. })
        ));
    }

    #[tokio::test]
    async fn test_oversized_requested_chunk_is_rejected() {
        let (_dir, handle) = start_server(&[0u8; 64], 16).await;
        let mut wire = connect(&handle).await;
        wire.send(&WireMessage::FileRequest {
            chunk_size: u32::MAX,
            file_name: "data.bin".to_string(),
        })
        .await
        .unwrap();
        match wire.recv().await.unwrap() {
            WireMessage::Reject { reason } => assert!(reason.contains("message limit")),
            other => panic!("unexpected {:?}", other),
        }

        for _ in 0..50 {
            if handle.stats().failed == 1 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(handle.stats().failed, 1);
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_stats_count_outcomes() {
        let (_dir, handle) = start_server(&[9u8; 8], 4).await;

        let mut wire = connect(&handle).await;
        open_range(&mut wire, 0).await;
        assert_eq!(wire.recv().await.unwrap(), WireMessage::AwaitEnd);
        wire.send(&WireMessage::EndIndex(1)).await.unwrap();
        for _ in 0..2 {
            assert!(matches!(wire.recv().await.unwrap(), WireMessage::Chunk { .. }));
        }
        assert!(wire.recv().await.is_err());

        let mut bad = connect(&handle).await;
        bad.send(&WireMessage::RangeRequest).await.unwrap();
        assert!(matches!(bad.recv().await.unwrap(), WireMessage::Reject { .. }));

        // Counters are bumped after the socket closes; give the tasks a moment
        for _ in 0..50 {
            let stats = handle.stats();
            if stats.served == 1 && stats.failed == 1 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        let stats = handle.stats();
        assert_eq!(stats.served, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.chunks_sent, 2);

        handle.shutdown().await.unwrap();
    }
}
