//! Peer wire protocol
//!
//! Every message travels in an envelope:
//!
//! ```text
//! +------+----------------+-----------------+
//! | kind | length (u32 BE)| payload         |
//! +------+----------------+-----------------+
//! ```
//!
//! A transfer runs FileRequest -> Ready -> RangeRequest -> AwaitStart ->
//! StartIndex -> AwaitEnd -> EndIndex -> Chunk*; the server may answer any
//! step with Reject and close.

use std::time::Duration;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::config::TransferConfig;
use crate::error::{NetworkErrorKind, Result, SwarmError};
use crate::types::PeerEndpoint;

/// Envelope header length: kind byte plus payload length
pub const HEADER_LEN: usize = 5;

/// Index prefix carried by every chunk message
pub const CHUNK_HEADER_LEN: usize = 4;

/// A peer wire message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireMessage {
    /// Ask for a file; `chunk_size` 0 lets the server choose
    FileRequest { chunk_size: u32, file_name: String },
    /// File is open and sliced
    Ready {
        chunk_count: u32,
        chunk_size: u64,
        file_size: u64,
    },
    /// Client wants to send a range
    RangeRequest,
    /// Server waits for the first index
    AwaitStart,
    StartIndex(u32),
    /// Server waits for the last index
    AwaitEnd,
    EndIndex(u32),
    Chunk { index: u32, data: Bytes },
    /// Server refuses the request and closes
    Reject { reason: String },
}

impl WireMessage {
    /// Envelope kind byte
    pub fn kind(&self) -> u8 {
        match self {
            Self::FileRequest { .. } => 1,
            Self::Ready { .. } => 2,
            Self::RangeRequest => 3,
            Self::AwaitStart => 4,
            Self::StartIndex(_) => 5,
            Self::AwaitEnd => 6,
            Self::EndIndex(_) => 7,
            Self::Chunk { .. } => 8,
            Self::Reject { .. } => 9,
        }
    }

    /// Short name for log lines and errors
    pub fn name(&self) -> &'static str {
        match self {
            Self::FileRequest { .. } => "FileRequest",
            Self::Ready { .. } => "Ready",
            Self::RangeRequest => "RangeRequest",
            Self::AwaitStart => "AwaitStart",
            Self::StartIndex(_) => "StartIndex",
            Self::AwaitEnd => "AwaitEnd",
            Self::EndIndex(_) => "EndIndex",
            Self::Chunk { .. } => "Chunk",
            Self::Reject { .. } => "Reject",
        }
    }

    fn payload_len(&self) -> usize {
        match self {
            Self::FileRequest { file_name, .. } => 4 + file_name.len(),
            Self::Ready { .. } => 20,
            Self::RangeRequest | Self::AwaitStart | Self::AwaitEnd => 0,
            Self::StartIndex(_) | Self::EndIndex(_) => 4,
            Self::Chunk { data, .. } => CHUNK_HEADER_LEN + data.len(),
            Self::Reject { reason } => reason.len(),
        }
    }

    /// Encode into a complete envelope
    pub fn encode(&self) -> Vec<u8> {
        let payload_len = self.payload_len();
        let mut buf = BytesMut::with_capacity(HEADER_LEN + payload_len);
        buf.put_u8(self.kind());
        buf.put_u32(payload_len as u32);

        match self {
            Self::FileRequest {
                chunk_size,
                file_name,
            } => {
                buf.put_u32(*chunk_size);
                buf.put_slice(file_name.as_bytes());
            }
            Self::Ready {
                chunk_count,
                chunk_size,
                file_size,
            } => {
                buf.put_u32(*chunk_count);
                buf.put_u64(*chunk_size);
                buf.put_u64(*file_size);
            }
            Self::RangeRequest | Self::AwaitStart | Self::AwaitEnd => {}
            Self::StartIndex(index) | Self::EndIndex(index) => buf.put_u32(*index),
            Self::Chunk { index, data } => {
                buf.put_u32(*index);
                buf.put_slice(data);
            }
            Self::Reject { reason } => buf.put_slice(reason.as_bytes()),
        }

        buf.to_vec()
    }

    /// Decode an envelope body given its kind byte
    pub fn decode(kind: u8, payload: &[u8]) -> Result<Self> {
        let mut buf = payload;
        let msg = match kind {
            1 => {
                expect_at_least(kind, payload, 4)?;
                let chunk_size = buf.get_u32();
                let file_name = utf8(kind, buf)?;
                Self::FileRequest {
                    chunk_size,
                    file_name,
                }
            }
            2 => {
                expect_exactly(kind, payload, 20)?;
                Self::Ready {
                    chunk_count: buf.get_u32(),
                    chunk_size: buf.get_u64(),
                    file_size: buf.get_u64(),
                }
            }
            3 => {
                expect_exactly(kind, payload, 0)?;
                Self::RangeRequest
            }
            4 => {
                expect_exactly(kind, payload, 0)?;
                Self::AwaitStart
            }
            5 => {
                expect_exactly(kind, payload, 4)?;
                Self::StartIndex(buf.get_u32())
            }
            6 => {
                expect_exactly(kind, payload, 0)?;
                Self::AwaitEnd
            }
            7 => {
                expect_exactly(kind, payload, 4)?;
                Self::EndIndex(buf.get_u32())
            }
            8 => {
                expect_at_least(kind, payload, CHUNK_HEADER_LEN)?;
                let index = buf.get_u32();
                Self::Chunk {
                    index,
                    data: Bytes::copy_from_slice(buf),
                }
            }
            9 => Self::Reject {
                reason: utf8(kind, buf)?,
            },
            other => {
                return Err(SwarmError::violation(format!(
                    "Unknown message kind {}",
                    other
                )))
            }
        };
        Ok(msg)
    }
}

fn expect_exactly(kind: u8, payload: &[u8], len: usize) -> Result<()> {
    if payload.len() != len {
        return Err(SwarmError::violation(format!(
            "Message kind {} carries {} payload bytes, expected {}",
            kind,
            payload.len(),
            len
        )));
    }
    Ok(())
}

fn expect_at_least(kind: u8, payload: &[u8], len: usize) -> Result<()> {
    if payload.len() < len {
        return Err(SwarmError::violation(format!(
            "Message kind {} too short: {} bytes",
            kind,
            payload.len()
        )));
    }
    Ok(())
}

fn utf8(kind: u8, bytes: &[u8]) -> Result<String> {
    String::from_utf8(bytes.to_vec())
        .map_err(|_| SwarmError::violation(format!("Message kind {} text is not UTF-8", kind)))
}

/// Framed, timed connection carrying [`WireMessage`]s
pub struct WireConnection<S = TcpStream> {
    stream: S,
    io_timeout: Duration,
    max_message_size: usize,
    read_buffer: BytesMut,
}

impl WireConnection<TcpStream> {
    /// Dial a peer server
    pub async fn connect(peer: &PeerEndpoint, config: &TransferConfig) -> Result<Self> {
        let stream = timeout(config.connect_timeout(), TcpStream::connect(peer.socket_addr()))
            .await
            .map_err(|_| {
                SwarmError::network(
                    NetworkErrorKind::Timeout,
                    format!("Connection to {} timed out", peer),
                )
            })?
            .map_err(|e| {
                let kind = if e.kind() == std::io::ErrorKind::ConnectionRefused {
                    NetworkErrorKind::ConnectionRefused
                } else {
                    NetworkErrorKind::Other
                };
                SwarmError::network(kind, format!("Failed to connect to {}: {}", peer, e))
            })?;

        stream.set_nodelay(true).ok();
        Ok(Self::new(stream, config))
    }
}

impl<S> WireConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap an established stream
    pub fn new(stream: S, config: &TransferConfig) -> Self {
        Self {
            stream,
            io_timeout: config.io_timeout(),
            max_message_size: config.max_message_size,
            read_buffer: BytesMut::new(),
        }
    }

    /// Send one message
    pub async fn send(&mut self, msg: &WireMessage) -> Result<()> {
        let payload_len = msg.payload_len();
        if payload_len > self.max_message_size {
            return Err(SwarmError::violation(format!(
                "Refusing to send {} of {} bytes (limit {})",
                msg.name(),
                payload_len,
                self.max_message_size
            )));
        }

        let data = msg.encode();
        timeout(self.io_timeout, self.stream.write_all(&data))
            .await
            .map_err(|_| SwarmError::network(NetworkErrorKind::Timeout, "Send timeout"))?
            .map_err(|e| {
                SwarmError::network(
                    NetworkErrorKind::ConnectionReset,
                    format!("Send failed: {}", e),
                )
            })?;
        Ok(())
    }

    /// Receive one message
    pub async fn recv(&mut self) -> Result<WireMessage> {
        let mut header = [0u8; HEADER_LEN];
        timeout(self.io_timeout, self.stream.read_exact(&mut header))
            .await
            .map_err(|_| SwarmError::network(NetworkErrorKind::Timeout, "Receive timeout"))?
            .map_err(|e| {
                SwarmError::network(
                    NetworkErrorKind::ConnectionReset,
                    format!("Receive failed: {}", e),
                )
            })?;

        let kind = header[0];
        let len = u32::from_be_bytes([header[1], header[2], header[3], header[4]]) as usize;

        if len > self.max_message_size {
            return Err(SwarmError::violation(format!(
                "Message too large: {} bytes (limit {})",
                len, self.max_message_size
            )));
        }

        self.read_buffer.resize(len, 0);
        timeout(self.io_timeout, self.stream.read_exact(&mut self.read_buffer))
            .await
            .map_err(|_| SwarmError::network(NetworkErrorKind::Timeout, "Receive body timeout"))?
            .map_err(|e| {
                SwarmError::network(
                    NetworkErrorKind::ConnectionReset,
                    format!("Receive body failed: {}", e),
                )
            })?;

        WireMessage::decode(kind, &self.read_buffer)
    }

    /// Flush and close the write half
    pub async fn shutdown(&mut self) -> Result<()> {
        timeout(self.io_timeout, self.stream.shutdown())
            .await
            .map_err(|_| SwarmError::network(NetworkErrorKind::Timeout, "Shutdown timeout"))?
            .map_err(|e| {
                SwarmError::network(
                    NetworkErrorKind::ConnectionReset,
                    format!("Shutdown failed: {}", e),
                )
            })
    }
}
