//! Download session
//!
//! The client half of the transfer protocol: pull one chunk range from one
//! peer into the chunk store.

use parking_lot::Mutex;

use super::partition::ChunkRange;
use super::store::ChunkStore;
use crate::config::TransferConfig;
use crate::descriptor::ChunkLayout;
use crate::error::{Result, SwarmError};
use crate::peer::wire::{WireConnection, WireMessage};
use crate::types::PeerEndpoint;

/// What every peer's `Ready` must agree on
///
/// Values not known up front are fixed by the first peer that answers, so
/// all sessions of a download cut the file the same way.
#[derive(Debug)]
pub struct LayoutAgreement {
    chunk_count: u32,
    chunk_size: Option<u64>,
    file_size: Option<u64>,
    agreed: Mutex<Option<ChunkLayout>>,
}

impl LayoutAgreement {
    /// Only the chunk count is known
    pub fn chunk_count(chunk_count: u32) -> Self {
        Self {
            chunk_count,
            chunk_size: None,
            file_size: None,
            agreed: Mutex::new(None),
        }
    }

    /// The full layout is known from a descriptor
    pub fn exact(layout: ChunkLayout) -> Self {
        Self {
            chunk_count: layout.chunk_count(),
            chunk_size: Some(layout.chunk_size()),
            file_size: Some(layout.file_size()),
            agreed: Mutex::new(Some(layout)),
        }
    }

    /// Chunk size to ask servers for; 0 leaves it to them
    pub fn requested_chunk_size(&self) -> u32 {
        self.chunk_size
            .and_then(|size| u32::try_from(size).ok())
            .unwrap_or(0)
    }

    /// Layout every session settled on, once one peer has answered
    pub fn agreed(&self) -> Option<ChunkLayout> {
        *self.agreed.lock()
    }

    /// Check a peer's `Ready` against the expected and agreed layout
    pub fn accept(
        &self,
        chunk_count: u32,
        chunk_size: u64,
        file_size: u64,
    ) -> Result<ChunkLayout> {
        if chunk_count != self.chunk_count {
            return Err(SwarmError::violation(format!(
                "Peer reports {} chunks, expected {}",
                chunk_count, self.chunk_count
            )));
        }
        if let Some(expected) = self.chunk_size.filter(|&s| s != chunk_size) {
            return Err(SwarmError::violation(format!(
                "Peer serves {}-byte chunks, requested {}",
                chunk_size, expected
            )));
        }
        if let Some(expected) = self.file_size.filter(|&s| s != file_size) {
            return Err(SwarmError::violation(format!(
                "Peer reports {} bytes, expected {}",
                file_size, expected
            )));
        }

        let layout = ChunkLayout::from_parts(file_size, chunk_size, chunk_count)
            .map_err(|e| SwarmError::violation(format!("Peer sent an impossible layout: {}", e)))?;

        let mut agreed = self.agreed.lock();
        match *agreed {
            Some(existing) if existing != layout => Err(SwarmError::violation(format!(
                "Peer layout {}x{} bytes disagrees with {}x{} bytes from another peer",
                layout.chunk_count(),
                layout.chunk_size(),
                existing.chunk_count(),
                existing.chunk_size()
            ))),
            Some(existing) => Ok(existing),
            None => {
                *agreed = Some(layout);
                Ok(layout)
            }
        }
    }
}

/// One peer, one file, one range
#[derive(Debug, Clone)]
pub struct DownloadSession {
    pub peer: PeerEndpoint,
    pub file_name: String,
    pub range: ChunkRange,
}

impl DownloadSession {
    pub fn new(peer: PeerEndpoint, file_name: impl Into<String>, range: ChunkRange) -> Self {
        Self {
            peer,
            file_name: file_name.into(),
            range,
        }
    }

    /// Pull the whole range into `store`
    ///
    /// `on_chunk` runs after each chunk is stored. Returns the number of
    /// chunks received, which on success is the range length.
    pub async fn run<F>(
        &self,
        agreement: &LayoutAgreement,
        store: &dyn ChunkStore,
        transfer: &TransferConfig,
        on_chunk: F,
    ) -> Result<u32>
    where
        F: Fn(u32) + Send + Sync,
    {
        let mut wire = WireConnection::connect(&self.peer, transfer).await?;
        tracing::debug!("Session {} {} connected", self.peer, self.range);

        wire.send(&WireMessage::FileRequest {
            chunk_size: agreement.requested_chunk_size(),
            file_name: self.file_name.clone(),
        })
        .await?;

        let layout = match wire.recv().await? {
            WireMessage::Ready {
                chunk_count,
                chunk_size,
                file_size,
            } => agreement.accept(chunk_count, chunk_size, file_size)?,
            other => return Err(self.unexpected("Ready", other)),
        };

        if self.range.end >= layout.chunk_count() {
            return Err(SwarmError::invalid_input(
                "range",
                format!(
                    "{} outside a file of {} chunks",
                    self.range,
                    layout.chunk_count()
                ),
            ));
        }

        wire.send(&WireMessage::RangeRequest).await?;
        match wire.recv().await? {
            WireMessage::AwaitStart => {}
            other => return Err(self.unexpected("AwaitStart", other)),
        }

        wire.send(&WireMessage::StartIndex(self.range.start)).await?;
        match wire.recv().await? {
            WireMessage::AwaitEnd => {}
            other => return Err(self.unexpected("AwaitEnd", other)),
        }

        wire.send(&WireMessage::EndIndex(self.range.end)).await?;

        let mut received = 0;
        for expected in self.range.indices() {
            let (index, data) = match wire.recv().await? {
                WireMessage::Chunk { index, data } => (index, data),
                other => return Err(self.unexpected("Chunk", other)),
            };

            if index != expected {
                return Err(SwarmError::violation(format!(
                    "Expected chunk {}, peer sent {}",
                    expected, index
                )));
            }

            // chunk_len is Some for every index below chunk_count
            let expected_len = layout.chunk_len(index).unwrap_or(0);
            if data.len() as u64 != expected_len {
                return Err(SwarmError::violation(format!(
                    "Chunk {} is {} bytes, expected {}",
                    index,
                    data.len(),
                    expected_len
                )));
            }

            store.put(index, data).await?;
            received += 1;
            tracing::debug!("Session {} stored chunk {}", self.peer, index);
            on_chunk(index);
        }

        Ok(received)
    }

    fn unexpected(&self, expected: &str, got: WireMessage) -> SwarmError {
        match got {
            WireMessage::Reject { reason } => SwarmError::violation(format!(
                "Peer {} rejected the request: {}",
                self.peer, reason
            )),
            other => SwarmError::violation(format!(
                "Expected {} from {}, got {}",
                expected,
                self.peer,
                other.name()
            )),
        }
    }
}
