//! Swarm download coordinator
//!
//! Splits a file's chunk indices across the peers that hold it, runs one
//! session per peer concurrently, waits for all of them, then writes the
//! chunks out in index order and verifies the result.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use super::checksum::verify_content_hash;
use super::partition::{partition, ChunkRange};
use super::session::{DownloadSession, LayoutAgreement};
use super::store::{ChunkStore, DiskChunkStore, MemoryChunkStore};
use crate::config::{SwarmConfig, TransferConfig};
use crate::descriptor::{validate_file_name, ContentHash, Descriptor};
use crate::error::{Result, SessionFailure, SwarmError};
use crate::tracker::PeerDirectory;
use crate::types::{DownloadId, DownloadResult, PeerEndpoint, SwarmEvent};

/// Where chunks are held between arrival and reassembly
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StoreKind {
    /// One file per chunk under the configured chunk directory
    #[default]
    Disk,
    Memory,
}

/// Everything one download run needs
struct DownloadPlan {
    id: DownloadId,
    file_name: String,
    chunk_count: u32,
    agreement: Arc<LayoutAgreement>,
    content_hash: Option<ContentHash>,
    assignments: Vec<(PeerEndpoint, ChunkRange)>,
    cancel_token: CancellationToken,
}

/// Downloads files from a swarm of peer servers
pub struct SwarmDownloader {
    config: SwarmConfig,
    store_kind: StoreKind,
    event_tx: broadcast::Sender<SwarmEvent>,
    // Shared by the downloads in flight; replaced once cancelled
    cancel_token: Mutex<CancellationToken>,
}

impl SwarmDownloader {
    pub fn new(config: SwarmConfig) -> Self {
        let (event_tx, _) = broadcast::channel(config.transfer.event_capacity.max(1));
        Self {
            config,
            store_kind: StoreKind::default(),
            event_tx,
            cancel_token: Mutex::new(CancellationToken::new()),
        }
    }

    /// Choose where chunks are kept while downloading
    pub fn store_kind(mut self, kind: StoreKind) -> Self {
        self.store_kind = kind;
        self
    }

    pub fn config(&self) -> &SwarmConfig {
        &self.config
    }

    /// Subscribe to download events
    pub fn subscribe(&self) -> broadcast::Receiver<SwarmEvent> {
        self.event_tx.subscribe()
    }

    /// Abort every download in flight; each ends with [`SwarmError::Cancelled`]
    ///
    /// Downloads started afterwards are unaffected.
    pub fn cancel(&self) {
        self.cancel_token.lock().cancel();
    }

    /// Token shared by the downloads in flight and the next one to start
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.lock().clone()
    }

    /// Token for a starting download, renewing it after a cancellation
    fn run_token(&self) -> CancellationToken {
        let mut token = self.cancel_token.lock();
        if token.is_cancelled() {
            *token = CancellationToken::new();
        }
        token.clone()
    }

    /// Download `file_name` of `chunk_count` chunks from `peers`
    ///
    /// Chunk size is whatever the peers serve; all of them must agree.
    /// Nothing is verified beyond chunk counts and lengths.
    pub async fn start_download(
        &self,
        file_name: &str,
        chunk_count: u32,
        peers: &[PeerEndpoint],
    ) -> Result<DownloadResult> {
        validate_file_name(file_name)?;
        if chunk_count == 0 {
            return Err(SwarmError::invalid_input("chunk_count", "Must be at least 1"));
        }

        let agreement = LayoutAgreement::chunk_count(chunk_count);
        self.run(file_name, chunk_count, agreement, None, peers).await
    }

    /// Download the file a descriptor names, verifying its content hash when present
    pub async fn download(
        &self,
        descriptor: &Descriptor,
        peers: &[PeerEndpoint],
    ) -> Result<DownloadResult> {
        descriptor.validate()?;
        let agreement = LayoutAgreement::exact(descriptor.layout()?);
        self.run(
            &descriptor.file_name,
            descriptor.chunk_count,
            agreement,
            descriptor.content_hash.clone(),
            peers,
        )
        .await
    }

    /// Look the descriptor's file up in a tracker, then download it
    ///
    /// A content hash advertised by the tracker is used when the descriptor
    /// carries none.
    pub async fn download_from(
        &self,
        directory: &dyn PeerDirectory,
        descriptor: &Descriptor,
    ) -> Result<DownloadResult> {
        let peers = directory.peers_for_file(&descriptor.file_name).await?;
        tracing::info!(
            "Tracker lists {} peer(s) for {}",
            peers.len(),
            descriptor.file_name
        );

        let mut descriptor = descriptor.clone();
        if descriptor.content_hash.is_none() {
            descriptor.content_hash = directory.content_hash(&descriptor.file_name).await?;
        }

        self.download(&descriptor, &peers).await
    }

    async fn run(
        &self,
        file_name: &str,
        chunk_count: u32,
        agreement: LayoutAgreement,
        content_hash: Option<ContentHash>,
        peers: &[PeerEndpoint],
    ) -> Result<DownloadResult> {
        if peers.is_empty() {
            return Err(SwarmError::NoPeersAvailable {
                file_name: file_name.to_string(),
            });
        }

        let ranges = partition(chunk_count, peers.len())?;
        if ranges.len() < peers.len() {
            tracing::debug!(
                "{} peer(s) left idle: only {} chunk(s)",
                peers.len() - ranges.len(),
                chunk_count
            );
        }

        let plan = DownloadPlan {
            id: DownloadId::new(),
            file_name: file_name.to_string(),
            chunk_count,
            agreement: Arc::new(agreement),
            content_hash,
            assignments: peers.iter().cloned().zip(ranges).collect(),
            cancel_token: self.run_token(),
        };

        tracing::info!(
            "Download {} of {} started: {} chunk(s) across {} peer(s)",
            plan.id,
            plan.file_name,
            chunk_count,
            plan.assignments.len()
        );
        let _ = self.event_tx.send(SwarmEvent::Started {
            id: plan.id,
            file_name: plan.file_name.clone(),
            chunk_count,
            peers: plan.assignments.len(),
        });

        // Only a known content hash can fail verification, so only then is a retry possible
        let max_attempts = if plan.content_hash.is_some() {
            1 + self.config.transfer.integrity_retries
        } else {
            1
        };

        let mut attempt = 0;
        loop {
            attempt += 1;
            let store = self.create_store(&plan).await?;

            match self.attempt(&plan, Arc::clone(&store)).await {
                Ok(path) => {
                    store.dispose().await?;
                    tracing::info!("Download {} finished: {:?}", plan.id, path);
                    let _ = self.event_tx.send(SwarmEvent::Completed {
                        id: plan.id,
                        path: path.clone(),
                    });
                    return Ok(DownloadResult::finished(plan.id, file_name, path, attempt));
                }
                Err(e) if e.is_integrity_mismatch() && attempt < max_attempts => {
                    tracing::warn!(
                        "Download {} failed verification (attempt {}), starting over: {}",
                        plan.id,
                        attempt,
                        e
                    );
                    store.dispose().await?;
                    remove_if_exists(&self.output_path(file_name)).await?;
                    let _ = self.event_tx.send(SwarmEvent::Retrying {
                        id: plan.id,
                        attempt: attempt + 1,
                    });
                }
                Err(e) => {
                    if e.is_integrity_mismatch() {
                        remove_if_exists(&self.output_path(file_name)).await?;
                    }
                    // Partial downloads keep their chunks for inspection
                    if !matches!(e, SwarmError::PartialDownload { .. }) {
                        store.dispose().await?;
                    }
                    tracing::warn!("Download {} failed: {}", plan.id, e);
                    let _ = self.event_tx.send(SwarmEvent::Failed {
                        id: plan.id,
                        error: e.to_string(),
                        retryable: e.is_retryable(),
                    });
                    return Ok(DownloadResult::failed(plan.id, file_name, attempt, e));
                }
            }
        }
    }

    async fn create_store(&self, plan: &DownloadPlan) -> Result<Arc<dyn ChunkStore>> {
        Ok(match self.store_kind {
            StoreKind::Disk => Arc::new(
                DiskChunkStore::create(&self.config.chunk_dir, &plan.file_name, plan.chunk_count)
                    .await?,
            ),
            StoreKind::Memory => Arc::new(MemoryChunkStore::new(plan.chunk_count)),
        })
    }

    fn output_path(&self, file_name: &str) -> PathBuf {
        self.config.download_dir.join(file_name)
    }

    /// One full pass: all sessions, reassembly, verification
    async fn attempt(&self, plan: &DownloadPlan, store: Arc<dyn ChunkStore>) -> Result<PathBuf> {
        let mut handles = Vec::with_capacity(plan.assignments.len());
        for (peer, range) in &plan.assignments {
            let session = DownloadSession::new(peer.clone(), plan.file_name.clone(), *range);
            handles.push(tokio::spawn(run_session(
                session,
                plan.id,
                Arc::clone(&plan.agreement),
                Arc::clone(&store),
                self.config.transfer.clone(),
                self.event_tx.clone(),
                plan.cancel_token.child_token(),
            )));
        }

        // Join every session before looking at the store
        let outcomes = futures::future::join_all(handles).await;
        let mut failures = Vec::new();
        for (outcome, (peer, range)) in outcomes.into_iter().zip(&plan.assignments) {
            let reason = match outcome {
                Ok(Ok(_)) => continue,
                Ok(Err(e)) => e.to_string(),
                Err(e) => {
                    tracing::error!("Session {} {} panicked: {:?}", peer, range, e);
                    format!("Session task panicked: {}", e)
                }
            };
            failures.push(SessionFailure {
                peer: peer.clone(),
                range: *range,
                reason,
            });
        }

        if plan.cancel_token.is_cancelled() {
            return Err(SwarmError::Cancelled);
        }

        if !failures.is_empty() {
            return Err(SwarmError::PartialDownload {
                file_name: plan.file_name.clone(),
                missing: store.missing_ranges(),
                failures,
            });
        }

        let path = self.reassemble(plan, store.as_ref()).await?;

        if let Some(expected) = &plan.content_hash {
            let _ = self.event_tx.send(SwarmEvent::Verifying { id: plan.id });
            verify_content_hash(&path, expected).await?;
            tracing::debug!("Download {} verified against {}", plan.id, expected);
        }

        Ok(path)
    }

    /// Write chunks `0..chunk_count` in ascending order to the download directory
    async fn reassemble(&self, plan: &DownloadPlan, store: &dyn ChunkStore) -> Result<PathBuf> {
        let missing = store.missing_ranges();
        if !missing.is_empty() {
            return Err(SwarmError::Internal(format!(
                "Reassembly of {} started with chunks missing: {:?}",
                plan.file_name, missing
            )));
        }

        let dir = &self.config.download_dir;
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| SwarmError::from(e).at_path(dir))?;

        let final_path = self.output_path(&plan.file_name);
        let part_path = dir.join(format!("{}.part", plan.file_name));

        let mut file = tokio::fs::File::create(&part_path)
            .await
            .map_err(|e| SwarmError::from(e).at_path(&part_path))?;
        for index in 0..plan.chunk_count {
            let data = store.get(index).await?;
            file.write_all(&data)
                .await
                .map_err(|e| SwarmError::from(e).at_path(&part_path))?;
        }
        file.sync_all()
            .await
            .map_err(|e| SwarmError::from(e).at_path(&part_path))?;
        drop(file);

        tokio::fs::rename(&part_path, &final_path)
            .await
            .map_err(|e| SwarmError::from(e).at_path(&final_path))?;

        tracing::debug!(
            "Reassembled {} chunk(s) into {:?}",
            plan.chunk_count,
            final_path
        );
        Ok(final_path)
    }
}

async fn run_session(
    session: DownloadSession,
    id: DownloadId,
    agreement: Arc<LayoutAgreement>,
    store: Arc<dyn ChunkStore>,
    transfer: TransferConfig,
    event_tx: broadcast::Sender<SwarmEvent>,
    cancel_token: CancellationToken,
) -> Result<u32> {
    let _ = event_tx.send(SwarmEvent::SessionStarted {
        id,
        peer: session.peer.clone(),
        range: session.range,
    });

    let total = store.chunk_count();
    let on_chunk = |index: u32| {
        let _ = event_tx.send(SwarmEvent::ChunkReceived {
            id,
            index,
            received: store.received(),
            total,
        });
    };

    let result = tokio::select! {
        _ = cancel_token.cancelled() => Err(SwarmError::Cancelled),
        r = session.run(&agreement, store.as_ref(), &transfer, on_chunk) => r,
    };

    match &result {
        Ok(received) => {
            tracing::debug!(
                "Session {} {} delivered {} chunk(s)",
                session.peer,
                session.range,
                received
            );
            let _ = event_tx.send(SwarmEvent::SessionCompleted {
                id,
                peer: session.peer.clone(),
                range: session.range,
            });
        }
        Err(e) => {
            tracing::warn!("Session {} {} failed: {}", session.peer, session.range, e);
            let _ = event_tx.send(SwarmEvent::SessionFailed {
                id,
                peer: session.peer.clone(),
                range: session.range,
                error: e.to_string(),
            });
        }
    }
    result
}

async fn remove_if_exists(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(SwarmError::from(e).at_path(path)),
    }
}
