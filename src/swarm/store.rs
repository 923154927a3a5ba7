//! Chunk stores
//!
//! Sessions drop received chunks into a store as they arrive; the
//! coordinator reads them back in index order once every session has
//! finished. A store lives for one download attempt.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bitvec::prelude::*;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};

use super::partition::ChunkRange;
use crate::error::{Result, StorageErrorKind, SwarmError};

/// Storage for the chunks of one file
#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Number of chunks the file has
    fn chunk_count(&self) -> u32;

    /// Store a chunk; a rewrite replaces the previous bytes
    async fn put(&self, index: u32, data: Bytes) -> Result<()>;

    /// Read a stored chunk back
    async fn get(&self, index: u32) -> Result<Bytes>;

    fn has(&self, index: u32) -> bool;

    /// Number of distinct chunks stored
    fn received(&self) -> u32;

    /// Absent indices grouped into contiguous ranges
    fn missing_ranges(&self) -> Vec<ChunkRange>;

    /// Forget every chunk
    async fn clear(&self) -> Result<()>;

    /// Release the store's resources
    async fn dispose(&self) -> Result<()>;
}

/// Which chunk indices are present
#[derive(Debug)]
struct Presence {
    bits: Mutex<BitVec<u8, Msb0>>,
}

impl Presence {
    fn new(chunk_count: u32) -> Self {
        Self {
            bits: Mutex::new(bitvec![u8, Msb0; 0; chunk_count as usize]),
        }
    }

    fn len(&self) -> u32 {
        self.bits.lock().len() as u32
    }

    fn check(&self, index: u32) -> Result<()> {
        let count = self.len();
        if index >= count {
            return Err(SwarmError::invalid_input(
                "index",
                format!("Chunk {} out of range [0, {})", index, count),
            ));
        }
        Ok(())
    }

    fn mark(&self, index: u32) {
        self.bits.lock().set(index as usize, true);
    }

    fn has(&self, index: u32) -> bool {
        self.bits
            .lock()
            .get(index as usize)
            .map(|bit| *bit)
            .unwrap_or(false)
    }

    fn count(&self) -> u32 {
        self.bits.lock().count_ones() as u32
    }

    fn reset(&self) {
        self.bits.lock().fill(false);
    }

    fn missing_ranges(&self) -> Vec<ChunkRange> {
        let bits = self.bits.lock();
        let mut ranges: Vec<ChunkRange> = Vec::new();
        for index in bits.iter_zeros() {
            let index = index as u32;
            match ranges.last_mut() {
                Some(last) if last.end + 1 == index => last.end = index,
                _ => ranges.push(ChunkRange::new(index, index)),
            }
        }
        ranges
    }
}

/// Chunks kept in memory
#[derive(Debug)]
pub struct MemoryChunkStore {
    chunks: RwLock<Vec<Option<Bytes>>>,
    presence: Presence,
}

impl MemoryChunkStore {
    pub fn new(chunk_count: u32) -> Self {
        Self {
            chunks: RwLock::new(vec![None; chunk_count as usize]),
            presence: Presence::new(chunk_count),
        }
    }
}

#[async_trait]
impl ChunkStore for MemoryChunkStore {
    fn chunk_count(&self) -> u32 {
        self.presence.len()
    }

    async fn put(&self, index: u32, data: Bytes) -> Result<()> {
        self.presence.check(index)?;
        self.chunks.write()[index as usize] = Some(data);
        self.presence.mark(index);
        Ok(())
    }

    async fn get(&self, index: u32) -> Result<Bytes> {
        self.presence.check(index)?;
        self.chunks.read()[index as usize].clone().ok_or_else(|| {
            SwarmError::invalid_input("index", format!("Chunk {} not stored", index))
        })
    }

    fn has(&self, index: u32) -> bool {
        self.presence.has(index)
    }

    fn received(&self) -> u32 {
        self.presence.count()
    }

    fn missing_ranges(&self) -> Vec<ChunkRange> {
        self.presence.missing_ranges()
    }

    async fn clear(&self) -> Result<()> {
        self.chunks.write().iter_mut().for_each(|c| *c = None);
        self.presence.reset();
        Ok(())
    }

    async fn dispose(&self) -> Result<()> {
        self.clear().await
    }
}

/// Chunks kept as individual files under `<chunk_dir>/<file_name>/<index>.chunk`
#[derive(Debug)]
pub struct DiskChunkStore {
    dir: PathBuf,
    presence: Presence,
}

impl DiskChunkStore {
    /// Create an empty store, discarding leftovers of an earlier attempt
    pub async fn create(chunk_dir: &Path, file_name: &str, chunk_count: u32) -> Result<Self> {
        let dir = chunk_dir.join(file_name);
        let exists = tokio::fs::try_exists(&dir)
            .await
            .map_err(|e| SwarmError::from(e).at_path(&dir))?;
        if exists {
            tokio::fs::remove_dir_all(&dir)
                .await
                .map_err(|e| SwarmError::from(e).at_path(&dir))?;
        }
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| SwarmError::from(e).at_path(&dir))?;

        Ok(Self {
            dir,
            presence: Presence::new(chunk_count),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File holding chunk `index`
    pub fn chunk_path(&self, index: u32) -> PathBuf {
        self.dir.join(format!("{}.chunk", index))
    }
}

#[async_trait]
impl ChunkStore for DiskChunkStore {
    fn chunk_count(&self) -> u32 {
        self.presence.len()
    }

    async fn put(&self, index: u32, data: Bytes) -> Result<()> {
        self.presence.check(index)?;
        let path = self.chunk_path(index);
        tokio::fs::write(&path, &data).await.map_err(|e| {
            SwarmError::storage(
                StorageErrorKind::Io,
                &path,
                format!("Failed to write chunk {}: {}", index, e),
            )
        })?;
        self.presence.mark(index);
        Ok(())
    }

    async fn get(&self, index: u32) -> Result<Bytes> {
        self.presence.check(index)?;
        let path = self.chunk_path(index);
        let data = tokio::fs::read(&path)
            .await
            .map_err(|e| SwarmError::from(e).at_path(&path))?;
        Ok(Bytes::from(data))
    }

    fn has(&self, index: u32) -> bool {
        self.presence.has(index)
    }

    fn received(&self) -> u32 {
        self.presence.count()
    }

    fn missing_ranges(&self) -> Vec<ChunkRange> {
        self.presence.missing_ranges()
    }

    async fn clear(&self) -> Result<()> {
        for index in 0..self.presence.len() {
            if !self.presence.has(index) {
                continue;
            }
            let path = self.chunk_path(index);
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(SwarmError::from(e).at_path(&path)),
            }
        }
        self.presence.reset();
        Ok(())
    }

    async fn dispose(&self) -> Result<()> {
        self.presence.reset();
        match tokio::fs::remove_dir_all(&self.dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SwarmError::from(e).at_path(&self.dir)),
        }
    }
}
