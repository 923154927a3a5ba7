//! Shared directory
//!
//! The files a peer offers live flat in one directory. Names handed in by
//! remote clients are checked to be plain file names before they touch the
//! filesystem.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::descriptor::{validate_file_name, ChunkLayout, ContentHash, Descriptor, HashAlgorithm};
use crate::error::{Result, StorageErrorKind, SwarmError};
use crate::swarm::checksum::compute_content_hash;
use crate::tracker::{AnnouncedFile, Announcement};

/// A directory of files offered to the swarm
#[derive(Debug, Clone)]
pub struct SharedDirectory {
    root: PathBuf,
}

impl SharedDirectory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Names of the regular files in the directory, sorted
    pub async fn list_files(&self) -> Result<Vec<String>> {
        let mut entries = tokio::fs::read_dir(&self.root)
            .await
            .map_err(|e| SwarmError::from(e).at_path(&self.root))?;

        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| SwarmError::from(e).at_path(&self.root))?
        {
            let file_type = entry.file_type().await?;
            if !file_type.is_file() {
                continue;
            }
            match entry.file_name().into_string() {
                Ok(name) if !name.starts_with('.') => names.push(name),
                Ok(_) => {}
                Err(raw) => tracing::debug!("Skipping non UTF-8 file name {:?}", raw),
            }
        }
        names.sort();
        Ok(names)
    }

    /// Resolve a requested name to a file inside the directory
    pub fn resolve(&self, file_name: &str) -> Result<PathBuf> {
        validate_file_name(file_name).map_err(|_| {
            SwarmError::storage(
                StorageErrorKind::PathTraversal,
                &self.root,
                format!("Refusing file name {:?}", file_name),
            )
        })?;
        Ok(self.root.join(file_name))
    }

    /// Open a file for chunked reading
    ///
    /// Each call gets its own handle and read cursor.
    pub async fn open(&self, file_name: &str, chunk_size: u64) -> Result<ChunkReader> {
        let path = self.resolve(file_name)?;
        let file = File::open(&path)
            .await
            .map_err(|e| SwarmError::from(e).at_path(&path))?;

        let metadata = file.metadata().await?;
        if !metadata.is_file() {
            return Err(SwarmError::storage(
                StorageErrorKind::NotFound,
                &path,
                "Not a regular file",
            ));
        }

        let layout = ChunkLayout::new(metadata.len(), chunk_size)?;
        Ok(ChunkReader { file, path, layout })
    }

    /// SHA-256 of a shared file
    pub async fn content_hash(&self, file_name: &str) -> Result<ContentHash> {
        let path = self.resolve(file_name)?;
        compute_content_hash(&path, HashAlgorithm::Sha256).await
    }

    /// Build a descriptor for a shared file, content hash included
    pub async fn describe(
        &self,
        file_name: &str,
        announce: &str,
        chunk_size: u64,
    ) -> Result<Descriptor> {
        let path = self.resolve(file_name)?;
        let file_size = tokio::fs::metadata(&path)
            .await
            .map_err(|e| SwarmError::from(e).at_path(&path))?
            .len();

        let hash = self.content_hash(file_name).await?;
        Ok(Descriptor::new(announce, file_name, file_size, chunk_size)?.with_content_hash(hash))
    }

    /// Announcement listing every non-empty shared file with its SHA-256
    pub async fn announcement(&self, ip: &str, port: u16) -> Result<Announcement> {
        let mut files = Vec::new();
        for name in self.list_files().await? {
            let path = self.root.join(&name);
            if tokio::fs::metadata(&path).await?.len() == 0 {
                tracing::debug!("Not announcing empty file {}", name);
                continue;
            }
            let hash = self.content_hash(&name).await?;
            files.push(AnnouncedFile::new(name).with_hash(hash));
        }

        Ok(Announcement {
            ip: ip.to_string(),
            port,
            files,
        })
    }
}

/// Reads one file chunk by chunk
#[derive(Debug)]
pub struct ChunkReader {
    file: File,
    path: PathBuf,
    layout: ChunkLayout,
}

impl ChunkReader {
    pub fn layout(&self) -> &ChunkLayout {
        &self.layout
    }

    /// Read chunk `index`; the last chunk may be short
    pub async fn read_chunk(&mut self, index: u32) -> Result<Bytes> {
        let (offset, len) = match (self.layout.chunk_offset(index), self.layout.chunk_len(index)) {
            (Some(offset), Some(len)) => (offset, len),
            _ => {
                return Err(SwarmError::invalid_input(
                    "index",
                    format!(
                        "Chunk {} out of range (file has {})",
                        index,
                        self.layout.chunk_count()
                    ),
                ))
            }
        };

        self.file
            .seek(SeekFrom::Start(offset))
            .await
            .map_err(|e| SwarmError::from(e).at_path(&self.path))?;

        let mut buf = vec![0u8; len as usize];
        self.file
            .read_exact(&mut buf)
            .await
            .map_err(|e| SwarmError::from(e).at_path(&self.path))?;
        Ok(Bytes::from(buf))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_list_files_skips_dirs_and_hidden() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("b.bin"), b"bb").unwrap();
        std::fs::write(dir.path().join("a.bin"), b"a").unwrap();
        std::fs::write(dir.path().join(".hidden"), b"x").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();

        let share = SharedDirectory::new(dir.path());
        assert_eq!(share.list_files().await.unwrap(), vec!["a.bin", "b.bin"]);
    }

    #[tokio::test]
    async fn test_read_chunks() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("f.bin"), b"0123456789").unwrap();

        let share = SharedDirectory::new(dir.path());
        let mut reader = share.open("f.bin", 4).await.unwrap();
        assert_eq!(reader.layout().chunk_count(), 3);
        assert_eq!(&reader.read_chunk(2).await.unwrap()[..], b"89");
        assert_eq!(&reader.read_chunk(0).await.unwrap()[..], b"0123");
        assert_eq!(&reader.read_chunk(1).await.unwrap()[..], b"4567");
        assert!(reader.read_chunk(3).await.is_err());
    }

    #[tokio::test]
    async fn test_resolve_refuses_traversal() {
        let share = SharedDirectory::new("/srv/share");
        for name in ["../secret", "a/b", "..", ""] {
            match share.resolve(name) {
                Err(SwarmError::Storage { kind, .. }) => {
                    assert_eq!(kind, StorageErrorKind::PathTraversal)
                }
                other => panic!("{:?} resolved to {:?}", name, other),
            }
        }
    }

    #[tokio::test]
    async fn test_open_missing_and_empty() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("empty.bin"), b"").unwrap();
        let share = SharedDirectory::new(dir.path());

        match share.open("missing.bin", 4).await {
            Err(SwarmError::Storage { kind, .. }) => assert_eq!(kind, StorageErrorKind::NotFound),
            other => panic!("unexpected {:?}", other),
        }
        assert!(share.open("empty.bin", 4).await.is_err());
    }

    #[tokio::test]
    async fn test_describe_and_announce() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("movie.mp4"), vec![7u8; 1000]).unwrap();
        std::fs::write(dir.path().join("empty.txt"), b"").unwrap();
        let share = SharedDirectory::new(dir.path());

        let descriptor = share
            .describe("movie.mp4", "http://localhost:5000", 300)
            .await
            .unwrap();
        assert_eq!(descriptor.chunk_count, 4);
        assert_eq!(descriptor.file_size, 1000);
        assert_eq!(
            descriptor.content_hash,
            Some(ContentHash::sha256_of(&[7u8; 1000]))
        );

        let announcement = share.announcement("10.0.0.1", 7000).await.unwrap();
        assert_eq!(announcement.files.len(), 1);
        assert_eq!(announcement.files[0].name, "movie.mp4");
        assert_eq!(
            announcement.files[0].content_hash,
            descriptor.content_hash
        );
    }
}
