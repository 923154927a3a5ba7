//! Content hash verification for reassembled files

use std::path::Path;

use sha1::{Digest, Sha1};
use sha2::Sha256;
use tokio::fs::File;
use tokio::io::AsyncReadExt;

use crate::descriptor::{ContentHash, HashAlgorithm};
use crate::error::{ProtocolErrorKind, Result, StorageErrorKind, SwarmError};

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Hash a file's bytes without loading it whole
pub async fn compute_content_hash(path: &Path, algorithm: HashAlgorithm) -> Result<ContentHash> {
    let digest = match algorithm {
        HashAlgorithm::Sha1 => hash_file::<Sha1>(path).await?,
        HashAlgorithm::Sha256 => hash_file::<Sha256>(path).await?,
    };
    ContentHash::new(algorithm, digest)
}

async fn hash_file<D: Digest>(path: &Path) -> Result<Vec<u8>> {
    let mut file = File::open(path).await.map_err(|e| {
        SwarmError::storage(
            StorageErrorKind::Io,
            path,
            format!("Failed to open file for hashing: {}", e),
        )
    })?;

    let mut hasher = D::new();
    let mut buffer = vec![0u8; READ_BUFFER_SIZE];
    loop {
        let n = file.read(&mut buffer).await.map_err(|e| {
            SwarmError::storage(
                StorageErrorKind::Io,
                path,
                format!("Failed to read file for hashing: {}", e),
            )
        })?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(hasher.finalize().to_vec())
}

/// Check a file against an expected hash; mismatch is an integrity error
pub async fn verify_content_hash(path: &Path, expected: &ContentHash) -> Result<()> {
    let actual = compute_content_hash(path, expected.algorithm()).await?;
    if actual != *expected {
        return Err(hash_mismatch_error(expected, &actual));
    }
    Ok(())
}

pub fn hash_mismatch_error(expected: &ContentHash, actual: &ContentHash) -> SwarmError {
    SwarmError::protocol(
        ProtocolErrorKind::HashMismatch,
        format!(
            "Content hash verification failed: expected {}, got {}",
            expected, actual
        ),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn hello_file() -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, b"Hello, World!").unwrap();
        file
    }

    #[tokio::test]
    async fn test_sha256_content_hash() {
        let file = hello_file();
        let hash = compute_content_hash(file.path(), HashAlgorithm::Sha256)
            .await
            .unwrap();
        assert_eq!(
            hash.to_hex(),
            "dffd6021bb2bd5b0af676290809ec3a53191dd81c7f70a4b28688a362182986f"
        );
    }

    #[tokio::test]
    async fn test_sha1_content_hash() {
        let file = hello_file();
        let hash = compute_content_hash(file.path(), HashAlgorithm::Sha1)
            .await
            .unwrap();
        assert_eq!(hash.to_hex(), "0a0a9f2a6772942557ab5355d76af442f8f65e01");
    }

    #[tokio::test]
    async fn test_streaming_matches_in_memory() {
        let data: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        let mut file = NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, &data).unwrap();

        let streamed = compute_content_hash(file.path(), HashAlgorithm::Sha256)
            .await
            .unwrap();
        assert_eq!(streamed, ContentHash::sha256_of(&data));
    }

    #[tokio::test]
    async fn test_verify_content_hash() {
        let file = hello_file();
        let good = ContentHash::sha256_of(b"Hello, World!");
        verify_content_hash(file.path(), &good).await.unwrap();

        let bad = ContentHash::sha256_of(b"Hello, World?");
        let err = verify_content_hash(file.path(), &bad).await.unwrap_err();
        assert!(err.is_integrity_mismatch());
    }

    #[tokio::test]
    async fn test_missing_file_is_storage_error() {
        let err = compute_content_hash(Path::new("/nonexistent/file"), HashAlgorithm::Sha1)
            .await
            .unwrap_err();
        assert!(matches!(err, SwarmError::Storage { .. }));
    }
}
