//! Torrent descriptor
//!
//! A descriptor names one shared file and fixes how it is cut into chunks.
//! The bencoded form is `{announce, hashinfo: {chunk_size, content_hash?,
//! file_name, file_size, num_chunks}}`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use sha2::Sha256;

use super::bencode::{self, Value};
use crate::error::{ProtocolErrorKind, Result, SwarmError};

/// SHA-1 hash (20 bytes)
pub type Sha1Hash = [u8; 20];

fn malformed(message: impl Into<String>) -> SwarmError {
    SwarmError::protocol(ProtocolErrorKind::MalformedDescriptor, message)
}

/// Check that a file name is a single plain path component
pub fn validate_file_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(SwarmError::invalid_input("file_name", "Must not be empty"));
    }
    if name == "." || name == ".." || name.contains(['/', '\\', '\0']) {
        return Err(SwarmError::invalid_input(
            "file_name",
            format!("Not a plain file name: {:?}", name),
        ));
    }
    Ok(())
}

/// Chunk arithmetic for one file
///
/// Every chunk is `chunk_size` bytes except the last, which holds the
/// remainder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkLayout {
    file_size: u64,
    chunk_size: u64,
    chunk_count: u32,
}

impl ChunkLayout {
    /// Lay out a non-empty file
    pub fn new(file_size: u64, chunk_size: u64) -> Result<Self> {
        if chunk_size == 0 {
            return Err(SwarmError::invalid_input("chunk_size", "Must be at least 1"));
        }
        if file_size == 0 {
            return Err(SwarmError::invalid_input(
                "file_size",
                "Empty files cannot be shared",
            ));
        }
        // Both sizes are bencoded as signed integers
        if chunk_size > i64::MAX as u64 {
            return Err(SwarmError::invalid_input(
                "chunk_size",
                "Exceeds the largest encodable integer",
            ));
        }
        if file_size > i64::MAX as u64 {
            return Err(SwarmError::invalid_input(
                "file_size",
                "Exceeds the largest encodable integer",
            ));
        }
        let count = file_size.div_ceil(chunk_size);
        let chunk_count = u32::try_from(count).map_err(|_| {
            SwarmError::invalid_input(
                "chunk_size",
                format!("{} chunks exceed the 32-bit index space", count),
            )
        })?;
        Ok(Self {
            file_size,
            chunk_size,
            chunk_count,
        })
    }

    /// Rebuild a layout from advertised values, checking they agree
    pub fn from_parts(file_size: u64, chunk_size: u64, chunk_count: u32) -> Result<Self> {
        let layout = Self::new(file_size, chunk_size)?;
        if layout.chunk_count != chunk_count {
            return Err(SwarmError::invalid_input(
                "chunk_count",
                format!(
                    "{} bytes in {}-byte chunks is {} chunks, not {}",
                    file_size, chunk_size, layout.chunk_count, chunk_count
                ),
            ));
        }
        Ok(layout)
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    pub fn chunk_count(&self) -> u32 {
        self.chunk_count
    }

    /// Byte offset of a chunk within the file
    pub fn chunk_offset(&self, index: u32) -> Option<u64> {
        (index < self.chunk_count).then(|| index as u64 * self.chunk_size)
    }

    /// Length of a chunk in bytes
    pub fn chunk_len(&self, index: u32) -> Option<u64> {
        let offset = self.chunk_offset(index)?;
        Some(self.chunk_size.min(self.file_size - offset))
    }
}

/// Content hash algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    Sha1,
    Sha256,
}

impl HashAlgorithm {
    /// Digest length in bytes
    pub fn digest_len(&self) -> usize {
        match self {
            Self::Sha1 => 20,
            Self::Sha256 => 32,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Sha1 => "sha1",
            Self::Sha256 => "sha256",
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Hash of a file's bytes, used to verify a reassembled download
///
/// Textual form is `<algo>:<hex>`. A bare 64-digit hex string is read as
/// SHA-256 and a bare 40-digit one as SHA-1.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentHash {
    algorithm: HashAlgorithm,
    digest: Vec<u8>,
}

impl ContentHash {
    pub fn new(algorithm: HashAlgorithm, digest: Vec<u8>) -> Result<Self> {
        if digest.len() != algorithm.digest_len() {
            return Err(SwarmError::invalid_input(
                "content_hash",
                format!(
                    "{} digest must be {} bytes, got {}",
                    algorithm,
                    algorithm.digest_len(),
                    digest.len()
                ),
            ));
        }
        Ok(Self { algorithm, digest })
    }

    /// Hash a buffer with SHA-256
    pub fn sha256_of(data: &[u8]) -> Self {
        Self {
            algorithm: HashAlgorithm::Sha256,
            digest: Sha256::digest(data).to_vec(),
        }
    }

    /// Hash a buffer with SHA-1
    pub fn sha1_of(data: &[u8]) -> Self {
        Self {
            algorithm: HashAlgorithm::Sha1,
            digest: Sha1::digest(data).to_vec(),
        }
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    pub fn digest(&self) -> &[u8] {
        &self.digest
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.digest)
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.to_hex())
    }
}

impl FromStr for ContentHash {
    type Err = SwarmError;

    fn from_str(s: &str) -> Result<Self> {
        let (algorithm, hex_digest) = match s.split_once(':') {
            Some((algo, digest)) => {
                let algorithm = match algo.to_ascii_lowercase().as_str() {
                    "sha1" | "sha-1" => HashAlgorithm::Sha1,
                    "sha256" | "sha-256" => HashAlgorithm::Sha256,
                    other => {
                        return Err(SwarmError::invalid_input(
                            "content_hash",
                            format!("Unsupported hash algorithm: {}", other),
                        ))
                    }
                };
                (algorithm, digest)
            }
            None => match s.len() {
                64 => (HashAlgorithm::Sha256, s),
                40 => (HashAlgorithm::Sha1, s),
                n => {
                    return Err(SwarmError::invalid_input(
                        "content_hash",
                        format!("Cannot infer algorithm from {}-digit digest", n),
                    ))
                }
            },
        };

        let digest = hex::decode(hex_digest).map_err(|e| {
            SwarmError::invalid_input("content_hash", format!("Invalid hex digest: {}", e))
        })?;
        Self::new(algorithm, digest)
    }
}

impl Serialize for ContentHash {
    fn serialize<S: serde::Serializer>(
        &self,
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ContentHash {
    fn deserialize<D: serde::Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Metadata describing one shared file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Descriptor {
    /// Tracker URL
    pub announce: String,
    pub file_name: String,
    pub chunk_size: u64,
    pub chunk_count: u32,
    pub file_size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<ContentHash>,
}

impl Descriptor {
    /// Describe a file of `file_size` bytes, deriving the chunk count
    pub fn new(
        announce: impl Into<String>,
        file_name: impl Into<String>,
        file_size: u64,
        chunk_size: u64,
    ) -> Result<Self> {
        let layout = ChunkLayout::new(file_size, chunk_size)?;
        let descriptor = Self {
            announce: announce.into(),
            file_name: file_name.into(),
            chunk_size,
            chunk_count: layout.chunk_count(),
            file_size,
            content_hash: None,
        };
        descriptor.validate()?;
        Ok(descriptor)
    }

    /// Attach a content hash
    pub fn with_content_hash(mut self, hash: ContentHash) -> Self {
        self.content_hash = Some(hash);
        self
    }

    /// Check the descriptor's invariants
    pub fn validate(&self) -> Result<()> {
        if self.announce.is_empty() {
            return Err(SwarmError::invalid_input("announce", "Must not be empty"));
        }
        validate_file_name(&self.file_name)?;
        ChunkLayout::from_parts(self.file_size, self.chunk_size, self.chunk_count)?;
        Ok(())
    }

    pub fn layout(&self) -> Result<ChunkLayout> {
        ChunkLayout::from_parts(self.file_size, self.chunk_size, self.chunk_count)
    }

    /// Length of the last chunk
    pub fn last_chunk_len(&self) -> u64 {
        self.file_size - self.chunk_size * (self.chunk_count as u64 - 1)
    }

    /// Legacy identifying hash: SHA-1 of `file_name || chunk_size || chunk_count`
    ///
    /// Covers metadata only, never the file bytes.
    pub fn info_hash(&self) -> Sha1Hash {
        compute_info_hash(&self.file_name, self.chunk_size, self.chunk_count)
    }

    pub fn info_hash_hex(&self) -> String {
        hex::encode(self.info_hash())
    }

    /// Canonical bencode form
    pub fn encode(&self) -> Vec<u8> {
        let mut hashinfo = vec![
            ("chunk_size", Value::Integer(self.chunk_size as i64)),
            ("file_name", Value::text(&self.file_name)),
            ("file_size", Value::Integer(self.file_size as i64)),
            ("num_chunks", Value::Integer(self.chunk_count as i64)),
        ];
        if let Some(hash) = &self.content_hash {
            hashinfo.push(("content_hash", Value::text(hash.to_string())));
        }

        Value::dict([
            ("announce", Value::text(&self.announce)),
            ("hashinfo", Value::dict(hashinfo)),
        ])
        .encode()
    }

    /// Parse canonical bencode produced by [`Descriptor::encode`]
    pub fn decode(data: &[u8]) -> Result<Self> {
        let root = bencode::decode(data).map_err(|e| malformed(e.to_string()))?;
        if root.as_dict().is_none() {
            return Err(malformed("Root must be a dictionary"));
        }

        let announce = required_str(&root, "announce")?;
        let info = root
            .get("hashinfo")
            .filter(|v| v.as_dict().is_some())
            .ok_or_else(|| malformed("Missing or invalid 'hashinfo' dictionary"))?;

        let file_name = required_str(info, "file_name")?;
        let chunk_size = required_uint(info, "chunk_size")?;
        let file_size = required_uint(info, "file_size")?;
        let chunk_count = u32::try_from(required_uint(info, "num_chunks")?)
            .map_err(|_| malformed("'num_chunks' exceeds 32 bits"))?;

        let content_hash = match info.get("content_hash") {
            None => None,
            Some(v) => {
                let text = v
                    .as_str()
                    .ok_or_else(|| malformed("'content_hash' must be a string"))?;
                Some(text.parse::<ContentHash>().map_err(|e| malformed(e.to_string()))?)
            }
        };

        let descriptor = Self {
            announce,
            file_name,
            chunk_size,
            chunk_count,
            file_size,
            content_hash,
        };
        descriptor.validate().map_err(|e| malformed(e.to_string()))?;
        Ok(descriptor)
    }
}

/// SHA-1 over the decimal concatenation `file_name || chunk_size || chunk_count`
pub fn compute_info_hash(file_name: &str, chunk_size: u64, chunk_count: u32) -> Sha1Hash {
    let mut hasher = Sha1::new();
    hasher.update(file_name.as_bytes());
    hasher.update(chunk_size.to_string().as_bytes());
    hasher.update(chunk_count.to_string().as_bytes());
    hasher.finalize().into()
}

fn required_str(dict: &Value, key: &str) -> Result<String> {
    dict.get(key)
        .and_then(Value::as_str)
        .map(String::from)
        .ok_or_else(|| malformed(format!("Missing or non-text '{}'", key)))
}

fn required_uint(dict: &Value, key: &str) -> Result<u64> {
    dict.get(key)
        .and_then(Value::as_uint)
        .ok_or_else(|| malformed(format!("Missing or invalid '{}'", key)))
}
