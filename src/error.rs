//! Typed error hierarchy for swarmshare
//!
//! Every error type includes context about what went wrong and whether
//! the operation can be retried.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use crate::swarm::ChunkRange;
use crate::types::PeerEndpoint;

/// Main error type for the swarm engine
#[derive(Debug, Clone, Error)]
pub enum SwarmError {
    /// Network-related errors (connection, timeout, reset)
    #[error("Network error: {message}")]
    Network {
        kind: NetworkErrorKind,
        message: String,
        retryable: bool,
    },

    /// Storage/filesystem errors
    #[error("Storage error at {path:?}: {message}")]
    Storage {
        kind: StorageErrorKind,
        path: PathBuf,
        message: String,
    },

    /// Protocol-level errors (descriptor, locator, peer wire, tracker)
    #[error("Protocol error: {message}")]
    Protocol {
        kind: ProtocolErrorKind,
        message: String,
    },

    /// Invalid input from the caller
    #[error("Invalid input for '{field}': {message}")]
    InvalidInput {
        field: &'static str,
        message: String,
    },

    /// Tracker registration rejected; the registry is left unchanged
    #[error("Invalid registration: {0}")]
    InvalidRegistration(String),

    /// A required query parameter was absent
    #[error("Missing parameter: {0}")]
    MissingParameter(&'static str),

    /// A download was requested with an empty peer list
    #[error("No peers available for '{file_name}'")]
    NoPeersAvailable { file_name: String },

    /// One or more download sessions failed
    #[error(
        "Download of '{file_name}' incomplete: missing chunk ranges [{}]",
        format_ranges(.missing)
    )]
    PartialDownload {
        file_name: String,
        missing: Vec<ChunkRange>,
        failures: Vec<SessionFailure>,
    },

    /// The operation was cancelled
    #[error("Cancelled")]
    Cancelled,

    /// Internal error (bug)
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Network error subtypes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkErrorKind {
    /// Connection refused
    ConnectionRefused,
    /// Connection reset or closed early
    ConnectionReset,
    /// Connection or I/O timeout
    Timeout,
    /// Tracker returned error status
    HttpStatus(u16),
    /// Other network error
    Other,
}

/// Storage error subtypes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageErrorKind {
    /// File/directory not found
    NotFound,
    /// Permission denied
    PermissionDenied,
    /// File name escapes the shared directory
    PathTraversal,
    /// File already exists
    AlreadyExists,
    /// I/O error
    Io,
}

/// Protocol error subtypes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolErrorKind {
    /// Bencode parsing error
    BencodeParse,
    /// Descriptor failed to decode or violates its invariants
    MalformedDescriptor,
    /// Magnet locator failed to decode
    InvalidLocator,
    /// Peer sent an out-of-sequence, out-of-range or malformed message
    PeerProtocol,
    /// Reassembled file does not match the expected content hash
    HashMismatch,
    /// Tracker error
    TrackerError,
}

/// A download session that did not deliver its range
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionFailure {
    /// Peer the session was talking to
    pub peer: PeerEndpoint,
    /// Range the session was responsible for
    pub range: ChunkRange,
    /// Why it failed
    pub reason: String,
}

impl fmt::Display for SessionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: {}", self.peer, self.range, self.reason)
    }
}

fn format_ranges(ranges: &[ChunkRange]) -> String {
    ranges
        .iter()
        .map(|r| r.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

impl SwarmError {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network { retryable, .. } => *retryable,
            Self::Storage { kind, .. } => matches!(kind, StorageErrorKind::Io),
            Self::Protocol { kind, .. } => matches!(
                kind,
                ProtocolErrorKind::TrackerError | ProtocolErrorKind::HashMismatch
            ),
            Self::PartialDownload { .. } => true,
            _ => false,
        }
    }

    /// Whether a peer broke the chunk-transfer handshake
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            Self::Protocol {
                kind: ProtocolErrorKind::PeerProtocol,
                ..
            }
        )
    }

    /// Whether the reassembled file failed verification
    pub fn is_integrity_mismatch(&self) -> bool {
        matches!(
            self,
            Self::Protocol {
                kind: ProtocolErrorKind::HashMismatch,
                ..
            }
        )
    }

    /// Create a network error
    pub fn network(kind: NetworkErrorKind, message: impl Into<String>) -> Self {
        let retryable = matches!(
            kind,
            NetworkErrorKind::Timeout | NetworkErrorKind::ConnectionReset
        );
        Self::Network {
            kind,
            message: message.into(),
            retryable,
        }
    }

    /// Create a storage error
    pub fn storage(
        kind: StorageErrorKind,
        path: impl Into<PathBuf>,
        message: impl Into<String>,
    ) -> Self {
        Self::Storage {
            kind,
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a protocol error
    pub fn protocol(kind: ProtocolErrorKind, message: impl Into<String>) -> Self {
        Self::Protocol {
            kind,
            message: message.into(),
        }
    }

    /// Create a peer protocol violation
    pub fn violation(message: impl Into<String>) -> Self {
        Self::protocol(ProtocolErrorKind::PeerProtocol, message)
    }

    /// Create an invalid input error
    pub fn invalid_input(field: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidInput {
            field,
            message: message.into(),
        }
    }

    /// Attach a path to a storage error that was converted without one
    pub fn at_path(self, path: impl Into<PathBuf>) -> Self {
        match self {
            Self::Storage { kind, message, .. } => Self::Storage {
                kind,
                path: path.into(),
                message,
            },
            other => other,
        }
    }
}

/// Result type alias for swarm operations
pub type Result<T> = std::result::Result<T, SwarmError>;

impl From<std::io::Error> for SwarmError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;
        let kind = match err.kind() {
            ErrorKind::NotFound => StorageErrorKind::NotFound,
            ErrorKind::PermissionDenied => StorageErrorKind::PermissionDenied,
            ErrorKind::AlreadyExists => StorageErrorKind::AlreadyExists,
            _ => StorageErrorKind::Io,
        };
        Self::Storage {
            kind,
            path: PathBuf::new(),
            message: err.to_string(),
        }
    }
}

#[cfg(feature = "http-tracker")]
impl From<reqwest::Error> for SwarmError {
    fn from(err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            NetworkErrorKind::Timeout
        } else if err.is_connect() {
            NetworkErrorKind::ConnectionRefused
        } else if let Some(status) = err.status() {
            NetworkErrorKind::HttpStatus(status.as_u16())
        } else {
            NetworkErrorKind::Other
        };

        let retryable = matches!(
            kind,
            NetworkErrorKind::Timeout | NetworkErrorKind::ConnectionRefused
        );

        Self::Network {
            kind,
            message: err.to_string(),
            retryable,
        }
    }
}

impl From<url::ParseError> for SwarmError {
    fn from(err: url::ParseError) -> Self {
        Self::invalid_input("url", err.to_string())
    }
}
