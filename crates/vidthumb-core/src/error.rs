//! Error types for Vidthumb core operations.
//!
//! Extraction failures are surfaced to callers through [`ExtractError`].
//! Storage failures ([`StoreError`]) are consumed by the cache service and
//! never reach the orchestrator's callers.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using the crate's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in Vidthumb core operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Frame extraction failed.
    #[error(transparent)]
    Extract(#[from] ExtractError),

    /// Durable key/value store failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Malformed or unencodable image payload.
    #[error(transparent)]
    Payload(#[from] PayloadError),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// File system operation failed.
    #[error("File system error at {path}: {message}")]
    FileSystem {
        /// Path where the error occurred.
        path: PathBuf,
        /// Error message.
        message: String,
    },

    /// IO error wrapper.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Create a file system error for the given path.
    pub fn file_system(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::FileSystem {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Broad classification of an extraction failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The platform lacks the required streaming decode capability.
    UnsupportedDecode,
    /// Loading the source failed twice.
    Network,
    /// Decoding the source failed twice.
    Media,
    /// The wall-clock budget elapsed.
    Timeout,
    /// The caller cancelled the extraction.
    Cancelled,
    /// Any other fatal failure.
    Fatal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnsupportedDecode => write!(f, "unsupported_decode"),
            Self::Network => write!(f, "network"),
            Self::Media => write!(f, "media"),
            Self::Timeout => write!(f, "timeout"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Fatal => write!(f, "fatal"),
        }
    }
}

/// Errors produced by the frame extractor.
///
/// `Clone` so that a single outcome can be handed to every caller waiting on
/// the same deduplicated extraction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractError {
    /// No adaptive-streaming decode support is available.
    #[error("Streaming decode not supported: {0}")]
    UnsupportedDecode(String),

    /// The source could not be loaded, even after a reload.
    #[error("Network error: {0}")]
    Network(String),

    /// The source could not be decoded, even after a recovery attempt.
    #[error("Media error: {0}")]
    Media(String),

    /// The extraction did not finish within its budget.
    #[error("Frame extraction timed out after {timeout_ms} ms")]
    Timeout {
        /// The budget that elapsed, in milliseconds.
        timeout_ms: u64,
    },

    /// The extraction was cancelled by its caller.
    #[error("Frame extraction cancelled")]
    Cancelled,

    /// Any other fatal decode, raster or encode failure.
    #[error("Frame extraction failed: {0}")]
    Fatal(String),
}

impl ExtractError {
    /// Get the kind of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::UnsupportedDecode(_) => ErrorKind::UnsupportedDecode,
            Self::Network(_) => ErrorKind::Network,
            Self::Media(_) => ErrorKind::Media,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Fatal(_) => ErrorKind::Fatal,
        }
    }

    /// Create a fatal error.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal(message.into())
    }
}

/// Errors reported by a durable key/value store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Writing the value would exceed the store's quota.
    #[error("Storage quota exceeded while writing {key} ({needed} bytes, {available} available)")]
    QuotaExceeded {
        /// Key being written.
        key: String,
        /// Bytes the write required.
        needed: u64,
        /// Bytes still available before the write.
        available: u64,
    },

    /// The key cannot be represented by the store.
    #[error("Invalid store key: {0}")]
    InvalidKey(String),

    /// Underlying I/O failed.
    #[error("Store I/O error for {key}: {reason}")]
    Io {
        /// Key being accessed.
        key: String,
        /// Failure description.
        reason: String,
    },
}

impl StoreError {
    /// Whether this error reports a full store.
    #[must_use]
    pub const fn is_quota_exceeded(&self) -> bool {
        matches!(self, Self::QuotaExceeded { .. })
    }
}

/// Errors raised while building or parsing image payloads.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PayloadError {
    /// The string is not a base64 data URL.
    #[error("Invalid data URL: {0}")]
    InvalidDataUrl(String),

    /// The base64 payload could not be decoded.
    #[error("Failed to decode image payload: {0}")]
    Decode(String),

    /// The raster could not be encoded.
    #[error("Failed to encode image: {0}")]
    Encode(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_display() {
        let err = ExtractError::Timeout { timeout_ms: 8000 };
        assert_eq!(err.to_string(), "Frame extraction timed out after 8000 ms");
        assert_eq!(err.kind(), ErrorKind::Timeout);
    }

    #[test]
    fn test_extract_error_kinds() {
        assert_eq!(
            ExtractError::UnsupportedDecode("no hls".into()).kind(),
            ErrorKind::UnsupportedDecode
        );
        assert_eq!(ExtractError::Network("reset".into()).kind(), ErrorKind::Network);
        assert_eq!(ExtractError::Media("bad".into()).kind(), ErrorKind::Media);
        assert_eq!(ExtractError::Cancelled.kind(), ErrorKind::Cancelled);
        assert_eq!(ExtractError::fatal("boom").kind(), ErrorKind::Fatal);
    }

    #[test]
    fn test_quota_exceeded_detection() {
        let err = StoreError::QuotaExceeded {
            key: "video_thumbnail_1".into(),
            needed: 10,
            available: 2,
        };
        assert!(err.is_quota_exceeded());
        assert!(err.to_string().contains("video_thumbnail_1"));
        assert!(!StoreError::InvalidKey(String::new()).is_quota_exceeded());
    }

    #[test]
    fn test_extract_error_conversion() {
        let err: Error = ExtractError::Cancelled.into();
        assert!(matches!(err, Error::Extract(ExtractError::Cancelled)));
        assert_eq!(err.to_string(), "Frame extraction cancelled");
    }

    #[test]
    fn test_file_system_error_display() {
        let err = Error::file_system("/test/path", "permission denied");
        assert!(err.to_string().contains("/test/path"));
        assert!(err.to_string().contains("permission denied"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_error_kind_display() {
        assert_eq!(ErrorKind::UnsupportedDecode.to_string(), "unsupported_decode");
        assert_eq!(ErrorKind::Timeout.to_string(), "timeout");
    }
}
