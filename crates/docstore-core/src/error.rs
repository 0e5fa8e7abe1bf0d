//! Error types for document store operations
//!
//! Every fallible operation returns [`DocResult`]. Argument and undo errors are
//! surfaced to the caller as-is; persisted-record errors carry the path of
//! the document file that failed to decode.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Document store error types with detailed context
#[derive(Debug, Clone, Error)]
pub enum DocStoreError {
    /// Malformed key, empty content, bad configuration or similar caller error
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// `undo()` was called with an empty undo log
    #[error("No pending action to undo")]
    NoPendingAction,

    /// `undo_key()` found no command targeting the key
    #[error("No undoable command for key {key}")]
    NoCommandForKey {
        /// The key that was searched for
        key: String,
    },

    /// A minimum was requested from an empty recency tracker.
    /// Only reachable if usage accounting and the tracker disagree.
    #[error("Recency tracker is empty")]
    EmptyCollection,

    /// I/O operation failed
    #[error("I/O error{}: {message} ({kind})", describe_path(.path))]
    Io {
        /// The file path where the error occurred
        path: Option<PathBuf>,
        /// The underlying I/O error kind
        kind: io::ErrorKind,
        /// Human-readable description
        message: String,
    },

    /// Persisted record checksum verification failed
    #[error("Checksum mismatch in {}: expected 0x{expected:08x}, got 0x{actual:08x}", .path.display())]
    ChecksumMismatch {
        /// File where checksum failed
        path: PathBuf,
        /// Checksum stored in the record header
        expected: u32,
        /// Checksum computed over the payload
        actual: u32,
    },

    /// Record does not start with the document magic bytes
    #[error("Magic bytes not found in {}: found {}", .path.display(), hex_bytes(.found_bytes))]
    NoMagicFound {
        /// File being read
        path: PathBuf,
        /// Bytes actually found
        found_bytes: [u8; 4],
    },

    /// Record is shorter than its header claims (partial write)
    #[error("Torn write in {}: expected {expected_size} bytes, only {available_bytes} available", .path.display())]
    TornWrite {
        /// File with torn write
        path: PathBuf,
        /// Size announced by the header
        expected_size: u64,
        /// Bytes actually present
        available_bytes: u64,
    },

    /// Record is structurally invalid
    #[error("Corrupted document record in {}: {reason}", .path.display())]
    Corrupted {
        /// File being read
        path: PathBuf,
        /// Description of the problem
        reason: String,
    },

    /// Key or content exceeds what the record format can hold
    #[error("Document {component} too large: {entry_size} bytes exceeds limit of {max_size} bytes")]
    OversizedEntry {
        /// Size of the oversized component
        entry_size: u64,
        /// Maximum allowed size
        max_size: u64,
        /// Whether it's the key or the content
        component: String,
    },
}

fn describe_path(path: &Option<PathBuf>) -> String {
    match path {
        Some(path) => format!(" in {}", path.display()),
        None => String::new(),
    }
}

fn hex_bytes(bytes: &[u8; 4]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

impl DocStoreError {
    /// Shorthand for [`DocStoreError::InvalidArgument`].
    pub fn invalid(message: impl Into<String>) -> Self {
        DocStoreError::InvalidArgument(message.into())
    }

    /// Wraps an I/O error with the path it happened on.
    pub(crate) fn io_at(path: &Path, context: &str, err: io::Error) -> Self {
        DocStoreError::Io {
            path: Some(path.to_path_buf()),
            kind: err.kind(),
            message: format!("{}: {}", context, err),
        }
    }
}

/// Convert std::io::Error to DocStoreError::Io
impl From<io::Error> for DocStoreError {
    fn from(err: io::Error) -> Self {
        DocStoreError::Io {
            path: None,
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Result type alias for document store operations
pub type DocResult<T> = Result<T, DocStoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DocStoreError::ChecksumMismatch {
            path: PathBuf::from("/tmp/docs/a.doc"),
            expected: 0x12345678,
            actual: 0x87654321,
        };

        let display = format!("{}", err);
        assert!(display.contains("Checksum mismatch"));
        assert!(display.contains("0x12345678"));
        assert!(display.contains("0x87654321"));
    }

    #[test]
    fn test_io_error_display_with_and_without_path() {
        let with_path = DocStoreError::io_at(
            Path::new("/tmp/docs/a.doc"),
            "Failed to open document file",
            io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        );
        let display = with_path.to_string();
        assert!(display.contains("/tmp/docs/a.doc"));
        assert!(display.contains("Failed to open document file"));

        let without: DocStoreError = io::Error::new(io::ErrorKind::Other, "boom").into();
        assert!(without.to_string().starts_with("I/O error: boom"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let doc_err: DocStoreError = io_err.into();

        match doc_err {
            DocStoreError::Io { kind, path, .. } => {
                assert_eq!(kind, io::ErrorKind::NotFound);
                assert!(path.is_none());
            }
            _ => panic!("Expected Io error"),
        }
    }

    #[test]
    fn test_undo_errors_name_the_key() {
        let err = DocStoreError::NoCommandForKey { key: "http://x/a".to_string() };
        assert!(err.to_string().contains("http://x/a"));
        assert_eq!(DocStoreError::NoPendingAction.to_string(), "No pending action to undo");
    }
}
