//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The log or a batch encoding is corrupted.
    #[error("storage corrupted: {0}")]
    Corrupted(String),

    /// A complete log frame failed its checksum.
    #[error("checksum mismatch at offset {offset}: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Offset of the frame in the log.
        offset: u64,
        /// Checksum stored in the frame.
        expected: u32,
        /// Checksum computed over the frame.
        actual: u32,
    },

    /// An append failed and its partial frame could not be removed. The
    /// store refuses further writes until it is reopened.
    #[error("log tail is torn at offset {offset}; reopen the store")]
    TornTail {
        /// Size of the log before the failed append.
        offset: u64,
    },

    /// Attempted to truncate a device beyond its current size.
    #[error("cannot truncate to {requested} bytes, device holds {size}")]
    InvalidTruncate {
        /// Requested size.
        requested: u64,
        /// Current size.
        size: u64,
    },
}

impl StorageError {
    /// Creates a corruption error.
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted(message.into())
    }
}
