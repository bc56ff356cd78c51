//! Error types for the codec crate.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur while encoding or parsing diffs.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// A record started with a tag outside the known set.
    #[error("unknown change tag {tag:?} at record {ordinal}")]
    UnknownTag {
        /// Ordinal of the offending record.
        ordinal: u64,
        /// The tag as read.
        tag: String,
    },

    /// The stream ended in the middle of a record.
    #[error("truncated diff at record {ordinal}")]
    Truncated {
        /// Ordinal of the incomplete record.
        ordinal: u64,
    },

    /// A field could not be parsed.
    #[error("invalid field {field} at record {ordinal}: {message}")]
    InvalidField {
        /// Ordinal of the record holding the field.
        ordinal: u64,
        /// Name of the field.
        field: &'static str,
        /// What was wrong with it.
        message: String,
    },

    /// A value cannot be represented in the diff encoding.
    #[error("encoding failed: {message}")]
    EncodingFailed {
        /// Description of the encoding error.
        message: String,
    },

    /// Invalid identifier text.
    #[error("invalid identifier: {value:?}")]
    InvalidIdentifier {
        /// The rejected text.
        value: String,
    },

    /// Invalid content hash text.
    #[error("invalid content hash: {value:?}")]
    InvalidHash {
        /// The rejected text.
        value: String,
    },

    /// Compression or decompression failed.
    #[error("compression failed: {message}")]
    Compression {
        /// Description of the failure.
        message: String,
    },
}

impl CodecError {
    /// Creates an encoding error.
    pub fn encoding(message: impl Into<String>) -> Self {
        Self::EncodingFailed {
            message: message.into(),
        }
    }

    /// Creates a compression error.
    pub fn compression(message: impl Into<String>) -> Self {
        Self::Compression {
            message: message.into(),
        }
    }
}
