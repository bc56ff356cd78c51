//! Error types for Versync core.

use crate::types::Version;
use std::io;
use thiserror::Error;
use versync_codec::{ContentHash, Identifier};

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Broad class of an error, deciding how callers react to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The store or a diff is corrupt. Fatal; never repaired automatically.
    Consistency,
    /// The request is not allowed in the current state. Nothing was changed.
    Policy,
    /// Missing objects, I/O and storage failures; the transfer layer may
    /// retry or refetch.
    Environment,
}

/// Errors that can occur in Versync core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage substrate error.
    #[error("storage error: {0}")]
    Storage(#[from] versync_storage::StorageError),

    /// Diff codec error.
    #[error("codec error: {0}")]
    Codec(#[from] versync_codec::CodecError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A stored value could not be (de)serialized.
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of the failure.
        message: String,
    },

    /// The store contradicts itself or a diff contradicts the store.
    #[error("consistency violation: {message}")]
    Consistency {
        /// Description of the violation.
        message: String,
    },

    /// No live inode record where one is required.
    #[error("inode {id} has no live record at version {version}")]
    InodeNotFound {
        /// The inode.
        id: Identifier,
        /// The version looked at.
        version: Version,
    },

    /// A name that should resolve does not.
    #[error("link {dir}/{name} does not resolve at version {version}")]
    LinkNotFound {
        /// Containing directory.
        dir: Identifier,
        /// Entry name.
        name: String,
        /// The version looked at.
        version: Version,
    },

    /// A name that should be free is taken.
    #[error("link {dir}/{name} already exists at version {version}")]
    LinkExists {
        /// Containing directory.
        dir: Identifier,
        /// Entry name.
        name: String,
        /// The version looked at.
        version: Version,
    },

    /// Version intervals of one key overlap.
    #[error("overlapping version ranges: {message}")]
    Overlap {
        /// Which key and which ranges.
        message: String,
    },

    /// The request is not allowed.
    #[error("{message}")]
    Policy {
        /// User-facing explanation.
        message: String,
    },

    /// A resumable operation is already pending.
    #[error("operation '{operation}' is in progress; run continue or abandon first")]
    OperationInProgress {
        /// Descriptor of the pending operation.
        operation: String,
    },

    /// `continue` was called with nothing to resume.
    #[error("no operation to continue")]
    NoPendingOperation,

    /// Another process holds the repository.
    #[error("repository locked: another process has exclusive access")]
    RepositoryLocked,

    /// The repository has no root yet.
    #[error("repository is not initialized")]
    NotInitialized,

    /// `init` on an initialized repository.
    #[error("repository is already initialized")]
    AlreadyInitialized,

    /// A content-addressed object is not present locally.
    #[error("object {hash} is missing")]
    ObjectMissing {
        /// Address of the object.
        hash: ContentHash,
    },
}

impl CoreError {
    /// Creates a consistency error.
    pub fn consistency(message: impl Into<String>) -> Self {
        Self::Consistency {
            message: message.into(),
        }
    }

    /// Creates a policy error.
    pub fn policy(message: impl Into<String>) -> Self {
        Self::Policy {
            message: message.into(),
        }
    }

    /// Creates a serialization error.
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Classifies the error.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Consistency { .. }
            | Self::InodeNotFound { .. }
            | Self::LinkNotFound { .. }
            | Self::LinkExists { .. }
            | Self::Overlap { .. }
            | Self::Codec(_)
            | Self::Serialization { .. } => ErrorCategory::Consistency,
            Self::Policy { .. }
            | Self::OperationInProgress { .. }
            | Self::NoPendingOperation
            | Self::RepositoryLocked
            | Self::NotInitialized
            | Self::AlreadyInitialized => ErrorCategory::Policy,
            Self::Storage(_) | Self::Io(_) | Self::ObjectMissing { .. } => {
                ErrorCategory::Environment
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories() {
        assert_eq!(
            CoreError::consistency("bad").category(),
            ErrorCategory::Consistency
        );
        assert_eq!(CoreError::policy("no").category(), ErrorCategory::Policy);
        assert_eq!(
            CoreError::ObjectMissing {
                hash: ContentHash::of(b"x")
            }
            .category(),
            ErrorCategory::Environment
        );
    }

    #[test]
    fn messages_name_the_key() {
        let err = CoreError::LinkNotFound {
            dir: Identifier::ROOT,
            name: "a.txt".into(),
            version: 3,
        };
        let text = err.to_string();
        assert!(text.contains("a.txt"));
        assert!(text.contains("version 3"));
    }
}
