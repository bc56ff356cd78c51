//! Error types for replica synchronization.

use thiserror::Error;
use versync_codec::ContentHash;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur while synchronizing replicas.
#[derive(Error, Debug)]
pub enum SyncError {
    /// The peer could not be reached or dropped the exchange.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the exchange can be retried.
        retryable: bool,
    },

    /// The peer sent an object whose bytes do not match its address.
    #[error("object {hash} failed verification")]
    Integrity {
        /// Address the object was requested under.
        hash: ContentHash,
    },

    /// The peer did not send an object it was asked for.
    #[error("peer did not provide object {hash}")]
    MissingObject {
        /// Address of the object.
        hash: ContentHash,
    },

    /// The exchange is not allowed in the current state of either replica.
    #[error("{0}")]
    Policy(String),

    /// Repository error on either side.
    #[error("repository error: {0}")]
    Core(#[from] versync_core::CoreError),

    /// Sync was cancelled.
    #[error("sync cancelled")]
    Cancelled,

    /// A sync was requested while another was running.
    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition {
        /// Current state.
        from: String,
        /// Requested activity.
        to: String,
    },
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Creates a policy error.
    pub fn policy(message: impl Into<String>) -> Self {
        Self::Policy(message.into())
    }

    /// Returns true if running the exchange again may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { retryable, .. } => *retryable,
            Self::Integrity { .. } | Self::MissingObject { .. } => true,
            _ => false,
        }
    }
}
