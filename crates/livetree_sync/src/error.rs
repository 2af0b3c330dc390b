//! Error types for the sync engine.

use livetree_store::StoreError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// The entity cannot be mapped to a store location. This is a
    /// programming error and is never retried.
    #[error("configuration error: {message}")]
    Configuration {
        /// Error message.
        message: String,
    },

    /// A remote read or write failed.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
    },

    /// The operation was abandoned before it produced a result.
    #[error("operation dropped before completion")]
    Dropped,
}

impl SyncError {
    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates a transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Returns true if this error reports a programming mistake.
    pub fn is_configuration(&self) -> bool {
        matches!(self, SyncError::Configuration { .. })
    }
}

impl From<StoreError> for SyncError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Transport(message) => SyncError::Transport { message },
            StoreError::InvalidPath(_) | StoreError::InvalidQuery(_) => {
                SyncError::configuration(err.to_string())
            }
        }
    }
}
