//! Error types for store operations.

use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur while talking to a remote store.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The read or write could not be completed by the remote store.
    #[error("transport error: {0}")]
    Transport(String),

    /// A path segment violates the store's key rules.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// A query combination the store cannot evaluate.
    #[error("invalid query: {0}")]
    InvalidQuery(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = StoreError::Transport("permission denied".into());
        assert_eq!(err.to_string(), "transport error: permission denied");

        let err = StoreError::InvalidPath("a/b.c".into());
        assert!(err.to_string().contains("a/b.c"));
    }
}
