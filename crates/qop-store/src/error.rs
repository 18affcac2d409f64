//! Store error types.

use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The named resource does not exist.
    #[error("{kind} not found: {key}")]
    NotFound { kind: &'static str, key: String },

    /// A resource with the same key already exists.
    #[error("{kind} already exists: {key}")]
    AlreadyExists { kind: &'static str, key: String },

    /// An optimistic-concurrency write lost the race (transient; re-read
    /// and retry on the next pass).
    #[error("version conflict on {kind} {key}: expected {expected}, found {found}")]
    Conflict {
        kind: &'static str,
        key: String,
        expected: u64,
        found: u64,
    },

    /// The store has shut down and can no longer serve requests.
    #[error("store is closed")]
    Closed,
}

impl StoreError {
    /// Whether a retry against a fresh read can succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }

    /// Whether this is a not-found error (commonly ignored on teardown).
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}
