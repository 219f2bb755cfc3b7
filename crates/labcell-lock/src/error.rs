//! Error types for lock store clients.

use thiserror::Error;

/// Result type alias for lock store operations.
pub type LockResult<T> = Result<T, LockStoreError>;

/// Errors surfaced by a lock store backend.
///
/// These represent infrastructure trouble, never contention — a held
/// lock is reported through return values, not errors.
#[derive(Debug, Error)]
pub enum LockStoreError {
    #[error("lock store connection failed: {0}")]
    Connect(String),

    #[error("lock store i/o error: {0}")]
    Io(String),

    #[error("unexpected lock store reply: {0}")]
    Protocol(String),

    #[error("lock store rejected command: {0}")]
    Server(String),
}
