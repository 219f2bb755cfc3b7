//! Error types for the state sync loop.

use thiserror::Error;

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur while checkpointing live state.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("state store error: {0}")]
    State(#[from] labcell_state::StateError),

    #[error("snapshot i/o error: {0}")]
    Io(String),

    #[error("snapshot serialization error: {0}")]
    Serialize(String),
}
