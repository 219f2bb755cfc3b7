//! Error types for the labcell asset store.

use thiserror::Error;

/// Result type alias for asset store operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors that can occur during asset store operations.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to open database: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),

    #[error("invariant violation: {0}")]
    Invariant(String),

    #[error("deck position occupied: {position} on {deck} held by {occupant}")]
    PositionOccupied {
        deck: String,
        position: String,
        occupant: String,
    },

    #[error("asset not found: {0}")]
    NotFound(String),
}
