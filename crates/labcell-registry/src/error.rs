//! Error types for the live object registry.

use thiserror::Error;

use crate::driver::DriverError;

/// Result type alias for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Errors that can occur while managing live objects and placements.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("unknown asset type: {0}")]
    UnknownType(String),

    #[error("driver error: {0}")]
    Driver(#[from] DriverError),

    #[error("state store error: {0}")]
    State(#[from] labcell_state::StateError),

    #[error("asset is not a deck: {0}")]
    NotADeck(String),

    #[error("deck position {position} on {deck} is occupied by {occupant}")]
    PositionOccupied {
        deck: String,
        position: String,
        occupant: String,
    },

    #[error("no positioning strategy configured for deck type {0}")]
    NoStrategy(String),

    /// Misconfigured positioning: unknown position name, wrong return
    /// type from a positioning method, unconvertible argument. Fatal
    /// for the placement attempt, never retried.
    #[error("positioning configuration error: {0}")]
    Positioning(String),
}
