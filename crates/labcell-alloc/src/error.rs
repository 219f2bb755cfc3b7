//! Acquisition and release error types.
//!
//! Every acquisition failure carries the requirement name and type id,
//! so a failed protocol step reports what it was asking for.

use thiserror::Error;

use labcell_registry::RegistryError;
use labcell_state::{AssetStatus, StateError};

/// Result type alias for acquisition operations.
pub type AcquireResult<T> = Result<T, AcquireError>;

/// Result type alias for release operations.
pub type ReleaseResult<T> = Result<T, ReleaseError>;

/// Why an asset could not be acquired.
#[derive(Debug, Error)]
pub enum AcquireError {
    #[error("requirement {requirement}: no available asset of type {type_id}")]
    NoCandidate {
        requirement: String,
        type_id: String,
    },

    #[error(
        "requirement {requirement}: type {type_id} is deck-shaped and cannot be acquired as a machine"
    )]
    DeckViaMachinePath {
        requirement: String,
        type_id: String,
    },

    #[error(
        "requirement {requirement}: type {type_id} looks like a deck type but is not in the catalog"
    )]
    UncataloguedDeckType {
        requirement: String,
        type_id: String,
    },

    #[error(
        "requirement {requirement}: instance {instance} has type {actual}, expected {type_id}"
    )]
    InstanceTypeMismatch {
        requirement: String,
        instance: String,
        actual: String,
        type_id: String,
    },

    #[error(
        "requirement {requirement}: instance {instance} is {status:?} and not usable by run {run}"
    )]
    InstanceUnavailable {
        requirement: String,
        instance: String,
        status: AssetStatus,
        run: String,
    },

    #[error("requirement {requirement}: deck {deck_name} not found")]
    DeckNotFound {
        requirement: String,
        deck_name: String,
    },

    #[error("requirement {requirement}: live object initialization failed for {asset}: {source}")]
    InitFailed {
        requirement: String,
        asset: String,
        #[source]
        source: RegistryError,
    },

    #[error("requirement {requirement}: placement failed: {source}")]
    Placement {
        requirement: String,
        #[source]
        source: RegistryError,
    },

    #[error("state store error: {0}")]
    State(#[from] StateError),
}

/// Why an asset could not be released cleanly.
///
/// A `StatusUpdate` failure means the live side was already shut down
/// or cleared — physical state wins over bookkeeping, so the live-side
/// work is not undone.
#[derive(Debug, Error)]
pub enum ReleaseError {
    #[error("asset not found: {0}")]
    NotFound(String),

    #[error("live-side release failed for {asset}: {source}")]
    Live {
        asset: String,
        #[source]
        source: RegistryError,
    },

    #[error("status update failed for {asset} (live side already released): {source}")]
    StatusUpdate {
        asset: String,
        #[source]
        source: StateError,
    },

    #[error("state store error: {0}")]
    State(#[from] StateError),
}
