//! labcell-alloc — asset acquisition and release.
//!
//! Maps abstract, protocol-level asset requirements to concrete asset
//! records and drives their persisted status transitions:
//!
//! ```text
//! AssetManager
//!   ├── acquire_machine / release_machine
//!   ├── acquire_resource / release_resource
//!   └── acquire_asset               (catalog dispatch + deck guards)
//!       ├── AssetStore              (selection + status writes)
//!       └── LiveRegistry            (bring-up, placement, teardown)
//! ```

pub mod error;
pub mod manager;

pub use error::{AcquireError, AcquireResult, ReleaseError, ReleaseResult};
pub use manager::{
    AssetManager, AssetRequirement, DeckLocation, ResourceDisposition,
};
