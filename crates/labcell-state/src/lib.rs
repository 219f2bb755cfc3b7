//! labcell-state — embedded asset record store.
//!
//! The durable source of truth for asset status and placement. Holds:
//!
//! - Asset records (machines, resources, decks) with status/owner/
//!   placement columns and invariant-checking writes
//! - Workcell snapshot documents written by the sync loop
//! - The asset type catalog (kind, deck-shapedness, positioning
//!   strategy per type), loaded from TOML

pub mod catalog;
pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use catalog::{
    AssetTypeCatalog, AssetTypeInfo, CatalogError, PositionArgType, PositioningStrategy,
};
pub use error::{StateError, StateResult};
pub use store::AssetStore;
pub use types::*;
