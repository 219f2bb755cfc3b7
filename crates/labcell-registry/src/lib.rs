//! labcell-registry — per-process live asset objects.
//!
//! Every worker process owns exactly one [`LiveRegistry`] per workcell.
//! It lazily constructs drivers from the closed [`driver::DriverFactory`],
//! caches them by asset id (counterpart records alias to one shared
//! object), places resources on decks with catalog-driven positioning,
//! and serializes the whole live aggregate for the sync loop.
//!
//! Live objects never cross process boundaries.

pub mod driver;
pub mod error;
pub mod positioning;
pub mod registry;
pub mod sim;

pub use driver::{AssetDriver, DeckDriver, DriverCtor, DriverError, DriverFactory, DriverInit};
pub use error::{RegistryError, RegistryResult};
pub use positioning::resolve_coordinate;
pub use registry::{LiveRegistry, Placement};
