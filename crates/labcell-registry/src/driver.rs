//! Driver traits and the closed driver factory.
//!
//! A driver is the in-process object implementing an asset's runtime
//! behavior — connect, move, place — as opposed to its persisted
//! record. Drivers are built from a compile-time-known constructor
//! table: type-id strings coming out of catalog data select a
//! registered constructor and can never drive arbitrary code loading.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use labcell_state::{AssetId, Coordinate, TypeId};

use crate::error::{RegistryError, RegistryResult};

/// Errors raised by driver implementations.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("driver bring-up failed: {0}")]
    BringUp(String),

    #[error("driver tear-down failed: {0}")]
    TearDown(String),

    #[error("bad driver config: {0}")]
    Config(String),

    #[error("unknown positioning method: {0}")]
    UnknownMethod(String),

    #[error("driver operation failed: {0}")]
    Operation(String),
}

/// Construction input for a driver: identity fields from the asset
/// record merged with its persisted configuration, plus any restored
/// snapshot from a previous process.
#[derive(Debug, Clone)]
pub struct DriverInit {
    pub asset_id: AssetId,
    pub name: String,
    pub type_id: TypeId,
    pub config: serde_json::Value,
    /// Live-state snapshot captured by the sync loop before a restart.
    pub restored: Option<serde_json::Value>,
}

/// The in-process object implementing one asset's runtime behavior.
#[async_trait]
pub trait AssetDriver: Send + Sync {
    /// The asset record this driver was built for.
    fn asset_id(&self) -> &str;

    fn type_id(&self) -> &str;

    /// Establish the device connection / initialize the object.
    async fn bring_up(&self) -> Result<(), DriverError>;

    /// Disconnect / release the underlying device.
    async fn tear_down(&self) -> Result<(), DriverError>;

    /// Serializable live state, checkpointed by the sync loop.
    fn snapshot(&self) -> serde_json::Value;

    /// Deck capability, for drivers that hold positioned resources.
    fn as_deck(&self) -> Option<&dyn DeckDriver> {
        None
    }
}

/// Placement capability of deck-shaped drivers.
pub trait DeckDriver: Send + Sync {
    /// Put a resource at a coordinate, optionally under a position name.
    fn place(
        &self,
        resource: &str,
        position: Option<&str>,
        coordinate: Coordinate,
    ) -> Result<(), DriverError>;

    /// Remove a resource. Returns `false` if it was not on this deck.
    fn remove(&self, resource: &str) -> Result<bool, DriverError>;

    /// Drop every placed resource.
    fn clear(&self);

    /// Currently placed resources as (resource id, position, coordinate).
    fn occupants(&self) -> Vec<(String, Option<String>, Coordinate)>;

    /// Invoke a named positioning method with already-converted
    /// arguments. The return value is coerced into a coordinate by the
    /// positioning layer.
    fn call_position_method(
        &self,
        method: &str,
        args: &HashMap<String, serde_json::Value>,
    ) -> Result<serde_json::Value, DriverError>;
}

/// Constructor function for one driver type.
pub type DriverCtor = fn(DriverInit) -> Result<Arc<dyn AssetDriver>, DriverError>;

struct DriverSpec {
    ctor: DriverCtor,
    deck_shaped: bool,
}

/// Closed registry mapping stable type-id strings to constructors.
#[derive(Default)]
pub struct DriverFactory {
    specs: HashMap<TypeId, DriverSpec>,
}

impl DriverFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a constructor for a type id.
    pub fn register(
        &mut self,
        type_id: impl Into<TypeId>,
        deck_shaped: bool,
        ctor: DriverCtor,
    ) {
        self.specs.insert(type_id.into(), DriverSpec { ctor, deck_shaped });
    }

    /// Whether a constructor is registered for this type.
    pub fn knows(&self, type_id: &str) -> bool {
        self.specs.contains_key(type_id)
    }

    /// Whether the registered constructor builds a deck-shaped driver.
    ///
    /// This is the code-side answer to "is this type a deck", consulted
    /// alongside the catalog's data-side answer.
    pub fn is_deck_type(&self, type_id: &str) -> bool {
        self.specs
            .get(type_id)
            .is_some_and(|spec| spec.deck_shaped)
    }

    /// Build a driver for a known type.
    pub fn build(&self, init: DriverInit) -> RegistryResult<Arc<dyn AssetDriver>> {
        let spec = self
            .specs
            .get(&init.type_id)
            .ok_or_else(|| RegistryError::UnknownType(init.type_id.clone()))?;
        Ok((spec.ctor)(init)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullDriver {
        asset_id: String,
        type_id: String,
    }

    #[async_trait]
    impl AssetDriver for NullDriver {
        fn asset_id(&self) -> &str {
            &self.asset_id
        }
        fn type_id(&self) -> &str {
            &self.type_id
        }
        async fn bring_up(&self) -> Result<(), DriverError> {
            Ok(())
        }
        async fn tear_down(&self) -> Result<(), DriverError> {
            Ok(())
        }
        fn snapshot(&self) -> serde_json::Value {
            serde_json::Value::Null
        }
    }

    fn null_ctor(init: DriverInit) -> Result<Arc<dyn AssetDriver>, DriverError> {
        Ok(Arc::new(NullDriver {
            asset_id: init.asset_id,
            type_id: init.type_id,
        }))
    }

    fn init(type_id: &str) -> DriverInit {
        DriverInit {
            asset_id: "a1".to_string(),
            name: "thing".to_string(),
            type_id: type_id.to_string(),
            config: serde_json::Value::Null,
            restored: None,
        }
    }

    #[test]
    fn factory_builds_registered_types() {
        let mut factory = DriverFactory::new();
        factory.register("null.machine", false, null_ctor);

        assert!(factory.knows("null.machine"));
        let driver = factory.build(init("null.machine")).unwrap();
        assert_eq!(driver.asset_id(), "a1");
        assert_eq!(driver.type_id(), "null.machine");
    }

    #[test]
    fn factory_rejects_unknown_types() {
        let factory = DriverFactory::new();
        assert!(matches!(
            factory.build(init("mystery.dotted.path")),
            Err(RegistryError::UnknownType(_))
        ));
    }

    #[test]
    fn deck_shapedness_comes_from_registration() {
        let mut factory = DriverFactory::new();
        factory.register("null.machine", false, null_ctor);
        factory.register("null.deck", true, null_ctor);

        assert!(!factory.is_deck_type("null.machine"));
        assert!(factory.is_deck_type("null.deck"));
        assert!(!factory.is_deck_type("unregistered"));
    }
}
