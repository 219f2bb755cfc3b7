//! Asset type catalog — per-type configuration loaded from TOML.
//!
//! The catalog answers two questions the acquisition paths depend on:
//! is this type a resource or a machine, and is it deck-shaped. For
//! deck-shaped types it also carries the positioning strategy used to
//! turn a named deck position into a coordinate.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use thiserror::Error;

use crate::types::{AssetKind, Coordinate, TypeId};

/// Errors raised while loading a catalog file.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read catalog file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse catalog: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Scalar type a positioning method expects for its position argument.
///
/// Position names arrive as strings; a method taking an integer slot
/// index needs the name converted before the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionArgType {
    #[default]
    Str,
    Int,
    Float,
}

/// How a deck type maps a position name to a coordinate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum PositioningStrategy {
    /// Fixed name → coordinate table, looked up directly.
    StaticTable { positions: HashMap<String, Coordinate> },
    /// Parametrized call into the deck object's own positioning method.
    MethodCall {
        /// Name of the method on the deck driver.
        method: String,
        /// Which argument receives the position identifier.
        position_arg: String,
        /// Expected scalar type of that argument.
        #[serde(default)]
        position_arg_type: PositionArgType,
        /// Additional fixed arguments passed on every call.
        #[serde(default)]
        fixed_args: HashMap<String, serde_json::Value>,
    },
}

/// Catalog entry for one asset type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetTypeInfo {
    pub kind: AssetKind,
    /// Whether this type behaves as a deck (holds positioned resources).
    #[serde(default)]
    pub deck_shaped: bool,
    /// Positioning strategy; required for deck-shaped types that accept
    /// named positions.
    #[serde(default)]
    pub positioning: Option<PositioningStrategy>,
    #[serde(default)]
    pub description: Option<String>,
}

impl AssetTypeInfo {
    /// Deck kinds are always deck-shaped; other kinds only when flagged.
    pub fn is_deck(&self) -> bool {
        self.kind == AssetKind::Deck || self.deck_shaped
    }
}

/// Closed table of known asset types.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssetTypeCatalog {
    #[serde(default)]
    types: HashMap<TypeId, AssetTypeInfo>,
}

impl AssetTypeCatalog {
    /// Load a catalog from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, CatalogError> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Parse a catalog from a TOML string.
    pub fn from_toml_str(content: &str) -> Result<Self, CatalogError> {
        Ok(toml::from_str(content)?)
    }

    /// Register a type entry (used by tests and the daemon's sim mode).
    pub fn insert(&mut self, type_id: impl Into<TypeId>, info: AssetTypeInfo) {
        self.types.insert(type_id.into(), info);
    }

    /// Look up a type entry.
    pub fn get(&self, type_id: &str) -> Option<&AssetTypeInfo> {
        self.types.get(type_id)
    }

    /// Whether the catalog knows this type as a resource or deck type.
    pub fn is_resource_type(&self, type_id: &str) -> bool {
        self.get(type_id)
            .is_some_and(|info| info.kind.is_resource_like())
    }

    /// Whether the catalog knows this type as deck-shaped.
    pub fn is_deck_type(&self, type_id: &str) -> bool {
        self.get(type_id).is_some_and(AssetTypeInfo::is_deck)
    }

    /// Positioning strategy for a deck type, if configured.
    pub fn positioning(&self, type_id: &str) -> Option<&PositioningStrategy> {
        self.get(type_id).and_then(|info| info.positioning.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [types."sim.arm"]
        kind = "machine"
        description = "six-axis transfer arm"

        [types."sim.plate"]
        kind = "resource"

        [types."sim.deck"]
        kind = "deck"

        [types."sim.deck".positioning]
        mode = "static_table"

        [types."sim.deck".positioning.positions]
        A1 = { x = 10.0, y = 20.0, z = 0.0 }
        A2 = { x = 35.0, y = 20.0, z = 0.0 }

        [types."sim.carousel"]
        kind = "deck"

        [types."sim.carousel".positioning]
        mode = "method_call"
        method = "slot_center"
        position_arg = "index"
        position_arg_type = "int"

        [types."sim.carousel".positioning.fixed_args]
        level = 1
    "#;

    #[test]
    fn parses_kinds_and_shapes() {
        let catalog = AssetTypeCatalog::from_toml_str(SAMPLE).unwrap();

        assert!(!catalog.is_resource_type("sim.arm"));
        assert!(catalog.is_resource_type("sim.plate"));
        assert!(catalog.is_resource_type("sim.deck"));
        assert!(catalog.is_deck_type("sim.deck"));
        assert!(!catalog.is_deck_type("sim.plate"));
        assert!(!catalog.is_deck_type("unknown.type"));
    }

    #[test]
    fn parses_static_table_strategy() {
        let catalog = AssetTypeCatalog::from_toml_str(SAMPLE).unwrap();
        let Some(PositioningStrategy::StaticTable { positions }) =
            catalog.positioning("sim.deck")
        else {
            panic!("expected static table strategy");
        };

        assert_eq!(positions["A1"], Coordinate::new(10.0, 20.0, 0.0));
        assert_eq!(positions.len(), 2);
    }

    #[test]
    fn parses_method_call_strategy() {
        let catalog = AssetTypeCatalog::from_toml_str(SAMPLE).unwrap();
        let Some(PositioningStrategy::MethodCall {
            method,
            position_arg,
            position_arg_type,
            fixed_args,
        }) = catalog.positioning("sim.carousel")
        else {
            panic!("expected method call strategy");
        };

        assert_eq!(method, "slot_center");
        assert_eq!(position_arg, "index");
        assert_eq!(*position_arg_type, PositionArgType::Int);
        assert_eq!(fixed_args["level"], serde_json::json!(1));
    }

    #[test]
    fn resource_type_can_be_flagged_deck_shaped() {
        let mut catalog = AssetTypeCatalog::default();
        catalog.insert(
            "tray.stack",
            AssetTypeInfo {
                kind: AssetKind::Resource,
                deck_shaped: true,
                positioning: None,
                description: None,
            },
        );

        assert!(catalog.is_deck_type("tray.stack"));
    }

    #[test]
    fn empty_catalog_knows_nothing() {
        let catalog = AssetTypeCatalog::from_toml_str("").unwrap();
        assert!(catalog.get("anything").is_none());
        assert!(!catalog.is_resource_type("anything"));
    }
}
