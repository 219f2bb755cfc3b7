//! Simulated drivers — no hardware, real behavior.
//!
//! Used by tests across the workspace and by the daemon's simulation
//! mode. The sim deck supports both positioning strategies: a static
//! table (configured in the catalog) and a `slot_center` method for
//! integer-indexed geometries.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::debug;

use labcell_state::{
    AssetKind, AssetTypeCatalog, AssetTypeInfo, Coordinate, PositionArgType,
    PositioningStrategy,
};

use crate::driver::{AssetDriver, DeckDriver, DriverCtor, DriverError, DriverFactory, DriverInit};

pub const SIM_ARM: &str = "sim.arm";
pub const SIM_PLATE: &str = "sim.plate";
pub const SIM_DECK: &str = "sim.deck";
pub const SIM_CAROUSEL: &str = "sim.carousel";
/// A machine with an embedded deck, modeled as counterpart records.
pub const SIM_PLATFORM: &str = "sim.platform";

/// Register every sim driver into a factory.
pub fn register_sim_drivers(factory: &mut DriverFactory) {
    factory.register(SIM_ARM, false, sim_machine_ctor as DriverCtor);
    factory.register(SIM_PLATE, false, sim_labware_ctor as DriverCtor);
    factory.register(SIM_DECK, true, sim_deck_ctor as DriverCtor);
    factory.register(SIM_CAROUSEL, true, sim_deck_ctor as DriverCtor);
    factory.register(SIM_PLATFORM, false, sim_platform_ctor as DriverCtor);
}

/// Catalog entries matching the sim drivers.
pub fn sim_catalog() -> AssetTypeCatalog {
    let mut catalog = AssetTypeCatalog::default();
    catalog.insert(
        SIM_ARM,
        AssetTypeInfo {
            kind: AssetKind::Machine,
            deck_shaped: false,
            positioning: None,
            description: Some("simulated transfer arm".to_string()),
        },
    );
    catalog.insert(
        SIM_PLATE,
        AssetTypeInfo {
            kind: AssetKind::Resource,
            deck_shaped: false,
            positioning: None,
            description: Some("simulated well plate".to_string()),
        },
    );

    let mut positions = HashMap::new();
    positions.insert("A1".to_string(), Coordinate::new(10.0, 20.0, 0.0));
    positions.insert("A2".to_string(), Coordinate::new(35.0, 20.0, 0.0));
    positions.insert("B1".to_string(), Coordinate::new(10.0, 45.0, 0.0));
    positions.insert("B2".to_string(), Coordinate::new(35.0, 45.0, 0.0));
    catalog.insert(
        SIM_DECK,
        AssetTypeInfo {
            kind: AssetKind::Deck,
            deck_shaped: false,
            positioning: Some(PositioningStrategy::StaticTable { positions }),
            description: Some("simulated four-slot deck".to_string()),
        },
    );

    catalog.insert(
        SIM_CAROUSEL,
        AssetTypeInfo {
            kind: AssetKind::Deck,
            deck_shaped: false,
            positioning: Some(PositioningStrategy::MethodCall {
                method: "slot_center".to_string(),
                position_arg: "index".to_string(),
                position_arg_type: PositionArgType::Int,
                fixed_args: HashMap::new(),
            }),
            description: Some("simulated integer-indexed carousel".to_string()),
        },
    );

    catalog.insert(
        SIM_PLATFORM,
        AssetTypeInfo {
            kind: AssetKind::Machine,
            deck_shaped: false,
            positioning: None,
            description: Some("simulated machine with an embedded deck".to_string()),
        },
    );

    catalog
}

fn config_bool(config: &serde_json::Value, key: &str) -> bool {
    config.get(key).and_then(|v| v.as_bool()).unwrap_or(false)
}

// ── SimMachine ──────────────────────────────────────────────────────

struct MachineState {
    connected: bool,
    operations: u64,
}

/// A machine driver that "connects" instantly.
///
/// Config keys `fail_bring_up` / `fail_tear_down` make the lifecycle
/// hooks fail, for error-path tests.
pub struct SimMachine {
    asset_id: String,
    type_id: String,
    fail_bring_up: bool,
    fail_tear_down: bool,
    state: Mutex<MachineState>,
}

fn sim_machine_ctor(init: DriverInit) -> Result<Arc<dyn AssetDriver>, DriverError> {
    let operations = init
        .restored
        .as_ref()
        .and_then(|v| v.get("operations"))
        .and_then(|v| v.as_u64())
        .unwrap_or(0);

    Ok(Arc::new(SimMachine {
        asset_id: init.asset_id,
        type_id: init.type_id,
        fail_bring_up: config_bool(&init.config, "fail_bring_up"),
        fail_tear_down: config_bool(&init.config, "fail_tear_down"),
        state: Mutex::new(MachineState {
            connected: false,
            operations,
        }),
    }))
}

#[async_trait]
impl AssetDriver for SimMachine {
    fn asset_id(&self) -> &str {
        &self.asset_id
    }

    fn type_id(&self) -> &str {
        &self.type_id
    }

    async fn bring_up(&self) -> Result<(), DriverError> {
        if self.fail_bring_up {
            return Err(DriverError::BringUp(format!(
                "{} configured to fail bring-up",
                self.asset_id
            )));
        }
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.connected = true;
        debug!(asset = %self.asset_id, "sim machine connected");
        Ok(())
    }

    async fn tear_down(&self) -> Result<(), DriverError> {
        if self.fail_tear_down {
            return Err(DriverError::TearDown(format!(
                "{} configured to fail tear-down",
                self.asset_id
            )));
        }
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.connected = false;
        Ok(())
    }

    fn snapshot(&self) -> serde_json::Value {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        serde_json::json!({
            "connected": state.connected,
            "operations": state.operations,
        })
    }
}

// ── SimLabware ──────────────────────────────────────────────────────

/// A resource driver with a free-form state blob.
pub struct SimLabware {
    asset_id: String,
    type_id: String,
    state: Mutex<serde_json::Value>,
}

fn sim_labware_ctor(init: DriverInit) -> Result<Arc<dyn AssetDriver>, DriverError> {
    let state = init
        .restored
        .unwrap_or_else(|| serde_json::json!({"contents": "unknown"}));
    Ok(Arc::new(SimLabware {
        asset_id: init.asset_id,
        type_id: init.type_id,
        state: Mutex::new(state),
    }))
}

#[async_trait]
impl AssetDriver for SimLabware {
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
        self.state.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

// ── SimDeck ─────────────────────────────────────────────────────────

/// A deck driver tracking placed resources in memory.
///
/// Geometry config: `cols` (default 4) and `pitch` (default 25.0 mm),
/// used by the `slot_center` positioning method.
pub struct SimDeck {
    asset_id: String,
    type_id: String,
    cols: i64,
    pitch: f64,
    children: Mutex<HashMap<String, (Option<String>, Coordinate)>>,
}

impl SimDeck {
    fn from_init(init: &DriverInit) -> Result<SimDeck, DriverError> {
        let cols = init
            .config
            .get("cols")
            .and_then(|v| v.as_i64())
            .unwrap_or(4);
        if cols <= 0 {
            return Err(DriverError::Config(format!("cols must be positive, got {cols}")));
        }
        let pitch = init
            .config
            .get("pitch")
            .and_then(|v| v.as_f64())
            .unwrap_or(25.0);

        let mut children = HashMap::new();
        if let Some(restored) = &init.restored {
            if let Some(map) = restored.get("children").and_then(|v| v.as_object()) {
                for (resource, entry) in map {
                    let position = entry
                        .get("position")
                        .and_then(|v| v.as_str())
                        .map(str::to_string);
                    let coordinate = Coordinate::new(
                        entry.get("x").and_then(|v| v.as_f64()).unwrap_or(0.0),
                        entry.get("y").and_then(|v| v.as_f64()).unwrap_or(0.0),
                        entry.get("z").and_then(|v| v.as_f64()).unwrap_or(0.0),
                    );
                    children.insert(resource.clone(), (position, coordinate));
                }
            }
        }

        Ok(SimDeck {
            asset_id: init.asset_id.clone(),
            type_id: init.type_id.clone(),
            cols,
            pitch,
            children: Mutex::new(children),
        })
    }
}

fn sim_deck_ctor(init: DriverInit) -> Result<Arc<dyn AssetDriver>, DriverError> {
    Ok(Arc::new(SimDeck::from_init(&init)?))
}

#[async_trait]
impl AssetDriver for SimDeck {
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
        let children = self.children.lock().unwrap_or_else(|e| e.into_inner());
        let mut map = serde_json::Map::new();
        for (resource, (position, coordinate)) in children.iter() {
            map.insert(
                resource.clone(),
                serde_json::json!({
                    "position": position,
                    "x": coordinate.x,
                    "y": coordinate.y,
                    "z": coordinate.z,
                }),
            );
        }
        serde_json::json!({ "children": map })
    }

    fn as_deck(&self) -> Option<&dyn DeckDriver> {
        Some(self)
    }
}

impl DeckDriver for SimDeck {
    fn place(
        &self,
        resource: &str,
        position: Option<&str>,
        coordinate: Coordinate,
    ) -> Result<(), DriverError> {
        let mut children = self.children.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(pos) = position {
            let taken = children
                .iter()
                .any(|(r, (p, _))| r != resource && p.as_deref() == Some(pos));
            if taken {
                return Err(DriverError::Operation(format!(
                    "position {pos} on {} already holds a resource",
                    self.asset_id
                )));
            }
        }
        children.insert(
            resource.to_string(),
            (position.map(str::to_string), coordinate),
        );
        debug!(deck = %self.asset_id, %resource, ?position, "resource placed");
        Ok(())
    }

    fn remove(&self, resource: &str) -> Result<bool, DriverError> {
        let mut children = self.children.lock().unwrap_or_else(|e| e.into_inner());
        Ok(children.remove(resource).is_some())
    }

    fn clear(&self) {
        let mut children = self.children.lock().unwrap_or_else(|e| e.into_inner());
        children.clear();
    }

    fn occupants(&self) -> Vec<(String, Option<String>, Coordinate)> {
        let children = self.children.lock().unwrap_or_else(|e| e.into_inner());
        let mut occupants: Vec<_> = children
            .iter()
            .map(|(r, (p, c))| (r.clone(), p.clone(), *c))
            .collect();
        occupants.sort_by(|a, b| a.0.cmp(&b.0));
        occupants
    }

    fn call_position_method(
        &self,
        method: &str,
        args: &HashMap<String, serde_json::Value>,
    ) -> Result<serde_json::Value, DriverError> {
        match method {
            "slot_center" => {
                let index = args
                    .get("index")
                    .and_then(|v| v.as_i64())
                    .ok_or_else(|| {
                        DriverError::Config("slot_center needs an integer index".to_string())
                    })?;
                if index < 0 {
                    return Err(DriverError::Config(format!(
                        "slot index must be non-negative, got {index}"
                    )));
                }
                let pitch = args
                    .get("pitch")
                    .and_then(|v| v.as_f64())
                    .unwrap_or(self.pitch);
                let x = (index % self.cols) as f64 * pitch;
                let y = (index / self.cols) as f64 * pitch;
                Ok(serde_json::json!({"x": x, "y": y, "z": 0.0}))
            }
            other => Err(DriverError::UnknownMethod(other.to_string())),
        }
    }
}

// ── SimPlatform ─────────────────────────────────────────────────────

/// A machine with an embedded deck.
///
/// The machine face connects like [`SimMachine`]; the deck face is a
/// full [`SimDeck`]. Counterpart records (machine kind + deck kind)
/// share one instance of this driver, whichever record materializes it
/// first.
pub struct SimPlatform {
    asset_id: String,
    type_id: String,
    state: Mutex<MachineState>,
    deck: SimDeck,
}

fn sim_platform_ctor(init: DriverInit) -> Result<Arc<dyn AssetDriver>, DriverError> {
    let operations = init
        .restored
        .as_ref()
        .and_then(|v| v.get("operations"))
        .and_then(|v| v.as_u64())
        .unwrap_or(0);
    let deck = SimDeck::from_init(&init)?;

    Ok(Arc::new(SimPlatform {
        asset_id: init.asset_id,
        type_id: init.type_id,
        state: Mutex::new(MachineState {
            connected: false,
            operations,
        }),
        deck,
    }))
}

#[async_trait]
impl AssetDriver for SimPlatform {
    fn asset_id(&self) -> &str {
        &self.asset_id
    }

    fn type_id(&self) -> &str {
        &self.type_id
    }

    async fn bring_up(&self) -> Result<(), DriverError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.connected = true;
        debug!(asset = %self.asset_id, "sim platform connected");
        Ok(())
    }

    async fn tear_down(&self) -> Result<(), DriverError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.connected = false;
        Ok(())
    }

    fn snapshot(&self) -> serde_json::Value {
        let mut snapshot = self.deck.snapshot();
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        snapshot["connected"] = serde_json::json!(state.connected);
        snapshot["operations"] = serde_json::json!(state.operations);
        snapshot
    }

    fn as_deck(&self) -> Option<&dyn DeckDriver> {
        Some(&self.deck)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deck_init(config: serde_json::Value) -> DriverInit {
        DriverInit {
            asset_id: "deck-1".to_string(),
            name: "deck-1".to_string(),
            type_id: SIM_DECK.to_string(),
            config,
            restored: None,
        }
    }

    #[tokio::test]
    async fn machine_lifecycle_and_failure_injection() {
        let ok = sim_machine_ctor(DriverInit {
            asset_id: "m1".to_string(),
            name: "arm".to_string(),
            type_id: SIM_ARM.to_string(),
            config: serde_json::Value::Null,
            restored: None,
        })
        .unwrap();
        ok.bring_up().await.unwrap();
        assert_eq!(ok.snapshot()["connected"], serde_json::json!(true));
        ok.tear_down().await.unwrap();

        let failing = sim_machine_ctor(DriverInit {
            asset_id: "m2".to_string(),
            name: "arm".to_string(),
            type_id: SIM_ARM.to_string(),
            config: serde_json::json!({"fail_bring_up": true}),
            restored: None,
        })
        .unwrap();
        assert!(failing.bring_up().await.is_err());
    }

    #[test]
    fn deck_place_remove_and_position_exclusivity() {
        let driver = sim_deck_ctor(deck_init(serde_json::Value::Null)).unwrap();
        let deck = driver.as_deck().unwrap();

        deck.place("r1", Some("A1"), Coordinate::new(10.0, 20.0, 0.0))
            .unwrap();
        assert!(deck.place("r2", Some("A1"), Coordinate::new(0.0, 0.0, 0.0)).is_err());

        // Unnamed placement never collides.
        deck.place("r2", None, Coordinate::new(99.0, 0.0, 0.0)).unwrap();
        assert_eq!(deck.occupants().len(), 2);

        assert!(deck.remove("r1").unwrap());
        assert!(!deck.remove("r1").unwrap());
    }

    #[test]
    fn slot_center_grid_math() {
        let driver =
            sim_deck_ctor(deck_init(serde_json::json!({"cols": 3, "pitch": 10.0}))).unwrap();
        let deck = driver.as_deck().unwrap();

        let mut args = HashMap::new();
        args.insert("index".to_string(), serde_json::json!(4));
        let reply = deck.call_position_method("slot_center", &args).unwrap();

        // Index 4 in a 3-wide grid: column 1, row 1.
        assert_eq!(reply, serde_json::json!({"x": 10.0, "y": 10.0, "z": 0.0}));
    }

    #[test]
    fn deck_snapshot_restores() {
        let driver = sim_deck_ctor(deck_init(serde_json::Value::Null)).unwrap();
        let deck = driver.as_deck().unwrap();
        deck.place("r1", Some("A1"), Coordinate::new(10.0, 20.0, 0.0))
            .unwrap();

        let snapshot = driver.snapshot();

        let restored = sim_deck_ctor(DriverInit {
            restored: Some(snapshot.clone()),
            ..deck_init(serde_json::Value::Null)
        })
        .unwrap();
        assert_eq!(restored.snapshot(), snapshot);

        let occupants = restored.as_deck().unwrap().occupants();
        assert_eq!(occupants.len(), 1);
        assert_eq!(occupants[0].1.as_deref(), Some("A1"));
    }

    #[test]
    fn catalog_matches_registered_drivers() {
        let mut factory = DriverFactory::new();
        register_sim_drivers(&mut factory);
        let catalog = sim_catalog();

        for type_id in [SIM_ARM, SIM_PLATE, SIM_DECK, SIM_CAROUSEL, SIM_PLATFORM] {
            assert!(factory.knows(type_id), "{type_id} missing from factory");
            assert!(catalog.get(type_id).is_some(), "{type_id} missing from catalog");
        }
        assert!(factory.is_deck_type(SIM_DECK));
        assert!(catalog.is_deck_type(SIM_CAROUSEL));
        assert!(!factory.is_deck_type(SIM_PLATE));
    }
}
