//! LiveRegistry — one-per-process authority over live asset objects.
//!
//! The registry owns the map from asset id to live driver. The cache,
//! not the persisted status, answers "is this asset already live in
//! this process". Counterpart records (the same physical thing modeled
//! as both machine and resource) alias to one shared driver. The
//! registry is an explicit field of the runtime that owns it, passed by
//! reference to collaborators — never a process-global — so multiple
//! registries can coexist in tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use labcell_state::{
    AssetId, AssetRecord, AssetStatus, AssetStore, AssetTypeCatalog, Coordinate, epoch_secs,
};

use crate::driver::{AssetDriver, DriverFactory, DriverInit};
use crate::error::{RegistryError, RegistryResult};
use crate::positioning::resolve_coordinate;

/// Where to put a resource on a deck.
#[derive(Debug, Clone)]
pub enum Placement {
    /// A named position; the coordinate is computed from the deck
    /// type's positioning strategy, after an occupancy check.
    Named(String),
    /// An explicit coordinate, optionally labeled with a position name.
    Explicit {
        position: Option<String>,
        coordinate: Coordinate,
    },
}

/// Per-process registry of live asset drivers.
pub struct LiveRegistry {
    store: AssetStore,
    catalog: AssetTypeCatalog,
    factory: DriverFactory,
    /// Live drivers, including counterpart aliases to the same Arc.
    live: RwLock<HashMap<AssetId, Arc<dyn AssetDriver>>>,
    /// Restored snapshots from a previous process, consumed on first
    /// construction of the matching driver.
    seed: Mutex<HashMap<AssetId, serde_json::Value>>,
}

impl LiveRegistry {
    pub fn new(store: AssetStore, catalog: AssetTypeCatalog, factory: DriverFactory) -> Self {
        Self {
            store,
            catalog,
            factory,
            live: RwLock::new(HashMap::new()),
            seed: Mutex::new(HashMap::new()),
        }
    }

    /// Whether a type is deck-shaped, asking both the factory (code)
    /// and the catalog (data) — either can detect the misuse alone.
    pub fn is_deck_type(&self, type_id: &str) -> bool {
        self.factory.is_deck_type(type_id) || self.catalog.is_deck_type(type_id)
    }

    /// The driver for an asset, building and bringing it up on first use.
    ///
    /// Returns the cached driver when the asset (or its counterpart) is
    /// already live. A failed bring-up leaves nothing registered; the
    /// caller decides what happens to the persisted record.
    pub async fn create_or_get(
        &self,
        record: &AssetRecord,
    ) -> RegistryResult<Arc<dyn AssetDriver>> {
        {
            let live = self.live.read().await;
            if let Some(driver) = live.get(&record.id) {
                debug!(asset = %record.id, "live object reused");
                return Ok(driver.clone());
            }
        }

        let restored = {
            let mut seed = self.seed.lock().unwrap_or_else(|e| e.into_inner());
            seed.remove(&record.id)
        };

        let driver = self.factory.build(DriverInit {
            asset_id: record.id.clone(),
            name: record.name.clone(),
            type_id: record.type_id.clone(),
            config: record.config.clone(),
            restored,
        })?;

        driver.bring_up().await?;

        let mut live = self.live.write().await;
        if let Some(existing) = live.get(&record.id) {
            // Lost a construction race; keep the first driver.
            debug!(asset = %record.id, "discarding duplicate live object");
            return Ok(existing.clone());
        }
        live.insert(record.id.clone(), driver.clone());
        if let Some(counterpart) = &record.counterpart {
            live.insert(counterpart.clone(), driver.clone());
        }

        info!(asset = %record.id, type_id = %record.type_id, "live object created");
        Ok(driver)
    }

    /// The live driver for an asset, if one exists in this process.
    pub async fn get(&self, id: &str) -> Option<Arc<dyn AssetDriver>> {
        self.live.read().await.get(id).cloned()
    }

    /// Whether the asset is live in this process.
    pub async fn is_live(&self, id: &str) -> bool {
        self.live.read().await.contains_key(id)
    }

    /// Asset ids with a live driver (aliases included).
    pub async fn live_ids(&self) -> Vec<AssetId> {
        let mut ids: Vec<AssetId> = self.live.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Tear a live object down and drop it from the registry.
    ///
    /// Nothing live under `id` is a no-op. On tear-down failure the
    /// entry is restored — a live connection must not be lost track of —
    /// and the persisted record is marked `Error`.
    pub async fn shutdown(&self, id: &str) -> RegistryResult<()> {
        let (driver, aliases) = {
            let mut live = self.live.write().await;
            let Some(driver) = live.get(id).cloned() else {
                debug!(asset = %id, "shutdown requested for asset with no live object");
                return Ok(());
            };
            let aliases: Vec<AssetId> = live
                .iter()
                .filter(|(_, d)| Arc::ptr_eq(d, &driver))
                .map(|(k, _)| k.clone())
                .collect();
            for alias in &aliases {
                live.remove(alias);
            }
            (driver, aliases)
        };

        if let Err(e) = driver.tear_down().await {
            warn!(asset = %id, error = %e, "tear-down failed, keeping live object registered");
            let mut live = self.live.write().await;
            for alias in aliases {
                live.insert(alias, driver.clone());
            }
            self.mark_error(id)?;
            return Err(e.into());
        }

        info!(asset = %id, "live object shut down");
        Ok(())
    }

    /// Best-effort shutdown of every live object (process exit).
    pub async fn shutdown_all(&self) {
        for id in self.live_ids().await {
            if let Err(e) = self.shutdown(&id).await {
                warn!(asset = %id, error = %e, "shutdown_all: tear-down failed");
            }
        }
    }

    fn mark_error(&self, id: &str) -> RegistryResult<()> {
        let mut record = self.store.require_asset(id)?;
        record.status = AssetStatus::Error;
        record.owner_run = None;
        record.updated_at = epoch_secs();
        self.store.put_asset(&record)?;
        Ok(())
    }

    // ── Placement ──────────────────────────────────────────────────

    /// Resolve a placement target to its deck-shaped record.
    ///
    /// The target may be a bare deck, or a machine whose counterpart
    /// record is the embedded deck.
    fn resolve_deck_record(&self, target: AssetRecord) -> RegistryResult<AssetRecord> {
        if self.is_deck_type(&target.type_id) {
            return Ok(target);
        }
        if let Some(counterpart_id) = &target.counterpart {
            let counterpart = self.store.require_asset(counterpart_id)?;
            if self.is_deck_type(&counterpart.type_id) {
                return Ok(counterpart);
            }
        }
        Err(RegistryError::NotADeck(target.id))
    }

    /// Put a resource onto a deck and persist its new location.
    ///
    /// For a named position the (deck, position) slot must be free and
    /// the deck type must carry a positioning strategy; the computed
    /// coordinate is returned. Explicit coordinates skip both.
    pub async fn assign_to_deck(
        &self,
        resource_id: &str,
        target_id: &str,
        placement: Placement,
    ) -> RegistryResult<Coordinate> {
        let mut resource = self.store.require_asset(resource_id)?;
        let target = self.store.require_asset(target_id)?;
        let deck_record = self.resolve_deck_record(target)?;

        let deck_driver = self.create_or_get(&deck_record).await?;
        let deck = deck_driver
            .as_deck()
            .ok_or_else(|| RegistryError::NotADeck(deck_record.id.clone()))?;

        let (position, coordinate) = match placement {
            Placement::Named(position) => {
                if let Some(occupant) =
                    self.store.resource_at_position(&deck_record.id, &position)?
                {
                    if occupant.id != resource_id {
                        return Err(RegistryError::PositionOccupied {
                            deck: deck_record.id.clone(),
                            position,
                            occupant: occupant.id,
                        });
                    }
                }
                let strategy = self
                    .catalog
                    .positioning(&deck_record.type_id)
                    .ok_or_else(|| RegistryError::NoStrategy(deck_record.type_id.clone()))?;
                let coordinate = resolve_coordinate(strategy, deck, &position)?;
                (Some(position), coordinate)
            }
            Placement::Explicit {
                position,
                coordinate,
            } => {
                // A placed record must carry a position name; unnamed
                // coordinate placements get a label derived from the
                // coordinate itself.
                let label = position.unwrap_or_else(|| coordinate_label(&coordinate));
                (Some(label), coordinate)
            }
        };

        deck.place(resource_id, position.as_deref(), coordinate)?;

        resource.parent_deck = Some(deck_record.id.clone());
        resource.position = position.clone();
        if !resource.status.is_in_use() {
            resource.status = AssetStatus::AvailableOnDeck;
        }
        resource.updated_at = epoch_secs();
        self.store.put_asset(&resource)?;

        info!(
            resource = %resource_id,
            deck = %deck_record.id,
            ?position,
            x = coordinate.x,
            y = coordinate.y,
            z = coordinate.z,
            "resource assigned to deck"
        );
        Ok(coordinate)
    }

    /// Take a resource off its deck.
    ///
    /// The live-side removal is best effort; the persisted
    /// status/location reset happens unconditionally so the durable
    /// record stays authoritative.
    pub async fn clear_deck_position(&self, resource_id: &str) -> RegistryResult<()> {
        let mut resource = self.store.require_asset(resource_id)?;

        if let Some(deck_id) = &resource.parent_deck {
            if let Some(deck_driver) = self.get(deck_id).await {
                if let Some(deck) = deck_driver.as_deck() {
                    match deck.remove(resource_id) {
                        Ok(true) => debug!(resource = %resource_id, deck = %deck_id, "removed from deck"),
                        Ok(false) => {
                            debug!(resource = %resource_id, deck = %deck_id, "deck had no such resource")
                        }
                        Err(e) => {
                            warn!(resource = %resource_id, deck = %deck_id, error = %e, "live-side removal failed")
                        }
                    }
                }
            }
        }

        resource.parent_deck = None;
        resource.position = None;
        if resource.status == AssetStatus::AvailableOnDeck {
            resource.status = AssetStatus::AvailableInStorage;
        }
        resource.updated_at = epoch_secs();
        self.store.put_asset(&resource)?;
        Ok(())
    }

    /// Clear a resource's live state.
    ///
    /// A deck-shaped resource drops every placed child; anything else is
    /// removed from its own deck via [`Self::clear_deck_position`].
    pub async fn clear_resource(&self, resource_id: &str) -> RegistryResult<()> {
        let resource = self.store.require_asset(resource_id)?;

        if self.is_deck_type(&resource.type_id) {
            if let Some(driver) = self.get(resource_id).await {
                if let Some(deck) = driver.as_deck() {
                    deck.clear();
                    debug!(deck = %resource_id, "deck live state cleared");
                }
            }
            return Ok(());
        }

        self.clear_deck_position(resource_id).await
    }

    // ── Aggregate state ────────────────────────────────────────────

    /// Serialize every live object's state, keyed by canonical asset id.
    ///
    /// Restored-but-never-reconstructed seeds are carried along so a
    /// snapshot taken before an asset's first use does not lose the
    /// state saved by the previous process.
    pub async fn snapshot_aggregate(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        {
            let seed = self.seed.lock().unwrap_or_else(|e| e.into_inner());
            for (id, value) in seed.iter() {
                map.insert(id.clone(), value.clone());
            }
        }
        {
            let live = self.live.read().await;
            for driver in live.values() {
                map.insert(driver.asset_id().to_string(), driver.snapshot());
            }
        }
        serde_json::Value::Object(map)
    }

    /// Load a previously persisted aggregate into the seed map.
    ///
    /// Called once at process start, before any acquisition runs.
    pub fn load_aggregate(&self, payload: &serde_json::Value) {
        let Some(object) = payload.as_object() else {
            warn!("workcell snapshot payload is not an object, ignoring");
            return;
        };
        let mut seed = self.seed.lock().unwrap_or_else(|e| e.into_inner());
        for (id, value) in object {
            seed.insert(id.clone(), value.clone());
        }
        info!(assets = object.len(), "workcell snapshot loaded");
    }
}

/// Position label for an unnamed coordinate placement.
fn coordinate_label(coordinate: &Coordinate) -> String {
    format!(
        "@{:.1}/{:.1}/{:.1}",
        coordinate.x, coordinate.y, coordinate.z
    )
}
