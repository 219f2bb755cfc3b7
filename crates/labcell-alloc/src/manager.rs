//! AssetManager — maps abstract asset requirements to concrete records
//! and drives their status transitions.
//!
//! Selection is idempotent for a run: re-acquiring a requirement the
//! run already holds returns the same asset and suppresses the
//! persisted write entirely when nothing would change. Cross-process
//! exclusivity is the lock manager's job at scheduling time; this state
//! machine is the per-worker authority for which record a requirement
//! binds to and what its durable status says.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, warn};

use labcell_registry::{LiveRegistry, Placement};
use labcell_state::{
    AssetId, AssetKind, AssetRecord, AssetStatus, AssetStore, AssetTypeCatalog, RunId, TypeId,
    epoch_secs,
};

use crate::error::{AcquireError, AcquireResult, ReleaseError, ReleaseResult};

/// Protocol-level description of one required asset.
#[derive(Debug, Clone)]
pub struct AssetRequirement {
    /// Requirement name from the protocol (reported in errors).
    pub name: String,
    pub type_id: TypeId,
    /// Pin the requirement to one concrete instance.
    pub instance_id: Option<AssetId>,
    /// Ask for the resource to be placed here after selection.
    pub location: Option<DeckLocation>,
    /// Property filters a candidate must match exactly.
    pub properties: HashMap<String, serde_json::Value>,
}

impl AssetRequirement {
    pub fn new(name: impl Into<String>, type_id: impl Into<TypeId>) -> Self {
        Self {
            name: name.into(),
            type_id: type_id.into(),
            instance_id: None,
            location: None,
            properties: HashMap::new(),
        }
    }
}

/// A deck named by the caller plus a position on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeckLocation {
    pub deck_name: String,
    pub position: String,
}

/// Terminal state for a released resource.
#[derive(Debug, Clone)]
pub struct ResourceDisposition {
    pub status: AssetStatus,
    /// Leave the record pointing at this location (the physical item
    /// stays where it is; the durable record is authoritative).
    pub location: Option<DeckLocation>,
}

impl Default for ResourceDisposition {
    fn default() -> Self {
        Self {
            status: AssetStatus::AvailableInStorage,
            location: None,
        }
    }
}

/// Per-worker acquisition/release state machine.
pub struct AssetManager {
    store: AssetStore,
    catalog: AssetTypeCatalog,
    registry: Arc<LiveRegistry>,
}

impl AssetManager {
    pub fn new(store: AssetStore, catalog: AssetTypeCatalog, registry: Arc<LiveRegistry>) -> Self {
        Self {
            store,
            catalog,
            registry,
        }
    }

    // ── Machines ───────────────────────────────────────────────────

    /// Select and take a machine of `type_id` for a run.
    ///
    /// Preference order: a machine this run already holds (idempotent
    /// re-acquire), then the first available one. The machine's live
    /// object is brought up before the status transition; a failed
    /// bring-up marks the record `Error` and fails the acquisition.
    pub async fn acquire_machine(
        &self,
        run: &RunId,
        requirement: &str,
        type_id: &str,
    ) -> AcquireResult<AssetRecord> {
        // Decks are resources; both the driver factory and the catalog
        // can independently detect the misuse.
        if self.registry.is_deck_type(type_id) {
            return Err(AcquireError::DeckViaMachinePath {
                requirement: requirement.to_string(),
                type_id: type_id.to_string(),
            });
        }

        let candidates: Vec<AssetRecord> = self
            .store
            .list_by_type(type_id)?
            .into_iter()
            .filter(|record| record.kind == AssetKind::Machine)
            .collect();

        let selected = candidates
            .iter()
            .find(|record| {
                record.status == AssetStatus::InUse && record.owner_run.as_ref() == Some(run)
            })
            .or_else(|| {
                candidates
                    .iter()
                    .find(|record| record.status == AssetStatus::Available)
            })
            .cloned()
            .ok_or_else(|| AcquireError::NoCandidate {
                requirement: requirement.to_string(),
                type_id: type_id.to_string(),
            })?;

        if let Err(e) = self.registry.create_or_get(&selected).await {
            self.mark_error(&selected.id);
            return Err(AcquireError::InitFailed {
                requirement: requirement.to_string(),
                asset: selected.id,
                source: e,
            });
        }

        self.transition_to_in_use(selected, run, requirement)
            .map_err(AcquireError::from)
    }

    /// Release a machine: shut its live object down, then write the
    /// terminal status (default `Available`) with the owner cleared.
    ///
    /// A deck-shaped target is a logged no-op — decks go through the
    /// resource path.
    pub async fn release_machine(
        &self,
        run: &RunId,
        asset_id: &str,
        terminal: Option<AssetStatus>,
    ) -> ReleaseResult<()> {
        let record = self.require(asset_id)?;

        if self.registry.is_deck_type(&record.type_id) {
            warn!(
                asset = %asset_id,
                type_id = %record.type_id,
                "release_machine called on a deck-shaped asset, ignoring"
            );
            return Ok(());
        }

        if record.owner_run.is_some() && record.owner_run.as_ref() != Some(run) {
            warn!(
                asset = %asset_id,
                owner = ?record.owner_run,
                releasing_run = %run,
                "machine released by a run that does not own it"
            );
        }

        self.registry
            .shutdown(asset_id)
            .await
            .map_err(|e| ReleaseError::Live {
                asset: asset_id.to_string(),
                source: e,
            })?;

        // Re-read: a failed shutdown path may have rewritten the record.
        let mut record = self.require(asset_id)?;
        record.status = terminal.unwrap_or(AssetStatus::Available);
        record.owner_run = None;
        record.updated_at = epoch_secs();
        self.store
            .put_asset(&record)
            .map_err(|e| ReleaseError::StatusUpdate {
                asset: asset_id.to_string(),
                source: e,
            })?;

        info!(asset = %asset_id, %run, status = ?record.status, "machine released");
        Ok(())
    }

    // ── Resources ──────────────────────────────────────────────────

    /// Select and take a resource for a run.
    ///
    /// With an explicit instance the instance is verified (type match,
    /// available or already held by this run). Otherwise candidates are
    /// filtered by type and property constraints and picked in priority
    /// order: held by this run, on a deck, in storage.
    ///
    /// A `{deck, position}` location is applied through the registry
    /// (which enforces position exclusivity) — unless the selected
    /// instance is itself deck-shaped: a deck is not placed on another
    /// deck through this path, so the constraint is logged and ignored.
    pub async fn acquire_resource(
        &self,
        run: &RunId,
        requirement: &AssetRequirement,
    ) -> AcquireResult<AssetRecord> {
        let selected = match &requirement.instance_id {
            Some(instance_id) => self.verify_explicit_instance(run, requirement, instance_id)?,
            None => self.select_resource(run, requirement)?,
        };

        if let Err(e) = self.registry.create_or_get(&selected).await {
            self.mark_error(&selected.id);
            return Err(AcquireError::InitFailed {
                requirement: requirement.name.clone(),
                asset: selected.id,
                source: e,
            });
        }

        if let Some(location) = &requirement.location {
            if self.registry.is_deck_type(&selected.type_id) {
                warn!(
                    asset = %selected.id,
                    requirement = %requirement.name,
                    deck = %location.deck_name,
                    "location constraint on a deck-shaped resource ignored"
                );
            } else {
                self.place(requirement, &selected.id, location).await?;
            }
        }

        // Placement may have rewritten the record; transition from the
        // freshest copy.
        let fresh = self.store.require_asset(&selected.id)?;
        self.transition_to_in_use(fresh, run, &requirement.name)
            .map_err(AcquireError::from)
    }

    fn verify_explicit_instance(
        &self,
        run: &RunId,
        requirement: &AssetRequirement,
        instance_id: &str,
    ) -> AcquireResult<AssetRecord> {
        let record = self.store.require_asset(instance_id)?;

        if record.type_id != requirement.type_id {
            return Err(AcquireError::InstanceTypeMismatch {
                requirement: requirement.name.clone(),
                instance: instance_id.to_string(),
                actual: record.type_id,
                type_id: requirement.type_id.clone(),
            });
        }

        let held_by_run =
            record.status == AssetStatus::InUse && record.owner_run.as_ref() == Some(run);
        if !held_by_run && !record.status.is_available() {
            return Err(AcquireError::InstanceUnavailable {
                requirement: requirement.name.clone(),
                instance: instance_id.to_string(),
                status: record.status,
                run: run.clone(),
            });
        }

        Ok(record)
    }

    fn select_resource(
        &self,
        run: &RunId,
        requirement: &AssetRequirement,
    ) -> AcquireResult<AssetRecord> {
        let candidates: Vec<AssetRecord> = self
            .store
            .list_by_type(&requirement.type_id)?
            .into_iter()
            .filter(|record| record.kind.is_resource_like())
            .filter(|record| properties_match(record, &requirement.properties))
            .collect();

        let pick_status = |status: AssetStatus| {
            candidates
                .iter()
                .find(|record| record.status == status)
                .cloned()
        };

        candidates
            .iter()
            .find(|record| {
                record.status == AssetStatus::InUse && record.owner_run.as_ref() == Some(run)
            })
            .cloned()
            .or_else(|| pick_status(AssetStatus::AvailableOnDeck))
            .or_else(|| pick_status(AssetStatus::AvailableInStorage))
            .ok_or_else(|| AcquireError::NoCandidate {
                requirement: requirement.name.clone(),
                type_id: requirement.type_id.clone(),
            })
    }

    async fn place(
        &self,
        requirement: &AssetRequirement,
        resource_id: &str,
        location: &DeckLocation,
    ) -> AcquireResult<()> {
        let deck = self
            .store
            .find_by_name(&location.deck_name)?
            .ok_or_else(|| AcquireError::DeckNotFound {
                requirement: requirement.name.clone(),
                deck_name: location.deck_name.clone(),
            })?;

        self.registry
            .assign_to_deck(
                resource_id,
                &deck.id,
                Placement::Named(location.position.clone()),
            )
            .await
            .map_err(|e| AcquireError::Placement {
                requirement: requirement.name.clone(),
                source: e,
            })?;
        Ok(())
    }

    /// Release a resource: clear its deck position (or, for a deck,
    /// its whole live state), then write the caller's terminal
    /// status/location.
    pub async fn release_resource(
        &self,
        run: &RunId,
        asset_id: &str,
        disposition: ResourceDisposition,
    ) -> ReleaseResult<()> {
        let record = self.require(asset_id)?;

        if self.registry.is_deck_type(&record.type_id) {
            self.registry
                .clear_resource(asset_id)
                .await
                .map_err(|e| ReleaseError::Live {
                    asset: asset_id.to_string(),
                    source: e,
                })?;
        } else {
            self.registry
                .clear_deck_position(asset_id)
                .await
                .map_err(|e| ReleaseError::Live {
                    asset: asset_id.to_string(),
                    source: e,
                })?;
        }

        let mut record = self.require(asset_id)?;
        record.status = disposition.status;
        record.owner_run = None;
        match &disposition.location {
            Some(location) => {
                let deck = self
                    .store
                    .find_by_name(&location.deck_name)
                    .map_err(ReleaseError::State)?
                    .ok_or_else(|| ReleaseError::NotFound(location.deck_name.clone()))?;
                record.parent_deck = Some(deck.id);
                record.position = Some(location.position.clone());
            }
            None => {
                record.parent_deck = None;
                record.position = None;
            }
        }
        record.updated_at = epoch_secs();
        self.store
            .put_asset(&record)
            .map_err(|e| ReleaseError::StatusUpdate {
                asset: asset_id.to_string(),
                source: e,
            })?;

        info!(asset = %asset_id, %run, status = ?record.status, "resource released");
        Ok(())
    }

    // ── Dispatch ───────────────────────────────────────────────────

    /// Route a requirement to the machine or resource path by catalog
    /// lookup, with a final name-based guard against an uncataloged
    /// deck type slipping into the machine path.
    pub async fn acquire_asset(
        &self,
        run: &RunId,
        requirement: &AssetRequirement,
    ) -> AcquireResult<AssetRecord> {
        if self.catalog.is_resource_type(&requirement.type_id) {
            return self.acquire_resource(run, requirement).await;
        }

        if requirement.type_id.to_ascii_lowercase().contains("deck")
            && !self.registry.is_deck_type(&requirement.type_id)
        {
            return Err(AcquireError::UncataloguedDeckType {
                requirement: requirement.name.clone(),
                type_id: requirement.type_id.clone(),
            });
        }

        self.acquire_machine(run, &requirement.name, &requirement.type_id)
            .await
    }

    // ── Helpers ────────────────────────────────────────────────────

    fn require(&self, asset_id: &str) -> ReleaseResult<AssetRecord> {
        self.store
            .get_asset(asset_id)
            .map_err(ReleaseError::State)?
            .ok_or_else(|| ReleaseError::NotFound(asset_id.to_string()))
    }

    /// Write `InUse`/owner, skipping the store entirely when the record
    /// is already in exactly that state.
    fn transition_to_in_use(
        &self,
        mut record: AssetRecord,
        run: &RunId,
        requirement: &str,
    ) -> Result<AssetRecord, labcell_state::StateError> {
        let already =
            record.status == AssetStatus::InUse && record.owner_run.as_ref() == Some(run);
        if already {
            info!(asset = %record.id, %run, %requirement, "asset already held by run, write suppressed");
            return Ok(record);
        }

        record.status = AssetStatus::InUse;
        record.owner_run = Some(run.clone());
        record.updated_at = epoch_secs();
        self.store.put_asset(&record)?;
        info!(asset = %record.id, %run, %requirement, "asset acquired");
        Ok(record)
    }

    /// Best-effort `Error` transition after a failed bring-up.
    fn mark_error(&self, asset_id: &str) {
        match self.store.get_asset(asset_id) {
            Ok(Some(mut record)) => {
                record.status = AssetStatus::Error;
                record.owner_run = None;
                record.updated_at = epoch_secs();
                if let Err(e) = self.store.put_asset(&record) {
                    warn!(asset = %asset_id, error = %e, "failed to mark asset as errored");
                }
            }
            Ok(None) => {}
            Err(e) => warn!(asset = %asset_id, error = %e, "failed to load asset for error transition"),
        }
    }
}

/// Every requested property must be present and equal.
fn properties_match(
    record: &AssetRecord,
    wanted: &HashMap<String, serde_json::Value>,
) -> bool {
    wanted
        .iter()
        .all(|(key, value)| record.properties.get(key) == Some(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use labcell_registry::DriverFactory;
    use labcell_registry::sim::{self, SIM_ARM, SIM_DECK, SIM_PLATE};

    fn manager() -> AssetManager {
        let store = AssetStore::open_in_memory().unwrap();
        let mut factory = DriverFactory::new();
        sim::register_sim_drivers(&mut factory);
        let registry = Arc::new(LiveRegistry::new(
            store.clone(),
            sim::sim_catalog(),
            factory,
        ));
        AssetManager::new(store, sim::sim_catalog(), registry)
    }

    fn record(id: &str, kind: AssetKind, type_id: &str) -> AssetRecord {
        let status = match kind {
            AssetKind::Machine => AssetStatus::Available,
            _ => AssetStatus::AvailableInStorage,
        };
        AssetRecord {
            id: id.to_string(),
            kind,
            type_id: type_id.to_string(),
            name: id.to_string(),
            status,
            owner_run: None,
            parent_deck: None,
            position: None,
            counterpart: None,
            properties: HashMap::new(),
            config: serde_json::Value::Null,
            created_at: 1000,
            updated_at: 1000,
        }
    }

    fn run(id: &str) -> RunId {
        id.to_string()
    }

    #[tokio::test]
    async fn machine_contention_between_runs() {
        let mgr = manager();
        mgr.store
            .put_asset(&record("m1", AssetKind::Machine, SIM_ARM))
            .unwrap();

        let won = mgr.acquire_machine(&run("A"), "arm", SIM_ARM).await.unwrap();
        assert_eq!(won.status, AssetStatus::InUse);
        assert_eq!(won.owner_run.as_deref(), Some("A"));

        // Run B finds nothing of the type available.
        assert!(matches!(
            mgr.acquire_machine(&run("B"), "arm", SIM_ARM).await,
            Err(AcquireError::NoCandidate { .. })
        ));
    }

    #[tokio::test]
    async fn idempotent_reacquire_suppresses_the_write() {
        let mgr = manager();
        mgr.store
            .put_asset(&record("m1", AssetKind::Machine, SIM_ARM))
            .unwrap();

        let first = mgr.acquire_machine(&run("A"), "arm", SIM_ARM).await.unwrap();
        assert_eq!(first.id, "m1");

        // Stamp the stored record so any further write is visible.
        let mut stamped = mgr.store.get_asset("m1").unwrap().unwrap();
        stamped.updated_at = 12345;
        mgr.store.put_asset(&stamped).unwrap();

        let second = mgr.acquire_machine(&run("A"), "arm", SIM_ARM).await.unwrap();
        assert_eq!(second.id, "m1");
        assert_eq!(
            mgr.store.get_asset("m1").unwrap().unwrap().updated_at,
            12345,
            "second acquire must not touch the store"
        );
    }

    #[tokio::test]
    async fn machine_path_rejects_deck_types() {
        let mgr = manager();
        mgr.store
            .put_asset(&record("d1", AssetKind::Deck, SIM_DECK))
            .unwrap();

        assert!(matches!(
            mgr.acquire_machine(&run("A"), "work-surface", SIM_DECK).await,
            Err(AcquireError::DeckViaMachinePath { .. })
        ));
    }

    #[tokio::test]
    async fn failed_bring_up_marks_record_error() {
        let mgr = manager();
        let mut rec = record("m1", AssetKind::Machine, SIM_ARM);
        rec.config = serde_json::json!({"fail_bring_up": true});
        mgr.store.put_asset(&rec).unwrap();

        assert!(matches!(
            mgr.acquire_machine(&run("A"), "arm", SIM_ARM).await,
            Err(AcquireError::InitFailed { .. })
        ));

        let stored = mgr.store.get_asset("m1").unwrap().unwrap();
        assert_eq!(stored.status, AssetStatus::Error);
        assert_eq!(stored.owner_run, None);
    }

    #[tokio::test]
    async fn release_machine_returns_it_to_available() {
        let mgr = manager();
        mgr.store
            .put_asset(&record("m1", AssetKind::Machine, SIM_ARM))
            .unwrap();
        mgr.acquire_machine(&run("A"), "arm", SIM_ARM).await.unwrap();

        mgr.release_machine(&run("A"), "m1", None).await.unwrap();

        let stored = mgr.store.get_asset("m1").unwrap().unwrap();
        assert_eq!(stored.status, AssetStatus::Available);
        assert_eq!(stored.owner_run, None);

        // Releasable to a non-default terminal status too.
        mgr.acquire_machine(&run("A"), "arm", SIM_ARM).await.unwrap();
        mgr.release_machine(&run("A"), "m1", Some(AssetStatus::Offline))
            .await
            .unwrap();
        let stored = mgr.store.get_asset("m1").unwrap().unwrap();
        assert_eq!(stored.status, AssetStatus::Offline);
    }

    #[tokio::test]
    async fn release_machine_on_deck_is_a_logged_noop() {
        let mgr = manager();
        let mut deck = record("d1", AssetKind::Deck, SIM_DECK);
        deck.status = AssetStatus::InUse;
        deck.owner_run = Some("A".to_string());
        mgr.store.put_asset(&deck).unwrap();

        mgr.release_machine(&run("A"), "d1", None).await.unwrap();

        // Untouched.
        let stored = mgr.store.get_asset("d1").unwrap().unwrap();
        assert_eq!(stored.status, AssetStatus::InUse);
        assert_eq!(stored.owner_run.as_deref(), Some("A"));
    }

    #[tokio::test]
    async fn resource_selection_prefers_held_then_on_deck_then_storage() {
        let mgr = manager();
        let mut in_storage = record("r-storage", AssetKind::Resource, SIM_PLATE);
        in_storage.status = AssetStatus::AvailableInStorage;
        let mut on_deck = record("r-deck", AssetKind::Resource, SIM_PLATE);
        on_deck.status = AssetStatus::AvailableOnDeck;
        on_deck.parent_deck = Some("d1".to_string());
        on_deck.position = Some("A1".to_string());
        mgr.store.put_asset(&in_storage).unwrap();
        mgr.store.put_asset(&on_deck).unwrap();

        let req = AssetRequirement::new("plate", SIM_PLATE);
        let picked = mgr.acquire_resource(&run("A"), &req).await.unwrap();
        assert_eq!(picked.id, "r-deck", "on-deck beats in-storage");

        // Re-acquire sticks to the held instance.
        let again = mgr.acquire_resource(&run("A"), &req).await.unwrap();
        assert_eq!(again.id, "r-deck");
    }

    #[tokio::test]
    async fn resource_property_filters_apply() {
        let mgr = manager();
        let mut small = record("r-small", AssetKind::Resource, SIM_PLATE);
        small
            .properties
            .insert("wells".to_string(), serde_json::json!(24));
        let mut big = record("r-big", AssetKind::Resource, SIM_PLATE);
        big.properties
            .insert("wells".to_string(), serde_json::json!(96));
        mgr.store.put_asset(&small).unwrap();
        mgr.store.put_asset(&big).unwrap();

        let mut req = AssetRequirement::new("plate", SIM_PLATE);
        req.properties
            .insert("wells".to_string(), serde_json::json!(96));

        let picked = mgr.acquire_resource(&run("A"), &req).await.unwrap();
        assert_eq!(picked.id, "r-big");

        req.properties
            .insert("wells".to_string(), serde_json::json!(384));
        assert!(matches!(
            mgr.acquire_resource(&run("A"), &req).await,
            Err(AcquireError::NoCandidate { .. })
        ));
    }

    #[tokio::test]
    async fn explicit_instance_is_verified() {
        let mgr = manager();
        mgr.store
            .put_asset(&record("r1", AssetKind::Resource, SIM_PLATE))
            .unwrap();

        // Wrong type.
        let mut req = AssetRequirement::new("plate", SIM_DECK);
        req.instance_id = Some("r1".to_string());
        assert!(matches!(
            mgr.acquire_resource(&run("A"), &req).await,
            Err(AcquireError::InstanceTypeMismatch { .. })
        ));

        // Held by someone else.
        let mut held = mgr.store.get_asset("r1").unwrap().unwrap();
        held.status = AssetStatus::InUse;
        held.owner_run = Some("B".to_string());
        mgr.store.put_asset(&held).unwrap();

        let mut req = AssetRequirement::new("plate", SIM_PLATE);
        req.instance_id = Some("r1".to_string());
        assert!(matches!(
            mgr.acquire_resource(&run("A"), &req).await,
            Err(AcquireError::InstanceUnavailable { .. })
        ));

        // Held by this run: fine.
        let picked = mgr.acquire_resource(&run("B"), &req).await.unwrap();
        assert_eq!(picked.id, "r1");
    }

    #[tokio::test]
    async fn acquire_resource_with_location_places_it() {
        let mgr = manager();
        mgr.store
            .put_asset(&record("deck-1", AssetKind::Deck, SIM_DECK))
            .unwrap();
        mgr.store
            .put_asset(&record("r1", AssetKind::Resource, SIM_PLATE))
            .unwrap();

        let mut req = AssetRequirement::new("plate", SIM_PLATE);
        req.location = Some(DeckLocation {
            deck_name: "deck-1".to_string(),
            position: "A1".to_string(),
        });

        let picked = mgr.acquire_resource(&run("A"), &req).await.unwrap();
        assert_eq!(picked.status, AssetStatus::InUse);
        assert_eq!(picked.parent_deck.as_deref(), Some("deck-1"));
        assert_eq!(picked.position.as_deref(), Some("A1"));
    }

    #[tokio::test]
    async fn location_constraint_on_a_deck_is_ignored_not_fatal() {
        let mgr = manager();
        mgr.store
            .put_asset(&record("deck-1", AssetKind::Deck, SIM_DECK))
            .unwrap();
        mgr.store
            .put_asset(&record("deck-2", AssetKind::Deck, SIM_DECK))
            .unwrap();

        let mut req = AssetRequirement::new("work-surface", SIM_DECK);
        req.location = Some(DeckLocation {
            deck_name: "deck-2".to_string(),
            position: "A1".to_string(),
        });

        let picked = mgr.acquire_resource(&run("A"), &req).await.unwrap();
        assert_eq!(picked.status, AssetStatus::InUse);
        // Not placed anywhere — a deck is not put on another deck.
        assert_eq!(picked.parent_deck, None);
    }

    #[tokio::test]
    async fn occupied_position_fails_the_second_acquisition() {
        let mgr = manager();
        mgr.store
            .put_asset(&record("deck-1", AssetKind::Deck, SIM_DECK))
            .unwrap();
        mgr.store
            .put_asset(&record("r1", AssetKind::Resource, SIM_PLATE))
            .unwrap();
        mgr.store
            .put_asset(&record("r2", AssetKind::Resource, SIM_PLATE))
            .unwrap();

        let location = Some(DeckLocation {
            deck_name: "deck-1".to_string(),
            position: "A1".to_string(),
        });

        let mut req = AssetRequirement::new("plate", SIM_PLATE);
        req.instance_id = Some("r1".to_string());
        req.location = location.clone();
        mgr.acquire_resource(&run("A"), &req).await.unwrap();

        let mut req2 = AssetRequirement::new("plate", SIM_PLATE);
        req2.instance_id = Some("r2".to_string());
        req2.location = location;
        assert!(matches!(
            mgr.acquire_resource(&run("B"), &req2).await,
            Err(AcquireError::Placement { .. })
        ));
    }

    #[tokio::test]
    async fn release_resource_clears_location_and_owner() {
        let mgr = manager();
        mgr.store
            .put_asset(&record("deck-1", AssetKind::Deck, SIM_DECK))
            .unwrap();
        mgr.store
            .put_asset(&record("r1", AssetKind::Resource, SIM_PLATE))
            .unwrap();

        let mut req = AssetRequirement::new("plate", SIM_PLATE);
        req.location = Some(DeckLocation {
            deck_name: "deck-1".to_string(),
            position: "A1".to_string(),
        });
        mgr.acquire_resource(&run("A"), &req).await.unwrap();

        mgr.release_resource(&run("A"), "r1", ResourceDisposition::default())
            .await
            .unwrap();

        let stored = mgr.store.get_asset("r1").unwrap().unwrap();
        assert_eq!(stored.status, AssetStatus::AvailableInStorage);
        assert_eq!(stored.owner_run, None);
        assert_eq!(stored.parent_deck, None);

        // The slot is free again.
        let mut req2 = AssetRequirement::new("plate", SIM_PLATE);
        req2.location = Some(DeckLocation {
            deck_name: "deck-1".to_string(),
            position: "A1".to_string(),
        });
        mgr.acquire_resource(&run("B"), &req2).await.unwrap();
    }

    #[tokio::test]
    async fn release_resource_can_leave_it_on_deck() {
        let mgr = manager();
        mgr.store
            .put_asset(&record("deck-1", AssetKind::Deck, SIM_DECK))
            .unwrap();
        mgr.store
            .put_asset(&record("r1", AssetKind::Resource, SIM_PLATE))
            .unwrap();

        let mut req = AssetRequirement::new("plate", SIM_PLATE);
        req.location = Some(DeckLocation {
            deck_name: "deck-1".to_string(),
            position: "B1".to_string(),
        });
        mgr.acquire_resource(&run("A"), &req).await.unwrap();

        mgr.release_resource(
            &run("A"),
            "r1",
            ResourceDisposition {
                status: AssetStatus::AvailableOnDeck,
                location: Some(DeckLocation {
                    deck_name: "deck-1".to_string(),
                    position: "B1".to_string(),
                }),
            },
        )
        .await
        .unwrap();

        let stored = mgr.store.get_asset("r1").unwrap().unwrap();
        assert_eq!(stored.status, AssetStatus::AvailableOnDeck);
        assert_eq!(stored.parent_deck.as_deref(), Some("deck-1"));
        assert_eq!(stored.position.as_deref(), Some("B1"));
    }

    #[tokio::test]
    async fn dispatch_routes_by_catalog_with_deck_name_guard() {
        let mgr = manager();
        mgr.store
            .put_asset(&record("m1", AssetKind::Machine, SIM_ARM))
            .unwrap();
        mgr.store
            .put_asset(&record("r1", AssetKind::Resource, SIM_PLATE))
            .unwrap();

        // Cataloged resource type → resource path.
        let picked = mgr
            .acquire_asset(&run("A"), &AssetRequirement::new("plate", SIM_PLATE))
            .await
            .unwrap();
        assert_eq!(picked.id, "r1");

        // Machine type → machine path.
        let picked = mgr
            .acquire_asset(&run("A"), &AssetRequirement::new("arm", SIM_ARM))
            .await
            .unwrap();
        assert_eq!(picked.id, "m1");

        // Uncataloged type whose name screams "deck" → guarded.
        assert!(matches!(
            mgr.acquire_asset(
                &run("A"),
                &AssetRequirement::new("surface", "vendor.deck_v2")
            )
            .await,
            Err(AcquireError::UncataloguedDeckType { .. })
        ));
    }
}
