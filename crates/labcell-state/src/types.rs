//! Domain types for the labcell asset store.
//!
//! These types represent the persisted state of machines, resources,
//! and decks, plus the workcell snapshot document the sync loop keeps
//! current. All types are serializable to/from JSON for storage in
//! redb tables.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Unique identifier for an asset record.
pub type AssetId = String;

/// Unique identifier for one execution of an automation protocol.
pub type RunId = String;

/// Stable string key identifying an asset type in the catalog and
/// driver factory.
pub type TypeId = String;

// ── Asset ─────────────────────────────────────────────────────────

/// What sort of physical thing an asset record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetKind {
    Machine,
    Resource,
    Deck,
}

impl AssetKind {
    /// Lock-key segment for this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetKind::Machine => "machine",
            AssetKind::Resource => "resource",
            AssetKind::Deck => "deck",
        }
    }

    /// Decks carry resource semantics (placement, storage statuses).
    pub fn is_resource_like(&self) -> bool {
        matches!(self, AssetKind::Resource | AssetKind::Deck)
    }
}

/// Lifecycle status of an asset record.
///
/// Machines use `Available`/`InUse`/`Offline`/`Error`; resources and
/// decks use `AvailableInStorage`/`AvailableOnDeck`/`InUse`/`Error`.
/// Which variants are legal for a record is checked by
/// [`AssetRecord::validate`] on every store write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetStatus {
    Available,
    InUse,
    Offline,
    Error,
    AvailableInStorage,
    AvailableOnDeck,
}

impl AssetStatus {
    /// Whether a run currently owns the asset.
    pub fn is_in_use(&self) -> bool {
        matches!(self, AssetStatus::InUse)
    }

    /// Whether the asset can be handed to a new run.
    pub fn is_available(&self) -> bool {
        matches!(
            self,
            AssetStatus::Available
                | AssetStatus::AvailableInStorage
                | AssetStatus::AvailableOnDeck
        )
    }

    /// Whether this status is legal for a record of the given kind.
    pub fn valid_for(&self, kind: AssetKind) -> bool {
        match kind {
            AssetKind::Machine => matches!(
                self,
                AssetStatus::Available
                    | AssetStatus::InUse
                    | AssetStatus::Offline
                    | AssetStatus::Error
            ),
            AssetKind::Resource | AssetKind::Deck => matches!(
                self,
                AssetStatus::AvailableInStorage
                    | AssetStatus::AvailableOnDeck
                    | AssetStatus::InUse
                    | AssetStatus::Error
            ),
        }
    }
}

/// Durable row for one physical machine, resource, or deck.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AssetRecord {
    pub id: AssetId,
    pub kind: AssetKind,
    pub type_id: TypeId,
    /// Display name, unique across the workcell; used in lock keys.
    pub name: String,
    pub status: AssetStatus,
    /// Run that currently owns the asset, if any.
    pub owner_run: Option<RunId>,
    /// Deck this resource sits on, if placed.
    pub parent_deck: Option<AssetId>,
    /// Named position on the parent deck.
    pub position: Option<String>,
    /// Record of the other kind describing the same physical object
    /// (a machine with an embedded deck, modeled as both).
    #[serde(default)]
    pub counterpart: Option<AssetId>,
    /// Filterable attributes (well volume, tip count, vendor, ...).
    #[serde(default)]
    pub properties: HashMap<String, serde_json::Value>,
    /// Driver construction configuration.
    #[serde(default)]
    pub config: serde_json::Value,
    /// Unix timestamp (seconds) when this record was created.
    pub created_at: u64,
    /// Unix timestamp (seconds) of the last status change.
    pub updated_at: u64,
}

impl AssetRecord {
    /// Check record-level invariants.
    ///
    /// Returns a human-readable description of the first violation.
    pub fn validate(&self) -> Result<(), String> {
        if self.id.is_empty() {
            return Err("asset id must not be empty".to_string());
        }
        if self.name.is_empty() {
            return Err(format!("asset {} has an empty name", self.id));
        }
        if !self.status.valid_for(self.kind) {
            return Err(format!(
                "status {:?} is not valid for a {:?} record",
                self.status, self.kind
            ));
        }
        if self.owner_run.is_some() != self.status.is_in_use() {
            return Err(format!(
                "owner/status mismatch on {}: owner {:?} with status {:?}",
                self.id, self.owner_run, self.status
            ));
        }
        if self.kind == AssetKind::Machine && self.parent_deck.is_some() {
            return Err(format!("machine {} cannot sit on a deck", self.id));
        }
        if self.status == AssetStatus::AvailableInStorage && self.parent_deck.is_some() {
            return Err(format!(
                "resource {} is in storage but still references a deck",
                self.id
            ));
        }
        // A placed record must say where on the deck it is.
        let placed = matches!(
            self.status,
            AssetStatus::AvailableOnDeck | AssetStatus::InUse
        );
        if placed && self.parent_deck.is_some() && self.position.is_none() {
            return Err(format!(
                "resource {} has a deck parent but no position name",
                self.id
            ));
        }
        Ok(())
    }

    /// The (deck, position) pair this record occupies, if placed.
    pub fn occupied_slot(&self) -> Option<(&str, &str)> {
        match (&self.parent_deck, &self.position) {
            (Some(deck), Some(pos)) => Some((deck.as_str(), pos.as_str())),
            _ => None,
        }
    }
}

// ── Coordinates ───────────────────────────────────────────────────

/// A 3-D coordinate on a deck surface, in millimeters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Coordinate {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

// ── Workcell snapshot ─────────────────────────────────────────────

/// Durable copy of the full serialized live state of one worker process.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkcellDoc {
    /// Stable identifier of the workcell this process manages.
    pub id: String,
    /// JSON aggregate of every live object's snapshot.
    pub payload: serde_json::Value,
    /// Unix timestamp (seconds) of the last sync tick.
    pub updated_at: u64,
}

/// Current Unix epoch in seconds.
pub fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
