//! AssetStore — redb-backed persistence for asset records.
//!
//! Provides typed CRUD over asset records and workcell snapshot
//! documents. All values are JSON-serialized into redb's `&[u8]` value
//! columns. The store supports both on-disk and in-memory backends (the
//! latter for testing), and every write re-checks the record invariants
//! plus deck-position occupancy exclusivity.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe asset store backed by redb.
#[derive(Clone)]
pub struct AssetStore {
    db: Arc<Database>,
}

impl AssetStore {
    /// Open (or create) a persistent asset store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "asset store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory asset store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory asset store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(ASSETS).map_err(map_err!(Table))?;
        txn.open_table(WORKCELLS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Assets ─────────────────────────────────────────────────────

    /// Insert or update an asset record.
    ///
    /// Rejects records violating the status/owner/placement invariants,
    /// and rejects a placement onto a (deck, position) slot another
    /// record already occupies.
    pub fn put_asset(&self, record: &AssetRecord) -> StateResult<()> {
        record.validate().map_err(StateError::Invariant)?;

        if let Some((deck, position)) = record.occupied_slot() {
            if let Some(occupant) = self.resource_at_position(deck, position)? {
                if occupant.id != record.id {
                    return Err(StateError::PositionOccupied {
                        deck: deck.to_string(),
                        position: position.to_string(),
                        occupant: occupant.id,
                    });
                }
            }
        }

        let value = serde_json::to_vec(record).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(ASSETS).map_err(map_err!(Table))?;
            table
                .insert(record.id.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(id = %record.id, status = ?record.status, "asset stored");
        Ok(())
    }

    /// Get an asset record by id.
    pub fn get_asset(&self, id: &str) -> StateResult<Option<AssetRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(ASSETS).map_err(map_err!(Table))?;
        match table.get(id).map_err(map_err!(Read))? {
            Some(guard) => {
                let record: AssetRecord =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// Get an asset record by id, or fail.
    pub fn require_asset(&self, id: &str) -> StateResult<AssetRecord> {
        self.get_asset(id)?
            .ok_or_else(|| StateError::NotFound(id.to_string()))
    }

    /// Find an asset record by its unique display name.
    pub fn find_by_name(&self, name: &str) -> StateResult<Option<AssetRecord>> {
        Ok(self
            .list_assets()?
            .into_iter()
            .find(|record| record.name == name))
    }

    /// List all asset records.
    pub fn list_assets(&self) -> StateResult<Vec<AssetRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(ASSETS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let record: AssetRecord =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(record);
        }
        Ok(results)
    }

    /// List all asset records of a given type.
    pub fn list_by_type(&self, type_id: &str) -> StateResult<Vec<AssetRecord>> {
        Ok(self
            .list_assets()?
            .into_iter()
            .filter(|record| record.type_id == type_id)
            .collect())
    }

    /// The resource currently occupying a (deck, position) slot, if any.
    pub fn resource_at_position(
        &self,
        deck_id: &str,
        position: &str,
    ) -> StateResult<Option<AssetRecord>> {
        Ok(self.list_assets()?.into_iter().find(|record| {
            record.occupied_slot() == Some((deck_id, position))
        }))
    }

    /// Delete an asset record by id. Returns true if it existed.
    pub fn delete_asset(&self, id: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(ASSETS).map_err(map_err!(Table))?;
            existed = table.remove(id).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%id, existed, "asset deleted");
        Ok(existed)
    }

    // ── Workcell documents ─────────────────────────────────────────

    /// Insert or update a workcell snapshot document.
    pub fn put_workcell(&self, doc: &WorkcellDoc) -> StateResult<()> {
        let value = serde_json::to_vec(doc).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(WORKCELLS).map_err(map_err!(Table))?;
            table
                .insert(doc.id.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Get a workcell snapshot document by id.
    pub fn get_workcell(&self, id: &str) -> StateResult<Option<WorkcellDoc>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(WORKCELLS).map_err(map_err!(Table))?;
        match table.get(id).map_err(map_err!(Read))? {
            Some(guard) => {
                let doc: WorkcellDoc =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(doc))
            }
            None => Ok(None),
        }
    }
}
