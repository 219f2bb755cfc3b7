//! Disk snapshot files — a database-independent fallback copy of the
//! live aggregate.
//!
//! Periodic snapshots rotate through a bounded ring of numbered files;
//! shutdown writes one unconditional `*_final_exit.json` regardless of
//! where the ring pointer is.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{SyncError, SyncResult};

/// Writes rotating and final snapshot files for one workcell.
pub struct SnapshotWriter {
    dir: PathBuf,
    workcell_id: String,
    ring_size: usize,
    next_index: usize,
}

impl SnapshotWriter {
    /// Create a writer, creating the snapshot directory if needed.
    pub fn new(dir: &Path, workcell_id: &str, ring_size: usize) -> SyncResult<Self> {
        std::fs::create_dir_all(dir)
            .map_err(|e| SyncError::Io(format!("create {}: {e}", dir.display())))?;
        Ok(Self {
            dir: dir.to_path_buf(),
            workcell_id: workcell_id.to_string(),
            ring_size: ring_size.max(1),
            next_index: 0,
        })
    }

    /// Write the next ring file, overwriting the oldest slot once the
    /// ring is full. Returns the path written.
    pub fn write_ring(&mut self, payload: &serde_json::Value) -> SyncResult<PathBuf> {
        let index = self.next_index % self.ring_size;
        self.next_index = self.next_index.wrapping_add(1);

        let path = self
            .dir
            .join(format!("{}_snapshot_{index}.json", self.workcell_id));
        write_json(&path, payload)?;
        debug!(path = %path.display(), "ring snapshot written");
        Ok(path)
    }

    /// Write the unconditional shutdown snapshot.
    pub fn write_final(&self, payload: &serde_json::Value) -> SyncResult<PathBuf> {
        let path = self
            .dir
            .join(format!("{}_final_exit.json", self.workcell_id));
        write_json(&path, payload)?;
        debug!(path = %path.display(), "final snapshot written");
        Ok(path)
    }

    /// Path of the final-exit snapshot, whether or not it exists yet.
    pub fn final_path(&self) -> PathBuf {
        self.dir
            .join(format!("{}_final_exit.json", self.workcell_id))
    }
}

fn write_json(path: &Path, payload: &serde_json::Value) -> SyncResult<()> {
    let bytes = serde_json::to_vec_pretty(payload)
        .map_err(|e| SyncError::Serialize(e.to_string()))?;
    std::fs::write(path, bytes)
        .map_err(|e| SyncError::Io(format!("write {}: {e}", path.display())))
}
