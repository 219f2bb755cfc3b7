//! StateSyncer — durable checkpoints of the live aggregate.
//!
//! Startup links the process's registry to one workcell document
//! (created if absent; a prior snapshot is loaded into the registry
//! before anything else proceeds). A background loop then serializes
//! the aggregate to the store on a short interval and to the rotating
//! disk ring on a longer one. Shutdown performs one final disk write —
//! guaranteed by a drop guard so it happens on every exit path,
//! including panic and task cancellation — followed by a best-effort
//! final durable write whose failure is logged but not fatal.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use labcell_registry::LiveRegistry;
use labcell_state::{AssetStore, WorkcellDoc, epoch_secs};

use crate::error::SyncResult;
use crate::snapshot::SnapshotWriter;

/// Configuration for the sync loop.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Stable identifier of the workcell this process manages.
    pub workcell_id: String,
    /// Directory for disk snapshot files.
    pub snapshot_dir: PathBuf,
    /// Durable checkpoint interval.
    pub db_interval: Duration,
    /// Disk snapshot interval (longer).
    pub disk_interval: Duration,
    /// Size of the disk snapshot ring.
    pub ring_size: usize,
}

impl SyncConfig {
    pub fn new(workcell_id: impl Into<String>, snapshot_dir: impl Into<PathBuf>) -> Self {
        Self {
            workcell_id: workcell_id.into(),
            snapshot_dir: snapshot_dir.into(),
            db_interval: Duration::from_secs(5),
            disk_interval: Duration::from_secs(60),
            ring_size: 5,
        }
    }
}

/// Owns the background checkpoint loop for one process.
pub struct StateSyncer {
    store: AssetStore,
    registry: Arc<LiveRegistry>,
    config: SyncConfig,
}

/// Handle to a running sync loop.
pub struct SyncHandle {
    handle: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
}

impl SyncHandle {
    /// Cooperative stop: signal the loop, wait for the final flush.
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.handle.await;
        info!("state sync stopped");
    }

    /// Hard-cancel the loop without the cooperative shutdown path
    /// (crash simulation in tests; the drop guard still writes the
    /// final disk snapshot).
    pub async fn abort(self) {
        self.handle.abort();
        let _ = self.handle.await;
    }
}

impl StateSyncer {
    pub fn new(store: AssetStore, registry: Arc<LiveRegistry>, config: SyncConfig) -> Self {
        Self {
            store,
            registry,
            config,
        }
    }

    /// Link to the workcell document and start the loop.
    ///
    /// An existing document's payload is loaded into the registry before
    /// the loop starts; otherwise an empty document is created.
    pub async fn start(self) -> SyncResult<SyncHandle> {
        match self.store.get_workcell(&self.config.workcell_id)? {
            Some(doc) => {
                self.registry.load_aggregate(&doc.payload);
                info!(workcell = %self.config.workcell_id, "linked to existing workcell document");
            }
            None => {
                self.store.put_workcell(&WorkcellDoc {
                    id: self.config.workcell_id.clone(),
                    payload: serde_json::json!({}),
                    updated_at: epoch_secs(),
                })?;
                info!(workcell = %self.config.workcell_id, "created workcell document");
            }
        }

        let writer = SnapshotWriter::new(
            &self.config.snapshot_dir,
            &self.config.workcell_id,
            self.config.ring_size,
        )?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(run_sync_loop(
            self.store,
            self.registry,
            self.config,
            writer,
            shutdown_rx,
        ));

        Ok(SyncHandle {
            handle,
            shutdown_tx,
        })
    }
}

/// Writes the final disk snapshot when dropped, so the write happens on
/// every exit path out of the loop task.
struct FinalFlush {
    final_path: PathBuf,
    latest: Arc<Mutex<Option<serde_json::Value>>>,
}

impl Drop for FinalFlush {
    fn drop(&mut self) {
        let payload = {
            let latest = self.latest.lock().unwrap_or_else(|e| e.into_inner());
            latest.clone()
        };
        let Some(payload) = payload else {
            // Nothing was ever serialized; don't clobber an older final
            // snapshot with an empty one.
            return;
        };
        match serde_json::to_vec_pretty(&payload) {
            Ok(bytes) => {
                if let Err(e) = std::fs::write(&self.final_path, bytes) {
                    error!(path = %self.final_path.display(), error = %e, "final snapshot write failed");
                } else {
                    info!(path = %self.final_path.display(), "final snapshot written");
                }
            }
            Err(e) => error!(error = %e, "final snapshot serialization failed"),
        }
    }
}

async fn run_sync_loop(
    store: AssetStore,
    registry: Arc<LiveRegistry>,
    config: SyncConfig,
    mut writer: SnapshotWriter,
    mut shutdown: watch::Receiver<bool>,
) {
    let latest: Arc<Mutex<Option<serde_json::Value>>> = Arc::new(Mutex::new(None));
    let _guard = FinalFlush {
        final_path: writer.final_path(),
        latest: latest.clone(),
    };
    let mut last_disk = Instant::now();

    debug!(workcell = %config.workcell_id, "sync loop starting");

    loop {
        tokio::select! {
            _ = tokio::time::sleep(config.db_interval) => {
                let payload = registry.snapshot_aggregate().await;
                {
                    let mut slot = latest.lock().unwrap_or_else(|e| e.into_inner());
                    *slot = Some(payload.clone());
                }

                if let Err(e) = store.put_workcell(&WorkcellDoc {
                    id: config.workcell_id.clone(),
                    payload: payload.clone(),
                    updated_at: epoch_secs(),
                }) {
                    error!(workcell = %config.workcell_id, error = %e, "durable checkpoint failed");
                }

                if last_disk.elapsed() >= config.disk_interval {
                    match writer.write_ring(&payload) {
                        Ok(_) => last_disk = Instant::now(),
                        Err(e) => error!(error = %e, "ring snapshot failed"),
                    }
                }
            }
            _ = shutdown.changed() => {
                debug!(workcell = %config.workcell_id, "sync loop shutting down");
                break;
            }
        }
    }

    // One last serialization; the guard writes it to disk whatever
    // happens next, and the durable write is best effort.
    let payload = registry.snapshot_aggregate().await;
    {
        let mut slot = latest.lock().unwrap_or_else(|e| e.into_inner());
        *slot = Some(payload.clone());
    }
    if let Err(e) = store.put_workcell(&WorkcellDoc {
        id: config.workcell_id.clone(),
        payload,
        updated_at: epoch_secs(),
    }) {
        error!(workcell = %config.workcell_id, error = %e, "final durable write failed");
    }
}
