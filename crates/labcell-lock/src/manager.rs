//! Distributed asset lock manager — cross-process mutual exclusion over
//! named assets, resilient to crashed holders.
//!
//! Keys in the external store:
//!
//! ```text
//! asset_lock:{kind}:{name}     value = reservation id, TTL'd
//! reservation:{reservationID}  JSON metadata, same TTL as its lock
//! owned_locks:{ownerRunID}     set of lock keys held by one run, TTL'd
//! ```
//!
//! Contention is reported through return values (`false`), never
//! errors. Store connectivity failures degrade acquire/release to
//! "unavailable"; availability checks and the sweep surface them as
//! errors so monitoring can tell "busy" from "broken".

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use labcell_state::{AssetKind, RunId};

use crate::error::LockResult;
use crate::store::{KeyTtl, LockStore};

/// Key prefix for asset lock values.
pub const LOCK_PREFIX: &str = "asset_lock:";
/// Key prefix for reservation metadata.
pub const RESERVATION_PREFIX: &str = "reservation:";
/// Key prefix for per-owner membership sets.
pub const OWNED_PREFIX: &str = "owned_locks:";

/// Retry policy for lock acquisition.
#[derive(Debug, Clone)]
pub struct LockConfig {
    /// Conditional-set attempts before giving up.
    pub attempts: u32,
    /// Fixed delay between attempts.
    pub retry_delay: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            attempts: 10,
            retry_delay: Duration::from_millis(500),
        }
    }
}

/// Metadata describing why and by whom a lock is held.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReservationMeta {
    pub reservation_id: String,
    pub owner_run: RunId,
    pub kind: AssetKind,
    pub name: String,
    /// Unix milliseconds when the lock was taken.
    pub created_at_ms: u64,
    /// Unix milliseconds when the lock's TTL runs out.
    pub expires_at_ms: u64,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

/// What `check_availability` found behind a held lock key.
#[derive(Debug, Clone, PartialEq)]
pub enum ReservationSnapshot {
    /// Held, with readable metadata.
    Held(ReservationMeta),
    /// The lock key exists but its metadata key is gone.
    HeldNoMetadata { reservation_id: String },
    /// The lock key exists but its metadata does not parse.
    HeldCorruptMetadata { reservation_id: String },
}

/// Per-item outcome counts from `release_all`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReleaseReport {
    /// Locks released normally.
    pub released: u32,
    /// Membership entries whose lock was already gone or held by a
    /// different reservation.
    pub stale: u32,
    /// Lock values that did not parse as reservation ids, force-deleted.
    pub orphans: u32,
    /// Entries that hit store errors.
    pub failed: u32,
}

impl ReleaseReport {
    /// Total entries that no longer hold a lock after the pass.
    pub fn cleared(&self) -> u32 {
        self.released + self.stale + self.orphans
    }
}

/// Per-category counts from `sweep_expired`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    /// Locks whose recorded expiry had passed.
    pub expired: u32,
    /// Locks with no TTL at all.
    pub orphaned: u32,
    /// Locks whose metadata did not parse.
    pub corrupt: u32,
    /// Locks left in place.
    pub live: u32,
    /// Keys that hit store errors mid-sweep.
    pub failed: u32,
}

impl SweepReport {
    pub fn removed(&self) -> u32 {
        self.expired + self.orphaned + self.corrupt
    }
}

/// Cross-process mutual exclusion over named assets.
pub struct AssetLockManager {
    store: Arc<dyn LockStore>,
    config: LockConfig,
}

impl AssetLockManager {
    pub fn new(store: Arc<dyn LockStore>) -> Self {
        Self {
            store,
            config: LockConfig::default(),
        }
    }

    pub fn with_config(mut self, config: LockConfig) -> Self {
        self.config = config;
        self
    }

    /// Try to take the lock for `(kind, name)` on behalf of a run.
    ///
    /// Retries up to the configured attempt count with a fixed delay —
    /// polling, not a queue, so arrival order is not honored and a
    /// contender can starve under sustained contention. Returns `false`
    /// on exhausted retries (normal contention) and on store errors
    /// (fail-safe: a broken store means "not available").
    pub async fn acquire(
        &self,
        kind: AssetKind,
        name: &str,
        owner: &RunId,
        reservation_id: &str,
        ttl: Duration,
        capabilities: &[String],
    ) -> bool {
        let key = lock_key(kind, name);

        for attempt in 0..self.config.attempts {
            match self.store.set_if_absent(&key, reservation_id, ttl) {
                Ok(true) => {
                    if !self.record_reservation(kind, name, owner, reservation_id, ttl, capabilities)
                    {
                        // Metadata write failed; give the lock back rather
                        // than hold it half-registered.
                        let _ = self.store.delete_if_equals(&key, reservation_id);
                        return false;
                    }
                    info!(%key, %owner, %reservation_id, ttl_ms = ttl.as_millis() as u64, "asset lock acquired");
                    return true;
                }
                Ok(false) => {
                    debug!(%key, attempt, "asset lock held, retrying");
                    if attempt + 1 < self.config.attempts {
                        tokio::time::sleep(self.config.retry_delay).await;
                    }
                }
                Err(e) => {
                    warn!(%key, error = %e, "lock store unreachable, treating asset as unavailable");
                    return false;
                }
            }
        }

        debug!(%key, attempts = self.config.attempts, "asset lock unavailable");
        false
    }

    /// Write reservation metadata and owner membership for a fresh lock.
    fn record_reservation(
        &self,
        kind: AssetKind,
        name: &str,
        owner: &RunId,
        reservation_id: &str,
        ttl: Duration,
        capabilities: &[String],
    ) -> bool {
        let now = epoch_millis();
        let meta = ReservationMeta {
            reservation_id: reservation_id.to_string(),
            owner_run: owner.clone(),
            kind,
            name: name.to_string(),
            created_at_ms: now,
            expires_at_ms: now + ttl.as_millis() as u64,
            capabilities: capabilities.to_vec(),
        };
        let Ok(payload) = serde_json::to_string(&meta) else {
            return false;
        };

        let meta_written = self
            .store
            .set_if_absent(&reservation_key(reservation_id), &payload, ttl);
        let member_added =
            self.store
                .set_add(&owned_key(owner), &lock_key(kind, name), ttl);

        match (meta_written, member_added) {
            (Ok(_), Ok(())) => true,
            (meta, member) => {
                warn!(
                    %reservation_id,
                    meta_err = ?meta.err(),
                    member_err = ?member.err(),
                    "failed to record reservation metadata"
                );
                false
            }
        }
    }

    /// Release a lock, verifying the caller's reservation still holds it.
    ///
    /// The check-then-delete happens atomically in the store, so a stale
    /// or duplicate release never removes a different holder's lock.
    /// Returns `false` if the lock was not held by that reservation, and
    /// on store errors (fail-safe).
    pub fn release(
        &self,
        kind: AssetKind,
        name: &str,
        reservation_id: &str,
        owner: &RunId,
    ) -> bool {
        let key = lock_key(kind, name);
        match self.store.delete_if_equals(&key, reservation_id) {
            Ok(true) => {
                let _ = self.store.delete(&reservation_key(reservation_id));
                let _ = self.store.set_remove(&owned_key(owner), &key);
                info!(%key, %owner, %reservation_id, "asset lock released");
                true
            }
            Ok(false) => {
                debug!(%key, %reservation_id, "release skipped, lock not held by this reservation");
                false
            }
            Err(e) => {
                warn!(%key, error = %e, "lock store unreachable during release");
                false
            }
        }
    }

    /// Release every lock a run still holds, keeping going past
    /// individual failures. The run-teardown primitive: invoked on
    /// completion, cancellation, and failure.
    pub fn release_all(&self, owner: &RunId) -> ReleaseReport {
        let owned = owned_key(owner);
        let mut report = ReleaseReport::default();

        let members = match self.store.set_members(&owned) {
            Ok(members) => members,
            Err(e) => {
                warn!(%owner, error = %e, "cannot read owned-lock set, nothing released");
                return report;
            }
        };

        for key in members {
            match self.store.get(&key) {
                Err(e) => {
                    warn!(%key, error = %e, "skipping lock during bulk release");
                    report.failed += 1;
                }
                Ok(None) => {
                    // Already expired or released.
                    report.stale += 1;
                    let _ = self.store.set_remove(&owned, &key);
                }
                Ok(Some(value)) if !is_reservation_id(&value) => {
                    warn!(%key, "owned lock holds unparseable reservation id, force-deleting orphan");
                    let _ = self.store.delete(&key);
                    report.orphans += 1;
                    let _ = self.store.set_remove(&owned, &key);
                }
                Ok(Some(reservation_id)) => {
                    match self.store.delete_if_equals(&key, &reservation_id) {
                        Ok(true) => {
                            let _ = self.store.delete(&reservation_key(&reservation_id));
                            report.released += 1;
                        }
                        Ok(false) => report.stale += 1,
                        Err(e) => {
                            warn!(%key, error = %e, "release failed during bulk release");
                            report.failed += 1;
                            continue;
                        }
                    }
                    let _ = self.store.set_remove(&owned, &key);
                }
            }
        }

        info!(
            %owner,
            released = report.released,
            stale = report.stale,
            orphans = report.orphans,
            failed = report.failed,
            "bulk lock release finished"
        );
        report
    }

    /// Non-blocking look at a lock. `Ok(None)` means free.
    ///
    /// Unlike acquire/release this surfaces store errors, so callers can
    /// distinguish "locked" from "lock store down".
    pub fn check_availability(
        &self,
        kind: AssetKind,
        name: &str,
    ) -> LockResult<Option<ReservationSnapshot>> {
        let key = lock_key(kind, name);
        let Some(reservation_id) = self.store.get(&key)? else {
            return Ok(None);
        };

        match self.store.get(&reservation_key(&reservation_id))? {
            None => Ok(Some(ReservationSnapshot::HeldNoMetadata { reservation_id })),
            Some(payload) => match serde_json::from_str::<ReservationMeta>(&payload) {
                Ok(meta) => Ok(Some(ReservationSnapshot::Held(meta))),
                Err(e) => {
                    warn!(%key, error = %e, "reservation metadata does not parse");
                    Ok(Some(ReservationSnapshot::HeldCorruptMetadata {
                        reservation_id,
                    }))
                }
            },
        }
    }

    /// Maintenance pass over all lock keys.
    ///
    /// The store's own expiry is the primary mechanism; this is a safety
    /// net against clock skew and partial writes. Removes locks whose
    /// recorded expiry passed, locks with no TTL at all, and locks whose
    /// metadata does not parse.
    pub fn sweep_expired(&self) -> LockResult<SweepReport> {
        let keys = self.store.scan_prefix(LOCK_PREFIX)?;
        let now = epoch_millis();
        let mut report = SweepReport::default();

        for key in keys {
            match self.sweep_one(&key, now) {
                Ok(outcome) => match outcome {
                    SweepOutcome::Expired => report.expired += 1,
                    SweepOutcome::Orphaned => report.orphaned += 1,
                    SweepOutcome::Corrupt => report.corrupt += 1,
                    SweepOutcome::Live => report.live += 1,
                    SweepOutcome::Gone => {}
                },
                Err(e) => {
                    warn!(%key, error = %e, "sweep skipped key");
                    report.failed += 1;
                }
            }
        }

        if report.removed() > 0 {
            info!(
                expired = report.expired,
                orphaned = report.orphaned,
                corrupt = report.corrupt,
                "sweep removed stale locks"
            );
        }
        Ok(report)
    }

    fn sweep_one(&self, key: &str, now_ms: u64) -> LockResult<SweepOutcome> {
        let Some(reservation_id) = self.store.get(key)? else {
            return Ok(SweepOutcome::Gone);
        };

        // A lock the store will never expire on its own is an orphan,
        // whatever its metadata says.
        if self.store.time_to_live(key)? == KeyTtl::NoExpiry {
            self.store.delete(key)?;
            let _ = self.store.delete(&reservation_key(&reservation_id));
            return Ok(SweepOutcome::Orphaned);
        }

        match self.store.get(&reservation_key(&reservation_id))? {
            None => Ok(SweepOutcome::Live),
            Some(payload) => match serde_json::from_str::<ReservationMeta>(&payload) {
                Err(_) => {
                    self.store.delete(key)?;
                    let _ = self.store.delete(&reservation_key(&reservation_id));
                    Ok(SweepOutcome::Corrupt)
                }
                Ok(meta) if meta.expires_at_ms <= now_ms => {
                    self.store.delete(key)?;
                    let _ = self.store.delete(&reservation_key(&reservation_id));
                    Ok(SweepOutcome::Expired)
                }
                Ok(_) => Ok(SweepOutcome::Live),
            },
        }
    }
}

enum SweepOutcome {
    Expired,
    Orphaned,
    Corrupt,
    Live,
    Gone,
}

/// Build the lock key for `(kind, name)`.
pub fn lock_key(kind: AssetKind, name: &str) -> String {
    format!("{LOCK_PREFIX}{}:{name}", kind.as_str())
}

fn reservation_key(reservation_id: &str) -> String {
    format!("{RESERVATION_PREFIX}{reservation_id}")
}

fn owned_key(owner: &RunId) -> String {
    format!("{OWNED_PREFIX}{owner}")
}

/// Whether a stored lock value looks like a reservation id.
fn is_reservation_id(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= 128
        && value.chars().all(|c| !c.is_whitespace() && !c.is_control())
}

fn epoch_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
