//! labcell-lock — distributed asset locking.
//!
//! Short-term mutual exclusion over named assets, shared by every
//! worker process through one external lock store:
//!
//! ```text
//! AssetLockManager
//!   ├── acquire / release        (atomic conditional set / check-then-delete)
//!   ├── release_all              (run teardown, best effort, counted)
//!   ├── check_availability       (non-blocking, errors distinguishable)
//!   └── sweep_expired            (defense-in-depth against skew/partial writes)
//! LockStore (trait)
//!   ├── MemoryLockStore          (tests, single-process deployments)
//!   └── RedisLockStore           (RESP2 over TCP)
//! ```

pub mod error;
pub mod manager;
pub mod memory;
pub mod redis;
pub mod store;

pub use error::{LockResult, LockStoreError};
pub use manager::{
    AssetLockManager, LockConfig, ReleaseReport, ReservationMeta, ReservationSnapshot,
    SweepReport, lock_key,
};
pub use memory::MemoryLockStore;
pub use redis::RedisLockStore;
pub use store::{KeyTtl, LockStore};
