//! labcell-sync — background state synchronization.
//!
//! Checkpoints the registry's live aggregate to the asset store on a
//! short interval and to a bounded ring of disk files on a longer one,
//! loads the prior snapshot at process start, and guarantees a final
//! disk write on every exit path.

pub mod error;
pub mod snapshot;
pub mod syncer;

pub use error::{SyncError, SyncResult};
pub use snapshot::SnapshotWriter;
pub use syncer::{StateSyncer, SyncConfig, SyncHandle};
