//! redb table definitions for the labcell asset store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain
//! types). Asset records are keyed by their id; workcell documents by the
//! workcell id.

use redb::TableDefinition;

/// Asset records keyed by `{asset_id}`.
pub const ASSETS: TableDefinition<&str, &[u8]> = TableDefinition::new("assets");

/// Workcell snapshot documents keyed by `{workcell_id}`.
pub const WORKCELLS: TableDefinition<&str, &[u8]> = TableDefinition::new("workcells");
