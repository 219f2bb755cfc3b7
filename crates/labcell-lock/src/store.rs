//! The lock store boundary — the operations the lock manager needs from
//! an external atomic key/value store.
//!
//! Backends must make `set_if_absent` and `delete_if_equals` atomic on
//! the server side; everything the manager guarantees rests on those two
//! operations. The in-memory backend holds one mutex across each call;
//! the Redis backend uses `SET NX PX` and a server-side script.

use std::time::Duration;

use crate::error::LockResult;

/// Expiry state of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyTtl {
    /// Key does not exist.
    Missing,
    /// Key exists with no expiry set.
    NoExpiry,
    /// Key exists and expires after this duration.
    Expires(Duration),
}

/// Client interface to the external lock store.
pub trait LockStore: Send + Sync {
    /// Atomically set `key` to `value` with the given TTL, only if the
    /// key is currently absent. Returns `true` if the write happened.
    fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> LockResult<bool>;

    /// Read a string value.
    fn get(&self, key: &str) -> LockResult<Option<String>>;

    /// Atomically delete `key` only if its current value equals
    /// `expected`. Returns `true` if the key was deleted.
    fn delete_if_equals(&self, key: &str, expected: &str) -> LockResult<bool>;

    /// Unconditionally delete a key. Returns `true` if it existed.
    fn delete(&self, key: &str) -> LockResult<bool>;

    /// Add a member to a set and (re)apply the TTL to the whole set.
    fn set_add(&self, key: &str, member: &str, ttl: Duration) -> LockResult<()>;

    /// Remove a member from a set.
    fn set_remove(&self, key: &str, member: &str) -> LockResult<()>;

    /// All members of a set; empty if the set does not exist.
    fn set_members(&self, key: &str) -> LockResult<Vec<String>>;

    /// All keys starting with `prefix`.
    fn scan_prefix(&self, prefix: &str) -> LockResult<Vec<String>>;

    /// Expiry state of a key.
    fn time_to_live(&self, key: &str) -> LockResult<KeyTtl>;
}
