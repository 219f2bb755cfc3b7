//! In-memory lock store — the test backend and the single-process
//! deployment backend.
//!
//! Expiry is deadline-based and lazy: expired entries are dropped the
//! next time any operation touches the map. Atomicity comes from holding
//! one mutex across each whole operation.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::error::LockResult;
use crate::store::{KeyTtl, LockStore};

enum Value {
    Str(String),
    Set(HashSet<String>),
}

struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| deadline <= now)
    }
}

/// Mutex-guarded map implementing [`LockStore`].
#[derive(Default)]
pub struct MemoryLockStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryLockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop expired entries, then run `f` against the live map.
    fn with_entries<T>(&self, f: impl FnOnce(&mut HashMap<String, Entry>) -> T) -> T {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        entries.retain(|_, entry| !entry.expired(now));
        f(&mut entries)
    }

    /// Insert a string key directly, bypassing the conditional-set path.
    ///
    /// `ttl = None` produces a key with no expiry — the orphan shape the
    /// sweep has to clean up.
    pub fn insert_raw(&self, key: &str, value: &str, ttl: Option<Duration>) {
        self.with_entries(|entries| {
            entries.insert(
                key.to_string(),
                Entry {
                    value: Value::Str(value.to_string()),
                    expires_at: ttl.map(|t| Instant::now() + t),
                },
            );
        });
    }
}

impl LockStore for MemoryLockStore {
    fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> LockResult<bool> {
        Ok(self.with_entries(|entries| {
            if entries.contains_key(key) {
                return false;
            }
            entries.insert(
                key.to_string(),
                Entry {
                    value: Value::Str(value.to_string()),
                    expires_at: Some(Instant::now() + ttl),
                },
            );
            true
        }))
    }

    fn get(&self, key: &str) -> LockResult<Option<String>> {
        Ok(self.with_entries(|entries| match entries.get(key) {
            Some(Entry {
                value: Value::Str(s),
                ..
            }) => Some(s.clone()),
            _ => None,
        }))
    }

    fn delete_if_equals(&self, key: &str, expected: &str) -> LockResult<bool> {
        Ok(self.with_entries(|entries| {
            let matches = matches!(
                entries.get(key),
                Some(Entry { value: Value::Str(s), .. }) if s == expected
            );
            if matches {
                entries.remove(key);
            }
            matches
        }))
    }

    fn delete(&self, key: &str) -> LockResult<bool> {
        Ok(self.with_entries(|entries| entries.remove(key).is_some()))
    }

    fn set_add(&self, key: &str, member: &str, ttl: Duration) -> LockResult<()> {
        self.with_entries(|entries| {
            let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
                value: Value::Set(HashSet::new()),
                expires_at: None,
            });
            if let Value::Set(set) = &mut entry.value {
                set.insert(member.to_string());
            }
            entry.expires_at = Some(Instant::now() + ttl);
        });
        Ok(())
    }

    fn set_remove(&self, key: &str, member: &str) -> LockResult<()> {
        self.with_entries(|entries| {
            if let Some(Entry {
                value: Value::Set(set),
                ..
            }) = entries.get_mut(key)
            {
                set.remove(member);
                if set.is_empty() {
                    entries.remove(key);
                }
            }
        });
        Ok(())
    }

    fn set_members(&self, key: &str) -> LockResult<Vec<String>> {
        Ok(self.with_entries(|entries| match entries.get(key) {
            Some(Entry {
                value: Value::Set(set),
                ..
            }) => {
                let mut members: Vec<String> = set.iter().cloned().collect();
                members.sort();
                members
            }
            _ => Vec::new(),
        }))
    }

    fn scan_prefix(&self, prefix: &str) -> LockResult<Vec<String>> {
        Ok(self.with_entries(|entries| {
            let mut keys: Vec<String> = entries
                .keys()
                .filter(|k| k.starts_with(prefix))
                .cloned()
                .collect();
            keys.sort();
            keys
        }))
    }

    fn time_to_live(&self, key: &str) -> LockResult<KeyTtl> {
        Ok(self.with_entries(|entries| match entries.get(key) {
            None => KeyTtl::Missing,
            Some(Entry {
                expires_at: None, ..
            }) => KeyTtl::NoExpiry,
            Some(Entry {
                expires_at: Some(deadline),
                ..
            }) => KeyTtl::Expires(deadline.saturating_duration_since(Instant::now())),
        }))
    }
}
