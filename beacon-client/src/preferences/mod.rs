//! Preference storage for beacon.
//!
//! A [`PreferenceStore`] is a flat, typed key-value store with change
//! notification. The typed schema (which keys exist, their types and
//! defaults) lives in `beacon_core::preferences`; stores only keep what was
//! written, including keys the schema does not know.
//!
//! Implementations:
//! - [`MemoryPreferenceStore`] for tests and embedding
//! - [`FilePreferenceStore`] backed by a JSON file, rewritten atomically

mod file;
mod memory;

pub use file::FilePreferenceStore;
pub use memory::MemoryPreferenceStore;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;

/// Capacity of the change notification channel.
pub(crate) const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// A stored value with its storage type.
///
/// Int/Long and Float are kept apart so that values migrated from older
/// stores keep the exact type they were written with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum StoredValue {
    /// Text.
    String(String),
    /// Boolean.
    Bool(bool),
    /// 32-bit integer.
    Int(i32),
    /// 64-bit integer.
    Long(i64),
    /// Floating point.
    Float(f64),
    /// Set of strings.
    StringSet(BTreeSet<String>),
}

/// Preference store errors.
#[derive(Debug, Error)]
pub enum PreferenceError {
    /// Reading or writing the backing file failed.
    #[error("preference file I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The backing file is not a valid preference document.
    #[error("invalid preference file: {0}")]
    Format(#[from] serde_json::Error),
}

/// Flat typed key-value store with change notification.
///
/// Reads never fail: implementations keep their entries in memory. Writes
/// may fail when persisting.
pub trait PreferenceStore: Send + Sync + fmt::Debug {
    /// Value stored under `key`.
    fn get(&self, key: &str) -> Option<StoredValue>;

    /// Store `value` under `key`, notifying subscribers if it changed.
    fn put(&self, key: &str, value: StoredValue) -> Result<(), PreferenceError>;

    /// Store several values with a single persist.
    fn put_all(&self, entries: BTreeMap<String, StoredValue>) -> Result<(), PreferenceError>;

    /// Remove `key`, notifying subscribers if it was present.
    fn remove(&self, key: &str) -> Result<(), PreferenceError>;

    /// Remove every key.
    fn clear(&self) -> Result<(), PreferenceError>;

    /// Every stored entry, by key.
    fn entries(&self) -> BTreeMap<String, StoredValue>;

    /// Subscribe to changes. Each message is the name of a changed key.
    ///
    /// Dropping the receiver unregisters it.
    fn subscribe(&self) -> broadcast::Receiver<String>;

    /// Whether `key` has a stored value.
    fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }
}

/// Fold superseded stores into `target`.
///
/// Every entry of every legacy store is copied with its type preserved
/// (later stores win on conflicts) and persisted in one write. Only when
/// that write succeeds are the legacy stores cleared. Returns the number of
/// entries migrated.
pub fn migrate_legacy(
    target: &dyn PreferenceStore,
    legacy: &[&dyn PreferenceStore],
) -> Result<usize, PreferenceError> {
    let mut migrated = BTreeMap::new();
    for store in legacy {
        for (key, value) in store.entries() {
            tracing::debug!("Migrating legacy preference {}", key);
            migrated.insert(key, value);
        }
    }
    if migrated.is_empty() {
        return Ok(0);
    }

    let count = migrated.len();
    target.put_all(migrated)?;
    for store in legacy {
        store.clear()?;
    }
    tracing::info!("Migrated {} legacy preferences", count);
    Ok(count)
}
