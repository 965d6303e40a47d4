//! In-memory preference store.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::broadcast;

use super::{PreferenceError, PreferenceStore, StoredValue, CHANGE_CHANNEL_CAPACITY};

/// Preference store that lives only as long as the process.
#[derive(Debug)]
pub struct MemoryPreferenceStore {
    entries: Mutex<BTreeMap<String, StoredValue>>,
    changes: broadcast::Sender<String>,
}

impl MemoryPreferenceStore {
    /// Create an empty store.
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            entries: Mutex::new(BTreeMap::new()),
            changes,
        }
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, StoredValue>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self, key: &str) {
        // No receivers is fine
        let _ = self.changes.send(key.to_string());
    }
}

impl Default for MemoryPreferenceStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PreferenceStore for MemoryPreferenceStore {
    fn get(&self, key: &str) -> Option<StoredValue> {
        self.lock().get(key).cloned()
    }

    fn put(&self, key: &str, value: StoredValue) -> Result<(), PreferenceError> {
        let previous = self.lock().insert(key.to_string(), value.clone());
        if previous.as_ref() != Some(&value) {
            self.notify(key);
        }
        Ok(())
    }

    fn put_all(&self, entries: BTreeMap<String, StoredValue>) -> Result<(), PreferenceError> {
        let changed: Vec<String> = {
            let mut stored = self.lock();
            entries
                .into_iter()
                .filter_map(|(key, value)| {
                    let previous = stored.insert(key.clone(), value.clone());
                    (previous.as_ref() != Some(&value)).then_some(key)
                })
                .collect()
        };
        for key in &changed {
            self.notify(key);
        }
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), PreferenceError> {
        if self.lock().remove(key).is_some() {
            self.notify(key);
        }
        Ok(())
    }

    fn clear(&self) -> Result<(), PreferenceError> {
        let removed = std::mem::take(&mut *self.lock());
        for key in removed.keys() {
            self.notify(key);
        }
        Ok(())
    }

    fn entries(&self) -> BTreeMap<String, StoredValue> {
        self.lock().clone()
    }

    fn subscribe(&self) -> broadcast::Receiver<String> {
        self.changes.subscribe()
    }
}
