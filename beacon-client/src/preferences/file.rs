//! JSON file preference store.
//!
//! The whole store is one JSON object mapping key -> typed value. Every
//! write rewrites the file through a temporary sibling and a rename, so a
//! crash leaves either the old or the new document on disk.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::broadcast;

use super::{PreferenceError, PreferenceStore, StoredValue, CHANGE_CHANNEL_CAPACITY};

/// Preference store persisted to a JSON file.
#[derive(Debug)]
pub struct FilePreferenceStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, StoredValue>>,
    changes: broadcast::Sender<String>,
}

impl FilePreferenceStore {
    /// Open the store at `path`. A missing file is an empty store; nothing
    /// is written until the first change.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, PreferenceError> {
        let path = path.into();
        let entries = match std::fs::read_to_string(&path) {
            Ok(contents) => serde_json::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        tracing::debug!("Opened preference file {}", path.display());

        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Ok(Self {
            path,
            entries: Mutex::new(entries),
            changes,
        })
    }

    /// Location of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, StoredValue>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply `edit` to a copy of the entries, persist the copy, and only
    /// then make it current. Returns the keys whose value changed.
    fn update<F>(&self, edit: F) -> Result<Vec<String>, PreferenceError>
    where
        F: FnOnce(&mut BTreeMap<String, StoredValue>),
    {
        let changed = {
            let mut current = self.lock();
            let mut next = current.clone();
            edit(&mut next);

            let changed: Vec<String> = current
                .keys()
                .chain(next.keys())
                .filter(|key| current.get(*key) != next.get(*key))
                .cloned()
                .collect::<std::collections::BTreeSet<_>>()
                .into_iter()
                .collect();
            if changed.is_empty() {
                return Ok(changed);
            }

            write_atomically(&self.path, &next)?;
            *current = next;
            changed
        };

        for key in &changed {
            let _ = self.changes.send(key.clone());
        }
        Ok(changed)
    }
}

fn write_atomically(
    path: &Path,
    entries: &BTreeMap<String, StoredValue>,
) -> Result<(), PreferenceError> {
    let contents = serde_json::to_string_pretty(entries)?;
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    // A leftover temp file would keep its old mode
    match std::fs::remove_file(&tmp) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => return Err(e.into()),
        _ => {}
    }

    let mut file = create_owner_only(&tmp)?;
    file.write_all(contents.as_bytes())?;
    file.sync_all()?;
    drop(file);
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Preferences hold broker credentials: created owner-only on Unix.
fn create_owner_only(path: &Path) -> Result<File, PreferenceError> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    Ok(options.open(path)?)
}

impl PreferenceStore for FilePreferenceStore {
    fn get(&self, key: &str) -> Option<StoredValue> {
        self.lock().get(key).cloned()
    }

    fn put(&self, key: &str, value: StoredValue) -> Result<(), PreferenceError> {
        self.update(|entries| {
            entries.insert(key.to_string(), value);
        })
        .map(|_| ())
    }

    fn put_all(&self, new_entries: BTreeMap<String, StoredValue>) -> Result<(), PreferenceError> {
        self.update(|entries| entries.extend(new_entries)).map(|_| ())
    }

    fn remove(&self, key: &str) -> Result<(), PreferenceError> {
        self.update(|entries| {
            entries.remove(key);
        })
        .map(|_| ())
    }

    fn clear(&self) -> Result<(), PreferenceError> {
        self.update(BTreeMap::clear).map(|_| ())
    }

    fn entries(&self) -> BTreeMap<String, StoredValue> {
        self.lock().clone()
    }

    fn subscribe(&self) -> broadcast::Receiver<String> {
        self.changes.subscribe()
    }
}
