//! Locally persisted "continue watching" and "watch later" state.
//!
//! The backend is a plain key-value store holding one JSON document per key.
//! Every mutation reads the whole document, changes it in memory and writes
//! the whole document back. Two writers interleaving those steps lose one of
//! the updates; last write wins and nothing here tries to prevent it.

use std::{
    collections::{BTreeMap, HashMap},
    fs,
    io::{self, Write},
    path::PathBuf,
    sync::Arc,
};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::warn;

use crate::media::MediaItem;
use crate::sync::{ChangeOrigin, StateChange, SyncNotifier, WatchKey};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error("failed to encode document: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("invalid storage key: {0}")]
    InvalidKey(String),
}

/// Whole-value storage seam: get, set and delete of complete documents.
/// There is no partial update primitive.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
    fn delete(&self, key: &str) -> Result<(), StoreError>;
}

/// In-memory backend. Clones share the same map, so several
/// `WatchStateStore` handles over clones behave like tabs over one storage.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<RwLock<HashMap<String, String>>>,
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entries
            .write()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.entries.write().remove(key);
        Ok(())
    }
}

/// Stores each key as `<root>/<key>.json`. Writes go through a uniquely named
/// temp file and a rename so readers never observe a half-written document.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_');
        if !valid {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(format!("{key}.json")))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let path = self.path_for(key)?;
        match fs::read_to_string(&path) {
            Ok(raw) => Ok(Some(raw)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        fs::create_dir_all(&self.root)?;
        let mut tmp = NamedTempFile::new_in(&self.root)?;
        tmp.write_all(value.as_bytes())?;
        tmp.persist(&path).map_err(|err| StoreError::Io(err.error))?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

/// One continue-watching entry. The media snapshot is flattened into the
/// record. Records written by the browser UI keep their `image` and
/// `duration` fields, which read back as `imageUrl` and `durationDisplay`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchProgressRecord {
    #[serde(flatten)]
    pub item: MediaItem,
    #[serde(rename = "progress")]
    pub progress_percent: u8,
    #[serde(rename = "lastWatched")]
    pub last_watched_at: DateTime<Utc>,
}

pub type ContinueWatching = BTreeMap<u64, WatchProgressRecord>;

/// Handle over the watch-state backend plus the notifier views subscribe to.
/// Clones share the notifier; build a separate handle per independent view
/// tree (the equivalent of a browser tab).
#[derive(Clone)]
pub struct WatchStateStore {
    backend: Arc<dyn KeyValueStore>,
    notifier: SyncNotifier,
    // Raw document last read or written per key; guards foreign-change
    // detection against echoing our own writes.
    seen: Arc<Mutex<HashMap<WatchKey, Option<String>>>>,
}

impl WatchStateStore {
    pub fn new(backend: Arc<dyn KeyValueStore>) -> Self {
        let seen = WatchKey::ALL
            .iter()
            .map(|key| (*key, read_raw(backend.as_ref(), *key)))
            .collect();
        Self {
            backend,
            notifier: SyncNotifier::new(),
            seen: Arc::new(Mutex::new(seen)),
        }
    }

    pub fn notifier(&self) -> &SyncNotifier {
        &self.notifier
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<StateChange> {
        self.notifier.subscribe()
    }

    /// Current continue-watching map; absent or unreadable data is empty.
    pub fn get_continue_watching(&self) -> ContinueWatching {
        self.read_document(WatchKey::ContinueWatching)
    }

    pub fn continue_watching_entry(&self, id: u64) -> Option<WatchProgressRecord> {
        self.get_continue_watching().remove(&id)
    }

    /// Entries ordered by most recently watched first.
    pub fn continue_watching_recent(&self) -> Vec<WatchProgressRecord> {
        let mut records: Vec<_> = self.get_continue_watching().into_values().collect();
        records.sort_by(|a, b| {
            b.last_watched_at
                .cmp(&a.last_watched_at)
                .then(a.item.id.cmp(&b.item.id))
        });
        records
    }

    pub fn record_progress(
        &self,
        item: &MediaItem,
        progress_percent: u8,
    ) -> Result<WatchProgressRecord, StoreError> {
        self.record_progress_at(item, progress_percent, Utc::now())
    }

    /// Upserts the entry for `item.id`, replacing any previous record whole.
    /// Progress is clamped to 100.
    pub fn record_progress_at(
        &self,
        item: &MediaItem,
        progress_percent: u8,
        at: DateTime<Utc>,
    ) -> Result<WatchProgressRecord, StoreError> {
        let record = WatchProgressRecord {
            item: item.clone(),
            progress_percent: progress_percent.min(100),
            last_watched_at: at,
        };
        let mut entries = self.get_continue_watching();
        entries.insert(item.id, record.clone());
        self.write_document(WatchKey::ContinueWatching, &entries)?;
        Ok(record)
    }

    /// Returns whether an entry was removed. Removing an absent id writes
    /// nothing.
    pub fn remove_from_continue_watching(&self, id: u64) -> Result<bool, StoreError> {
        let mut entries = self.get_continue_watching();
        if entries.remove(&id).is_none() {
            return Ok(false);
        }
        self.write_document(WatchKey::ContinueWatching, &entries)?;
        Ok(true)
    }

    pub fn clear_continue_watching(&self) -> Result<(), StoreError> {
        self.delete_document(WatchKey::ContinueWatching)
    }

    pub fn is_watch_later(&self, id: u64) -> bool {
        self.watch_later_ids().contains(&id)
    }

    /// Ids saved for later, in the order they were added.
    pub fn watch_later_ids(&self) -> Vec<u64> {
        let ids: Vec<u64> = self.read_document(WatchKey::WatchLater);
        let mut unique = Vec::with_capacity(ids.len());
        for id in ids {
            if !unique.contains(&id) {
                unique.push(id);
            }
        }
        unique
    }

    /// Flips membership and returns the new state.
    pub fn toggle_watch_later(&self, id: u64) -> Result<bool, StoreError> {
        let mut ids = self.watch_later_ids();
        let now_saved = if ids.contains(&id) {
            ids.retain(|saved| *saved != id);
            false
        } else {
            ids.push(id);
            true
        };
        self.write_document(WatchKey::WatchLater, &ids)?;
        Ok(now_saved)
    }

    /// Compares every document with the last version this handle saw and
    /// publishes a `Foreign` change for each one another writer replaced.
    pub fn poll_foreign_changes(&self) -> Vec<WatchKey> {
        let mut changed = Vec::new();
        {
            let mut seen = self.seen.lock();
            for key in WatchKey::ALL {
                let current = read_raw(self.backend.as_ref(), key);
                let previous = seen.insert(key, current.clone());
                if previous.flatten() != current {
                    changed.push(key);
                }
            }
        }
        for key in &changed {
            self.notifier.publish(StateChange {
                key: *key,
                origin: ChangeOrigin::Foreign,
            });
        }
        changed
    }

    fn read_document<T>(&self, key: WatchKey) -> T
    where
        T: DeserializeOwned + Default,
    {
        let Some(raw) = read_raw(self.backend.as_ref(), key) else {
            return T::default();
        };
        match serde_json::from_str(&raw) {
            Ok(value) => value,
            Err(err) => {
                warn!(key = key.storage_key(), error = %err, "ignoring malformed watch state");
                T::default()
            }
        }
    }

    fn write_document<T: Serialize>(&self, key: WatchKey, value: &T) -> Result<(), StoreError> {
        let raw = serde_json::to_string(value)?;
        {
            let mut seen = self.seen.lock();
            self.backend.set(key.storage_key(), &raw)?;
            seen.insert(key, Some(raw));
        }
        self.publish_local(key);
        Ok(())
    }

    fn delete_document(&self, key: WatchKey) -> Result<(), StoreError> {
        {
            let mut seen = self.seen.lock();
            self.backend.delete(key.storage_key())?;
            seen.insert(key, None);
        }
        self.publish_local(key);
        Ok(())
    }

    fn publish_local(&self, key: WatchKey) {
        self.notifier.publish(StateChange {
            key,
            origin: ChangeOrigin::Local,
        });
    }
}

fn read_raw(backend: &dyn KeyValueStore, key: WatchKey) -> Option<String> {
    match backend.get(key.storage_key()) {
        Ok(raw) => raw,
        Err(err) => {
            warn!(key = key.storage_key(), error = %err, "reading watch state failed");
            None
        }
    }
}
