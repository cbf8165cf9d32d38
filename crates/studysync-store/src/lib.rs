#![warn(missing_docs)]
//! # studysync-store
//!
//! ## Purpose
//! Keeps the pending-event queue in a single durable slot so a reload or crash
//! can resume delivery.
//!
//! ## Responsibilities
//! - Define a small byte-oriented [`KeyValueStore`] seam.
//! - Provide in-memory (optionally quota-bounded) and file-backed stores.
//! - Serialize the queue into one namespaced key with a byte budget, evicting
//!   the oldest events when the budget is exceeded.
//!
//! ## Data flow
//! Event buffer mutation -> [`PersistenceStore::save`] -> JSON blob ->
//! [`KeyValueStore::set`]. On construction the buffer calls
//! [`PersistenceStore::load`] to recover the queue.
//!
//! ## Ownership and lifetimes
//! Backends are shared as `Arc<dyn KeyValueStore>` and synchronize internally,
//! so a host can keep a handle for inspection while the buffer owns its store.
//!
//! ## Error model
//! Backends return [`StoreError`]. [`PersistenceStore`] never propagates them:
//! failures are logged and reported as "nothing persisted".
//!
//! ## Security and privacy notes
//! Event payloads are written verbatim to the slot and are never logged.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use studysync_core::CaptureEvent;
use thiserror::Error;
use tracing::{debug, warn};

/// Default namespaced key of the pending-event slot.
pub const DEFAULT_PENDING_KEY: &str = "studysync:pending-events";

/// Share of the queue (oldest first) dropped when the slot is over budget.
pub const EVICTION_PERCENT: usize = 30;

/// Byte-oriented durable key-value seam.
pub trait KeyValueStore: Send + Sync {
    /// Reads the blob stored under `key`.
    ///
    /// # Errors
    /// Returns [`StoreError`] when the backend cannot be read.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Replaces the blob stored under `key`.
    ///
    /// # Errors
    /// Returns [`StoreError::QuotaExceeded`] when the backend is full and
    /// other [`StoreError`] variants for backend failures.
    fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError>;

    /// Deletes `key`. Removing a missing key is not an error.
    ///
    /// # Errors
    /// Returns [`StoreError`] when the backend cannot be written.
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

/// In-memory store with an optional hard capacity, mirroring browser quotas.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
    capacity_bytes: Option<usize>,
}

impl MemoryStore {
    /// Creates an unbounded store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store whose total value size may not exceed `capacity_bytes`.
    pub fn with_capacity(capacity_bytes: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            capacity_bytes: Some(capacity_bytes),
        }
    }

    /// Overwrites `key` bypassing the capacity check.
    ///
    /// Used to seed fixtures such as corrupted slots.
    pub fn insert_raw(&self, key: &str, value: impl Into<Vec<u8>>) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(key.to_string(), value.into());
        }
    }

    /// Returns `true` when `key` holds a value.
    pub fn contains(&self, key: &str) -> bool {
        self.entries
            .lock()
            .map(|entries| entries.contains_key(key))
            .unwrap_or(false)
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let entries = self.entries.lock().map_err(|_| poisoned())?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().map_err(|_| poisoned())?;
        if let Some(capacity) = self.capacity_bytes {
            let others: usize = entries
                .iter()
                .filter(|(existing, _)| existing.as_str() != key)
                .map(|(_, stored)| stored.len())
                .sum();
            let needed = others + value.len();
            if needed > capacity {
                return Err(StoreError::QuotaExceeded { needed, capacity });
            }
        }
        entries.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().map_err(|_| poisoned())?;
        entries.remove(key);
        Ok(())
    }
}

fn poisoned() -> StoreError {
    StoreError::Backend("memory store lock poisoned".to_string())
}

/// File-backed store keeping one file per key inside a directory.
///
/// Writes go to a temporary sibling first and are renamed into place, so a
/// crash mid-write leaves either the old or the new blob.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Opens (and creates when missing) the store directory.
    ///
    /// # Errors
    /// Returns [`StoreError::Io`] when the directory cannot be created.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Directory holding the slot files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let file_name: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{file_name}.json"))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        match fs::read(self.path_for(key)) {
            Ok(raw) => Ok(Some(raw)),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(None),
            Err(error) => Err(StoreError::Io(error)),
        }
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let path = self.path_for(key);
        let staging = path.with_extension("json.tmp");
        fs::write(&staging, value)?;
        fs::rename(&staging, &path)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(()),
            Err(error) => Err(StoreError::Io(error)),
        }
    }
}

/// Outcome of one durable write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SaveReport {
    /// The slot now holds the written blob.
    pub persisted: bool,
    /// Oldest events dropped to fit the byte budget.
    pub evicted: usize,
    /// Size of the written blob.
    pub bytes: usize,
}

/// Durable pending-event slot with a byte budget.
#[derive(Clone)]
pub struct PersistenceStore {
    backend: Arc<dyn KeyValueStore>,
    key: String,
}

impl PersistenceStore {
    /// Creates a slot under [`DEFAULT_PENDING_KEY`].
    pub fn new(backend: Arc<dyn KeyValueStore>) -> Self {
        Self::with_key(backend, DEFAULT_PENDING_KEY)
    }

    /// Creates a slot under a caller-chosen key.
    pub fn with_key(backend: Arc<dyn KeyValueStore>, key: impl Into<String>) -> Self {
        Self {
            backend,
            key: key.into(),
        }
    }

    /// Slot key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Reads the persisted queue.
    ///
    /// Missing data yields an empty queue. Corrupted data is discarded, the
    /// slot is cleared and an empty queue is returned.
    pub fn load(&self) -> Vec<CaptureEvent> {
        let raw = match self.backend.get(&self.key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Vec::new(),
            Err(error) => {
                warn!(key = %self.key, %error, "failed to read pending-event slot");
                return Vec::new();
            }
        };

        match serde_json::from_slice::<Vec<CaptureEvent>>(&raw) {
            Ok(events) => {
                debug!(key = %self.key, events = events.len(), "loaded pending events");
                events
            }
            Err(error) => {
                warn!(
                    key = %self.key,
                    bytes = raw.len(),
                    %error,
                    "discarding corrupted pending-event slot"
                );
                self.clear();
                Vec::new()
            }
        }
    }

    /// Persists `events`, returning `true` when the slot was written.
    pub fn save(&self, events: &[CaptureEvent], max_bytes: usize) -> bool {
        self.save_with_report(events, max_bytes).persisted
    }

    /// Persists `events` and reports what happened.
    ///
    /// When the encoded queue exceeds `max_bytes`, the oldest
    /// [`EVICTION_PERCENT`] of the events are dropped once before writing.
    pub fn save_with_report(&self, events: &[CaptureEvent], max_bytes: usize) -> SaveReport {
        let mut retained = events;
        let mut encoded = match serde_json::to_vec(retained) {
            Ok(encoded) => encoded,
            Err(error) => {
                warn!(key = %self.key, %error, "failed to encode pending events");
                return SaveReport::default();
            }
        };

        let mut evicted = 0;
        if encoded.len() > max_bytes && !retained.is_empty() {
            evicted = eviction_count(retained.len());
            retained = &retained[evicted..];
            encoded = match serde_json::to_vec(retained) {
                Ok(encoded) => encoded,
                Err(error) => {
                    warn!(key = %self.key, %error, "failed to encode pending events");
                    return SaveReport::default();
                }
            };
            warn!(
                key = %self.key,
                evicted,
                remaining = retained.len(),
                bytes = encoded.len(),
                max_bytes,
                "pending queue over storage budget, evicted oldest events"
            );
        }

        match self.backend.set(&self.key, &encoded) {
            Ok(()) => SaveReport {
                persisted: true,
                evicted,
                bytes: encoded.len(),
            },
            Err(error) => {
                warn!(key = %self.key, %error, "failed to persist pending events");
                SaveReport {
                    persisted: false,
                    evicted,
                    bytes: 0,
                }
            }
        }
    }

    /// Removes the slot.
    pub fn clear(&self) {
        if let Err(error) = self.backend.remove(&self.key) {
            warn!(key = %self.key, %error, "failed to clear pending-event slot");
        }
    }
}

/// Number of oldest events dropped from a queue of `len` over budget.
pub fn eviction_count(len: usize) -> usize {
    if len == 0 {
        return 0;
    }
    (len * EVICTION_PERCENT).div_ceil(100).clamp(1, len)
}

/// Storage backend errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Backend capacity would be exceeded.
    #[error("storage quota exceeded: need {needed} bytes, capacity {capacity}")]
    QuotaExceeded {
        /// Bytes the write would occupy.
        needed: usize,
        /// Backend capacity.
        capacity: usize,
    },
    /// File system failure.
    #[error("storage io failure: {0}")]
    Io(#[from] std::io::Error),
    /// Any other backend failure.
    #[error("storage backend failure: {0}")]
    Backend(String),
}
