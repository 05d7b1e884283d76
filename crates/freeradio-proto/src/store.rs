//! Durable string-keyed store with typed, JSON-encoded accessors.
//!
//! Values that are absent or fail to decode fall back to the accessor's
//! default; there is no migration or versioning.
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

pub const VOLUME_KEY: &str = "radio-volume";
pub const FAVORITES_KEY: &str = "radio-favorites";
pub const CUSTOM_STATIONS_KEY: &str = "radio-custom-stations";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("store encoding error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Raw durable string store.
pub trait KvBackend: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: String) -> Result<(), StoreError>;
    /// Held by [`Store::update`] for a whole read-modify-write.  Distinct from
    /// any lock taken inside `get`/`set`.
    fn update_lock(&self) -> &Mutex<()>;
}

pub type SharedBackend = Arc<dyn KvBackend>;

// ── File backend ──────────────────────────────────────────────────────────────

/// All keys live in one JSON object on disk.  Every write rewrites the whole
/// file; `lock` serialises file access within the process.
pub struct FileBackend {
    path: PathBuf,
    lock: Mutex<()>,
    update_lock: Mutex<()>,
}

impl FileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
            update_lock: Mutex::new(()),
        }
    }

    fn read_map(&self) -> BTreeMap<String, String> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(_) => return BTreeMap::new(),
        };
        match serde_json::from_str(&content) {
            Ok(map) => map,
            Err(e) => {
                warn!("store: {:?} is not a valid store file, ignoring: {}", self.path, e);
                BTreeMap::new()
            }
        }
    }
}

impl KvBackend for FileBackend {
    fn get(&self, key: &str) -> Option<String> {
        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        self.read_map().remove(key)
    }

    fn set(&self, key: &str, value: String) -> Result<(), StoreError> {
        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        let mut map = self.read_map();
        map.insert(key.to_string(), value);

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&map)?;
        std::fs::write(&self.path, json)?;
        Ok(())
    }

    fn update_lock(&self) -> &Mutex<()> {
        &self.update_lock
    }
}

// ── Memory backend ────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryBackend {
    values: Mutex<BTreeMap<String, String>>,
    update_lock: Mutex<()>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvBackend for MemoryBackend {
    fn get(&self, key: &str) -> Option<String> {
        let values = self.values.lock().unwrap_or_else(|p| p.into_inner());
        values.get(key).cloned()
    }

    fn set(&self, key: &str, value: String) -> Result<(), StoreError> {
        let mut values = self.values.lock().unwrap_or_else(|p| p.into_inner());
        values.insert(key.to_string(), value);
        Ok(())
    }

    fn update_lock(&self) -> &Mutex<()> {
        &self.update_lock
    }
}

// ── Typed accessor ────────────────────────────────────────────────────────────

/// A single key in a [`KvBackend`], decoded as `T` with a fallback default.
pub struct Store<T> {
    backend: SharedBackend,
    key: &'static str,
    default: T,
}

impl<T> Store<T>
where
    T: Serialize + DeserializeOwned + Clone,
{
    pub fn new(backend: SharedBackend, key: &'static str, default: T) -> Self {
        Self {
            backend,
            key,
            default,
        }
    }

    pub fn load(&self) -> T {
        let Some(raw) = self.backend.get(self.key) else {
            return self.default.clone();
        };
        match serde_json::from_str(&raw) {
            Ok(value) => value,
            Err(e) => {
                debug!("store: key {} failed to decode, using default: {}", self.key, e);
                self.default.clone()
            }
        }
    }

    pub fn save(&self, value: &T) -> Result<(), StoreError> {
        let raw = serde_json::to_string(value)?;
        self.backend.set(self.key, raw)
    }

    /// Read the whole value, let `f` change it, write it back.  Concurrent
    /// updates through the same backend are serialised.
    pub fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> Result<R, StoreError> {
        let _guard = self
            .backend
            .update_lock()
            .lock()
            .unwrap_or_else(|p| p.into_inner());
        let mut value = self.load();
        let out = f(&mut value);
        self.save(&value)?;
        Ok(out)
    }
}
