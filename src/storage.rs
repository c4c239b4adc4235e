//!
//! portal storage module
//! ---------------------
//! Per-origin key/value storage shared by every tab of the same origin, plus the
//! persistence adapter the session store writes through.
//!
//! Layout:
//! - `StorageArea`: the origin-wide map. Either purely in memory or durable, in which
//!   case the whole map is rewritten as one JSON object file after every mutation.
//! - `TabStorage`: a tab's handle onto an area. Mutations made through a handle are
//!   published as `StorageEvent`s; a handle's own subscription never sees the events
//!   it originated, mirroring the browser `storage` event.
//! - `Persistence`: JSON read/write over any `Storage`, where malformed data reads as
//!   absent and write failures are logged instead of raised.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, warn};

const EVENT_CAPACITY: usize = 256;

/// Synchronous string key/value storage.
pub trait Storage: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

/// A mutation observed on a storage area.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageEvent {
    pub key: String,
    pub old_value: Option<String>,
    /// `None` when the key was removed.
    pub new_value: Option<String>,
    pub source_tab: u64,
}

struct AreaInner {
    map: RwLock<BTreeMap<String, String>>,
    path: Option<PathBuf>,
    events: broadcast::Sender<StorageEvent>,
    next_tab: AtomicU64,
}

/// Origin-wide storage area.
#[derive(Clone)]
pub struct StorageArea(Arc<AreaInner>);

impl StorageArea {
    pub fn in_memory() -> Self { Self::with_map(BTreeMap::new(), None) }

    /// Open (or create) a durable area backed by a single JSON file.
    /// A file that does not parse as a string map is treated as empty.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
        }
        let map = match fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice::<BTreeMap<String, String>>(&bytes) {
                Ok(m) => m,
                Err(e) => {
                    warn!(target: "portal::storage", "open: discarding unreadable area file '{}': {}", path.display(), e);
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
        };
        debug!(target: "portal::storage", "open: path='{}' keys={}", path.display(), map.len());
        Ok(Self::with_map(map, Some(path)))
    }

    fn with_map(map: BTreeMap<String, String>, path: Option<PathBuf>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self(Arc::new(AreaInner { map: RwLock::new(map), path, events, next_tab: AtomicU64::new(1) }))
    }

    /// Attach a new tab to this area.
    pub fn tab(&self) -> TabStorage {
        let tab_id = self.0.next_tab.fetch_add(1, Ordering::Relaxed);
        TabStorage { area: self.clone(), tab_id }
    }

    pub fn keys(&self) -> Vec<String> { self.0.map.read().keys().cloned().collect() }

    pub fn path(&self) -> Option<&Path> { self.0.path.as_deref() }

    fn flush(&self, map: &BTreeMap<String, String>) -> Result<()> {
        let Some(path) = self.0.path.as_ref() else { return Ok(()) };
        let bytes = serde_json::to_vec_pretty(map)?;
        fs::write(path, bytes).with_context(|| format!("writing {}", path.display()))
    }

    fn mutate(&self, source_tab: u64, key: &str, new_value: Option<&str>) -> Result<()> {
        let event = {
            let mut map = self.0.map.write();
            let old_value = map.get(key).cloned();
            if old_value.as_deref() == new_value { return Ok(()); }
            match new_value {
                Some(v) => { map.insert(key.to_string(), v.to_string()); }
                None => { map.remove(key); }
            }
            if let Err(e) = self.flush(&map) {
                // file still holds the old value; keep memory in step with it
                match &old_value {
                    Some(v) => { map.insert(key.to_string(), v.clone()); }
                    None => { map.remove(key); }
                }
                debug!(target: "portal::storage", "write of '{}' not persisted, rolled back: {:#}", key, e);
                return Err(e);
            }
            StorageEvent { key: key.to_string(), old_value, new_value: new_value.map(str::to_string), source_tab }
        };
        // No receivers is fine: nobody else is listening.
        let _ = self.0.events.send(event);
        Ok(())
    }
}

/// One tab's view of a `StorageArea`.
#[derive(Clone)]
pub struct TabStorage {
    area: StorageArea,
    tab_id: u64,
}

impl TabStorage {
    pub fn tab_id(&self) -> u64 { self.tab_id }

    pub fn area(&self) -> &StorageArea { &self.area }

    /// Mutations made by other tabs from this point on.
    pub fn subscribe(&self) -> StorageEvents {
        StorageEvents { rx: self.area.0.events.subscribe(), tab_id: self.tab_id }
    }
}

impl Storage for TabStorage {
    fn get(&self, key: &str) -> Option<String> { self.area.0.map.read().get(key).cloned() }
    fn set(&self, key: &str, value: &str) -> Result<()> { self.area.mutate(self.tab_id, key, Some(value)) }
    fn remove(&self, key: &str) -> Result<()> { self.area.mutate(self.tab_id, key, None) }
}

/// Receiver of foreign `StorageEvent`s for a single tab.
pub struct StorageEvents {
    rx: broadcast::Receiver<StorageEvent>,
    tab_id: u64,
}

impl StorageEvents {
    /// Next event originated by another tab; `None` once the area is gone.
    pub async fn recv(&mut self) -> Option<StorageEvent> {
        loop {
            match self.rx.recv().await {
                Ok(ev) if ev.source_tab == self.tab_id => continue,
                Ok(ev) => return Some(ev),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(target: "portal::storage", "tab {} missed {} storage events", self.tab_id, n);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Fault-tolerant JSON persistence over a `Storage`.
#[derive(Clone)]
pub struct Persistence {
    inner: Arc<dyn Storage>,
}

impl Persistence {
    pub fn new(inner: Arc<dyn Storage>) -> Self { Self { inner } }

    pub fn get_raw(&self, key: &str) -> Option<String> { self.inner.get(key) }

    /// Parsed JSON value; malformed text and a literal `null` both read as `None`.
    pub fn get_value(&self, key: &str) -> Option<Value> {
        let text = self.inner.get(key)?;
        match serde_json::from_str::<Value>(&text) {
            Ok(Value::Null) => None,
            Ok(v) => Some(v),
            Err(e) => {
                warn!(target: "portal::storage", "get: treating malformed json under '{}' as absent: {}", key, e);
                None
            }
        }
    }

    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let v = self.get_value(key)?;
        match serde_json::from_value::<T>(v) {
            Ok(t) => Some(t),
            Err(e) => {
                warn!(target: "portal::storage", "get: value under '{}' has unexpected shape: {}", key, e);
                None
            }
        }
    }

    pub fn set_raw(&self, key: &str, value: &str) {
        if let Err(e) = self.inner.set(key, value) {
            warn!(target: "portal::storage", "set: write to '{}' failed: {:#}", key, e);
        }
    }

    pub fn set_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) {
        match serde_json::to_string(value) {
            Ok(text) => self.set_raw(key, &text),
            Err(e) => warn!(target: "portal::storage", "set: could not serialize value for '{}': {}", key, e),
        }
    }

    pub fn remove(&self, key: &str) {
        if let Err(e) = self.inner.remove(key) {
            warn!(target: "portal::storage", "remove: '{}' failed: {:#}", key, e);
        }
    }
}
