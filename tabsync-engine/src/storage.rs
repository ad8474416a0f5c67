//! Shared storage substrate.
//!
//! The coordination surface between contexts: a string key/value store with
//! change events delivered to every context *except* the writer. Writes are
//! plain overwrites; there is no compare-and-swap, which is why leadership
//! on top of this is an advisory lease and not a lock.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tracing::warn;

/// Broadcast channel depth per context. Coordination records are tiny and
/// consumers tolerate loss, so lagging receivers just skip ahead.
const EVENT_CAPACITY: usize = 64;

/// A change observed in shared storage. `value` is `None` for removals.
#[derive(Debug, Clone)]
pub struct StorageEvent {
    pub key: String,
    pub value: Option<String>,
}

/// String key/value storage shared between contexts.
pub trait SharedStorage: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;

    fn set(&self, key: &str, value: &str);

    fn remove(&self, key: &str);

    /// Subscribes to changes made by *other* contexts. The writer never
    /// observes its own events.
    fn subscribe(&self) -> broadcast::Receiver<StorageEvent>;
}

struct Hub {
    data: Mutex<HashMap<String, String>>,
    senders: Mutex<Vec<(u64, broadcast::Sender<StorageEvent>)>>,
    next_origin: AtomicU64,
}

impl Hub {
    fn new(data: HashMap<String, String>) -> Self {
        Self {
            data: Mutex::new(data),
            senders: Mutex::new(Vec::new()),
            next_origin: AtomicU64::new(0),
        }
    }

    fn register(&self) -> (u64, broadcast::Sender<StorageEvent>) {
        let origin = self.next_origin.fetch_add(1, Ordering::SeqCst);
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        self.senders.lock().unwrap().push((origin, tx.clone()));
        (origin, tx)
    }

    fn emit_from(&self, writer: u64, event: StorageEvent) {
        for (origin, tx) in self.senders.lock().unwrap().iter() {
            if *origin != writer {
                let _ = tx.send(event.clone());
            }
        }
    }
}

/// In-process storage hub. [`fork`](MemoryStorage::fork) creates a handle for
/// another simulated context: same data, distinct event origin.
#[derive(Clone)]
pub struct MemoryStorage {
    hub: Arc<Hub>,
    origin: u64,
    tx: broadcast::Sender<StorageEvent>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        let hub = Arc::new(Hub::new(HashMap::new()));
        let (origin, tx) = hub.register();
        Self { hub, origin, tx }
    }

    /// A handle onto the same data with its own event origin. Clones share
    /// the origin; forks are how tests simulate additional contexts.
    pub fn fork(&self) -> Self {
        let (origin, tx) = self.hub.register();
        Self {
            hub: self.hub.clone(),
            origin,
            tx,
        }
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedStorage for MemoryStorage {
    fn get(&self, key: &str) -> Option<String> {
        self.hub.data.lock().unwrap().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        self.hub
            .data
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        self.hub.emit_from(
            self.origin,
            StorageEvent {
                key: key.to_string(),
                value: Some(value.to_string()),
            },
        );
    }

    fn remove(&self, key: &str) {
        self.hub.data.lock().unwrap().remove(key);
        self.hub.emit_from(
            self.origin,
            StorageEvent {
                key: key.to_string(),
                value: None,
            },
        );
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageEvent> {
        self.tx.subscribe()
    }
}

/// File-backed storage for persistence across restarts. The whole map lives
/// in one JSON file, rewritten on every change; write failures are logged
/// and the in-memory state stays authoritative for the process lifetime.
#[derive(Clone)]
pub struct FileStorage {
    hub: Arc<Hub>,
    path: Arc<PathBuf>,
    origin: u64,
    tx: broadcast::Sender<StorageEvent>,
}

impl FileStorage {
    /// Opens (or initializes) the store at `path`. A missing or unreadable
    /// file starts empty.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let data = match std::fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!(path = %path.display(), "storage file is corrupt, starting empty: {e}");
                HashMap::new()
            }),
            Err(_) => HashMap::new(),
        };

        let hub = Arc::new(Hub::new(data));
        let (origin, tx) = hub.register();
        Self {
            hub,
            path: Arc::new(path),
            origin,
            tx,
        }
    }

    /// A handle onto the same data and file with its own event origin.
    pub fn fork(&self) -> Self {
        let (origin, tx) = self.hub.register();
        Self {
            hub: self.hub.clone(),
            path: self.path.clone(),
            origin,
            tx,
        }
    }

    fn persist(&self) {
        let data = self.hub.data.lock().unwrap();
        let json = match serde_json::to_string_pretty(&*data) {
            Ok(json) => json,
            Err(e) => {
                warn!("failed to serialize storage: {e}");
                return;
            }
        };
        drop(data);

        if let Err(e) = std::fs::write(self.path.as_ref(), json) {
            warn!(path = %self.path.display(), "failed to write storage file: {e}");
        }
    }
}

impl SharedStorage for FileStorage {
    fn get(&self, key: &str) -> Option<String> {
        self.hub.data.lock().unwrap().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        self.hub
            .data
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        self.persist();
        self.hub.emit_from(
            self.origin,
            StorageEvent {
                key: key.to_string(),
                value: Some(value.to_string()),
            },
        );
    }

    fn remove(&self, key: &str) {
        self.hub.data.lock().unwrap().remove(key);
        self.persist();
        self.hub.emit_from(
            self.origin,
            StorageEvent {
                key: key.to_string(),
                value: None,
            },
        );
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageEvent> {
        self.tx.subscribe()
    }
}
