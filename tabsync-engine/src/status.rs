//! Runtime status broadcasting.

use crate::storage::SharedStorage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::warn;

/// Storage key holding the last persisted status.
pub const STATUS_KEY: &str = "tabsync.sync.status";

/// Machine-readable sync state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    Ok,
    Syncing,
    Error,
}

/// Observable sync status. The message is for humans; the state is for code.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeStatus {
    pub state: SyncState,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl RuntimeStatus {
    fn new(state: SyncState, message: Option<String>) -> Self {
        Self {
            state,
            updated_at: Utc::now(),
            message,
        }
    }
}

/// Fans out status transitions to in-process subscribers and persists the
/// latest one so a freshly opened UI can show last-known state.
pub struct StatusBroadcaster {
    tx: watch::Sender<RuntimeStatus>,
    storage: Arc<dyn SharedStorage>,
}

impl StatusBroadcaster {
    /// Starts from the persisted status when one exists, otherwise `Ok`.
    pub fn new(storage: Arc<dyn SharedStorage>) -> Self {
        let initial = storage
            .get(STATUS_KEY)
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_else(|| RuntimeStatus::new(SyncState::Ok, None));
        let (tx, _) = watch::channel(initial);
        Self { tx, storage }
    }

    /// Records a transition: stamps the time, notifies subscribers, persists
    /// best-effort.
    pub fn set(&self, state: SyncState, message: Option<String>) {
        let status = RuntimeStatus::new(state, message);
        match serde_json::to_string(&status) {
            Ok(json) => self.storage.set(STATUS_KEY, &json),
            Err(e) => warn!("failed to serialize sync status: {e}"),
        }
        let _ = self.tx.send(status);
    }

    /// Subscribes to transitions. Dropping the receiver unsubscribes.
    pub fn subscribe(&self) -> watch::Receiver<RuntimeStatus> {
        self.tx.subscribe()
    }

    /// The status as subscribers currently see it.
    pub fn current(&self) -> RuntimeStatus {
        self.tx.borrow().clone()
    }

    /// The persisted copy, written by whichever context last transitioned.
    pub fn last_persisted(&self) -> Option<RuntimeStatus> {
        let raw = self.storage.get(STATUS_KEY)?;
        serde_json::from_str(&raw).ok()
    }
}
