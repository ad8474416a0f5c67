//! Persisted sync configuration.

use crate::error::{SyncError, SyncResult};
use crate::storage::SharedStorage;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tabsync_crypto::DEFAULT_ITERATIONS;
use tabsync_types::{DeviceId, DocumentId, Revision, SecretString};
use tracing::{debug, warn};

/// Storage key holding the serialized config.
pub const CONFIG_KEY: &str = "tabsync.sync.config";

/// Sync settings, one per installation. Persisted as camelCase JSON so the
/// stored shape matches existing documents from other clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConfig {
    /// Whether sync is active.
    #[serde(default)]
    pub enabled: bool,
    /// Remote store credential.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<SecretString>,
    /// The adopted remote document.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_id: Option<DocumentId>,
    /// Revision of the last remote content this device has seen.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_known_revision: Option<Revision>,
    /// Stable random identity of this installation. Survives disconnect.
    pub device_id: DeviceId,
    /// Opt-in to persisting the password next to the config.
    #[serde(default)]
    pub remember_password: bool,
    /// Present only under the opt-in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remembered_password: Option<SecretString>,
    /// Primary file name inside the remote document.
    pub filename: String,
    /// Description stamped on the remote document.
    pub description: String,
    /// KDF cost for envelopes this device creates.
    pub iterations: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        let store = tabsync_remote::StoreConfig::default();
        Self {
            enabled: false,
            token: None,
            document_id: None,
            last_known_revision: None,
            device_id: DeviceId::new(),
            remember_password: false,
            remembered_password: None,
            filename: store.filename,
            description: store.description,
            iterations: DEFAULT_ITERATIONS,
        }
    }
}

/// Typed load/store of [`SyncConfig`] over shared storage.
pub struct ConfigStore {
    storage: Arc<dyn SharedStorage>,
}

impl ConfigStore {
    pub fn new(storage: Arc<dyn SharedStorage>) -> Self {
        Self { storage }
    }

    /// Loads the config, materializing and persisting a default on first
    /// access so `deviceId` is stable from the start. Corrupt stored JSON is
    /// treated as absent.
    pub fn load(&self) -> SyncResult<SyncConfig> {
        match self.storage.get(CONFIG_KEY) {
            Some(raw) => match serde_json::from_str::<SyncConfig>(&raw) {
                Ok(config) => Ok(config),
                Err(e) => {
                    warn!("stored sync config is corrupt, resetting: {e}");
                    self.materialize_default()
                }
            },
            None => self.materialize_default(),
        }
    }

    /// Persists the config. The remembered password is stripped whenever the
    /// opt-in is off, regardless of what the caller passed.
    pub fn store(&self, config: &SyncConfig) -> SyncResult<()> {
        let mut config = config.clone();
        if !config.remember_password {
            config.remembered_password = None;
        }
        let json =
            serde_json::to_string(&config).map_err(|e| SyncError::Storage(e.to_string()))?;
        self.storage.set(CONFIG_KEY, &json);
        Ok(())
    }

    fn materialize_default(&self) -> SyncResult<SyncConfig> {
        let config = SyncConfig::default();
        self.store(&config)?;
        debug!(device_id = %config.device_id, "initialized sync config");
        Ok(config)
    }
}
