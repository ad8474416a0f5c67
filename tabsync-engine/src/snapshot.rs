//! Snapshot service boundary.
//!
//! The engine never interprets application data. It exports one JSON
//! snapshot, seals it, and applies decrypted remote snapshots back through
//! this trait. The host application implements it over its real data layer.

use crate::error::SyncResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Options for applying a remote snapshot.
#[derive(Debug, Clone, Copy)]
pub struct ImportOptions {
    /// Replace local state wholesale instead of merging.
    pub overwrite: bool,
    /// Keep local secret-bearing fields instead of taking remote values.
    pub preserve_secret_fields: bool,
}

/// Outcome of a snapshot import.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportReport {
    pub imported_keys: Vec<String>,
    pub skipped_keys: Vec<String>,
    pub errors: Vec<String>,
}

/// The application's data layer as the engine sees it.
#[async_trait]
pub trait SnapshotService: Send + Sync {
    /// Exports all local state as one JSON snapshot.
    async fn export_snapshot(&self) -> SyncResult<serde_json::Value>;

    /// Applies a decrypted remote snapshot.
    async fn import_snapshot(
        &self,
        snapshot: serde_json::Value,
        options: ImportOptions,
    ) -> SyncResult<ImportReport>;
}

pub mod mock {
    //! In-memory snapshot service for engine tests.

    use super::*;
    use std::time::Duration;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct SnapshotState {
        state: serde_json::Value,
        preserved_fields: Vec<String>,
        applies: u64,
        export_latency: Option<Duration>,
    }

    /// Fake data layer: whole-state JSON object with knobs for secret-field
    /// preservation and apply counting.
    pub struct MemorySnapshots {
        inner: Mutex<SnapshotState>,
    }

    impl MemorySnapshots {
        pub fn new() -> Self {
            Self::with_state(serde_json::json!({}))
        }

        pub fn with_state(state: serde_json::Value) -> Self {
            Self {
                inner: Mutex::new(SnapshotState {
                    state,
                    ..Default::default()
                }),
            }
        }

        /// Replaces local state directly, as a user edit would.
        pub async fn set_state(&self, state: serde_json::Value) {
            self.inner.lock().await.state = state;
        }

        pub async fn state(&self) -> serde_json::Value {
            self.inner.lock().await.state.clone()
        }

        /// How many imports have been applied.
        pub async fn apply_count(&self) -> u64 {
            self.inner.lock().await.applies
        }

        /// Top-level keys treated as secret-bearing during import.
        pub async fn set_preserved_fields(&self, fields: Vec<String>) {
            self.inner.lock().await.preserved_fields = fields;
        }

        /// Holds exports open for the given duration.
        pub async fn set_export_latency(&self, latency: Duration) {
            self.inner.lock().await.export_latency = Some(latency);
        }
    }

    impl Default for MemorySnapshots {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl SnapshotService for MemorySnapshots {
        async fn export_snapshot(&self) -> SyncResult<serde_json::Value> {
            let latency = self.inner.lock().await.export_latency;
            if let Some(latency) = latency {
                tokio::time::sleep(latency).await;
            }
            Ok(self.inner.lock().await.state.clone())
        }

        async fn import_snapshot(
            &self,
            snapshot: serde_json::Value,
            options: ImportOptions,
        ) -> SyncResult<ImportReport> {
            let mut inner = self.inner.lock().await;
            let mut report = ImportReport::default();
            let mut incoming = snapshot;

            if options.preserve_secret_fields {
                for field in inner.preserved_fields.clone() {
                    if let Some(local) = inner.state.get(&field).cloned() {
                        if let Some(map) = incoming.as_object_mut() {
                            map.insert(field.clone(), local);
                            report.skipped_keys.push(field);
                        }
                    }
                }
            }

            if let Some(map) = incoming.as_object() {
                for key in map.keys() {
                    if !report.skipped_keys.contains(key) {
                        report.imported_keys.push(key.clone());
                    }
                }
            }

            if options.overwrite {
                inner.state = incoming;
            } else if let (Some(local), Some(map)) =
                (inner.state.as_object_mut(), incoming.as_object())
            {
                for (key, value) in map {
                    local.insert(key.clone(), value.clone());
                }
            } else {
                inner.state = incoming;
            }

            inner.applies += 1;
            Ok(report)
        }
    }
}
