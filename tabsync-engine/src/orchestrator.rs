//! The sync orchestrator: connect, pull, push, disconnect.
//!
//! One operation runs at a time per context. Pushes requested while another
//! operation holds the lock are collapsed into a single queued follow-up that
//! fires once the lock frees, so a burst of change notifications never piles
//! up concurrent uploads.

use crate::config::{ConfigStore, SyncConfig};
use crate::error::{SyncError, SyncResult};
use crate::scheduler::PushLedger;
use crate::snapshot::{ImportOptions, SnapshotService};
use crate::status::{StatusBroadcaster, SyncState};
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tabsync_crypto::{generate_salt, open, seal, Envelope, KeyCache, SealParams};
use tabsync_remote::DocumentStore;
use tabsync_types::{DocumentId, Revision, SecretString};
use tracing::{debug, info, warn};

/// Version stamped into envelope metadata.
const CLIENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Inputs for connecting this installation to an account.
#[derive(Clone)]
pub struct ConnectRequest {
    /// Remote store credential.
    pub token: SecretString,
    /// Encryption password. Required when no remote document exists yet;
    /// optional otherwise (the first pull will ask for it).
    pub password: Option<SecretString>,
    /// Opt-in to persisting the password alongside the config.
    pub remember_password: bool,
}

/// What connecting found or created.
#[derive(Debug, Clone)]
pub struct ConnectOutcome {
    pub document_id: DocumentId,
    /// True when a fresh document was created from local state.
    pub created: bool,
    /// Account login reported by the store.
    pub login: String,
}

/// Result of a push request.
#[derive(Debug, Clone)]
pub enum PushOutcome {
    /// The snapshot landed remotely at this revision.
    Pushed(Revision),
    /// Another operation was in flight; a follow-up push was queued.
    Queued,
}

/// Executes sync operations against the remote store.
pub struct SyncOrchestrator {
    config: ConfigStore,
    store: Arc<dyn DocumentStore>,
    snapshots: Arc<dyn SnapshotService>,
    status: StatusBroadcaster,
    ledger: Arc<PushLedger>,
    /// Memoized derived keys; cleared on disconnect.
    keys: KeyCache,
    /// Password entered this session, never persisted from here.
    session_password: Mutex<Option<SecretString>>,
    /// Serializes connect/pull/push/disconnect.
    op_lock: tokio::sync::Mutex<()>,
    /// A push arrived while the lock was held; run one when it frees.
    push_queued: AtomicBool,
}

impl SyncOrchestrator {
    pub fn new(
        config: ConfigStore,
        store: Arc<dyn DocumentStore>,
        snapshots: Arc<dyn SnapshotService>,
        status: StatusBroadcaster,
        ledger: Arc<PushLedger>,
    ) -> Self {
        Self {
            config,
            store,
            snapshots,
            status,
            ledger,
            keys: KeyCache::new(),
            session_password: Mutex::new(None),
            op_lock: tokio::sync::Mutex::new(()),
            push_queued: AtomicBool::new(false),
        }
    }

    pub fn status(&self) -> &StatusBroadcaster {
        &self.status
    }

    /// The persisted config as of now.
    pub fn current_config(&self) -> SyncResult<SyncConfig> {
        self.config.load()
    }

    /// Supplies the encryption password for this session only.
    pub fn set_session_password(&self, password: SecretString) {
        *self.session_password.lock().unwrap() = Some(password);
    }

    pub fn clear_session_password(&self) {
        *self.session_password.lock().unwrap() = None;
    }

    // ── Connect ─────────────────────────────────────────────────────────

    /// Validates the credential, then adopts the account's existing sync
    /// document or creates one from current local state.
    ///
    /// On failure nothing is persisted and the store keeps its previous
    /// credential.
    pub async fn connect_or_discover(
        &self,
        request: ConnectRequest,
    ) -> SyncResult<ConnectOutcome> {
        let guard = self.op_lock.lock().await;
        self.status
            .set(SyncState::Syncing, Some("Connecting".to_string()));

        let mut config = self.config.load()?;
        let previous_token = config.token.clone();
        self.store.set_token(Some(request.token.clone())).await;

        let result = self.connect_inner(&mut config, &request).await;
        match &result {
            Ok(outcome) => {
                info!(
                    document_id = %outcome.document_id,
                    created = outcome.created,
                    "sync connected"
                );
                self.status.set(SyncState::Ok, None);
            }
            Err(e) => {
                self.store.set_token(previous_token).await;
                self.status.set(SyncState::Error, Some(e.to_string()));
            }
        }
        drop(guard);
        self.finish_op();
        result
    }

    async fn connect_inner(
        &self,
        config: &mut SyncConfig,
        request: &ConnectRequest,
    ) -> SyncResult<ConnectOutcome> {
        let identity = self.store.validate_credential().await?;
        debug!(login = %identity.login, "credential accepted");

        if let Some(id) = self.store.find_document().await? {
            let doc = self.store.read_document(&id).await?;

            config.enabled = true;
            config.token = Some(request.token.clone());
            config.document_id = Some(id.clone());
            config.last_known_revision = Some(doc.revision);
            config.remember_password = request.remember_password;
            config.remembered_password = request.password.clone();
            self.config.store(config)?;
            *self.session_password.lock().unwrap() = request.password.clone();

            return Ok(ConnectOutcome {
                document_id: id,
                created: false,
                login: identity.login,
            });
        }

        // No document yet: seal current local state into a fresh one. This
        // is the only place a new salt enters a document's lifetime.
        let password = request.password.clone().ok_or(SyncError::NeedPassword)?;

        let cut = self.ledger.begin_push();
        let snapshot = self.snapshots.export_snapshot().await?;
        let plaintext =
            serde_json::to_vec(&snapshot).map_err(|e| SyncError::Snapshot(e.to_string()))?;

        let salt = generate_salt().to_vec();
        let key = self
            .keys
            .derive(password.expose(), &salt, config.iterations)?;
        let params = SealParams {
            salt,
            iterations: config.iterations,
            device_id: config.device_id,
            client_version: CLIENT_VERSION.to_string(),
        };
        let body = seal(&key, &params, &plaintext)?.to_json()?;

        let created = self.store.create_document(&body).await?;

        config.enabled = true;
        config.token = Some(request.token.clone());
        config.document_id = Some(created.id.clone());
        config.last_known_revision = Some(created.revision);
        config.remember_password = request.remember_password;
        config.remembered_password = Some(password.clone());
        self.config.store(config)?;
        *self.session_password.lock().unwrap() = Some(password);
        self.ledger.mark_pushed(cut);

        Ok(ConnectOutcome {
            document_id: created.id,
            created: true,
            login: identity.login,
        })
    }

    // ── Pull ────────────────────────────────────────────────────────────

    /// Reads the remote document, decrypts it and applies the snapshot.
    pub async fn pull_now(&self) -> SyncResult<()> {
        let guard = self.op_lock.lock().await;
        self.status
            .set(SyncState::Syncing, Some("Pulling changes".to_string()));

        let result = self.pull_inner().await;
        match &result {
            Ok(()) => self.status.set(SyncState::Ok, None),
            Err(e) => self.status.set(SyncState::Error, Some(e.to_string())),
        }
        drop(guard);
        self.finish_op();
        result
    }

    async fn pull_inner(&self) -> SyncResult<()> {
        let mut config = self.config.load()?;
        if !config.enabled || config.token.is_none() {
            return Err(SyncError::NotConfigured);
        }
        let document_id = config
            .document_id
            .clone()
            .ok_or(SyncError::NotConfigured)?;

        let doc = self.store.read_document(&document_id).await?;
        let content = doc
            .content
            .ok_or_else(|| SyncError::FileMissing(document_id.to_string()))?;

        // The content for this revision is in hand. Record it before the
        // decrypt attempt so a wrong password does not leave push thinking
        // the remote diverged.
        if config.last_known_revision.as_ref() != Some(&doc.revision) {
            config.last_known_revision = Some(doc.revision.clone());
            self.config.store(&config)?;
        }

        let envelope = Envelope::parse(&content)?;
        let password = self
            .usable_password(&config)
            .ok_or(SyncError::NeedPassword)?;
        let salt = envelope.salt_bytes()?;
        let key = self
            .keys
            .derive(password.expose(), &salt, envelope.encryption.iterations)?;
        let plaintext = open(&envelope, &key)?;

        let snapshot: serde_json::Value = serde_json::from_slice(&plaintext)
            .map_err(|e| SyncError::InvalidEnvelope(format!("payload is not JSON: {e}")))?;

        self.ledger.begin_remote_apply();
        let applied = self
            .snapshots
            .import_snapshot(
                snapshot,
                ImportOptions {
                    overwrite: true,
                    preserve_secret_fields: true,
                },
            )
            .await;
        self.ledger.end_remote_apply();
        let report = applied?;

        info!(
            revision = %doc.revision,
            imported = report.imported_keys.len(),
            skipped = report.skipped_keys.len(),
            "pulled remote snapshot"
        );
        Ok(())
    }

    // ── Push ────────────────────────────────────────────────────────────

    /// Seals current local state and uploads it.
    ///
    /// Returns [`PushOutcome::Queued`] without blocking when another
    /// operation is in flight. With `force` false, a remote revision other
    /// than the last known one parks the snapshot in a conflict side file
    /// and fails with [`SyncError::Conflict`].
    pub async fn push_now(&self, force: bool) -> SyncResult<PushOutcome> {
        let guard = match self.op_lock.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                self.push_queued.store(true, Ordering::SeqCst);
                debug!("push requested while busy, queued follow-up");
                return Ok(PushOutcome::Queued);
            }
        };

        self.status
            .set(SyncState::Syncing, Some("Pushing changes".to_string()));
        let result = self.push_inner(force).await;
        match &result {
            Ok(revision) => {
                info!(%revision, "pushed local snapshot");
                self.status.set(SyncState::Ok, None);
            }
            Err(e) => self.status.set(SyncState::Error, Some(e.to_string())),
        }
        drop(guard);
        self.finish_op();
        result.map(PushOutcome::Pushed)
    }

    async fn push_inner(&self, force: bool) -> SyncResult<Revision> {
        let mut config = self.config.load()?;
        if !config.enabled || config.token.is_none() {
            return Err(SyncError::NotConfigured);
        }
        let document_id = config
            .document_id
            .clone()
            .ok_or(SyncError::NotConfigured)?;
        let password = self
            .usable_password(&config)
            .ok_or(SyncError::NeedPassword)?;

        let doc = self.store.read_document(&document_id).await?;

        // Inherit the document's KDF parameters so every device derives the
        // same key. Only an unreadable remote side gets fresh ones.
        let (salt, iterations) = match doc.content.as_deref().map(Envelope::parse) {
            Some(Ok(envelope)) => (envelope.salt_bytes()?, envelope.encryption.iterations),
            Some(Err(e)) => {
                warn!("remote envelope unreadable, re-keying document: {e}");
                (generate_salt().to_vec(), config.iterations)
            }
            None => {
                warn!("snapshot file missing remotely, re-keying document");
                (generate_salt().to_vec(), config.iterations)
            }
        };

        let cut = self.ledger.begin_push();
        let snapshot = self.snapshots.export_snapshot().await?;
        let plaintext =
            serde_json::to_vec(&snapshot).map_err(|e| SyncError::Snapshot(e.to_string()))?;
        let key = self.keys.derive(password.expose(), &salt, iterations)?;
        let params = SealParams {
            salt,
            iterations,
            device_id: config.device_id,
            client_version: CLIENT_VERSION.to_string(),
        };
        let body = seal(&key, &params, &plaintext)?.to_json()?;

        let diverged = !force
            && config
                .last_known_revision
                .as_ref()
                .is_some_and(|known| *known != doc.revision);
        if diverged {
            let copy = conflict_filename(&config);
            let files = BTreeMap::from([(copy.clone(), body)]);
            self.store.update_document(&document_id, &files).await?;
            warn!(%copy, "remote changed since last sync, local snapshot parked");
            return Err(SyncError::Conflict { copy });
        }

        let files = BTreeMap::from([(config.filename.clone(), body)]);
        let revision = self.store.update_document(&document_id, &files).await?;

        config.last_known_revision = Some(revision.clone());
        self.config.store(&config)?;
        self.ledger.mark_pushed(cut);
        Ok(revision)
    }

    // ── Disconnect ──────────────────────────────────────────────────────

    /// Turns sync off and forgets credential, password and key material.
    /// The device ID and the remote document are left alone.
    pub async fn disconnect(&self) -> SyncResult<()> {
        let guard = self.op_lock.lock().await;

        let mut config = self.config.load()?;
        config.enabled = false;
        config.token = None;
        config.document_id = None;
        config.last_known_revision = None;
        config.remember_password = false;
        config.remembered_password = None;
        self.config.store(&config)?;

        self.store.set_token(None).await;
        *self.session_password.lock().unwrap() = None;
        self.keys.clear();
        self.ledger.clear_dirty();
        self.status.set(SyncState::Ok, None);
        info!("sync disconnected");
        drop(guard);
        self.finish_op();
        Ok(())
    }

    // ── Background wrappers ─────────────────────────────────────────────

    /// Scheduled push: errors are logged and deferred, never propagated.
    pub async fn push_background(&self, force: bool) {
        match self.push_now(force).await {
            Ok(PushOutcome::Pushed(revision)) => {
                debug!(%revision, "scheduled push complete");
            }
            Ok(PushOutcome::Queued) => {
                // The queued follow-up covers these markers once the
                // in-flight operation completes.
                self.ledger.clear_dirty();
            }
            Err(SyncError::NotConfigured) => {
                // Sync got turned off with changes still marked; drop them.
                self.ledger.clear_dirty();
            }
            Err(e) => {
                warn!("scheduled push failed: {e}");
                self.ledger.start_cooldown();
            }
        }
    }

    /// Background pull: errors are logged, never propagated.
    pub async fn pull_background(&self) {
        if let Err(e) = self.pull_now().await {
            warn!("background pull failed: {e}");
        }
    }

    // ── Internals ───────────────────────────────────────────────────────

    /// Session password wins; the remembered one only counts under opt-in.
    fn usable_password(&self, config: &SyncConfig) -> Option<SecretString> {
        if let Some(password) = self.session_password.lock().unwrap().clone() {
            return Some(password);
        }
        if config.remember_password {
            return config.remembered_password.clone();
        }
        None
    }

    /// Runs the queued follow-up push, if one accumulated during the
    /// operation that just released the lock.
    fn finish_op(&self) {
        if self.push_queued.swap(false, Ordering::SeqCst) {
            self.ledger.request_immediate_push();
        }
    }
}

fn conflict_filename(config: &SyncConfig) -> String {
    format!(
        "conflict-{}-{}.json",
        config.device_id,
        Utc::now().format("%Y%m%dT%H%M%SZ")
    )
}
