//! One running sync context and its background tasks.
//!
//! Mirrors the extension model this engine grew out of: several contexts may
//! run over the same shared storage at once, exactly one of them (the
//! elected leader) talks to the remote store, and the rest delegate through
//! the request mailbox.

use crate::config::ConfigStore;
use crate::error::SyncResult;
use crate::leader::{LeaderConfig, LeaderElector, RequestKind, RequestRecord, REQUEST_KEY};
use crate::orchestrator::SyncOrchestrator;
use crate::scheduler::{ChangeKind, PushLedger, ScheduleConfig, SyncScheduler};
use crate::snapshot::SnapshotService;
use crate::status::{RuntimeStatus, StatusBroadcaster};
use crate::storage::{SharedStorage, StorageEvent};
use std::sync::Arc;
use tabsync_remote::DocumentStore;
use tabsync_types::InstanceId;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Tunables for one context. Defaults suit production.
#[derive(Debug, Clone, Default)]
pub struct ContextConfig {
    pub leader: LeaderConfig,
    pub schedule: ScheduleConfig,
}

/// A live context: the orchestrator plus election, scheduling and mailbox
/// tasks. Dropping it without [`stop`](SyncContext::stop) leaves the lease
/// to expire on its own.
pub struct SyncContext {
    orchestrator: Arc<SyncOrchestrator>,
    elector: Arc<LeaderElector>,
    ledger: Arc<PushLedger>,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl SyncContext {
    /// Brings up a context over the given storage, remote store and data
    /// layer. Joins the election immediately; when sync is enabled, the
    /// winner pulls right away and followers ask the leader to.
    pub async fn start(
        storage: Arc<dyn SharedStorage>,
        store: Arc<dyn DocumentStore>,
        snapshots: Arc<dyn SnapshotService>,
        config: ContextConfig,
    ) -> SyncResult<Self> {
        let config_store = ConfigStore::new(storage.clone());
        let sync_config = config_store.load()?;
        store.set_token(sync_config.token.clone()).await;

        let status = StatusBroadcaster::new(storage.clone());
        let ledger = Arc::new(PushLedger::new(config.schedule.clone()));
        let orchestrator = Arc::new(SyncOrchestrator::new(
            config_store,
            store,
            snapshots,
            status,
            ledger.clone(),
        ));
        let elector = Arc::new(LeaderElector::new(storage.clone(), config.leader.clone()));

        let (shutdown, shutdown_rx) = watch::channel(false);

        elector.try_become_leader();
        if sync_config.enabled {
            if elector.is_leader() {
                let puller = orchestrator.clone();
                tokio::spawn(async move { puller.pull_background().await });
            } else {
                elector.request_action(RequestKind::Pull);
            }
        }

        let tasks = vec![
            tokio::spawn(renewal_task(elector.clone(), shutdown_rx.clone())),
            tokio::spawn(
                SyncScheduler::new(ledger.clone(), orchestrator.clone(), elector.clone())
                    .run(shutdown_rx.clone()),
            ),
            tokio::spawn(mailbox_task(
                storage.subscribe(),
                orchestrator.clone(),
                elector.clone(),
                shutdown_rx,
            )),
        ];

        info!(instance = %elector.instance_id(), "sync context started");
        Ok(Self {
            orchestrator,
            elector,
            ledger,
            shutdown,
            tasks,
        })
    }

    /// Direct access to connect/pull/push/disconnect.
    pub fn orchestrator(&self) -> &Arc<SyncOrchestrator> {
        &self.orchestrator
    }

    pub fn is_leader(&self) -> bool {
        self.elector.is_leader()
    }

    pub fn instance_id(&self) -> InstanceId {
        self.elector.instance_id()
    }

    /// Subscribes to status transitions.
    pub fn subscribe_status(&self) -> watch::Receiver<RuntimeStatus> {
        self.orchestrator.status().subscribe()
    }

    /// Marks local data dirty. The scheduler decides when to push.
    pub fn note_local_change(&self, kind: ChangeKind) {
        self.ledger.note_change(kind);
    }

    /// Connectivity came back: leaders pull, followers ask the leader to.
    pub fn notify_online(&self) {
        if self.elector.is_leader() {
            let puller = self.orchestrator.clone();
            tokio::spawn(async move { puller.pull_background().await });
        } else {
            self.elector.request_action(RequestKind::Pull);
        }
    }

    /// Stops background tasks and releases the lease so another context can
    /// take over without waiting out the TTL.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            let _ = task.await;
        }
        self.elector.release();
        info!(instance = %self.elector.instance_id(), "sync context stopped");
    }
}

/// Re-runs the election on every tick: leaders renew the lease, followers
/// probe for an expired one.
async fn renewal_task(elector: Arc<LeaderElector>, mut shutdown: watch::Receiver<bool>) {
    let mut ticks = tokio::time::interval(elector.config().renew_interval);
    loop {
        tokio::select! {
            _ = ticks.tick() => {
                elector.try_become_leader();
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

/// Watches the request mailbox and executes requests while leading.
///
/// Storage events exclude the writer, so a follower never consumes its own
/// request. The record id dedupes redelivery of the same write.
async fn mailbox_task(
    mut events: broadcast::Receiver<StorageEvent>,
    orchestrator: Arc<SyncOrchestrator>,
    elector: Arc<LeaderElector>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut last_seen: Option<u64> = None;
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) if event.key == REQUEST_KEY => {
                    let Some(value) = event.value else { continue };
                    let record: RequestRecord = match serde_json::from_str(&value) {
                        Ok(record) => record,
                        Err(e) => {
                            debug!("ignoring malformed request record: {e}");
                            continue;
                        }
                    };
                    if last_seen == Some(record.id) {
                        continue;
                    }
                    last_seen = Some(record.id);
                    if !elector.is_leader() {
                        debug!(id = record.id, "ignoring request while follower");
                        continue;
                    }
                    match record.kind {
                        RequestKind::Push => orchestrator.push_background(false).await,
                        RequestKind::Pull => orchestrator.pull_background().await,
                    }
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "request mailbox lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}
