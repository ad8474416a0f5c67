//! Change detection and push scheduling.
//!
//! Local edits do not push directly. They mark the ledger dirty and a
//! scheduler task owns the timers: general changes ride a sliding debounce,
//! telemetry waits out a long backoff so high-frequency counters do not turn
//! into high-frequency uploads.

use crate::leader::{LeaderElector, RequestKind};
use crate::orchestrator::SyncOrchestrator;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::time::Instant;
use tracing::debug;

/// What kind of local change happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// Settings, links, manual edits. Debounced on a sliding window.
    General,
    /// High-frequency usage aggregation. Batched on a long backoff.
    Telemetry,
}

/// Scheduling intervals. Defaults suit production; tests pause the clock.
#[derive(Debug, Clone)]
pub struct ScheduleConfig {
    /// Sliding debounce for general changes.
    pub debounce: Duration,
    /// Minimum age of the telemetry dirty marker before it may push.
    pub telemetry_min_dirty: Duration,
    /// Minimum gap between a successful push and the next telemetry push.
    pub telemetry_min_interval: Duration,
    /// Deferral after a failed scheduled push.
    pub retry_cooldown: Duration,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_secs(4),
            telemetry_min_dirty: Duration::from_secs(2 * 60),
            telemetry_min_interval: Duration::from_secs(60 * 60),
            retry_cooldown: Duration::from_secs(60),
        }
    }
}

#[derive(Default)]
struct DirtyState {
    /// Deadline of the sliding general debounce.
    general_due: Option<Instant>,
    /// When telemetry first became dirty. Set once, not slid.
    telemetry_dirty_since: Option<Instant>,
    last_push: Option<Instant>,
    cooldown_until: Option<Instant>,
    /// Bumped on every change. A finished push only clears markers if the
    /// generation still matches its cut point, so changes that land while a
    /// snapshot is uploading stay dirty for the next push.
    generation: u64,
}

/// Shared record of dirty state and push history. The orchestrator marks
/// successful pushes; the scheduler reads deadlines; the host notes changes.
pub struct PushLedger {
    config: ScheduleConfig,
    state: Mutex<DirtyState>,
    applying_remote: AtomicBool,
    notify: Notify,
}

impl PushLedger {
    pub fn new(config: ScheduleConfig) -> Self {
        Self {
            config,
            state: Mutex::new(DirtyState::default()),
            applying_remote: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    pub fn config(&self) -> &ScheduleConfig {
        &self.config
    }

    /// Records a local change. Ignored while a remote snapshot is being
    /// applied, so pulls do not schedule an echo push of their own import.
    pub fn note_change(&self, kind: ChangeKind) {
        if self.applying_remote.load(Ordering::SeqCst) {
            return;
        }
        let now = Instant::now();
        let mut state = self.state.lock().unwrap();
        state.generation += 1;
        match kind {
            ChangeKind::General => {
                state.general_due = Some(now + self.config.debounce);
            }
            ChangeKind::Telemetry => {
                state.telemetry_dirty_since.get_or_insert(now);
            }
        }
        drop(state);
        self.notify.notify_one();
    }

    /// The earliest deadline at which a push is due, if anything is dirty.
    pub fn next_due(&self) -> Option<Instant> {
        let state = self.state.lock().unwrap();
        let telemetry_due = state.telemetry_dirty_since.map(|since| {
            let mut due = since + self.config.telemetry_min_dirty;
            if let Some(last) = state.last_push {
                due = due.max(last + self.config.telemetry_min_interval);
            }
            due
        });
        let due = match (state.general_due, telemetry_due) {
            (Some(general), Some(telemetry)) => Some(general.min(telemetry)),
            (general, telemetry) => general.or(telemetry),
        };
        match (due, state.cooldown_until) {
            (Some(due), Some(cooldown)) => Some(due.max(cooldown)),
            (due, _) => due,
        }
    }

    pub fn is_dirty(&self) -> bool {
        let state = self.state.lock().unwrap();
        state.general_due.is_some() || state.telemetry_dirty_since.is_some()
    }

    /// Marks the snapshot cut point of a starting push. Pass the returned
    /// value to [`mark_pushed`](Self::mark_pushed) on success.
    pub(crate) fn begin_push(&self) -> u64 {
        self.state.lock().unwrap().generation
    }

    /// A successful push covers everything dirty at its cut point. Changes
    /// noted since then keep their markers and push again later.
    pub(crate) fn mark_pushed(&self, cut: u64) {
        let mut state = self.state.lock().unwrap();
        if state.generation == cut {
            state.general_due = None;
            state.telemetry_dirty_since = None;
        }
        state.cooldown_until = None;
        state.last_push = Some(Instant::now());
        drop(state);
        self.notify.notify_one();
    }

    /// Clears dirty markers without recording a push: the work was handed to
    /// the leader or to an already-queued follow-up.
    pub(crate) fn clear_dirty(&self) {
        let mut state = self.state.lock().unwrap();
        state.general_due = None;
        state.telemetry_dirty_since = None;
        drop(state);
        self.notify.notify_one();
    }

    /// Defers the next scheduled push after a failure.
    pub(crate) fn start_cooldown(&self) {
        let mut state = self.state.lock().unwrap();
        state.cooldown_until = Some(Instant::now() + self.config.retry_cooldown);
        drop(state);
        self.notify.notify_one();
    }

    /// Makes a push due right away (queued follow-up after an in-flight op).
    pub(crate) fn request_immediate_push(&self) {
        let mut state = self.state.lock().unwrap();
        state.general_due = Some(Instant::now());
        state.cooldown_until = None;
        drop(state);
        self.notify.notify_one();
    }

    pub(crate) fn begin_remote_apply(&self) {
        self.applying_remote.store(true, Ordering::SeqCst);
    }

    pub(crate) fn end_remote_apply(&self) {
        self.applying_remote.store(false, Ordering::SeqCst);
    }

    pub(crate) async fn changed(&self) {
        self.notify.notified().await;
    }
}

/// Owns the push timers for one context.
pub struct SyncScheduler {
    ledger: Arc<PushLedger>,
    orchestrator: Arc<SyncOrchestrator>,
    elector: Arc<LeaderElector>,
}

impl SyncScheduler {
    pub fn new(
        ledger: Arc<PushLedger>,
        orchestrator: Arc<SyncOrchestrator>,
        elector: Arc<LeaderElector>,
    ) -> Self {
        Self {
            ledger,
            orchestrator,
            elector,
        }
    }

    /// Runs until `shutdown` flips to true. Sleeps until the earliest due
    /// deadline, recomputing whenever the ledger changes.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        loop {
            let due = self.ledger.next_due();
            tokio::select! {
                _ = self.ledger.changed() => {}
                _ = sleep_until_due(due), if due.is_some() => {
                    self.fire().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }

    async fn fire(&self) {
        if !self.elector.is_leader() {
            debug!("push due while follower, delegating to leader");
            self.elector.request_action(RequestKind::Push);
            self.ledger.clear_dirty();
            return;
        }
        self.orchestrator.push_background(false).await;
    }
}

async fn sleep_until_due(due: Option<Instant>) {
    match due {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
