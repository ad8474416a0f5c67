//! Cross-context leader election and request messaging.
//!
//! Shared storage has no compare-and-swap, so leadership is an advisory
//! lease: a context is leader iff it last wrote the lease record and the
//! record has not expired. Two contexts racing can briefly both believe they
//! lead; push and pull are safe to double-run, so the window is tolerated.

use crate::storage::SharedStorage;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tabsync_types::InstanceId;
use tracing::{debug, info, warn};

/// Storage key holding the leadership lease.
pub const LEADER_KEY: &str = "tabsync.sync.leader";

/// Storage key carrying action requests from followers to the leader.
pub const REQUEST_KEY: &str = "tabsync.sync.request";

/// Lease timing. Defaults suit production; tests shrink both.
#[derive(Debug, Clone)]
pub struct LeaderConfig {
    /// How long a written lease is honored without renewal.
    pub lease_ttl: Duration,
    /// Renewal cadence; leaders rewrite the lease, followers re-attempt.
    pub renew_interval: Duration,
}

impl Default for LeaderConfig {
    fn default() -> Self {
        Self {
            lease_ttl: Duration::from_secs(6),
            renew_interval: Duration::from_secs(2),
        }
    }
}

/// The leadership lease as stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderRecord {
    pub id: InstanceId,
    /// Unix milliseconds; wall clock so records compare across contexts.
    pub expires_at: u64,
}

/// What a follower is asking the leader to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestKind {
    Pull,
    Push,
}

/// Last-write-wins mailbox message. Duplicates and losses are acceptable;
/// periodic triggers are the backstop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestRecord {
    #[serde(rename = "type")]
    pub kind: RequestKind,
    pub id: u64,
    pub at: u64,
}

/// Per-context election state machine around the lease.
pub struct LeaderElector {
    storage: Arc<dyn SharedStorage>,
    config: LeaderConfig,
    instance_id: InstanceId,
    leader: AtomicBool,
    request_counter: AtomicU64,
}

impl LeaderElector {
    pub fn new(storage: Arc<dyn SharedStorage>, config: LeaderConfig) -> Self {
        Self {
            storage,
            config,
            instance_id: InstanceId::new(),
            leader: AtomicBool::new(false),
            // Seeded with the clock so ids from a restarted context keep
            // growing instead of replaying old values.
            request_counter: AtomicU64::new(now_millis()),
        }
    }

    pub fn instance_id(&self) -> InstanceId {
        self.instance_id
    }

    pub fn config(&self) -> &LeaderConfig {
        &self.config
    }

    pub fn is_leader(&self) -> bool {
        self.leader.load(Ordering::SeqCst)
    }

    /// One election attempt. Claims the lease when it is absent, expired, or
    /// already ours (renewal); otherwise steps down to follower.
    pub fn try_become_leader(&self) -> bool {
        let now = now_millis();
        let current = self.storage.get(LEADER_KEY).and_then(|raw| {
            serde_json::from_str::<LeaderRecord>(&raw)
                .map_err(|e| warn!("leader record is corrupt, reclaiming: {e}"))
                .ok()
        });

        let claimable = match &current {
            None => true,
            Some(record) => record.id == self.instance_id || record.expires_at <= now,
        };

        if !claimable {
            if self.leader.swap(false, Ordering::SeqCst) {
                info!(instance = %self.instance_id, "lost sync leadership");
            }
            return false;
        }

        let record = LeaderRecord {
            id: self.instance_id,
            expires_at: now + self.config.lease_ttl.as_millis() as u64,
        };
        match serde_json::to_string(&record) {
            Ok(json) => self.storage.set(LEADER_KEY, &json),
            Err(e) => warn!("failed to serialize leader record: {e}"),
        }

        if !self.leader.swap(true, Ordering::SeqCst) {
            info!(instance = %self.instance_id, "became sync leader");
        }
        true
    }

    /// Releases an owned lease so another context can take over immediately
    /// instead of waiting out the TTL.
    pub fn release(&self) {
        if !self.leader.swap(false, Ordering::SeqCst) {
            return;
        }
        let owned = self
            .storage
            .get(LEADER_KEY)
            .and_then(|raw| serde_json::from_str::<LeaderRecord>(&raw).ok())
            .is_some_and(|record| record.id == self.instance_id);
        if owned {
            self.storage.remove(LEADER_KEY);
        }
        info!(instance = %self.instance_id, "released sync leadership");
    }

    /// Asks the current leader to act. Followers never talk to the remote
    /// store themselves.
    pub fn request_action(&self, kind: RequestKind) {
        let record = RequestRecord {
            kind,
            id: self.request_counter.fetch_add(1, Ordering::SeqCst) + 1,
            at: now_millis(),
        };
        match serde_json::to_string(&record) {
            Ok(json) => {
                debug!(?kind, id = record.id, "requested action from leader");
                self.storage.set(REQUEST_KEY, &json);
            }
            Err(e) => warn!("failed to serialize request record: {e}"),
        }
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leader_record_wire_shape() {
        let record = LeaderRecord {
            id: InstanceId::new(),
            expires_at: 1_700_000_000_000,
        };
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"expiresAt\":1700000000000"));
    }

    #[test]
    fn request_record_wire_shape() {
        let record = RequestRecord {
            kind: RequestKind::Pull,
            id: 42,
            at: 7,
        };
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"type\":\"pull\""));

        let back: RequestRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.kind, RequestKind::Pull);
        assert_eq!(back.id, 42);
    }
}
