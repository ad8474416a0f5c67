//! Encrypted personal-data sync engine.
//!
//! Orchestrates end-to-end encrypted snapshot sync against a gist-style
//! document store: several contexts may run over one shared storage, exactly
//! one elected leader talks to the remote side, local changes are debounced
//! into scheduled pushes, and every transition is observable through the
//! status broadcaster.
//!
//! The host supplies three boundaries and [`SyncContext::start`] wires the
//! rest: a [`storage::SharedStorage`] holding config and coordination keys,
//! a [`tabsync_remote::DocumentStore`] for the remote side, and a
//! [`snapshot::SnapshotService`] over the application's data layer.

pub mod snapshot;
pub mod storage;

mod config;
mod context;
mod error;
mod leader;
mod orchestrator;
mod scheduler;
mod status;

pub use config::{ConfigStore, SyncConfig, CONFIG_KEY};
pub use context::{ContextConfig, SyncContext};
pub use error::{SyncError, SyncResult};
pub use leader::{
    LeaderConfig, LeaderElector, LeaderRecord, RequestKind, RequestRecord, LEADER_KEY, REQUEST_KEY,
};
pub use orchestrator::{ConnectOutcome, ConnectRequest, PushOutcome, SyncOrchestrator};
pub use scheduler::{ChangeKind, PushLedger, ScheduleConfig, SyncScheduler};
pub use status::{RuntimeStatus, StatusBroadcaster, SyncState, STATUS_KEY};
