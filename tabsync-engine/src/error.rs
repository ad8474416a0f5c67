//! Error types for the sync engine.

use tabsync_crypto::CryptoError;
use tabsync_remote::StoreError;
use thiserror::Error;

/// Result type for engine operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors surfaced by sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Sync has not been set up, or was disconnected.
    #[error("sync is not configured")]
    NotConfigured,

    /// The operation needed the encryption password and none was available.
    #[error("encryption password required")]
    NeedPassword,

    /// The remote store rejected the credential.
    #[error("remote store rejected the credential")]
    TokenInvalid,

    /// The sync document disappeared remotely.
    #[error("sync document not found: {0}")]
    DocumentNotFound(String),

    /// The document exists but the snapshot file was removed from it.
    #[error("snapshot file missing from document {0}")]
    FileMissing(String),

    /// Remote content is not a valid envelope.
    #[error("invalid envelope: {0}")]
    InvalidEnvelope(String),

    /// Authentication tag mismatch; wrong password or corrupted data.
    #[error("decryption failed (wrong password or corrupted data)")]
    DecryptFailed,

    /// Remote changed since the last pull; local state went to a side file.
    #[error("remote changed since last sync; local copy saved as {copy}")]
    Conflict { copy: String },

    /// Transport or remote API failure.
    #[error("network error: {0}")]
    Network(String),

    /// Shared storage failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// The snapshot service failed to export or import.
    #[error("snapshot error: {0}")]
    Snapshot(String),

    /// Key derivation or encryption failure.
    #[error("crypto error: {0}")]
    Crypto(String),
}

impl From<StoreError> for SyncError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::TokenInvalid => SyncError::TokenInvalid,
            StoreError::NoToken => SyncError::NotConfigured,
            StoreError::NotFound(what) => SyncError::DocumentNotFound(what),
            e => SyncError::Network(e.to_string()),
        }
    }
}

impl From<CryptoError> for SyncError {
    fn from(e: CryptoError) -> Self {
        match e {
            CryptoError::DecryptFailed => SyncError::DecryptFailed,
            CryptoError::InvalidEnvelope(msg) => SyncError::InvalidEnvelope(msg),
            e @ CryptoError::InvalidIvLength { .. } => SyncError::InvalidEnvelope(e.to_string()),
            e => SyncError::Crypto(e.to_string()),
        }
    }
}
