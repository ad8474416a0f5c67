//! Error types for the envelope encryption layer.

use thiserror::Error;

/// Result type for crypto operations.
pub type CryptoResult<T> = Result<T, CryptoError>;

/// Errors that can occur in cryptographic operations.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Key derivation failed.
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    /// Encryption failed.
    #[error("encryption failed: {0}")]
    Encryption(String),

    /// Authentication-tag mismatch: wrong password or corrupted data.
    ///
    /// This is the only way a wrong password is detected, so callers must
    /// keep it distinct from structural envelope problems.
    #[error("decryption failed (wrong password or corrupted data)")]
    DecryptFailed,

    /// The envelope is structurally invalid (bad fields, wrong algo/kdf tag,
    /// malformed base64). Raised before any decryption is attempted.
    #[error("invalid envelope: {0}")]
    InvalidEnvelope(String),

    /// Invalid IV length.
    #[error("invalid IV length: expected {expected}, got {actual}")]
    InvalidIvLength { expected: usize, actual: usize },

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
