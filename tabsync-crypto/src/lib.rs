//! Envelope encryption for TabSync.
//!
//! Everything needed to turn a JSON snapshot into the self-describing
//! ciphertext envelope stored remotely, and back:
//! - PBKDF2-HMAC-SHA256 key derivation with a per-session cache
//! - AES-256-GCM authenticated encryption
//! - Envelope build/parse with structural validation
//!
//! No network and no storage: the sync engine feeds remote file content in
//! and gets plaintext snapshots (or typed errors) out.

mod cipher;
mod envelope;
mod error;
mod key;

pub use cipher::{decrypt, encrypt, EncryptedPayload, IV_SIZE, TAG_SIZE};
pub use envelope::{
    open, seal, Envelope, EnvelopeEncryption, EnvelopeMeta, SealParams, ENVELOPE_ALGO, ENVELOPE_KDF,
};
pub use error::{CryptoError, CryptoResult};
pub use key::{
    derive_key, generate_salt, DerivedKey, KeyCache, DEFAULT_ITERATIONS, KEY_SIZE, SALT_SIZE,
};
