//! Key derivation and caching.
//!
//! Uses PBKDF2-HMAC-SHA256 to derive AES-256-GCM keys from passwords. The
//! iteration count is intentionally expensive, so derived keys are memoized
//! per `(password, salt, iterations)` tuple for the lifetime of a session.

use crate::error::{CryptoError, CryptoResult};
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Mutex;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of encryption keys in bytes (256 bits for AES-256-GCM).
pub const KEY_SIZE: usize = 32;

/// Size of generated salts in bytes. Foreign envelopes may carry other
/// lengths; derivation accepts any non-empty salt.
pub const SALT_SIZE: usize = 16;

/// Default PBKDF2 iteration count.
///
/// OWASP recommendation for PBKDF2-HMAC-SHA256 (2023). Persisted in the sync
/// config and in every envelope so all devices sharing a document agree.
pub const DEFAULT_ITERATIONS: u32 = 600_000;

/// A derived encryption key with automatic zeroization on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DerivedKey {
    bytes: [u8; KEY_SIZE],
}

impl DerivedKey {
    /// Creates a new derived key from raw bytes.
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    /// Returns the key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl std::fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivedKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Generates a random salt for a fresh document.
pub fn generate_salt() -> [u8; SALT_SIZE] {
    let mut bytes = [0u8; SALT_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    bytes
}

/// Derives an encryption key from a password using PBKDF2-HMAC-SHA256.
///
/// Deliberately slow at production iteration counts; go through [`KeyCache`]
/// in anything that derives more than once per session.
pub fn derive_key(password: &str, salt: &[u8], iterations: u32) -> CryptoResult<DerivedKey> {
    if salt.is_empty() {
        return Err(CryptoError::KeyDerivation("empty salt".to_string()));
    }
    if iterations == 0 {
        return Err(CryptoError::KeyDerivation(
            "iteration count must be positive".to_string(),
        ));
    }

    let mut key_bytes = [0u8; KEY_SIZE];
    pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, iterations, &mut key_bytes);

    Ok(DerivedKey::from_bytes(key_bytes))
}

/// Memoizes derived keys by a fingerprint of `(password, salt, iterations)`.
///
/// The cache keeps derived keys, not passwords: the lookup key is a SHA-256
/// digest over the tuple, so clearing the cache (or dropping it) is enough to
/// forget the key material.
pub struct KeyCache {
    entries: Mutex<HashMap<[u8; 32], DerivedKey>>,
}

impl KeyCache {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the cached key for this tuple, deriving and caching it on miss.
    pub fn derive(&self, password: &str, salt: &[u8], iterations: u32) -> CryptoResult<DerivedKey> {
        let fp = fingerprint(password, salt, iterations);

        if let Some(key) = self.entries.lock().unwrap().get(&fp) {
            return Ok(key.clone());
        }

        let key = derive_key(password, salt, iterations)?;
        self.entries.lock().unwrap().insert(fp, key.clone());
        Ok(key)
    }

    /// Drops all cached keys.
    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }

    /// Number of distinct tuples cached so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for KeyCache {
    fn default() -> Self {
        Self::new()
    }
}

fn fingerprint(password: &str, salt: &[u8], iterations: u32) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    hasher.update([0u8]);
    hasher.update(salt);
    hasher.update(iterations.to_le_bytes());
    hasher.finalize().into()
}
