//! The envelope: wire format of one synchronized snapshot.
//!
//! An envelope is a self-describing JSON object carrying the encrypted
//! snapshot plus everything another device needs to decrypt it with nothing
//! but the shared password:
//!
//! ```json
//! {
//!   "meta": { "updatedAt": "...", "clientVersion": "0.4.2", "deviceId": "..." },
//!   "encryption": { "algo": "AES-GCM", "kdf": "PBKDF2",
//!                   "iterations": 600000, "salt": "...", "iv": "..." },
//!   "ciphertext": "..."
//! }
//! ```
//!
//! `salt` and `iterations` are stable for the lifetime of a remote document:
//! every re-encrypt inherits them from the envelope it replaces, so all
//! devices derive the same key. The IV is fresh on every seal.

use crate::cipher::{self, IV_SIZE};
use crate::error::{CryptoError, CryptoResult};
use crate::key::DerivedKey;
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tabsync_types::DeviceId;

/// The only cipher tag this codec accepts.
pub const ENVELOPE_ALGO: &str = "AES-GCM";

/// The only KDF tag this codec accepts.
pub const ENVELOPE_KDF: &str = "PBKDF2";

/// Plaintext-visible metadata about the snapshot inside.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvelopeMeta {
    /// When the sealing device produced this envelope.
    pub updated_at: DateTime<Utc>,
    /// Version of the client that sealed it.
    pub client_version: String,
    /// Which device sealed it.
    pub device_id: DeviceId,
}

/// Everything a peer needs to re-derive the key (except the password).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvelopeEncryption {
    /// Cipher tag; must equal [`ENVELOPE_ALGO`].
    pub algo: String,
    /// KDF tag; must equal [`ENVELOPE_KDF`].
    pub kdf: String,
    /// PBKDF2 iteration count used for this document.
    pub iterations: u32,
    /// Base64 KDF salt, stable per document.
    pub salt: String,
    /// Base64 IV, fresh per seal.
    pub iv: String,
}

/// One sealed snapshot as stored in the remote document.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Envelope {
    pub meta: EnvelopeMeta,
    pub encryption: EnvelopeEncryption,
    /// Base64 ciphertext (auth tag appended).
    pub ciphertext: String,
}

/// Inputs for sealing, apart from the key and the plaintext.
///
/// `salt`/`iterations` must come from the envelope being replaced when one
/// exists; callers only generate fresh values for brand-new documents.
#[derive(Clone, Debug)]
pub struct SealParams {
    pub salt: Vec<u8>,
    pub iterations: u32,
    pub device_id: DeviceId,
    pub client_version: String,
}

impl Envelope {
    /// Parses and structurally validates an envelope from remote file content.
    ///
    /// Fails fast with [`CryptoError::InvalidEnvelope`] on anything malformed;
    /// no key derivation or decryption happens here.
    pub fn parse(content: &str) -> CryptoResult<Self> {
        let envelope: Self = serde_json::from_str(content)
            .map_err(|e| CryptoError::InvalidEnvelope(format!("not an envelope: {e}")))?;
        envelope.validate()?;
        Ok(envelope)
    }

    /// Serializes the envelope to the JSON stored remotely.
    pub fn to_json(&self) -> CryptoResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decoded KDF salt.
    pub fn salt_bytes(&self) -> CryptoResult<Vec<u8>> {
        decode_field(&self.encryption.salt, "salt")
    }

    /// Decoded IV.
    pub fn iv_bytes(&self) -> CryptoResult<Vec<u8>> {
        decode_field(&self.encryption.iv, "iv")
    }

    /// Decoded ciphertext.
    pub fn ciphertext_bytes(&self) -> CryptoResult<Vec<u8>> {
        decode_field(&self.ciphertext, "ciphertext")
    }

    fn validate(&self) -> CryptoResult<()> {
        if self.encryption.algo != ENVELOPE_ALGO {
            return Err(CryptoError::InvalidEnvelope(format!(
                "unsupported algo {:?}",
                self.encryption.algo
            )));
        }
        if self.encryption.kdf != ENVELOPE_KDF {
            return Err(CryptoError::InvalidEnvelope(format!(
                "unsupported kdf {:?}",
                self.encryption.kdf
            )));
        }
        if self.encryption.iterations == 0 {
            return Err(CryptoError::InvalidEnvelope(
                "iteration count must be positive".to_string(),
            ));
        }
        if self.salt_bytes()?.is_empty() {
            return Err(CryptoError::InvalidEnvelope("empty salt".to_string()));
        }
        let iv = self.iv_bytes()?;
        if iv.len() != IV_SIZE {
            return Err(CryptoError::InvalidEnvelope(format!(
                "IV must be {IV_SIZE} bytes, got {}",
                iv.len()
            )));
        }
        if self.ciphertext_bytes()?.is_empty() {
            return Err(CryptoError::InvalidEnvelope("empty ciphertext".to_string()));
        }
        Ok(())
    }
}

/// Seals a snapshot into a fresh envelope.
///
/// The key must have been derived from the same `(password, salt, iterations)`
/// the params carry. A fresh IV is generated on every call.
pub fn seal(key: &DerivedKey, params: &SealParams, plaintext: &[u8]) -> CryptoResult<Envelope> {
    let payload = cipher::encrypt(key, plaintext)?;

    Ok(Envelope {
        meta: EnvelopeMeta {
            updated_at: Utc::now(),
            client_version: params.client_version.clone(),
            device_id: params.device_id,
        },
        encryption: EnvelopeEncryption {
            algo: ENVELOPE_ALGO.to_string(),
            kdf: ENVELOPE_KDF.to_string(),
            iterations: params.iterations,
            salt: STANDARD.encode(&params.salt),
            iv: STANDARD.encode(payload.iv),
        },
        ciphertext: STANDARD.encode(&payload.ciphertext),
    })
}

/// Opens an envelope, returning the snapshot plaintext.
///
/// Validates structure first, then decrypts; a wrong password surfaces as
/// [`CryptoError::DecryptFailed`].
pub fn open(envelope: &Envelope, key: &DerivedKey) -> CryptoResult<Vec<u8>> {
    envelope.validate()?;

    let iv = envelope.iv_bytes()?;
    let ciphertext = envelope.ciphertext_bytes()?;

    cipher::decrypt(key, &iv, &ciphertext)
}

fn decode_field(value: &str, field: &str) -> CryptoResult<Vec<u8>> {
    STANDARD
        .decode(value)
        .map_err(|e| CryptoError::InvalidEnvelope(format!("{field} is not valid base64: {e}")))
}
