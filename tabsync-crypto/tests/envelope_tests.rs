//! Behavioral tests for the envelope codec: seal/parse/open round trips,
//! wrong-password detection, and structural validation of malformed input.

use tabsync_crypto::{
    derive_key, generate_salt, open, seal, CryptoError, Envelope, KeyCache, SealParams, IV_SIZE,
    SALT_SIZE,
};
use tabsync_types::DeviceId;

const FAST_ITERATIONS: u32 = 32;

fn make_params(salt: Vec<u8>) -> SealParams {
    SealParams {
        salt,
        iterations: FAST_ITERATIONS,
        device_id: DeviceId::new(),
        client_version: "0.0.0-test".to_string(),
    }
}

fn seal_snapshot(password: &str, snapshot: &str) -> Envelope {
    let salt = generate_salt().to_vec();
    let key = derive_key(password, &salt, FAST_ITERATIONS).unwrap();
    seal(&key, &make_params(salt), snapshot.as_bytes()).unwrap()
}

// ── Round trips ──────────────────────────────────────────────────────────

#[test]
fn seal_then_open_returns_snapshot() {
    let snapshot = r#"{"links":["x"],"theme":"dark"}"#;
    let envelope = seal_snapshot("p", snapshot);

    let key = derive_key("p", &envelope.salt_bytes().unwrap(), FAST_ITERATIONS).unwrap();
    let plain = open(&envelope, &key).unwrap();
    assert_eq!(plain, snapshot.as_bytes());
}

#[test]
fn round_trip_through_wire_json() {
    let snapshot = r#"{"links":["x"]}"#;
    let envelope = seal_snapshot("p", snapshot);

    let wire = envelope.to_json().unwrap();
    let parsed = Envelope::parse(&wire).unwrap();

    assert_eq!(parsed.encryption.salt, envelope.encryption.salt);
    assert_eq!(parsed.encryption.iterations, FAST_ITERATIONS);

    let key = derive_key("p", &parsed.salt_bytes().unwrap(), FAST_ITERATIONS).unwrap();
    assert_eq!(open(&parsed, &key).unwrap(), snapshot.as_bytes());
}

#[test]
fn wire_json_uses_camel_case_fields() {
    let envelope = seal_snapshot("p", "{}");
    let wire = envelope.to_json().unwrap();

    assert!(wire.contains("\"updatedAt\""));
    assert!(wire.contains("\"clientVersion\""));
    assert!(wire.contains("\"deviceId\""));
    assert!(wire.contains("\"algo\":\"AES-GCM\""));
    assert!(wire.contains("\"kdf\":\"PBKDF2\""));
}

// ── Wrong password ───────────────────────────────────────────────────────

#[test]
fn wrong_password_is_decrypt_failed() {
    let envelope = seal_snapshot("right", "{}");

    let wrong = derive_key("wrong", &envelope.salt_bytes().unwrap(), FAST_ITERATIONS).unwrap();
    let err = open(&envelope, &wrong).unwrap_err();
    assert!(matches!(err, CryptoError::DecryptFailed));
}

#[test]
fn wrong_iterations_is_decrypt_failed() {
    let envelope = seal_snapshot("p", "{}");

    let key = derive_key("p", &envelope.salt_bytes().unwrap(), FAST_ITERATIONS + 1).unwrap();
    let err = open(&envelope, &key).unwrap_err();
    assert!(matches!(err, CryptoError::DecryptFailed));
}

// ── Structural validation ────────────────────────────────────────────────

#[test]
fn truncated_json_is_invalid_envelope() {
    let wire = seal_snapshot("p", "{}").to_json().unwrap();
    let err = Envelope::parse(&wire[..wire.len() / 2]).unwrap_err();
    assert!(matches!(err, CryptoError::InvalidEnvelope(_)));
}

#[test]
fn missing_encryption_block_is_invalid_envelope() {
    let err = Envelope::parse(r#"{"meta":{},"ciphertext":"aaaa"}"#).unwrap_err();
    assert!(matches!(err, CryptoError::InvalidEnvelope(_)));
}

#[test]
fn wrong_algo_tag_rejected_before_decryption() {
    let mut envelope = seal_snapshot("p", "{}");
    envelope.encryption.algo = "AES-CBC".to_string();

    let err = Envelope::parse(&envelope.to_json().unwrap()).unwrap_err();
    assert!(matches!(err, CryptoError::InvalidEnvelope(_)));
}

#[test]
fn wrong_kdf_tag_rejected() {
    let mut envelope = seal_snapshot("p", "{}");
    envelope.encryption.kdf = "scrypt".to_string();

    let err = Envelope::parse(&envelope.to_json().unwrap()).unwrap_err();
    assert!(matches!(err, CryptoError::InvalidEnvelope(_)));
}

#[test]
fn zero_iterations_rejected() {
    let mut envelope = seal_snapshot("p", "{}");
    envelope.encryption.iterations = 0;

    let err = Envelope::parse(&envelope.to_json().unwrap()).unwrap_err();
    assert!(matches!(err, CryptoError::InvalidEnvelope(_)));
}

#[test]
fn garbage_salt_base64_rejected() {
    let mut envelope = seal_snapshot("p", "{}");
    envelope.encryption.salt = "not base64 !!!".to_string();

    let err = Envelope::parse(&envelope.to_json().unwrap()).unwrap_err();
    assert!(matches!(err, CryptoError::InvalidEnvelope(_)));
}

#[test]
fn short_iv_rejected() {
    let mut envelope = seal_snapshot("p", "{}");
    envelope.encryption.iv = "AAAA".to_string();

    let err = Envelope::parse(&envelope.to_json().unwrap()).unwrap_err();
    assert!(matches!(err, CryptoError::InvalidEnvelope(_)));
}

#[test]
fn validation_errors_are_distinct_from_decrypt_failed() {
    let mut envelope = seal_snapshot("p", "{}");
    envelope.encryption.algo = "none".to_string();

    let key = derive_key("p", &envelope.salt_bytes().unwrap(), FAST_ITERATIONS).unwrap();
    let err = open(&envelope, &key).unwrap_err();
    assert!(matches!(err, CryptoError::InvalidEnvelope(_)));
}

// ── Salt/IV discipline ───────────────────────────────────────────────────

#[test]
fn generated_salts_have_documented_size() {
    assert_eq!(generate_salt().len(), SALT_SIZE);
}

#[test]
fn resealing_with_inherited_params_keeps_salt_but_not_iv() {
    let first = seal_snapshot("p", r#"{"v":1}"#);

    // A later push re-encrypts with the salt/iterations read off the remote
    // envelope, exactly what the orchestrator does.
    let inherited = first.salt_bytes().unwrap();
    let key = derive_key("p", &inherited, first.encryption.iterations).unwrap();
    let second = seal(
        &key,
        &make_params(inherited),
        r#"{"v":2}"#.as_bytes(),
    )
    .unwrap();

    assert_eq!(second.encryption.salt, first.encryption.salt);
    assert_eq!(second.encryption.iterations, first.encryption.iterations);
    assert_ne!(second.encryption.iv, first.encryption.iv);

    // And the same key still opens the new envelope.
    assert_eq!(open(&second, &key).unwrap(), br#"{"v":2}"#);
}

#[test]
fn foreign_salt_length_is_accepted() {
    // Envelopes written by other clients may use salts longer than ours.
    let salt = vec![7u8; 32];
    let key = derive_key("p", &salt, FAST_ITERATIONS).unwrap();
    let envelope = seal(&key, &make_params(salt), b"{}").unwrap();

    let parsed = Envelope::parse(&envelope.to_json().unwrap()).unwrap();
    assert_eq!(parsed.salt_bytes().unwrap().len(), 32);
    assert_eq!(open(&parsed, &key).unwrap(), b"{}");
}

#[test]
fn iv_has_documented_size() {
    let envelope = seal_snapshot("p", "{}");
    assert_eq!(envelope.iv_bytes().unwrap().len(), IV_SIZE);
}

// ── Key cache ────────────────────────────────────────────────────────────

#[test]
fn key_cache_serves_seal_and_open() {
    let cache = KeyCache::new();
    let salt = generate_salt().to_vec();

    let key = cache.derive("p", &salt, FAST_ITERATIONS).unwrap();
    let envelope = seal(&key, &make_params(salt.clone()), b"{}").unwrap();

    // Second derivation of the same tuple must not add a cache entry.
    let again = cache.derive("p", &salt, FAST_ITERATIONS).unwrap();
    assert_eq!(cache.len(), 1);
    assert_eq!(open(&envelope, &again).unwrap(), b"{}");
}
