//! Snapshot encryption using AES-256-GCM.
//!
//! Provides authenticated encryption; a tag mismatch on decrypt is the only
//! signal that a password was wrong.

use crate::error::{CryptoError, CryptoResult};
use crate::key::DerivedKey;
use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use rand::RngCore;

/// Size of the IV (nonce) in bytes (96 bits for AES-GCM).
pub const IV_SIZE: usize = 12;

/// Size of the authentication tag in bytes.
pub const TAG_SIZE: usize = 16;

/// Output of one encryption operation.
#[derive(Clone, Debug)]
pub struct EncryptedPayload {
    /// The IV used (fresh random value per encryption, never reused).
    pub iv: [u8; IV_SIZE],
    /// The ciphertext, with the auth tag appended.
    pub ciphertext: Vec<u8>,
}

/// Encrypts plaintext under a fresh random IV.
pub fn encrypt(key: &DerivedKey, plaintext: &[u8]) -> CryptoResult<EncryptedPayload> {
    let cipher = Aes256Gcm::new(key.as_bytes().into());

    // Generate random IV
    let mut iv = [0u8; IV_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut iv);
    let nonce = Nonce::from_slice(&iv);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| CryptoError::Encryption(e.to_string()))?;

    Ok(EncryptedPayload { iv, ciphertext })
}

/// Decrypts ciphertext produced by [`encrypt`].
///
/// Fails with [`CryptoError::DecryptFailed`] on a tag mismatch; the error
/// carries no detail because AES-GCM cannot distinguish a wrong key from
/// tampered data.
pub fn decrypt(key: &DerivedKey, iv: &[u8], ciphertext: &[u8]) -> CryptoResult<Vec<u8>> {
    if iv.len() != IV_SIZE {
        return Err(CryptoError::InvalidIvLength {
            expected: IV_SIZE,
            actual: iv.len(),
        });
    }

    let cipher = Aes256Gcm::new(key.as_bytes().into());
    let nonce = Nonce::from_slice(iv);

    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| CryptoError::DecryptFailed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::derive_key;

    fn test_key(password: &str) -> DerivedKey {
        derive_key(password, b"unit-test-salt", 16).unwrap()
    }

    #[test]
    fn round_trip() {
        let key = test_key("pw");
        let payload = encrypt(&key, b"hello").unwrap();
        let plain = decrypt(&key, &payload.iv, &payload.ciphertext).unwrap();
        assert_eq!(plain, b"hello");
    }

    #[test]
    fn wrong_key_fails() {
        let payload = encrypt(&test_key("pw"), b"hello").unwrap();
        let err = decrypt(&test_key("other"), &payload.iv, &payload.ciphertext).unwrap_err();
        assert!(matches!(err, CryptoError::DecryptFailed));
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let key = test_key("pw");
        let mut payload = encrypt(&key, b"hello").unwrap();
        payload.ciphertext[0] ^= 0x01;
        let err = decrypt(&key, &payload.iv, &payload.ciphertext).unwrap_err();
        assert!(matches!(err, CryptoError::DecryptFailed));
    }

    #[test]
    fn iv_is_fresh_per_call() {
        let key = test_key("pw");
        let a = encrypt(&key, b"hello").unwrap();
        let b = encrypt(&key, b"hello").unwrap();
        assert_ne!(a.iv, b.iv);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn bad_iv_length_rejected_before_decrypt() {
        let key = test_key("pw");
        let payload = encrypt(&key, b"hello").unwrap();
        let err = decrypt(&key, &payload.iv[..8], &payload.ciphertext).unwrap_err();
        assert!(matches!(err, CryptoError::InvalidIvLength { .. }));
    }
}
