//! Authenticated encryption for negotiation payloads.
//!
//! ChaCha20-Poly1305 AEAD with a 256-bit key, 96-bit nonce, and 128-bit
//! authentication tag. Encrypted blobs are laid out as:
//!
//! ```text
//! [ nonce (12 bytes) | ciphertext (plaintext length) | tag (16 bytes) ]
//! ```
//!
//! so every blob is exactly `ENVELOPE_OVERHEAD` (28) bytes longer than the
//! plaintext it protects. A fresh random nonce is drawn for every
//! encryption; nonces are never reused under the same key.

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};
use rand::RngCore;
use thiserror::Error;

use super::material::KeyMaterial;
use super::{KEY_SIZE, NONCE_SIZE, TAG_SIZE};

/// Errors from AEAD encryption and decryption.
#[derive(Debug, Error)]
pub enum AeadError {
    /// Key is not exactly 256 bits.
    #[error("Invalid AEAD key: {0}")]
    InvalidKey(String),

    /// Encryption failed.
    #[error("Encryption failed")]
    EncryptionFailed,

    /// Authentication tag mismatch or corrupted data. Wrong-key and
    /// tampered-blob failures are deliberately indistinguishable.
    #[error("Decryption failed: authentication tag mismatch or corrupted data")]
    DecryptionFailed,

    /// Blob is shorter than a nonce plus a tag and cannot contain a
    /// valid envelope.
    #[error("Encrypted data too short: {actual} bytes (minimum {minimum})")]
    DataTooShort {
        /// Length of the rejected blob.
        actual: usize,
        /// Smallest length a valid blob can have.
        minimum: usize,
    },
}

/// ChaCha20-Poly1305 cipher bound to a single 256-bit key.
pub struct AeadCipher {
    cipher: ChaCha20Poly1305,
}

impl AeadCipher {
    /// Create a cipher from key material.
    ///
    /// Fails with [`AeadError::InvalidKey`] unless the key is exactly
    /// [`KEY_SIZE`] bytes.
    pub fn new(key: &KeyMaterial) -> Result<Self, AeadError> {
        key.expect_len(KEY_SIZE)
            .map_err(|e| AeadError::InvalidKey(e.to_string()))?;

        let mut key_bytes = [0u8; KEY_SIZE];
        key_bytes.copy_from_slice(key.as_bytes());
        let cipher = ChaCha20Poly1305::new(&key_bytes.into());

        Ok(Self { cipher })
    }

    /// Encrypt a plaintext with an explicit nonce.
    ///
    /// Returns the full blob `nonce || ciphertext || tag`. Callers that do
    /// not manage nonces themselves should use [`AeadCipher::encrypt`],
    /// which draws a fresh random nonce per call.
    pub fn encrypt_with_nonce(
        &self,
        plaintext: &[u8],
        nonce: &[u8; NONCE_SIZE],
    ) -> Result<Vec<u8>, AeadError> {
        let nonce_obj = Nonce::from_slice(nonce);
        let ciphertext = self
            .cipher
            .encrypt(nonce_obj, plaintext)
            .map_err(|_| AeadError::EncryptionFailed)?;

        let mut blob = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        blob.extend_from_slice(nonce);
        blob.extend_from_slice(&ciphertext);
        Ok(blob)
    }

    /// Encrypt a plaintext with a fresh random nonce.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, AeadError> {
        let mut nonce = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce);
        self.encrypt_with_nonce(plaintext, &nonce)
    }

    /// Decrypt a blob produced by [`AeadCipher::encrypt`].
    ///
    /// Any modification of the blob, or decryption under a different key,
    /// fails with [`AeadError::DecryptionFailed`].
    pub fn decrypt(&self, blob: &[u8]) -> Result<Vec<u8>, AeadError> {
        if blob.len() < NONCE_SIZE + TAG_SIZE {
            return Err(AeadError::DataTooShort {
                actual: blob.len(),
                minimum: NONCE_SIZE + TAG_SIZE,
            });
        }

        let (nonce_bytes, ciphertext) = blob.split_at(NONCE_SIZE);
        let nonce = Nonce::from_slice(nonce_bytes);

        self.cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| AeadError::DecryptionFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::ENVELOPE_OVERHEAD;

    fn test_key() -> KeyMaterial {
        KeyMaterial::new(vec![0x42u8; KEY_SIZE])
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let cipher = AeadCipher::new(&test_key()).unwrap();
        let plaintext = b"let's meet saturday at two";

        let blob = cipher.encrypt(plaintext).unwrap();
        let decrypted = cipher.decrypt(&blob).unwrap();

        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn test_blob_overhead_is_constant() {
        let cipher = AeadCipher::new(&test_key()).unwrap();

        for len in [0usize, 1, 17, 1024] {
            let plaintext = vec![0xabu8; len];
            let blob = cipher.encrypt(&plaintext).unwrap();
            assert_eq!(blob.len(), len + ENVELOPE_OVERHEAD);
        }
    }

    #[test]
    fn test_empty_plaintext() {
        let cipher = AeadCipher::new(&test_key()).unwrap();

        let blob = cipher.encrypt(b"").unwrap();
        assert_eq!(blob.len(), ENVELOPE_OVERHEAD);
        assert_eq!(cipher.decrypt(&blob).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_megabyte_plaintext_roundtrips_exactly() {
        let cipher = AeadCipher::new(&test_key()).unwrap();
        let plaintext: Vec<u8> = (0..1024 * 1024).map(|i| (i % 251) as u8).collect();

        let blob = cipher.encrypt(&plaintext).unwrap();
        assert_eq!(blob.len(), plaintext.len() + ENVELOPE_OVERHEAD);
        assert_ne!(&blob[NONCE_SIZE..NONCE_SIZE + plaintext.len()], &plaintext[..]);
        assert_eq!(cipher.decrypt(&blob).unwrap(), plaintext);
    }

    #[test]
    fn test_nonces_are_unique() {
        let cipher = AeadCipher::new(&test_key()).unwrap();

        let blob1 = cipher.encrypt(b"same message").unwrap();
        let blob2 = cipher.encrypt(b"same message").unwrap();

        // Different nonce, therefore different blob
        assert_ne!(blob1[..NONCE_SIZE], blob2[..NONCE_SIZE]);
        assert_ne!(blob1, blob2);
    }

    #[test]
    fn test_invalid_key_size_rejected() {
        for len in [0usize, 16, 31, 33, 64] {
            let key = KeyMaterial::new(vec![0u8; len]);
            let result = AeadCipher::new(&key);
            assert!(
                matches!(result, Err(AeadError::InvalidKey(_))),
                "key of {len} bytes was not rejected"
            );
        }
    }

    #[test]
    fn test_tampered_ciphertext_rejected() {
        let cipher = AeadCipher::new(&test_key()).unwrap();
        let blob = cipher.encrypt(b"authentic message").unwrap();

        // Flip one bit in the nonce, ciphertext body, and tag regions
        for index in [0, NONCE_SIZE, NONCE_SIZE + 3, blob.len() - 1] {
            let mut tampered = blob.clone();
            tampered[index] ^= 0x01;
            assert!(
                matches!(cipher.decrypt(&tampered), Err(AeadError::DecryptionFailed)),
                "tamper at byte {index} was not detected"
            );
        }
    }

    #[test]
    fn test_wrong_key_rejected() {
        let cipher = AeadCipher::new(&test_key()).unwrap();
        let other = AeadCipher::new(&KeyMaterial::new(vec![0x43u8; KEY_SIZE])).unwrap();

        let blob = cipher.encrypt(b"for the right key only").unwrap();
        assert!(matches!(
            other.decrypt(&blob),
            Err(AeadError::DecryptionFailed)
        ));
    }

    #[test]
    fn test_truncated_blob_rejected() {
        let cipher = AeadCipher::new(&test_key()).unwrap();

        let err = cipher.decrypt(&[0u8; NONCE_SIZE + TAG_SIZE - 1]).unwrap_err();
        assert!(matches!(
            err,
            AeadError::DataTooShort {
                actual: 27,
                minimum: 28
            }
        ));

        assert!(matches!(
            cipher.decrypt(b""),
            Err(AeadError::DataTooShort { .. })
        ));
    }

    #[test]
    fn test_deterministic_with_fixed_nonce() {
        let cipher = AeadCipher::new(&test_key()).unwrap();
        let nonce = [0x07u8; NONCE_SIZE];

        let blob1 = cipher.encrypt_with_nonce(b"fixed", &nonce).unwrap();
        let blob2 = cipher.encrypt_with_nonce(b"fixed", &nonce).unwrap();
        assert_eq!(blob1, blob2);
    }
}
