//! Secret key material.
//!
//! `KeyMaterial` wraps raw secret bytes with zero-on-drop semantics and a
//! redacted `Debug` impl, and provides HKDF-SHA256 derivation of
//! fixed-length subkeys.

use std::fmt;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha256;
use thiserror::Error;
use zeroize::Zeroize;

/// Errors from key material handling.
#[derive(Debug, Error)]
pub enum KeyError {
    /// Key material is empty.
    #[error("Key material is empty")]
    Empty,

    /// Key material has the wrong length for the requested operation.
    #[error("Invalid key length: {actual} bytes (expected {expected})")]
    InvalidLength {
        /// Actual length in bytes.
        actual: usize,
        /// Required length in bytes.
        expected: usize,
    },

    /// Random generation failed (system CSPRNG unavailable).
    #[error("Key generation failed: {0}")]
    GenerationFailed(String),

    /// HKDF expansion failed.
    #[error("Key derivation failed: {0}")]
    DerivationFailed(String),

    /// Transport encoding could not be decoded back into key bytes.
    #[error("Invalid key encoding: {0}")]
    InvalidEncoding(String),
}

/// Secret key bytes.
///
/// The backing buffer is zeroed when the value is dropped, and `Debug`
/// never prints the bytes.
#[derive(Clone)]
pub struct KeyMaterial {
    bytes: Vec<u8>,
}

impl KeyMaterial {
    /// Wrap raw secret bytes.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Generate `len` random bytes from the OS CSPRNG.
    pub fn random(len: usize) -> Result<Self, KeyError> {
        let mut bytes = vec![0u8; len];
        rand::rngs::OsRng
            .try_fill_bytes(&mut bytes)
            .map_err(|e| KeyError::GenerationFailed(e.to_string()))?;
        Ok(Self::new(bytes))
    }

    /// Decode key material from its base64 transport form.
    pub fn from_base64(encoded: &str) -> Result<Self, KeyError> {
        let bytes = BASE64
            .decode(encoded.trim())
            .map_err(|e| KeyError::InvalidEncoding(e.to_string()))?;
        if bytes.is_empty() {
            return Err(KeyError::Empty);
        }
        Ok(Self::new(bytes))
    }

    /// Encode the key material into a transport-safe base64 string.
    pub fn to_base64(&self) -> String {
        BASE64.encode(&self.bytes)
    }

    /// Get the key bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Get the key length in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Check if the key is empty.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Fail unless the key is exactly `expected` bytes long.
    pub fn expect_len(&self, expected: usize) -> Result<(), KeyError> {
        if self.bytes.len() == expected {
            Ok(())
        } else {
            Err(KeyError::InvalidLength {
                actual: self.bytes.len(),
                expected,
            })
        }
    }

    /// Derive a subkey of `output_len` bytes using HKDF-SHA256.
    ///
    /// Deterministic: the same material and `info` always produce the same
    /// subkey; different `info` strings produce independent subkeys.
    pub fn derive(&self, info: &[u8], output_len: usize) -> Result<KeyMaterial, KeyError> {
        let hk = Hkdf::<Sha256>::new(None, &self.bytes);
        let mut okm = vec![0u8; output_len];

        hk.expand(info, &mut okm)
            .map_err(|e| KeyError::DerivationFailed(format!("HKDF expand failed: {e}")))?;

        Ok(KeyMaterial::new(okm))
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never leak key bytes in debug output
        write!(f, "KeyMaterial([REDACTED, {} bytes])", self.bytes.len())
    }
}

impl Drop for KeyMaterial {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}
