//! X25519 key agreement.
//!
//! Each agent holds a long-lived X25519 key pair. Exchanging public keys
//! and running Diffie-Hellman yields the same shared secret on both sides,
//! which is then run through HKDF (see [`super::derive_shared_key`]) to
//! produce the symmetric negotiation key. Raw DH output is never used as
//! an encryption key directly.

use std::fmt;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use rand::rngs::OsRng;
use thiserror::Error;
use x25519_dalek::StaticSecret;

use super::material::KeyMaterial;
use super::KEY_SIZE;

/// Errors from key pair handling and agreement.
#[derive(Debug, Error)]
pub enum KeyExchangeError {
    /// Public key bytes have the wrong length.
    #[error("Invalid public key length: {actual} bytes (expected {expected})")]
    InvalidPublicKey {
        /// Actual length in bytes.
        actual: usize,
        /// Required length in bytes.
        expected: usize,
    },

    /// Public key encoding could not be decoded.
    #[error("Invalid public key encoding: {0}")]
    InvalidEncoding(String),
}

/// An X25519 public key, safe to publish to peers and relays.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PublicKey {
    bytes: [u8; KEY_SIZE],
}

impl PublicKey {
    /// Construct from raw bytes.
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    /// Construct from a byte slice, checking the length.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, KeyExchangeError> {
        let bytes: [u8; KEY_SIZE] =
            bytes
                .try_into()
                .map_err(|_| KeyExchangeError::InvalidPublicKey {
                    actual: bytes.len(),
                    expected: KEY_SIZE,
                })?;
        Ok(Self { bytes })
    }

    /// Decode from the base64 form used when publishing keys.
    pub fn from_base64(encoded: &str) -> Result<Self, KeyExchangeError> {
        let bytes = BASE64
            .decode(encoded.trim())
            .map_err(|e| KeyExchangeError::InvalidEncoding(e.to_string()))?;
        Self::from_slice(&bytes)
    }

    /// Encode into base64 for publication.
    pub fn to_base64(&self) -> String {
        BASE64.encode(self.bytes)
    }

    /// Get the raw key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Public keys are not secret; a short prefix is enough to identify one
        write!(
            f,
            "PublicKey({:02x}{:02x}{:02x}{:02x}..)",
            self.bytes[0], self.bytes[1], self.bytes[2], self.bytes[3]
        )
    }
}

/// An X25519 key pair. The secret half never leaves this struct except
/// through [`KeyPair::secret_bytes`] for vault persistence.
pub struct KeyPair {
    secret: StaticSecret,
    public: PublicKey,
}

impl KeyPair {
    /// Generate a fresh key pair from the OS CSPRNG.
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from_bytes(x25519_dalek::PublicKey::from(&secret).to_bytes());
        Self { secret, public }
    }

    /// Reconstruct a key pair from stored secret bytes.
    pub fn from_secret_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        let secret = StaticSecret::from(bytes);
        let public = PublicKey::from_bytes(x25519_dalek::PublicKey::from(&secret).to_bytes());
        Self { secret, public }
    }

    /// The public half, for publication to peers.
    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    /// The secret half, for vault persistence only.
    pub fn secret_bytes(&self) -> [u8; KEY_SIZE] {
        self.secret.to_bytes()
    }

    /// Run X25519 against a peer's public key.
    ///
    /// Both sides of an exchange compute the same value. The result is raw
    /// DH output and must be passed through HKDF before use as a cipher key.
    pub fn diffie_hellman(&self, their_public: &PublicKey) -> KeyMaterial {
        let peer = x25519_dalek::PublicKey::from(*their_public.as_bytes());
        let shared = self.secret.diffie_hellman(&peer);
        KeyMaterial::new(shared.as_bytes().to_vec())
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("secret", &"[REDACTED]")
            .field("public", &self.public)
            .finish()
    }
}


/// RFC 7748 X25519 test vectors.
///
/// Section 6.1 gives a full Diffie-Hellman exchange with known keys; the
/// tests below check public key derivation and the shared secret on both
/// sides against those values.
#[cfg(test)]
mod rfc7748_tests {
    use super::*;
    use hex_literal::hex;

    const ALICE_SECRET: [u8; 32] =
        hex!("77076d0a7318a57d3c16c17251b26645df4c2f87ebc0992ab177fba51db92c2a");
    const ALICE_PUBLIC: [u8; 32] =
        hex!("8520f0098930a754748b7ddcb43ef75a0dbf3a0d26381af4eba4a98eaa9b4e6a");
    const BOB_SECRET: [u8; 32] =
        hex!("5dab087e624a8a4b79e17f8b83800ee66f3bb1292618b6fd1c2f8b27ff88e0eb");
    const BOB_PUBLIC: [u8; 32] =
        hex!("de9edb7d7b7dc1b4d35b61c2ece435373f8343c85b78674dadfc7e146f882b4f");
    const SHARED: [u8; 32] =
        hex!("4a5d9d5ba4ce2de1728e3bf480350f25e07e21c947d19e3376f09b3c1e161742");

    #[test]
    fn test_rfc7748_public_key_derivation() {
        let alice = KeyPair::from_secret_bytes(ALICE_SECRET);
        assert_eq!(alice.public_key().as_bytes(), &ALICE_PUBLIC);

        let bob = KeyPair::from_secret_bytes(BOB_SECRET);
        assert_eq!(bob.public_key().as_bytes(), &BOB_PUBLIC);
    }

    #[test]
    fn test_rfc7748_shared_secret() {
        let alice = KeyPair::from_secret_bytes(ALICE_SECRET);
        let bob = KeyPair::from_secret_bytes(BOB_SECRET);

        let alice_shared = alice.diffie_hellman(&PublicKey::from_bytes(BOB_PUBLIC));
        let bob_shared = bob.diffie_hellman(&PublicKey::from_bytes(ALICE_PUBLIC));

        assert_eq!(alice_shared.as_bytes(), SHARED);
        assert_eq!(bob_shared.as_bytes(), SHARED);
    }
}
