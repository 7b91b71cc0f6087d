//! End-to-end encryption layer.
//!
//! Everything a negotiation needs to stay unreadable in transit: X25519
//! key agreement, HKDF-SHA256 key derivation, and ChaCha20-Poly1305
//! authenticated encryption.
//!
//! Key flow between two agents:
//!
//! ```text
//!   alice                                bob
//!   KeyPair::generate()                  KeyPair::generate()
//!        |                                   |
//!        |<------ publish public keys ------>|
//!        |                                   |
//!   diffie_hellman(bob_pub)             diffie_hellman(alice_pub)
//!        \                                   /
//!         +--- identical shared secret ----+
//!                        |
//!            HKDF-SHA256 (SHARED_KEY_INFO)
//!                        |
//!            symmetric negotiation key
//!                        |
//!            AeadCipher (ChaCha20-Poly1305)
//! ```
//!
//! The relay between the two agents only ever sees envelope metadata and
//! opaque `nonce || ciphertext || tag` blobs.

pub mod aead;
pub mod error;
pub mod exchange;
pub mod material;

pub use aead::{AeadCipher, AeadError};
pub use error::CryptoError;
pub use exchange::{KeyExchangeError, KeyPair, PublicKey};
pub use material::{KeyError, KeyMaterial};

/// Symmetric key size in bytes (256 bits).
pub const KEY_SIZE: usize = 32;

/// AEAD nonce size in bytes (96 bits).
pub const NONCE_SIZE: usize = 12;

/// Poly1305 authentication tag size in bytes (128 bits).
pub const TAG_SIZE: usize = 16;

/// Fixed size difference between an encrypted blob and its plaintext.
pub const ENVELOPE_OVERHEAD: usize = NONCE_SIZE + TAG_SIZE;

/// HKDF context string for deriving the negotiation key from DH output.
pub const SHARED_KEY_INFO: &[u8] = b"parley/v1/negotiation-key";

/// Cryptographic operations the rest of the crate depends on.
///
/// Production code uses [`DefaultCrypto`]; tests substitute deterministic
/// implementations where key generation needs to be scripted.
pub trait CryptoProvider: Send + Sync {
    /// Generate a fresh 256-bit symmetric key.
    fn generate_symmetric_key(&self) -> Result<KeyMaterial, CryptoError>;

    /// Encrypt a plaintext under `key`, returning `nonce || ciphertext || tag`.
    fn encrypt(&self, plaintext: &[u8], key: &KeyMaterial) -> Result<Vec<u8>, CryptoError>;

    /// Decrypt a blob produced by [`CryptoProvider::encrypt`].
    fn decrypt(&self, blob: &[u8], key: &KeyMaterial) -> Result<Vec<u8>, CryptoError>;

    /// Generate a fresh X25519 key pair.
    fn generate_key_pair(&self) -> Result<KeyPair, CryptoError>;

    /// Derive the symmetric negotiation key shared with a peer.
    fn derive_shared_key(
        &self,
        ours: &KeyPair,
        theirs: &PublicKey,
    ) -> Result<KeyMaterial, CryptoError>;
}

/// The production [`CryptoProvider`].
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultCrypto;

impl CryptoProvider for DefaultCrypto {
    fn generate_symmetric_key(&self) -> Result<KeyMaterial, CryptoError> {
        Ok(KeyMaterial::random(KEY_SIZE)?)
    }

    fn encrypt(&self, plaintext: &[u8], key: &KeyMaterial) -> Result<Vec<u8>, CryptoError> {
        let cipher = AeadCipher::new(key)?;
        Ok(cipher.encrypt(plaintext)?)
    }

    fn decrypt(&self, blob: &[u8], key: &KeyMaterial) -> Result<Vec<u8>, CryptoError> {
        let cipher = AeadCipher::new(key)?;
        Ok(cipher.decrypt(blob)?)
    }

    fn generate_key_pair(&self) -> Result<KeyPair, CryptoError> {
        Ok(KeyPair::generate())
    }

    fn derive_shared_key(
        &self,
        ours: &KeyPair,
        theirs: &PublicKey,
    ) -> Result<KeyMaterial, CryptoError> {
        let raw = ours.diffie_hellman(theirs);
        Ok(raw.derive(SHARED_KEY_INFO, KEY_SIZE)?)
    }
}
