//! Unified error type for the crypto module.
//!
//! Each submodule keeps its own focused error enum; this module folds them
//! into a single [`CryptoError`] so callers outside the crypto layer can
//! hold one type and still reach the underlying cause through `source()`.

use thiserror::Error;

use super::aead::AeadError;
use super::exchange::KeyExchangeError;
use super::material::KeyError;

/// Any failure inside the crypto layer.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// AEAD encryption or decryption failure.
    #[error("AEAD error: {0}")]
    Aead(#[source] AeadError),

    /// Key material handling failure.
    #[error("Key error: {0}")]
    Key(#[source] KeyError),

    /// Key agreement failure.
    #[error("Key exchange error: {0}")]
    Exchange(#[source] KeyExchangeError),
}

impl From<AeadError> for CryptoError {
    fn from(e: AeadError) -> Self {
        CryptoError::Aead(e)
    }
}

impl From<KeyError> for CryptoError {
    fn from(e: KeyError) -> Self {
        CryptoError::Key(e)
    }
}

impl From<KeyExchangeError> for CryptoError {
    fn from(e: KeyExchangeError) -> Self {
        CryptoError::Exchange(e)
    }
}
