//! Crate-wide error types.
//!
//! Layer-specific errors (crypto, custody, stores) keep their own enums
//! and are folded into [`ParleyError`] with `#[source]` so the full chain
//! stays reachable for callers that walk `source()`.

use thiserror::Error;

use crate::crypto::CryptoError;
use crate::custody::CustodyError;
use crate::preferences::{SettingsError, StoreError};
use crate::veto::VetoRuleError;

/// Negotiation engine errors.
#[derive(Error, Debug)]
pub enum ParleyError {
    /// Cryptographic operation failed.
    #[error("Crypto error: {0}")]
    Crypto(#[source] CryptoError),

    /// Key custody operation failed.
    #[error("Custody error: {0}")]
    Custody(#[source] CustodyError),

    /// Preference store operation failed.
    #[error("Preference store error: {0}")]
    Store(#[source] StoreError),

    /// Autonomy settings failed validation.
    #[error("Invalid autonomy settings: {0}")]
    Settings(#[source] SettingsError),

    /// Veto rule failed validation.
    #[error("Invalid veto rule: {0}")]
    VetoRule(#[source] VetoRuleError),

    /// Protocol-level error (bad state transition, round going backwards).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Message envelope or payload could not be parsed.
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// No shared key has been established with the peer.
    #[error("No session established with peer: {0}")]
    SessionNotEstablished(String),

    /// Negotiation id is not known to this agent.
    #[error("Unknown negotiation: {0}")]
    UnknownNegotiation(String),

    /// Configuration error.
    #[error("Config error: {0}")]
    Config(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for negotiation operations.
pub type Result<T> = std::result::Result<T, ParleyError>;

impl ParleyError {
    /// Protocol error from anything displayable.
    pub fn protocol(msg: impl Into<String>) -> Self {
        ParleyError::Protocol(msg.into())
    }

    /// Invalid-message error from anything displayable.
    pub fn invalid_message(msg: impl Into<String>) -> Self {
        ParleyError::InvalidMessage(msg.into())
    }
}

impl From<CryptoError> for ParleyError {
    fn from(err: CryptoError) -> Self {
        ParleyError::Crypto(err)
    }
}

impl From<CustodyError> for ParleyError {
    fn from(err: CustodyError) -> Self {
        ParleyError::Custody(err)
    }
}

impl From<StoreError> for ParleyError {
    fn from(err: StoreError) -> Self {
        ParleyError::Store(err)
    }
}

impl From<SettingsError> for ParleyError {
    fn from(err: SettingsError) -> Self {
        ParleyError::Settings(err)
    }
}

impl From<VetoRuleError> for ParleyError {
    fn from(err: VetoRuleError) -> Self {
        ParleyError::VetoRule(err)
    }
}

impl From<toml::de::Error> for ParleyError {
    fn from(err: toml::de::Error) -> Self {
        ParleyError::Config(err.to_string())
    }
}

impl From<base64::DecodeError> for ParleyError {
    fn from(err: base64::DecodeError) -> Self {
        ParleyError::InvalidMessage(format!("Base64 decode error: {err}"))
    }
}
