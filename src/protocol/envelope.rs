//! Relay-visible message envelope.
//!
//! The envelope is the only part of a negotiation the relay can read:
//! routing ids, the message kind, a round counter, and a timestamp. The
//! payload itself travels as base64 of an AEAD blob only the two peers
//! can open.

use std::fmt;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Negotiation message kinds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Opening offer.
    Proposal,
    /// Alternatives to a previous offer.
    CounterProposal,
    /// Offer accepted.
    Accept,
    /// Offer declined outright.
    Reject,
    /// Agent hands the negotiation to its human.
    Escalate,
    /// Agreed plan confirmed by the proposer.
    Finalize,
}

impl MessageKind {
    /// Wire name of the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Proposal => "proposal",
            MessageKind::CounterProposal => "counter_proposal",
            MessageKind::Accept => "accept",
            MessageKind::Reject => "reject",
            MessageKind::Escalate => "escalate",
            MessageKind::Finalize => "finalize",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One message between two agents, as the relay sees it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentMessage {
    negotiation_id: String,
    from_user_id: String,
    to_user_id: String,
    message_type: MessageKind,
    encrypted_payload: String,
    round: u32,
    created_at: DateTime<Utc>,
}

impl AgentMessage {
    /// Build an envelope around an already-encrypted payload blob.
    pub fn new(
        message_type: MessageKind,
        negotiation_id: impl Into<String>,
        from_user_id: impl Into<String>,
        to_user_id: impl Into<String>,
        encrypted_blob: &[u8],
        round: u32,
    ) -> Self {
        Self {
            negotiation_id: negotiation_id.into(),
            from_user_id: from_user_id.into(),
            to_user_id: to_user_id.into(),
            message_type,
            encrypted_payload: BASE64.encode(encrypted_blob),
            round,
            created_at: Utc::now(),
        }
    }

    /// Negotiation this message belongs to.
    pub fn negotiation_id(&self) -> &str {
        &self.negotiation_id
    }

    /// Sending user.
    pub fn from_user_id(&self) -> &str {
        &self.from_user_id
    }

    /// Receiving user.
    pub fn to_user_id(&self) -> &str {
        &self.to_user_id
    }

    /// Message kind.
    pub fn message_type(&self) -> MessageKind {
        self.message_type
    }

    /// Round counter at send time.
    pub fn round(&self) -> u32 {
        self.round
    }

    /// Send timestamp.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// The base64 payload as stored on the wire.
    pub fn encrypted_payload(&self) -> &str {
        &self.encrypted_payload
    }

    /// Decode the payload back into the AEAD blob.
    pub fn payload_blob(&self) -> Result<Vec<u8>> {
        Ok(BASE64.decode(self.encrypted_payload.as_bytes())?)
    }

    /// Serialize the envelope for the relay.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse an envelope received from the relay.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
