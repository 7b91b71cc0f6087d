//! Decrypted payload schema.
//!
//! These types travel inside the encrypted blob of an
//! [`AgentMessage`](super::AgentMessage) and are never visible to the
//! relay. Field names are part of the wire contract; changing them breaks
//! interop with peers running other implementations.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::envelope::MessageKind;
use crate::error::{ParleyError, Result};

/// A candidate meeting window.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct TimeSlot {
    /// Window start.
    pub start: DateTime<Utc>,
    /// Window end.
    pub end: DateTime<Utc>,
}

impl TimeSlot {
    /// Slot from explicit bounds.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// Slot starting at `start` and lasting `minutes`.
    pub fn of_minutes(start: DateTime<Utc>, minutes: u32) -> Self {
        Self {
            start,
            end: start + Duration::minutes(i64::from(minutes)),
        }
    }

    /// Slot length in whole minutes. A degenerate slot (end at or before
    /// start) reports zero.
    pub fn duration_minutes(&self) -> u32 {
        let minutes = (self.end - self.start).num_minutes();
        u32::try_from(minutes).unwrap_or(0)
    }
}

/// A candidate venue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VenueOption {
    /// Stable venue id.
    pub id: String,
    /// Display name, if known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Venue category ("coffee", "dinner", "park", ...).
    pub category: String,
}

impl VenueOption {
    /// Venue with id and category only.
    pub fn new(id: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            category: category.into(),
        }
    }

    /// Attach a display name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// An opening offer: candidate slots and venues.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProposalData {
    /// Id referenced by counter-proposals and acceptance.
    pub proposal_id: String,
    /// Candidate windows, in sender preference order.
    pub time_slots: Vec<TimeSlot>,
    /// Candidate venues, in sender preference order.
    pub venues: Vec<VenueOption>,
    /// Optional sender-side explanation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    /// Optional sender-side confidence in the offer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

impl ProposalData {
    /// New proposal with a fresh id.
    pub fn new(time_slots: Vec<TimeSlot>, venues: Vec<VenueOption>) -> Self {
        Self {
            proposal_id: Uuid::new_v4().to_string(),
            time_slots,
            venues,
            reasoning: None,
            confidence: None,
        }
    }
}

/// Alternatives offered instead of an acceptable slot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CounterProposalData {
    /// The proposal this counters (the opening proposal's id, across the
    /// whole exchange).
    pub original_proposal_id: String,
    /// Replacement windows.
    pub time_slots: Vec<TimeSlot>,
    /// Replacement venues.
    pub venues: Vec<VenueOption>,
    /// Optional explanation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    /// Optional confidence.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

/// The agreed meeting.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FinalPlanData {
    /// Agreed window.
    pub time_slot: TimeSlot,
    /// Agreed venue.
    pub venue: VenueOption,
}

/// The plaintext inside an encrypted envelope.
///
/// `kind` is serialized as `type` and mirrors the envelope's
/// `message_type`; the data fields are populated per kind.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentMessagePayload {
    /// Payload kind, mirrors the envelope `message_type`.
    #[serde(rename = "type")]
    pub kind: MessageKind,
    /// Present for `proposal` payloads.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proposal_data: Option<ProposalData>,
    /// Present for `counter_proposal` payloads.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub counter_data: Option<CounterProposalData>,
    /// Present for `finalize` payloads.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_data: Option<FinalPlanData>,
    /// Why the sending agent did what it did.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    /// Sending agent's confidence in its action.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

impl AgentMessagePayload {
    /// Opening proposal payload.
    pub fn proposal(data: ProposalData) -> Self {
        Self {
            kind: MessageKind::Proposal,
            proposal_data: Some(data),
            counter_data: None,
            final_data: None,
            reasoning: None,
            confidence: None,
        }
    }

    /// Counter-proposal payload.
    pub fn counter(data: CounterProposalData) -> Self {
        let reasoning = data.reasoning.clone();
        let confidence = data.confidence;
        Self {
            kind: MessageKind::CounterProposal,
            proposal_data: None,
            counter_data: Some(data),
            final_data: None,
            reasoning,
            confidence,
        }
    }

    /// Acceptance payload, carrying the concrete slot/venue pair accepted.
    pub fn accept(plan: FinalPlanData, reasoning: impl Into<String>, confidence: f64) -> Self {
        Self {
            kind: MessageKind::Accept,
            proposal_data: None,
            counter_data: None,
            final_data: Some(plan),
            reasoning: Some(reasoning.into()),
            confidence: Some(confidence),
        }
    }

    /// Rejection payload.
    pub fn reject(reasoning: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Reject,
            proposal_data: None,
            counter_data: None,
            final_data: None,
            reasoning: Some(reasoning.into()),
            confidence: None,
        }
    }

    /// Escalation payload.
    pub fn escalate(reasoning: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Escalate,
            proposal_data: None,
            counter_data: None,
            final_data: None,
            reasoning: Some(reasoning.into()),
            confidence: None,
        }
    }

    /// Finalization payload confirming the agreed plan.
    pub fn finalize(plan: FinalPlanData) -> Self {
        Self {
            kind: MessageKind::Finalize,
            proposal_data: None,
            counter_data: None,
            final_data: Some(plan),
            reasoning: None,
            confidence: None,
        }
    }

    /// The proposal data, or an error for malformed payloads.
    pub fn expect_proposal(&self) -> Result<&ProposalData> {
        self.proposal_data
            .as_ref()
            .ok_or_else(|| ParleyError::invalid_message("proposal payload missing proposal_data"))
    }

    /// The counter data, or an error for malformed payloads.
    pub fn expect_counter(&self) -> Result<&CounterProposalData> {
        self.counter_data.as_ref().ok_or_else(|| {
            ParleyError::invalid_message("counter_proposal payload missing counter_data")
        })
    }

    /// The final plan, or an error for malformed payloads.
    pub fn expect_final(&self) -> Result<&FinalPlanData> {
        self.final_data
            .as_ref()
            .ok_or_else(|| ParleyError::invalid_message("payload missing final_data"))
    }

    /// Serialize to the canonical JSON wire form.
    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse from the canonical JSON wire form.
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
