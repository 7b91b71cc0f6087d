//! Negotiation lifecycle tracking.
//!
//! Each agent keeps one [`Negotiation`] per exchange. Transitions are
//! explicit methods that fail on anything the protocol does not allow, so
//! a replayed or out-of-order message can never silently corrupt state.
//!
//! ```text
//!            note_evaluated          record_accept
//!  Proposed ---------------> Evaluated ----------> Accepted --> Finalized
//!     ^  \                      |   \
//!     |   \ record_accept       |    \ record_escalate
//!     |    `-> Accepted         |     `-> Escalated
//!     |                         | record_counter (round + 1)
//!     |    observe_proposal     v
//!     `-------------------- Countered
//! ```
//!
//! `Rejected` and `Escalated` are reachable from any live state via
//! `record_reject` / `record_escalate`; both end the agent's involvement.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ParleyError, Result};

/// Where a negotiation stands.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NegotiationState {
    /// An offer is on the table awaiting evaluation.
    Proposed,
    /// The local agent has evaluated the offer and not yet responded.
    Evaluated,
    /// The local agent countered and awaits the peer.
    Countered,
    /// Both sides agree; awaiting final confirmation.
    Accepted,
    /// A human has taken over.
    Escalated,
    /// Declined outright.
    Rejected,
    /// Confirmed and done.
    Finalized,
}

impl NegotiationState {
    /// Whether the agent's involvement is over.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            NegotiationState::Escalated | NegotiationState::Rejected | NegotiationState::Finalized
        )
    }
}

/// One negotiation as tracked by one agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Negotiation {
    id: String,
    peer_id: String,
    state: NegotiationState,
    round: u32,
    max_rounds: u32,
    initiated_by_us: bool,
    started_at: DateTime<Utc>,
    last_activity: DateTime<Utc>,
}

impl Negotiation {
    /// Start a negotiation we initiate. Round counting begins at zero.
    pub fn initiate(peer_id: impl Into<String>, max_rounds: u32) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            peer_id: peer_id.into(),
            state: NegotiationState::Proposed,
            round: 0,
            max_rounds,
            initiated_by_us: true,
            started_at: now,
            last_activity: now,
        }
    }

    /// Track a negotiation opened by the peer's first message.
    pub fn from_incoming(
        id: impl Into<String>,
        peer_id: impl Into<String>,
        round: u32,
        max_rounds: u32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            peer_id: peer_id.into(),
            state: NegotiationState::Proposed,
            round,
            max_rounds,
            initiated_by_us: false,
            started_at: now,
            last_activity: now,
        }
    }

    /// Negotiation id shared by both peers.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The other party.
    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    /// Current state.
    pub fn state(&self) -> NegotiationState {
        self.state
    }

    /// Highest round sent or observed.
    pub fn round(&self) -> u32 {
        self.round
    }

    /// Round cap for this negotiation.
    pub fn max_rounds(&self) -> u32 {
        self.max_rounds
    }

    /// Whether we opened the exchange.
    pub fn initiated_by_us(&self) -> bool {
        self.initiated_by_us
    }

    /// When the negotiation started.
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Last transition time.
    pub fn last_activity(&self) -> DateTime<Utc> {
        self.last_activity
    }

    /// Whether the round cap has been reached.
    pub fn rounds_exhausted(&self) -> bool {
        self.round >= self.max_rounds
    }

    fn touch(&mut self, state: NegotiationState) {
        self.state = state;
        self.last_activity = Utc::now();
    }

    fn bad_transition(&self, wanted: &str) -> ParleyError {
        ParleyError::protocol(format!(
            "negotiation {} cannot {wanted} from state {:?}",
            self.id, self.state
        ))
    }

    /// Mark the offer on the table as evaluated.
    pub fn note_evaluated(&mut self) -> Result<()> {
        match self.state {
            NegotiationState::Proposed => {
                self.touch(NegotiationState::Evaluated);
                Ok(())
            }
            _ => Err(self.bad_transition("evaluate")),
        }
    }

    /// Record an acceptance, ours or the peer's.
    pub fn record_accept(&mut self) -> Result<()> {
        match self.state {
            NegotiationState::Proposed
            | NegotiationState::Evaluated
            | NegotiationState::Countered => {
                self.touch(NegotiationState::Accepted);
                Ok(())
            }
            _ => Err(self.bad_transition("accept")),
        }
    }

    /// Record that we countered. Increments the round and returns it.
    pub fn record_counter(&mut self) -> Result<u32> {
        match self.state {
            NegotiationState::Evaluated => {
                self.round += 1;
                self.touch(NegotiationState::Countered);
                Ok(self.round)
            }
            _ => Err(self.bad_transition("counter")),
        }
    }

    /// Record an incoming proposal or counter-proposal at `round`.
    ///
    /// Rounds are monotone: a message with a round below the current value
    /// is a replay or reorder and is refused.
    pub fn observe_proposal(&mut self, round: u32) -> Result<()> {
        if round < self.round {
            return Err(ParleyError::protocol(format!(
                "negotiation {}: round went backwards ({} < {})",
                self.id, round, self.round
            )));
        }
        match self.state {
            NegotiationState::Proposed | NegotiationState::Countered => {
                self.round = round;
                self.touch(NegotiationState::Proposed);
                Ok(())
            }
            _ => Err(self.bad_transition("receive a proposal")),
        }
    }

    /// Record an escalation (either side). Allowed from any live state.
    pub fn record_escalate(&mut self) -> Result<()> {
        match self.state {
            NegotiationState::Rejected | NegotiationState::Finalized => {
                Err(self.bad_transition("escalate"))
            }
            _ => {
                self.touch(NegotiationState::Escalated);
                Ok(())
            }
        }
    }

    /// Record a rejection (either side). Allowed from any live state.
    pub fn record_reject(&mut self) -> Result<()> {
        if self.state.is_terminal() {
            return Err(self.bad_transition("reject"));
        }
        self.touch(NegotiationState::Rejected);
        Ok(())
    }

    /// Record final confirmation of an accepted plan.
    pub fn record_finalize(&mut self) -> Result<()> {
        match self.state {
            NegotiationState::Accepted => {
                self.touch(NegotiationState::Finalized);
                Ok(())
            }
            _ => Err(self.bad_transition("finalize")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acceptor_path() {
        // Peer proposes, we evaluate and accept, peer finalizes
        let mut negotiation = Negotiation::from_incoming("neg-1", "alice", 0, 5);
        assert_eq!(negotiation.state(), NegotiationState::Proposed);
        assert!(!negotiation.initiated_by_us());

        negotiation.note_evaluated().unwrap();
        negotiation.record_accept().unwrap();
        assert_eq!(negotiation.state(), NegotiationState::Accepted);

        negotiation.record_finalize().unwrap();
        assert!(negotiation.state().is_terminal());
    }

    #[test]
    fn test_proposer_path_with_counter() {
        let mut negotiation = Negotiation::initiate("bob", 5);
        assert_eq!(negotiation.round(), 0);
        assert!(negotiation.initiated_by_us());

        // Peer counters at round 1
        negotiation.observe_proposal(1).unwrap();
        assert_eq!(negotiation.round(), 1);

        // We evaluate and counter back: round 2
        negotiation.note_evaluated().unwrap();
        assert_eq!(negotiation.record_counter().unwrap(), 2);
        assert_eq!(negotiation.state(), NegotiationState::Countered);

        // Peer accepts our counter
        negotiation.record_accept().unwrap();
        negotiation.record_finalize().unwrap();
        assert_eq!(negotiation.state(), NegotiationState::Finalized);
    }

    #[test]
    fn test_round_monotonicity_enforced() {
        let mut negotiation = Negotiation::initiate("bob", 5);
        negotiation.observe_proposal(3).unwrap();

        let err = negotiation.observe_proposal(2).unwrap_err();
        assert!(err.to_string().contains("round went backwards"));
        // State and round unchanged after the refused message
        assert_eq!(negotiation.round(), 3);
        assert_eq!(negotiation.state(), NegotiationState::Proposed);
    }

    #[test]
    fn test_counter_requires_evaluation() {
        let mut negotiation = Negotiation::from_incoming("neg-1", "alice", 0, 5);
        assert!(negotiation.record_counter().is_err());

        negotiation.note_evaluated().unwrap();
        assert_eq!(negotiation.record_counter().unwrap(), 1);
    }

    #[test]
    fn test_finalize_requires_acceptance() {
        let mut negotiation = Negotiation::from_incoming("neg-1", "alice", 0, 5);
        assert!(negotiation.record_finalize().is_err());

        negotiation.note_evaluated().unwrap();
        negotiation.record_counter().unwrap();
        assert!(negotiation.record_finalize().is_err());
    }

    #[test]
    fn test_terminal_states_are_frozen() {
        let mut negotiation = Negotiation::from_incoming("neg-1", "alice", 0, 5);
        negotiation.record_reject().unwrap();

        assert!(negotiation.note_evaluated().is_err());
        assert!(negotiation.record_accept().is_err());
        assert!(negotiation.observe_proposal(1).is_err());
        assert!(negotiation.record_escalate().is_err());
        assert!(negotiation.record_reject().is_err());
        assert_eq!(negotiation.state(), NegotiationState::Rejected);
    }

    #[test]
    fn test_escalate_from_any_live_state() {
        let mut fresh = Negotiation::initiate("bob", 5);
        assert!(fresh.record_escalate().is_ok());

        let mut evaluated = Negotiation::from_incoming("neg-2", "alice", 0, 5);
        evaluated.note_evaluated().unwrap();
        assert!(evaluated.record_escalate().is_ok());

        let mut accepted = Negotiation::from_incoming("neg-3", "alice", 0, 5);
        accepted.note_evaluated().unwrap();
        accepted.record_accept().unwrap();
        assert!(accepted.record_escalate().is_ok());
    }

    #[test]
    fn test_rounds_exhausted() {
        let mut negotiation = Negotiation::initiate("bob", 2);
        assert!(!negotiation.rounds_exhausted());

        negotiation.observe_proposal(1).unwrap();
        negotiation.note_evaluated().unwrap();
        negotiation.record_counter().unwrap();
        assert_eq!(negotiation.round(), 2);
        assert!(negotiation.rounds_exhausted());
    }

    #[test]
    fn test_initiated_ids_are_unique() {
        let a = Negotiation::initiate("bob", 5);
        let b = Negotiation::initiate("bob", 5);
        assert_ne!(a.id(), b.id());
    }
}
