//! Negotiation wire protocol.
//!
//! Defines the relay-visible envelope, the encrypted payload schema, and
//! the per-negotiation state machine.
//!
//! # Message Flow
//!
//! ```text
//! alice's agent                      bob's agent
//!      |                                 |
//!      |-------- proposal (r0) -------->|  evaluate against preferences
//!      |                                 |
//!      |<--- counter_proposal (r1) -----|  alternatives when score is mid
//!      |                                 |
//!      |-------- accept --------------->|  or another counter, up to the
//!      |                                 |  round cap
//!      |<------- finalize --------------|  agreed plan echoed back
//!      |                                 |
//!      |   (escalate at any point hands  |
//!      |    the thread to the humans)    |
//! ```
//!
//! Every arrow is an [`AgentMessage`]: plaintext routing metadata around a
//! payload only the two agents can decrypt.
//!
//! # Negotiation States
//!
//! | State       | Meaning                              | Next                          |
//! |-------------|--------------------------------------|-------------------------------|
//! | `Proposed`  | Offer on the table                   | Evaluated, Accepted           |
//! | `Evaluated` | Offer scored, response pending       | Accepted, Countered, Escalated|
//! | `Countered` | Counter sent, awaiting peer          | Proposed, Accepted            |
//! | `Accepted`  | Terms agreed                         | Finalized                     |
//! | `Escalated` | Humans have taken over               | (terminal)                    |
//! | `Rejected`  | Declined outright                    | (terminal)                    |
//! | `Finalized` | Plan confirmed                       | (terminal)                    |
//!
//! `Escalated` and `Rejected` are also reachable from every live state.

pub mod envelope;
pub mod negotiation;
pub mod payload;

pub use envelope::{AgentMessage, MessageKind};
pub use negotiation::{Negotiation, NegotiationState};
pub use payload::{
    AgentMessagePayload, CounterProposalData, FinalPlanData, ProposalData, TimeSlot, VenueOption,
};
