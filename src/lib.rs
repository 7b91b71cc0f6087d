//! # Parley - Autonomous Encrypted Scheduling Negotiation
//!
//! End-to-end-encrypted negotiation between two users' autonomous agents.
//! Each agent learns its user's scheduling preferences, negotiates meeting
//! time and venue with a peer agent over an untrusted relay, and hands the
//! decision back to the human whenever its confidence or authority runs out.
//!
//! ## Features
//!
//! - **End-to-end encryption**: ChaCha20-Poly1305 payloads under X25519-agreed
//!   keys; the relay sees routing metadata only
//! - **Key custody**: per-user key vault with device-local and synchronized
//!   policies, master key export for device pairing
//! - **Preference learning**: exponential-moving-average profile built from
//!   confirmed meetings, synced as an encrypted blob
//! - **Veto rules**: hard constraints that no learned score can override
//! - **Tiered decisions**: veto check, optional anonymized LLM consultation,
//!   threshold heuristic fallback
//! - **Escalation**: round caps, autonomy floor, and cold-start gates route
//!   negotiations to the human instead of guessing
//!
//! ## Protocol Overview
//!
//! Agents exchange JSON envelopes through a relay that stores and forwards
//! them without being able to read the payloads.
//!
//! ### Architecture
//!
//! ```text
//! Alice's agent                    Relay                     Bob's agent
//!      |                             |                             |
//!      |------ proposal (enc) ----->|------ proposal (enc) ------>|
//!      |                             |                       evaluate
//!      |<----- counter (enc) -------|<----- counter (enc) --------|
//! evaluate                          |                             |
//!      |------ accept (enc) ------->|------ accept (enc) -------->|
//!      |<----- finalize (enc) ------|<----- finalize (enc) -------|
//!      |                             |                             |
//! ```
//!
//! ### Negotiation State Machine
//!
//! ```text
//!                 observe_proposal()
//!     [Proposed] <────────────────── [Countered]
//!         │                               ^
//!         │ note_evaluated()              │ record_counter()
//!         v                               │
//!     [Evaluated] ────────────────────────┘
//!         │
//!         │ record_accept()
//!         v                record_finalize()
//!     [Accepted] ─────────────────> [Finalized]
//!
//!     Any live state ──record_escalate()──> [Escalated]
//!     Any live state ──record_reject()────> [Rejected]
//! ```
//!
//! ### Message Types
//!
//! | Type             | Purpose                                        |
//! |------------------|------------------------------------------------|
//! | proposal         | Open a negotiation with candidate slots/venues |
//! | counter_proposal | Push back with alternatives                    |
//! | accept           | Commit to one offered slot/venue pair          |
//! | finalize         | Confirm the accepted plan                      |
//! | reject           | End the negotiation without a meeting          |
//! | escalate         | A human has to take over                       |
//!
//! ## Quick Start
//!
//! ### Two Agents, One Meeting
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use parley::agent::{AgentTurn, NegotiationAgent};
//! use parley::custody::MemoryVault;
//! use parley::protocol::{ProposalData, TimeSlot, VenueOption};
//!
//! let alice = NegotiationAgent::new("alice", Arc::new(MemoryVault::new()));
//! let bob = NegotiationAgent::new("bob", Arc::new(MemoryVault::new()));
//!
//! // Out-of-band public key exchange, then both derive the same shared key
//! alice.establish_peer("bob", &bob.public_key().await?).await?;
//! bob.establish_peer("alice", &alice.public_key().await?).await?;
//!
//! let proposal = ProposalData::new(
//!     vec![TimeSlot::of_minutes(start, 60)],
//!     vec![VenueOption::new("cafe-blue", "coffee")],
//! );
//! let message = alice.propose("bob", proposal).await?;
//!
//! match bob.handle_message(&message).await? {
//!     AgentTurn::Reply(reply) => { /* forward via the relay */ },
//!     AgentTurn::Conclude { plan, .. } => { /* meeting agreed */ },
//!     AgentTurn::Escalate { reason, .. } => { /* ask the human */ },
//! }
//! ```
//!
//! ### Learning From Confirmed Meetings
//!
//! ```rust,ignore
//! use parley::preferences::ConfirmedNegotiation;
//!
//! agent.learn_from_history(&confirmed_meetings).await?;
//! let prefs = agent.preferences().await;
//! println!("profile confidence: {:.2}", parley::preferences::confidence(&prefs.learned));
//! ```
//!
//! ### Hard Constraints
//!
//! ```rust,ignore
//! use parley::veto::VetoRule;
//!
//! agent.set_veto_rules(vec![
//!     VetoRule::never_after_hour(21)?,
//!     VetoRule::never_on_days(["sunday"])?,
//! ]).await?;
//! ```
//!
//! ## Modules
//!
//! - [`agent`]: the autonomous agent and its message loop
//! - [`crypto`]: AEAD encryption, key agreement, key derivation
//! - [`custody`]: key vault abstraction and lifecycle management
//! - [`decision`]: veto/reasoner/heuristic evaluation pipeline
//! - [`preferences`]: learned profile, autonomy settings, encrypted sync
//! - [`protocol`]: envelopes, payloads, and the negotiation state machine
//! - [`veto`]: hard constraint rules and their evaluation
//! - [`config`]: configuration management
//! - [`error`]: error types and result aliases

pub mod agent;
pub mod config;
pub mod crypto;
pub mod custody;
pub mod decision;
pub mod error;
pub mod preferences;
pub mod protocol;
pub mod veto;

// Re-exports for convenience
pub use agent::{AgentTurn, EscalationReason, NegotiationAgent};
pub use config::Config;
pub use crypto::{CryptoProvider, DefaultCrypto, KeyMaterial, KeyPair, PublicKey};
pub use custody::{KeyCustody, KeyIdentifier, KeyVault, MemoryVault, SyncPolicy};
pub use decision::{AgentDecision, DecisionAction, DecisionEngine};
pub use error::{ParleyError, Result};
pub use preferences::{AgentPreferences, AutonomySettings, ConfirmedNegotiation, LearnedPatterns};
pub use protocol::{
    AgentMessage, AgentMessagePayload, MessageKind, Negotiation, NegotiationState, ProposalData,
    TimeSlot, VenueOption,
};
pub use veto::{VetoConstraint, VetoEngine, VetoRule};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Negotiation protocol version
pub const PROTOCOL_VERSION: &str = "1.0";
