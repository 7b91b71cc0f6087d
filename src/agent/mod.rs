//! The autonomous scheduling agent.
//!
//! `NegotiationAgent` ties the layers together: custody for its own keys,
//! X25519 agreement for a shared key per peer, the decision engine for
//! judgment, and the protocol types for the wire. One agent serves one
//! user and can run any number of concurrent negotiations.
//!
//! The message loop is deliberately small. `handle_message` decrypts,
//! advances the per-negotiation state machine, asks the decision engine
//! what to do, and answers with an [`AgentTurn`]: a reply to forward to
//! the relay, a concluded plan, or an escalation for the human. Escalation
//! gates run before any evaluation, so an agent that should not act
//! autonomously never does.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::crypto::{CryptoError, CryptoProvider, DefaultCrypto, KeyMaterial, PublicKey, KEY_SIZE};
use crate::custody::{KeyCustody, KeyIdentifier, KeyVault, SyncPolicy};
use crate::decision::{
    scoring, AgentDecision, DecisionAction, DecisionEngine, SuggestedAlternatives,
};
use crate::error::{ParleyError, Result};
use crate::preferences::{
    confidence, update_from_history, AgentPreferences, AutonomySettings, ConfirmedNegotiation,
    LearnedPatterns, PreferenceSync,
};
use crate::protocol::{
    AgentMessage, AgentMessagePayload, CounterProposalData, FinalPlanData, MessageKind,
    Negotiation, ProposalData,
};
use crate::veto::VetoRule;

/// HKDF info label for the key protecting uploaded preferences.
pub const UPLOAD_KEY_INFO: &[u8] = b"parley/v1/upload-key";

/// Below this global autonomy level the agent always escalates.
pub const MIN_AUTONOMY_LEVEL: f64 = 0.3;

/// Below this profile confidence the agent always escalates.
pub const MIN_PROFILE_CONFIDENCE: f64 = 0.5;

/// Why a negotiation was handed to the human before evaluation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EscalationReason {
    /// The negotiation used up its round budget.
    RoundLimit { round: u32, max: u32 },
    /// The user keeps the agent on a short leash.
    LowAutonomy { level: f64 },
    /// Not enough confirmed history to trust the learned profile.
    InsufficientHistory { confidence: f64 },
}

impl fmt::Display for EscalationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EscalationReason::RoundLimit { round, max } => {
                write!(f, "round {round} reached the negotiation limit of {max}")
            },
            EscalationReason::LowAutonomy { level } => {
                write!(f, "global autonomy level {level:.2} is below the autonomous floor")
            },
            EscalationReason::InsufficientHistory { confidence } => {
                write!(f, "profile confidence {confidence:.2} is too low to act alone")
            },
        }
    }
}

/// Outcome of handling one incoming message.
#[derive(Debug)]
pub enum AgentTurn {
    /// Forward this reply to the relay.
    Reply(AgentMessage),
    /// The negotiation ended. `plan` is the agreed meeting, or `None` when
    /// the peer walked away; `reply` is a closing message to forward.
    Conclude {
        plan: Option<FinalPlanData>,
        reply: Option<AgentMessage>,
    },
    /// The human has to take over. `notice` tells the peer, when one was
    /// produced.
    Escalate {
        reason: String,
        notice: Option<AgentMessage>,
    },
}

/// An autonomous agent negotiating on behalf of one user.
pub struct NegotiationAgent {
    user_id: String,
    crypto: Arc<dyn CryptoProvider>,
    custody: KeyCustody,
    prefs: RwLock<AgentPreferences>,
    engine: DecisionEngine,
    sync: Option<PreferenceSync>,
    peer_keys: RwLock<HashMap<String, KeyMaterial>>,
    negotiations: RwLock<HashMap<String, Negotiation>>,
}

impl NegotiationAgent {
    /// Agent with the default crypto provider and decision engine.
    pub fn new(user_id: impl Into<String>, vault: Arc<dyn KeyVault>) -> Self {
        Self::with_crypto(user_id, vault, Arc::new(DefaultCrypto))
    }

    /// Agent with an explicit crypto provider.
    pub fn with_crypto(
        user_id: impl Into<String>,
        vault: Arc<dyn KeyVault>,
        crypto: Arc<dyn CryptoProvider>,
    ) -> Self {
        Self::with_namespace(user_id, vault, crypto, crate::custody::DEFAULT_NAMESPACE)
    }

    /// Agent with an explicit crypto provider and custody namespace.
    pub fn with_namespace(
        user_id: impl Into<String>,
        vault: Arc<dyn KeyVault>,
        crypto: Arc<dyn CryptoProvider>,
        namespace: impl Into<String>,
    ) -> Self {
        let user_id = user_id.into();
        let custody =
            KeyCustody::with_namespace(vault, Arc::clone(&crypto), user_id.clone(), namespace);
        Self {
            user_id,
            crypto,
            custody,
            prefs: RwLock::new(AgentPreferences::default()),
            engine: DecisionEngine::new(),
            sync: None,
            peer_keys: RwLock::new(HashMap::new()),
            negotiations: RwLock::new(HashMap::new()),
        }
    }

    /// Replace the default decision engine.
    pub fn with_engine(mut self, engine: DecisionEngine) -> Self {
        self.engine = engine;
        self
    }

    /// Enable encrypted preference sync through `sync`.
    pub fn with_preference_sync(mut self, sync: PreferenceSync) -> Self {
        self.sync = Some(sync);
        self
    }

    /// Start from existing preferences. Fails on invalid settings.
    pub fn with_preferences(self, prefs: AgentPreferences) -> Result<Self> {
        prefs.validate()?;
        *self
            .prefs
            .try_write()
            .map_err(|_| ParleyError::protocol("preferences locked during construction"))? = prefs;
        Ok(self)
    }

    /// The user this agent speaks for.
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// The custody layer, for key export and device pairing.
    pub fn custody(&self) -> &KeyCustody {
        &self.custody
    }

    // ---- key agreement -------------------------------------------------

    /// Our agreement public key, generating the pair on first use.
    pub async fn public_key(&self) -> Result<PublicKey> {
        let pair = self
            .custody
            .load_or_generate_key_pair(SyncPolicy::DeviceLocal)
            .await?;
        Ok(*pair.public_key())
    }

    /// Derive and pin the shared negotiation key for `peer_id`.
    ///
    /// Both sides run this with the other's public key and end up with the
    /// same symmetric key; the relay never sees either secret.
    pub async fn establish_peer(
        &self,
        peer_id: impl Into<String>,
        their_public: &PublicKey,
    ) -> Result<()> {
        let peer_id = peer_id.into();
        let ours = self
            .custody
            .load_or_generate_key_pair(SyncPolicy::DeviceLocal)
            .await?;
        let shared = self.crypto.derive_shared_key(&ours, their_public)?;
        self.peer_keys.write().await.insert(peer_id.clone(), shared);
        tracing::info!(peer = %peer_id, "established shared negotiation key");
        Ok(())
    }

    /// Whether a shared key exists for `peer_id`.
    pub async fn has_peer(&self, peer_id: &str) -> bool {
        self.peer_keys.read().await.contains_key(peer_id)
    }

    async fn peer_key(&self, peer_id: &str) -> Result<KeyMaterial> {
        self.peer_keys
            .read()
            .await
            .get(peer_id)
            .cloned()
            .ok_or_else(|| ParleyError::SessionNotEstablished(peer_id.to_string()))
    }

    // ---- wire ----------------------------------------------------------

    /// Encrypt `payload` for `recipient` and wrap it in an envelope.
    pub async fn send_message(
        &self,
        payload: &AgentMessagePayload,
        recipient: &str,
        negotiation_id: &str,
        round: u32,
    ) -> Result<AgentMessage> {
        let key = self.peer_key(recipient).await?;
        let plaintext = payload.to_json()?;
        let blob = self.crypto.encrypt(&plaintext, &key)?;
        Ok(AgentMessage::new(
            payload.kind,
            negotiation_id,
            &self.user_id,
            recipient,
            &blob,
            round,
        ))
    }

    /// Decrypt an envelope from an established peer.
    ///
    /// Refuses payloads whose kind contradicts the envelope metadata: the
    /// plaintext kind is authenticated, the envelope field is not.
    pub async fn receive_message(&self, message: &AgentMessage) -> Result<AgentMessagePayload> {
        let key = self.peer_key(message.from_user_id()).await?;
        let blob = message.payload_blob()?;
        let plaintext = self.crypto.decrypt(&blob, &key)?;
        let payload = AgentMessagePayload::from_json(&plaintext)?;
        if payload.kind != message.message_type() {
            return Err(ParleyError::invalid_message(format!(
                "payload kind {} does not match envelope kind {}",
                payload.kind,
                message.message_type()
            )));
        }
        Ok(payload)
    }

    // ---- escalation gates ----------------------------------------------

    /// Check the pre-evaluation gates for a negotiation at `round`.
    ///
    /// Runs before the decision engine ever sees a proposal.
    pub async fn should_escalate(&self, round: u32) -> Option<EscalationReason> {
        let prefs = self.prefs.read().await;
        if round >= prefs.autonomy.max_negotiation_rounds {
            return Some(EscalationReason::RoundLimit {
                round,
                max: prefs.autonomy.max_negotiation_rounds,
            });
        }
        if prefs.autonomy.global_autonomy_level < MIN_AUTONOMY_LEVEL {
            return Some(EscalationReason::LowAutonomy {
                level: prefs.autonomy.global_autonomy_level,
            });
        }
        let trust = confidence(&prefs.learned);
        if trust < MIN_PROFILE_CONFIDENCE {
            return Some(EscalationReason::InsufficientHistory { confidence: trust });
        }
        None
    }

    /// Gate, then evaluate a proposal through the decision engine.
    pub async fn evaluate_proposal(
        &self,
        proposal: &ProposalData,
        peer_id: &str,
        round: u32,
    ) -> AgentDecision {
        if let Some(reason) = self.should_escalate(round).await {
            tracing::info!(peer = %peer_id, %reason, "escalating without evaluation");
            return AgentDecision::escalate(reason.to_string());
        }
        let prefs = self.prefs.read().await.clone();
        self.engine
            .evaluate(&self.user_id, peer_id, proposal, &prefs)
            .await
    }

    /// Synthesize a counter-proposal for `proposal` from the learned
    /// profile alone: the best-scoring offered venue is kept and
    /// replacement slots center on the profile's top hours.
    pub async fn generate_counter_proposal(&self, proposal: &ProposalData) -> CounterProposalData {
        let patterns = self.prefs.read().await.learned.clone();
        let alternatives = scoring::synthesize_alternatives(
            &patterns,
            proposal,
            crate::decision::DEFAULT_COUNTER_SLOTS,
        );
        Self::counter_payload(proposal, alternatives, None, None)
    }

    // ---- negotiation flow ----------------------------------------------

    /// Open a negotiation with `recipient` by sending `proposal`.
    pub async fn propose(&self, recipient: &str, proposal: ProposalData) -> Result<AgentMessage> {
        let max_rounds = self.prefs.read().await.autonomy.max_negotiation_rounds;
        let negotiation = Negotiation::initiate(recipient, max_rounds);
        let payload = AgentMessagePayload::proposal(proposal);
        let message = self
            .send_message(&payload, recipient, negotiation.id(), negotiation.round())
            .await?;

        tracing::info!(
            negotiation = %negotiation.id(),
            peer = %recipient,
            "opened negotiation"
        );
        self.negotiations
            .write()
            .await
            .insert(negotiation.id().to_string(), negotiation);
        Ok(message)
    }

    /// Handle one incoming message and produce the next turn.
    pub async fn handle_message(&self, message: &AgentMessage) -> Result<AgentTurn> {
        if message.to_user_id() != self.user_id {
            return Err(ParleyError::invalid_message(format!(
                "message addressed to {}, not {}",
                message.to_user_id(),
                self.user_id
            )));
        }

        let payload = self.receive_message(message).await?;
        tracing::debug!(
            negotiation = %message.negotiation_id(),
            kind = %payload.kind,
            round = message.round(),
            "handling message"
        );

        match payload.kind {
            MessageKind::Proposal => {
                let proposal = payload.expect_proposal()?.clone();
                self.handle_offer(message, proposal).await
            },
            MessageKind::CounterProposal => {
                let counter = payload.expect_counter()?.clone();
                // A counter is evaluated exactly like a proposal; the root
                // proposal id keeps the chain connected.
                let proposal = ProposalData {
                    proposal_id: counter.original_proposal_id,
                    time_slots: counter.time_slots,
                    venues: counter.venues,
                    reasoning: counter.reasoning,
                    confidence: counter.confidence,
                };
                self.handle_offer(message, proposal).await
            },
            MessageKind::Accept => self.handle_accept(message, &payload).await,
            MessageKind::Finalize => self.handle_finalize(message, &payload).await,
            MessageKind::Reject => self.handle_reject(message, &payload).await,
            MessageKind::Escalate => self.handle_peer_escalate(message, &payload).await,
        }
    }

    /// Shared path for proposals and counter-proposals.
    async fn handle_offer(
        &self,
        message: &AgentMessage,
        proposal: ProposalData,
    ) -> Result<AgentTurn> {
        let peer_id = message.from_user_id();
        let negotiation_id = message.negotiation_id();

        let max_rounds = self.prefs.read().await.autonomy.max_negotiation_rounds;
        {
            let mut negotiations = self.negotiations.write().await;
            match negotiations.get_mut(negotiation_id) {
                Some(negotiation) => negotiation.observe_proposal(message.round())?,
                None => {
                    negotiations.insert(
                        negotiation_id.to_string(),
                        Negotiation::from_incoming(
                            negotiation_id,
                            peer_id,
                            message.round(),
                            max_rounds,
                        ),
                    );
                },
            }
        }

        let decision = self
            .evaluate_proposal(&proposal, peer_id, message.round())
            .await;
        tracing::info!(
            negotiation = %negotiation_id,
            action = %decision.action,
            confidence = decision.confidence,
            "evaluated offer"
        );

        match decision.action {
            DecisionAction::Accept => {
                let patterns = self.prefs.read().await.learned.clone();
                let plan = choose_plan(&patterns, &proposal)?;
                {
                    let mut negotiations = self.negotiations.write().await;
                    let negotiation = self.tracked(&mut negotiations, negotiation_id)?;
                    negotiation.note_evaluated()?;
                    negotiation.record_accept()?;
                }
                let payload = AgentMessagePayload::accept(
                    plan,
                    decision.reasoning.clone(),
                    decision.confidence,
                );
                let reply = self
                    .send_message(&payload, peer_id, negotiation_id, message.round())
                    .await?;
                Ok(AgentTurn::Reply(reply))
            },
            DecisionAction::Counter => {
                let counter = self.build_counter(&proposal, &decision).await;
                let next_round = {
                    let mut negotiations = self.negotiations.write().await;
                    let negotiation = self.tracked(&mut negotiations, negotiation_id)?;
                    negotiation.note_evaluated()?;
                    negotiation.record_counter()?
                };
                let payload = AgentMessagePayload::counter(counter);
                let reply = self
                    .send_message(&payload, peer_id, negotiation_id, next_round)
                    .await?;
                Ok(AgentTurn::Reply(reply))
            },
            DecisionAction::Escalate => {
                {
                    let mut negotiations = self.negotiations.write().await;
                    let negotiation = self.tracked(&mut negotiations, negotiation_id)?;
                    negotiation.record_escalate()?;
                }
                let payload = AgentMessagePayload::escalate(decision.reasoning.clone());
                let notice = self
                    .send_message(&payload, peer_id, negotiation_id, message.round())
                    .await?;
                Ok(AgentTurn::Escalate {
                    reason: decision.reasoning,
                    notice: Some(notice),
                })
            },
        }
    }

    async fn handle_accept(
        &self,
        message: &AgentMessage,
        payload: &AgentMessagePayload,
    ) -> Result<AgentTurn> {
        let plan = payload.expect_final()?.clone();
        {
            let mut negotiations = self.negotiations.write().await;
            let negotiation = self.tracked(&mut negotiations, message.negotiation_id())?;
            negotiation.record_accept()?;
            negotiation.record_finalize()?;
        }

        let reply = self
            .send_message(
                &AgentMessagePayload::finalize(plan.clone()),
                message.from_user_id(),
                message.negotiation_id(),
                message.round(),
            )
            .await?;
        tracing::info!(
            negotiation = %message.negotiation_id(),
            venue = %plan.venue.id,
            "peer accepted, plan confirmed"
        );
        Ok(AgentTurn::Conclude {
            plan: Some(plan),
            reply: Some(reply),
        })
    }

    async fn handle_finalize(
        &self,
        message: &AgentMessage,
        payload: &AgentMessagePayload,
    ) -> Result<AgentTurn> {
        let plan = payload.expect_final()?.clone();
        {
            let mut negotiations = self.negotiations.write().await;
            let negotiation = self.tracked(&mut negotiations, message.negotiation_id())?;
            negotiation.record_finalize()?;
        }
        tracing::info!(
            negotiation = %message.negotiation_id(),
            venue = %plan.venue.id,
            "negotiation finalized"
        );
        Ok(AgentTurn::Conclude {
            plan: Some(plan),
            reply: None,
        })
    }

    async fn handle_reject(
        &self,
        message: &AgentMessage,
        payload: &AgentMessagePayload,
    ) -> Result<AgentTurn> {
        {
            let mut negotiations = self.negotiations.write().await;
            let negotiation = self.tracked(&mut negotiations, message.negotiation_id())?;
            negotiation.record_reject()?;
        }
        tracing::info!(
            negotiation = %message.negotiation_id(),
            reason = payload.reasoning.as_deref().unwrap_or("none given"),
            "peer declined"
        );
        Ok(AgentTurn::Conclude {
            plan: None,
            reply: None,
        })
    }

    async fn handle_peer_escalate(
        &self,
        message: &AgentMessage,
        payload: &AgentMessagePayload,
    ) -> Result<AgentTurn> {
        {
            let mut negotiations = self.negotiations.write().await;
            let negotiation = self.tracked(&mut negotiations, message.negotiation_id())?;
            negotiation.record_escalate()?;
        }
        let reason = payload
            .reasoning
            .clone()
            .unwrap_or_else(|| "peer escalated to their human".to_string());
        Ok(AgentTurn::Escalate {
            reason,
            notice: None,
        })
    }

    /// Decline a negotiation on the user's behalf.
    pub async fn decline(
        &self,
        negotiation_id: &str,
        reason: impl Into<String>,
    ) -> Result<AgentMessage> {
        let reason = reason.into();
        let (peer_id, round) = {
            let mut negotiations = self.negotiations.write().await;
            let negotiation = self.tracked(&mut negotiations, negotiation_id)?;
            negotiation.record_reject()?;
            (negotiation.peer_id().to_string(), negotiation.round())
        };
        self.send_message(
            &AgentMessagePayload::reject(reason),
            &peer_id,
            negotiation_id,
            round,
        )
        .await
    }

    fn tracked<'a>(
        &self,
        negotiations: &'a mut HashMap<String, Negotiation>,
        negotiation_id: &str,
    ) -> Result<&'a mut Negotiation> {
        negotiations
            .get_mut(negotiation_id)
            .ok_or_else(|| ParleyError::UnknownNegotiation(negotiation_id.to_string()))
    }

    /// Build the counter payload for a counter decision, synthesizing
    /// alternatives when the decision carries none.
    async fn build_counter(
        &self,
        proposal: &ProposalData,
        decision: &AgentDecision,
    ) -> CounterProposalData {
        let mut counter = match &decision.suggested_alternatives {
            Some(alternatives)
                if !alternatives.time_slots.is_empty() || !alternatives.venues.is_empty() =>
            {
                Self::counter_payload(proposal, alternatives.clone(), None, None)
            },
            _ => self.generate_counter_proposal(proposal).await,
        };
        counter.reasoning = Some(decision.reasoning.clone());
        counter.confidence = Some(decision.confidence);
        counter
    }

    fn counter_payload(
        proposal: &ProposalData,
        alternatives: SuggestedAlternatives,
        reasoning: Option<String>,
        confidence: Option<f64>,
    ) -> CounterProposalData {
        // A one-sided suggestion keeps the other side of the original offer
        let time_slots = if alternatives.time_slots.is_empty() {
            proposal.time_slots.clone()
        } else {
            alternatives.time_slots
        };
        let venues = if alternatives.venues.is_empty() {
            proposal.venues.clone()
        } else {
            alternatives.venues
        };

        CounterProposalData {
            original_proposal_id: proposal.proposal_id.clone(),
            time_slots,
            venues,
            reasoning,
            confidence,
        }
    }

    // ---- negotiation queries -------------------------------------------

    /// Snapshot of one negotiation.
    pub async fn negotiation(&self, negotiation_id: &str) -> Option<Negotiation> {
        self.negotiations.read().await.get(negotiation_id).cloned()
    }

    /// All negotiations not yet in a terminal state.
    pub async fn active_negotiations(&self) -> Vec<Negotiation> {
        self.negotiations
            .read()
            .await
            .values()
            .filter(|negotiation| !negotiation.state().is_terminal())
            .cloned()
            .collect()
    }

    // ---- preferences ---------------------------------------------------

    /// Snapshot of the current preferences.
    pub async fn preferences(&self) -> AgentPreferences {
        self.prefs.read().await.clone()
    }

    /// Fold confirmed negotiations into the learned profile and upload the
    /// result when sync is configured.
    pub async fn learn_from_history(&self, history: &[ConfirmedNegotiation]) -> Result<()> {
        {
            let mut prefs = self.prefs.write().await;
            prefs.learned = update_from_history(history, &prefs.learned);
            tracing::info!(
                negotiations = prefs.learned.negotiation_count,
                "updated learned profile"
            );
        }
        self.sync_preferences().await
    }

    /// Upload preferences encrypted under the derived upload key.
    ///
    /// No-op without a configured sync backend.
    pub async fn sync_preferences(&self) -> Result<()> {
        let Some(sync) = &self.sync else {
            return Ok(());
        };
        let upload_key = self.upload_key().await?;
        let prefs = self.prefs.read().await.clone();
        sync.upload(&self.user_id, &prefs, &upload_key).await
    }

    /// Replace local preferences with the synced copy, if one exists.
    pub async fn restore_preferences(&self) -> Result<bool> {
        let Some(sync) = &self.sync else {
            return Ok(false);
        };
        let upload_key = self.upload_key().await?;
        match sync.download(&self.user_id, &upload_key).await? {
            Some(prefs) => {
                *self.prefs.write().await = prefs;
                tracing::info!("restored preferences from sync");
                Ok(true)
            },
            None => Ok(false),
        }
    }

    async fn upload_key(&self) -> Result<KeyMaterial> {
        let master = self
            .custody
            .load_or_generate_symmetric(&KeyIdentifier::Master, SyncPolicy::Synchronized)
            .await?;
        Ok(master
            .derive(UPLOAD_KEY_INFO, KEY_SIZE)
            .map_err(CryptoError::from)?)
    }

    /// Replace the veto rules.
    pub async fn set_veto_rules(&self, rules: Vec<VetoRule>) -> Result<()> {
        for rule in &rules {
            rule.constraint().validate()?;
        }
        self.prefs.write().await.veto_rules = rules;
        Ok(())
    }

    /// Replace the autonomy settings. Fails on invalid thresholds.
    pub async fn set_autonomy(&self, autonomy: AutonomySettings) -> Result<()> {
        autonomy.validate()?;
        self.prefs.write().await.autonomy = autonomy;
        Ok(())
    }
}

/// Pick the best offered slot/venue pair for an acceptance.
fn choose_plan(patterns: &LearnedPatterns, proposal: &ProposalData) -> Result<FinalPlanData> {
    let score = scoring::score_proposal(patterns, proposal)
        .ok_or_else(|| ParleyError::invalid_message("cannot accept an empty proposal"))?;
    Ok(FinalPlanData {
        time_slot: proposal.time_slots[score.best_slot],
        venue: proposal.venues[score.best_venue].clone(),
    })
}
