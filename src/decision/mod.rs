//! Proposal evaluation pipeline.
//!
//! Every incoming proposal runs through three stages, strictest first:
//!
//! | Stage | Source | Outcome |
//! |-------|--------|---------|
//! | Veto rules | [`crate::veto`] | Hard escalation, nothing overrides it |
//! | Reasoner | remote LLM, optional | Verdict, budgeted and cached |
//! | Heuristic | [`scoring`] | Threshold decision, always available |
//!
//! The reasoner stage is best-effort by construction. A cache hit skips the
//! call, an exhausted budget, timeout, transport failure, or malformed
//! verdict all fall through to the heuristic, and an engine without a
//! reasoner configured is simply a two-stage pipeline. `evaluate` therefore
//! never fails: the worst possible outcome is an escalation to the human.

pub mod cache;
pub mod reasoner;
pub mod scoring;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::preferences::AgentPreferences;
use crate::protocol::{ProposalData, TimeSlot, VenueOption};
use crate::veto::{CalendarConflicts, VetoEngine};

pub use cache::{verdict_cache_key, ReasonerGate, DAILY_CALL_LIMIT, DECISION_CACHE_TTL_SECS};
pub use reasoner::{
    build_anonymized_prompt, HttpReasoner, ReasonerAlternatives, ReasonerError, ReasonerVerdict,
    ReasoningProvider,
};
pub use scoring::{
    heuristic_decision, score_hour, score_proposal, score_venue, synthesize_alternatives,
    ProposalScore, CATEGORY_FALLBACK_WEIGHT, NEIGHBOR_HOUR_WEIGHT, NEUTRAL_SCORE,
};

/// Slots offered in a synthesized counter-proposal.
pub const DEFAULT_COUNTER_SLOTS: usize = 3;

/// Seconds before an in-flight reasoner call is abandoned.
pub const REASONER_TIMEOUT_SECS: u64 = 20;

/// Minutes assumed for reasoner-suggested slots, which carry no duration.
const DEFAULT_ALTERNATIVE_MINUTES: u32 = 60;

/// What the agent does with a proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionAction {
    /// Commit to one of the offered slot/venue pairs.
    Accept,
    /// Push back with alternatives.
    Counter,
    /// Hand the decision to the human.
    Escalate,
}

impl DecisionAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionAction::Accept => "accept",
            DecisionAction::Counter => "counter",
            DecisionAction::Escalate => "escalate",
        }
    }
}

impl std::fmt::Display for DecisionAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Replacement slots and venues attached to a counter decision.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SuggestedAlternatives {
    pub time_slots: Vec<TimeSlot>,
    pub venues: Vec<VenueOption>,
}

/// Outcome of evaluating one proposal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDecision {
    /// The chosen action.
    pub action: DecisionAction,
    /// Confidence in `[0, 1]`; zero for forced escalations.
    pub confidence: f64,
    /// Why, suitable for showing to the human.
    pub reasoning: String,
    /// Alternatives to embed in a counter, if the action is `Counter`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_alternatives: Option<SuggestedAlternatives>,
}

impl AgentDecision {
    /// A zero-confidence escalation with the given reason.
    pub fn escalate(reason: impl Into<String>) -> Self {
        Self {
            action: DecisionAction::Escalate,
            confidence: 0.0,
            reasoning: reason.into(),
            suggested_alternatives: None,
        }
    }
}

/// The three-stage evaluation pipeline.
pub struct DecisionEngine {
    veto: VetoEngine,
    reasoner: Option<Arc<dyn ReasoningProvider>>,
    gate: ReasonerGate,
    reasoner_timeout: Duration,
    counter_slots: usize,
}

impl Default for DecisionEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl DecisionEngine {
    /// Engine with no calendar source and no reasoner.
    pub fn new() -> Self {
        Self {
            veto: VetoEngine::new(),
            reasoner: None,
            gate: ReasonerGate::default(),
            reasoner_timeout: Duration::from_secs(REASONER_TIMEOUT_SECS),
            counter_slots: DEFAULT_COUNTER_SLOTS,
        }
    }

    /// Attach a calendar source for `require_calendar_free` rules.
    pub fn with_calendar(mut self, calendar: Arc<dyn CalendarConflicts>) -> Self {
        self.veto = VetoEngine::with_calendar(calendar);
        self
    }

    /// Attach a reasoner for the middle stage.
    pub fn with_reasoner(mut self, reasoner: Arc<dyn ReasoningProvider>) -> Self {
        self.reasoner = Some(reasoner);
        self
    }

    /// Replace the default call budget and cache TTL.
    pub fn with_reasoner_limits(mut self, cache_ttl: Duration, daily_limit: u32) -> Self {
        self.gate = ReasonerGate::new(cache_ttl, daily_limit);
        self
    }

    /// Replace the default reasoner timeout.
    pub fn with_reasoner_timeout(mut self, timeout: Duration) -> Self {
        self.reasoner_timeout = timeout;
        self
    }

    /// Replace the default number of synthesized counter slots.
    pub fn with_counter_slots(mut self, counter_slots: usize) -> Self {
        self.counter_slots = counter_slots.max(1);
        self
    }

    /// Remote calls spent today, for status surfaces.
    pub async fn reasoner_calls_today(&self) -> u32 {
        self.gate.calls_today().await
    }

    /// Evaluate a proposal from `peer_id` on behalf of `user_id`.
    ///
    /// Infallible: every internal failure degrades toward the heuristic,
    /// and an unevaluable proposal escalates.
    pub async fn evaluate(
        &self,
        user_id: &str,
        peer_id: &str,
        proposal: &ProposalData,
        prefs: &AgentPreferences,
    ) -> AgentDecision {
        if proposal.time_slots.is_empty() || proposal.venues.is_empty() {
            return AgentDecision::escalate("proposal has no time slots or venues to evaluate");
        }

        if let Some(violation) = self.check_vetoes(peer_id, proposal, prefs).await {
            return violation;
        }

        if let Some(decision) = self.consult_reasoner(user_id, proposal, prefs).await {
            return decision;
        }

        heuristic_decision(
            &prefs.learned,
            &prefs.autonomy,
            proposal,
            self.counter_slots,
        )
    }

    /// Stage one: every slot/venue combination must clear the veto rules.
    async fn check_vetoes(
        &self,
        peer_id: &str,
        proposal: &ProposalData,
        prefs: &AgentPreferences,
    ) -> Option<AgentDecision> {
        let peers = [peer_id.to_string()];
        for slot in &proposal.time_slots {
            for venue in &proposal.venues {
                if let Some(violation) = self
                    .veto
                    .check(
                        slot.start,
                        slot.duration_minutes(),
                        &venue.id,
                        &peers,
                        &prefs.veto_rules,
                    )
                    .await
                {
                    tracing::info!(
                        rule = %violation.rule,
                        venue = %venue.id,
                        "proposal vetoed"
                    );
                    return Some(AgentDecision::escalate(format!(
                        "veto rule violated: {}",
                        violation.reason
                    )));
                }
            }
        }
        None
    }

    /// Stage two: consult the reasoner if one is configured.
    ///
    /// `None` means the heuristic should decide instead.
    async fn consult_reasoner(
        &self,
        user_id: &str,
        proposal: &ProposalData,
        prefs: &AgentPreferences,
    ) -> Option<AgentDecision> {
        let reasoner = self.reasoner.as_ref()?;

        let key = verdict_cache_key(user_id, proposal);
        if let Some(cached) = self.gate.cached(&key).await {
            tracing::debug!("reasoner cache hit");
            return Some(cached);
        }

        if let Err(e) = self.gate.try_acquire().await {
            tracing::warn!("reasoner budget exhausted, using heuristic: {e}");
            return None;
        }

        let prompt = build_anonymized_prompt(proposal, &prefs.learned);
        let verdict = match tokio::time::timeout(self.reasoner_timeout, reasoner.evaluate(&prompt))
            .await
        {
            Err(_) => {
                tracing::warn!(
                    timeout_secs = self.reasoner_timeout.as_secs(),
                    "reasoner timed out, using heuristic"
                );
                return None;
            },
            Ok(Err(e)) => {
                tracing::warn!("reasoner failed, using heuristic: {e}");
                return None;
            },
            Ok(Ok(verdict)) => verdict,
        };

        let decision = self.decision_from_verdict(verdict);
        self.gate.store(key, decision.clone()).await;
        Some(decision)
    }

    /// Translate a reasoner verdict into a decision, parsing its suggested
    /// slots leniently: unparseable timestamps are dropped, not fatal.
    fn decision_from_verdict(&self, verdict: ReasonerVerdict) -> AgentDecision {
        let suggested = verdict.alternatives.and_then(|alternatives| {
            let time_slots: Vec<TimeSlot> = alternatives
                .time_slots
                .iter()
                .filter_map(|raw| match DateTime::parse_from_rfc3339(raw) {
                    Ok(start) => Some(TimeSlot::of_minutes(
                        start.with_timezone(&Utc),
                        DEFAULT_ALTERNATIVE_MINUTES,
                    )),
                    Err(e) => {
                        tracing::warn!("dropping unparseable reasoner slot {raw:?}: {e}");
                        None
                    },
                })
                .collect();
            let venues: Vec<VenueOption> = alternatives
                .venues
                .iter()
                .map(|category| VenueOption::new(category.clone(), category.clone()))
                .collect();

            if time_slots.is_empty() && venues.is_empty() {
                None
            } else {
                Some(SuggestedAlternatives { time_slots, venues })
            }
        });

        AgentDecision {
            action: verdict.decision,
            confidence: verdict.confidence,
            reasoning: verdict.reason,
            suggested_alternatives: suggested,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preferences::LearnedPatterns;
    use crate::veto::VetoRule;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct ScriptedReasoner {
        verdict: fn() -> Result<ReasonerVerdict, ReasonerError>,
        calls: AtomicU32,
    }

    impl ScriptedReasoner {
        fn new(verdict: fn() -> Result<ReasonerVerdict, ReasonerError>) -> Arc<Self> {
            Arc::new(Self {
                verdict,
                calls: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ReasoningProvider for ScriptedReasoner {
        async fn evaluate(&self, _prompt: &str) -> Result<ReasonerVerdict, ReasonerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            (self.verdict)()
        }
    }

    struct SlowReasoner;

    #[async_trait]
    impl ReasoningProvider for SlowReasoner {
        async fn evaluate(&self, _prompt: &str) -> Result<ReasonerVerdict, ReasonerError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(accept_verdict())
        }
    }

    fn accept_verdict() -> ReasonerVerdict {
        ReasonerVerdict {
            decision: DecisionAction::Accept,
            confidence: 0.97,
            reason: "matches every learned habit".to_string(),
            alternatives: None,
        }
    }

    fn proposal_at(hour: u32, venue: &str) -> ProposalData {
        ProposalData::new(
            vec![TimeSlot::of_minutes(
                Utc.with_ymd_and_hms(2025, 6, 14, hour, 30, 0).unwrap(),
                60,
            )],
            vec![VenueOption::new(venue, "coffee")],
        )
    }

    fn warm_prefs() -> AgentPreferences {
        let mut prefs = AgentPreferences::default();
        let mut learned = LearnedPatterns::default();
        learned.venue_scores.insert("cafe-blue".to_string(), 0.95);
        learned.hour_scores.insert(10, 1.0);
        learned.negotiation_count = 20;
        prefs.learned = learned;
        prefs
    }

    #[tokio::test]
    async fn test_heuristic_accepts_warm_match() {
        let engine = DecisionEngine::new();
        let decision = engine
            .evaluate("alice", "bob", &proposal_at(10, "cafe-blue"), &warm_prefs())
            .await;

        assert_eq!(decision.action, DecisionAction::Accept);
        assert!(decision.confidence >= 0.8);
    }

    #[tokio::test]
    async fn test_veto_overrides_high_score() {
        let mut prefs = warm_prefs();
        prefs.veto_rules = vec![VetoRule::never_after_hour(9).unwrap()];

        let engine = DecisionEngine::new();
        let decision = engine
            .evaluate("alice", "bob", &proposal_at(10, "cafe-blue"), &prefs)
            .await;

        assert_eq!(decision.action, DecisionAction::Escalate);
        assert_eq!(decision.confidence, 0.0);
        assert!(decision.reasoning.contains("veto rule violated"));
    }

    #[tokio::test]
    async fn test_empty_proposal_escalates() {
        let engine = DecisionEngine::new();
        let decision = engine
            .evaluate(
                "alice",
                "bob",
                &ProposalData::new(vec![], vec![]),
                &AgentPreferences::default(),
            )
            .await;

        assert_eq!(decision.action, DecisionAction::Escalate);
        assert_eq!(decision.confidence, 0.0);
    }

    #[tokio::test]
    async fn test_counter_carries_alternatives() {
        let mut prefs = AgentPreferences::default();
        prefs.learned.venue_scores.insert("cafe-blue".to_string(), 0.6);
        prefs.learned.hour_scores.insert(10, 1.0);
        prefs.learned.hour_scores.insert(16, 0.9);

        // Venue 0.6 * hour 1.0 = 0.6: counter range
        let engine = DecisionEngine::new();
        let decision = engine
            .evaluate("alice", "bob", &proposal_at(10, "cafe-blue"), &prefs)
            .await;

        assert_eq!(decision.action, DecisionAction::Counter);
        let alternatives = decision.suggested_alternatives.unwrap();
        assert!(!alternatives.time_slots.is_empty());
        assert_eq!(alternatives.venues[0].id, "cafe-blue");
    }

    #[tokio::test]
    async fn test_reasoner_verdict_wins_and_is_cached() {
        let reasoner = ScriptedReasoner::new(|| Ok(accept_verdict()));
        let engine = DecisionEngine::new().with_reasoner(reasoner.clone());
        let prefs = AgentPreferences::default();
        let proposal = proposal_at(10, "cafe-blue");

        let first = engine.evaluate("alice", "bob", &proposal, &prefs).await;
        assert_eq!(first.action, DecisionAction::Accept);
        assert!((first.confidence - 0.97).abs() < 1e-9);

        // Same proposal again: cache hit, no second call
        let second = engine.evaluate("alice", "bob", &proposal, &prefs).await;
        assert_eq!(second.action, DecisionAction::Accept);
        assert_eq!(reasoner.calls(), 1);
        assert_eq!(engine.reasoner_calls_today().await, 1);
    }

    #[tokio::test]
    async fn test_reasoner_failure_falls_back_to_heuristic() {
        let reasoner =
            ScriptedReasoner::new(|| Err(ReasonerError::Network("connection refused".into())));
        let engine = DecisionEngine::new().with_reasoner(reasoner.clone());

        let decision = engine
            .evaluate("alice", "bob", &proposal_at(10, "cafe-blue"), &warm_prefs())
            .await;

        // Heuristic outcome for the warm profile
        assert_eq!(decision.action, DecisionAction::Accept);
        assert_eq!(reasoner.calls(), 1);
    }

    #[tokio::test]
    async fn test_invalid_verdict_falls_back_to_heuristic() {
        let reasoner = ScriptedReasoner::new(|| {
            Err(ReasonerError::Parse("confidence 2.0 outside [0, 1]".into()))
        });
        let engine = DecisionEngine::new().with_reasoner(reasoner);

        let decision = engine
            .evaluate("alice", "bob", &proposal_at(10, "cafe-blue"), &warm_prefs())
            .await;
        assert_eq!(decision.action, DecisionAction::Accept);
    }

    #[tokio::test]
    async fn test_exhausted_budget_falls_back_without_calling() {
        let reasoner = ScriptedReasoner::new(|| Ok(accept_verdict()));
        let engine = DecisionEngine::new()
            .with_reasoner(reasoner.clone())
            .with_reasoner_limits(Duration::from_secs(3600), 1);

        engine
            .evaluate("alice", "bob", &proposal_at(10, "cafe-blue"), &warm_prefs())
            .await;
        assert_eq!(reasoner.calls(), 1);

        // Different proposal misses the cache; budget is spent
        let decision = engine
            .evaluate("alice", "bob", &proposal_at(16, "bar-nine"), &warm_prefs())
            .await;
        assert_eq!(reasoner.calls(), 1);
        // Bar at 16:30 is unknown: 0.5 * neutral-ish hour, heuristic escalates
        assert_eq!(decision.action, DecisionAction::Escalate);
    }

    #[tokio::test]
    async fn test_slow_reasoner_times_out_to_heuristic() {
        let engine = DecisionEngine::new()
            .with_reasoner(Arc::new(SlowReasoner))
            .with_reasoner_timeout(Duration::from_millis(10));

        let decision = engine
            .evaluate("alice", "bob", &proposal_at(10, "cafe-blue"), &warm_prefs())
            .await;
        assert_eq!(decision.action, DecisionAction::Accept);
    }

    #[tokio::test]
    async fn test_verdict_alternatives_become_slots_and_categories() {
        let reasoner = ScriptedReasoner::new(|| {
            Ok(ReasonerVerdict {
                decision: DecisionAction::Counter,
                confidence: 0.7,
                reason: "mornings fit better".to_string(),
                alternatives: Some(ReasonerAlternatives {
                    time_slots: vec![
                        "2025-06-14T10:00:00Z".to_string(),
                        "not-a-timestamp".to_string(),
                    ],
                    venues: vec!["coffee".to_string()],
                }),
            })
        });
        let engine = DecisionEngine::new().with_reasoner(reasoner);

        let decision = engine
            .evaluate(
                "alice",
                "bob",
                &proposal_at(19, "cafe-blue"),
                &AgentPreferences::default(),
            )
            .await;

        assert_eq!(decision.action, DecisionAction::Counter);
        let alternatives = decision.suggested_alternatives.unwrap();
        // The malformed timestamp is dropped, the valid one survives
        assert_eq!(alternatives.time_slots.len(), 1);
        assert_eq!(
            alternatives.time_slots[0].start,
            Utc.with_ymd_and_hms(2025, 6, 14, 10, 0, 0).unwrap()
        );
        assert_eq!(alternatives.venues[0].category, "coffee");
    }
}
