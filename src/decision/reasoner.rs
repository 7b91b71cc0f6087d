//! Optional LLM consultation for ambiguous proposals.
//!
//! The reasoner is a remote endpoint that receives an anonymized summary of
//! the proposal and the learned profile and returns a structured verdict.
//! Everything sent over the wire is stripped of identifiers first: venue
//! categories instead of venue ids, weekday and hour buckets instead of
//! raw calendar data, and never a peer id. A reasoner outage, a malformed
//! reply, or an exhausted call budget all degrade to the local heuristic.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{Datelike, Timelike};
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ReasonerConfig;
use crate::preferences::LearnedPatterns;
use crate::protocol::ProposalData;
use crate::veto::weekday_name;

use super::DecisionAction;

/// How many profile entries the prompt summarizes per dimension.
const PROMPT_TOP_ENTRIES: usize = 3;

/// Reasoner-path failures. Every variant falls back to the heuristic.
#[derive(Debug, Error)]
pub enum ReasonerError {
    /// Endpoint or client configuration is unusable.
    #[error("Reasoner misconfigured: {0}")]
    Misconfigured(String),

    /// The daily call budget is spent.
    #[error("Reasoner daily call budget of {0} exhausted")]
    RateLimitExceeded(u32),

    /// Transport-level failure reaching the endpoint.
    #[error("Reasoner network error: {0}")]
    Network(String),

    /// The endpoint did not answer in time.
    #[error("Reasoner request timed out")]
    Timeout,

    /// The endpoint answered with something we cannot use.
    #[error("Malformed reasoner response: {0}")]
    Parse(String),
}

/// Structured verdict returned by a reasoner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasonerVerdict {
    /// What the reasoner recommends.
    pub decision: DecisionAction,
    /// Reasoner's own confidence in `[0, 1]`.
    pub confidence: f64,
    /// Free-text justification.
    pub reason: String,
    /// Alternative slots and venue categories for a counter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alternatives: Option<ReasonerAlternatives>,
}

/// Alternatives as the reasoner expresses them: ISO 8601 start times and
/// venue categories, still anonymized.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReasonerAlternatives {
    #[serde(default)]
    pub time_slots: Vec<String>,
    #[serde(default)]
    pub venues: Vec<String>,
}

impl ReasonerVerdict {
    /// Reject verdicts whose confidence is outside `[0, 1]`.
    pub fn validate(&self) -> Result<(), ReasonerError> {
        if !self.confidence.is_finite() || !(0.0..=1.0).contains(&self.confidence) {
            return Err(ReasonerError::Parse(format!(
                "confidence {} outside [0, 1]",
                self.confidence
            )));
        }
        Ok(())
    }
}

/// A consultable reasoner. Implementations must be safe to share across
/// tasks; tests substitute scripted ones.
#[async_trait]
pub trait ReasoningProvider: Send + Sync {
    /// Evaluate an anonymized prompt and return a verdict.
    async fn evaluate(&self, prompt: &str) -> Result<ReasonerVerdict, ReasonerError>;
}

#[derive(Serialize)]
struct ReasonerRequest<'a> {
    prompt: &'a str,
}

/// Reasoner backed by an HTTP endpoint speaking JSON.
pub struct HttpReasoner {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<Secret<String>>,
}

impl HttpReasoner {
    /// Build a client for `endpoint` with the given request timeout.
    pub fn new(
        endpoint: impl Into<String>,
        api_key: Option<Secret<String>>,
        timeout: Duration,
    ) -> Result<Self, ReasonerError> {
        let endpoint = endpoint.into();
        if endpoint.is_empty() {
            return Err(ReasonerError::Misconfigured(
                "reasoner endpoint is empty".to_string(),
            ));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ReasonerError::Misconfigured(format!("HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint,
            api_key,
        })
    }

    /// Build from configuration. `Ok(None)` when consultation is disabled.
    pub fn from_config(config: &ReasonerConfig) -> Result<Option<Self>, ReasonerError> {
        if !config.enabled {
            return Ok(None);
        }
        Self::new(
            config.endpoint.clone(),
            config.api_key.clone(),
            Duration::from_secs(config.timeout_secs),
        )
        .map(Some)
    }
}

impl std::fmt::Debug for HttpReasoner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpReasoner")
            .field("endpoint", &self.endpoint)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

#[async_trait]
impl ReasoningProvider for HttpReasoner {
    async fn evaluate(&self, prompt: &str) -> Result<ReasonerVerdict, ReasonerError> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .json(&ReasonerRequest { prompt });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key.expose_secret());
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ReasonerError::Timeout
            } else {
                ReasonerError::Network(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ReasonerError::Network(format!(
                "reasoner returned HTTP {status}"
            )));
        }

        let verdict: ReasonerVerdict = response
            .json()
            .await
            .map_err(|e| ReasonerError::Parse(e.to_string()))?;
        verdict.validate()?;
        Ok(verdict)
    }
}

/// Render a proposal and profile as an anonymized prompt.
///
/// Contains weekday/hour buckets, durations, venue categories, aggregate
/// scores, and the negotiation count. Must never contain venue ids, venue
/// names, peer ids, or anything else that identifies a party or place.
pub fn build_anonymized_prompt(proposal: &ProposalData, patterns: &LearnedPatterns) -> String {
    let mut prompt = String::from(
        "You are a scheduling assistant deciding how to respond to a meeting proposal.\n\
         \nProposed slots:\n",
    );

    for slot in &proposal.time_slots {
        prompt.push_str(&format!(
            "- {} at {:02}:{:02}, {} minutes\n",
            weekday_name(slot.start.weekday()),
            slot.start.hour(),
            slot.start.minute(),
            slot.duration_minutes()
        ));
    }

    let mut categories: Vec<&str> = Vec::new();
    for venue in &proposal.venues {
        if !categories.contains(&venue.category.as_str()) {
            categories.push(&venue.category);
        }
    }
    prompt.push_str(&format!(
        "\nProposed venue categories: {}\n",
        categories.join(", ")
    ));

    prompt.push_str(&format!(
        "\nUser profile (anonymous, {} past negotiations):\n",
        patterns.negotiation_count
    ));

    let top_categories = top_by_score(
        patterns
            .category_scores
            .iter()
            .map(|(name, score)| (name.clone(), *score)),
    );
    if !top_categories.is_empty() {
        let rendered: Vec<String> = top_categories
            .iter()
            .map(|(name, score)| format!("{name} ({score:.2})"))
            .collect();
        prompt.push_str(&format!("- preferred categories: {}\n", rendered.join(", ")));
    }

    let top_hours = top_by_score(
        patterns
            .hour_scores
            .iter()
            .map(|(hour, score)| (format!("{hour:02}:00"), *score)),
    );
    if !top_hours.is_empty() {
        let rendered: Vec<String> = top_hours
            .iter()
            .map(|(hour, score)| format!("{hour} ({score:.2})"))
            .collect();
        prompt.push_str(&format!("- preferred hours: {}\n", rendered.join(", ")));
    }

    prompt.push_str(
        "\nRespond with JSON only: {\"decision\": \"accept\"|\"counter\"|\"escalate\", \
         \"confidence\": <0.0-1.0>, \"reason\": \"<one sentence>\", \
         \"alternatives\": {\"time_slots\": [\"<ISO 8601>\"], \"venues\": [\"<category>\"]}}\n",
    );

    prompt
}

fn top_by_score(entries: impl Iterator<Item = (String, f64)>) -> Vec<(String, f64)> {
    let mut entries: Vec<(String, f64)> = entries.collect();
    entries.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.0.cmp(&b.0))
    });
    entries.truncate(PROMPT_TOP_ENTRIES);
    entries
}
