//! User preference model.
//!
//! Holds everything an agent knows about its user: learned scheduling
//! patterns, hard veto rules, and the autonomy settings that decide how
//! far the agent may act alone. Preferences never leave the device in
//! plaintext; [`store::PreferenceSync`] encrypts them under the user's
//! master key before upload.

pub mod learning;
pub mod store;

pub use learning::{confidence, update_from_history, LEARNING_RATE};
pub use store::{MemoryPreferenceStore, PreferenceRecord, PreferenceStore, PreferenceSync, StoreError};

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::veto::VetoRule;

/// Invalid autonomy settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// A threshold is outside `[0, 1]`.
    #[error("{name} must be within [0, 1], got {value}")]
    ThresholdOutOfRange {
        /// Which threshold.
        name: &'static str,
        /// Offending value.
        value: f64,
    },

    /// Accept threshold below counter threshold.
    #[error("auto_accept_threshold ({accept}) must be >= auto_counter_threshold ({counter})")]
    ThresholdOrder {
        /// Accept threshold.
        accept: f64,
        /// Counter threshold.
        counter: f64,
    },

    /// Negotiations need at least one round.
    #[error("max_negotiation_rounds must be at least 1")]
    ZeroRounds,
}

/// How much latitude the agent has before pulling the user back in.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AutonomySettings {
    /// Score at or above which the agent accepts on its own.
    pub auto_accept_threshold: f64,
    /// Score at or above which the agent counters instead of escalating.
    pub auto_counter_threshold: f64,
    /// Rounds after which the negotiation goes to the human regardless.
    pub max_negotiation_rounds: u32,
    /// Overall appetite for autonomous action, `0.0` (none) to `1.0` (full).
    pub global_autonomy_level: f64,
}

impl Default for AutonomySettings {
    fn default() -> Self {
        Self {
            auto_accept_threshold: 0.8,
            auto_counter_threshold: 0.5,
            max_negotiation_rounds: 5,
            global_autonomy_level: 0.7,
        }
    }
}

impl AutonomySettings {
    /// Check internal consistency.
    pub fn validate(&self) -> Result<(), SettingsError> {
        for (name, value) in [
            ("auto_accept_threshold", self.auto_accept_threshold),
            ("auto_counter_threshold", self.auto_counter_threshold),
            ("global_autonomy_level", self.global_autonomy_level),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(SettingsError::ThresholdOutOfRange { name, value });
            }
        }
        if self.auto_accept_threshold < self.auto_counter_threshold {
            return Err(SettingsError::ThresholdOrder {
                accept: self.auto_accept_threshold,
                counter: self.auto_counter_threshold,
            });
        }
        if self.max_negotiation_rounds == 0 {
            return Err(SettingsError::ZeroRounds);
        }
        Ok(())
    }
}

/// Scheduling patterns learned from confirmed negotiations.
///
/// All scores live in `[0, 1]`; higher means the user has accepted that
/// venue, hour, or category more often.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LearnedPatterns {
    /// Per-venue acceptance scores, keyed by venue id.
    pub venue_scores: HashMap<String, f64>,
    /// Per-hour acceptance scores, keyed by hour of day (0-23).
    pub hour_scores: HashMap<u8, f64>,
    /// Per-category acceptance scores (e.g. "coffee", "dinner").
    pub category_scores: HashMap<String, f64>,
    /// Typical meeting length per category, in minutes.
    pub preferred_durations: HashMap<String, u32>,
    /// How often negotiations with each peer have concluded well.
    pub peer_affinity: HashMap<String, f64>,
    /// Total confirmed negotiations folded into these patterns.
    pub negotiation_count: u32,
    /// When the patterns last changed.
    pub last_updated: DateTime<Utc>,
}

impl Default for LearnedPatterns {
    fn default() -> Self {
        Self {
            venue_scores: HashMap::new(),
            hour_scores: HashMap::new(),
            category_scores: HashMap::new(),
            preferred_durations: HashMap::new(),
            peer_affinity: HashMap::new(),
            negotiation_count: 0,
            last_updated: Utc::now(),
        }
    }
}

/// One negotiation outcome, as fed back into learning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConfirmedNegotiation {
    /// Peer the meeting was negotiated with.
    pub peer_id: String,
    /// Venue that was agreed.
    pub venue_id: String,
    /// Category of the agreed venue.
    pub venue_category: String,
    /// Agreed start time.
    pub started_at: DateTime<Utc>,
    /// Agreed length in minutes.
    pub duration_minutes: u32,
    /// Whether the meeting actually happened. Unconfirmed entries are
    /// ignored by learning.
    pub confirmed: bool,
}

/// Everything the agent knows about its user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AgentPreferences {
    /// Learned scheduling patterns.
    pub learned: LearnedPatterns,
    /// Hard constraints checked before any scoring.
    pub veto_rules: Vec<VetoRule>,
    /// Autonomy thresholds and limits.
    pub autonomy: AutonomySettings,
}

impl AgentPreferences {
    /// Validate settings and every veto rule.
    pub fn validate(&self) -> crate::error::Result<()> {
        self.autonomy.validate()?;
        for rule in &self.veto_rules {
            rule.constraint().validate()?;
        }
        Ok(())
    }
}
