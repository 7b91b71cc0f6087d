//! Heuristic proposal scoring.
//!
//! The pure fallback path: no network, no cache, no clock. Everything here
//! is a function of the learned patterns and the proposal, which keeps the
//! whole heuristic unit-testable in isolation.

use chrono::Timelike;

use super::{AgentDecision, DecisionAction, SuggestedAlternatives};
use crate::preferences::{AutonomySettings, LearnedPatterns};
use crate::protocol::{ProposalData, TimeSlot, VenueOption};

/// Score for venues and hours the profile knows nothing about.
pub const NEUTRAL_SCORE: f64 = 0.5;

/// Weight applied when falling back from a venue to its category.
pub const CATEGORY_FALLBACK_WEIGHT: f64 = 0.8;

/// Weight applied when estimating an unseen hour from its neighbors.
pub const NEIGHBOR_HOUR_WEIGHT: f64 = 0.8;

/// Score one venue against the profile.
///
/// Exact venue hit wins; otherwise the venue's category score at reduced
/// weight; otherwise neutral.
pub fn score_venue(patterns: &LearnedPatterns, venue: &VenueOption) -> f64 {
    if let Some(score) = patterns.venue_scores.get(&venue.id) {
        return *score;
    }
    if let Some(score) = patterns.category_scores.get(&venue.category) {
        return score * CATEGORY_FALLBACK_WEIGHT;
    }
    NEUTRAL_SCORE
}

/// Score one start hour against the profile.
///
/// Exact hour hit wins; otherwise the mean of whichever neighboring hours
/// are known, at reduced weight; otherwise neutral.
pub fn score_hour(patterns: &LearnedPatterns, hour: u8) -> f64 {
    if let Some(score) = patterns.hour_scores.get(&hour) {
        return *score;
    }

    let before = (hour + 23) % 24;
    let after = (hour + 1) % 24;
    let neighbors: Vec<f64> = [before, after]
        .iter()
        .filter_map(|h| patterns.hour_scores.get(h).copied())
        .collect();

    if neighbors.is_empty() {
        NEUTRAL_SCORE
    } else {
        let mean = neighbors.iter().sum::<f64>() / neighbors.len() as f64;
        mean * NEIGHBOR_HOUR_WEIGHT
    }
}

/// Per-candidate scores plus the combined result.
#[derive(Debug, Clone)]
pub struct ProposalScore {
    /// Combined score in `[0, 1]`.
    pub overall: f64,
    /// Index of the best-scoring venue in the proposal.
    pub best_venue: usize,
    /// Index of the best-scoring slot in the proposal.
    pub best_slot: usize,
    /// Score per proposed venue, same order as the proposal.
    pub venue_scores: Vec<f64>,
    /// Score per proposed slot, same order as the proposal.
    pub slot_scores: Vec<f64>,
}

/// Score a whole proposal. `None` when there is nothing to score.
///
/// The combined score multiplies the best venue score by the best hour
/// score even when they come from different candidates.
// TODO: score (slot, venue) pairs jointly so one great venue cannot mask
// that every offered pairing is mediocre.
pub fn score_proposal(patterns: &LearnedPatterns, proposal: &ProposalData) -> Option<ProposalScore> {
    if proposal.time_slots.is_empty() || proposal.venues.is_empty() {
        return None;
    }

    let venue_scores: Vec<f64> = proposal
        .venues
        .iter()
        .map(|venue| score_venue(patterns, venue))
        .collect();
    let slot_scores: Vec<f64> = proposal
        .time_slots
        .iter()
        .map(|slot| score_hour(patterns, slot.start.hour() as u8))
        .collect();

    let best_venue = index_of_max(&venue_scores);
    let best_slot = index_of_max(&slot_scores);

    Some(ProposalScore {
        overall: venue_scores[best_venue] * slot_scores[best_slot],
        best_venue,
        best_slot,
        venue_scores,
        slot_scores,
    })
}

fn index_of_max(scores: &[f64]) -> usize {
    let mut best = 0;
    for (index, score) in scores.iter().enumerate() {
        if *score > scores[best] {
            best = index;
        }
    }
    best
}

/// Map a proposal to a decision using thresholds alone.
///
/// At or above the accept threshold the proposal is accepted; at or above
/// the counter threshold alternatives are proposed; below that the human
/// decides. Confidence is the combined score itself.
pub fn heuristic_decision(
    patterns: &LearnedPatterns,
    autonomy: &AutonomySettings,
    proposal: &ProposalData,
    counter_slots: usize,
) -> AgentDecision {
    let Some(score) = score_proposal(patterns, proposal) else {
        return AgentDecision::escalate("proposal has no time slots or venues to evaluate");
    };

    if score.overall >= autonomy.auto_accept_threshold {
        AgentDecision {
            action: DecisionAction::Accept,
            confidence: score.overall,
            reasoning: format!(
                "venue and time match learned preferences (score {:.2})",
                score.overall
            ),
            suggested_alternatives: None,
        }
    } else if score.overall >= autonomy.auto_counter_threshold {
        let alternatives = synthesize_alternatives(patterns, proposal, counter_slots);
        AgentDecision {
            action: DecisionAction::Counter,
            confidence: score.overall,
            reasoning: format!(
                "partial preference match (score {:.2}), proposing alternatives",
                score.overall
            ),
            suggested_alternatives: Some(alternatives),
        }
    } else {
        AgentDecision {
            action: DecisionAction::Escalate,
            confidence: score.overall,
            reasoning: format!(
                "score {:.2} is below the counter threshold {:.2}",
                score.overall, autonomy.auto_counter_threshold
            ),
            suggested_alternatives: None,
        }
    }
}

/// Build replacement slots and a venue for a counter-proposal.
///
/// Slots are centered on the profile's best hours, on the same day as the
/// earliest offered slot; the venue is the best-scoring one offered. With
/// no learned hours at all the earliest offered slot is kept as the only
/// alternative.
pub fn synthesize_alternatives(
    patterns: &LearnedPatterns,
    proposal: &ProposalData,
    max_slots: usize,
) -> SuggestedAlternatives {
    let earliest = proposal
        .time_slots
        .iter()
        .min_by_key(|slot| slot.start)
        .copied();

    let venues = match proposal
        .venues
        .iter()
        .max_by(|a, b| {
            score_venue(patterns, a)
                .partial_cmp(&score_venue(patterns, b))
                .unwrap_or(std::cmp::Ordering::Equal)
        }) {
        Some(best) => vec![best.clone()],
        None => Vec::new(),
    };

    let duration = venues
        .first()
        .and_then(|venue| patterns.preferred_durations.get(&venue.category).copied())
        .or_else(|| {
            earliest
                .map(|slot| slot.duration_minutes())
                .filter(|minutes| *minutes > 0)
        })
        .unwrap_or(60);

    let mut preferred_hours: Vec<(u8, f64)> = patterns
        .hour_scores
        .iter()
        .map(|(hour, score)| (*hour, *score))
        .collect();
    preferred_hours.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.0.cmp(&b.0))
    });

    let time_slots: Vec<TimeSlot> = match earliest {
        Some(anchor) if !preferred_hours.is_empty() => preferred_hours
            .iter()
            .take(max_slots)
            .filter_map(|(hour, _)| {
                anchor
                    .start
                    .date_naive()
                    .and_hms_opt(u32::from(*hour), 0, 0)
                    .map(|naive| TimeSlot::of_minutes(naive.and_utc(), duration))
            })
            .collect(),
        Some(anchor) => vec![anchor],
        None => Vec::new(),
    };

    SuggestedAlternatives { time_slots, venues }
}
