//! Pattern learning from negotiation history.
//!
//! Each batch of confirmed negotiations is reduced to frequency scores
//! (what fraction of the batch used this venue, hour, category, peer) and
//! folded into the prior patterns with an exponential moving average, so
//! recent behavior shifts the profile without erasing it.

use std::collections::HashMap;
use std::hash::Hash;

use chrono::{Timelike, Utc};

use super::{ConfirmedNegotiation, LearnedPatterns};

/// EMA weight given to the newest batch.
pub const LEARNING_RATE: f64 = 0.3;

/// Below this many confirmed negotiations the profile is considered cold.
pub const MIN_SAMPLES: u32 = 5;

/// At this many samples the profile counts as established.
pub const ESTABLISHED_SAMPLES: u32 = 20;

/// Additional samples beyond established to reach full confidence.
pub const MATURITY_SPAN: u32 = 30;

/// Fold a batch of history into prior patterns, returning the merged result.
///
/// Only entries with `confirmed == true` contribute. Keys already present
/// in the prior move by `LEARNING_RATE` toward the batch frequency;
/// first-sighted keys take the batch frequency directly. Preferred
/// durations use a plain mean of old and new instead of an EMA.
pub fn update_from_history(
    history: &[ConfirmedNegotiation],
    prior: &LearnedPatterns,
) -> LearnedPatterns {
    let confirmed: Vec<&ConfirmedNegotiation> = history.iter().filter(|n| n.confirmed).collect();

    let mut next = prior.clone();
    next.last_updated = Utc::now();
    if confirmed.is_empty() {
        return next;
    }
    let total = confirmed.len() as f64;

    let mut venue_freq: HashMap<String, f64> = HashMap::new();
    let mut hour_freq: HashMap<u8, f64> = HashMap::new();
    let mut category_freq: HashMap<String, f64> = HashMap::new();
    let mut peer_freq: HashMap<String, f64> = HashMap::new();
    let mut duration_sums: HashMap<String, (u64, u32)> = HashMap::new();

    for entry in &confirmed {
        *venue_freq.entry(entry.venue_id.clone()).or_default() += 1.0;
        *hour_freq
            .entry(entry.started_at.hour() as u8)
            .or_default() += 1.0;
        *category_freq
            .entry(entry.venue_category.clone())
            .or_default() += 1.0;
        *peer_freq.entry(entry.peer_id.clone()).or_default() += 1.0;

        let slot = duration_sums
            .entry(entry.venue_category.clone())
            .or_insert((0, 0));
        slot.0 += u64::from(entry.duration_minutes);
        slot.1 += 1;
    }

    for freq in venue_freq.values_mut() {
        *freq /= total;
    }
    for freq in hour_freq.values_mut() {
        *freq /= total;
    }
    for freq in category_freq.values_mut() {
        *freq /= total;
    }
    for freq in peer_freq.values_mut() {
        *freq /= total;
    }

    merge_scores(&mut next.venue_scores, venue_freq);
    merge_scores(&mut next.hour_scores, hour_freq);
    merge_scores(&mut next.category_scores, category_freq);
    merge_scores(&mut next.peer_affinity, peer_freq);

    for (category, (sum, count)) in duration_sums {
        let fresh = (sum / u64::from(count)) as u32;
        let merged = match next.preferred_durations.get(&category) {
            Some(old) => (old + fresh) / 2,
            None => fresh,
        };
        next.preferred_durations.insert(category, merged);
    }

    next.negotiation_count = prior.negotiation_count + confirmed.len() as u32;
    next
}

/// How much the learned patterns can be trusted, `0.0` to `1.0`.
///
/// Piecewise linear in the number of confirmed negotiations: `0 -> 0.3`
/// over the first [`MIN_SAMPLES`], `0.3 -> 0.7` up to
/// [`ESTABLISHED_SAMPLES`], then `0.7 -> 1.0` over [`MATURITY_SPAN`] more,
/// capped at `1.0`.
pub fn confidence(patterns: &LearnedPatterns) -> f64 {
    confidence_for_count(patterns.negotiation_count)
}

pub(crate) fn confidence_for_count(count: u32) -> f64 {
    let n = f64::from(count);
    let min = f64::from(MIN_SAMPLES);
    let established = f64::from(ESTABLISHED_SAMPLES);

    if n < min {
        n / min * 0.3
    } else if n <= established {
        0.3 + (n - min) / (established - min) * 0.4
    } else {
        (0.7 + (n - established) / f64::from(MATURITY_SPAN) * 0.3).min(1.0)
    }
}

fn merge_scores<K>(target: &mut HashMap<K, f64>, fresh: HashMap<K, f64>)
where
    K: Eq + Hash,
{
    for (key, new_score) in fresh {
        let merged = match target.get(&key) {
            Some(old) => LEARNING_RATE * new_score + (1.0 - LEARNING_RATE) * old,
            None => new_score,
        };
        target.insert(key, merged.clamp(0.0, 1.0));
    }
}
