//! Call budget and verdict cache for the reasoner path.
//!
//! Remote consultation is metered two ways: identical proposals within the
//! TTL reuse the cached decision without spending a call, and a rolling
//! daily counter caps how many calls go out at all. Both live behind one
//! async mutex so a burst of concurrent evaluations cannot overspend.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::{NaiveDate, Utc};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

use super::reasoner::ReasonerError;
use super::AgentDecision;
use crate::protocol::ProposalData;

/// How long a cached verdict stays valid.
pub const DECISION_CACHE_TTL_SECS: u64 = 3600;

/// Remote calls allowed per UTC day.
pub const DAILY_CALL_LIMIT: u32 = 50;

struct CacheEntry {
    decision: AgentDecision,
    cached_at: Instant,
}

struct GateState {
    cache: HashMap<String, CacheEntry>,
    day: NaiveDate,
    calls_today: u32,
}

/// Shared gate in front of a reasoner.
pub struct ReasonerGate {
    state: Mutex<GateState>,
    ttl: Duration,
    daily_limit: u32,
}

impl Default for ReasonerGate {
    fn default() -> Self {
        Self::new(Duration::from_secs(DECISION_CACHE_TTL_SECS), DAILY_CALL_LIMIT)
    }
}

impl ReasonerGate {
    /// Gate with an explicit cache TTL and daily budget.
    pub fn new(ttl: Duration, daily_limit: u32) -> Self {
        Self {
            state: Mutex::new(GateState {
                cache: HashMap::new(),
                day: Utc::now().date_naive(),
                calls_today: 0,
            }),
            ttl,
            daily_limit,
        }
    }

    /// Look up a cached decision, evicting it if it has expired.
    pub async fn cached(&self, key: &str) -> Option<AgentDecision> {
        let mut state = self.state.lock().await;
        let expired = state
            .cache
            .get(key)
            .is_some_and(|entry| entry.cached_at.elapsed() > self.ttl);
        if expired {
            state.cache.remove(key);
            return None;
        }
        state.cache.get(key).map(|entry| entry.decision.clone())
    }

    /// Cache a decision under `key`, sweeping expired entries while here.
    pub async fn store(&self, key: String, decision: AgentDecision) {
        let mut state = self.state.lock().await;
        let ttl = self.ttl;
        state
            .cache
            .retain(|_, entry| entry.cached_at.elapsed() <= ttl);
        state.cache.insert(
            key,
            CacheEntry {
                decision,
                cached_at: Instant::now(),
            },
        );
    }

    /// Claim one remote call from today's budget.
    ///
    /// The counter resets lazily when the UTC day rolls over. On success
    /// the call is already counted; callers must not re-acquire for the
    /// same request.
    pub async fn try_acquire(&self) -> Result<(), ReasonerError> {
        let mut state = self.state.lock().await;
        Self::acquire_on(&mut state, Utc::now().date_naive(), self.daily_limit)
    }

    /// Calls spent so far today.
    pub async fn calls_today(&self) -> u32 {
        let state = self.state.lock().await;
        if state.day == Utc::now().date_naive() {
            state.calls_today
        } else {
            0
        }
    }

    fn acquire_on(
        state: &mut GateState,
        today: NaiveDate,
        limit: u32,
    ) -> Result<(), ReasonerError> {
        if state.day != today {
            state.day = today;
            state.calls_today = 0;
        }
        if state.calls_today >= limit {
            return Err(ReasonerError::RateLimitExceeded(limit));
        }
        state.calls_today += 1;
        Ok(())
    }

    #[cfg(test)]
    async fn try_acquire_on(&self, today: NaiveDate) -> Result<(), ReasonerError> {
        let mut state = self.state.lock().await;
        Self::acquire_on(&mut state, today, self.daily_limit)
    }
}

/// Cache key for one user's view of one proposal.
///
/// Hashes the user id together with the proposal's serialized form, so the
/// same offer evaluated twice hits the cache while different users or
/// amended offers miss it.
pub fn verdict_cache_key(user_id: &str, proposal: &ProposalData) -> String {
    let mut hasher = Sha256::new();
    hasher.update(user_id.as_bytes());
    hasher.update([0u8]);
    if let Ok(bytes) = serde_json::to_vec(proposal) {
        hasher.update(&bytes);
    }
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}
