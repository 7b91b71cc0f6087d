//! Hard constraint rules.
//!
//! Veto rules are absolute: they run before any scoring or reasoning, and
//! a single violation stops the proposal from ever being auto-accepted.
//! Rules are validated when constructed, so evaluation never has to cope
//! with an out-of-range hour or an unknown weekday.
//!
//! Two kinds of rule cannot be evaluated mechanically: free-text `custom`
//! rules, and `require_calendar_free` when no calendar source is wired in
//! or the source errors. Those are skipped with a log line rather than
//! silently treated as satisfied.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration, Timelike, Utc, Weekday};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Canonical lowercase weekday names accepted in rules.
pub const WEEKDAY_NAMES: [&str; 7] = [
    "monday",
    "tuesday",
    "wednesday",
    "thursday",
    "friday",
    "saturday",
    "sunday",
];

/// Lowercase English name for a weekday, matching [`WEEKDAY_NAMES`].
pub fn weekday_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "monday",
        Weekday::Tue => "tuesday",
        Weekday::Wed => "wednesday",
        Weekday::Thu => "thursday",
        Weekday::Fri => "friday",
        Weekday::Sat => "saturday",
        Weekday::Sun => "sunday",
    }
}

/// Invalid veto rule construction.
#[derive(Debug, Error)]
pub enum VetoRuleError {
    /// Hour outside 0-23.
    #[error("Hour must be 0-23, got {0}")]
    InvalidHour(u8),

    /// Weekday set has no members.
    #[error("Weekday set must not be empty")]
    EmptyWeekdaySet,

    /// Weekday name is not recognized.
    #[error("Unknown weekday: {0:?}")]
    UnknownWeekday(String),

    /// Identifier field is empty.
    #[error("{0} must not be empty")]
    EmptyField(&'static str),

    /// Duration limit of zero would veto everything.
    #[error("Duration limit must be at least 1 minute")]
    ZeroDuration,
}

/// A single hard constraint.
///
/// Serialized with an internal `type` tag, e.g.
/// `{"type": "never_after_hour", "hour": 21}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VetoConstraint {
    /// No meetings starting before `hour:00`. Starting exactly on the
    /// hour is allowed.
    NeverBeforeHour {
        /// Earliest permitted start hour.
        hour: u8,
    },
    /// No meetings starting after `hour:00`. Starting exactly on the
    /// hour is allowed.
    NeverAfterHour {
        /// Latest permitted start hour.
        hour: u8,
    },
    /// No meetings on the named weekdays.
    NeverOnDays {
        /// Lowercase weekday names ("monday" .. "sunday").
        days: BTreeSet<String>,
    },
    /// Never negotiate with this peer.
    NeverWithPeer {
        /// Blocked peer id.
        peer_id: String,
    },
    /// Never meet at this venue.
    NeverAtVenue {
        /// Blocked venue id.
        venue_id: String,
    },
    /// No meetings longer than this.
    MaxDurationMinutes {
        /// Upper bound in minutes, inclusive.
        minutes: u32,
    },
    /// Only book when the referenced calendar shows the slot free.
    RequireCalendarFree {
        /// Opaque reference understood by the calendar source.
        calendar_ref: String,
    },
    /// Free-text constraint the engine cannot evaluate mechanically.
    Custom {
        /// Human-readable description.
        description: String,
    },
}

impl VetoConstraint {
    /// Short machine-readable name of the constraint kind.
    pub fn kind(&self) -> &'static str {
        match self {
            VetoConstraint::NeverBeforeHour { .. } => "never_before_hour",
            VetoConstraint::NeverAfterHour { .. } => "never_after_hour",
            VetoConstraint::NeverOnDays { .. } => "never_on_days",
            VetoConstraint::NeverWithPeer { .. } => "never_with_peer",
            VetoConstraint::NeverAtVenue { .. } => "never_at_venue",
            VetoConstraint::MaxDurationMinutes { .. } => "max_duration_minutes",
            VetoConstraint::RequireCalendarFree { .. } => "require_calendar_free",
            VetoConstraint::Custom { .. } => "custom",
        }
    }

    /// Check the constraint's parameters.
    pub fn validate(&self) -> Result<(), VetoRuleError> {
        match self {
            VetoConstraint::NeverBeforeHour { hour } | VetoConstraint::NeverAfterHour { hour } => {
                if *hour > 23 {
                    return Err(VetoRuleError::InvalidHour(*hour));
                }
            }
            VetoConstraint::NeverOnDays { days } => {
                if days.is_empty() {
                    return Err(VetoRuleError::EmptyWeekdaySet);
                }
                for day in days {
                    if !WEEKDAY_NAMES.contains(&day.as_str()) {
                        return Err(VetoRuleError::UnknownWeekday(day.clone()));
                    }
                }
            }
            VetoConstraint::NeverWithPeer { peer_id } => {
                if peer_id.trim().is_empty() {
                    return Err(VetoRuleError::EmptyField("peer_id"));
                }
            }
            VetoConstraint::NeverAtVenue { venue_id } => {
                if venue_id.trim().is_empty() {
                    return Err(VetoRuleError::EmptyField("venue_id"));
                }
            }
            VetoConstraint::MaxDurationMinutes { minutes } => {
                if *minutes == 0 {
                    return Err(VetoRuleError::ZeroDuration);
                }
            }
            VetoConstraint::RequireCalendarFree { calendar_ref } => {
                if calendar_ref.trim().is_empty() {
                    return Err(VetoRuleError::EmptyField("calendar_ref"));
                }
            }
            VetoConstraint::Custom { description } => {
                if description.trim().is_empty() {
                    return Err(VetoRuleError::EmptyField("description"));
                }
            }
        }
        Ok(())
    }
}

/// A constraint plus its activation flag.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VetoRule {
    constraint: VetoConstraint,
    is_active: bool,
}

impl VetoRule {
    /// Create an active rule, validating the constraint.
    pub fn new(constraint: VetoConstraint) -> Result<Self, VetoRuleError> {
        constraint.validate()?;
        Ok(Self {
            constraint,
            is_active: true,
        })
    }

    /// Assemble a rule without validation. Intended for data that will be
    /// validated in bulk afterwards, e.g. by
    /// [`AgentPreferences::validate`](crate::preferences::AgentPreferences::validate).
    pub fn from_parts(constraint: VetoConstraint, is_active: bool) -> Self {
        Self {
            constraint,
            is_active,
        }
    }

    /// No meetings starting before `hour:00`.
    pub fn never_before_hour(hour: u8) -> Result<Self, VetoRuleError> {
        Self::new(VetoConstraint::NeverBeforeHour { hour })
    }

    /// No meetings starting after `hour:00`.
    pub fn never_after_hour(hour: u8) -> Result<Self, VetoRuleError> {
        Self::new(VetoConstraint::NeverAfterHour { hour })
    }

    /// No meetings on the given weekdays. Names are case-insensitive.
    pub fn never_on_days<I, S>(days: I) -> Result<Self, VetoRuleError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let normalized: BTreeSet<String> = days
            .into_iter()
            .map(|d| d.as_ref().trim().to_lowercase())
            .collect();
        Self::new(VetoConstraint::NeverOnDays { days: normalized })
    }

    /// Never negotiate with `peer_id`.
    pub fn never_with_peer(peer_id: impl Into<String>) -> Result<Self, VetoRuleError> {
        Self::new(VetoConstraint::NeverWithPeer {
            peer_id: peer_id.into(),
        })
    }

    /// Never meet at `venue_id`.
    pub fn never_at_venue(venue_id: impl Into<String>) -> Result<Self, VetoRuleError> {
        Self::new(VetoConstraint::NeverAtVenue {
            venue_id: venue_id.into(),
        })
    }

    /// No meetings longer than `minutes`.
    pub fn max_duration_minutes(minutes: u32) -> Result<Self, VetoRuleError> {
        Self::new(VetoConstraint::MaxDurationMinutes { minutes })
    }

    /// Only book when `calendar_ref` shows the slot free.
    pub fn require_calendar_free(calendar_ref: impl Into<String>) -> Result<Self, VetoRuleError> {
        Self::new(VetoConstraint::RequireCalendarFree {
            calendar_ref: calendar_ref.into(),
        })
    }

    /// Free-text rule; recorded but never evaluated mechanically.
    pub fn custom(description: impl Into<String>) -> Result<Self, VetoRuleError> {
        Self::new(VetoConstraint::Custom {
            description: description.into(),
        })
    }

    /// The underlying constraint.
    pub fn constraint(&self) -> &VetoConstraint {
        &self.constraint
    }

    /// Whether the rule participates in checks.
    pub fn is_active(&self) -> bool {
        self.is_active
    }

    /// Enable or disable the rule without losing it.
    pub fn set_active(&mut self, active: bool) {
        self.is_active = active;
    }
}

/// A rule match: which rule fired and why.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VetoViolation {
    /// Kind of the violated rule.
    pub rule: String,
    /// Human-readable explanation.
    pub reason: String,
}

impl fmt::Display for VetoViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.rule, self.reason)
    }
}

/// Calendar availability errors.
#[derive(Debug, Error)]
pub enum CalendarError {
    /// Calendar source unreachable or failing.
    #[error("Calendar unavailable: {0}")]
    Unavailable(String),
}

/// External calendar availability source.
#[async_trait]
pub trait CalendarConflicts: Send + Sync {
    /// Whether `calendar_ref` has any booking overlapping `[start, end)`.
    async fn has_conflict(
        &self,
        calendar_ref: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<bool, CalendarError>;
}

/// Evaluates veto rules against a concrete slot/venue/peer combination.
#[derive(Default)]
pub struct VetoEngine {
    calendar: Option<Arc<dyn CalendarConflicts>>,
}

impl VetoEngine {
    /// Engine without a calendar source; `require_calendar_free` rules
    /// will be skipped (and logged).
    pub fn new() -> Self {
        Self { calendar: None }
    }

    /// Engine with a calendar source.
    pub fn with_calendar(calendar: Arc<dyn CalendarConflicts>) -> Self {
        Self {
            calendar: Some(calendar),
        }
    }

    /// Check rules in order against one candidate booking.
    ///
    /// Returns the first violation, or `None` when every evaluable active
    /// rule passes.
    pub async fn check(
        &self,
        start: DateTime<Utc>,
        duration_minutes: u32,
        venue_id: &str,
        peer_ids: &[String],
        rules: &[VetoRule],
    ) -> Option<VetoViolation> {
        for rule in rules.iter().filter(|r| r.is_active()) {
            let violation = match rule.constraint() {
                VetoConstraint::NeverBeforeHour { hour } => {
                    let minute_of_day = start.hour() * 60 + start.minute();
                    if minute_of_day < u32::from(*hour) * 60 {
                        Some(format!(
                            "start {} is before {:02}:00",
                            start.format("%H:%M"),
                            hour
                        ))
                    } else {
                        None
                    }
                }
                VetoConstraint::NeverAfterHour { hour } => {
                    let minute_of_day = start.hour() * 60 + start.minute();
                    if minute_of_day > u32::from(*hour) * 60 {
                        Some(format!(
                            "start {} is after {:02}:00",
                            start.format("%H:%M"),
                            hour
                        ))
                    } else {
                        None
                    }
                }
                VetoConstraint::NeverOnDays { days } => {
                    let name = weekday_name(start.weekday());
                    if days.contains(name) {
                        Some(format!("{name} is blocked"))
                    } else {
                        None
                    }
                }
                VetoConstraint::NeverWithPeer { peer_id } => {
                    if peer_ids.iter().any(|p| p == peer_id) {
                        Some(format!("peer {peer_id} is blocked"))
                    } else {
                        None
                    }
                }
                VetoConstraint::NeverAtVenue { venue_id: blocked } => {
                    if venue_id == blocked {
                        Some(format!("venue {blocked} is blocked"))
                    } else {
                        None
                    }
                }
                VetoConstraint::MaxDurationMinutes { minutes } => {
                    if duration_minutes > *minutes {
                        Some(format!(
                            "duration {duration_minutes}min exceeds limit of {minutes}min"
                        ))
                    } else {
                        None
                    }
                }
                VetoConstraint::RequireCalendarFree { calendar_ref } => {
                    let end = start + Duration::minutes(i64::from(duration_minutes));
                    match &self.calendar {
                        Some(calendar) => {
                            match calendar.has_conflict(calendar_ref, start, end).await {
                                Ok(true) => {
                                    Some(format!("calendar {calendar_ref} has a conflict"))
                                }
                                Ok(false) => None,
                                Err(e) => {
                                    tracing::warn!(
                                        calendar_ref,
                                        error = %e,
                                        "Calendar unavailable, rule left unevaluated"
                                    );
                                    None
                                }
                            }
                        }
                        None => {
                            tracing::warn!(
                                calendar_ref,
                                "No calendar source configured, rule left unevaluated"
                            );
                            None
                        }
                    }
                }
                VetoConstraint::Custom { description } => {
                    tracing::debug!(description, "Custom rule left unevaluated");
                    None
                }
            };

            if let Some(reason) = violation {
                tracing::info!(rule = rule.constraint().kind(), %reason, "Veto rule violated");
                return Some(VetoViolation {
                    rule: rule.constraint().kind().to_string(),
                    reason,
                });
            }
        }
        None
    }
}
