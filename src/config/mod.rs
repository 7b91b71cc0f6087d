//! Configuration management.
//!
//! Supports configuration from:
//! - TOML config files
//! - Environment variables
//!
//! User-specific negotiation behavior (thresholds, veto rules) is not
//! configuration; it lives in [`crate::preferences`] and travels with the
//! user. This module covers the deployment side: reasoner endpoint and
//! budget, engine tuning, and key custody namespace.

use std::path::PathBuf;

use secrecy::Secret;
use serde::{Deserialize, Serialize};

use crate::error::{ParleyError, Result};

/// Main configuration struct
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Remote reasoner configuration
    #[serde(default)]
    pub reasoner: ReasonerConfig,

    /// Decision engine tuning
    #[serde(default)]
    pub engine: EngineConfig,

    /// Agent and custody configuration
    #[serde(default)]
    pub agent: AgentConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let content = std::fs::read_to_string(&path)
            .map_err(|e| ParleyError::Config(format!("Failed to read config file: {e}")))?;

        toml::from_str(&content)
            .map_err(|e| ParleyError::Config(format!("Failed to parse config: {e}")))
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(endpoint) = std::env::var("PARLEY_REASONER_ENDPOINT") {
            config.reasoner.endpoint = endpoint;
        }
        if let Ok(key) = std::env::var("PARLEY_REASONER_API_KEY") {
            config.reasoner.api_key = Some(Secret::new(key));
        }
        if let Ok(enabled) = std::env::var("PARLEY_REASONER_ENABLED") {
            if let Ok(enabled) = enabled.parse() {
                config.reasoner.enabled = enabled;
            }
        }
        if let Ok(timeout) = std::env::var("PARLEY_REASONER_TIMEOUT_SECS") {
            if let Ok(timeout) = timeout.parse() {
                config.reasoner.timeout_secs = timeout;
            }
        }
        if let Ok(limit) = std::env::var("PARLEY_REASONER_DAILY_LIMIT") {
            if let Ok(limit) = limit.parse() {
                config.reasoner.daily_call_limit = limit;
            }
        }
        if let Ok(slots) = std::env::var("PARLEY_COUNTER_SLOTS") {
            if let Ok(slots) = slots.parse() {
                config.engine.counter_slot_count = slots;
            }
        }
        if let Ok(namespace) = std::env::var("PARLEY_CUSTODY_NAMESPACE") {
            config.agent.custody_namespace = namespace;
        }

        config
    }

    /// Merge with another config. Fields where `other` differs from the
    /// builtin default take precedence; everything else keeps `self`.
    pub fn merge(self, other: Self) -> Self {
        let reasoner = ReasonerConfig::default();
        let engine = EngineConfig::default();
        let agent = AgentConfig::default();
        Self {
            reasoner: ReasonerConfig {
                enabled: if other.reasoner.enabled != reasoner.enabled {
                    other.reasoner.enabled
                } else {
                    self.reasoner.enabled
                },
                endpoint: if other.reasoner.endpoint != reasoner.endpoint {
                    other.reasoner.endpoint
                } else {
                    self.reasoner.endpoint
                },
                api_key: other.reasoner.api_key.or(self.reasoner.api_key),
                timeout_secs: if other.reasoner.timeout_secs != reasoner.timeout_secs {
                    other.reasoner.timeout_secs
                } else {
                    self.reasoner.timeout_secs
                },
                daily_call_limit: if other.reasoner.daily_call_limit != reasoner.daily_call_limit
                {
                    other.reasoner.daily_call_limit
                } else {
                    self.reasoner.daily_call_limit
                },
                cache_ttl_secs: if other.reasoner.cache_ttl_secs != reasoner.cache_ttl_secs {
                    other.reasoner.cache_ttl_secs
                } else {
                    self.reasoner.cache_ttl_secs
                },
            },
            engine: EngineConfig {
                counter_slot_count: if other.engine.counter_slot_count
                    != engine.counter_slot_count
                {
                    other.engine.counter_slot_count
                } else {
                    self.engine.counter_slot_count
                },
            },
            agent: AgentConfig {
                custody_namespace: if other.agent.custody_namespace != agent.custody_namespace {
                    other.agent.custody_namespace
                } else {
                    self.agent.custody_namespace
                },
            },
        }
    }

    /// Default config file location (`<config dir>/parley/config.toml`)
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("parley").join("config.toml"))
    }
}

/// Remote reasoner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasonerConfig {
    /// Consult the reasoner at all (off by default)
    pub enabled: bool,

    /// Endpoint URL accepting evaluation requests
    pub endpoint: String,

    /// Bearer token for the endpoint; never serialized back out
    #[serde(skip_serializing, default)]
    pub api_key: Option<Secret<String>>,

    /// Per-request timeout in seconds
    pub timeout_secs: u64,

    /// Remote calls allowed per UTC day
    pub daily_call_limit: u32,

    /// Verdict cache TTL in seconds
    pub cache_ttl_secs: u64,
}

impl Default for ReasonerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: String::new(),
            api_key: None,
            timeout_secs: crate::decision::REASONER_TIMEOUT_SECS,
            daily_call_limit: crate::decision::DAILY_CALL_LIMIT,
            cache_ttl_secs: crate::decision::DECISION_CACHE_TTL_SECS,
        }
    }
}

/// Decision engine tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Slots offered in a synthesized counter-proposal
    pub counter_slot_count: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            counter_slot_count: crate::decision::DEFAULT_COUNTER_SLOTS,
        }
    }
}

/// Agent and custody configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Namespace prefix for vault storage identifiers
    pub custody_namespace: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            custody_namespace: crate::custody::DEFAULT_NAMESPACE.to_string(),
        }
    }
}
