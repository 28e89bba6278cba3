//! Configuration management for Turnstile.

use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::admission::{Rule, RuleSet};
use crate::error::{Result, TurnstileError};

/// Main configuration for the Turnstile service.
///
/// Loaded once at startup and static thereafter; rules never mutate while
/// the process runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnstileConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Admission control configuration
    #[serde(default)]
    pub admission: AdmissionConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    "127.0.0.1:8080".parse().unwrap()
}

/// Admission control configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionConfig {
    /// Ordered admission rules; earlier rules win prefix-length ties
    #[serde(default = "default_rules")]
    pub rules: Vec<RuleSpec>,

    /// Catch-all rule applied when no pattern matches
    #[serde(default = "default_rule")]
    pub default: RuleSpec,

    /// How often the stale-counter sweep runs, in seconds
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            rules: default_rules(),
            default: default_rule(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

/// A single admission rule as it appears in configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleSpec {
    /// Path prefix this rule applies to
    pub scope_pattern: String,
    /// Window length in milliseconds
    pub window_ms: u64,
    /// Attempts admitted per key per window
    pub max_requests: u64,
    /// Message returned to rejected callers
    #[serde(default = "default_rejection_message")]
    pub rejection_message: String,
}

impl RuleSpec {
    fn new(scope_pattern: &str, window_ms: u64, max_requests: u64, message: &str) -> Self {
        Self {
            scope_pattern: scope_pattern.to_string(),
            window_ms,
            max_requests,
            rejection_message: message.to_string(),
        }
    }

    /// Validate and convert into a runtime rule.
    pub fn build(&self) -> Result<Rule> {
        Rule::new(
            self.scope_pattern.clone(),
            Duration::from_millis(self.window_ms),
            self.max_requests,
            self.rejection_message.clone(),
        )
    }
}

fn default_rules() -> Vec<RuleSpec> {
    vec![
        RuleSpec::new(
            "/api/v1/auth/",
            900_000,
            5,
            "Too many authentication attempts, please try again later.",
        ),
        RuleSpec::new(
            "/api/v1/payment/",
            60_000,
            3,
            "Too many payment attempts, please try again later.",
        ),
        RuleSpec::new("/api/v1/", 60_000, 60, "Too many requests, please slow down."),
    ]
}

fn default_rule() -> RuleSpec {
    RuleSpec::new("", 900_000, 100, &default_rejection_message())
}

fn default_rejection_message() -> String {
    "Too many requests, please try again later.".to_string()
}

fn default_sweep_interval() -> u64 {
    60
}

impl AdmissionConfig {
    /// Validate the configured rules and build the rule set.
    ///
    /// Zero windows or quotas are rejected here, before the server starts
    /// taking traffic.
    pub fn rule_set(&self) -> Result<RuleSet> {
        let rules = self
            .rules
            .iter()
            .map(RuleSpec::build)
            .collect::<Result<Vec<_>>>()?;
        Ok(RuleSet::new(rules, self.default.build()?))
    }

    /// How often the stale-counter sweep runs.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl TurnstileConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| TurnstileError::Config(e.to_string()))
    }
}
