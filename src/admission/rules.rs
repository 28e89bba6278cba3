//! Admission rules and path matching.
//!
//! Rules are registered once at startup and never mutated. Each inbound path
//! selects exactly one rule: the longest `scope_pattern` that prefixes the
//! path, with ties broken by registration order. A catch-all default rule
//! applies when no pattern matches.

use std::time::Duration;

use crate::error::{Result, TurnstileError};

/// Identifies a rule within its [`RuleSet`].
///
/// Stable for the lifetime of the set, so it can be used to key counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RuleId(usize);

/// An immutable admission rule.
#[derive(Debug, Clone)]
pub struct Rule {
    /// Path prefix this rule applies to.
    pub scope_pattern: String,
    /// Length of the counting window.
    pub window: Duration,
    /// Number of attempts admitted per key per window.
    pub max_requests: u64,
    /// Message returned to rejected callers.
    pub rejection_message: String,
}

impl Rule {
    /// Create a rule, validating its quota parameters.
    ///
    /// A zero window or zero quota is a configuration error and is rejected
    /// here, at registration time, never at request time.
    pub fn new(
        scope_pattern: impl Into<String>,
        window: Duration,
        max_requests: u64,
        rejection_message: impl Into<String>,
    ) -> Result<Self> {
        let scope_pattern = scope_pattern.into();

        if window.is_zero() {
            return Err(TurnstileError::Config(format!(
                "rule '{}' has a zero-length window",
                scope_pattern
            )));
        }
        if max_requests == 0 {
            return Err(TurnstileError::Config(format!(
                "rule '{}' admits zero requests per window",
                scope_pattern
            )));
        }

        Ok(Self {
            scope_pattern,
            window,
            max_requests,
            rejection_message: rejection_message.into(),
        })
    }
}

/// An ordered set of admission rules plus a catch-all default.
#[derive(Debug, Clone)]
pub struct RuleSet {
    /// Rules in registration order, with the default stored last.
    rules: Vec<Rule>,
}

impl RuleSet {
    /// Build a rule set from rules in registration order and a default rule
    /// used when no pattern matches.
    pub fn new(rules: Vec<Rule>, default: Rule) -> Self {
        let mut rules = rules;
        rules.push(default);
        Self { rules }
    }

    /// Select the rule governing `path`.
    ///
    /// Longest-prefix match over `scope_pattern`; among equally long matches
    /// the first registered rule wins. Falls back to the default rule.
    pub fn match_path(&self, path: &str) -> (RuleId, &Rule) {
        let default_index = self.rules.len() - 1;
        let mut best: Option<usize> = None;

        for (index, rule) in self.rules[..default_index].iter().enumerate() {
            if !path.starts_with(&rule.scope_pattern) {
                continue;
            }
            // Strictly longer wins, so the first of equal-length matches
            // keeps its slot.
            let is_longer = match best {
                Some(current) => {
                    rule.scope_pattern.len() > self.rules[current].scope_pattern.len()
                }
                None => true,
            };
            if is_longer {
                best = Some(index);
            }
        }

        let index = best.unwrap_or(default_index);
        (RuleId(index), &self.rules[index])
    }

    /// Look up a rule by id.
    pub fn get(&self, id: RuleId) -> Option<&Rule> {
        self.rules.get(id.0)
    }

    /// Number of rules, including the default.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// A rule set always carries at least the default rule.
    pub fn is_empty(&self) -> bool {
        false
    }
}
