//! Header forwarding table
//!
//! Only headers named in the table travel upstream. Anything else, and any
//! listed header that is absent or empty, is dropped before matching or
//! dispatch.

use serde::{Deserialize, Serialize};

/// Headers forwarded when no table is configured
pub const DEFAULT_FORWARDED_HEADERS: [&str; 8] = [
    "Accept",
    "Content-Disposition",
    "If-Unmodified-Since",
    "Link",
    "Authorization",
    "User-Agent",
    "Content-Length",
    "Content-Type",
];

/// Placeholder written to cassettes for redacted header values
pub const REDACTED: &str = "[REDACTED]";

/// What happens to a listed header
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ForwardingRule {
    /// Forward upstream and store verbatim
    #[default]
    Forward,
    /// Forward upstream, store as [`REDACTED`]
    Redact,
}

/// One entry of the forwarding table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderRule {
    /// Canonical header name
    pub name: String,
    /// Forwarding rule
    #[serde(default)]
    pub rule: ForwardingRule,
}

impl HeaderRule {
    /// Rule that forwards `name` unchanged
    #[must_use]
    pub fn forward(name: &str) -> Self {
        Self {
            name: name.to_string(),
            rule: ForwardingRule::Forward,
        }
    }
}

/// Default rules, one `forward` entry per allow-listed header
#[must_use]
pub fn default_rules() -> Vec<HeaderRule> {
    DEFAULT_FORWARDED_HEADERS
        .iter()
        .map(|name| HeaderRule::forward(name))
        .collect()
}

/// Header forwarding table
#[derive(Debug, Clone)]
pub struct HeaderTable {
    rules: Vec<HeaderRule>,
}

impl HeaderTable {
    /// Build a table from configured rules
    #[must_use]
    pub fn new(rules: Vec<HeaderRule>) -> Self {
        Self { rules }
    }

    /// Rules in table order
    #[must_use]
    pub fn rules(&self) -> &[HeaderRule] {
        &self.rules
    }

    /// Select the forwarded headers from an inbound header list
    ///
    /// Names are compared case-insensitively and emitted with the table's
    /// spelling, in table order. Empty values are dropped.
    #[must_use]
    pub fn filter(&self, inbound: &[(String, String)]) -> Vec<(String, String)> {
        self.rules
            .iter()
            .filter_map(|rule| {
                inbound
                    .iter()
                    .find(|(name, value)| {
                        name.eq_ignore_ascii_case(&rule.name) && !value.trim().is_empty()
                    })
                    .map(|(_, value)| (rule.name.clone(), value.clone()))
            })
            .collect()
    }

    /// Copy of `headers` with redacted values masked, for persistence
    #[must_use]
    pub fn redact_for_storage(&self, headers: &[(String, String)]) -> Vec<(String, String)> {
        headers
            .iter()
            .map(|(name, value)| {
                let redact = self.rules.iter().any(|rule| {
                    rule.rule == ForwardingRule::Redact && rule.name.eq_ignore_ascii_case(name)
                });
                if redact {
                    (name.clone(), REDACTED.to_string())
                } else {
                    (name.clone(), value.clone())
                }
            })
            .collect()
    }
}

impl Default for HeaderTable {
    fn default() -> Self {
        Self::new(default_rules())
    }
}
