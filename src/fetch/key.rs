//! Effective cache keys and TTL selection.
//!
//! A derived key is the function name, then `-`, then the canonical JSON of
//! its parameters. Objects serialize with sorted keys, so two parameter values
//! that are equal as JSON always produce the same key. Parameters whose JSON
//! form loses information (maps with non-string keys, floats that compare
//! equal as text) should use an explicit cache key instead.

use std::time::Duration;

use regex::Regex;
use serde::Serialize;
use serde_json::Value;

use crate::config::FetchConfig;
use crate::error::Result;

/// Derive the effective cache key for `name` called with `params`.
///
/// No parameters (or parameters serializing to `null`) yield `name` alone.
pub fn derive_cache_key<P: Serialize>(name: &str, params: Option<&P>) -> Result<String> {
    let value = match params {
        Some(p) => serde_json::to_value(p)?,
        None => Value::Null,
    };
    Ok(key_from_value(name, &value))
}

fn key_from_value(name: &str, params: &Value) -> String {
    if params.is_null() {
        name.to_string()
    } else {
        format!("{}-{}", name, params)
    }
}

/// Pattern matching every key derived from `name`, with or without parameters.
pub fn key_prefix_pattern(name: &str) -> Result<Regex> {
    Ok(Regex::new(&format!("^{}(-|$)", regex::escape(name)))?)
}

/// TTL chosen from substrings of the effective key. First matching rule wins.
#[derive(Debug, Clone, PartialEq)]
pub struct TtlPolicy {
    rules: Vec<(String, Duration)>,
    fallback: Duration,
}

impl TtlPolicy {
    pub fn new(rules: Vec<(String, Duration)>, fallback: Duration) -> Self {
        Self { rules, fallback }
    }

    pub fn from_config(config: &FetchConfig) -> Self {
        Self::new(
            config
                .ttl_rules
                .iter()
                .map(|r| (r.contains.clone(), Duration::from_millis(r.ttl_ms)))
                .collect(),
            Duration::from_millis(config.fallback_ttl_ms),
        )
    }

    /// Rules match case-insensitively, so `getUserProfile` hits `profile`.
    pub fn ttl_for(&self, key: &str) -> Duration {
        let key = key.to_lowercase();
        self.rules
            .iter()
            .find(|(needle, _)| key.contains(&needle.to_lowercase()))
            .map(|(_, ttl)| *ttl)
            .unwrap_or(self.fallback)
    }
}

impl Default for TtlPolicy {
    fn default() -> Self {
        Self::from_config(&FetchConfig::default())
    }
}
