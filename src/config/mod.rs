//! Configuration for the cache, usage monitor, rate limiter and fetch layer.
//!
//! Loaded from `~/.readgate/config.json` when present. Every section has
//! defaults, so an empty file (or no file) is a valid configuration.
//! Environment variables override file values after loading.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{GateError, Result};

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub cache: CacheConfig,
    pub usage: UsageConfig,
    pub rate_limit: RateLimitConfig,
    pub fetch: FetchConfig,
    /// Location of the file-backed store. Defaults to `~/.readgate/store.json`.
    pub store_path: Option<PathBuf>,
}

/// Cache manager settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// TTL applied by `set` when the caller gives none.
    pub default_ttl_ms: u64,
    /// Store key prefix for persisted cache entries.
    pub entry_prefix: String,
    /// Store key for the aggregate hit/miss counters.
    pub stats_key: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_ms: 5 * 60 * 1000,
            entry_prefix: "@cache/".into(),
            stats_key: "@cache_stats".into(),
        }
    }
}

impl CacheConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_millis(self.default_ttl_ms)
    }
}

/// Usage monitor settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UsageConfig {
    /// Soft daily read quota.
    pub daily_read_limit: u64,
    /// Fraction of the quota at which a warning is logged.
    pub warning_threshold: f64,
    /// Fraction of the quota at which a critical warning is logged.
    pub critical_threshold: f64,
    /// Store key for the persisted counters.
    pub stats_key: String,
}

impl Default for UsageConfig {
    fn default() -> Self {
        Self {
            daily_read_limit: 50_000,
            warning_threshold: 0.7,
            critical_threshold: 0.9,
            stats_key: "@db_usage_stats".into(),
        }
    }
}

/// Fixed-window rate limiter settings (process-wide).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub max_calls: u32,
    pub window_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_calls: 10,
            window_ms: 1_000,
        }
    }
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

/// A TTL chosen when the effective cache key contains `contains`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TtlRule {
    pub contains: String,
    pub ttl_ms: u64,
}

impl TtlRule {
    pub fn new(contains: &str, ttl: Duration) -> Self {
        Self {
            contains: contains.to_string(),
            ttl_ms: ttl.as_millis() as u64,
        }
    }
}

/// Data-fetch orchestrator settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Ordered TTL rules; the first rule whose substring occurs in the key wins.
    pub ttl_rules: Vec<TtlRule>,
    /// TTL when no rule matches.
    pub fallback_ttl_ms: u64,
    /// Error substrings treated as an expected "not signed in" condition.
    pub auth_error_signatures: Vec<String>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        let long = Duration::from_secs(30 * 60);
        let short = Duration::from_secs(2 * 60);
        Self {
            ttl_rules: vec![
                TtlRule::new("profile", long),
                TtlRule::new("user", long),
                TtlRule::new("event", short),
                TtlRule::new("feed", short),
                TtlRule::new("travel", short),
            ],
            fallback_ttl_ms: 5 * 60 * 1000,
            auth_error_signatures: vec![
                "missing scope".into(),
                "role: guests".into(),
                "unauthorized".into(),
                "not authenticated".into(),
            ],
        }
    }
}

impl Config {
    /// Base directory: `~/.readgate`.
    pub fn dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".readgate")
    }

    /// Default config file path: `~/.readgate/config.json`.
    pub fn path() -> PathBuf {
        Self::dir().join("config.json")
    }

    /// Resolved location of the file-backed store.
    pub fn store_path(&self) -> PathBuf {
        self.store_path
            .clone()
            .unwrap_or_else(|| Self::dir().join("store.json"))
    }

    /// Load from the default path, then apply environment overrides.
    pub fn load() -> Result<Self> {
        Self::load_with_env(&Self::path())
    }

    /// Load from `path`, apply environment overrides, and validate the result.
    pub fn load_with_env(path: &Path) -> Result<Self> {
        let mut config = Self::load_from_path(path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load from `path`. A missing file yields the defaults.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let data = match std::fs::read_to_string(path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(e.into()),
        };
        if data.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_json::from_str(&data).map_err(|e| {
            GateError::Config(format!("Failed to parse {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `READGATE_*` environment variable overrides.
    pub fn apply_env_overrides(&mut self) {
        if let Some(v) = env_parse::<u64>("READGATE_DAILY_READ_LIMIT") {
            self.usage.daily_read_limit = v;
        }
        if let Some(v) = env_parse::<u64>("READGATE_DEFAULT_TTL_MS") {
            self.cache.default_ttl_ms = v;
        }
        if let Some(v) = env_parse::<u32>("READGATE_RATE_LIMIT_MAX_CALLS") {
            self.rate_limit.max_calls = v;
        }
        if let Some(v) = env_parse::<u64>("READGATE_RATE_LIMIT_WINDOW_MS") {
            self.rate_limit.window_ms = v;
        }
        if let Ok(v) = std::env::var("READGATE_STORE_PATH") {
            if !v.trim().is_empty() {
                self.store_path = Some(PathBuf::from(v));
            }
        }
    }

    fn validate(&self) -> Result<()> {
        let u = &self.usage;
        if !(0.0..=1.0).contains(&u.warning_threshold)
            || !(0.0..=1.0).contains(&u.critical_threshold)
        {
            return Err(GateError::Config(
                "usage thresholds must be fractions between 0 and 1".into(),
            ));
        }
        if u.warning_threshold > u.critical_threshold {
            return Err(GateError::Config(
                "usage.warning_threshold must not exceed usage.critical_threshold".into(),
            ));
        }
        if self.cache.default_ttl_ms == 0 {
            return Err(GateError::Config("cache.default_ttl_ms must be positive".into()));
        }
        if self.rate_limit.window_ms == 0 {
            return Err(GateError::Config("rate_limit.window_ms must be positive".into()));
        }
        if self.cache.entry_prefix.is_empty() {
            return Err(GateError::Config("cache.entry_prefix must not be empty".into()));
        }
        if self.cache.stats_key.starts_with(&self.cache.entry_prefix) {
            return Err(GateError::Config(
                "cache.stats_key must not share the entry prefix".into(),
            ));
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(var = name, value = %raw, "Ignoring unparseable environment override");
            None
        }
    }
}
