//! Daily database read/write counters against a soft quota.
//!
//! Counters reset once per local calendar day. There is no timer: every
//! recording call and every stats read first checks whether local midnight
//! has passed since `last_reset`, so the monitor corrects itself even after
//! the process was suspended across midnight.
//!
//! The quota is advisory. Crossing the warning or critical fraction of the
//! daily read limit logs a warning; nothing is ever blocked.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::cache::CacheManager;
use crate::clock::Clock;
use crate::config::UsageConfig;
use crate::store::{KeyValueStore, Persister};

/// Kind of backend access being recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
}

impl fmt::Display for Access {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Access::Read => f.write_str("read"),
            Access::Write => f.write_str("write"),
        }
    }
}

/// Persisted counters for the current day.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageStats {
    pub reads: u64,
    pub writes: u64,
    /// Milliseconds since the Unix epoch of the last reset.
    pub last_reset: i64,
}

/// Counters plus quota utilisation, for the debug surface.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageReport {
    pub reads: u64,
    pub writes: u64,
    pub last_reset: i64,
    pub daily_read_limit: u64,
    /// `reads / daily_read_limit * 100`.
    pub read_percentage: f64,
}

/// Read-quota utilisation after a recorded access.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UsageLevel {
    /// Below the warning fraction.
    Normal,
    /// At or above the warning fraction. Inner value is the utilisation fraction.
    Warning(f64),
    /// At or above the critical fraction. Inner value is the utilisation fraction.
    Critical(f64),
}

/// Process-wide usage monitor.
pub struct UsageMonitor {
    state: Mutex<UsageStats>,
    config: UsageConfig,
    clock: Arc<dyn Clock>,
    persister: Persister,
    cache: Arc<CacheManager>,
}

impl UsageMonitor {
    /// Load the persisted counters from `store` (or start fresh) and start the
    /// persistence writer. Load failures are logged and yield fresh counters.
    pub async fn open(
        store: Arc<dyn KeyValueStore>,
        config: UsageConfig,
        clock: Arc<dyn Clock>,
        cache: Arc<CacheManager>,
    ) -> Arc<Self> {
        let fresh = UsageStats {
            reads: 0,
            writes: 0,
            last_reset: clock.now_millis(),
        };
        let stats = match store.get(&config.stats_key).await {
            Ok(Some(raw)) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!("Discarding malformed persisted usage stats: {}", e);
                fresh
            }),
            Ok(None) => fresh,
            Err(e) => {
                warn!("Failed to load usage stats, starting fresh: {}", e);
                fresh
            }
        };
        Arc::new(Self {
            state: Mutex::new(stats),
            config,
            clock,
            persister: Persister::spawn(store, "usage"),
            cache,
        })
    }

    /// Record one backend read attributed to `source`.
    pub fn record_read(&self, source: &str) -> UsageLevel {
        self.record(Access::Read, source)
    }

    /// Record one backend write attributed to `source`.
    pub fn record_write(&self, source: &str) -> UsageLevel {
        self.record(Access::Write, source)
    }

    /// Record one access of the given kind.
    pub fn record(&self, access: Access, source: &str) -> UsageLevel {
        let now = self.clock.now_millis();
        let mut state = self.lock();
        self.roll_over(&mut state, now);
        let reads_before = state.reads;
        match access {
            Access::Read => state.reads += 1,
            Access::Write => state.writes += 1,
        }
        let snapshot = *state;
        drop(state);

        self.persist(snapshot);
        debug!(
            source = %source,
            reads = snapshot.reads,
            writes = snapshot.writes,
            "Recorded database {}",
            access
        );
        if access == Access::Read {
            self.warn_on_crossing(reads_before, snapshot.reads, source);
        }
        self.level(snapshot.reads)
    }

    /// Current counters after applying any pending daily rollover.
    pub fn usage_stats(&self) -> UsageReport {
        let now = self.clock.now_millis();
        let mut state = self.lock();
        let rolled = self.roll_over(&mut state, now);
        let snapshot = *state;
        drop(state);

        if rolled {
            self.persist(snapshot);
        }
        UsageReport {
            reads: snapshot.reads,
            writes: snapshot.writes,
            last_reset: snapshot.last_reset,
            daily_read_limit: self.config.daily_read_limit,
            read_percentage: self.fraction(snapshot.reads) * 100.0,
        }
    }

    /// Zero the counters and clear the cache, so later measurements start
    /// from a cold cache.
    pub fn reset_counters(&self) {
        let now = self.clock.now_millis();
        let mut state = self.lock();
        let previous = *state;
        *state = UsageStats {
            reads: 0,
            writes: 0,
            last_reset: now,
        };
        let snapshot = *state;
        drop(state);

        self.persist(snapshot);
        info!(
            previous_reads = previous.reads,
            previous_writes = previous.writes,
            "Usage counters reset"
        );
        self.cache.clear();
    }

    /// Wait until writes enqueued so far reach the store.
    pub async fn flush(&self) {
        self.persister.flush().await;
    }

    /// Flush pending writes and stop the writer.
    pub async fn shutdown(&self) {
        self.persister.shutdown().await;
    }

    // -- private helpers ---------------------------------------------------

    fn lock(&self) -> MutexGuard<'_, UsageStats> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Zero the counters if local midnight has passed since the last reset.
    fn roll_over(&self, state: &mut UsageStats, now: i64) -> bool {
        let midnight = self.clock.local_midnight(now);
        if state.last_reset >= midnight {
            return false;
        }
        info!(
            previous_reads = state.reads,
            previous_writes = state.writes,
            "Daily usage rollover"
        );
        state.reads = 0;
        state.writes = 0;
        state.last_reset = now.max(state.last_reset);
        true
    }

    fn fraction(&self, reads: u64) -> f64 {
        if self.config.daily_read_limit == 0 {
            return 0.0;
        }
        reads as f64 / self.config.daily_read_limit as f64
    }

    fn level(&self, reads: u64) -> UsageLevel {
        let pct = self.fraction(reads);
        if self.config.daily_read_limit == 0 {
            UsageLevel::Normal
        } else if pct >= self.config.critical_threshold {
            UsageLevel::Critical(pct)
        } else if pct >= self.config.warning_threshold {
            UsageLevel::Warning(pct)
        } else {
            UsageLevel::Normal
        }
    }

    fn warn_on_crossing(&self, before: u64, after: u64, source: &str) {
        if self.config.daily_read_limit == 0 {
            return;
        }
        let crossed = |threshold: f64| {
            self.fraction(before) < threshold && self.fraction(after) >= threshold
        };
        if crossed(self.config.warning_threshold) {
            warn!(
                source = %source,
                reads = after,
                limit = self.config.daily_read_limit,
                utilisation = %format!("{:.0}%", self.fraction(after) * 100.0),
                "read quota warning: approaching daily limit",
            );
        }
        if crossed(self.config.critical_threshold) {
            warn!(
                source = %source,
                reads = after,
                limit = self.config.daily_read_limit,
                utilisation = %format!("{:.0}%", self.fraction(after) * 100.0),
                "read quota critical: daily limit nearly exhausted",
            );
        }
    }

    fn persist(&self, stats: UsageStats) {
        match serde_json::to_string(&stats) {
            Ok(raw) => self.persister.set(self.config.stats_key.clone(), raw),
            Err(e) => warn!("Failed to serialize usage stats: {}", e),
        }
    }
}
