//! In-memory TTL cache mirrored to a persistent store.
//!
//! Entries are JSON values stamped with their creation time and TTL. An entry
//! is valid while `now - timestamp < ttl`; expired entries are evicted lazily
//! on the next read. Each entry is persisted under `entry_prefix + key`, and
//! the aggregate hit/miss counters under `stats_key`, so both survive restarts.
//!
//! Hydration from the store runs in the background after [`CacheManager::create`].
//! Reads and writes issued before it finishes are served from memory; an early
//! miss is expected, and hydration never overwrites or resurrects anything the
//! caller changed in the meantime.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::CacheConfig;
use crate::error::Result;
use crate::store::{KeyValueStore, Persister};

/// A single cached payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// The cached payload.
    pub data: Value,
    /// Creation time, milliseconds since the Unix epoch.
    pub timestamp: i64,
    /// Validity window in milliseconds.
    pub ttl: u64,
}

impl CacheEntry {
    pub fn is_valid(&self, now_millis: i64) -> bool {
        now_millis.saturating_sub(self.timestamp) < self.ttl as i64
    }
}

/// Aggregate counters, persisted as one record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
struct Counters {
    hits: u64,
    misses: u64,
    requests: u64,
}

/// Invalidations applied before hydration completed.
#[derive(Default)]
struct PendingLoad {
    cleared: bool,
    removed: HashSet<String>,
    patterns: Vec<Regex>,
}

impl PendingLoad {
    fn suppresses(&self, key: &str) -> bool {
        self.cleared
            || self.removed.contains(key)
            || self.patterns.iter().any(|p| p.is_match(key))
    }
}

struct CacheState {
    entries: HashMap<String, CacheEntry>,
    counters: Counters,
    /// `Some` until hydration has finished.
    pending: Option<PendingLoad>,
}

/// Cache statistics for the debug surface.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    /// Number of entries currently held (valid or not yet evicted).
    pub size: usize,
    /// `hit_count / request_count * 100`, or 0 with no requests.
    pub hit_rate: f64,
    /// `miss_count / request_count * 100`, or 0 with no requests.
    pub miss_rate: f64,
    pub hit_count: u64,
    pub miss_count: u64,
    pub request_count: u64,
}

/// Process-wide TTL cache shared by every fetch call site.
pub struct CacheManager {
    state: Mutex<CacheState>,
    config: CacheConfig,
    clock: Arc<dyn Clock>,
    persister: Persister,
    loader: Mutex<Option<JoinHandle<()>>>,
}

impl CacheManager {
    /// Create the cache and start hydrating it from `store` in the background.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn create(
        store: Arc<dyn KeyValueStore>,
        config: CacheConfig,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        let manager = Arc::new(Self {
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                counters: Counters::default(),
                pending: Some(PendingLoad::default()),
            }),
            config,
            clock,
            persister: Persister::spawn(Arc::clone(&store), "cache"),
            loader: Mutex::new(None),
        });
        let handle = tokio::spawn({
            let manager = Arc::clone(&manager);
            async move { manager.hydrate(store.as_ref()).await }
        });
        *manager.loader.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
        manager
    }

    /// Wait for background hydration to finish. Never required for correctness.
    pub async fn wait_loaded(&self) {
        let handle = self.loader.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("Cache hydration task failed: {}", e);
            }
        }
    }

    /// Look up `key`. Counts a request, and a hit or a miss.
    ///
    /// An expired entry is removed and counted as a miss.
    pub fn get(&self, key: &str) -> Option<Value> {
        let now = self.clock.now_millis();
        let mut state = self.lock();
        state.counters.requests += 1;

        let valid = state.entries.get(key).map(|e| e.is_valid(now));
        let result = match valid {
            Some(true) => {
                state.counters.hits += 1;
                debug!(key = %key, "Cache hit");
                state.entries.get(key).map(|e| e.data.clone())
            }
            Some(false) => {
                state.counters.misses += 1;
                state.entries.remove(key);
                debug!(key = %key, "Cache entry expired, removing");
                self.persister.remove(self.store_key(key));
                None
            }
            None => {
                state.counters.misses += 1;
                debug!(key = %key, "Cache miss");
                None
            }
        };
        let counters = state.counters;
        // Until hydration has merged the stored counters, writing ours would
        // overwrite them before they are read.
        let hydrated = state.pending.is_none();
        drop(state);

        if hydrated {
            self.persist_counters(counters);
        }
        result
    }

    /// Typed [`get`](Self::get). A payload that no longer decodes as `T` is
    /// treated as absent.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.get(key)?;
        match serde_json::from_value(value) {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(key = %key, "Cached payload has unexpected shape: {}", e);
                None
            }
        }
    }

    /// Insert or overwrite `key`, stamped with the current time.
    ///
    /// `ttl` defaults to the configured default TTL.
    pub fn set(&self, key: &str, data: Value, ttl: Option<Duration>) {
        let ttl = ttl.unwrap_or_else(|| self.config.default_ttl());
        let entry = CacheEntry {
            data,
            timestamp: self.clock.now_millis(),
            ttl: ttl.as_millis() as u64,
        };
        let serialized = serde_json::to_string(&entry);

        let mut state = self.lock();
        state.entries.insert(key.to_string(), entry);
        if let Some(pending) = state.pending.as_mut() {
            pending.removed.insert(key.to_string());
        }
        drop(state);

        match serialized {
            Ok(raw) => self.persister.set(self.store_key(key), raw),
            Err(e) => warn!(key = %key, "Failed to serialize cache entry: {}", e),
        }
    }

    /// Typed [`set`](Self::set).
    pub fn set_as<T: Serialize>(&self, key: &str, data: &T, ttl: Option<Duration>) -> Result<()> {
        let value = serde_json::to_value(data)?;
        self.set(key, value, ttl);
        Ok(())
    }

    /// Delete `key` if present. Returns whether an entry was held.
    pub fn remove(&self, key: &str) -> bool {
        let mut state = self.lock();
        let existed = state.entries.remove(key).is_some();
        if let Some(pending) = state.pending.as_mut() {
            pending.removed.insert(key.to_string());
        }
        let loading = state.pending.is_some();
        drop(state);

        if existed || loading {
            self.persister.remove(self.store_key(key));
        }
        existed
    }

    /// Presence-and-validity check. Does not touch the statistics.
    pub fn has(&self, key: &str) -> bool {
        let now = self.clock.now_millis();
        self.lock()
            .entries
            .get(key)
            .map(|e| e.is_valid(now))
            .unwrap_or(false)
    }

    /// Drop every entry. Hit/miss counters are kept.
    pub fn clear(&self) {
        let mut state = self.lock();
        let dropped = state.entries.len();
        state.entries.clear();
        if let Some(pending) = state.pending.as_mut() {
            pending.cleared = true;
        }
        drop(state);

        self.persister.remove_prefix(self.config.entry_prefix.clone());
        info!(entries = dropped, "Cache cleared");
    }

    /// Drop every key matching `pattern`. Returns how many were removed.
    pub fn clear_pattern(&self, pattern: &Regex) -> usize {
        let mut state = self.lock();
        let doomed: Vec<String> = state
            .entries
            .keys()
            .filter(|k| pattern.is_match(k))
            .cloned()
            .collect();
        for key in &doomed {
            state.entries.remove(key);
        }
        if let Some(pending) = state.pending.as_mut() {
            pending.patterns.push(pattern.clone());
        }
        drop(state);

        for key in &doomed {
            self.persister.remove(self.store_key(key));
        }
        debug!(pattern = %pattern, removed = doomed.len(), "Cleared cache entries by pattern");
        doomed.len()
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.lock();
        let c = state.counters;
        let rate = |n: u64| {
            if c.requests == 0 {
                0.0
            } else {
                n as f64 / c.requests as f64 * 100.0
            }
        };
        CacheStats {
            size: state.entries.len(),
            hit_rate: rate(c.hits),
            miss_rate: rate(c.misses),
            hit_count: c.hits,
            miss_count: c.misses,
            request_count: c.requests,
        }
    }

    /// Keys currently held, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.lock().entries.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    /// Finish hydration and flush every pending write to the store.
    pub async fn shutdown(&self) {
        self.wait_loaded().await;
        self.persister.shutdown().await;
    }

    /// Wait until writes enqueued so far reach the store.
    pub async fn flush(&self) {
        self.persister.flush().await;
    }

    // -- private helpers ---------------------------------------------------

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn store_key(&self, key: &str) -> String {
        format!("{}{}", self.config.entry_prefix, key)
    }

    fn persist_counters(&self, counters: Counters) {
        match serde_json::to_string(&counters) {
            Ok(raw) => self.persister.set(self.config.stats_key.clone(), raw),
            Err(e) => warn!("Failed to serialize cache stats: {}", e),
        }
    }

    async fn hydrate(&self, store: &dyn KeyValueStore) {
        let prefix = self.config.entry_prefix.as_str();
        let counters = match store.get(&self.config.stats_key).await {
            Ok(Some(raw)) => match serde_json::from_str::<Counters>(&raw) {
                Ok(c) => Some(c),
                Err(e) => {
                    warn!("Discarding malformed persisted cache stats: {}", e);
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!("Failed to read persisted cache stats: {}", e);
                None
            }
        };

        let stored = match store.get_all_keys().await {
            Ok(keys) => keys,
            Err(e) => {
                warn!("Failed to list persisted cache, starting empty: {}", e);
                self.finish_hydration(Vec::new(), counters);
                return;
            }
        };
        let entry_keys: Vec<String> = stored
            .into_iter()
            .filter(|k| k.starts_with(prefix))
            .collect();
        let pairs = match store.multi_get(&entry_keys).await {
            Ok(pairs) => pairs,
            Err(e) => {
                warn!("Failed to read persisted cache, starting empty: {}", e);
                Vec::new()
            }
        };

        let now = self.clock.now_millis();
        let mut loaded = Vec::new();
        for (store_key, raw) in pairs {
            let Some(raw) = raw else { continue };
            let key = store_key[prefix.len()..].to_string();
            match serde_json::from_str::<CacheEntry>(&raw) {
                Ok(entry) if entry.is_valid(now) => loaded.push((key, entry)),
                Ok(_) => self.persister.remove(store_key),
                Err(e) => {
                    warn!(key = %key, "Discarding malformed persisted cache entry: {}", e);
                    self.persister.remove(store_key);
                }
            }
        }

        self.finish_hydration(loaded, counters);
    }

    fn finish_hydration(&self, loaded: Vec<(String, CacheEntry)>, counters: Option<Counters>) {
        let mut state = self.lock();
        let pending = state.pending.take().unwrap_or_default();
        let mut restored = 0usize;
        for (key, entry) in loaded {
            if pending.suppresses(&key) || state.entries.contains_key(&key) {
                continue;
            }
            state.entries.insert(key, entry);
            restored += 1;
        }
        if let Some(c) = counters {
            state.counters.hits += c.hits;
            state.counters.misses += c.misses;
            state.counters.requests += c.requests;
        }
        let early_requests = state.counters.requests != counters.map_or(0, |c| c.requests);
        let merged = state.counters;
        drop(state);

        if early_requests {
            self.persist_counters(merged);
        }
        debug!(entries = restored, "Cache hydrated from store");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::MemoryStore;
    use serde_json::json;

    async fn test_cache() -> (Arc<CacheManager>, Arc<ManualClock>, Arc<MemoryStore>) {
        let clock = Arc::new(ManualClock::new(0));
        let store = Arc::new(MemoryStore::new());
        let cache = CacheManager::create(store.clone(), CacheConfig::default(), clock.clone());
        cache.wait_loaded().await;
        (cache, clock, store)
    }

    #[tokio::test]
    async fn test_cache_hit_miss() {
        let (cache, _, _) = test_cache().await;
        assert!(cache.get("users-all").is_none());
        cache.set("users-all", json!(["ana", "ben"]), None);
        assert_eq!(cache.get("users-all"), Some(json!(["ana", "ben"])));
    }

    #[tokio::test]
    async fn test_ttl_boundary() {
        let (cache, clock, _) = test_cache().await;
        cache.set("k", json!("v"), Some(Duration::from_millis(1000)));
        clock.set(999);
        assert_eq!(cache.get("k"), Some(json!("v")));
        clock.set(1000);
        assert_eq!(cache.get("k"), None);
        assert_eq!(cache.len(), 0, "expired entry must be evicted on read");
    }

    #[tokio::test]
    async fn test_default_ttl_applies() {
        let (cache, clock, _) = test_cache().await;
        cache.set("k", json!(1), None);
        clock.advance(Duration::from_millis(CacheConfig::default().default_ttl_ms - 1));
        assert!(cache.has("k"));
        clock.advance(Duration::from_millis(1));
        assert!(!cache.has("k"));
    }

    #[tokio::test]
    async fn test_hit_rate_accounting() {
        let (cache, _, _) = test_cache().await;
        assert!(cache.get("k").is_none());
        cache.set("k", json!(1), None);
        assert!(cache.get("k").is_some());
        let stats = cache.stats();
        assert_eq!(stats.request_count, 2);
        assert_eq!(stats.hit_count, 1);
        assert_eq!(stats.miss_count, 1);
        assert_eq!(stats.hit_rate, 50.0);
        assert_eq!(stats.miss_rate, 50.0);
    }

    #[tokio::test]
    async fn test_empty_stats_zero_rates() {
        let (cache, _, _) = test_cache().await;
        let stats = cache.stats();
        assert_eq!(stats.hit_rate, 0.0);
        assert_eq!(stats.miss_rate, 0.0);
        assert_eq!(stats.size, 0);
    }

    #[tokio::test]
    async fn test_has_does_not_touch_stats() {
        let (cache, _, _) = test_cache().await;
        cache.set("k", json!(1), None);
        assert!(cache.has("k"));
        assert!(!cache.has("missing"));
        assert_eq!(cache.stats().request_count, 0);
    }

    #[tokio::test]
    async fn test_set_overwrites_and_restamps() {
        let (cache, clock, _) = test_cache().await;
        cache.set("k", json!(1), Some(Duration::from_millis(100)));
        clock.set(90);
        cache.set("k", json!(2), Some(Duration::from_millis(100)));
        clock.set(150);
        assert_eq!(cache.get("k"), Some(json!(2)));
    }

    #[tokio::test]
    async fn test_remove_and_clear_keep_counters() {
        let (cache, _, _) = test_cache().await;
        cache.set("a", json!(1), None);
        cache.set("b", json!(2), None);
        let _ = cache.get("a");
        assert!(cache.remove("a"));
        assert!(!cache.remove("never-there"));
        assert!(!cache.has("a"));
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.stats().hit_count, 1);
    }

    #[tokio::test]
    async fn test_clear_pattern_removes_all_and_only_matches() {
        let (cache, _, _) = test_cache().await;
        cache.set("events-1", json!(1), None);
        cache.set("events-2", json!(2), None);
        cache.set("my-events", json!(3), None);
        cache.set("users-all", json!(4), None);
        let removed = cache.clear_pattern(&Regex::new("^events-").unwrap());
        assert_eq!(removed, 2);
        assert_eq!(cache.keys(), vec!["my-events".to_string(), "users-all".to_string()]);
        assert_eq!(cache.get("my-events"), Some(json!(3)));
    }

    #[tokio::test]
    async fn test_typed_access() {
        #[derive(Debug, PartialEq, Serialize, Deserialize)]
        struct Profile {
            name: String,
        }
        let (cache, _, _) = test_cache().await;
        let profile = Profile { name: "ana".into() };
        cache.set_as("profile-1", &profile, None).unwrap();
        assert_eq!(cache.get_as::<Profile>("profile-1"), Some(profile));
        assert_eq!(cache.get_as::<u32>("profile-1"), None);
    }

    #[tokio::test]
    async fn test_persists_and_restores_across_instances() {
        let (cache, clock, store) = test_cache().await;
        cache.set("users-all", json!([1, 2]), Some(Duration::from_secs(60)));
        cache.set("short", json!(0), Some(Duration::from_millis(10)));
        let _ = cache.get("users-all");
        let _ = cache.get("nothing");
        cache.shutdown().await;

        clock.set(1_000);
        let restored = CacheManager::create(store.clone(), CacheConfig::default(), clock.clone());
        restored.wait_loaded().await;
        assert!(restored.has("users-all"));
        assert!(!restored.has("short"), "expired entries are dropped on load");
        let stats = restored.stats();
        assert_eq!(stats.hit_count, 1);
        assert_eq!(stats.miss_count, 1);
        assert_eq!(stats.request_count, 2);

        restored.flush().await;
        assert!(!store.snapshot().contains_key("@cache/short"));
    }

    #[tokio::test]
    async fn test_malformed_entry_discarded_others_loaded() {
        let store = Arc::new(MemoryStore::new());
        store.set("@cache/bad", "{broken".into()).await.unwrap();
        let good = serde_json::to_string(&CacheEntry {
            data: json!("ok"),
            timestamp: 0,
            ttl: 60_000,
        })
        .unwrap();
        store.set("@cache/good", good).await.unwrap();
        store.set("unrelated", "x".into()).await.unwrap();

        let clock = Arc::new(ManualClock::new(10));
        let cache = CacheManager::create(store.clone(), CacheConfig::default(), clock);
        cache.wait_loaded().await;
        cache.flush().await;

        assert_eq!(cache.keys(), vec!["good".to_string()]);
        let snap = store.snapshot();
        assert!(!snap.contains_key("@cache/bad"));
        assert!(snap.contains_key("unrelated"));
    }

    #[tokio::test]
    async fn test_failing_store_degrades_silently() {
        let store = Arc::new(MemoryStore::failing());
        let clock = Arc::new(ManualClock::new(0));
        let cache = CacheManager::create(store, CacheConfig::default(), clock);
        cache.wait_loaded().await;
        cache.set("k", json!(1), None);
        assert_eq!(cache.get("k"), Some(json!(1)));
        cache.flush().await;
    }

    #[tokio::test]
    async fn test_early_writes_win_over_hydration() {
        let store = Arc::new(MemoryStore::new());
        let stale = serde_json::to_string(&CacheEntry {
            data: json!("old"),
            timestamp: 0,
            ttl: 60_000,
        })
        .unwrap();
        store.set("@cache/a", stale.clone()).await.unwrap();
        store.set("@cache/b", stale).await.unwrap();

        let clock = Arc::new(ManualClock::new(5));
        let cache = CacheManager::create(store, CacheConfig::default(), clock);
        // Issued before hydration is awaited.
        cache.set("a", json!("new"), None);
        let _ = cache.remove("b");
        cache.wait_loaded().await;

        assert_eq!(cache.get("a"), Some(json!("new")));
        assert!(!cache.has("b"));
    }

    #[tokio::test]
    async fn test_early_reads_merge_with_stored_counters() {
        let store = Arc::new(MemoryStore::new());
        store
            .set(
                "@cache_stats",
                r#"{"hits":100,"misses":50,"requests":150}"#.into(),
            )
            .await
            .unwrap();

        let clock = Arc::new(ManualClock::new(0));
        let cache = CacheManager::create(store.clone(), CacheConfig::default(), clock.clone());
        // Issued before hydration is awaited.
        assert_eq!(cache.get("early"), None);
        cache.wait_loaded().await;

        let stats = cache.stats();
        assert_eq!(stats.hit_count, 100);
        assert_eq!(stats.miss_count, 51);
        assert_eq!(stats.request_count, 151);

        cache.shutdown().await;
        let reopened = CacheManager::create(store, CacheConfig::default(), clock);
        reopened.wait_loaded().await;
        assert_eq!(reopened.stats().request_count, 151);
    }
}
