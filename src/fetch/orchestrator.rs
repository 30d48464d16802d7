//! Per-call-site data fetching over the shared cache, usage monitor and limiter.
//!
//! A [`DataFetch`] is created once per UI call site. Every fetch it performs
//! goes through the same steps:
//!
//! 1. If a fetch for the same effective key is already in flight (from any
//!    call site on the same [`crate::Gate`]), await that one instead.
//! 2. If the rate limiter rejects the key, stop. State is left untouched.
//! 3. Unless caching is disabled, a cache hit becomes the new data. No
//!    backend call, no usage recorded.
//! 4. Otherwise mark loading, record one read, call the backend.
//! 5. On success store the data (and cache it with the resolved TTL).
//! 6. On failure store the normalised message and alert the user, unless it
//!    is an expected "not signed in" error.
//!
//! Steps 1 to 4 run without yielding, so two callers can never both decide to
//! hit the backend for one key.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::alert::{is_auth_error, Alerter};
use super::inflight::{FetchOutcome, InFlight};
use super::key::{derive_cache_key, key_prefix_pattern, TtlPolicy};
use super::rate_limit::RateLimiter;
use crate::cache::CacheManager;
use crate::error::{GateError, Result};
use crate::usage::UsageMonitor;

/// Boxed backend function: optional parameters in, payload or opaque error out.
pub type FetchFn<P, T> =
    Arc<dyn Fn(Option<P>) -> BoxFuture<'static, anyhow::Result<T>> + Send + Sync>;

/// Box a plain async closure into a [`FetchFn`].
pub fn fetch_fn<P, T, F, Fut>(f: F) -> FetchFn<P, T>
where
    F: Fn(Option<P>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
{
    Arc::new(move |params| f(params).boxed())
}

/// Services shared by every call site of one gate.
pub struct FetchContext {
    pub(crate) cache: Arc<CacheManager>,
    pub(crate) usage: Arc<UsageMonitor>,
    pub(crate) limiter: Arc<RateLimiter>,
    pub(crate) in_flight: Arc<InFlight>,
    pub(crate) alerter: Arc<dyn Alerter>,
    pub(crate) ttl_policy: TtlPolicy,
    pub(crate) auth_signatures: Vec<String>,
}

/// Per-call-site options.
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    /// Explicit effective key. Otherwise derived from name and parameters.
    pub cache_key: Option<String>,
    /// TTL override. Otherwise chosen by the TTL rules.
    pub cache_ttl: Option<Duration>,
    /// Never read from or write to the cache.
    pub disable_cache: bool,
    /// Only the last trigger within this window runs.
    pub debounce: Option<Duration>,
    /// Suppress the initial and the change-triggered fetches.
    pub skip: bool,
}

/// What a call site renders.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchState<T> {
    pub data: Option<T>,
    pub loading: bool,
    pub error: Option<String>,
}

impl<T> Default for FetchState<T> {
    fn default() -> Self {
        Self {
            data: None,
            loading: false,
            error: None,
        }
    }
}

struct Tracked<P> {
    params: Option<P>,
    /// JSON form of `params`; `None` if they failed to serialize.
    params_value: Option<Value>,
    dependencies: Vec<Value>,
}

fn params_value<P: Serialize>(params: &Option<P>) -> Option<Value> {
    match serde_json::to_value(params) {
        Ok(v) => Some(v),
        Err(e) => {
            warn!("Fetch parameters failed to serialize: {}", e);
            None
        }
    }
}

/// One call site's fetch state and controls.
pub struct DataFetch<P, T> {
    name: String,
    fetcher: FetchFn<P, T>,
    options: FetchOptions,
    ctx: Arc<FetchContext>,
    tracked: Mutex<Tracked<P>>,
    state: Mutex<FetchState<T>>,
    debounce_ticket: AtomicU64,
}

impl<P, T> DataFetch<P, T>
where
    P: Serialize + Clone + Send + Sync + 'static,
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    /// Initial fetch, unless `skip` is set.
    pub async fn start(&self) {
        if self.options.skip {
            debug!(source = %self.name, "Initial fetch skipped");
            return;
        }
        self.trigger().await;
    }

    /// Feed the latest parameters and dependency values. Fetches again when
    /// either differs from the previous call by value, unless `skip` is set.
    /// Returns whether a fetch was triggered.
    pub async fn update(&self, params: Option<P>, dependencies: Vec<Value>) -> bool {
        let value = params_value(&params);
        let changed = {
            let mut tracked = self.tracked();
            let changed = value.is_none()
                || tracked.params_value != value
                || tracked.dependencies != dependencies;
            tracked.params = params;
            tracked.params_value = value;
            tracked.dependencies = dependencies;
            changed
        };
        if !changed || self.options.skip {
            return false;
        }
        self.trigger().await;
        true
    }

    /// Run the full fetch sequence now, optionally with new parameters.
    /// Ignores `skip`; still subject to coalescing and rate limiting.
    pub async fn refetch(&self, new_params: Option<P>) {
        if let Some(params) = new_params {
            let params = Some(params);
            let value = params_value(&params);
            let mut tracked = self.tracked();
            tracked.params = params;
            tracked.params_value = value;
        }
        self.trigger().await;
    }

    /// Drop this call site's cached results without fetching.
    ///
    /// Removes the explicit key if one was given, otherwise every key derived
    /// from this function's name. Returns how many entries were removed.
    pub fn clear_cache(&self) -> usize {
        match &self.options.cache_key {
            Some(key) => usize::from(self.ctx.cache.remove(key)),
            None => match key_prefix_pattern(&self.name) {
                Ok(pattern) => self.ctx.cache.clear_pattern(&pattern),
                Err(e) => {
                    warn!(source = %self.name, "Cannot build invalidation pattern: {}", e);
                    0
                }
            },
        }
    }

    pub fn state(&self) -> FetchState<T> {
        self.lock_state().clone()
    }

    /// Effective cache key for the current parameters.
    pub fn cache_key(&self) -> Result<String> {
        let params = self.tracked().params.clone();
        self.key_for(params.as_ref())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> &FetchOptions {
        &self.options
    }

    // -- private helpers ---------------------------------------------------

    async fn trigger(&self) {
        match self.options.debounce {
            Some(delay) if !delay.is_zero() => {
                let ticket = self.debounce_ticket.fetch_add(1, Ordering::SeqCst) + 1;
                tokio::time::sleep(delay).await;
                if self.debounce_ticket.load(Ordering::SeqCst) != ticket {
                    debug!(source = %self.name, "Debounced fetch superseded");
                    return;
                }
                self.run().await;
            }
            _ => self.run().await,
        }
    }

    async fn run(&self) {
        let params = self.tracked().params.clone();
        let key = match self.key_for(params.as_ref()) {
            Ok(key) => key,
            Err(e) => {
                self.settle(Err(e.to_string()), true);
                return;
            }
        };

        if let Some(pending) = self.ctx.in_flight.get(&key) {
            debug!(key = %key, "Joining in-flight fetch");
            self.lock_state().loading = true;
            let outcome = pending.await;
            self.settle(outcome, false);
            return;
        }

        if !self.ctx.limiter.try_acquire(&key) {
            debug!(key = %key, source = %self.name, "Fetch rate limited, keeping current state");
            return;
        }

        let use_cache = !self.options.disable_cache;
        if use_cache {
            if let Some(cached) = self.ctx.cache.get(&key) {
                match serde_json::from_value::<T>(cached) {
                    Ok(data) => {
                        let mut state = self.lock_state();
                        state.data = Some(data);
                        state.error = None;
                        return;
                    }
                    Err(e) => {
                        warn!(key = %key, "Cached payload has unexpected shape, refetching: {}", e)
                    }
                }
            }
        }

        self.lock_state().loading = true;
        let fetch = self.backend_call(key.clone(), params, use_cache).boxed().shared();
        let registration = self.ctx.in_flight.register(&key, fetch.clone());
        let outcome = fetch.await;
        drop(registration);
        self.settle(outcome, true);
    }

    fn backend_call(
        &self,
        key: String,
        params: Option<P>,
        use_cache: bool,
    ) -> impl Future<Output = FetchOutcome> + Send + 'static {
        let fetcher = Arc::clone(&self.fetcher);
        let usage = Arc::clone(&self.ctx.usage);
        let cache = Arc::clone(&self.ctx.cache);
        let source = self.name.clone();
        let ttl = self
            .options
            .cache_ttl
            .unwrap_or_else(|| self.ctx.ttl_policy.ttl_for(&key));

        async move {
            usage.record_read(&source);
            let data = fetcher(params).await.map_err(|e| normalize_error(&e))?;
            let value = serde_json::to_value(&data)
                .map_err(|e| format!("Failed to encode response: {}", e))?;
            if use_cache {
                cache.set(&key, value.clone(), Some(ttl));
            }
            Ok(value)
        }
    }

    /// Apply a finished fetch to this call site's state. Only the call site
    /// that issued the backend call raises an alert.
    fn settle(&self, outcome: FetchOutcome, issued: bool) {
        let decoded = outcome.and_then(|value| {
            serde_json::from_value::<T>(value)
                .map_err(|e| format!("Unexpected response shape: {}", e))
        });
        let mut state = self.lock_state();
        state.loading = false;
        match decoded {
            Ok(data) => {
                state.data = Some(data);
                state.error = None;
            }
            Err(message) => {
                state.error = Some(message.clone());
                drop(state);
                if issued {
                    self.report(&message);
                }
            }
        }
    }

    fn report(&self, message: &str) {
        if is_auth_error(message, &self.ctx.auth_signatures) {
            debug!(source = %self.name, "Fetch rejected for signed-out user: {}", message);
            return;
        }
        warn!(source = %self.name, "Fetch failed: {}", message);
        self.ctx.alerter.alert("Error", message);
    }

    fn key_for(&self, params: Option<&P>) -> Result<String> {
        if let Some(key) = &self.options.cache_key {
            return Ok(key.clone());
        }
        derive_cache_key(&self.name, params).map_err(|e| {
            GateError::Fetch(format!(
                "Parameters for {} could not be serialized: {}",
                self.name, e
            ))
        })
    }

    fn tracked(&self) -> MutexGuard<'_, Tracked<P>> {
        self.tracked.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_state(&self) -> MutexGuard<'_, FetchState<T>> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn normalize_error(err: &anyhow::Error) -> String {
    let message = err.to_string();
    if message.trim().is_empty() {
        "An unexpected error occurred".to_string()
    } else {
        message
    }
}

/// Builder returned by [`crate::Gate::data_fetch`].
pub struct DataFetchBuilder<P, T> {
    ctx: Arc<FetchContext>,
    name: String,
    fetcher: FetchFn<P, T>,
    options: FetchOptions,
    params: Option<P>,
    dependencies: Vec<Value>,
}

impl<P, T> DataFetchBuilder<P, T>
where
    P: Serialize + Clone + Send + Sync + 'static,
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    pub(crate) fn new(ctx: Arc<FetchContext>, name: String, fetcher: FetchFn<P, T>) -> Self {
        Self {
            ctx,
            name,
            fetcher,
            options: FetchOptions::default(),
            params: None,
            dependencies: Vec::new(),
        }
    }

    pub fn params(mut self, params: P) -> Self {
        self.params = Some(params);
        self
    }

    pub fn dependencies(mut self, dependencies: Vec<Value>) -> Self {
        self.dependencies = dependencies;
        self
    }

    pub fn cache_key(mut self, key: impl Into<String>) -> Self {
        self.options.cache_key = Some(key.into());
        self
    }

    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.options.cache_ttl = Some(ttl);
        self
    }

    pub fn disable_cache(mut self, disable: bool) -> Self {
        self.options.disable_cache = disable;
        self
    }

    pub fn debounce(mut self, delay: Duration) -> Self {
        self.options.debounce = Some(delay);
        self
    }

    pub fn skip(mut self, skip: bool) -> Self {
        self.options.skip = skip;
        self
    }

    /// Replace all options at once.
    pub fn options(mut self, options: FetchOptions) -> Self {
        self.options = options;
        self
    }

    pub fn build(self) -> DataFetch<P, T> {
        let params_value = params_value(&self.params);
        DataFetch {
            name: self.name,
            fetcher: self.fetcher,
            options: self.options,
            ctx: self.ctx,
            tracked: Mutex::new(Tracked {
                params: self.params,
                params_value,
                dependencies: self.dependencies,
            }),
            state: Mutex::new(FetchState::default()),
            debounce_ticket: AtomicU64::new(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::Config;
    use crate::fetch::alert::{LogAlerter, MockAlerter};
    use crate::gate::Gate;
    use crate::store::MemoryStore;
    use serde::Deserialize;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    async fn gate_with(config: Config, alerter: Arc<dyn Alerter>) -> (Gate, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let store = Arc::new(MemoryStore::new());
        let gate = Gate::create_with(config, store, clock.clone(), alerter).await;
        gate.cache().wait_loaded().await;
        (gate, clock)
    }

    async fn test_gate() -> (Gate, Arc<ManualClock>) {
        gate_with(Config::default(), Arc::new(LogAlerter)).await
    }

    type Users = Vec<String>;

    fn users_fetcher(
        calls: Arc<AtomicUsize>,
        delay: Duration,
    ) -> impl Fn(Option<()>) -> BoxFuture<'static, anyhow::Result<Users>> + Send + Sync + 'static
    {
        move |_| {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                Ok::<_, anyhow::Error>(vec!["ana".to_string(), "ben".to_string()])
            }
            .boxed()
        }
    }

    /// Returns the number of the call that produced it.
    fn numbered_fetcher(
        calls: Arc<AtomicUsize>,
    ) -> impl Fn(Option<()>) -> BoxFuture<'static, anyhow::Result<usize>> + Send + Sync + 'static
    {
        move |_| {
            let calls = calls.clone();
            async move { Ok::<_, anyhow::Error>(calls.fetch_add(1, Ordering::SeqCst) + 1) }.boxed()
        }
    }

    #[tokio::test]
    async fn test_end_to_end_cache_scenario() {
        let (gate, _) = test_gate().await;
        let calls = Arc::new(AtomicUsize::new(0));
        let users = gate
            .data_fetch("getUsers", users_fetcher(calls.clone(), Duration::ZERO))
            .cache_key("users-all")
            .cache_ttl(Duration::from_millis(60_000))
            .build();

        users.start().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(gate.usage().usage_stats().reads, 1);
        let first = users.state();
        assert_eq!(first.data, Some(vec!["ana".to_string(), "ben".to_string()]));
        assert!(gate.cache().has("users-all"));

        users.refetch(None).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1, "second call is a cache hit");
        assert_eq!(gate.usage().usage_stats().reads, 1);
        assert_eq!(users.state().data, first.data);

        assert_eq!(users.clear_cache(), 1);
        users.refetch(None).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(gate.usage().usage_stats().reads, 2);
    }

    #[tokio::test]
    async fn test_concurrent_calls_coalesce() {
        let (gate, _) = test_gate().await;
        let calls = Arc::new(AtomicUsize::new(0));
        let here = gate
            .data_fetch("getUsers", users_fetcher(calls.clone(), Duration::from_millis(20)))
            .disable_cache(true)
            .build();
        let there = gate
            .data_fetch("getUsers", users_fetcher(calls.clone(), Duration::from_millis(20)))
            .disable_cache(true)
            .build();

        tokio::join!(here.refetch(None), here.refetch(None), there.refetch(None));

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(gate.usage().usage_stats().reads, 1);
        assert!(here.state().data.is_some());
        assert_eq!(here.state(), there.state());
        assert!(gate.in_flight().is_empty());
    }

    #[tokio::test]
    async fn test_loading_flag_while_in_flight() {
        let (gate, _) = test_gate().await;
        let calls = Arc::new(AtomicUsize::new(0));
        let users = gate
            .data_fetch("getUsers", users_fetcher(calls, Duration::from_millis(20)))
            .build();

        let (_, loading_during) = tokio::join!(users.refetch(None), async {
            tokio::task::yield_now().await;
            users.state().loading
        });
        assert!(loading_during);
        assert!(!users.state().loading);
    }

    #[tokio::test]
    async fn test_rate_limit_rejects_then_recovers() {
        let mut config = Config::default();
        config.rate_limit.max_calls = 3;
        config.rate_limit.window_ms = 1_000;
        let (gate, clock) = gate_with(config, Arc::new(LogAlerter)).await;
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = gate
            .data_fetch("getFeed", numbered_fetcher(calls.clone()))
            .disable_cache(true)
            .build();

        for _ in 0..4 {
            counter.refetch(None).await;
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let state = counter.state();
        assert_eq!(state.data, Some(3));
        assert_eq!(state.error, None);
        assert!(!state.loading);

        clock.advance(Duration::from_millis(1_001));
        counter.refetch(None).await;
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(counter.state().data, Some(4));
    }

    #[tokio::test]
    async fn test_failure_sets_error_keeps_data_and_alerts() {
        let mut alerter = MockAlerter::new();
        alerter
            .expect_alert()
            .withf(|title, message| {
                title.to_string() == "Error" && message.to_string() == "Network request failed"
            })
            .times(1)
            .return_const(());
        let (gate, _) = gate_with(Config::default(), Arc::new(alerter)).await;

        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let events = gate
            .data_fetch("getEvents", move |_: Option<()>| {
                let n = c.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Ok(vec![1u32, 2])
                    } else {
                        Err(anyhow::anyhow!("Network request failed"))
                    }
                }
            })
            .disable_cache(true)
            .build();

        events.start().await;
        assert_eq!(events.state().data, Some(vec![1, 2]));
        events.refetch(None).await;
        let state = events.state();
        assert_eq!(state.data, Some(vec![1, 2]), "stale data survives a failure");
        assert_eq!(state.error.as_deref(), Some("Network request failed"));
        assert!(!state.loading);
    }

    #[tokio::test]
    async fn test_auth_failure_is_silent() {
        let mut alerter = MockAlerter::new();
        alerter.expect_alert().never();
        let (gate, _) = gate_with(Config::default(), Arc::new(alerter)).await;

        let profile = gate
            .data_fetch("getCurrentUser", |_: Option<()>| async {
                Err::<String, _>(anyhow::anyhow!("User (role: guests) missing scope (account)"))
            })
            .build();
        profile.start().await;
        let state = profile.state();
        assert!(state.error.unwrap().contains("missing scope"));
        assert_eq!(state.data, None);
        assert!(gate.cache().is_empty(), "failures are never cached");
    }

    #[tokio::test]
    async fn test_skip_gates_automatic_fetches_only() {
        let (gate, _) = test_gate().await;
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let search = gate
            .data_fetch("searchUsers", move |q: Option<String>| {
                c.fetch_add(1, Ordering::SeqCst);
                async move { Ok::<_, anyhow::Error>(q.unwrap_or_default()) }
            })
            .params("an".to_string())
            .skip(true)
            .build();

        search.start().await;
        assert!(!search.update(Some("ana".into()), vec![]).await);
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        search.refetch(None).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(search.state().data.as_deref(), Some("ana"));
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct TravelQuery {
        user_id: String,
        page: u32,
    }

    fn query(page: u32) -> TravelQuery {
        TravelQuery {
            user_id: "u1".into(),
            page,
        }
    }

    #[tokio::test]
    async fn test_update_refetches_on_deep_change() {
        let (gate, _) = test_gate().await;
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let travel = gate
            .data_fetch("getAnnouncements", move |q: Option<TravelQuery>| {
                c.fetch_add(1, Ordering::SeqCst);
                async move { Ok::<_, anyhow::Error>(q.map(|q| q.page).unwrap_or(0)) }
            })
            .params(query(1))
            .disable_cache(true)
            .build();

        travel.start().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        assert!(!travel.update(Some(query(1)), vec![]).await, "equal value, new instance");
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        assert!(travel.update(Some(query(2)), vec![]).await);
        assert_eq!(travel.state().data, Some(2));

        assert!(travel.update(Some(query(2)), vec![json!("refresh-1")]).await);
        assert!(!travel.update(Some(query(2)), vec![json!("refresh-1")]).await);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_derived_keys_and_pattern_clear() {
        let (gate, _) = test_gate().await;
        let events = gate
            .data_fetch("getEvents", |q: Option<TravelQuery>| async move {
                Ok::<_, anyhow::Error>(q.map(|q| q.page))
            })
            .build();
        let by_user = gate
            .data_fetch("getEventsByUser", |_: Option<()>| async {
                Ok::<_, anyhow::Error>(0u32)
            })
            .build();

        events.refetch(Some(query(1))).await;
        events.refetch(Some(query(2))).await;
        by_user.start().await;
        assert_eq!(
            events.cache_key().unwrap(),
            r#"getEvents-{"page":2,"user_id":"u1"}"#
        );
        assert_eq!(gate.cache().len(), 3);

        assert_eq!(events.clear_cache(), 2);
        assert_eq!(gate.cache().keys(), vec!["getEventsByUser".to_string()]);
    }

    #[tokio::test]
    async fn test_ttl_chosen_by_key_rules() {
        let (gate, clock) = test_gate().await;
        let profile = gate
            .data_fetch("getUserProfile", |_: Option<()>| async {
                Ok::<_, anyhow::Error>("ana".to_string())
            })
            .build();
        let feed = gate
            .data_fetch("getFeed", |_: Option<()>| async {
                Ok::<_, anyhow::Error>(vec![1u8])
            })
            .build();
        profile.start().await;
        feed.start().await;

        clock.advance(Duration::from_secs(3 * 60));
        assert!(gate.cache().has("getUserProfile"));
        assert!(!gate.cache().has("getFeed"));

        clock.advance(Duration::from_secs(28 * 60));
        assert!(!gate.cache().has("getUserProfile"));
    }

    #[tokio::test]
    async fn test_disable_cache_always_hits_backend() {
        let (gate, _) = test_gate().await;
        let calls = Arc::new(AtomicUsize::new(0));
        let users = gate
            .data_fetch("getUsers", users_fetcher(calls.clone(), Duration::ZERO))
            .disable_cache(true)
            .build();
        users.start().await;
        users.refetch(None).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(gate.usage().usage_stats().reads, 2);
        assert!(gate.cache().is_empty());
        assert_eq!(gate.cache().stats().request_count, 0);
    }

    #[tokio::test]
    async fn test_debounce_runs_only_latest_trigger() {
        let (gate, _) = test_gate().await;
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let search = gate
            .data_fetch("searchEvents", move |q: Option<u32>| {
                c.fetch_add(1, Ordering::SeqCst);
                async move { Ok::<_, anyhow::Error>(q.unwrap_or(0)) }
            })
            .debounce(Duration::from_millis(30))
            .build();

        tokio::join!(
            search.refetch(Some(1)),
            search.refetch(Some(2)),
            search.refetch(Some(3)),
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(search.state().data, Some(3));

        search.refetch(Some(4)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unserializable_params_fail_without_backend_call() {
        let (gate, _) = test_gate().await;
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        type Grid = std::collections::HashMap<(u32, u32), u32>;
        let mut grid = Grid::new();
        grid.insert((1, 2), 3);
        let lookup = gate
            .data_fetch("getGrid", move |_: Option<Grid>| {
                c.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, anyhow::Error>(0u32) }
            })
            .params(grid)
            .build();

        assert!(matches!(lookup.cache_key(), Err(GateError::Fetch(_))));
        lookup.start().await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        let state = lookup.state();
        assert!(state.error.unwrap().contains("could not be serialized"));
        assert!(!state.loading);
        assert_eq!(gate.usage().usage_stats().reads, 0);
    }

    #[tokio::test]
    async fn test_explicit_key_clear_cache() {
        let (gate, _) = test_gate().await;
        let users = gate
            .data_fetch("getUsers", users_fetcher(Arc::new(AtomicUsize::new(0)), Duration::ZERO))
            .cache_key("users-all")
            .build();
        assert_eq!(users.clear_cache(), 0);
        users.start().await;
        assert_eq!(users.clear_cache(), 1);
        assert!(gate.cache().is_empty());
    }
}
