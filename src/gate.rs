//! Wiring for the whole layer: one store, one cache, one usage monitor, one
//! rate limiter, and the in-flight registry shared by every call site.

use std::future::Future;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::info;

use crate::cache::CacheManager;
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::error::Result;
use crate::fetch::{
    fetch_fn, Alerter, DataFetchBuilder, FetchContext, InFlight, LogAlerter, RateLimiter,
    TtlPolicy,
};
use crate::store::{FileStore, KeyValueStore};
use crate::usage::UsageMonitor;

pub struct Gate {
    config: Config,
    cache: Arc<CacheManager>,
    usage: Arc<UsageMonitor>,
    ctx: Arc<FetchContext>,
}

impl Gate {
    /// Build a gate over `store` with the system clock and log-only alerts.
    pub async fn create(config: Config, store: Arc<dyn KeyValueStore>) -> Self {
        Self::create_with(config, store, Arc::new(SystemClock), Arc::new(LogAlerter)).await
    }

    pub async fn create_with(
        config: Config,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        alerter: Arc<dyn Alerter>,
    ) -> Self {
        let cache = CacheManager::create(
            Arc::clone(&store),
            config.cache.clone(),
            Arc::clone(&clock),
        );
        let usage = UsageMonitor::open(
            store,
            config.usage.clone(),
            Arc::clone(&clock),
            Arc::clone(&cache),
        )
        .await;
        let ctx = Arc::new(FetchContext {
            cache: Arc::clone(&cache),
            usage: Arc::clone(&usage),
            limiter: Arc::new(RateLimiter::from_config(&config.rate_limit, clock)),
            in_flight: Arc::new(InFlight::new()),
            alerter,
            ttl_policy: TtlPolicy::from_config(&config.fetch),
            auth_signatures: config.fetch.auth_error_signatures.clone(),
        });
        Self {
            config,
            cache,
            usage,
            ctx,
        }
    }

    /// Open the file-backed store at the configured path and build a gate on it.
    pub async fn open_default(config: Config) -> Result<Self> {
        let path = config.store_path();
        let store = FileStore::open(path.clone()).await?;
        info!(path = %path.display(), "Opened persistent store");
        Ok(Self::create(config, Arc::new(store)).await)
    }

    /// Start configuring a call site for the backend function `f`.
    ///
    /// `name` identifies the function: it prefixes derived cache keys,
    /// attributes reads in the usage log, and scopes `clear_cache`.
    pub fn data_fetch<P, T, F, Fut>(
        &self,
        name: impl Into<String>,
        f: F,
    ) -> DataFetchBuilder<P, T>
    where
        P: Serialize + Clone + Send + Sync + 'static,
        T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
        F: Fn(Option<P>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        DataFetchBuilder::new(Arc::clone(&self.ctx), name.into(), fetch_fn(f))
    }

    pub fn cache(&self) -> &Arc<CacheManager> {
        &self.cache
    }

    pub fn usage(&self) -> &Arc<UsageMonitor> {
        &self.usage
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.ctx.limiter
    }

    pub fn in_flight(&self) -> &Arc<InFlight> {
        &self.ctx.in_flight
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Write all pending cache and usage changes through to the store.
    pub async fn flush(&self) {
        self.cache.flush().await;
        self.usage.flush().await;
    }

    /// Flush and stop the background writers.
    pub async fn shutdown(&self) {
        self.cache.shutdown().await;
        self.usage.shutdown().await;
    }
}
