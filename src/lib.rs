//! Readgate: a client-side read-through cache and database usage governor.
//!
//! A [`Gate`] bundles the shared services:
//!
//! - [`cache::CacheManager`]: TTL cache mirrored to a [`store::KeyValueStore`]
//! - [`usage::UsageMonitor`]: daily read/write counters against a soft quota
//! - [`fetch::RateLimiter`]: fixed-window limiter per cache key
//! - in-flight de-duplication for concurrent fetches of one key
//!
//! Call sites use [`Gate::data_fetch`] to get a [`fetch::DataFetch`] that
//! routes every backend read through those services.
//!
//! ```rust
//! # tokio_test::block_on(async {
//! use std::sync::Arc;
//! use std::time::Duration;
//! use readgate::{Config, Gate, MemoryStore};
//!
//! let gate = Gate::create(Config::default(), Arc::new(MemoryStore::new())).await;
//! let users = gate
//!     .data_fetch("getUsers", |_: Option<()>| async {
//!         Ok::<_, anyhow::Error>(vec!["ana".to_string()])
//!     })
//!     .cache_key("users-all")
//!     .cache_ttl(Duration::from_secs(60))
//!     .build();
//!
//! users.start().await;
//! users.refetch(None).await; // served from cache
//! assert_eq!(gate.usage().usage_stats().reads, 1);
//! # });
//! ```

pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod fetch;
pub mod gate;
pub mod store;
pub mod usage;

pub use cache::{CacheManager, CacheStats};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use error::{GateError, Result};
pub use fetch::{DataFetch, DataFetchBuilder, FetchOptions, FetchState};
pub use gate::Gate;
pub use store::{FileStore, KeyValueStore, MemoryStore};
pub use usage::{Access, UsageLevel, UsageMonitor, UsageReport};
