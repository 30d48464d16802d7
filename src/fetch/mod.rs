//! Read-through data fetching: key derivation, rate limiting, in-flight
//! coalescing, alerting, and the per-call-site orchestrator.

pub mod alert;
pub mod inflight;
pub mod key;
pub mod orchestrator;
pub mod rate_limit;

pub use alert::{is_auth_error, Alerter, LogAlerter};
pub use inflight::{FetchOutcome, InFlight};
pub use key::{derive_cache_key, key_prefix_pattern, TtlPolicy};
pub use orchestrator::{
    fetch_fn, DataFetch, DataFetchBuilder, FetchContext, FetchFn, FetchOptions, FetchState,
};
pub use rate_limit::RateLimiter;
