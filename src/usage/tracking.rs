//! Wrap a backend call so every invocation is recorded in the usage monitor.
//!
//! ```rust
//! # tokio_test::block_on(async {
//! use std::sync::Arc;
//! use readgate::usage::{with_usage_tracking, Access};
//! use readgate::{Config, Gate, MemoryStore};
//!
//! let gate = Gate::create(Config::default(), Arc::new(MemoryStore::new())).await;
//! let create_event = with_usage_tracking(
//!     gate.usage().clone(),
//!     "createEvent",
//!     Access::Write,
//!     |title: String| async move { Ok::<_, anyhow::Error>(title.len()) },
//! );
//! create_event("Lisbon trip".into()).await.unwrap();
//! assert_eq!(gate.usage().usage_stats().writes, 1);
//! # });
//! ```

use std::future::Future;
use std::sync::Arc;

use super::monitor::{Access, UsageMonitor};

/// Return a function that records one `access` against `source` and then calls `f`.
///
/// The access is recorded when the call is made, whether or not the backend
/// call later succeeds.
pub fn with_usage_tracking<A, F, Fut>(
    monitor: Arc<UsageMonitor>,
    source: impl Into<String>,
    access: Access,
    f: F,
) -> impl Fn(A) -> Fut + Send + Sync
where
    F: Fn(A) -> Fut + Send + Sync,
    Fut: Future,
{
    let source = source.into();
    move |arg: A| {
        monitor.record(access, &source);
        f(arg)
    }
}
