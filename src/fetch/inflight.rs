//! Registry of backend fetches currently in flight, keyed by effective cache key.
//!
//! A fetch is registered as a [`Shared`] future so that any caller arriving
//! while it runs awaits the same result instead of issuing a second request.

use std::collections::HashMap;
use std::sync::Mutex;

use futures::future::{BoxFuture, Shared};
use serde_json::Value;

/// Result of one backend fetch: the JSON payload or a normalised error message.
pub type FetchOutcome = std::result::Result<Value, String>;

pub(crate) type SharedFetch = Shared<BoxFuture<'static, FetchOutcome>>;

#[derive(Default)]
pub struct InFlight {
    pending: Mutex<HashMap<String, SharedFetch>>,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn get(&self, key: &str) -> Option<SharedFetch> {
        self.lock().get(key).cloned()
    }

    pub(crate) fn insert(&self, key: &str, fetch: SharedFetch) {
        self.lock().insert(key.to_string(), fetch);
    }

    /// Insert `fetch` and unregister it when the returned guard drops, even if
    /// the registering caller is cancelled mid-await.
    pub(crate) fn register<'a>(&'a self, key: &'a str, fetch: SharedFetch) -> Registration<'a> {
        self.insert(key, fetch.clone());
        Registration {
            registry: self,
            key,
            fetch,
        }
    }

    /// Unregister `fetch`, unless a newer fetch has replaced it.
    pub(crate) fn finish(&self, key: &str, fetch: &SharedFetch) {
        let mut pending = self.lock();
        if pending.get(key).is_some_and(|f| f.ptr_eq(fetch)) {
            pending.remove(key);
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, SharedFetch>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }
}

pub(crate) struct Registration<'a> {
    registry: &'a InFlight,
    key: &'a str,
    fetch: SharedFetch,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        self.registry.finish(self.key, &self.fetch);
    }
}
