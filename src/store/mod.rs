//! Durable key-value storage used to mirror cache entries and usage counters.
//!
//! The [`KeyValueStore`] trait is the only persistence seam. Values are
//! serialized JSON text. Writes from the cache manager and usage monitor go
//! through a [`Persister`], a background task that applies snapshot writes in
//! order without ever blocking the caller.

pub mod file;
pub mod memory;
pub mod persister;

use async_trait::async_trait;

use crate::error::Result;

pub use file::FileStore;
pub use memory::MemoryStore;
pub use persister::Persister;

/// Async persistent key-value store.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read a single value.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Insert or overwrite a value.
    async fn set(&self, key: &str, value: String) -> Result<()>;

    /// Delete a value. Missing keys are not an error.
    async fn remove(&self, key: &str) -> Result<()>;

    /// List every key currently stored.
    async fn get_all_keys(&self) -> Result<Vec<String>>;

    /// Read many values at once, preserving the order of `keys`.
    async fn multi_get(&self, keys: &[String]) -> Result<Vec<(String, Option<String>)>> {
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            out.push((key.clone(), self.get(key).await?));
        }
        Ok(out)
    }
}
