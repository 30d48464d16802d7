//! Error types for readgate.
//!
//! Only backend fetch failures ever reach a fetch call site, and they do so as
//! a normalised message in [`crate::fetch::FetchState::error`]. Everything in
//! this enum belongs to the infrastructure layer: the store, serialization,
//! configuration and invalidation patterns.

use thiserror::Error;

/// Errors produced by the caching and usage-governance layer.
#[derive(Debug, Error)]
pub enum GateError {
    /// The persistent key-value store rejected an operation.
    #[error("Store error: {0}")]
    Store(String),

    /// A payload or persisted record could not be (de)serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Filesystem failure in a file-backed store or config load.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid or unreadable configuration.
    #[error("Config error: {0}")]
    Config(String),

    /// Invalid cache invalidation pattern.
    #[error("Invalid pattern: {0}")]
    Pattern(#[from] regex::Error),

    /// A fetch could not be issued, e.g. its parameters have no cache key.
    #[error("Fetch failed: {0}")]
    Fetch(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, GateError>;
