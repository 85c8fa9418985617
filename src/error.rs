//! Error types for the data-access layer
//!
//! Provides unified error handling using thiserror. Every error is `Clone` so a
//! single in-flight fetch can hand the same outcome to all of its waiters.

use thiserror::Error;

// == Repository Error Enum ==
/// Errors surfaced to callers of a repository.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RepoError {
    /// Point lookup for an identifier that does not exist
    #[error("Entity not found: {0}")]
    NotFound(String),

    /// Non-positive size or unknown strategy, rejected before any store access
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The entity store failed
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Cancelled by the caller or timed out
    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    /// Cache backend could not be used. Never returned by the caching decorator,
    /// which fails open instead.
    #[error("Cache unavailable: {0}")]
    CacheUnavailable(String),
}

impl RepoError {
    /// Builds an `InvalidConfiguration` error naming the offending setting.
    pub fn invalid_config(setting: &str, value: usize) -> Self {
        RepoError::InvalidConfiguration(format!("{} must be positive, got {}", setting, value))
    }
}

// == Store Error Enum ==
/// Failures reported by an entity store adapter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Connectivity problem, the store could not be reached
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Constraint violation such as a duplicate identifier
    #[error("constraint violation: {0}")]
    Constraint(String),

    /// The row changed or vanished underneath the write
    #[error("concurrency conflict: {0}")]
    Conflict(String),

    /// Record could not be encoded or decoded
    #[error("serialization failed: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

// == Cache Error Enum ==
/// Errors raised by the cache engine and its backends.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// Key not found in cache
    #[error("Key not found: {0}")]
    NotFound(String),

    /// Key has expired
    #[error("Key expired: {0}")]
    Expired(String),

    /// Invalid key or value
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Cache is full and eviction failed
    #[error("Cache full: {0}")]
    CacheFull(String),

    /// Backend cannot be reached
    #[error("Cache backend unavailable: {0}")]
    Unavailable(String),
}

impl From<CacheError> for RepoError {
    fn from(err: CacheError) -> Self {
        RepoError::CacheUnavailable(err.to_string())
    }
}

// == Result Type Aliases ==
/// Convenience Result type for repository operations.
pub type Result<T> = std::result::Result<T, RepoError>;

/// Result type for entity store adapters.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Result type for cache engine operations.
pub type CacheResult<T> = std::result::Result<T, CacheError>;
