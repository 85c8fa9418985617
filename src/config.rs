//! Configuration Module
//!
//! Query tuning (`QueryOptions`), caching policy (`CacheOptions`) and the
//! environment-driven `Config` the binary starts from.

use std::env;
use std::fmt;
use std::num::NonZeroUsize;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{RepoError, Result};

// == Defaults ==
const DEFAULT_CHUNK_SIZE: usize = 1000;
const DEFAULT_PARALLEL_PARTITIONS: usize = 4;
const DEFAULT_STREAMING_BUFFER_SIZE: usize = 100;
const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

// == Query Strategy ==
/// Read-execution mode for full-collection reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryStrategy {
    /// Single unbounded fetch-all
    #[default]
    Standard,
    /// Keyset pagination ordered by identifier
    Chunked,
    /// Concurrent sub-scans over disjoint hash partitions
    Parallel,
    /// Lazy single-pass sequence with bounded read-ahead
    Streaming,
    /// Process-local immutable snapshot
    MemoryMapped,
}

impl QueryStrategy {
    /// Returns the configuration name of the strategy.
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryStrategy::Standard => "standard",
            QueryStrategy::Chunked => "chunked",
            QueryStrategy::Parallel => "parallel",
            QueryStrategy::Streaming => "streaming",
            QueryStrategy::MemoryMapped => "memory_mapped",
        }
    }
}

impl fmt::Display for QueryStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueryStrategy {
    type Err = RepoError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "standard" => Ok(QueryStrategy::Standard),
            "chunked" => Ok(QueryStrategy::Chunked),
            "parallel" => Ok(QueryStrategy::Parallel),
            "streaming" => Ok(QueryStrategy::Streaming),
            "memory_mapped" | "memorymapped" => Ok(QueryStrategy::MemoryMapped),
            other => Err(RepoError::InvalidConfiguration(format!(
                "unknown query strategy '{}'",
                other
            ))),
        }
    }
}

// == Query Options ==
/// Strategy selection and tuning for reads.
///
/// Sizes are held as `NonZeroUsize`, so a value of this type is always valid;
/// the `with_*` setters reject zero when the options are built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryOptions {
    /// Strategy used by the configurable entry point
    pub strategy: QueryStrategy,
    chunk_size: NonZeroUsize,
    parallel_partitions: NonZeroUsize,
    streaming_buffer_size: NonZeroUsize,
    /// Upper bound on the wall time of a single repository call
    pub command_timeout: Duration,
}

impl QueryOptions {
    /// Creates options for `strategy` with default sizes and timeout.
    pub fn new(strategy: QueryStrategy) -> Self {
        Self {
            strategy,
            ..Self::default()
        }
    }

    /// Sets the page size used by chunked scans.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Result<Self> {
        self.chunk_size = positive("chunk_size", chunk_size)?;
        Ok(self)
    }

    /// Sets the number of partitions scanned concurrently.
    pub fn with_parallel_partitions(mut self, partitions: usize) -> Result<Self> {
        self.parallel_partitions = positive("parallel_partitions", partitions)?;
        Ok(self)
    }

    /// Sets the read-ahead buffer of streaming reads.
    pub fn with_streaming_buffer_size(mut self, buffer_size: usize) -> Result<Self> {
        self.streaming_buffer_size = positive("streaming_buffer_size", buffer_size)?;
        Ok(self)
    }

    /// Sets the per-call timeout.
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size.get()
    }

    pub fn parallel_partitions(&self) -> usize {
        self.parallel_partitions.get()
    }

    pub fn streaming_buffer_size(&self) -> usize {
        self.streaming_buffer_size.get()
    }
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            strategy: QueryStrategy::Standard,
            chunk_size: NonZeroUsize::new(DEFAULT_CHUNK_SIZE).unwrap_or(NonZeroUsize::MIN),
            parallel_partitions: NonZeroUsize::new(DEFAULT_PARALLEL_PARTITIONS)
                .unwrap_or(NonZeroUsize::MIN),
            streaming_buffer_size: NonZeroUsize::new(DEFAULT_STREAMING_BUFFER_SIZE)
                .unwrap_or(NonZeroUsize::MIN),
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }
}

/// Validates a size setting, rejecting zero.
pub(crate) fn positive(setting: &str, value: usize) -> Result<NonZeroUsize> {
    NonZeroUsize::new(value).ok_or_else(|| RepoError::invalid_config(setting, value))
}

// == Cache Options ==
/// Caching policy for one entity collection, fixed for a decorator's lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheOptions {
    /// When false the decorator is a pure pass-through
    pub enable_caching: bool,
    /// TTL for reads without a more specific duration (filtered lookups)
    pub default_cache_duration: Duration,
    /// TTL for point lookups
    pub get_by_id_cache_duration: Duration,
    /// TTL for full-collection reads
    pub get_all_cache_duration: Duration,
    /// Namespace of every key the decorator writes
    pub cache_key_prefix: String,
}

impl CacheOptions {
    /// Creates enabled caching with default durations under `prefix`.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            cache_key_prefix: prefix.into(),
            ..Self::default()
        }
    }

    /// Creates a disabled policy; the decorator forwards every call.
    pub fn disabled() -> Self {
        Self {
            enable_caching: false,
            ..Self::default()
        }
    }
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            enable_caching: true,
            default_cache_duration: Duration::from_secs(300),
            get_by_id_cache_duration: Duration::from_secs(600),
            get_all_cache_duration: Duration::from_secs(120),
            cache_key_prefix: "repo".to_string(),
        }
    }
}

// == Config ==
/// Process configuration loaded from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    /// Default query options for repositories
    pub query: QueryOptions,
    /// Caching policy for decorated repositories
    pub cache: CacheOptions,
    /// Maximum number of entries the cache can hold
    pub cache_max_entries: usize,
    /// Background cleanup task interval in seconds
    pub cleanup_interval: u64,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `QUERY_STRATEGY` - standard, chunked, parallel, streaming, memory_mapped (default: standard)
    /// - `CHUNK_SIZE` - Page size for chunked scans (default: 1000)
    /// - `PARALLEL_PARTITIONS` - Concurrent partitions (default: 4)
    /// - `STREAMING_BUFFER_SIZE` - Streaming read-ahead (default: 100)
    /// - `COMMAND_TIMEOUT_SECS` - Per-call timeout (default: 30)
    /// - `CACHE_ENABLED` - Enables the caching decorator (default: true)
    /// - `CACHE_DEFAULT_TTL_SECS` / `CACHE_GET_BY_ID_TTL_SECS` / `CACHE_GET_ALL_TTL_SECS` (default: 300 / 600 / 120)
    /// - `CACHE_KEY_PREFIX` - Cache namespace (default: repo)
    /// - `CACHE_MAX_ENTRIES` - Cache capacity (default: 10000)
    /// - `CACHE_CLEANUP_INTERVAL_SECS` - Cleanup frequency (default: 1)
    ///
    /// Unparseable numbers fall back to their defaults; zero sizes and unknown
    /// strategies are configuration errors.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let strategy = match env::var("QUERY_STRATEGY") {
            Ok(value) => value.parse()?,
            Err(_) => defaults.query.strategy,
        };

        let query = QueryOptions::new(strategy)
            .with_chunk_size(env_or("CHUNK_SIZE", defaults.query.chunk_size()))?
            .with_parallel_partitions(env_or(
                "PARALLEL_PARTITIONS",
                defaults.query.parallel_partitions(),
            ))?
            .with_streaming_buffer_size(env_or(
                "STREAMING_BUFFER_SIZE",
                defaults.query.streaming_buffer_size(),
            ))?
            .with_command_timeout(Duration::from_secs(env_or(
                "COMMAND_TIMEOUT_SECS",
                defaults.query.command_timeout.as_secs(),
            )));

        let cache = CacheOptions {
            enable_caching: env_or("CACHE_ENABLED", defaults.cache.enable_caching),
            default_cache_duration: Duration::from_secs(env_or(
                "CACHE_DEFAULT_TTL_SECS",
                defaults.cache.default_cache_duration.as_secs(),
            )),
            get_by_id_cache_duration: Duration::from_secs(env_or(
                "CACHE_GET_BY_ID_TTL_SECS",
                defaults.cache.get_by_id_cache_duration.as_secs(),
            )),
            get_all_cache_duration: Duration::from_secs(env_or(
                "CACHE_GET_ALL_TTL_SECS",
                defaults.cache.get_all_cache_duration.as_secs(),
            )),
            cache_key_prefix: env::var("CACHE_KEY_PREFIX")
                .unwrap_or(defaults.cache.cache_key_prefix),
        };

        let cache_max_entries = positive(
            "cache_max_entries",
            env_or("CACHE_MAX_ENTRIES", defaults.cache_max_entries),
        )?
        .get();

        Ok(Self {
            query,
            cache,
            cache_max_entries,
            cleanup_interval: env_or("CACHE_CLEANUP_INTERVAL_SECS", defaults.cleanup_interval),
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            query: QueryOptions::default(),
            cache: CacheOptions::default(),
            cache_max_entries: 10_000,
            cleanup_interval: 1,
        }
    }
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
