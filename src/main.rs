//! Entity Repo demo binary
//!
//! Seeds an in-memory customer collection, wraps it in the caching decorator
//! and exercises every read strategy, logging what each one cost.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use entity_repo::{
    spawn_cleanup_task, CachedRepository, Config, Entity, GenericRepository, InMemoryStore,
    MemoryCache, Predicate, QueryOptions, QueryStrategy, Repository,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Customer {
    id: u64,
    name: String,
    city: String,
    lifetime_value_cents: u64,
}

impl Entity for Customer {
    type Id = u64;

    fn id(&self) -> &u64 {
        &self.id
    }
}

const CITIES: [&str; 4] = ["Paris", "Lyon", "Marseille", "Toulouse"];

fn seed(count: u64) -> impl Iterator<Item = Customer> {
    (1..=count).map(|id| Customer {
        id,
        name: format!("customer-{:05}", id),
        city: CITIES[(id % CITIES.len() as u64) as usize].to_string(),
        lifetime_value_cents: (id * 7_919) % 100_000,
    })
}

/// Main entry point for the demo.
///
/// # Startup Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load configuration from environment variables
/// 3. Build store, repository core and caching decorator
/// 4. Start background cache cleanup task
/// 5. Run every read strategy, then a write followed by a read
/// 6. Abort the cleanup task on completion or Ctrl+C
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "entity_repo=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().context("invalid configuration")?;
    info!(
        strategy = %config.query.strategy,
        chunk_size = config.query.chunk_size(),
        partitions = config.query.parallel_partitions(),
        buffer_size = config.query.streaming_buffer_size(),
        caching = config.cache.enable_caching,
        "configuration loaded"
    );

    let store = Arc::new(InMemoryStore::with_entities(seed(5_000)));
    let core = Arc::new(GenericRepository::with_options(
        Arc::clone(&store),
        config.query.clone(),
    ));
    let cache = MemoryCache::new(config.cache_max_entries);
    let repo: CachedRepository<Customer, _> =
        CachedRepository::new(core, Arc::new(cache.clone()), config.cache.clone());

    let cleanup_handle = spawn_cleanup_task(cache.store(), config.cleanup_interval);
    let cancel = CancellationToken::new();

    let outcome = tokio::select! {
        outcome = run_demo(&repo, &config, &cancel) => outcome,
        _ = signal::ctrl_c() => {
            warn!("received Ctrl+C, cancelling");
            cancel.cancel();
            Ok(())
        }
    };

    cleanup_handle.abort();
    let stats = cache.stats().await;
    info!(
        hits = stats.hits,
        misses = stats.misses,
        hit_rate = stats.hit_rate(),
        store_reads = store.stats().total_reads(),
        "demo finished"
    );
    outcome
}

async fn run_demo<R>(repo: &R, config: &Config, cancel: &CancellationToken) -> anyhow::Result<()>
where
    R: Repository<Customer>,
{
    let started = Instant::now();
    let rows = repo.get_all(cancel).await?;
    info!(rows = rows.len(), elapsed = ?started.elapsed(), "standard read");

    let started = Instant::now();
    let rows = repo.get_all(cancel).await?;
    info!(rows = rows.len(), elapsed = ?started.elapsed(), "standard read again");

    let rows = repo
        .get_all_chunked(config.query.chunk_size(), cancel)
        .await?;
    info!(rows = rows.len(), "chunked read");

    let rows = repo
        .get_all_parallel(config.query.parallel_partitions(), cancel)
        .await?;
    info!(rows = rows.len(), "parallel read");

    let mut stream = repo
        .get_all_streaming(config.query.streaming_buffer_size(), cancel)
        .await?;
    let mut streamed = 0usize;
    while let Some(row) = stream.next().await {
        row?;
        streamed += 1;
    }
    info!(rows = streamed, peak_buffered = stream.peak_buffered(), "streaming read");

    let snapshot = repo.get_all_memory_mapped(cancel).await?;
    info!(rows = snapshot.len(), loaded_at = %snapshot.loaded_at(), "memory-mapped read");

    let configured = repo
        .get_all_configurable(&config.query, cancel)
        .await?
        .into_vec()
        .await?;
    info!(rows = configured.len(), strategy = %config.query.strategy, "configured read");

    let lyon = repo.find(&Predicate::eq("city", "Lyon"), cancel).await?;
    info!(rows = lyon.len(), "filtered read");

    let mut first = repo.get_by_id(&1, cancel).await?;
    first.lifetime_value_cents += 10_000;
    let expected = first.lifetime_value_cents;
    repo.update(first, cancel).await?;
    let reread = repo.get_by_id(&1, cancel).await?;
    anyhow::ensure!(
        reread.lifetime_value_cents == expected,
        "read after update returned a stale value"
    );
    info!(id = reread.id, "read after write is consistent");

    let parallel = QueryOptions::new(QueryStrategy::Parallel)
        .with_parallel_partitions(8)?
        .with_chunk_size(250)?;
    let rows = repo
        .get_all_configurable(&parallel, cancel)
        .await?
        .into_vec()
        .await?;
    info!(rows = rows.len(), "parallel read after write");

    Ok(())
}
