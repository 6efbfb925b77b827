//! Process bootstrap: build the persistent store, start the cache handle,
//! log stats periodically, and shut down cleanly.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use memelab_core::TtlPolicy;
use memelab_storage::{
    CacheConfig, CacheHandle, CacheStats, InMemoryStore, LmdbStore, PersistentStore,
    PostgresStore, ResponseCache, SweepSnapshot, SystemClock,
};
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

use crate::config::{BackendKind, RuntimeConfig};
use crate::db::DbConfig;
use crate::error::RuntimeResult;

/// Final counters reported when the runtime stops.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub stats: CacheStats,
    pub sweep: SweepSnapshot,
}

/// Build the configured backend and serve until `shutdown` resolves.
pub async fn run<F>(
    runtime: &RuntimeConfig,
    cache_config: CacheConfig,
    db_config: &DbConfig,
    shutdown: F,
) -> RuntimeResult<RunSummary>
where
    F: Future<Output = ()>,
{
    let policy = runtime.load_policy()?;
    tracing::info!(
        backend = runtime.backend.as_str(),
        sweep_interval_secs = cache_config.sweep_interval.as_secs(),
        detach_writes = cache_config.detach_persistent_writes,
        max_ttl_mins = policy.max_ttl().as_secs() / 60,
        "Starting response cache"
    );

    match runtime.backend {
        BackendKind::Postgres => {
            let pool = db_config.create_pool()?;
            let store = PostgresStore::new(pool);
            if let Err(e) = store.ensure_schema().await {
                // The cache still serves from memory while the database is down.
                tracing::warn!(
                    error = %e,
                    host = %db_config.host,
                    dbname = %db_config.dbname,
                    "Could not ensure cache schema"
                );
            }
            serve(Arc::new(store), policy, cache_config, runtime.stats_interval, shutdown).await
        }
        BackendKind::Lmdb => {
            let store = LmdbStore::open(&runtime.lmdb_path, runtime.lmdb_max_size_mb)?;
            tracing::info!(
                path = %runtime.lmdb_path.display(),
                max_size_mb = runtime.lmdb_max_size_mb,
                "LMDB store opened"
            );
            serve(Arc::new(store), policy, cache_config, runtime.stats_interval, shutdown).await
        }
        BackendKind::Memory => {
            tracing::warn!("Using in-memory persistent tier; entries will not survive a restart");
            serve(
                Arc::new(InMemoryStore::new()),
                policy,
                cache_config,
                runtime.stats_interval,
                shutdown,
            )
            .await
        }
    }
}

/// Run a cache over `store` until `shutdown` resolves.
///
/// Logs a stats line every `stats_interval` (never, if zero).
pub async fn serve<S, F>(
    store: Arc<S>,
    policy: TtlPolicy,
    cache_config: CacheConfig,
    stats_interval: Duration,
    shutdown: F,
) -> RuntimeResult<RunSummary>
where
    S: PersistentStore,
    F: Future<Output = ()>,
{
    let handle = CacheHandle::start(ResponseCache::new(store, policy, SystemClock, cache_config));
    let cache = handle.cache();

    let mut stats_ticker = (!stats_interval.is_zero()).then(|| {
        let mut ticker = interval_at(Instant::now() + stats_interval, stats_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker
    });

    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("Shutdown signal received");
                break;
            }
            _ = next_tick(&mut stats_ticker) => {
                log_stats(&cache.stats());
            }
        }
    }

    let stats = cache.stats();
    log_stats(&stats);
    let sweep = handle.shutdown().await;
    Ok(RunSummary { stats, sweep })
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

fn log_stats(stats: &CacheStats) {
    tracing::info!(
        entry_count = stats.entry_count,
        memory_bytes = stats.memory_bytes,
        memory_hits = stats.memory_hits,
        persistent_hits = stats.persistent_hits,
        misses = stats.misses,
        persistence_errors = stats.persistence_errors,
        hit_rate = stats.hit_rate(),
        entries_by_tool = ?stats.entries_by_tool,
        "Cache stats"
    );
}
