//! Cache handle and expired-row sweep.
//!
//! [`CacheHandle`] owns a shared [`ResponseCache`] together with the
//! background task that periodically deletes expired persistent rows. The
//! sweep starts when the handle is built and stops on [`CacheHandle::shutdown`]
//! or when the handle is dropped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use super::response_cache::{ResponseCache, DEFAULT_SWEEP_INTERVAL_SECS};
use super::traits::PersistentStore;
use crate::clock::{Clock, SystemClock};

// ============================================================================
// METRICS
// ============================================================================

/// Counters for sweep activity.
#[derive(Debug, Default)]
pub struct SweepMetrics {
    /// Sweep cycles completed
    pub cycles: AtomicU64,

    /// Persistent rows removed since startup
    pub rows_removed: AtomicU64,

    /// Cycles that failed against the persistent tier
    pub errors: AtomicU64,
}

impl SweepMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> SweepSnapshot {
        SweepSnapshot {
            cycles: self.cycles.load(Ordering::Relaxed),
            rows_removed: self.rows_removed.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// Sweep metrics at a point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct SweepSnapshot {
    pub cycles: u64,
    pub rows_removed: u64,
    pub errors: u64,
}

// ============================================================================
// BACKGROUND TASK
// ============================================================================

/// Delete expired persistent rows every `period` until shutdown is signalled.
///
/// The first sweep runs one full period after start. A sweep that overruns
/// its slot skips the missed ticks instead of bursting.
pub async fn expired_sweep_task<S, C>(
    cache: Arc<ResponseCache<S, C>>,
    period: Duration,
    metrics: Arc<SweepMetrics>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> SweepSnapshot
where
    S: PersistentStore,
    C: Clock,
{
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!(
        interval_secs = period.as_secs(),
        backend = cache.store().backend_name(),
        "Cache sweep task started"
    );

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                // A dropped sender means the handle is gone.
                if changed.is_err() || *shutdown_rx.borrow() {
                    tracing::info!("Cache sweep task shutting down");
                    break;
                }
            }

            _ = ticker.tick() => {
                sweep_once(&cache, &metrics).await;
            }
        }
    }

    let snapshot = metrics.snapshot();
    tracing::info!(
        cycles = snapshot.cycles,
        rows_removed = snapshot.rows_removed,
        errors = snapshot.errors,
        "Cache sweep task completed"
    );
    snapshot
}

async fn sweep_once<S, C>(cache: &ResponseCache<S, C>, metrics: &SweepMetrics)
where
    S: PersistentStore,
    C: Clock,
{
    metrics.cycles.fetch_add(1, Ordering::Relaxed);
    match cache.clean_expired().await {
        Ok(removed) => {
            metrics.rows_removed.fetch_add(removed, Ordering::Relaxed);
        }
        Err(e) => {
            metrics.errors.fetch_add(1, Ordering::Relaxed);
            tracing::error!(
                error = %e,
                backend = cache.store().backend_name(),
                "Cache sweep failed"
            );
        }
    }
}

// ============================================================================
// HANDLE
// ============================================================================

/// A response cache plus its running sweep.
pub struct CacheHandle<S, C = SystemClock>
where
    S: PersistentStore,
    C: Clock,
{
    cache: Arc<ResponseCache<S, C>>,
    metrics: Arc<SweepMetrics>,
    shutdown_tx: watch::Sender<bool>,
    sweep: Option<JoinHandle<SweepSnapshot>>,
}

impl<S, C> CacheHandle<S, C>
where
    S: PersistentStore,
    C: Clock,
{
    /// Wrap `cache` and spawn its sweep on the current tokio runtime, using
    /// the cache's configured sweep interval (the default if it is zero).
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn start(cache: ResponseCache<S, C>) -> Self {
        let cache = Arc::new(cache);
        let metrics = Arc::new(SweepMetrics::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut period = cache.config().sweep_interval;
        if period.is_zero() {
            tracing::warn!(
                default_secs = DEFAULT_SWEEP_INTERVAL_SECS,
                "Zero sweep interval configured, using the default"
            );
            period = Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS);
        }

        let sweep = tokio::spawn(expired_sweep_task(
            Arc::clone(&cache),
            period,
            Arc::clone(&metrics),
            shutdown_rx,
        ));

        Self {
            cache,
            metrics,
            shutdown_tx,
            sweep: Some(sweep),
        }
    }

    /// Shared cache, for handing to consumers.
    pub fn cache(&self) -> Arc<ResponseCache<S, C>> {
        Arc::clone(&self.cache)
    }

    /// Live sweep counters.
    pub fn sweep_metrics(&self) -> SweepSnapshot {
        self.metrics.snapshot()
    }

    /// Stop the sweep, wait for it, and drop the memory tier's entries and
    /// pending timers. Returns the final sweep counters.
    pub async fn shutdown(mut self) -> SweepSnapshot {
        let _ = self.shutdown_tx.send(true);

        let snapshot = match self.sweep.take() {
            Some(task) => match task.await {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    tracing::error!(error = %e, "Cache sweep task did not stop cleanly");
                    self.metrics.snapshot()
                }
            },
            None => self.metrics.snapshot(),
        };

        let cleared = self.cache.clear_memory();
        tracing::info!(memory_entries_cleared = cleared, "Cache shut down");
        snapshot
    }
}

impl<S, C> Drop for CacheHandle<S, C>
where
    S: PersistentStore,
    C: Clock,
{
    fn drop(&mut self) {
        if self.sweep.is_some() {
            let _ = self.shutdown_tx.send(true);
        }
    }
}
