//! Two-tier response cache.
//!
//! Sits in front of expensive or rate-limited upstream calls (AI providers,
//! chain lookups). Reads try the memory tier, then the persistent tier, and
//! promote persistent hits into memory. Writes land in memory first and are
//! then upserted into the persistent tier.
//!
//! Persistent-tier failures never reach the caller: a failed read is a miss,
//! a failed write leaves the memory copy serving until it expires. The caller
//! behaves the same either way, it recomputes.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use memelab_core::{
    normalize_params, CacheKey, ConfigError, MemelabError, MemelabResult, Tier, Timestamp,
    ToolName, TtlPolicy,
};
use serde_json::Value;

use super::memory::MemoryTier;
use super::read::CacheRead;
use super::traits::{CacheRecord, CacheStats, PersistentStore};
use super::write_lane::WriteLane;
use crate::clock::{Clock, SystemClock};

/// Default interval between persistent-tier sweeps of expired rows.
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 3600;

/// Configuration for the response cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// How often the sweep deletes expired persistent rows.
    pub sweep_interval: Duration,
    /// Hand persistent upserts to a background writer instead of awaiting
    /// them. Writes and invalidations still reach the store in call order.
    pub detach_persistent_writes: bool,
    /// Schedule a per-entry eviction timer on every memory write.
    pub schedule_memory_evictions: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            detach_persistent_writes: false,
            schedule_memory_evictions: true,
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create CacheConfig from environment variables.
    ///
    /// Environment variables:
    /// - `MEMELAB_CACHE_SWEEP_INTERVAL_SECS`: Sweep interval (default: 3600)
    /// - `MEMELAB_CACHE_DETACH_WRITES`: "true" to detach persistent writes (default: false)
    /// - `MEMELAB_CACHE_MEMORY_EVICTION`: "false" to rely on lazy expiry only (default: true)
    pub fn from_env() -> Self {
        let sweep_interval = Duration::from_secs(
            std::env::var("MEMELAB_CACHE_SWEEP_INTERVAL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|secs| *secs > 0)
                .unwrap_or(DEFAULT_SWEEP_INTERVAL_SECS),
        );

        let detach_persistent_writes = std::env::var("MEMELAB_CACHE_DETACH_WRITES")
            .ok()
            .map(|s| s.to_lowercase() == "true")
            .unwrap_or(false);

        let schedule_memory_evictions = std::env::var("MEMELAB_CACHE_MEMORY_EVICTION")
            .ok()
            .map(|s| s.to_lowercase() != "false")
            .unwrap_or(true);

        Self {
            sweep_interval,
            detach_persistent_writes,
            schedule_memory_evictions,
        }
    }

    /// Set the sweep interval. Zero keeps the default.
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = if interval.is_zero() {
            Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS)
        } else {
            interval
        };
        self
    }

    pub fn with_detached_writes(mut self, enabled: bool) -> Self {
        self.detach_persistent_writes = enabled;
        self
    }

    pub fn with_memory_evictions(mut self, enabled: bool) -> Self {
        self.schedule_memory_evictions = enabled;
        self
    }
}

/// Read and failure counters.
#[derive(Debug, Default)]
pub(crate) struct CacheCounters {
    memory_hits: AtomicU64,
    persistent_hits: AtomicU64,
    misses: AtomicU64,
    pub(crate) persistence_errors: AtomicU64,
}

/// What an invalidation removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidationReport {
    /// Memory entries dropped.
    pub memory_removed: usize,
    /// Persistent rows deleted, or `None` if the persistent tier failed.
    pub persistent_removed: Option<u64>,
}

/// Two-tier response cache.
///
/// Build one at startup and share it behind an `Arc`. See
/// [`CacheHandle`](super::handle::CacheHandle) for the variant that also owns
/// the periodic sweep.
///
/// # Example
///
/// ```ignore
/// let cache = ResponseCache::new(store, TtlPolicy::standard(), SystemClock, CacheConfig::default());
///
/// let params = json!({"region": "US"});
/// let topics = cache
///     .get_or_compute("trending", Some(&params), Tier::Free, || fetch_trending("US"))
///     .await?;
/// ```
pub struct ResponseCache<S, C = SystemClock>
where
    S: PersistentStore,
    C: Clock,
{
    /// Durable tier, shared with detached writes.
    store: Arc<S>,
    memory: MemoryTier,
    policy: TtlPolicy,
    clock: C,
    config: CacheConfig,
    counters: Arc<CacheCounters>,
    /// Started on the first detached write.
    writer: OnceLock<WriteLane>,
}

impl<S> ResponseCache<S, SystemClock>
where
    S: PersistentStore,
{
    /// Standard TTL table, wall clock, default configuration.
    pub fn with_defaults(store: Arc<S>) -> Self {
        Self::new(store, TtlPolicy::standard(), SystemClock, CacheConfig::default())
    }
}

impl<S, C> ResponseCache<S, C>
where
    S: PersistentStore,
    C: Clock,
{
    pub fn new(store: Arc<S>, policy: TtlPolicy, clock: C, config: CacheConfig) -> Self {
        Self {
            memory: MemoryTier::new(config.schedule_memory_evictions),
            store,
            policy,
            clock,
            config,
            counters: Arc::new(CacheCounters::default()),
            writer: OnceLock::new(),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn policy(&self) -> &TtlPolicy {
        &self.policy
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Derive the cache key for `tool` and `params`.
    pub fn derive_key(tool: &str, params: Option<&Value>) -> MemelabResult<CacheKey> {
        let tool = ToolName::new(tool)?;
        Ok(CacheKey::derive(&tool, params))
    }

    /// TTL an entry for `tool` written at `tier` would receive.
    pub fn resolve_ttl(&self, tool: &str, tier: Tier) -> MemelabResult<Duration> {
        let tool = ToolName::new(tool)?;
        Ok(self.policy.resolve(&tool, tier))
    }

    /// Look up a live entry.
    ///
    /// Returns `Ok(None)` on a miss, including when the persistent tier could
    /// not be reached. The only error is an invalid `tool`.
    pub async fn get(
        &self,
        tool: &str,
        params: Option<&Value>,
        tier: Tier,
    ) -> MemelabResult<Option<CacheRead<Value>>> {
        let tool = ToolName::new(tool)?;
        let key = CacheKey::derive(&tool, params);
        let now = self.clock.now();

        if let Some((payload, expires_at)) = self.memory.get(&key, now) {
            self.counters.memory_hits.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(tool = %tool, cache_key = %key, %tier, "Memory hit");
            return Ok(Some(CacheRead::from_memory(payload, expires_at)));
        }

        match self.store.fetch(&key, now).await {
            Ok(Some(record)) if record.is_live(now) => {
                self.memory
                    .insert(&key, record.response_data.clone(), record.expires_at, now);
                self.counters.persistent_hits.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    tool = %tool,
                    cache_key = %key,
                    %tier,
                    expires_at = %record.expires_at,
                    "Persistent hit promoted to memory"
                );
                Ok(Some(CacheRead::from_persistent(
                    record.response_data,
                    record.expires_at,
                )))
            }
            Ok(_) => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(tool = %tool, cache_key = %key, %tier, "Cache miss");
                Ok(None)
            }
            Err(e) => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                self.counters.persistence_errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    error = %e,
                    backend = self.store.backend_name(),
                    tool = %tool,
                    cache_key = %key,
                    "Persistent cache read failed, treating as miss"
                );
                Ok(None)
            }
        }
    }

    /// Look up and deserialize a live entry.
    ///
    /// A payload that no longer matches `T` is reported as a miss.
    pub async fn get_as<T>(
        &self,
        tool: &str,
        params: Option<&Value>,
        tier: Tier,
    ) -> MemelabResult<Option<T>>
    where
        T: serde::de::DeserializeOwned,
    {
        let Some(read) = self.get(tool, params, tier).await? else {
            return Ok(None);
        };
        match serde_json::from_value(read.into_value()) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                tracing::debug!(error = %e, tool, "Cached payload has unexpected shape");
                Ok(None)
            }
        }
    }

    /// Store `payload` for `tool`/`params` with the TTL for `tier`.
    ///
    /// The memory write completes before the persistent write is issued, so a
    /// following `get` in this process always sees the new payload. A failed
    /// persistent write is logged and otherwise ignored. Returns the payload.
    pub async fn set(
        &self,
        tool: &str,
        params: Option<&Value>,
        payload: Value,
        tier: Tier,
    ) -> MemelabResult<Value> {
        let tool = ToolName::new(tool)?;
        let key = CacheKey::derive(&tool, params);
        let ttl = self.policy.resolve(&tool, tier);
        let now = self.clock.now();
        let expires_at = expiry_after(now, ttl)?;

        self.memory.insert(&key, payload.clone(), expires_at, now);

        let record = CacheRecord {
            cache_key: key.as_str().to_string(),
            tool,
            request_params: normalize_params(params),
            response_data: payload.clone(),
            expires_at,
            created_at: now,
        };

        if let Some(lane) = self.write_lane() {
            if !lane.upsert(record) {
                self.counters.persistence_errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    cache_key = %key,
                    "Persistent writer stopped, entry kept in memory only"
                );
            }
        } else {
            persist(self.store.as_ref(), &self.counters, &record).await;
        }

        Ok(payload)
    }

    /// Serialize and store a typed payload.
    pub async fn set_as<T>(
        &self,
        tool: &str,
        params: Option<&Value>,
        payload: &T,
        tier: Tier,
    ) -> MemelabResult<Value>
    where
        T: serde::Serialize,
    {
        let value = serde_json::to_value(payload).map_err(|e| {
            MemelabError::Validation(memelab_core::ValidationError::InvalidValue {
                field: "payload".to_string(),
                reason: e.to_string(),
            })
        })?;
        self.set(tool, params, value, tier).await
    }

    /// Return the cached payload, or compute, store and return it.
    ///
    /// Errors from `compute` pass through untouched and nothing is cached.
    pub async fn get_or_compute<F, Fut, E>(
        &self,
        tool: &str,
        params: Option<&Value>,
        tier: Tier,
        compute: F,
    ) -> Result<Value, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, E>>,
        E: From<MemelabError>,
    {
        if let Some(hit) = self.get(tool, params, tier).await? {
            return Ok(hit.into_value());
        }
        let payload = compute().await?;
        Ok(self.set(tool, params, payload, tier).await?)
    }

    /// Invalidate one key when `params` is given, or every key of `tool` when
    /// it is `None`.
    ///
    /// Note the asymmetry with [`get`](Self::get): here `None` means "all
    /// parameters". To drop only the empty-parameter entry, pass `{}`.
    pub async fn invalidate(
        &self,
        tool: &str,
        params: Option<&Value>,
    ) -> MemelabResult<InvalidationReport> {
        match params {
            Some(params) => self.invalidate_key(tool, Some(params)).await,
            None => self.invalidate_tool(tool).await,
        }
    }

    /// Remove the entry for `tool`/`params` from both tiers.
    pub async fn invalidate_key(
        &self,
        tool: &str,
        params: Option<&Value>,
    ) -> MemelabResult<InvalidationReport> {
        let tool = ToolName::new(tool)?;
        let key = CacheKey::derive(&tool, params);
        let memory_removed = usize::from(self.memory.remove(&key));

        let deleted = match self.write_lane() {
            Some(lane) => lane.delete(key.clone()).await,
            None => self.store.delete(&key).await,
        };
        let persistent_removed = match deleted {
            Ok(n) => Some(n),
            Err(e) => {
                self.counters.persistence_errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    error = %e,
                    backend = self.store.backend_name(),
                    cache_key = %key,
                    "Persistent cache delete failed"
                );
                None
            }
        };

        tracing::debug!(cache_key = %key, memory_removed, ?persistent_removed, "Key invalidated");
        Ok(InvalidationReport {
            memory_removed,
            persistent_removed,
        })
    }

    /// Remove every entry tagged with `tool` from both tiers.
    pub async fn invalidate_tool(&self, tool: &str) -> MemelabResult<InvalidationReport> {
        let tool = ToolName::new(tool)?;
        let memory_removed = self.memory.remove_tool(&tool);

        let deleted = match self.write_lane() {
            Some(lane) => lane.delete_tool(tool.clone()).await,
            None => self.store.delete_tool(&tool).await,
        };
        let persistent_removed = match deleted {
            Ok(n) => Some(n),
            Err(e) => {
                self.counters.persistence_errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    error = %e,
                    backend = self.store.backend_name(),
                    tool = %tool,
                    "Persistent cache bulk delete failed"
                );
                None
            }
        };

        tracing::info!(tool = %tool, memory_removed, ?persistent_removed, "Tool invalidated");
        Ok(InvalidationReport {
            memory_removed,
            persistent_removed,
        })
    }

    /// Delete persistent rows that have expired. Leaves the memory tier alone.
    pub async fn clean_expired(&self) -> MemelabResult<u64> {
        let now = self.clock.now();
        let removed = self.store.delete_expired(now).await?;
        if removed > 0 {
            tracing::info!(
                removed,
                backend = self.store.backend_name(),
                "Expired cache rows swept"
            );
        } else {
            tracing::trace!("Cache sweep found no expired rows");
        }
        Ok(removed)
    }

    /// Background writer, when persistent writes are detached.
    fn write_lane(&self) -> Option<&WriteLane> {
        if !self.config.detach_persistent_writes {
            return None;
        }
        Some(self.writer.get_or_init(|| {
            WriteLane::spawn(Arc::clone(&self.store), Arc::clone(&self.counters))
        }))
    }

    /// Drop every memory entry and cancel its eviction timer.
    pub fn clear_memory(&self) -> usize {
        self.memory.clear()
    }

    /// Usage snapshot.
    pub fn stats(&self) -> CacheStats {
        let snapshot = self.memory.snapshot(self.clock.now());
        CacheStats {
            entry_count: snapshot.entry_count,
            memory_bytes: snapshot.memory_bytes,
            entries_by_tool: snapshot.entries_by_tool,
            memory_hits: self.counters.memory_hits.load(Ordering::Relaxed),
            persistent_hits: self.counters.persistent_hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            persistence_errors: self.counters.persistence_errors.load(Ordering::Relaxed),
        }
    }
}

/// Upsert `record`, logging instead of failing.
pub(crate) async fn persist<S>(store: &S, counters: &CacheCounters, record: &CacheRecord)
where
    S: PersistentStore + ?Sized,
{
    match store.upsert(record).await {
        Ok(()) => {
            tracing::trace!(cache_key = %record.cache_key, "Persistent cache write");
        }
        Err(e) => {
            counters.persistence_errors.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                error = %e,
                backend = store.backend_name(),
                tool = %record.tool,
                cache_key = %record.cache_key,
                "Persistent cache write failed, entry kept in memory only"
            );
        }
    }
}

fn expiry_after(now: Timestamp, ttl: Duration) -> MemelabResult<Timestamp> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .ok_or_else(|| {
            MemelabError::Config(ConfigError::InvalidValue {
                field: "ttl".to_string(),
                value: format!("{:?}", ttl),
                reason: "expiry overflows the timestamp range".to_string(),
            })
        })
}
