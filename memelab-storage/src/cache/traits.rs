//! Persistent-tier trait, stored record shape, and cache statistics.

use std::collections::BTreeMap;

use async_trait::async_trait;
use memelab_core::{CacheKey, StorageError, Timestamp, ToolName};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Result alias for persistent-tier operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// One row of the persistent tier.
///
/// Mirrors the `api_cache` table: the derived key, the tool tag used for bulk
/// invalidation, the original parameters (kept for debugging only), the
/// payload, and the absolute expiry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheRecord {
    pub cache_key: String,
    pub tool: ToolName,
    pub request_params: Value,
    pub response_data: Value,
    pub expires_at: Timestamp,
    pub created_at: Timestamp,
}

impl CacheRecord {
    /// A row is readable only while `now < expires_at`.
    pub fn is_live(&self, now: Timestamp) -> bool {
        now < self.expires_at
    }
}

/// Durable backing store for the cache.
///
/// Implementations must:
/// - never return a row whose `expires_at` is at or before `now` from `fetch`
/// - treat `upsert` on an existing `cache_key` as a replace, not a duplicate
/// - tag rows with their tool so `delete_tool` works without re-deriving keys
///
/// Errors are reported, not hidden; the cache decides what to swallow.
#[async_trait]
pub trait PersistentStore: Send + Sync + 'static {
    /// Short backend name for logs.
    fn backend_name(&self) -> &'static str;

    /// Fetch a live row by key.
    async fn fetch(&self, key: &CacheKey, now: Timestamp) -> StorageResult<Option<CacheRecord>>;

    /// Insert or replace the row for `record.cache_key`.
    async fn upsert(&self, record: &CacheRecord) -> StorageResult<()>;

    /// Delete one row. Returns the number of rows removed.
    async fn delete(&self, key: &CacheKey) -> StorageResult<u64>;

    /// Delete every row tagged with `tool`. Returns the number removed.
    async fn delete_tool(&self, tool: &ToolName) -> StorageResult<u64>;

    /// Delete every row with `expires_at <= now`. Returns the number removed.
    async fn delete_expired(&self, now: Timestamp) -> StorageResult<u64>;
}

/// Snapshot of cache usage.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    /// Live entries in the memory tier.
    pub entry_count: u64,
    /// Approximate memory tier size: serialized key plus payload bytes.
    pub memory_bytes: u64,
    /// Live memory entries per tool.
    pub entries_by_tool: BTreeMap<String, u64>,
    /// Reads answered by the memory tier.
    pub memory_hits: u64,
    /// Reads answered by the persistent tier (and promoted).
    pub persistent_hits: u64,
    /// Reads that found nothing valid in either tier.
    pub misses: u64,
    /// Persistent-tier operations that failed and were swallowed.
    pub persistence_errors: u64,
}

impl CacheStats {
    pub fn hits(&self) -> u64 {
        self.memory_hits + self.persistent_hits
    }

    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits() + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits() as f64 / total as f64
        }
    }
}
