//! Two-tier response cache.
//!
//! A fast in-process memory tier sits in front of a durable persistent tier
//! shared across processes. Keys are derived from the tool name and the
//! canonical form of the request parameters; lifetimes come from the
//! per-tool, per-tier [`TtlPolicy`](memelab_core::TtlPolicy).
//!
//! # Freshness
//!
//! An entry past its expiry is never served by either tier, whether or not it
//! has been physically removed yet. The memory tier evicts entries on a
//! per-key timer and checks expiry on every read; the persistent tier filters
//! expired rows at read time and is swept periodically by [`CacheHandle`].
//!
//! # Persistence failures
//!
//! The persistent tier is best effort. Read failures become misses, write
//! failures leave the memory copy serving until it expires. Callers only ever
//! see an error for invalid input.
//!
//! # Example
//!
//! ```ignore
//! let store = Arc::new(PostgresStore::new(pool));
//! store.ensure_schema().await?;
//! let handle = CacheHandle::start(ResponseCache::with_defaults(store));
//!
//! let cache = handle.cache();
//! if let Some(hit) = cache.get("trending", Some(&params), Tier::Free).await? {
//!     return Ok(hit.into_value());
//! }
//! ```

pub mod handle;
pub mod lmdb_store;
pub mod memory;
pub mod memory_store;
pub mod postgres_store;
pub mod read;
pub mod response_cache;
pub mod traits;
mod write_lane;

pub use handle::{expired_sweep_task, CacheHandle, SweepMetrics, SweepSnapshot};
pub use lmdb_store::{LmdbStore, LmdbStoreError};
pub use memory::{MemorySnapshot, MemoryTier};
pub use memory_store::InMemoryStore;
pub use postgres_store::{PostgresStore, CACHE_TABLE};
pub use read::{CacheRead, ReadSource};
pub use response_cache::{CacheConfig, InvalidationReport, ResponseCache, DEFAULT_SWEEP_INTERVAL_SECS};
pub use traits::{CacheRecord, CacheStats, PersistentStore, StorageResult};
