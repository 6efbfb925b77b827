//! MEMELAB Storage - Response Cache
//!
//! Two-tier cache for upstream tool responses: an in-process memory tier
//! backed by a persistent tier (PostgreSQL, LMDB, or in-memory for tests).

pub mod cache;
pub mod clock;

pub use cache::{
    CacheConfig, CacheHandle, CacheRead, CacheRecord, CacheStats, InMemoryStore,
    InvalidationReport, LmdbStore, LmdbStoreError, PersistentStore, PostgresStore, ReadSource,
    ResponseCache, StorageResult, SweepMetrics, SweepSnapshot,
};
pub use clock::{Clock, ManualClock, SystemClock};
