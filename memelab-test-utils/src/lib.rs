//! MEMELAB Test Utilities
//!
//! Shared test infrastructure for the MEMELAB workspace:
//! - Proptest generators for tools, tiers, parameters and TTL tables
//! - A failure-injecting persistent store
//! - Fixtures for building caches on a manual clock
//! - Assertions for cache reads and errors

pub use memelab_core::{
    CacheKey, MemelabError, MemelabResult, StorageError, Tier, TierTtls, Timestamp, ToolName,
    TtlPolicy,
};
pub use memelab_storage::{
    CacheConfig, CacheRead, CacheRecord, InMemoryStore, ManualClock, PersistentStore,
    ReadSource, ResponseCache, StorageResult,
};

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

// ============================================================================
// FAILURE INJECTION
// ============================================================================

/// Persistent store wrapper that can be switched off.
///
/// While unavailable, every operation fails with
/// [`StorageError::Unavailable`] without reaching the inner store.
#[derive(Debug)]
pub struct FlakyStore<S> {
    inner: Arc<S>,
    available: AtomicBool,
    failed_calls: AtomicU64,
}

impl<S: PersistentStore> FlakyStore<S> {
    pub fn new(inner: Arc<S>) -> Self {
        Self {
            inner,
            available: AtomicBool::new(true),
            failed_calls: AtomicU64::new(0),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    /// Calls rejected while unavailable.
    pub fn failed_calls(&self) -> u64 {
        self.failed_calls.load(Ordering::SeqCst)
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    fn check(&self) -> StorageResult<()> {
        if self.is_available() {
            Ok(())
        } else {
            self.failed_calls.fetch_add(1, Ordering::SeqCst);
            Err(StorageError::Unavailable {
                reason: "injected outage".to_string(),
            })
        }
    }
}

#[async_trait]
impl<S: PersistentStore> PersistentStore for FlakyStore<S> {
    fn backend_name(&self) -> &'static str {
        "flaky"
    }

    async fn fetch(&self, key: &CacheKey, now: Timestamp) -> StorageResult<Option<CacheRecord>> {
        self.check()?;
        self.inner.fetch(key, now).await
    }

    async fn upsert(&self, record: &CacheRecord) -> StorageResult<()> {
        self.check()?;
        self.inner.upsert(record).await
    }

    async fn delete(&self, key: &CacheKey) -> StorageResult<u64> {
        self.check()?;
        self.inner.delete(key).await
    }

    async fn delete_tool(&self, tool: &ToolName) -> StorageResult<u64> {
        self.check()?;
        self.inner.delete_tool(tool).await
    }

    async fn delete_expired(&self, now: Timestamp) -> StorageResult<u64> {
        self.check()?;
        self.inner.delete_expired(now).await
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for cache inputs.

    use super::*;
    use memelab_core::STANDARD_TTLS;
    use proptest::prelude::*;
    use serde_json::{Map, Value};

    /// One of the five tools with a configured TTL row.
    pub fn arb_known_tool() -> impl Strategy<Value = ToolName> {
        proptest::sample::select(STANDARD_TTLS.iter().map(|(name, _)| *name).collect::<Vec<_>>())
            .prop_filter_map("valid tool name", |name| ToolName::new(name).ok())
    }

    /// Any valid tool name, mostly ones without a configured row.
    pub fn arb_tool_name() -> impl Strategy<Value = ToolName> {
        "[a-z][a-z0-9-]{0,15}".prop_filter_map("valid tool name", |s| ToolName::new(s).ok())
    }

    pub fn arb_tier() -> impl Strategy<Value = Tier> {
        prop_oneof![Just(Tier::Free), Just(Tier::Premium), Just(Tier::Enterprise)]
    }

    /// Scalar JSON values.
    pub fn arb_json_leaf() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::from),
            "[a-zA-Z0-9 ]{0,12}".prop_map(Value::String),
        ]
    }

    /// Nested JSON values up to a few levels deep.
    pub fn arb_json_value() -> impl Strategy<Value = Value> {
        arb_json_leaf().prop_recursive(3, 32, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                prop::collection::btree_map("[a-z]{1,6}", inner, 0..4)
                    .prop_map(|m| Value::Object(m.into_iter().collect::<Map<_, _>>())),
            ]
        })
    }

    /// Request parameters: a JSON object.
    pub fn arb_params() -> impl Strategy<Value = Value> {
        prop::collection::btree_map("[a-z]{1,8}", arb_json_value(), 0..5)
            .prop_map(|m| Value::Object(m.into_iter().collect::<Map<_, _>>()))
    }

    /// TTL rows with enterprise <= premium <= free.
    pub fn arb_monotonic_ttls() -> impl Strategy<Value = TierTtls> {
        (1u64..=60, 0u64..=600, 0u64..=1440).prop_map(|(enterprise, premium_extra, free_extra)| {
            let premium = enterprise + premium_extra;
            TierTtls::minutes(premium + free_extra, premium, enterprise)
        })
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built caches for common scenarios.

    use super::*;

    /// Cache configuration for tests: no eviction timers, so expiry is
    /// governed by the manual clock alone.
    pub fn test_config() -> CacheConfig {
        CacheConfig::default().with_memory_evictions(false)
    }

    /// Standard TTL table over an in-memory store and a manual clock.
    pub fn memory_cache() -> (
        ResponseCache<InMemoryStore, ManualClock>,
        Arc<InMemoryStore>,
        ManualClock,
    ) {
        let store = Arc::new(InMemoryStore::new());
        let clock = ManualClock::starting_now();
        let cache = ResponseCache::new(
            Arc::clone(&store),
            TtlPolicy::standard(),
            clock.clone(),
            test_config(),
        );
        (cache, store, clock)
    }

    /// Standard TTL table over a [`FlakyStore`] wrapping an in-memory store.
    pub fn flaky_cache() -> (
        ResponseCache<FlakyStore<InMemoryStore>, ManualClock>,
        Arc<FlakyStore<InMemoryStore>>,
        ManualClock,
    ) {
        let store = Arc::new(FlakyStore::new(Arc::new(InMemoryStore::new())));
        let clock = ManualClock::starting_now();
        let cache = ResponseCache::new(
            Arc::clone(&store),
            TtlPolicy::standard(),
            clock.clone(),
            test_config(),
        );
        (cache, store, clock)
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for cache reads and errors.

    use super::*;
    use serde_json::Value;

    /// Assert a read hit with the given payload.
    #[track_caller]
    pub fn assert_hit(read: &MemelabResult<Option<CacheRead<Value>>>, expected: &Value) {
        match read {
            Ok(Some(hit)) => assert_eq!(hit.value(), expected, "hit carried the wrong payload"),
            other => panic!("Expected hit with {expected}, got: {other:?}"),
        }
    }

    /// Assert a read hit served from `source`.
    #[track_caller]
    pub fn assert_hit_from(read: &MemelabResult<Option<CacheRead<Value>>>, source: ReadSource) {
        match read {
            Ok(Some(hit)) => assert_eq!(hit.source(), source, "hit came from the wrong tier"),
            other => panic!("Expected hit from {source:?}, got: {other:?}"),
        }
    }

    /// Assert a clean miss.
    #[track_caller]
    pub fn assert_miss(read: &MemelabResult<Option<CacheRead<Value>>>) {
        match read {
            Ok(None) => {}
            other => panic!("Expected miss, got: {other:?}"),
        }
    }

    /// Assert an invalid-input error.
    #[track_caller]
    pub fn assert_invalid_input<T: std::fmt::Debug>(result: &MemelabResult<T>) {
        match result {
            Err(e) if e.is_invalid_input() => {}
            other => panic!("Expected invalid input error, got: {other:?}"),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
