//! In-process memory tier.
//!
//! A mutex-guarded map from cache key to entry. Each write schedules a tokio
//! task that evicts the entry when it expires; overwriting a key aborts the
//! previous task first. Every entry also carries a generation number, and an
//! eviction only fires if the generation still matches, so a timer that loses
//! the race with its abort can never remove a newer write.
//!
//! Reads check expiry lazily against the injected clock regardless of timers.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use memelab_core::{CacheKey, Timestamp, ToolName};
use serde_json::Value;
use tokio::task::AbortHandle;

type EntryMap = HashMap<String, MemoryEntry>;

struct MemoryEntry {
    tool: ToolName,
    payload: Value,
    expires_at: Timestamp,
    size_bytes: usize,
    generation: u64,
    eviction: Option<AbortHandle>,
}

impl MemoryEntry {
    fn cancel_eviction(&mut self) {
        if let Some(handle) = self.eviction.take() {
            handle.abort();
        }
    }
}

/// Point-in-time view of the memory tier.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemorySnapshot {
    pub entry_count: u64,
    pub memory_bytes: u64,
    pub entries_by_tool: BTreeMap<String, u64>,
}

/// Memory tier of the response cache.
pub struct MemoryTier {
    entries: Arc<Mutex<EntryMap>>,
    next_generation: AtomicU64,
    schedule_evictions: bool,
}

impl MemoryTier {
    /// Create an empty tier. With `schedule_evictions` off, expired entries
    /// linger until the next read of their key or an explicit removal.
    pub fn new(schedule_evictions: bool) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            next_generation: AtomicU64::new(1),
            schedule_evictions,
        }
    }

    fn lock(&self) -> MutexGuard<'_, EntryMap> {
        lock_entries(&self.entries)
    }

    /// Live payload and expiry for `key`.
    ///
    /// An entry found past its expiry is dropped on the spot.
    pub fn get(&self, key: &CacheKey, now: Timestamp) -> Option<(Value, Timestamp)> {
        let mut entries = self.lock();
        let entry = entries.get(key.as_str())?;
        if now < entry.expires_at {
            return Some((entry.payload.clone(), entry.expires_at));
        }
        if let Some(mut stale) = entries.remove(key.as_str()) {
            stale.cancel_eviction();
        }
        None
    }

    /// Store `payload` under `key` until `expires_at`, replacing any previous
    /// entry and its pending eviction.
    pub fn insert(&self, key: &CacheKey, payload: Value, expires_at: Timestamp, now: Timestamp) {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let size_bytes = key.as_str().len() + payload.to_string().len();

        let mut entries = self.lock();
        if let Some(mut previous) = entries.remove(key.as_str()) {
            previous.cancel_eviction();
        }

        let eviction = if self.schedule_evictions {
            let delay = (expires_at - now).to_std().unwrap_or(Duration::ZERO);
            schedule_eviction(
                Arc::downgrade(&self.entries),
                key.as_str().to_string(),
                generation,
                delay,
            )
        } else {
            None
        };

        entries.insert(
            key.as_str().to_string(),
            MemoryEntry {
                tool: key.tool().clone(),
                payload,
                expires_at,
                size_bytes,
                generation,
                eviction,
            },
        );
    }

    /// Remove one key. Returns whether an entry was present.
    pub fn remove(&self, key: &CacheKey) -> bool {
        match self.lock().remove(key.as_str()) {
            Some(mut entry) => {
                entry.cancel_eviction();
                true
            }
            None => false,
        }
    }

    /// Remove every entry tagged with `tool`. Returns how many were removed.
    pub fn remove_tool(&self, tool: &ToolName) -> usize {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, entry| {
            if &entry.tool == tool {
                entry.cancel_eviction();
                false
            } else {
                true
            }
        });
        before - entries.len()
    }

    /// Drop everything and cancel all pending evictions.
    pub fn clear(&self) -> usize {
        let mut entries = self.lock();
        let removed = entries.len();
        for (_, mut entry) in entries.drain() {
            entry.cancel_eviction();
        }
        removed
    }

    /// Physically present entries, live or not.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Count and size the entries still live at `now`.
    pub fn snapshot(&self, now: Timestamp) -> MemorySnapshot {
        let entries = self.lock();
        let mut snapshot = MemorySnapshot::default();
        for entry in entries.values().filter(|entry| now < entry.expires_at) {
            snapshot.entry_count += 1;
            snapshot.memory_bytes += entry.size_bytes as u64;
            *snapshot
                .entries_by_tool
                .entry(entry.tool.as_str().to_string())
                .or_insert(0) += 1;
        }
        snapshot
    }
}

impl Drop for MemoryTier {
    fn drop(&mut self) {
        self.clear();
    }
}

fn lock_entries(entries: &Mutex<EntryMap>) -> MutexGuard<'_, EntryMap> {
    // Entries hold no invariants a panicking writer could break halfway.
    entries.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Spawn the eviction timer for one entry, if a runtime is available.
fn schedule_eviction(
    entries: Weak<Mutex<EntryMap>>,
    key: String,
    generation: u64,
    delay: Duration,
) -> Option<AbortHandle> {
    let runtime = tokio::runtime::Handle::try_current().ok()?;
    let task = runtime.spawn(async move {
        tokio::time::sleep(delay).await;
        let Some(entries) = entries.upgrade() else {
            return;
        };
        let mut entries = lock_entries(&entries);
        if entries
            .get(&key)
            .is_some_and(|entry| entry.generation == generation)
        {
            entries.remove(&key);
            tracing::trace!(cache_key = %key, "Memory entry evicted on expiry");
        }
    });
    Some(task.abort_handle())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn key(tool: &str, params: Value) -> CacheKey {
        CacheKey::derive(&ToolName::new(tool).unwrap(), Some(&params))
    }

    #[test]
    fn test_insert_and_get_without_runtime() {
        let tier = MemoryTier::new(true);
        let now = Utc::now();
        let k = key("trending", json!({"region": "US"}));
        tier.insert(&k, json!({"topics": ["a"]}), now + chrono::Duration::minutes(5), now);

        let (payload, _) = tier.get(&k, now).unwrap();
        assert_eq!(payload, json!({"topics": ["a"]}));
    }

    #[test]
    fn test_expired_entry_is_not_returned_and_is_dropped() {
        let tier = MemoryTier::new(false);
        let now = Utc::now();
        let k = key("trending", json!({}));
        let expires_at = now + chrono::Duration::seconds(10);
        tier.insert(&k, json!(1), expires_at, now);

        assert!(tier.get(&k, expires_at - chrono::Duration::milliseconds(1)).is_some());
        assert!(tier.get(&k, expires_at).is_none());
        assert!(tier.is_empty());
    }

    #[test]
    fn test_overwrite_replaces_payload_and_expiry() {
        let tier = MemoryTier::new(false);
        let now = Utc::now();
        let k = key("translate", json!({"text": "gm"}));
        tier.insert(&k, json!("first"), now + chrono::Duration::seconds(5), now);
        tier.insert(&k, json!("second"), now + chrono::Duration::seconds(50), now);

        assert_eq!(tier.len(), 1);
        let (payload, expires_at) = tier.get(&k, now + chrono::Duration::seconds(20)).unwrap();
        assert_eq!(payload, json!("second"));
        assert_eq!(expires_at, now + chrono::Duration::seconds(50));
    }

    #[test]
    fn test_remove_tool_leaves_other_tools() {
        let tier = MemoryTier::new(false);
        let now = Utc::now();
        let later = now + chrono::Duration::minutes(1);
        tier.insert(&key("trending", json!({"r": 1})), json!(1), later, now);
        tier.insert(&key("trending", json!({"r": 2})), json!(2), later, now);
        tier.insert(&key("translate", json!({"r": 1})), json!(3), later, now);

        let removed = tier.remove_tool(&ToolName::new("trending").unwrap());
        assert_eq!(removed, 2);
        assert_eq!(tier.len(), 1);
        assert!(tier.get(&key("translate", json!({"r": 1})), now).is_some());
    }

    #[test]
    fn test_snapshot_counts_only_live_entries() {
        let tier = MemoryTier::new(false);
        let now = Utc::now();
        let k1 = key("trending", json!({"r": 1}));
        let k2 = key("translate", json!({"r": 1}));
        let k3 = key("translate", json!({"r": 2}));
        tier.insert(&k1, json!("x"), now + chrono::Duration::minutes(1), now);
        tier.insert(&k2, json!("y"), now + chrono::Duration::minutes(1), now);
        tier.insert(&k3, json!("z"), now + chrono::Duration::seconds(1), now);

        let snapshot = tier.snapshot(now + chrono::Duration::seconds(2));
        assert_eq!(snapshot.entry_count, 2);
        assert_eq!(snapshot.entries_by_tool.get("trending"), Some(&1));
        assert_eq!(snapshot.entries_by_tool.get("translate"), Some(&1));
        let expected_bytes = (k1.as_str().len() + 3 + k2.as_str().len() + 3) as u64;
        assert_eq!(snapshot.memory_bytes, expected_bytes);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduled_eviction_removes_entry() {
        let tier = MemoryTier::new(true);
        let now = Utc::now();
        let k = key("trend-meme", json!({}));
        tier.insert(&k, json!("meme"), now + chrono::Duration::seconds(2), now);
        assert_eq!(tier.len(), 1);

        tokio::time::sleep(Duration::from_secs(3)).await;
        tokio::task::yield_now().await;
        assert_eq!(tier.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overwrite_cancels_earlier_eviction() {
        let tier = MemoryTier::new(true);
        let now = Utc::now();
        let k = key("trend-meme", json!({}));
        tier.insert(&k, json!("old"), now + chrono::Duration::seconds(2), now);
        tier.insert(&k, json!("new"), now + chrono::Duration::seconds(60), now);

        tokio::time::sleep(Duration::from_secs(5)).await;
        tokio::task::yield_now().await;
        assert_eq!(tier.len(), 1);
        let (payload, _) = tier.get(&k, now).unwrap();
        assert_eq!(payload, json!("new"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_cancels_pending_evictions() {
        let tier = MemoryTier::new(true);
        let now = Utc::now();
        let k = key("translate", json!({}));
        tier.insert(&k, json!("x"), now + chrono::Duration::seconds(2), now);
        assert_eq!(tier.clear(), 1);

        // Reinserting under the same key after clear must survive the old timer.
        tier.insert(&k, json!("y"), now + chrono::Duration::seconds(60), now);
        tokio::time::sleep(Duration::from_secs(5)).await;
        tokio::task::yield_now().await;
        assert_eq!(tier.len(), 1);
    }
}
