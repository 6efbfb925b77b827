//! Process-local persistent tier.
//!
//! Keeps rows in a map behind a lock. Used in development, when no database
//! is configured, and as the reference backend in tests.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use memelab_core::{CacheKey, StorageError, Timestamp, ToolName};

use super::traits::{CacheRecord, PersistentStore, StorageResult};

/// Map-backed [`PersistentStore`].
#[derive(Debug, Default)]
pub struct InMemoryStore {
    rows: RwLock<HashMap<String, CacheRecord>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rows currently held, expired or not.
    pub fn len(&self) -> usize {
        self.rows.read().map(|rows| rows.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Raw row lookup that ignores expiry.
    pub fn row(&self, cache_key: &str) -> Option<CacheRecord> {
        self.rows
            .read()
            .ok()
            .and_then(|rows| rows.get(cache_key).cloned())
    }
}

#[async_trait]
impl PersistentStore for InMemoryStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn fetch(&self, key: &CacheKey, now: Timestamp) -> StorageResult<Option<CacheRecord>> {
        let rows = self.rows.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(rows
            .get(key.as_str())
            .filter(|record| record.is_live(now))
            .cloned())
    }

    async fn upsert(&self, record: &CacheRecord) -> StorageResult<()> {
        let mut rows = self.rows.write().map_err(|_| StorageError::LockPoisoned)?;
        rows.insert(record.cache_key.clone(), record.clone());
        Ok(())
    }

    async fn delete(&self, key: &CacheKey) -> StorageResult<u64> {
        let mut rows = self.rows.write().map_err(|_| StorageError::LockPoisoned)?;
        Ok(rows.remove(key.as_str()).map_or(0, |_| 1))
    }

    async fn delete_tool(&self, tool: &ToolName) -> StorageResult<u64> {
        let mut rows = self.rows.write().map_err(|_| StorageError::LockPoisoned)?;
        let before = rows.len();
        rows.retain(|_, record| &record.tool != tool);
        Ok((before - rows.len()) as u64)
    }

    async fn delete_expired(&self, now: Timestamp) -> StorageResult<u64> {
        let mut rows = self.rows.write().map_err(|_| StorageError::LockPoisoned)?;
        let before = rows.len();
        rows.retain(|_, record| record.is_live(now));
        Ok((before - rows.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::{json, Value};

    fn record(tool: &str, params: Value, expires_in_secs: i64) -> (CacheKey, CacheRecord) {
        let tool = ToolName::new(tool).unwrap();
        let key = CacheKey::derive(&tool, Some(&params));
        let now = Utc::now();
        let record = CacheRecord {
            cache_key: key.as_str().to_string(),
            tool,
            request_params: params,
            response_data: json!({"ok": true}),
            expires_at: now + chrono::Duration::seconds(expires_in_secs),
            created_at: now,
        };
        (key, record)
    }

    #[tokio::test]
    async fn test_upsert_replaces_existing_row() {
        let store = InMemoryStore::new();
        let (key, mut rec) = record("trending", json!({"region": "US"}), 60);
        store.upsert(&rec).await.unwrap();

        rec.response_data = json!({"ok": false});
        store.upsert(&rec).await.unwrap();

        assert_eq!(store.len(), 1);
        let fetched = store.fetch(&key, Utc::now()).await.unwrap().unwrap();
        assert_eq!(fetched.response_data, json!({"ok": false}));
    }

    #[tokio::test]
    async fn test_fetch_skips_expired_rows() {
        let store = InMemoryStore::new();
        let (key, rec) = record("trending", json!({}), -1);
        store.upsert(&rec).await.unwrap();
        assert!(store.fetch(&key, Utc::now()).await.unwrap().is_none());
        assert!(store.row(key.as_str()).is_some());
    }

    #[tokio::test]
    async fn test_delete_tool_and_expired() {
        let store = InMemoryStore::new();
        store.upsert(&record("trending", json!({"r": 1}), 60).1).await.unwrap();
        store.upsert(&record("trending", json!({"r": 2}), -5).1).await.unwrap();
        store.upsert(&record("translate", json!({"r": 1}), -5).1).await.unwrap();
        store.upsert(&record("translate", json!({"r": 2}), 60).1).await.unwrap();

        assert_eq!(store.delete_expired(Utc::now()).await.unwrap(), 2);
        assert_eq!(
            store
                .delete_tool(&ToolName::new("trending").unwrap())
                .await
                .unwrap(),
            1
        );
        assert_eq!(store.len(), 1);
    }
}
