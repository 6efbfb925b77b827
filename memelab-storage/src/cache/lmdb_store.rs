//! LMDB-backed persistent tier for single-node deployments.
//!
//! Uses the heed crate (Rust bindings for LMDB) as an embedded, memory-mapped
//! key-value store. Rows are keyed by the derived cache key bytes and hold the
//! JSON-encoded [`CacheRecord`].
//!
//! # Key layout
//!
//! Cache keys start with `"{tool}:"` and tool names cannot contain `:`, so
//! every row of one tool shares a byte prefix no other tool's rows have. Bulk
//! tool invalidation is a prefix scan.
//!
//! # Thread Safety
//!
//! LMDB provides ACID transactions. The store uses:
//! - Read transactions for `fetch` and for collecting keys to delete
//! - Write transactions for `upsert` and every delete

use std::path::Path;

use async_trait::async_trait;
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};
use memelab_core::{CacheKey, StorageError, Timestamp, ToolName};

use super::traits::{CacheRecord, PersistentStore, StorageResult};

/// Error type for LMDB store operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbStoreError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Serialization error.
    #[error("Serialization error for {key}: {reason}")]
    Serialization { key: String, reason: String },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LmdbStoreError> for StorageError {
    fn from(e: LmdbStoreError) -> Self {
        match e {
            LmdbStoreError::EnvOpen(reason) | LmdbStoreError::DbOpen(reason) => {
                StorageError::Unavailable { reason }
            }
            LmdbStoreError::Serialization { key, reason } => StorageError::Serialization {
                cache_key: key,
                reason,
            },
            other => StorageError::TransactionFailed {
                reason: other.to_string(),
            },
        }
    }
}

fn txn_error(e: heed::Error) -> LmdbStoreError {
    LmdbStoreError::Transaction(e.to_string())
}

/// LMDB-backed [`PersistentStore`].
///
/// # Example
///
/// ```ignore
/// let store = LmdbStore::open("/var/lib/memelab/cache", 512)?;
/// let cache = ResponseCache::new(Arc::new(store), TtlPolicy::standard(), SystemClock, config);
/// ```
pub struct LmdbStore {
    /// The LMDB environment.
    env: Env,
    /// The main database (single unnamed database).
    db: Database<Bytes, Bytes>,
}

impl LmdbStore {
    /// Open (or create) a store under `path`.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `max_size_mb` - Maximum size of the database in megabytes
    pub fn open<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbStoreError> {
        std::fs::create_dir_all(&path)?;

        // SAFETY: the environment is opened once per path by this process and
        // the files are not modified by anything else while it is open.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbStoreError::EnvOpen(e.to_string()))?;

        let mut wtxn = env.write_txn().map_err(txn_error)?;
        let db: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| LmdbStoreError::DbOpen(e.to_string()))?;
        wtxn.commit().map_err(txn_error)?;

        Ok(Self { env, db })
    }

    /// Rows currently stored, expired or not.
    pub fn row_count(&self) -> Result<u64, LmdbStoreError> {
        let rtxn = self.env.read_txn().map_err(txn_error)?;
        self.db.len(&rtxn).map_err(txn_error)
    }

    fn decode(key: &[u8], bytes: &[u8]) -> Result<CacheRecord, LmdbStoreError> {
        serde_json::from_slice(bytes).map_err(|e| LmdbStoreError::Serialization {
            key: String::from_utf8_lossy(key).into_owned(),
            reason: e.to_string(),
        })
    }

    /// Collect keys for which `select` returns true.
    fn collect_keys<F>(&self, mut select: F) -> Result<Vec<Vec<u8>>, LmdbStoreError>
    where
        F: FnMut(&[u8], &[u8]) -> bool,
    {
        let rtxn = self.env.read_txn().map_err(txn_error)?;
        let mut keys = Vec::new();
        for result in self.db.iter(&rtxn).map_err(txn_error)? {
            let (key, value) = result.map_err(txn_error)?;
            if select(key, value) {
                keys.push(key.to_vec());
            }
        }
        Ok(keys)
    }

    fn delete_keys(&self, keys: &[Vec<u8>]) -> Result<u64, LmdbStoreError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut wtxn = self.env.write_txn().map_err(txn_error)?;
        let mut deleted = 0u64;
        for key in keys {
            if self.db.delete(&mut wtxn, key).map_err(txn_error)? {
                deleted += 1;
            }
        }
        wtxn.commit().map_err(txn_error)?;
        Ok(deleted)
    }
}

#[async_trait]
impl PersistentStore for LmdbStore {
    fn backend_name(&self) -> &'static str {
        "lmdb"
    }

    async fn fetch(&self, key: &CacheKey, now: Timestamp) -> StorageResult<Option<CacheRecord>> {
        let rtxn = self.env.read_txn().map_err(txn_error)?;
        let Some(bytes) = self.db.get(&rtxn, key.as_bytes()).map_err(txn_error)? else {
            return Ok(None);
        };
        let record = Self::decode(key.as_bytes(), bytes)?;
        Ok(record.is_live(now).then_some(record))
    }

    async fn upsert(&self, record: &CacheRecord) -> StorageResult<()> {
        let bytes = serde_json::to_vec(record).map_err(|e| LmdbStoreError::Serialization {
            key: record.cache_key.clone(),
            reason: e.to_string(),
        })?;

        let mut wtxn = self.env.write_txn().map_err(txn_error)?;
        self.db
            .put(&mut wtxn, record.cache_key.as_bytes(), &bytes)
            .map_err(txn_error)?;
        wtxn.commit().map_err(txn_error)?;
        Ok(())
    }

    async fn delete(&self, key: &CacheKey) -> StorageResult<u64> {
        Ok(self.delete_keys(&[key.as_bytes().to_vec()])?)
    }

    async fn delete_tool(&self, tool: &ToolName) -> StorageResult<u64> {
        let prefix = CacheKey::tool_prefix(tool);
        let keys = self.collect_keys(|key, _| key.starts_with(prefix.as_bytes()))?;
        Ok(self.delete_keys(&keys)?)
    }

    async fn delete_expired(&self, now: Timestamp) -> StorageResult<u64> {
        // Rows that no longer decode can never be served either.
        let keys = self.collect_keys(|key, value| match Self::decode(key, value) {
            Ok(record) => !record.is_live(now),
            Err(_) => true,
        })?;
        Ok(self.delete_keys(&keys)?)
    }
}
