//! PostgreSQL-backed persistent tier.
//!
//! Rows live in the `api_cache` table and are shared by every process
//! pointing at the same database. Connections come from a deadpool-postgres
//! pool built by the caller.

use async_trait::async_trait;
use deadpool_postgres::{Pool, PoolError};
use memelab_core::{CacheKey, StorageError, Timestamp, ToolName};
use serde_json::Value as JsonValue;
use tokio_postgres::Row;

use super::traits::{CacheRecord, PersistentStore, StorageResult};

/// Name of the cache table.
pub const CACHE_TABLE: &str = "api_cache";

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS api_cache (
    cache_key      TEXT PRIMARY KEY,
    tool           TEXT NOT NULL,
    request_params JSONB,
    response_data  JSONB NOT NULL,
    expires_at     TIMESTAMPTZ NOT NULL,
    created_at     TIMESTAMPTZ NOT NULL DEFAULT now()
);
CREATE INDEX IF NOT EXISTS api_cache_tool_idx ON api_cache (tool);
CREATE INDEX IF NOT EXISTS api_cache_expires_at_idx ON api_cache (expires_at);
";

const FETCH_SQL: &str = "
SELECT cache_key, tool, request_params, response_data, expires_at, created_at
FROM api_cache
WHERE cache_key = $1 AND expires_at > $2
";

const UPSERT_SQL: &str = "
INSERT INTO api_cache (cache_key, tool, request_params, response_data, expires_at, created_at)
VALUES ($1, $2, $3, $4, $5, $6)
ON CONFLICT (cache_key) DO UPDATE SET
    tool = EXCLUDED.tool,
    request_params = EXCLUDED.request_params,
    response_data = EXCLUDED.response_data,
    expires_at = EXCLUDED.expires_at,
    created_at = EXCLUDED.created_at
";

const DELETE_KEY_SQL: &str = "DELETE FROM api_cache WHERE cache_key = $1";

const DELETE_TOOL_SQL: &str = "DELETE FROM api_cache WHERE tool = $1";

const DELETE_EXPIRED_SQL: &str = "DELETE FROM api_cache WHERE expires_at <= $1";

/// Postgres-backed [`PersistentStore`].
#[derive(Clone)]
pub struct PostgresStore {
    pool: Pool,
}

impl PostgresStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Current pool size, for observability.
    pub fn pool_size(&self) -> usize {
        self.pool.status().size
    }

    /// Create the cache table and its indexes if they are missing.
    pub async fn ensure_schema(&self) -> StorageResult<()> {
        let conn = self.get_conn().await?;
        conn.batch_execute(SCHEMA_SQL)
            .await
            .map_err(|e| query_error("ensure_schema", e))?;
        tracing::info!(table = CACHE_TABLE, "Cache schema ensured");
        Ok(())
    }

    async fn get_conn(&self) -> StorageResult<deadpool_postgres::Object> {
        self.pool.get().await.map_err(pool_error)
    }

    fn parse_row(row: &Row) -> StorageResult<CacheRecord> {
        let cache_key: String = row
            .try_get("cache_key")
            .map_err(|e| query_error("fetch", e))?;
        let tool: String = row.try_get("tool").map_err(|e| query_error("fetch", e))?;
        let tool = ToolName::new(tool).map_err(|e| StorageError::Serialization {
            cache_key: cache_key.clone(),
            reason: e.to_string(),
        })?;
        let request_params: Option<JsonValue> = row
            .try_get("request_params")
            .map_err(|e| query_error("fetch", e))?;

        Ok(CacheRecord {
            tool,
            request_params: request_params.unwrap_or(JsonValue::Null),
            response_data: row
                .try_get("response_data")
                .map_err(|e| query_error("fetch", e))?,
            expires_at: row
                .try_get("expires_at")
                .map_err(|e| query_error("fetch", e))?,
            created_at: row
                .try_get("created_at")
                .map_err(|e| query_error("fetch", e))?,
            cache_key,
        })
    }
}

fn pool_error(err: PoolError) -> StorageError {
    match err {
        PoolError::Timeout(_) => StorageError::Unavailable {
            reason: "connection pool exhausted".to_string(),
        },
        PoolError::Closed => StorageError::Unavailable {
            reason: "connection pool is closed".to_string(),
        },
        other => StorageError::Unavailable {
            reason: other.to_string(),
        },
    }
}

fn query_error(operation: &str, err: tokio_postgres::Error) -> StorageError {
    StorageError::QueryFailed {
        operation: operation.to_string(),
        reason: err.to_string(),
    }
}

#[async_trait]
impl PersistentStore for PostgresStore {
    fn backend_name(&self) -> &'static str {
        "postgres"
    }

    async fn fetch(&self, key: &CacheKey, now: Timestamp) -> StorageResult<Option<CacheRecord>> {
        let conn = self.get_conn().await?;
        let row = conn
            .query_opt(FETCH_SQL, &[&key.as_str(), &now])
            .await
            .map_err(|e| query_error("fetch", e))?;
        row.as_ref().map(Self::parse_row).transpose()
    }

    async fn upsert(&self, record: &CacheRecord) -> StorageResult<()> {
        let conn = self.get_conn().await?;
        conn.execute(
            UPSERT_SQL,
            &[
                &record.cache_key,
                &record.tool.as_str(),
                &record.request_params,
                &record.response_data,
                &record.expires_at,
                &record.created_at,
            ],
        )
        .await
        .map_err(|e| query_error("upsert", e))?;
        Ok(())
    }

    async fn delete(&self, key: &CacheKey) -> StorageResult<u64> {
        let conn = self.get_conn().await?;
        conn.execute(DELETE_KEY_SQL, &[&key.as_str()])
            .await
            .map_err(|e| query_error("delete", e))
    }

    async fn delete_tool(&self, tool: &ToolName) -> StorageResult<u64> {
        let conn = self.get_conn().await?;
        conn.execute(DELETE_TOOL_SQL, &[&tool.as_str()])
            .await
            .map_err(|e| query_error("delete_tool", e))
    }

    async fn delete_expired(&self, now: Timestamp) -> StorageResult<u64> {
        let conn = self.get_conn().await?;
        conn.execute(DELETE_EXPIRED_SQL, &[&now])
            .await
            .map_err(|e| query_error("delete_expired", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upsert_replaces_expiry_payload_and_created_at() {
        assert!(UPSERT_SQL.contains("ON CONFLICT (cache_key) DO UPDATE"));
        for column in ["response_data", "expires_at", "created_at"] {
            assert!(
                UPSERT_SQL.contains(&format!("{column} = EXCLUDED.{column}")),
                "{column} must be replaced on conflict"
            );
        }
    }

    #[test]
    fn test_fetch_filters_expired_rows() {
        assert!(FETCH_SQL.contains("expires_at > $2"));
        assert!(DELETE_EXPIRED_SQL.contains("expires_at <= $1"));
    }

    #[test]
    fn test_schema_targets_cache_table() {
        assert!(SCHEMA_SQL.contains(&format!("CREATE TABLE IF NOT EXISTS {CACHE_TABLE}")));
        assert!(SCHEMA_SQL.contains("cache_key      TEXT PRIMARY KEY"));
    }

    #[test]
    fn test_pool_errors_map_to_unavailable() {
        assert!(matches!(
            pool_error(PoolError::Closed),
            StorageError::Unavailable { .. }
        ));
    }
}
