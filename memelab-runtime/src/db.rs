//! Database Connection Pool Module
//!
//! PostgreSQL connection pooling for the persistent cache tier, using
//! deadpool-postgres.

use std::time::Duration;

use deadpool_postgres::{Config, ManagerConfig, Pool, PoolConfig, RecyclingMethod, Runtime};
use tokio_postgres::NoTls;

use crate::constants::{DEFAULT_DB_POOL_SIZE, DEFAULT_DB_TIMEOUT_SECS};
use crate::error::{RuntimeError, RuntimeResult};

/// Database connection pool configuration.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// PostgreSQL host
    pub host: String,
    /// PostgreSQL port
    pub port: u16,
    /// Database name
    pub dbname: String,
    /// Database user
    pub user: String,
    /// Database password
    pub password: String,
    /// Maximum pool size
    pub max_size: usize,
    /// Connection wait/create timeout
    pub timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            dbname: "memelab".to_string(),
            user: "postgres".to_string(),
            password: "".to_string(),
            max_size: DEFAULT_DB_POOL_SIZE,
            timeout: Duration::from_secs(DEFAULT_DB_TIMEOUT_SECS),
        }
    }
}

impl DbConfig {
    /// Create a new database configuration from environment variables.
    ///
    /// # Environment Variables
    /// - `MEMELAB_DB_HOST` (default: localhost)
    /// - `MEMELAB_DB_PORT` (default: 5432)
    /// - `MEMELAB_DB_NAME` (default: memelab)
    /// - `MEMELAB_DB_USER` (default: postgres)
    /// - `MEMELAB_DB_PASSWORD` (default: empty)
    /// - `MEMELAB_DB_POOL_SIZE` (default: 16)
    /// - `MEMELAB_DB_TIMEOUT` seconds (default: 30)
    pub fn from_env() -> Self {
        Self {
            host: std::env::var("MEMELAB_DB_HOST").unwrap_or_else(|_| "localhost".to_string()),
            port: std::env::var("MEMELAB_DB_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(5432),
            dbname: std::env::var("MEMELAB_DB_NAME").unwrap_or_else(|_| "memelab".to_string()),
            user: std::env::var("MEMELAB_DB_USER").unwrap_or_else(|_| "postgres".to_string()),
            password: std::env::var("MEMELAB_DB_PASSWORD").unwrap_or_default(),
            max_size: std::env::var("MEMELAB_DB_POOL_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_DB_POOL_SIZE),
            timeout: Duration::from_secs(
                std::env::var("MEMELAB_DB_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_DB_TIMEOUT_SECS),
            ),
        }
    }

    /// Create a connection pool from this configuration.
    ///
    /// Connections are opened lazily, so this succeeds even while the
    /// database is down; the cache then runs on its memory tier.
    pub fn create_pool(&self) -> RuntimeResult<Pool> {
        let mut cfg = Config::new();
        cfg.host = Some(self.host.clone());
        cfg.port = Some(self.port);
        cfg.dbname = Some(self.dbname.clone());
        cfg.user = Some(self.user.clone());
        cfg.password = Some(self.password.clone());

        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });

        let mut pool_config = PoolConfig::new(self.max_size);
        pool_config.timeouts.wait = Some(self.timeout);
        pool_config.timeouts.create = Some(self.timeout);
        pool_config.timeouts.recycle = Some(self.timeout);
        cfg.pool = Some(pool_config);

        cfg.create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| RuntimeError::Pool(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_db_config_defaults() {
        let config = DbConfig::default();
        assert_eq!(config.port, 5432);
        assert_eq!(config.dbname, "memelab");
        assert_eq!(config.max_size, DEFAULT_DB_POOL_SIZE);
    }

    #[tokio::test]
    async fn test_create_pool_is_lazy() {
        let config = DbConfig {
            host: "127.0.0.1".to_string(),
            port: 1,
            ..Default::default()
        };
        let pool = config.create_pool().unwrap();
        assert_eq!(pool.status().size, 0);
        assert_eq!(pool.status().max_size, DEFAULT_DB_POOL_SIZE);
    }
}
