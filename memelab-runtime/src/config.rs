//! Runtime Configuration Module
//!
//! Process-level settings for the cache runtime: which persistent backend to
//! use, where LMDB lives, how often to log stats, and where the optional TTL
//! override file is. Loaded from environment variables with development
//! defaults.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use memelab_core::{ConfigError, TtlPolicy};

use crate::constants::{
    DEFAULT_LMDB_MAX_SIZE_MB, DEFAULT_LMDB_PATH, DEFAULT_STATS_INTERVAL_SECS,
};
use crate::error::{RuntimeError, RuntimeResult};
use crate::telemetry::LogFormat;

// ============================================================================
// BACKEND SELECTION
// ============================================================================

/// Persistent tier implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendKind {
    /// Shared PostgreSQL table.
    #[default]
    Postgres,
    /// Embedded LMDB environment on local disk.
    Lmdb,
    /// Process-local map. Nothing survives a restart.
    Memory,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Postgres => "postgres",
            BackendKind::Lmdb => "lmdb",
            BackendKind::Memory => "memory",
        }
    }
}

impl FromStr for BackendKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => Ok(BackendKind::Postgres),
            "lmdb" => Ok(BackendKind::Lmdb),
            "memory" | "in-memory" => Ok(BackendKind::Memory),
            _ => Err(ConfigError::InvalidValue {
                field: "MEMELAB_CACHE_BACKEND".to_string(),
                value: s.to_string(),
                reason: "expected one of postgres, lmdb, memory".to_string(),
            }),
        }
    }
}

// ============================================================================
// RUNTIME CONFIGURATION
// ============================================================================

/// Runtime configuration.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Persistent tier backend.
    pub backend: BackendKind,

    /// LMDB directory (only used with the LMDB backend).
    pub lmdb_path: PathBuf,

    /// LMDB map size in megabytes.
    pub lmdb_max_size_mb: usize,

    /// How often cache stats are logged. Zero disables stats logging.
    pub stats_interval: Duration,

    /// Log output format.
    pub log_format: LogFormat,

    /// Optional TOML file overriding the TTL table.
    pub ttl_file: Option<PathBuf>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            lmdb_path: PathBuf::from(DEFAULT_LMDB_PATH),
            lmdb_max_size_mb: DEFAULT_LMDB_MAX_SIZE_MB,
            stats_interval: Duration::from_secs(DEFAULT_STATS_INTERVAL_SECS),
            log_format: LogFormat::default(),
            ttl_file: None,
        }
    }
}

impl RuntimeConfig {
    /// Create RuntimeConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `MEMELAB_CACHE_BACKEND`: postgres | lmdb | memory (default: postgres)
    /// - `MEMELAB_LMDB_PATH`: LMDB directory (default: ./data/cache)
    /// - `MEMELAB_LMDB_MAX_SIZE_MB`: LMDB map size (default: 512)
    /// - `MEMELAB_STATS_INTERVAL_SECS`: Stats log interval, 0 disables (default: 300)
    /// - `MEMELAB_LOG_FORMAT`: json | pretty (default: json)
    /// - `MEMELAB_CACHE_TTL_FILE`: TOML TTL override (default: none)
    ///
    /// An unrecognized backend or log format is an error rather than a
    /// silent fallback.
    pub fn from_env() -> RuntimeResult<Self> {
        let defaults = Self::default();

        let backend = match std::env::var("MEMELAB_CACHE_BACKEND") {
            Ok(value) => value.parse()?,
            Err(_) => defaults.backend,
        };

        let log_format = match std::env::var("MEMELAB_LOG_FORMAT") {
            Ok(value) => value.parse()?,
            Err(_) => defaults.log_format,
        };

        let lmdb_path = std::env::var("MEMELAB_LMDB_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.lmdb_path);

        let lmdb_max_size_mb = std::env::var("MEMELAB_LMDB_MAX_SIZE_MB")
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|mb| *mb > 0)
            .unwrap_or(defaults.lmdb_max_size_mb);

        let stats_interval = std::env::var("MEMELAB_STATS_INTERVAL_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.stats_interval);

        let ttl_file = std::env::var("MEMELAB_CACHE_TTL_FILE")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from);

        Ok(Self {
            backend,
            lmdb_path,
            lmdb_max_size_mb,
            stats_interval,
            log_format,
            ttl_file,
        })
    }

    /// TTL policy: the standard table, with the override file layered on top
    /// when one is configured.
    pub fn load_policy(&self) -> RuntimeResult<TtlPolicy> {
        let Some(path) = &self.ttl_file else {
            return Ok(TtlPolicy::standard());
        };

        let contents = std::fs::read_to_string(path).map_err(|source| RuntimeError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let policy = TtlPolicy::from_toml_str(&contents)?;
        tracing::info!(path = %path.display(), "TTL overrides loaded");
        Ok(policy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memelab_core::{Tier, ToolName};
    use std::io::Write;
    use std::sync::Mutex;

    // Environment variables are process-global.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    struct EnvVarGuard {
        key: &'static str,
        original: Option<String>,
    }

    impl EnvVarGuard {
        fn set(key: &'static str, value: Option<&str>) -> Self {
            let original = std::env::var(key).ok();
            match value {
                Some(v) => std::env::set_var(key, v),
                None => std::env::remove_var(key),
            }
            Self { key, original }
        }
    }

    impl Drop for EnvVarGuard {
        fn drop(&mut self) {
            match self.original.as_deref() {
                Some(v) => std::env::set_var(self.key, v),
                None => std::env::remove_var(self.key),
            }
        }
    }

    #[test]
    fn test_backend_kind_parsing() {
        assert_eq!("postgres".parse::<BackendKind>().unwrap(), BackendKind::Postgres);
        assert_eq!(" LMDB ".parse::<BackendKind>().unwrap(), BackendKind::Lmdb);
        assert_eq!("memory".parse::<BackendKind>().unwrap(), BackendKind::Memory);
        assert!("redis".parse::<BackendKind>().is_err());
    }

    #[test]
    fn test_from_env_defaults() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let _b = EnvVarGuard::set("MEMELAB_CACHE_BACKEND", None);
        let _s = EnvVarGuard::set("MEMELAB_STATS_INTERVAL_SECS", None);
        let _t = EnvVarGuard::set("MEMELAB_CACHE_TTL_FILE", None);
        let _f = EnvVarGuard::set("MEMELAB_LOG_FORMAT", None);

        let config = RuntimeConfig::from_env().unwrap();
        assert_eq!(config.backend, BackendKind::Postgres);
        assert_eq!(config.stats_interval, Duration::from_secs(DEFAULT_STATS_INTERVAL_SECS));
        assert_eq!(config.log_format, LogFormat::Json);
        assert!(config.ttl_file.is_none());
    }

    #[test]
    fn test_from_env_rejects_unknown_backend() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let _b = EnvVarGuard::set("MEMELAB_CACHE_BACKEND", Some("redis"));
        assert!(RuntimeConfig::from_env().is_err());
    }

    #[test]
    fn test_from_env_reads_overrides() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let _b = EnvVarGuard::set("MEMELAB_CACHE_BACKEND", Some("lmdb"));
        let _p = EnvVarGuard::set("MEMELAB_LMDB_PATH", Some("/tmp/memelab-cache"));
        let _s = EnvVarGuard::set("MEMELAB_STATS_INTERVAL_SECS", Some("0"));
        let _f = EnvVarGuard::set("MEMELAB_LOG_FORMAT", Some("pretty"));

        let config = RuntimeConfig::from_env().unwrap();
        assert_eq!(config.backend, BackendKind::Lmdb);
        assert_eq!(config.lmdb_path, PathBuf::from("/tmp/memelab-cache"));
        assert_eq!(config.stats_interval, Duration::ZERO);
        assert_eq!(config.log_format, LogFormat::Pretty);
    }

    #[test]
    fn test_load_policy_without_file_is_standard() {
        let config = RuntimeConfig::default();
        assert_eq!(config.load_policy().unwrap(), TtlPolicy::standard());
    }

    #[test]
    fn test_load_policy_applies_override_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[tools.trending]\nfree = 120\npremium = 30\nenterprise = 2").unwrap();

        let config = RuntimeConfig {
            ttl_file: Some(file.path().to_path_buf()),
            ..Default::default()
        };
        let policy = config.load_policy().unwrap();
        let trending = ToolName::new("trending").unwrap();
        assert_eq!(policy.resolve(&trending, Tier::Free), Duration::from_secs(120 * 60));
    }

    #[test]
    fn test_load_policy_missing_file_is_io_error() {
        let config = RuntimeConfig {
            ttl_file: Some(PathBuf::from("/nonexistent/memelab/ttl.toml")),
            ..Default::default()
        };
        assert!(matches!(config.load_policy(), Err(RuntimeError::Io { .. })));
    }
}
