//! Runtime defaults.

/// Default LMDB directory.
pub const DEFAULT_LMDB_PATH: &str = "./data/cache";

/// Default LMDB map size in megabytes.
pub const DEFAULT_LMDB_MAX_SIZE_MB: usize = 512;

/// Default interval between cache stats log lines.
pub const DEFAULT_STATS_INTERVAL_SECS: u64 = 300;

/// Default Postgres pool size.
pub const DEFAULT_DB_POOL_SIZE: usize = 16;

/// Default Postgres connection timeout.
pub const DEFAULT_DB_TIMEOUT_SECS: u64 = 30;

/// Default tracing filter when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "memelab=debug,info";
