//! Error types for the cache runtime.

use memelab_core::{ConfigError, MemelabError};
use memelab_storage::LmdbStoreError;
use thiserror::Error;

/// Errors raised while bootstrapping or running the cache process.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Cache or configuration error from the core crates.
    #[error(transparent)]
    Memelab(#[from] MemelabError),

    /// The LMDB store could not be opened.
    #[error("LMDB store error: {0}")]
    Lmdb(#[from] LmdbStoreError),

    /// The Postgres connection pool could not be built.
    #[error("Failed to create connection pool: {0}")]
    Pool(String),

    /// The tracing subscriber could not be installed.
    #[error("Failed to initialize tracing: {0}")]
    Telemetry(String),

    /// Filesystem error, e.g. reading the TTL override file.
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl From<ConfigError> for RuntimeError {
    fn from(e: ConfigError) -> Self {
        RuntimeError::Memelab(MemelabError::Config(e))
    }
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
