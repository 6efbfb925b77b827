//! MEMELAB Runtime
//!
//! Bootstraps the response cache as a long-running process: environment
//! configuration, tracing, the persistent backend, the cache handle with its
//! sweep, periodic stats logging, and graceful shutdown.

pub mod app;
pub mod config;
pub mod constants;
pub mod db;
pub mod error;
pub mod telemetry;

pub use app::{run, serve, RunSummary};
pub use config::{BackendKind, RuntimeConfig};
pub use db::DbConfig;
pub use error::{RuntimeError, RuntimeResult};
pub use telemetry::{init_tracing, LogFormat};
