//! MEMELAB cache process entry point.
//!
//! Loads configuration from the environment, initializes tracing, and runs
//! the response cache until ctrl-c.

use memelab_runtime::{init_tracing, run, DbConfig, RuntimeConfig, RuntimeResult};
use memelab_storage::CacheConfig;

#[tokio::main]
async fn main() -> RuntimeResult<()> {
    let runtime_config = RuntimeConfig::from_env()?;
    init_tracing(runtime_config.log_format)?;

    let cache_config = CacheConfig::from_env();
    let db_config = DbConfig::from_env();

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for shutdown signal");
        }
    };

    let summary = run(&runtime_config, cache_config, &db_config, shutdown).await?;
    tracing::info!(
        sweep_cycles = summary.sweep.cycles,
        rows_swept = summary.sweep.rows_removed,
        sweep_errors = summary.sweep.errors,
        hit_rate = summary.stats.hit_rate(),
        "Cache process stopped"
    );
    Ok(())
}
