//! XMBL node entry point: loads configuration, opens the RocksDB-backed
//! key/value store, and brings up a `Runtime`. The HTTP/P2P surface that
//! would sit in front of `Runtime::submit_transaction` is out of scope
//! (spec.md §1) — this binary exists to prove the facade wires up, the way
//! the teacher's own node binary is a thin shell over its engine crate.

use anyhow::{Context, Result};
use std::env;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use xmbl_core::config::RuntimeConfig;
use xmbl_core::kv::RocksKvStore;
use xmbl_core::runtime::Runtime;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config_path = env::args().nth(1).unwrap_or_else(|| "xmbl.yaml".to_string());
    let config = RuntimeConfig::load(&config_path).context("loading runtime configuration")?;

    let kv = Arc::new(RocksKvStore::open(&config.ledger.db_path).context("opening ledger key/value store")?);
    let runtime = Runtime::new(config, kv);

    tracing::info!(
        port = runtime.config.network.port,
        shards = runtime.config.state_machine.total_shards,
        "xmbl runtime ready"
    );

    // Keep the process alive; a real deployment would drive this from the
    // network transport's inbound loop (out of scope here).
    tokio::signal::ctrl_c().await.context("waiting for shutdown signal")?;
    tracing::info!("shutting down");
    Ok(())
}
