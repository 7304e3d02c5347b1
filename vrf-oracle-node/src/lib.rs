//! Assembles an oracle node around the log broadcaster.
//!
//! The node owns the pieces the broadcaster needs but does not create itself:
//! the configuration, the persistent consumed-log store and the logging setup.
//! The chain client is supplied by the caller.
pub mod config;

use anyhow::{Context, Result};
use config::NodeConfig;
use std::sync::Arc;
use tokio::signal;
use vrf_oracle_broadcaster::{Broadcaster, ChainClient};
use vrf_oracle_store::SledConsumedLogStore;

/// Initializes the logging system based on the provided configuration.
pub fn init_logging(config: &NodeConfig) -> Result<()> {
    vrf_oracle_logger::init(&config.log)
}

/// A running oracle node.
pub struct OracleNode {
    broadcaster: Broadcaster,
    store: SledConsumedLogStore,
}

impl OracleNode {
    /// Opens the consumed-log store, then creates and starts the broadcaster.
    ///
    /// # Arguments
    ///
    /// * `config` - The node configuration.
    /// * `client` - The chain client the broadcaster subscribes through.
    pub async fn start(config: NodeConfig, client: Arc<dyn ChainClient>) -> Result<Self> {
        let store = SledConsumedLogStore::open(&config.store.db_path)?;
        tracing::info!(db_path = %config.store.db_path, "Consumed-log store opened");

        let broadcaster = Broadcaster::new(
            Arc::new(config.broadcaster),
            client,
            Arc::new(store.clone()),
        );
        broadcaster
            .start()
            .context("Failed to start the log broadcaster")?;

        Ok(Self { broadcaster, store })
    }

    /// A handle for registering listeners.
    pub fn broadcaster(&self) -> Broadcaster {
        self.broadcaster.clone()
    }

    pub fn store(&self) -> &SledConsumedLogStore {
        &self.store
    }

    /// Stops the broadcaster, waiting for all of its tasks, then flushes the store.
    pub async fn shutdown(self) -> Result<()> {
        self.broadcaster
            .stop()
            .await
            .context("Failed to stop the log broadcaster")?;
        self.store.flush().await?;
        tracing::info!("Shutdown complete.");
        Ok(())
    }

    /// Runs until Ctrl+C, then shuts down gracefully.
    pub async fn run_until_ctrl_c(self) -> Result<()> {
        match signal::ctrl_c().await {
            Ok(()) => tracing::info!("Received Ctrl+C, initiating graceful shutdown..."),
            Err(err) => tracing::error!(error = %err, "Failed to listen for shutdown signal."),
        }
        self.shutdown().await
    }
}
