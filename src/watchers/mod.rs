use chrono::{DateTime, Utc};
use eyre::Result;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{error, info};

use crate::adapters::ChainAdapter;
use crate::checkpoint::CheckpointStore;
use crate::config::RelayerConfig;
use crate::ledger::BridgeLedger;
use crate::types::Chain;
use crate::writers::{RelayDispatcher, RetryPolicy};

pub mod chain;

pub use chain::{ChainWatcher, CycleReport, WatcherSettings};

/// Last known state of one chain's pipeline, for the health endpoints
#[derive(Debug, Clone, Serialize)]
pub struct PipelineStatus {
    pub chain: Chain,
    pub checkpoint: Option<u64>,
    pub safe_head: Option<u64>,
    pub last_window: Option<(u64, u64)>,
    pub last_cycle_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    /// Reason the pipeline stopped dispatching, if it did
    pub halted: Option<String>,
}

impl PipelineStatus {
    pub fn new(chain: Chain) -> Self {
        Self {
            chain,
            checkpoint: None,
            safe_head: None,
            last_window: None,
            last_cycle_at: None,
            last_error: None,
            halted: None,
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.halted.is_none()
    }
}

/// Written by one watcher, read by the API
pub type SharedStatus = Arc<RwLock<PipelineStatus>>;

/// Manages the two chain pipelines
pub struct WatcherManager {
    watchers: Vec<ChainWatcher>,
}

impl WatcherManager {
    /// One watcher per adapter, all sharing a single dispatcher
    pub fn new(
        config: &RelayerConfig,
        adapters: Vec<Arc<dyn ChainAdapter>>,
        checkpoints: Arc<dyn CheckpointStore>,
        ledger: Arc<dyn BridgeLedger>,
    ) -> Self {
        let dispatcher = Arc::new(RelayDispatcher::new(
            ledger.clone(),
            adapters.clone(),
            RetryPolicy::new(config.max_relay_attempts),
            config.submit_timeout(),
            config.rpc_timeout(),
        ));

        let settings = WatcherSettings::from_config(config);
        let watchers: Vec<ChainWatcher> = adapters
            .into_iter()
            .map(|adapter| {
                ChainWatcher::new(
                    adapter,
                    dispatcher.clone(),
                    checkpoints.clone(),
                    ledger.clone(),
                    settings.clone(),
                )
            })
            .collect();

        info!(
            chains = ?watchers.iter().map(|w| w.chain()).collect::<Vec<_>>(),
            "Watcher manager created"
        );

        Self { watchers }
    }

    pub fn statuses(&self) -> Vec<SharedStatus> {
        self.watchers.iter().map(|w| w.status()).collect()
    }

    /// Run all watchers concurrently
    /// Returns when any watcher fails or shutdown signal received
    pub async fn run(self, mut shutdown: mpsc::Receiver<()>) -> Result<()> {
        let mut join_set = tokio::task::JoinSet::new();

        for watcher in self.watchers {
            join_set.spawn(async move { watcher.run().await });
        }

        tokio::select! {
            _ = shutdown.recv() => {
                info!("Shutdown signal received, stopping watchers");
                join_set.abort_all();
                Ok(())
            }
            maybe_done = join_set.join_next() => {
                match maybe_done {
                    Some(Ok(Ok(()))) => {
                        error!("A watcher exited unexpectedly without error");
                        Err(eyre::eyre!("watcher exited unexpectedly"))
                    }
                    Some(Ok(Err(e))) => {
                        error!("A watcher stopped with error: {:?}", e);
                        Err(e)
                    }
                    Some(Err(e)) => {
                        error!("A watcher task panicked: {:?}", e);
                        Err(eyre::eyre!("watcher task panicked: {}", e))
                    }
                    None => {
                        error!("All watcher tasks exited unexpectedly");
                        Err(eyre::eyre!("all watcher tasks exited unexpectedly"))
                    }
                }
            }
        }
    }
}
