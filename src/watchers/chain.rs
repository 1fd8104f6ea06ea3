//! Chain watcher - one poll pipeline per source chain
//!
//! Each cycle reads the safe head, fetches at most `max_block_window` blocks
//! past the checkpoint, relays the decoded events in `(block, log index)` order
//! and moves the checkpoint only as far as every event has been resolved.

use chrono::Utc;
use eyre::{eyre, Result};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::{timeout, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::{PipelineStatus, SharedStatus};
use crate::adapters::ChainAdapter;
use crate::checkpoint::{seed_block, CheckpointStore};
use crate::config::{CheckpointSeed, RelayerConfig};
use crate::error::SubmissionError;
use crate::ledger::BridgeLedger;
use crate::metrics;
use crate::types::{BridgeEvent, Chain};
use crate::writers::{RelayDispatcher, RelayOutcome};

/// Cadence and bounds for a watcher
#[derive(Debug, Clone)]
pub struct WatcherSettings {
    pub poll_interval: Duration,
    pub max_block_window: u64,
    pub confirmation_depth: u64,
    pub checkpoint_seed: CheckpointSeed,
    /// Bound on each checkpoint/ledger call made by the watcher itself
    pub store_timeout: Duration,
    /// Age after which an `initiated` row is re-dispatched by the sweep
    pub requeue_grace: Duration,
}

impl WatcherSettings {
    pub fn from_config(config: &RelayerConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            max_block_window: config.max_block_window.max(1),
            confirmation_depth: config.confirmation_depth,
            checkpoint_seed: config.checkpoint_seed,
            store_timeout: config.rpc_timeout(),
            requeue_grace: config.requeue_grace(),
        }
    }
}

/// Summary of one poll cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Block range fetched this cycle, if any
    pub window: Option<(u64, u64)>,
    /// Checkpoint after the cycle
    pub checkpoint: u64,
    pub decoded: usize,
    pub decode_failures: usize,
    pub resolved: usize,
    pub unresolved: usize,
    /// Stale `initiated` rows re-dispatched by the sweep
    pub requeued: usize,
    pub halted: bool,
}

pub struct ChainWatcher {
    chain: Chain,
    adapter: Arc<dyn ChainAdapter>,
    dispatcher: Arc<RelayDispatcher>,
    checkpoints: Arc<dyn CheckpointStore>,
    ledger: Arc<dyn BridgeLedger>,
    settings: WatcherSettings,
    status: SharedStatus,
}

impl ChainWatcher {
    pub fn new(
        adapter: Arc<dyn ChainAdapter>,
        dispatcher: Arc<RelayDispatcher>,
        checkpoints: Arc<dyn CheckpointStore>,
        ledger: Arc<dyn BridgeLedger>,
        settings: WatcherSettings,
    ) -> Self {
        let chain = adapter.chain();
        Self {
            chain,
            adapter,
            dispatcher,
            checkpoints,
            ledger,
            settings,
            status: Arc::new(RwLock::new(PipelineStatus::new(chain))),
        }
    }

    pub fn chain(&self) -> Chain {
        self.chain
    }

    pub fn status(&self) -> SharedStatus {
        self.status.clone()
    }

    /// Run the poll loop until the task is aborted.
    ///
    /// The cycle runs inline, so it never overlaps itself; ticks that fire
    /// while a cycle is still running are dropped rather than queued.
    pub async fn run(self) -> Result<()> {
        let chain = self.chain.as_str();
        let interval = self.settings.poll_interval;

        info!(
            chain,
            poll_interval = ?interval,
            max_block_window = self.settings.max_block_window,
            confirmation_depth = self.settings.confirmation_depth,
            "Starting chain watcher"
        );

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            let started = Instant::now();

            match self.run_cycle().await {
                Ok(report) => {
                    metrics::record_successful_poll(chain);
                    self.status.write().await.last_error = None;
                    if report.window.is_some() || report.requeued > 0 {
                        debug!(chain, ?report, "Poll cycle complete");
                    }
                }
                Err(e) => {
                    warn!(chain, error = %e, "Poll cycle failed, range will be retried");
                    metrics::record_error(chain, "cycle");
                    self.status.write().await.last_error = Some(e.to_string());
                }
            }

            let elapsed = started.elapsed();
            if elapsed >= interval {
                let missed = (elapsed.as_millis() / interval.as_millis().max(1)) as u64;
                metrics::record_cycles_skipped(chain, missed);
                debug!(chain, elapsed = ?elapsed, missed, "Cycle overran its interval, skipping ticks");
            }
        }
    }

    /// One pass of the pipeline
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        {
            let status = self.status.read().await;
            if status.halted.is_some() {
                return Ok(CycleReport {
                    checkpoint: status.checkpoint.unwrap_or_default(),
                    halted: true,
                    ..Default::default()
                });
            }
        }

        let head = self.adapter.latest_block().await?;
        let safe_head = head.saturating_sub(self.settings.confirmation_depth);
        metrics::set_safe_head(self.chain.as_str(), safe_head);

        let checkpoint = self.load_checkpoint(safe_head).await?;
        let mut report = CycleReport {
            checkpoint,
            ..Default::default()
        };

        if checkpoint < safe_head {
            self.process_window(checkpoint, safe_head, &mut report).await?;
        } else {
            debug!(chain = %self.chain, checkpoint, safe_head, "No new blocks");
        }

        if !report.halted {
            if let Err(e) = self.requeue_sweep(&mut report).await {
                warn!(chain = %self.chain, error = %e, "Requeue sweep failed");
            }
        }

        let mut status = self.status.write().await;
        status.checkpoint = Some(report.checkpoint);
        status.safe_head = Some(safe_head);
        if report.window.is_some() {
            status.last_window = report.window;
        }
        status.last_cycle_at = Some(Utc::now());

        Ok(report)
    }

    async fn load_checkpoint(&self, safe_head: u64) -> Result<u64> {
        if let Some(checkpoint) = self
            .bounded("checkpoint read", self.checkpoints.get(self.chain))
            .await?
        {
            return Ok(checkpoint);
        }

        let seed = seed_block(self.settings.checkpoint_seed, safe_head);
        let stored = self
            .bounded(
                "checkpoint init",
                self.checkpoints.get_or_init(self.chain, seed),
            )
            .await?;
        info!(
            chain = %self.chain,
            checkpoint = stored,
            seed = ?self.settings.checkpoint_seed,
            "Initialized checkpoint"
        );
        Ok(stored)
    }

    async fn process_window(
        &self,
        checkpoint: u64,
        safe_head: u64,
        report: &mut CycleReport,
    ) -> Result<()> {
        let chain = self.chain.as_str();
        let from_block = checkpoint + 1;
        let to_block = safe_head.min(from_block.saturating_add(self.settings.max_block_window.saturating_sub(1)));
        report.window = Some((from_block, to_block));

        debug!(chain, from_block, to_block, "Processing blocks");

        // An RPC failure here leaves the checkpoint untouched
        let logs = self.adapter.fetch_logs(from_block, to_block).await?;

        let mut events: Vec<BridgeEvent> = Vec::with_capacity(logs.len());
        for log in &logs {
            match self.adapter.decode(log) {
                Ok(event) if event.block_number < from_block || event.block_number > to_block => {
                    warn!(
                        chain,
                        block_number = event.block_number,
                        from_block,
                        to_block,
                        "Provider returned a log outside the requested range, skipping"
                    );
                    report.decode_failures += 1;
                    metrics::record_decode_failure(chain);
                }
                Ok(event) => events.push(event),
                Err(e) => {
                    warn!(chain, error = %e, "Skipping malformed bridge log");
                    report.decode_failures += 1;
                    metrics::record_decode_failure(chain);
                }
            }
        }
        events.sort_by_key(|event| (event.block_number, event.log_index));
        events.dedup_by(|a, b| a.key() == b.key());
        report.decoded = events.len();

        if !events.is_empty() {
            info!(chain, from_block, to_block, count = events.len(), "Found bridge events");
        }

        let mut first_unresolved: Option<u64> = None;
        for event in &events {
            metrics::record_event_detected(chain, event.kind.as_str());

            let resolved = match self.dispatcher.relay(event).await {
                Ok(RelayOutcome::Halt(_, err)) => {
                    self.halt(&err).await;
                    report.halted = true;
                    false
                }
                Ok(outcome) => outcome.is_resolved(),
                Err(e) => {
                    warn!(
                        chain,
                        key = %event.key(),
                        error = ?e,
                        "Relay could not be recorded, will retry"
                    );
                    false
                }
            };

            if resolved {
                report.resolved += 1;
            } else {
                report.unresolved += 1;
                first_unresolved.get_or_insert(event.block_number);
            }

            if report.halted {
                break;
            }
        }

        let target = match first_unresolved {
            Some(block) => {
                info!(chain, block_number = block, "Holding checkpoint before unresolved event");
                block.saturating_sub(1)
            }
            None => to_block,
        };

        if target > checkpoint {
            self.bounded("checkpoint advance", self.checkpoints.advance(self.chain, target))
                .await?;
            metrics::record_blocks_processed(chain, target - checkpoint, target);
            report.checkpoint = target;
        }

        Ok(())
    }

    /// Re-dispatch `initiated` rows the window path will not see again:
    /// explicit retries and attempts interrupted between submit and settle
    async fn requeue_sweep(&self, report: &mut CycleReport) -> Result<()> {
        let stale = self
            .bounded(
                "stale row lookup",
                self.ledger
                    .stale_initiated(self.chain, self.settings.requeue_grace),
            )
            .await?;

        for row in stale {
            let event = match row.to_event() {
                Ok(event) => event,
                Err(e) => {
                    warn!(chain = %self.chain, id = row.id, error = %e, "Cannot rebuild event from row");
                    continue;
                }
            };
            // Not yet behind the checkpoint: the window path will fetch it
            if event.block_number > report.checkpoint {
                continue;
            }

            match self.dispatcher.relay(&event).await {
                Ok(RelayOutcome::Halt(_, err)) => {
                    self.halt(&err).await;
                    report.halted = true;
                    break;
                }
                Ok(outcome) => {
                    info!(
                        chain = %self.chain,
                        id = row.id,
                        outcome = outcome.label(),
                        "Re-dispatched stale row"
                    );
                    report.requeued += 1;
                }
                Err(e) => {
                    warn!(chain = %self.chain, id = row.id, error = ?e, "Re-dispatch failed");
                }
            }
        }

        Ok(())
    }

    async fn halt(&self, err: &SubmissionError) {
        error!(
            chain = %self.chain,
            dest_chain = %self.chain.opposite(),
            error = %err,
            "Pipeline halted after fatal submission error; restart once resolved"
        );
        metrics::set_pipeline_halted(self.chain.as_str(), true);
        self.status.write().await.halted = Some(err.message.clone());
    }

    async fn bounded<T>(&self, what: &str, fut: impl Future<Output = Result<T>>) -> Result<T> {
        timeout(self.settings.store_timeout, fut)
            .await
            .map_err(|_| {
                eyre!(
                    "{} {} timed out after {:?}",
                    self.chain,
                    what,
                    self.settings.store_timeout
                )
            })?
    }
}
