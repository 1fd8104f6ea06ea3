//! Relay dispatch - turns a decoded source event into its mirrored
//! destination call, exactly once in effect.
//!
//! Every attempt goes through the ledger's idempotency key first, so a replayed
//! window, a restarted process or a requeued row all converge on the same row
//! and at most one successful destination transaction.

use eyre::{eyre, Result};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use crate::adapters::ChainAdapter;
use crate::db::models::{BridgeTransaction, NewBridgeTransaction, OpenAttempt};
use crate::error::{SubmissionError, SubmissionErrorKind};
use crate::ledger::BridgeLedger;
use crate::metrics;
use crate::types::{BridgeEvent, BridgeStatus, Chain};

pub mod retry;

pub use retry::{classify_error, RetryPolicy};

/// What happened to one event
#[derive(Debug, Clone)]
pub enum RelayOutcome {
    /// Destination call confirmed (or the destination had already consumed the nonce)
    Relayed(BridgeTransaction),
    /// Ledger row was already `relayed`; nothing submitted
    AlreadyRelayed(BridgeTransaction),
    /// Retryable failure; the event is picked up again by a later cycle
    Deferred(BridgeTransaction),
    /// Retry budget spent; parked as `failed` until an explicit retry
    Exhausted(BridgeTransaction),
    /// Fatal failure; the pipeline must stop dispatching
    Halt(BridgeTransaction, SubmissionError),
}

impl RelayOutcome {
    /// Whether the checkpoint may move past this event
    pub fn is_resolved(&self) -> bool {
        matches!(
            self,
            RelayOutcome::Relayed(_) | RelayOutcome::AlreadyRelayed(_) | RelayOutcome::Exhausted(_)
        )
    }

    pub fn transaction(&self) -> &BridgeTransaction {
        match self {
            RelayOutcome::Relayed(tx)
            | RelayOutcome::AlreadyRelayed(tx)
            | RelayOutcome::Deferred(tx)
            | RelayOutcome::Exhausted(tx)
            | RelayOutcome::Halt(tx, _) => tx,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            RelayOutcome::Relayed(_) => "relayed",
            RelayOutcome::AlreadyRelayed(_) => "already_relayed",
            RelayOutcome::Deferred(_) => "deferred",
            RelayOutcome::Exhausted(_) => "exhausted",
            RelayOutcome::Halt(..) => "halt",
        }
    }
}

/// Submits mirrored calls and keeps the ledger in step
pub struct RelayDispatcher {
    ledger: Arc<dyn BridgeLedger>,
    adapters: HashMap<Chain, Arc<dyn ChainAdapter>>,
    retry: RetryPolicy,
    /// Upper bound on one submission, broadcast and receipt wait included
    submit_timeout: Duration,
    /// Upper bound on each ledger read or write
    store_timeout: Duration,
}

impl RelayDispatcher {
    pub fn new(
        ledger: Arc<dyn BridgeLedger>,
        adapters: Vec<Arc<dyn ChainAdapter>>,
        retry: RetryPolicy,
        submit_timeout: Duration,
        store_timeout: Duration,
    ) -> Self {
        let adapters = adapters
            .into_iter()
            .map(|adapter| (adapter.chain(), adapter))
            .collect();
        Self {
            ledger,
            adapters,
            retry,
            submit_timeout,
            store_timeout,
        }
    }

    /// Relay one event. `Err` means the ledger could not be read or written;
    /// callers treat that as unresolved.
    pub async fn relay(&self, event: &BridgeEvent) -> Result<RelayOutcome> {
        let outcome = self.relay_inner(event).await?;
        metrics::record_relay(event.source_chain.as_str(), outcome.label());
        Ok(outcome)
    }

    async fn relay_inner(&self, event: &BridgeEvent) -> Result<RelayOutcome> {
        let key = event.key();

        let adapter = self
            .adapters
            .get(&event.dest_chain())
            .ok_or_else(|| eyre!("No adapter for destination chain {}", event.dest_chain()))?;

        if let Some(existing) = self.bounded("ledger find", self.ledger.find(&key)).await? {
            match existing.status {
                BridgeStatus::Relayed => return Ok(RelayOutcome::AlreadyRelayed(existing)),
                BridgeStatus::Failed if !self.retry.should_retry(attempts(&existing)) => {
                    return Ok(RelayOutcome::Exhausted(existing));
                }
                _ => {}
            }
        }

        let new = NewBridgeTransaction::from(event);
        let mut tx = match self
            .bounded("ledger open", self.ledger.open_attempt(&new))
            .await?
        {
            OpenAttempt::Opened(tx) => tx,
            OpenAttempt::AlreadyRelayed(tx) => return Ok(RelayOutcome::AlreadyRelayed(tx)),
        };

        info!(
            key = %key,
            dest_chain = %event.dest_chain(),
            user = %event.user,
            amount = %event.amount,
            nonce = %event.nonce,
            attempt = tx.attempts,
            "Relaying {}",
            event.kind
        );

        let started = Instant::now();
        let result = tokio::time::timeout(self.submit_timeout, adapter.submit_mirrored(event))
            .await
            .unwrap_or_else(|_| {
                Err(SubmissionError::retryable(format!(
                    "submission timed out after {:?}",
                    self.submit_timeout
                )))
            });

        match result {
            Ok(dest_tx_hash) => {
                self.bounded(
                    "ledger settle",
                    self.ledger.mark_relayed(tx.id, Some(&dest_tx_hash)),
                )
                .await?;
                metrics::record_relay_latency(
                    event.source_chain.as_str(),
                    started.elapsed().as_secs_f64(),
                );
                info!(key = %key, dest_tx_hash = %dest_tx_hash, "Relay confirmed");
                tx.status = BridgeStatus::Relayed;
                tx.dest_tx_hash = Some(dest_tx_hash);
                tx.error_message = None;
                Ok(RelayOutcome::Relayed(tx))
            }
            Err(err) if err.kind == SubmissionErrorKind::AlreadyProcessed => {
                self.bounded(
                    "ledger settle",
                    self.ledger.mark_relayed(tx.id, err.tx_hash.as_deref()),
                )
                .await?;
                info!(key = %key, reason = %err.message, "Destination already processed nonce, marking relayed");
                tx.status = BridgeStatus::Relayed;
                tx.dest_tx_hash = err.tx_hash;
                tx.error_message = None;
                Ok(RelayOutcome::Relayed(tx))
            }
            Err(err) => {
                self.bounded("ledger settle", self.ledger.mark_failed(tx.id, &err.message))
                    .await?;
                tx.status = BridgeStatus::Failed;
                tx.error_message = Some(err.message.clone());
                metrics::record_error(event.dest_chain().as_str(), &err.kind.to_string());

                match err.kind {
                    SubmissionErrorKind::Fatal => {
                        error!(
                            key = %key,
                            dest_chain = %event.dest_chain(),
                            error = %err,
                            "Fatal relay failure, operator action required"
                        );
                        Ok(RelayOutcome::Halt(tx, err))
                    }
                    _ if self.retry.should_retry(attempts(&tx)) => {
                        warn!(
                            key = %key,
                            attempt = tx.attempts,
                            max_attempts = self.retry.max_attempts,
                            error = %err,
                            "Relay failed, will retry"
                        );
                        Ok(RelayOutcome::Deferred(tx))
                    }
                    _ => {
                        error!(
                            key = %key,
                            attempts = tx.attempts,
                            error = %err,
                            "Relay retry budget exhausted, row parked as failed"
                        );
                        Ok(RelayOutcome::Exhausted(tx))
                    }
                }
            }
        }
    }

    async fn bounded<T>(&self, what: &str, fut: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::time::timeout(self.store_timeout, fut)
            .await
            .map_err(|_| eyre!("{} timed out after {:?}", what, self.store_timeout))?
    }
}

fn attempts(tx: &BridgeTransaction) -> u32 {
    u32::try_from(tx.attempts).unwrap_or(0)
}
