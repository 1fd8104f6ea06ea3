//! Persistent record of relay attempts and outcomes
//!
//! The ledger owns every `BridgeTransaction` row. Its only business logic is
//! the status state machine: rows are opened as `initiated`, settle as
//! `relayed` or `failed`, may be re-opened from `failed`, and never leave
//! `relayed`.

use async_trait::async_trait;
use eyre::Result;
use std::time::Duration;

use crate::db::models::{
    BridgeTransaction, NewBridgeTransaction, OpenAttempt, PendingSummary, StatusCounts,
};
use crate::types::{Chain, IdempotencyKey};

#[async_trait]
pub trait BridgeLedger: Send + Sync {
    /// Look up a row by its idempotency key
    async fn find(&self, key: &IdempotencyKey) -> Result<Option<BridgeTransaction>>;

    async fn get(&self, id: i64) -> Result<Option<BridgeTransaction>>;

    /// Atomically insert-or-reopen the row for `tx` as `initiated`, bumping
    /// `attempts`. A `relayed` row is returned untouched.
    async fn open_attempt(&self, tx: &NewBridgeTransaction) -> Result<OpenAttempt>;

    async fn mark_relayed(&self, id: i64, dest_tx_hash: Option<&str>) -> Result<()>;

    async fn mark_failed(&self, id: i64, error: &str) -> Result<()>;

    /// Explicit retry: `failed` -> `initiated` with a fresh attempt budget.
    /// Returns false if the row is not `failed`.
    async fn requeue(&self, id: i64) -> Result<bool>;

    /// `initiated` rows for `chain` that were requeued, or have not been
    /// touched for `older_than` (a crash between submit and settle)
    async fn stale_initiated(
        &self,
        chain: Chain,
        older_than: Duration,
    ) -> Result<Vec<BridgeTransaction>>;

    /// Rows whose mint/unlock has not been claimed, with the claimable total
    async fn pending_for_user(&self, user: &str) -> Result<PendingSummary>;

    /// All rows for a user, newest first
    async fn history_for_user(&self, user: &str) -> Result<Vec<BridgeTransaction>>;

    /// Map `relayed`, unclaimed rows to the user's destination-side claim tx
    async fn record_claim(&self, user: &str, ids: &[i64], claim_tx_hash: &str) -> Result<u64>;

    async fn count_by_status(&self) -> Result<StatusCounts>;
}

/// Addresses are stored lowercase
pub fn normalize_address(user: &str) -> String {
    user.trim().to_lowercase()
}
