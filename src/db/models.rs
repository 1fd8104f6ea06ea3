use alloy::primitives::{Address, B256, U256};
use chrono::{DateTime, Utc};
use eyre::{eyre, Result, WrapErr};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::str::FromStr;

use crate::types::{
    hex_address, hex_b256, BridgeEvent, BridgeStatus, Chain, EventKind, IdempotencyKey,
};

// Note: amount and nonce are NUMERIC(78,0) in the database. We keep them as
// decimal strings here, casting text to NUMERIC on insert ($n::NUMERIC) and
// NUMERIC to text on select (amount::TEXT).

/// A relay attempt/outcome for one source event
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct BridgeTransaction {
    pub id: i64,
    pub source_chain: Chain,
    pub dest_chain: Chain,
    pub kind: EventKind,
    pub user_address: String,
    pub amount: String,
    pub source_tx_hash: String,
    pub log_index: i64,
    pub block_number: i64,
    pub dest_tx_hash: Option<String>,
    pub nonce: String,
    pub status: BridgeStatus,
    pub attempts: i32,
    pub error_message: Option<String>,
    /// Destination-side mint/unlock transaction recorded by the user-facing API
    pub claim_tx_hash: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BridgeTransaction {
    pub fn key(&self) -> IdempotencyKey {
        IdempotencyKey {
            source_chain: self.source_chain,
            source_tx_hash: self.source_tx_hash.clone(),
            log_index: self.log_index,
        }
    }

    /// Rebuild the source event, used when re-dispatching a requeued row
    pub fn to_event(&self) -> Result<BridgeEvent> {
        Ok(BridgeEvent {
            source_chain: self.source_chain,
            kind: self.kind,
            source_tx_hash: B256::from_str(&self.source_tx_hash)
                .wrap_err_with(|| format!("Invalid source tx hash on row {}", self.id))?,
            log_index: u64::try_from(self.log_index)
                .map_err(|_| eyre!("Negative log index on row {}", self.id))?,
            block_number: u64::try_from(self.block_number)
                .map_err(|_| eyre!("Negative block number on row {}", self.id))?,
            user: Address::from_str(&self.user_address)
                .wrap_err_with(|| format!("Invalid user address on row {}", self.id))?,
            amount: U256::from_str(&self.amount)
                .wrap_err_with(|| format!("Invalid amount on row {}", self.id))?,
            nonce: U256::from_str(&self.nonce)
                .wrap_err_with(|| format!("Invalid nonce on row {}", self.id))?,
        })
    }
}

/// For inserting new ledger rows
#[derive(Debug, Clone)]
pub struct NewBridgeTransaction {
    pub source_chain: Chain,
    pub dest_chain: Chain,
    pub kind: EventKind,
    pub user_address: String,
    pub amount: String,
    pub source_tx_hash: String,
    pub log_index: i64,
    pub block_number: i64,
    pub nonce: String,
}

impl NewBridgeTransaction {
    pub fn key(&self) -> IdempotencyKey {
        IdempotencyKey {
            source_chain: self.source_chain,
            source_tx_hash: self.source_tx_hash.clone(),
            log_index: self.log_index,
        }
    }
}

impl From<&BridgeEvent> for NewBridgeTransaction {
    fn from(event: &BridgeEvent) -> Self {
        Self {
            source_chain: event.source_chain,
            dest_chain: event.dest_chain(),
            kind: event.kind,
            user_address: hex_address(&event.user),
            amount: event.amount.to_string(),
            source_tx_hash: hex_b256(&event.source_tx_hash),
            log_index: event.log_index as i64,
            block_number: event.block_number as i64,
            nonce: event.nonce.to_string(),
        }
    }
}

/// Result of opening a relay attempt on the idempotency key
#[derive(Debug, Clone, PartialEq)]
pub enum OpenAttempt {
    /// Row is `initiated` and owned by this attempt
    Opened(BridgeTransaction),
    /// Row was already `relayed`; nothing to do
    AlreadyRelayed(BridgeTransaction),
}

/// Rows not yet claimed on the destination side, for the pending view
#[derive(Debug, Clone, Serialize)]
pub struct PendingSummary {
    /// Sum of `relayed` amounts the user can mint/unlock
    pub claimable_amount: String,
    pub transactions: Vec<BridgeTransaction>,
}

/// Ledger row counts per status
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub initiated: i64,
    pub relayed: i64,
    pub failed: i64,
}

/// Last processed block for a chain
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ChainCheckpoint {
    pub chain: Chain,
    pub last_processed_block: i64,
    pub updated_at: DateTime<Utc>,
}
