//! In-memory stores and a scripted chain adapter for unit tests

use alloy::primitives::{keccak256, Address, Bytes, LogData, B256, U256};
use alloy::rpc::types::Log;
use async_trait::async_trait;
use chrono::Utc;
use eyre::{eyre, Result};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

use crate::adapters::ChainAdapter;
use crate::checkpoint::CheckpointStore;
use crate::db::models::{
    BridgeTransaction, NewBridgeTransaction, OpenAttempt, PendingSummary, StatusCounts,
};
use crate::error::{RpcError, SubmissionError};
use crate::ledger::{normalize_address, BridgeLedger};
use crate::types::{BridgeEvent, BridgeStatus, Chain, IdempotencyKey};

pub const TEST_BRIDGE: Address = Address::new([0xbb; 20]);

/// Deterministic event: same user and amount, distinct tx hash per (chain, block, log index)
pub fn sample_event(chain: Chain, block: u64, log_index: u64, nonce: u64) -> BridgeEvent {
    BridgeEvent {
        source_chain: chain,
        kind: chain.source_event(),
        source_tx_hash: keccak256(format!("{}:{}:{}", chain, block, log_index)),
        log_index,
        block_number: block,
        user: Address::repeat_byte(0x0A),
        amount: U256::from(100),
        nonce: U256::from(nonce),
    }
}

/// Raw bridge log as a provider would return it
pub fn bridge_log(
    chain: Chain,
    block: u64,
    log_index: u64,
    tx_hash: B256,
    user_byte: u8,
    amount: u64,
    nonce: u64,
) -> Log {
    let user = Address::repeat_byte(user_byte);
    let mut data = Vec::with_capacity(64);
    data.extend_from_slice(&U256::from(amount).to_be_bytes::<32>());
    data.extend_from_slice(&U256::from(nonce).to_be_bytes::<32>());

    Log {
        inner: alloy::primitives::Log {
            address: TEST_BRIDGE,
            data: LogData::new_unchecked(
                vec![chain.source_event().topic(), user.into_word()],
                Bytes::from(data),
            ),
        },
        block_hash: Some(B256::repeat_byte(0x11)),
        block_number: Some(block),
        block_timestamp: None,
        transaction_hash: Some(tx_hash),
        transaction_index: Some(0),
        log_index: Some(log_index),
        removed: false,
    }
}

/// The log `sample_event` would have been decoded from
pub fn log_for(event: &BridgeEvent) -> Log {
    let mut log = bridge_log(
        event.source_chain,
        event.block_number,
        event.log_index,
        event.source_tx_hash,
        0x0A,
        0,
        0,
    );
    let mut data = Vec::with_capacity(64);
    data.extend_from_slice(&event.amount.to_be_bytes::<32>());
    data.extend_from_slice(&event.nonce.to_be_bytes::<32>());
    log.inner.data = LogData::new_unchecked(
        vec![event.kind.topic(), event.user.into_word()],
        Bytes::from(data),
    );
    log
}

// ============================================================================
// MemoryStore
// ============================================================================

#[derive(Default)]
struct MemoryState {
    checkpoints: HashMap<Chain, u64>,
    rows: Vec<BridgeTransaction>,
}

/// Checkpoint store and ledger with the same semantics as the Postgres queries
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    ledger_down: AtomicBool,
    ledger_stalled: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().rows.len()
    }

    pub fn rows(&self) -> Vec<BridgeTransaction> {
        self.state.lock().unwrap().rows.clone()
    }

    /// Make every ledger call fail until reset
    pub fn set_ledger_down(&self, down: bool) {
        self.ledger_down.store(down, Ordering::SeqCst);
    }

    /// Make relay-path ledger calls hang until reset
    pub fn set_ledger_stalled(&self, stalled: bool) {
        self.ledger_stalled.store(stalled, Ordering::SeqCst);
    }

    async fn wait_if_stalled(&self) {
        if self.ledger_stalled.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
    }

    fn check_ledger(&self) -> Result<()> {
        if self.ledger_down.load(Ordering::SeqCst) {
            return Err(eyre!("ledger unavailable"));
        }
        Ok(())
    }

    fn update<F>(&self, id: i64, f: F) -> Result<bool>
    where
        F: FnOnce(&mut BridgeTransaction) -> bool,
    {
        self.check_ledger()?;
        let mut state = self.state.lock().unwrap();
        match state.rows.iter_mut().find(|row| row.id == id) {
            Some(row) => {
                let changed = f(row);
                if changed {
                    row.updated_at = Utc::now();
                }
                Ok(changed)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl CheckpointStore for MemoryStore {
    async fn get(&self, chain: Chain) -> Result<Option<u64>> {
        Ok(self.state.lock().unwrap().checkpoints.get(&chain).copied())
    }

    async fn get_or_init(&self, chain: Chain, initial: u64) -> Result<u64> {
        let mut state = self.state.lock().unwrap();
        Ok(*state.checkpoints.entry(chain).or_insert(initial))
    }

    async fn advance(&self, chain: Chain, block: u64) -> Result<bool> {
        let mut state = self.state.lock().unwrap();
        let current = state.checkpoints.entry(chain).or_insert(0);
        if block <= *current {
            return Ok(false);
        }
        *current = block;
        Ok(true)
    }
}

#[async_trait]
impl BridgeLedger for MemoryStore {
    async fn find(&self, key: &IdempotencyKey) -> Result<Option<BridgeTransaction>> {
        self.wait_if_stalled().await;
        self.check_ledger()?;
        let state = self.state.lock().unwrap();
        Ok(state.rows.iter().find(|row| &row.key() == key).cloned())
    }

    async fn get(&self, id: i64) -> Result<Option<BridgeTransaction>> {
        self.check_ledger()?;
        let state = self.state.lock().unwrap();
        Ok(state.rows.iter().find(|row| row.id == id).cloned())
    }

    async fn open_attempt(&self, tx: &NewBridgeTransaction) -> Result<OpenAttempt> {
        self.wait_if_stalled().await;
        self.check_ledger()?;
        let key = tx.key();
        let mut state = self.state.lock().unwrap();

        if let Some(row) = state.rows.iter_mut().find(|row| row.key() == key) {
            if row.status == BridgeStatus::Relayed {
                return Ok(OpenAttempt::AlreadyRelayed(row.clone()));
            }
            row.status = BridgeStatus::Initiated;
            row.attempts += 1;
            row.error_message = None;
            row.updated_at = Utc::now();
            return Ok(OpenAttempt::Opened(row.clone()));
        }

        let now = Utc::now();
        let row = BridgeTransaction {
            id: state.rows.len() as i64 + 1,
            source_chain: tx.source_chain,
            dest_chain: tx.dest_chain,
            kind: tx.kind,
            user_address: tx.user_address.clone(),
            amount: tx.amount.clone(),
            source_tx_hash: tx.source_tx_hash.clone(),
            log_index: tx.log_index,
            block_number: tx.block_number,
            dest_tx_hash: None,
            nonce: tx.nonce.clone(),
            status: BridgeStatus::Initiated,
            attempts: 1,
            error_message: None,
            claim_tx_hash: None,
            created_at: now,
            updated_at: now,
        };
        state.rows.push(row.clone());
        Ok(OpenAttempt::Opened(row))
    }

    async fn mark_relayed(&self, id: i64, dest_tx_hash: Option<&str>) -> Result<()> {
        self.wait_if_stalled().await;
        self.update(id, |row| {
            if !row.status.can_transition_to(BridgeStatus::Relayed) {
                return false;
            }
            row.status = BridgeStatus::Relayed;
            if let Some(hash) = dest_tx_hash {
                row.dest_tx_hash = Some(hash.to_string());
            }
            row.error_message = None;
            true
        })?;
        Ok(())
    }

    async fn mark_failed(&self, id: i64, error: &str) -> Result<()> {
        self.wait_if_stalled().await;
        self.update(id, |row| {
            if !row.status.can_transition_to(BridgeStatus::Failed) {
                return false;
            }
            row.status = BridgeStatus::Failed;
            row.error_message = Some(error.to_string());
            true
        })?;
        Ok(())
    }

    async fn requeue(&self, id: i64) -> Result<bool> {
        self.update(id, |row| {
            if row.status != BridgeStatus::Failed {
                return false;
            }
            row.status = BridgeStatus::Initiated;
            row.attempts = 0;
            row.error_message = None;
            true
        })
    }

    async fn stale_initiated(
        &self,
        chain: Chain,
        older_than: Duration,
    ) -> Result<Vec<BridgeTransaction>> {
        self.check_ledger()?;
        let cutoff = Utc::now() - chrono::Duration::from_std(older_than)?;
        let state = self.state.lock().unwrap();
        let mut rows: Vec<_> = state
            .rows
            .iter()
            .filter(|row| {
                row.source_chain == chain
                    && row.status == BridgeStatus::Initiated
                    && (row.attempts == 0 || row.updated_at < cutoff)
            })
            .cloned()
            .collect();
        rows.sort_by_key(|row| (row.block_number, row.log_index));
        Ok(rows)
    }

    async fn pending_for_user(&self, user: &str) -> Result<PendingSummary> {
        self.check_ledger()?;
        let user = normalize_address(user);
        let mut transactions: Vec<_> = self
            .history_for_user(&user)
            .await?
            .into_iter()
            .filter(|row| row.claim_tx_hash.is_none())
            .collect();
        transactions.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));

        let mut claimable = U256::ZERO;
        for row in transactions
            .iter()
            .filter(|row| row.status == BridgeStatus::Relayed)
        {
            claimable += row.amount.parse::<U256>()?;
        }

        Ok(PendingSummary {
            claimable_amount: claimable.to_string(),
            transactions,
        })
    }

    async fn history_for_user(&self, user: &str) -> Result<Vec<BridgeTransaction>> {
        self.check_ledger()?;
        let user = normalize_address(user);
        let state = self.state.lock().unwrap();
        let mut rows: Vec<_> = state
            .rows
            .iter()
            .filter(|row| row.user_address == user)
            .cloned()
            .collect();
        rows.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        Ok(rows)
    }

    async fn record_claim(&self, user: &str, ids: &[i64], claim_tx_hash: &str) -> Result<u64> {
        self.check_ledger()?;
        let user = normalize_address(user);
        let mut state = self.state.lock().unwrap();
        let mut claimed = 0;
        for row in state.rows.iter_mut().filter(|row| {
            row.user_address == user
                && ids.contains(&row.id)
                && row.status == BridgeStatus::Relayed
                && row.claim_tx_hash.is_none()
        }) {
            row.claim_tx_hash = Some(claim_tx_hash.to_lowercase());
            row.updated_at = Utc::now();
            claimed += 1;
        }
        Ok(claimed)
    }

    async fn count_by_status(&self) -> Result<StatusCounts> {
        self.check_ledger()?;
        let state = self.state.lock().unwrap();
        let mut counts = StatusCounts::default();
        for row in &state.rows {
            match row.status {
                BridgeStatus::Initiated => counts.initiated += 1,
                BridgeStatus::Relayed => counts.relayed += 1,
                BridgeStatus::Failed => counts.failed += 1,
            }
        }
        Ok(counts)
    }
}

// ============================================================================
// MockAdapter
// ============================================================================

#[derive(Default)]
struct MockState {
    head: u64,
    head_failures: u32,
    head_delay: Option<Duration>,
    head_calls: Vec<Instant>,
    logs: Vec<Log>,
    fetch_failures: u32,
    fetched: Vec<(u64, u64)>,
    scripted: VecDeque<Result<String, SubmissionError>>,
    submitted: Vec<BridgeEvent>,
}

/// Scripted chain: a fixed head, a set of logs and queued submission results.
/// Unscripted submissions succeed with a synthetic tx hash.
pub struct MockAdapter {
    chain: Chain,
    state: Mutex<MockState>,
    heads_in_flight: AtomicUsize,
    max_heads_in_flight: AtomicUsize,
}

impl MockAdapter {
    pub fn new(chain: Chain) -> Self {
        Self {
            chain,
            state: Mutex::new(MockState::default()),
            heads_in_flight: AtomicUsize::new(0),
            max_heads_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn set_head(&self, head: u64) {
        self.state.lock().unwrap().head = head;
    }

    pub fn push_log(&self, log: Log) {
        self.state.lock().unwrap().logs.push(log);
    }

    pub fn push_event(&self, event: &BridgeEvent) {
        self.push_log(log_for(event));
    }

    /// Make every `latest_block` call take `delay`
    pub fn set_head_delay(&self, delay: Duration) {
        self.state.lock().unwrap().head_delay = Some(delay);
    }

    /// When each `latest_block` call started
    pub fn head_calls(&self) -> Vec<Instant> {
        self.state.lock().unwrap().head_calls.clone()
    }

    /// Most `latest_block` calls ever running at once
    pub fn max_concurrent_heads(&self) -> usize {
        self.max_heads_in_flight.load(Ordering::SeqCst)
    }

    pub fn fail_next_head(&self, count: u32) {
        self.state.lock().unwrap().head_failures = count;
    }

    pub fn fail_next_fetches(&self, count: u32) {
        self.state.lock().unwrap().fetch_failures = count;
    }

    pub fn push_submission(&self, result: Result<String, SubmissionError>) {
        self.state.lock().unwrap().scripted.push_back(result);
    }

    /// Number of `submit_mirrored` calls so far
    pub fn submissions(&self) -> usize {
        self.state.lock().unwrap().submitted.len()
    }

    pub fn submitted(&self) -> Vec<BridgeEvent> {
        self.state.lock().unwrap().submitted.clone()
    }

    pub fn fetched_ranges(&self) -> Vec<(u64, u64)> {
        self.state.lock().unwrap().fetched.clone()
    }
}

#[async_trait]
impl ChainAdapter for MockAdapter {
    fn chain(&self) -> Chain {
        self.chain
    }

    async fn latest_block(&self) -> Result<u64, RpcError> {
        let delay = {
            let mut state = self.state.lock().unwrap();
            state.head_calls.push(Instant::now());
            state.head_delay
        };
        let running = self.heads_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_heads_in_flight.fetch_max(running, Ordering::SeqCst);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.heads_in_flight.fetch_sub(1, Ordering::SeqCst);

        let mut state = self.state.lock().unwrap();
        if state.head_failures > 0 {
            state.head_failures -= 1;
            return Err(RpcError::Call {
                chain: self.chain,
                call: "eth_blockNumber",
                message: "connection refused".to_string(),
            });
        }
        Ok(state.head)
    }

    async fn fetch_logs(&self, from_block: u64, to_block: u64) -> Result<Vec<Log>, RpcError> {
        let mut state = self.state.lock().unwrap();
        state.fetched.push((from_block, to_block));
        if state.fetch_failures > 0 {
            state.fetch_failures -= 1;
            return Err(RpcError::Call {
                chain: self.chain,
                call: "eth_getLogs",
                message: "query returned more than 10000 results".to_string(),
            });
        }
        let mut logs: Vec<Log> = state
            .logs
            .iter()
            .filter(|log| {
                log.block_number
                    .is_some_and(|block| block >= from_block && block <= to_block)
            })
            .cloned()
            .collect();
        logs.sort_by_key(|log| (log.block_number, log.log_index));
        Ok(logs)
    }

    async fn submit_mirrored(&self, event: &BridgeEvent) -> Result<String, SubmissionError> {
        let mut state = self.state.lock().unwrap();
        state.submitted.push(event.clone());
        let count = state.submitted.len();
        state
            .scripted
            .pop_front()
            .unwrap_or_else(|| Ok(format!("0x{:064x}", count)))
    }
}
