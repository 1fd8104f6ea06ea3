//! Chain access behind a single capability set
//!
//! The watcher and dispatcher only talk to `ChainAdapter`; the ETH and BASE
//! legs differ solely in how their adapter is constructed.

use alloy::primitives::{Address, U256};
use alloy::rpc::types::Log;
use async_trait::async_trait;

use crate::error::{DecodeError, RpcError, SubmissionError};
use crate::types::{hex_b256, BridgeEvent, Chain};

pub mod evm;
pub mod nonce;

pub use evm::EvmAdapter;
pub use nonce::NonceManager;

#[async_trait]
pub trait ChainAdapter: Send + Sync {
    fn chain(&self) -> Chain;

    /// Current chain head (not adjusted for confirmation depth)
    async fn latest_block(&self) -> Result<u64, RpcError>;

    /// Bridge logs in `[from_block, to_block]`, ordered by (block, log index)
    async fn fetch_logs(&self, from_block: u64, to_block: u64) -> Result<Vec<Log>, RpcError>;

    fn decode(&self, log: &Log) -> Result<BridgeEvent, DecodeError> {
        decode_bridge_log(self.chain(), log)
    }

    /// Mirror `event` on this chain and wait for the receipt; returns the tx hash
    async fn submit_mirrored(&self, event: &BridgeEvent) -> Result<String, SubmissionError>;
}

/// Decode a `Deposit`/`Burn` log emitted on `chain`
///
/// Layout: topics = [signature, user], data = amount (32 bytes) || nonce (32 bytes)
pub fn decode_bridge_log(chain: Chain, log: &Log) -> Result<BridgeEvent, DecodeError> {
    let fail = |reason: String| DecodeError {
        chain,
        tx_hash: log
            .transaction_hash
            .map(|h| hex_b256(&h))
            .unwrap_or_else(|| "unknown".to_string()),
        log_index: log
            .log_index
            .map(|i| i.to_string())
            .unwrap_or_else(|| "unknown".to_string()),
        reason,
    };

    if log.removed {
        return Err(fail("log was removed by a reorganization".to_string()));
    }

    let kind = chain.source_event();
    let topics = log.topics();
    match topics.first() {
        Some(topic) if *topic == kind.topic() => {}
        Some(topic) => return Err(fail(format!("unexpected topic {}", topic))),
        None => return Err(fail("log has no topics".to_string())),
    }
    if topics.len() != 2 {
        return Err(fail(format!("expected 2 topics, got {}", topics.len())));
    }

    let user_word = topics[1];
    if user_word[..12].iter().any(|b| *b != 0) {
        return Err(fail("indexed user is not a padded address".to_string()));
    }
    let user = Address::from_word(user_word);

    let data = log.data().data.as_ref();
    if data.len() != 64 {
        return Err(fail(format!("expected 64 data bytes, got {}", data.len())));
    }
    let amount = U256::from_be_slice(&data[0..32]);
    let nonce = U256::from_be_slice(&data[32..64]);

    let source_tx_hash = log
        .transaction_hash
        .ok_or_else(|| fail("missing transaction hash".to_string()))?;
    let block_number = log
        .block_number
        .ok_or_else(|| fail("missing block number".to_string()))?;
    let log_index = log
        .log_index
        .ok_or_else(|| fail("missing log index".to_string()))?;

    Ok(BridgeEvent {
        source_chain: chain,
        kind,
        source_tx_hash,
        log_index,
        block_number,
        user,
        amount,
        nonce,
    })
}
