//! Per-chain progress tracking
//!
//! The checkpoint is the last block whose events have all been resolved.
//! It only moves forward; restarting the process resumes at `checkpoint + 1`.

use async_trait::async_trait;
use eyre::Result;

use crate::config::CheckpointSeed;
use crate::types::Chain;

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Last processed block, or `None` before the first poll
    async fn get(&self, chain: Chain) -> Result<Option<u64>>;

    /// Create the checkpoint at `initial` if absent; returns the stored value
    async fn get_or_init(&self, chain: Chain, initial: u64) -> Result<u64>;

    /// Move the checkpoint to `block`. No-op (returns false) if `block <= current`.
    async fn advance(&self, chain: Chain, block: u64) -> Result<bool>;
}

/// Initial checkpoint for a chain without one, given the current safe head
pub fn seed_block(seed: CheckpointSeed, safe_head: u64) -> u64 {
    match seed {
        CheckpointSeed::Zero => 0,
        CheckpointSeed::Latest => safe_head,
        CheckpointSeed::Block(block) => block,
    }
}
