//! Common types shared by the watchers, the dispatcher and the stores.

use alloy::primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Chains and event kinds
// ============================================================================

/// One leg of the bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum Chain {
    Eth,
    Base,
}

impl Chain {
    pub const ALL: [Chain; 2] = [Chain::Eth, Chain::Base];

    /// The chain events from this chain are mirrored onto
    pub fn opposite(&self) -> Chain {
        match self {
            Chain::Eth => Chain::Base,
            Chain::Base => Chain::Eth,
        }
    }

    /// The event the bridge contract on this chain emits for outbound transfers
    pub fn source_event(&self) -> EventKind {
        match self {
            Chain::Eth => EventKind::Deposit,
            Chain::Base => EventKind::Burn,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Chain::Eth => "ETH",
            Chain::Base => "BASE",
        }
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Chain {
    type Err = eyre::Report;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "ETH" | "ETHEREUM" => Ok(Chain::Eth),
            "BASE" => Ok(Chain::Base),
            other => Err(eyre::eyre!("Unknown chain: {}", other)),
        }
    }
}

/// Source-side bridge event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// Funds locked on the source chain, to be minted on the opposite chain
    Deposit,
    /// Wrapped funds burned, to be unlocked on the opposite chain
    Burn,
}

impl EventKind {
    pub fn signature(&self) -> &'static str {
        match self {
            EventKind::Deposit => "Deposit(address,uint256,uint256)",
            EventKind::Burn => "Burn(address,uint256,uint256)",
        }
    }

    pub fn topic(&self) -> B256 {
        alloy::primitives::keccak256(self.signature().as_bytes())
    }

    /// Destination-chain entrypoint that mirrors this event
    pub fn mirror_entrypoint(&self) -> &'static str {
        match self {
            EventKind::Deposit => "lockedOnOppositeChain",
            EventKind::Burn => "burnedOnOppositeChain",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Deposit => "deposit",
            EventKind::Burn => "burn",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Ledger status
// ============================================================================

/// Lifecycle of a ledger row
///
/// `Initiated` is written when an event is first seen (or re-entered by a
/// retry), `Relayed` once the destination call confirmed, `Failed` when the
/// submission errored. Nothing leaves `Relayed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum BridgeStatus {
    Initiated,
    Relayed,
    Failed,
}

impl BridgeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BridgeStatus::Initiated => "initiated",
            BridgeStatus::Relayed => "relayed",
            BridgeStatus::Failed => "failed",
        }
    }

    pub fn can_transition_to(&self, next: BridgeStatus) -> bool {
        !matches!((self, next), (BridgeStatus::Relayed, _))
    }
}

impl fmt::Display for BridgeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Decoded events
// ============================================================================

/// A decoded Deposit/Burn log, consumed by the dispatcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeEvent {
    pub source_chain: Chain,
    pub kind: EventKind,
    pub source_tx_hash: B256,
    pub log_index: u64,
    pub block_number: u64,
    pub user: Address,
    pub amount: U256,
    pub nonce: U256,
}

impl BridgeEvent {
    pub fn dest_chain(&self) -> Chain {
        self.source_chain.opposite()
    }

    pub fn key(&self) -> IdempotencyKey {
        IdempotencyKey {
            source_chain: self.source_chain,
            source_tx_hash: hex_b256(&self.source_tx_hash),
            log_index: self.log_index as i64,
        }
    }
}

/// `(source_chain, source_tx_hash, log_index)`; at most one effective relay per key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdempotencyKey {
    pub source_chain: Chain,
    pub source_tx_hash: String,
    pub log_index: i64,
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}#{}", self.source_chain, self.source_tx_hash, self.log_index)
    }
}

/// Lowercase 0x-prefixed hash, the form stored in the ledger
pub fn hex_b256(hash: &B256) -> String {
    format!("0x{:x}", hash)
}

/// Lowercase 0x-prefixed address, the form stored in the ledger
pub fn hex_address(address: &Address) -> String {
    format!("0x{:x}", address)
}
