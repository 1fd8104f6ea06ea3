//! EVM adapter - reads bridge logs and submits mirrored calls
//!
//! One instance per leg. Reads go through a plain HTTP provider; writes build a
//! signing provider per submission and take their nonce from `NonceManager`.

use alloy::network::EthereumWallet;
use alloy::primitives::Address;
use alloy::providers::{Provider, ProviderBuilder, RootProvider};
use alloy::rpc::types::{Filter, Log};
use alloy::signers::local::PrivateKeySigner;
use alloy::transports::http::{Client, Http};
use async_trait::async_trait;
use eyre::{eyre, Result, WrapErr};
use std::str::FromStr;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::{ChainAdapter, NonceManager};
use crate::config::{ChainConfig, Config, RelayerConfig};
use crate::contracts::mirror_bridge::MirrorBridge;
use crate::error::{RpcError, SubmissionError};
use crate::types::{hex_b256, BridgeEvent, Chain, EventKind};

pub struct EvmAdapter {
    chain: Chain,
    rpc_url: String,
    provider: RootProvider<Http<Client>>,
    bridge_address: Address,
    signer: PrivateKeySigner,
    nonces: NonceManager,
    rpc_timeout: Duration,
    receipt_timeout: Duration,
}

impl EvmAdapter {
    pub fn new(chain_config: &ChainConfig, relayer: &RelayerConfig) -> Result<Self> {
        let chain = chain_config.chain;
        let url = chain_config
            .rpc_url
            .parse()
            .wrap_err_with(|| format!("Failed to parse {} RPC URL", chain))?;
        let provider = ProviderBuilder::new().on_http(url);

        let bridge_address = Address::from_str(&chain_config.bridge_address)
            .wrap_err_with(|| format!("Invalid {} bridge address", chain))?;

        let signer: PrivateKeySigner = relayer
            .private_key
            .parse()
            .map_err(|_| eyre!("Invalid relayer private key"))?;

        info!(
            chain = %chain,
            relayer_address = %signer.address(),
            bridge_address = %bridge_address,
            "EVM adapter initialized"
        );

        Ok(Self {
            chain,
            rpc_url: chain_config.rpc_url.clone(),
            provider,
            bridge_address,
            nonces: NonceManager::new(chain, signer.address()),
            signer,
            rpc_timeout: relayer.rpc_timeout(),
            receipt_timeout: relayer.receipt_timeout(),
        })
    }

    pub fn eth(config: &Config) -> Result<Self> {
        Self::new(config.chain(Chain::Eth), &config.relayer)
    }

    pub fn base(config: &Config) -> Result<Self> {
        Self::new(config.chain(Chain::Base), &config.relayer)
    }

    pub fn relayer_address(&self) -> Address {
        self.signer.address()
    }

    fn rpc_error(&self, call: &'static str, err: impl std::fmt::Display) -> RpcError {
        RpcError::Call {
            chain: self.chain,
            call,
            message: err.to_string(),
        }
    }

    fn rpc_timeout_error(&self, call: &'static str) -> RpcError {
        RpcError::Timeout {
            chain: self.chain,
            call,
            timeout: self.rpc_timeout,
        }
    }
}

#[async_trait]
impl ChainAdapter for EvmAdapter {
    fn chain(&self) -> Chain {
        self.chain
    }

    async fn latest_block(&self) -> Result<u64, RpcError> {
        timeout(self.rpc_timeout, self.provider.get_block_number())
            .await
            .map_err(|_| self.rpc_timeout_error("eth_blockNumber"))?
            .map_err(|e| self.rpc_error("eth_blockNumber", e))
    }

    async fn fetch_logs(&self, from_block: u64, to_block: u64) -> Result<Vec<Log>, RpcError> {
        let filter = Filter::new()
            .address(self.bridge_address)
            .event_signature(self.chain.source_event().topic())
            .from_block(from_block)
            .to_block(to_block);

        let mut logs = timeout(self.rpc_timeout, self.provider.get_logs(&filter))
            .await
            .map_err(|_| self.rpc_timeout_error("eth_getLogs"))?
            .map_err(|e| self.rpc_error("eth_getLogs", e))?;

        logs.sort_by_key(|log| (log.block_number, log.log_index));

        debug!(
            chain = %self.chain,
            from_block,
            to_block,
            count = logs.len(),
            "Fetched bridge logs"
        );
        Ok(logs)
    }

    async fn submit_mirrored(&self, event: &BridgeEvent) -> Result<String, SubmissionError> {
        if event.dest_chain() != self.chain {
            return Err(SubmissionError::fatal(format!(
                "{} event routed to the {} adapter",
                event.source_chain, self.chain
            )));
        }

        let url = self
            .rpc_url
            .parse()
            .map_err(|e| SubmissionError::fatal(format!("Invalid RPC URL: {}", e)))?;
        let wallet = EthereumWallet::from(self.signer.clone());
        let provider = ProviderBuilder::new()
            .with_recommended_fillers()
            .wallet(wallet)
            .on_http(url);
        let contract = MirrorBridge::new(self.bridge_address, &provider);
        let signer_address = self.signer.address();
        let rpc_timeout = self.rpc_timeout;

        let provider_ref = &provider;
        let contract_ref = &contract;
        let pending = self
            .nonces
            .allocate(
                || async move {
                    timeout(
                        rpc_timeout,
                        provider_ref.get_transaction_count(signer_address).pending(),
                    )
                    .await
                    .map_err(|_| SubmissionError::retryable("nonce lookup timed out"))?
                    .map_err(|e| SubmissionError::classify(format!("nonce lookup failed: {}", e), None))
                },
                |nonce| async move {
                    debug!(
                        user = %event.user,
                        amount = %event.amount,
                        bridge_nonce = %event.nonce,
                        account_nonce = nonce,
                        "Submitting {}",
                        event.kind.mirror_entrypoint()
                    );
                    let sent = match event.kind {
                        EventKind::Deposit => {
                            timeout(
                                rpc_timeout,
                                contract_ref
                                    .lockedOnOppositeChain(event.user, event.amount, event.nonce)
                                    .nonce(nonce)
                                    .send(),
                            )
                            .await
                        }
                        EventKind::Burn => {
                            timeout(
                                rpc_timeout,
                                contract_ref
                                    .burnedOnOppositeChain(event.user, event.amount, event.nonce)
                                    .nonce(nonce)
                                    .send(),
                            )
                            .await
                        }
                    };
                    sent.map_err(|_| SubmissionError::retryable("broadcast timed out"))?
                        .map_err(|e| SubmissionError::classify(e.to_string(), None))
                },
            )
            .await?;

        let tx_hash = hex_b256(pending.tx_hash());
        info!(chain = %self.chain, tx_hash = %tx_hash, "Transaction sent, waiting for confirmation");

        let receipt = match timeout(self.receipt_timeout, pending.get_receipt()).await {
            Ok(Ok(receipt)) => receipt,
            Ok(Err(e)) => {
                return Err(SubmissionError::classify(
                    format!("Failed to get receipt: {}", e),
                    Some(tx_hash),
                ))
            }
            Err(_) => {
                let mut err = SubmissionError::retryable(format!(
                    "no receipt after {:?}",
                    self.receipt_timeout
                ));
                err.tx_hash = Some(tx_hash);
                return Err(err);
            }
        };

        if receipt.status() {
            return Ok(tx_hash);
        }

        // Replay the call to recover the revert reason
        let simulated = match event.kind {
            EventKind::Deposit => contract
                .lockedOnOppositeChain(event.user, event.amount, event.nonce)
                .from(signer_address)
                .call()
                .await
                .map(|_| ()),
            EventKind::Burn => contract
                .burnedOnOppositeChain(event.user, event.amount, event.nonce)
                .from(signer_address)
                .call()
                .await
                .map(|_| ()),
        };

        match simulated {
            Err(e) => {
                warn!(chain = %self.chain, tx_hash = %tx_hash, error = %e, "Transaction reverted");
                Err(SubmissionError::classify(
                    format!("transaction {} reverted: {}", tx_hash, e),
                    Some(tx_hash),
                ))
            }
            Ok(()) => {
                let mut err = SubmissionError::retryable(format!(
                    "transaction {} failed on-chain but the call now succeeds",
                    tx_hash
                ));
                err.tx_hash = Some(tx_hash);
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CheckpointSeed;

    // Anvil's first default account
    const TEST_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    fn relayer_config(key: &str) -> RelayerConfig {
        RelayerConfig {
            private_key: key.to_string(),
            poll_interval_secs: 5,
            max_block_window: 10,
            confirmation_depth: 3,
            checkpoint_seed: CheckpointSeed::Latest,
            rpc_timeout_secs: 15,
            receipt_timeout_secs: 120,
            max_relay_attempts: 5,
            requeue_grace_secs: 60,
        }
    }

    fn chain_config(chain: Chain, address: &str) -> ChainConfig {
        ChainConfig {
            chain,
            rpc_url: "http://localhost:8545".to_string(),
            bridge_address: address.to_string(),
        }
    }

    #[test]
    fn test_new_adapter() {
        let adapter = EvmAdapter::new(
            &chain_config(Chain::Base, "0x5FbDB2315678afecb367f032d93F642f64180aa3"),
            &relayer_config(TEST_KEY),
        )
        .unwrap();
        assert_eq!(adapter.chain(), Chain::Base);
        assert_eq!(
            adapter.relayer_address(),
            Address::from_str("0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266").unwrap()
        );
    }

    #[test]
    fn test_rejects_bad_inputs() {
        assert!(EvmAdapter::new(
            &chain_config(Chain::Eth, "not-an-address"),
            &relayer_config(TEST_KEY)
        )
        .is_err());
        assert!(EvmAdapter::new(
            &chain_config(Chain::Eth, "0x5FbDB2315678afecb367f032d93F642f64180aa3"),
            &relayer_config("0x1234")
        )
        .is_err());
    }
}
