use eyre::{eyre, Result, WrapErr};
use std::env;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::types::Chain;

/// Main configuration for the relayer
#[derive(Debug, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub eth: ChainConfig,
    pub base: ChainConfig,
    pub relayer: RelayerConfig,
    pub api: ApiConfig,
}

/// Database configuration
#[derive(Clone)]
pub struct DatabaseConfig {
    pub url: String,
}

/// Custom Debug that redacts the database URL (may contain credentials).
impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("url", &"<redacted>")
            .finish()
    }
}

/// Per-chain RPC and contract configuration
#[derive(Debug, Clone)]
pub struct ChainConfig {
    pub chain: Chain,
    pub rpc_url: String,
    pub bridge_address: String,
}

/// Where a chain's checkpoint starts when no row exists yet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointSeed {
    /// Start from genesis and replay the whole backlog
    Zero,
    /// Skip the backlog and start at the current safe head
    Latest,
    /// Start right after a fixed block
    Block(u64),
}

impl FromStr for CheckpointSeed {
    type Err = eyre::Report;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "zero" | "genesis" | "0" => Ok(CheckpointSeed::Zero),
            "latest" | "head" => Ok(CheckpointSeed::Latest),
            other => other
                .parse::<u64>()
                .map(CheckpointSeed::Block)
                .map_err(|_| eyre!("Invalid checkpoint seed: {}", other)),
        }
    }
}

/// Relay engine configuration
#[derive(Clone)]
pub struct RelayerConfig {
    pub private_key: String,
    pub poll_interval_secs: u64,
    pub max_block_window: u64,
    pub confirmation_depth: u64,
    pub checkpoint_seed: CheckpointSeed,
    pub rpc_timeout_secs: u64,
    pub receipt_timeout_secs: u64,
    pub max_relay_attempts: u32,
    pub requeue_grace_secs: u64,
}

/// Custom Debug that redacts private_key to prevent accidental log leakage.
impl fmt::Debug for RelayerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayerConfig")
            .field("private_key", &"<redacted>")
            .field("poll_interval_secs", &self.poll_interval_secs)
            .field("max_block_window", &self.max_block_window)
            .field("confirmation_depth", &self.confirmation_depth)
            .field("checkpoint_seed", &self.checkpoint_seed)
            .field("rpc_timeout_secs", &self.rpc_timeout_secs)
            .field("receipt_timeout_secs", &self.receipt_timeout_secs)
            .field("max_relay_attempts", &self.max_relay_attempts)
            .field("requeue_grace_secs", &self.requeue_grace_secs)
            .finish()
    }
}

impl RelayerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_secs)
    }

    pub fn receipt_timeout(&self) -> Duration {
        Duration::from_secs(self.receipt_timeout_secs)
    }

    pub fn requeue_grace(&self) -> Duration {
        Duration::from_secs(self.requeue_grace_secs)
    }

    /// Bound on one whole submission: nonce lookup, broadcast and receipt wait
    pub fn submit_timeout(&self) -> Duration {
        self.rpc_timeout() * 2 + self.receipt_timeout()
    }
}

/// Health/metrics server configuration
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub port: u16,
}

/// Default functions
fn default_poll_interval() -> u64 {
    5
}

fn default_max_block_window() -> u64 {
    10
}

fn default_confirmation_depth() -> u64 {
    3
}

fn default_rpc_timeout() -> u64 {
    15
}

fn default_receipt_timeout() -> u64 {
    120
}

fn default_max_relay_attempts() -> u32 {
    5
}

fn default_requeue_grace() -> u64 {
    60
}

fn default_api_port() -> u16 {
    9090
}

fn required(name: &str) -> Result<String> {
    env::var(name).map_err(|_| eyre!("{} environment variable is required", name))
}

/// Parse an optional variable; unset falls back to `default`, malformed is an error
fn parsed_or<T: FromStr>(name: &str, default: T) -> Result<T> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| eyre!("{} has an invalid value: {:?}", name, raw)),
        Err(_) => Ok(default),
    }
}

impl Config {
    /// Load configuration from environment variables
    /// Loads .env file if present, then reads from environment
    pub fn load() -> Result<Self> {
        Self::load_from_file(".env")
    }

    /// Load from a specific .env file path
    pub fn load_from_file(path: &str) -> Result<Self> {
        if Path::new(path).exists() {
            dotenvy::from_filename(path)
                .wrap_err_with(|| format!("Failed to load .env file from {}", path))?;
        }
        Self::load_from_env()
    }

    /// Load configuration from environment variables
    pub fn load_from_env() -> Result<Self> {
        let database = DatabaseConfig {
            url: required("DATABASE_URL")?,
        };

        let eth = ChainConfig {
            chain: Chain::Eth,
            rpc_url: required("ETH_RPC_URL")?,
            bridge_address: required("ETH_BRIDGE_CONTRACT_ADDRESS")?,
        };

        let base = ChainConfig {
            chain: Chain::Base,
            rpc_url: required("BASE_RPC_URL")?,
            bridge_address: required("BASE_BRIDGE_CONTRACT_ADDRESS")?,
        };

        let checkpoint_seed = match env::var("CHECKPOINT_SEED") {
            Ok(raw) => raw.parse().wrap_err("CHECKPOINT_SEED must be latest, zero or a block number")?,
            Err(_) => CheckpointSeed::Latest,
        };

        let relayer = RelayerConfig {
            private_key: required("RELAYER_PRIVATE_KEY")?,
            poll_interval_secs: parsed_or("POLL_INTERVAL_SECONDS", default_poll_interval())?,
            max_block_window: parsed_or("MAX_BLOCK_WINDOW", default_max_block_window())?,
            confirmation_depth: parsed_or("CONFIRMATION_DEPTH", default_confirmation_depth())?,
            checkpoint_seed,
            rpc_timeout_secs: parsed_or("RPC_TIMEOUT_SECONDS", default_rpc_timeout())?,
            receipt_timeout_secs: parsed_or("RECEIPT_TIMEOUT_SECONDS", default_receipt_timeout())?,
            max_relay_attempts: parsed_or("MAX_RELAY_ATTEMPTS", default_max_relay_attempts())?,
            requeue_grace_secs: parsed_or("REQUEUE_GRACE_SECONDS", default_requeue_grace())?,
        };

        let api = ApiConfig {
            port: parsed_or("API_PORT", default_api_port())?,
        };

        let config = Config {
            database,
            eth,
            base,
            relayer,
            api,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn chain(&self, chain: Chain) -> &ChainConfig {
        match chain {
            Chain::Eth => &self.eth,
            Chain::Base => &self.base,
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.database.url.is_empty() {
            return Err(eyre!("database.url cannot be empty"));
        }

        for chain in [&self.eth, &self.base] {
            if chain.rpc_url.is_empty() {
                return Err(eyre!("{} rpc_url cannot be empty", chain.chain));
            }
            if !is_hex_of_len(&chain.bridge_address, 40) {
                return Err(eyre!(
                    "{} bridge address must be a valid hex address (42 chars with 0x prefix)",
                    chain.chain
                ));
            }
        }

        if !is_hex_of_len(&self.relayer.private_key, 64) {
            return Err(eyre!(
                "relayer private key must be 66 chars (0x + 64 hex chars)"
            ));
        }

        if self.relayer.poll_interval_secs == 0 {
            return Err(eyre!("poll interval must be at least 1 second"));
        }

        if self.relayer.max_block_window == 0 {
            return Err(eyre!("max block window must be at least 1"));
        }

        if self.relayer.max_relay_attempts == 0 {
            return Err(eyre!("max relay attempts must be at least 1"));
        }

        Ok(())
    }
}

fn is_hex_of_len(value: &str, hex_len: usize) -> bool {
    value
        .strip_prefix("0x")
        .is_some_and(|h| h.len() == hex_len && h.chars().all(|c| c.is_ascii_hexdigit()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn test_config() -> Config {
        Config {
            database: DatabaseConfig {
                url: "postgres://localhost/test".to_string(),
            },
            eth: ChainConfig {
                chain: Chain::Eth,
                rpc_url: "http://localhost:8545".to_string(),
                bridge_address: "0x0000000000000000000000000000000000000001".to_string(),
            },
            base: ChainConfig {
                chain: Chain::Base,
                rpc_url: "http://localhost:8546".to_string(),
                bridge_address: "0x0000000000000000000000000000000000000002".to_string(),
            },
            relayer: RelayerConfig {
                private_key: "0x0000000000000000000000000000000000000000000000000000000000000001"
                    .to_string(),
                poll_interval_secs: 5,
                max_block_window: 10,
                confirmation_depth: 3,
                checkpoint_seed: CheckpointSeed::Latest,
                rpc_timeout_secs: 15,
                receipt_timeout_secs: 120,
                max_relay_attempts: 5,
                requeue_grace_secs: 60,
            },
            api: ApiConfig { port: 9090 },
        }
    }

    const ENV_VARS: [&str; 15] = [
        "DATABASE_URL",
        "ETH_RPC_URL",
        "ETH_BRIDGE_CONTRACT_ADDRESS",
        "BASE_RPC_URL",
        "BASE_BRIDGE_CONTRACT_ADDRESS",
        "RELAYER_PRIVATE_KEY",
        "POLL_INTERVAL_SECONDS",
        "MAX_BLOCK_WINDOW",
        "CONFIRMATION_DEPTH",
        "CHECKPOINT_SEED",
        "RPC_TIMEOUT_SECONDS",
        "RECEIPT_TIMEOUT_SECONDS",
        "MAX_RELAY_ATTEMPTS",
        "REQUEUE_GRACE_SECONDS",
        "API_PORT",
    ];

    fn set_required_env() {
        for var in ENV_VARS {
            env::remove_var(var);
        }
        env::set_var("DATABASE_URL", "postgres://localhost/relayer");
        env::set_var("ETH_RPC_URL", "http://localhost:8545");
        env::set_var(
            "ETH_BRIDGE_CONTRACT_ADDRESS",
            "0x00000000000000000000000000000000000000e1",
        );
        env::set_var("BASE_RPC_URL", "http://localhost:8546");
        env::set_var(
            "BASE_BRIDGE_CONTRACT_ADDRESS",
            "0x00000000000000000000000000000000000000b1",
        );
        env::set_var(
            "RELAYER_PRIVATE_KEY",
            "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80",
        );
    }

    #[test]
    fn test_defaults() {
        assert_eq!(default_poll_interval(), 5);
        assert_eq!(default_max_block_window(), 10);
        assert_eq!(default_confirmation_depth(), 3);
        assert_eq!(default_max_relay_attempts(), 5);
    }

    #[test]
    fn test_checkpoint_seed_parse() {
        assert_eq!("latest".parse::<CheckpointSeed>().unwrap(), CheckpointSeed::Latest);
        assert_eq!("ZERO".parse::<CheckpointSeed>().unwrap(), CheckpointSeed::Zero);
        assert_eq!(
            "1234".parse::<CheckpointSeed>().unwrap(),
            CheckpointSeed::Block(1234)
        );
        assert!("tomorrow".parse::<CheckpointSeed>().is_err());
    }

    #[test]
    fn test_validation() {
        let mut config = test_config();
        assert!(config.validate().is_ok());

        config.relayer.private_key = "0x123".to_string();
        assert!(config.validate().is_err());

        config = test_config();
        config.base.bridge_address = "invalid".to_string();
        assert!(config.validate().is_err());

        config = test_config();
        config.relayer.max_block_window = 0;
        assert!(config.validate().is_err());

        config = test_config();
        config.relayer.poll_interval_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let config = test_config();
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("postgres://"));
        assert!(!rendered.contains(&config.relayer.private_key));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    #[serial]
    fn test_load_from_env_defaults() {
        set_required_env();
        let config = Config::load_from_env().unwrap();
        assert_eq!(config.relayer.poll_interval_secs, 5);
        assert_eq!(config.relayer.max_block_window, 10);
        assert_eq!(config.relayer.confirmation_depth, 3);
        assert_eq!(config.relayer.checkpoint_seed, CheckpointSeed::Latest);
        assert_eq!(config.api.port, 9090);
        assert_eq!(config.chain(Chain::Base).rpc_url, "http://localhost:8546");
    }

    #[test]
    #[serial]
    fn test_load_from_env_overrides() {
        set_required_env();
        env::set_var("MAX_BLOCK_WINDOW", "25");
        env::set_var("CONFIRMATION_DEPTH", "0");
        env::set_var("CHECKPOINT_SEED", "zero");
        let config = Config::load_from_env().unwrap();
        assert_eq!(config.relayer.max_block_window, 25);
        assert_eq!(config.relayer.confirmation_depth, 0);
        assert_eq!(config.relayer.checkpoint_seed, CheckpointSeed::Zero);
        env::remove_var("MAX_BLOCK_WINDOW");
        env::remove_var("CONFIRMATION_DEPTH");
        env::remove_var("CHECKPOINT_SEED");
    }

    #[test]
    #[serial]
    fn test_load_from_env_missing_required() {
        set_required_env();
        env::remove_var("RELAYER_PRIVATE_KEY");
        let err = Config::load_from_env().unwrap_err();
        assert!(err.to_string().contains("RELAYER_PRIVATE_KEY"));
    }

    #[test]
    #[serial]
    fn test_load_from_env_rejects_malformed_numbers() {
        set_required_env();
        env::set_var("MAX_BLOCK_WINDOW", "abc");
        let err = Config::load_from_env().unwrap_err();
        assert!(err.to_string().contains("MAX_BLOCK_WINDOW"));
        env::remove_var("MAX_BLOCK_WINDOW");

        env::set_var("API_PORT", "70000");
        let err = Config::load_from_env().unwrap_err();
        assert!(err.to_string().contains("API_PORT"));
        env::remove_var("API_PORT");

        env::set_var("POLL_INTERVAL_SECONDS", " 7 ");
        assert_eq!(Config::load_from_env().unwrap().relayer.poll_interval_secs, 7);
        env::remove_var("POLL_INTERVAL_SECONDS");
    }
}
