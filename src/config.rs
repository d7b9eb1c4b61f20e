//! Node configuration.
//!
//! Every field has a default, so a config file only needs the values it
//! changes. Command-line flags are applied on top of the loaded file.

use crate::core::ledger::LedgerRules;
use crate::core::proposer::ChainParams;
use crate::types::address::Address;
use crate::utils::log::Level;
use serde::{Deserialize, Serialize};
use stakechain_derive::Error;
use std::path::{Path, PathBuf};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("cannot parse config: {0}")]
    Parse(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Directory holding the snapshot, node key and lock file.
    pub data_dir: PathBuf,
    pub listen_addr: String,
    pub peers: Vec<String>,
    pub block_time_ms: u64,
    pub slot_safety_margin_ms: u64,
    pub min_stake: u64,
    pub ibd_window_ms: u64,
    pub batch_size: usize,
    pub min_transaction_fee: u64,
    pub identity_fee: u64,
    pub master_address: Address,
    pub log_level: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            listen_addr: "127.0.0.1:3000".to_string(),
            peers: Vec::new(),
            block_time_ms: 10_000,
            slot_safety_margin_ms: 1_000,
            min_stake: 0,
            ibd_window_ms: 5_000,
            batch_size: 10,
            min_transaction_fee: 1,
            identity_fee: 10,
            master_address: Address::new("master"),
            log_level: "info".to_string(),
        }
    }
}

/// `~/.stakechain`, or `.stakechain` in the working directory without a home.
pub fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".stakechain"))
        .unwrap_or_else(|| PathBuf::from(".stakechain"))
}

impl NodeConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let data = std::fs::read(path)?;
        let config: NodeConfig =
            serde_json::from_slice(&data).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.block_time_ms == 0 {
            return Err(ConfigError::Invalid("block_time_ms must be positive".into()));
        }
        if self.slot_safety_margin_ms >= self.block_time_ms {
            return Err(ConfigError::Invalid(format!(
                "slot_safety_margin_ms ({}) must be below block_time_ms ({})",
                self.slot_safety_margin_ms, self.block_time_ms
            )));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid("batch_size must be positive".into()));
        }
        self.log_level
            .parse::<Level>()
            .map_err(|_| ConfigError::Invalid(format!("unknown log level {}", self.log_level)))?;
        Ok(())
    }

    pub fn level(&self) -> Level {
        self.log_level.parse().unwrap_or(Level::Info)
    }

    pub fn chain_params(&self) -> ChainParams {
        ChainParams {
            block_time_ms: self.block_time_ms,
            slot_safety_margin_ms: self.slot_safety_margin_ms,
            min_stake: self.min_stake,
        }
    }

    pub fn ledger_rules(&self) -> LedgerRules {
        LedgerRules {
            master_address: self.master_address.clone(),
            identity_fee: self.identity_fee,
        }
    }
}
