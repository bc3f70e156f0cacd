// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::abi::PortalKind;
use crate::indexer::IndexerSettings;
use crate::relay::{RelaySettings, SimulationFailurePolicy};
use anyhow::{anyhow, Context};
use ethers::signers::LocalWallet;
use ethers::types::Address;
use portal_operator_config::Config;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};
use std::collections::HashSet;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;
use url::Url;

/// Largest power of ten that fits in a `U256`
const MAX_DECIMALS: u8 = 77;

#[serde_as]
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct OperatorNodeConfig {
    // File holding the hex encoded secp256k1 key of the operator
    pub operator_key_path: PathBuf,
    // The port the metrics server listens on, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics_port: Option<u16>,
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(rename = "poll-interval-secs", default = "default_poll_interval")]
    pub poll_interval: Duration,
    // Trailing window of blocks scanned for escrows
    #[serde(default = "default_lookback_blocks")]
    pub lookback_blocks: u64,
    #[serde(default = "default_max_block_range")]
    pub max_block_range: u64,
    #[serde(default = "default_finality_depth")]
    pub finality_depth: u64,
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(
        rename = "max-retry-duration-secs",
        default = "default_max_retry_duration"
    )]
    pub max_retry_duration: Duration,
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(
        rename = "confirmation-timeout-secs",
        default = "default_confirmation_timeout"
    )]
    pub confirmation_timeout: Duration,
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(
        rename = "settlement-timeout-secs",
        default = "default_settlement_timeout"
    )]
    pub settlement_timeout: Duration,
    #[serde(default)]
    pub simulation_failure_policy: SimulationFailurePolicy,
    // Checkpoints stay in memory when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint_dir: Option<PathBuf>,
    pub chains: Vec<ChainSettings>,
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_lookback_blocks() -> u64 {
    50_000
}

fn default_max_block_range() -> u64 {
    3_500
}

fn default_finality_depth() -> u64 {
    16
}

fn default_max_retry_duration() -> Duration {
    Duration::from_secs(10)
}

fn default_confirmation_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_settlement_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_num_confirmations() -> u64 {
    1
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ChainSettings {
    pub chain_id: u64,
    pub name: String,
    pub rpc_url: String,
    pub portal_address: Address,
    #[serde(default)]
    pub portal_kind: PortalKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forwarder_address: Option<Address>,
    #[serde(default = "default_num_confirmations")]
    pub num_confirmations: u64,
    // Mainnet-class chains only execute escrows from other mainnet-class chains
    #[serde(default)]
    pub mainnet: bool,
    #[serde(default)]
    pub eip1559: bool,
    // Currencies accepted as payment when this chain is the origin
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accepted_usd: Option<AcceptedCurrency>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accepted_voucher: Option<AcceptedCurrency>,
    // Contracts that may be called when this chain is the destination
    #[serde(default)]
    pub name_service: NameServiceSettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct AcceptedCurrency {
    pub address: Address,
    pub decimals: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct NameServiceSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolver: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reverse_registrar: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_registrar: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registrar_controller: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voucher_registrar: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator_owned_controller: Option<Address>,
}

impl Config for OperatorNodeConfig {}

impl OperatorNodeConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        info!("Starting config validation");
        if self.chains.is_empty() {
            return Err(anyhow!("At least one chain must be configured"));
        }
        if self.max_block_range == 0 {
            return Err(anyhow!("max-block-range must be greater than zero"));
        }

        let mut chain_ids = HashSet::new();
        for chain in &self.chains {
            if !chain_ids.insert(chain.chain_id) {
                return Err(anyhow!("Duplicate chain id {}", chain.chain_id));
            }
            Url::parse(&chain.rpc_url)
                .with_context(|| format!("[{}] Invalid rpc-url {}", chain.name, chain.rpc_url))?;
            for currency in [&chain.accepted_usd, &chain.accepted_voucher]
                .into_iter()
                .flatten()
            {
                if currency.decimals > MAX_DECIMALS {
                    return Err(anyhow!(
                        "[{}] Currency {:?} has {} decimals, at most {} are supported",
                        chain.name,
                        currency.address,
                        currency.decimals,
                        MAX_DECIMALS
                    ));
                }
            }
        }
        info!("Config validation complete");
        Ok(())
    }

    pub fn indexer_settings(&self) -> IndexerSettings {
        IndexerSettings {
            max_block_range: self.max_block_range,
            finality_depth: self.finality_depth,
            max_retry_duration: self.max_retry_duration,
        }
    }

    pub fn relay_settings(&self) -> RelaySettings {
        RelaySettings {
            confirmation_timeout: self.confirmation_timeout,
            settlement_timeout: self.settlement_timeout,
            simulation_failure_policy: self.simulation_failure_policy,
        }
    }

    pub fn load_operator_wallet(&self) -> anyhow::Result<LocalWallet> {
        let content = std::fs::read_to_string(&self.operator_key_path).with_context(|| {
            format!(
                "Failed to read operator key from {}",
                self.operator_key_path.display()
            )
        })?;
        let key = content.trim();
        LocalWallet::from_str(key.strip_prefix("0x").unwrap_or(key)).map_err(|e| {
            anyhow!(
                "Invalid operator key in {}: {:?}",
                self.operator_key_path.display(),
                e
            )
        })
    }
}
