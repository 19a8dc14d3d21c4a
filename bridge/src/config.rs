// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::eth_client::LightClientConfig;
use crate::networks::NetworkConfiguration;
use anyhow::{anyhow, Context};
use ethers::types::{Address as EthAddress, U256};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use tfchain_bridge_config::Config;

/// Light client data lives in this subdirectory of the bridge data dir.
pub const ETH_DATA_DIR: &str = "eth";

// 0.1 TFT
const DEFAULT_MINIMUM_TRANSACTION_FEE: u64 = 100_000_000;

fn default_minimum_transaction_fee() -> u64 {
    DEFAULT_MINIMUM_TRANSACTION_FEE
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct BridgeNodeConfig {
    // Validate coin creations against the foreign chain. When false nothing
    // foreign-chain related is started and every coin creation is accepted.
    pub enabled: bool,
    // Also run the coordinator, minting and redeeming on behalf of users.
    // Needs a signing account.
    #[serde(default)]
    pub run_bridge: bool,
    pub data_dir: PathBuf,
    // One of the names in the network table, e.g. "ropsten".
    pub eth_network: String,
    // Port of the local light node session.
    pub eth_port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eth_bootnodes: Option<Vec<String>>,
    // Overrides the contract address of the network table.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eth_contract_address: Option<String>,
    // Keystore file to import into the light client keystore.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_json: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_password: Option<String>,
    // First foreign block scanned for withdraw events.
    #[serde(default)]
    pub withdraw_start_height: u64,
    // Fee, in home units, paid by the coin creations the bridge submits.
    #[serde(default = "default_minimum_transaction_fee")]
    pub minimum_transaction_fee: u64,
}

impl Config for BridgeNodeConfig {}

/// Validated and resolved node configuration.
#[derive(Clone, Debug)]
pub struct BridgeServerConfig {
    pub network: NetworkConfiguration,
    pub light_client: LightClientConfig,
    pub run_bridge: bool,
    pub persist_dir: PathBuf,
    // contents of the key file, not its path
    pub account_json: Option<String>,
    pub account_password: String,
    pub withdraw_start_height: u64,
    pub minimum_transaction_fee: U256,
}

impl BridgeNodeConfig {
    pub fn validate(&self) -> anyhow::Result<BridgeServerConfig> {
        if self.run_bridge && !self.enabled {
            return Err(anyhow!("run-bridge requires the bridge to be enabled"));
        }
        let mut network = NetworkConfiguration::for_name(&self.eth_network)?;
        if let Some(bootnodes) = &self.eth_bootnodes {
            network = network.with_bootnodes(bootnodes.clone());
        }
        if let Some(address) = &self.eth_contract_address {
            let address = EthAddress::from_str(address)
                .map_err(|e| anyhow!("invalid eth-contract-address {}: {:?}", address, e))?;
            network = network.with_contract_address(address);
        }

        let account_json = self
            .account_json
            .as_ref()
            .map(|path| {
                std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read account json {}", path.display()))
            })
            .transpose()?;

        let light_client = LightClientConfig::from_network(
            &network,
            self.eth_port,
            self.data_dir.join(ETH_DATA_DIR),
        );
        light_client.validate()?;

        Ok(BridgeServerConfig {
            network,
            light_client,
            run_bridge: self.run_bridge,
            persist_dir: self.data_dir.clone(),
            account_json,
            account_password: self.account_password.clone().unwrap_or_default(),
            withdraw_start_height: self.withdraw_start_height,
            minimum_transaction_fee: U256::from(self.minimum_transaction_fee),
        })
    }
}
