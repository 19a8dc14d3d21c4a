// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Static table of supported foreign networks.

use crate::error::{BridgeError, BridgeResult};
use ethers::types::{Address as EthAddress, H256};
use std::str::FromStr;

struct NetworkEntry {
    network_id: u64,
    name: &'static str,
    genesis_hash: &'static str,
    contract_address: &'static str,
    bootnodes: &'static [&'static str],
}

const MAINNET_BOOTNODES: &[&str] = &[
    "enode://a979fb575495b8d6db44f750317d0f4622bf4c2aa3365d6af7c284339968eef29b69ad0dce72a4d8db5ebb4968de0e3bec910127f134779fbcb0cb6d3331163c@52.16.188.185:30303",
    "enode://3f1d12044546b76342d59d4a05532c14b85aa669704bfe1f864fe079415aa2c02d743e03218e57a33fb94523adb54032871a6c51b2cc5514cb7c7e35b3ed0a99@13.93.211.84:30303",
    "enode://78de8a0916848093c73790ead81d1928bec737d565119932b98c6b100d944b7a95e94f847f689fc723399d2e31129d182f7ef3863f2b4c820abbf3ab2722344d@191.235.84.50:30303",
    "enode://158f8aab45f6d19c6cbf4a089c2670541a8da11978a2f90dbf6a502a4a3bab80d288afdbeb7ec0ef6d92de563767f3b1ea9e8e334ca711e9f8e2df5a0385e8e6@13.75.154.138:30303",
];

const ROPSTEN_BOOTNODES: &[&str] = &[
    "enode://30b7ab30a01c124a6cceca36863ece12c4f5fa68e3ba9b0b51407ccc002eeed3b3102d20a88f1c1d3c3154e2449317b8ef95090e77b312d5cc39354f86d5d606@52.176.7.10:30303",
    "enode://865a63255b3bb68023b6bffd5095118fcc13e79dcf014fe4e47e065c350c7cc72af2e53eff895f11ba1bbb6a2b33271c1116ee870f266618eadfc2e78aa7349c@52.176.100.77:30303",
];

const RINKEBY_BOOTNODES: &[&str] = &[
    "enode://a24ac7c5484ef4ed0c5eb2d36620ba4e4aa13b8c84684e1b4aab0cebea2ae45cb4d375b77eab56516d34bfbd3c1a833fc51296ff084b770b94fb9028c4d25ccf@52.169.42.101:30303",
    "enode://343149e4feefa15d882d9fe4ac7d88f885bd05ebb735e547f12e12080a9fa07c8014ca6fd7f373123488102fe5e34111f8509cf0b7de3f5b44339c9f25e87cb8@52.3.158.184:30303",
    "enode://b6b28890b006743680c52e64e0d16db57f28124885595fa03a562be1d2bf0f3a1da297d56b13da25fb992888fd556d4c1a27b1f39d531bde7de1921c90061cc6@159.89.28.211:30303",
];

const NETWORKS: &[NetworkEntry] = &[
    NetworkEntry {
        network_id: 1,
        name: "main",
        genesis_hash: "0xd4e56740f876aef8c010b86a40d5f56745a118d0906a34e69aec8c0db1cb8fa3",
        contract_address: "0x21826CC49B92029553af86F4e7A62C427E61e53a",
        bootnodes: MAINNET_BOOTNODES,
    },
    NetworkEntry {
        network_id: 3,
        name: "ropsten",
        genesis_hash: "0x41941023680923e0fe4d74a34bdac8141f2540e3ae90623718e47d66d1ca4a2d",
        contract_address: "0xb821227dBa4Ef9585D31aa494406FD5E47a3db37",
        bootnodes: ROPSTEN_BOOTNODES,
    },
    NetworkEntry {
        network_id: 4,
        name: "rinkeby",
        genesis_hash: "0x6341fd3daf94b748c72ced5a5b26028f2474f5f00d824504e4fa37a75767e177",
        contract_address: "0x3bb58ffA340861b2Bac19c8b18262375F68c0AA5",
        bootnodes: RINKEBY_BOOTNODES,
    },
];

/// Network-specific configuration needed by the bridge. Built once at
/// startup and handed to the light client and the bridge contract.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NetworkConfiguration {
    pub network_id: u64,
    pub network_name: String,
    pub genesis_hash: H256,
    pub contract_address: EthAddress,
    pub bootnodes: Vec<String>,
}

impl NetworkConfiguration {
    pub fn for_name(name: &str) -> BridgeResult<Self> {
        let entry = NETWORKS
            .iter()
            .find(|n| n.name == name)
            .ok_or_else(|| BridgeError::UnsupportedNetwork(name.to_string()))?;
        let genesis_hash = H256::from_str(entry.genesis_hash).map_err(|e| {
            BridgeError::InternalError(format!("bad genesis hash for {}: {}", name, e))
        })?;
        let contract_address = EthAddress::from_str(entry.contract_address).map_err(|e| {
            BridgeError::InternalError(format!("bad contract address for {}: {}", name, e))
        })?;
        Ok(Self {
            network_id: entry.network_id,
            network_name: entry.name.to_string(),
            genesis_hash,
            contract_address,
            bootnodes: entry.bootnodes.iter().map(|b| b.to_string()).collect(),
        })
    }

    pub fn supported_networks() -> Vec<&'static str> {
        NETWORKS.iter().map(|n| n.name).collect()
    }

    /// Replaces the bootstrap nodes, e.g. for nodes behind a firewall.
    pub fn with_bootnodes(mut self, bootnodes: Vec<String>) -> Self {
        self.bootnodes = bootnodes;
        self
    }

    pub fn with_contract_address(mut self, contract_address: EthAddress) -> Self {
        self.contract_address = contract_address;
        self
    }
}
