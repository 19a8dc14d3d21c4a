// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::bridge_contract::{BridgeContract, BridgeContractApi};
use crate::config::BridgeNodeConfig;
use crate::coordinator::{Bridge, BridgeHandle, ConsensusSet, Erc20Registry, TransactionPool};
use crate::eth_client::LightClient;
use crate::metrics::BridgeMetrics;
use crate::persist::PersistenceStore;
use crate::validator::{
    Erc20NodeValidator, Erc20TransactionValidator, NopErc20TransactionValidator,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Home-chain services the bridge plugs into.
#[derive(Clone)]
pub struct HomeChain {
    pub consensus: Arc<dyn ConsensusSet>,
    pub tpool: Arc<dyn TransactionPool>,
    pub registry: Arc<dyn Erc20Registry>,
}

pub struct BridgeNode {
    /// Consulted by home-chain transaction validation.
    pub validator: Arc<dyn Erc20TransactionValidator>,
    pub node_validator: Option<Arc<Erc20NodeValidator>>,
    contract: Option<Arc<dyn BridgeContractApi>>,
    bridge: Option<BridgeHandle>,
}

impl BridgeNode {
    fn disabled() -> Self {
        Self {
            validator: Arc::new(NopErc20TransactionValidator),
            node_validator: None,
            contract: None,
            bridge: None,
        }
    }

    pub fn bridge(&self) -> Option<&BridgeHandle> {
        self.bridge.as_ref()
    }

    pub async fn close(self) {
        match (self.bridge, self.contract) {
            (Some(bridge), _) => bridge.close().await,
            (None, Some(contract)) => contract.close(),
            (None, None) => {}
        }
    }
}

/// Starts the foreign-chain side of a home-chain node. Returns once the
/// light client is synced and, with `run-bridge`, the coordinator is
/// subscribed to the consensus set.
pub async fn run_bridge_node(
    config: BridgeNodeConfig,
    home: HomeChain,
    prometheus_registry: &prometheus::Registry,
    cancel: CancellationToken,
) -> anyhow::Result<BridgeNode> {
    if !config.enabled {
        tracing::info!("[Bridge] Bridge disabled, accepting all coin creations");
        return Ok(BridgeNode::disabled());
    }
    let server_config = config.validate()?;
    let metrics = Arc::new(BridgeMetrics::new(prometheus_registry));
    tracing::info!(
        "[Bridge] Connecting to {} light node on port {}",
        server_config.network.network_name,
        server_config.light_client.port
    );

    let light_client = Arc::new(
        LightClient::connect(
            server_config.light_client.clone(),
            metrics.clone(),
            cancel.clone(),
        )
        .await
        .map_err(|e| anyhow::anyhow!("Failed to start light client: {}", e))?,
    );
    if server_config.run_bridge {
        light_client
            .initialize_keystore(
                server_config.account_json.as_deref(),
                &server_config.account_password,
            )
            .await
            .map_err(|e| anyhow::anyhow!("Failed to load bridge account: {}", e))?;
    }

    let contract = Arc::new(BridgeContract::new(
        server_config.network.clone(),
        light_client.clone(),
        metrics.clone(),
    ));
    let node_validator = Arc::new(Erc20NodeValidator::new(
        contract.clone(),
        light_client.clone(),
        metrics.clone(),
    ));

    let bridge = if server_config.run_bridge {
        let bridge = Arc::new(Bridge::new(
            home.consensus,
            home.tpool,
            home.registry,
            contract.clone(),
            PersistenceStore::new(&server_config.persist_dir),
            server_config.minimum_transaction_fee,
            metrics.clone(),
        )?);
        Some(
            bridge
                .start(server_config.withdraw_start_height, cancel.child_token())
                .await?,
        )
    } else {
        None
    };

    Ok(BridgeNode {
        validator: node_validator.clone(),
        node_validator: Some(node_validator),
        contract: Some(contract),
        bridge,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{MockConsensusSet, MockErc20Registry, MockTransactionPool};
    use ethers::types::{Address as EthAddress, H256, U256};
    use std::path::PathBuf;

    fn home_chain() -> HomeChain {
        HomeChain {
            consensus: Arc::new(MockConsensusSet::default()),
            tpool: Arc::new(MockTransactionPool::default()),
            registry: Arc::new(MockErc20Registry::default()),
        }
    }

    fn config(enabled: bool) -> BridgeNodeConfig {
        BridgeNodeConfig {
            enabled,
            run_bridge: false,
            data_dir: PathBuf::from("/tmp/bridge"),
            eth_network: "ropsten".into(),
            eth_port: 3003,
            eth_bootnodes: None,
            eth_contract_address: None,
            account_json: None,
            account_password: None,
            withdraw_start_height: 0,
            minimum_transaction_fee: 100_000_000,
        }
    }

    #[tokio::test]
    async fn test_disabled_node_accepts_everything_without_light_client() {
        let registry = prometheus::Registry::new();
        let node = run_bridge_node(config(false), home_chain(), &registry, CancellationToken::new())
            .await
            .unwrap();
        assert!(node.node_validator.is_none());
        assert!(node.bridge().is_none());
        node.validator
            .validate_withdraw_tx(H256::zero(), H256::zero(), EthAddress::zero(), U256::one())
            .await
            .unwrap();
        assert_eq!(node.validator.get_status().await.unwrap(), None);
        // no metrics registered when nothing runs
        assert!(registry.gather().is_empty());
        node.close().await;
    }

    #[tokio::test]
    async fn test_invalid_config_aborts_startup() {
        let mut config = config(true);
        config.eth_network = "kovan".into();
        let err = run_bridge_node(
            config,
            home_chain(),
            &prometheus::Registry::new(),
            CancellationToken::new(),
        )
        .await
        .err()
        .unwrap();
        assert_eq!(err.to_string(), "Ethereum network kovan not supported");
    }
}
