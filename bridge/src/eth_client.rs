// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Client of the local foreign-chain light node.
//!
//! The light node syncs headers and fetches block data on demand from its
//! peers. The bridge talks to it over a websocket session and keeps the
//! signing account (if any) in process.

use crate::error::{BridgeError, BridgeResult};
use crate::metered_eth_provider::{connect_metered_ws, MeteredEthProvider};
use crate::metrics::BridgeMetrics;
use crate::networks::NetworkConfiguration;
use async_trait::async_trait;
use ethers::providers::{JsonRpcClient, Middleware, Provider, Ws};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{
    Address as EthAddress, BlockId, BlockNumber, Bytes, SyncingStatus,
    Transaction as EthTransaction, TxHash, H256, U256,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tap::TapFallible;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

/// Interval between two sync checks while waiting for the light node.
pub const SYNC_POLL_INTERVAL: Duration = Duration::from_secs(10);

const KEYSTORE_DIR: &str = "keys";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LightClientConfig {
    pub port: u16,
    pub data_dir: PathBuf,
    pub bootstrap_nodes: Vec<String>,
    pub network_name: String,
    pub network_id: u64,
    pub genesis_hash: Option<H256>,
}

impl LightClientConfig {
    pub fn from_network(network: &NetworkConfiguration, port: u16, data_dir: PathBuf) -> Self {
        Self {
            port,
            data_dir,
            bootstrap_nodes: network.bootnodes.clone(),
            network_name: network.network_name.clone(),
            network_id: network.network_id,
            genesis_hash: Some(network.genesis_hash),
        }
    }

    /// Every field is required, there are no defaults.
    pub fn validate(&self) -> BridgeResult<()> {
        let missing = if self.port == 0 {
            Some("port")
        } else if self.data_dir.as_os_str().is_empty() {
            Some("data directory")
        } else if self.bootstrap_nodes.is_empty() {
            Some("bootstrap nodes")
        } else if self.network_name.is_empty() {
            Some("network name")
        } else if self.network_id == 0 {
            Some("network ID")
        } else if self.genesis_hash.is_none() {
            Some("genesis block")
        } else {
            None
        };
        match missing {
            Some(field) => Err(BridgeError::InvalidConfig(format!(
                "invalid LightClientConfig: no {} defined",
                field
            ))),
            None => Ok(()),
        }
    }

    pub fn keystore_dir(&self) -> PathBuf {
        self.data_dir.join(KEYSTORE_DIR)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct SyncStatus {
    pub starting_block: u64,
    pub current_block: u64,
    pub highest_block: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct BalanceInfo {
    pub address: EthAddress,
    pub balance: U256,
}

/// Read-side view of the foreign chain used by the coordinator and the
/// withdrawal validator.
#[async_trait]
pub trait ForeignChainClient: Send + Sync {
    /// Returns the transaction and its confirmation count.
    async fn fetch_transaction(
        &self,
        block_hash: H256,
        tx_hash: TxHash,
    ) -> BridgeResult<(EthTransaction, u64)>;

    async fn is_synced(&self) -> BridgeResult<bool>;

    async fn get_status(&self) -> BridgeResult<SyncStatus>;

    async fn get_balance_info(&self) -> BridgeResult<BalanceInfo>;
}

pub struct LightClient<P> {
    provider: Arc<Provider<P>>,
    config: LightClientConfig,
    account: RwLock<Option<LocalWallet>>,
    cancel: CancellationToken,
}

impl LightClient<MeteredEthProvider<Ws>> {
    /// Opens the session to the light node on `config.port` and blocks until
    /// the node caught up with the chain head, or `cancel` fires.
    pub async fn connect(
        config: LightClientConfig,
        metrics: Arc<BridgeMetrics>,
        cancel: CancellationToken,
    ) -> BridgeResult<Self> {
        config.validate()?;
        let provider = connect_metered_ws(config.port, metrics)
            .await
            .map_err(|e| {
                BridgeError::ProviderError(format!(
                    "failed to connect to light node on port {}: {:?}",
                    config.port, e
                ))
            })?;
        let client = Self::new(provider, config, cancel)?;
        client.start().await?;
        Ok(client)
    }
}

impl<P> LightClient<P>
where
    P: JsonRpcClient + 'static,
{
    pub fn new(
        provider: Provider<P>,
        config: LightClientConfig,
        cancel: CancellationToken,
    ) -> BridgeResult<Self> {
        config.validate()?;
        Ok(Self {
            provider: Arc::new(provider),
            config,
            account: RwLock::new(None),
            cancel: cancel.child_token(),
        })
    }

    pub fn provider(&self) -> Arc<Provider<P>> {
        self.provider.clone()
    }

    pub fn config(&self) -> &LightClientConfig {
        &self.config
    }

    /// Token cancelled by [`LightClient::close`]. Long-running tasks bound
    /// to this session stop when it fires.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Joins the bootstrap peers, checks the node is on the configured
    /// network and waits for the initial sync.
    pub async fn start(&self) -> BridgeResult<()> {
        for enode in &self.config.bootstrap_nodes {
            // a single unreachable bootnode is not fatal
            if let Err(e) = self.provider.add_peer(enode.clone()).await {
                tracing::warn!("[LightClient] Failed to add bootnode {}: {:?}", enode, e);
            }
        }
        self.verify_chain_identity().await?;
        tracing::info!(
            "[LightClient] Connected to {} (network id {}), waiting for sync",
            self.config.network_name,
            self.config.network_id
        );
        self.wait_for_sync(&self.cancel).await
    }

    async fn verify_chain_identity(&self) -> BridgeResult<()> {
        let net_version = self.provider.get_net_version().await?;
        if net_version != self.config.network_id.to_string() {
            return Err(BridgeError::InvalidConfig(format!(
                "light node is on network {}, expected {}",
                net_version, self.config.network_id
            )));
        }
        let genesis = self
            .provider
            .get_block(BlockNumber::Earliest)
            .await?
            .ok_or_else(|| BridgeError::ProviderError("light node has no genesis block".into()))?;
        if genesis.hash != self.config.genesis_hash {
            return Err(BridgeError::InvalidConfig(format!(
                "light node genesis {:?} does not match {} genesis {:?}",
                genesis.hash, self.config.network_name, self.config.genesis_hash
            )));
        }
        Ok(())
    }

    pub async fn wait_for_sync(&self, cancel: &CancellationToken) -> BridgeResult<()> {
        wait_until_synced(self, cancel).await
    }

    pub async fn get_chain_height(&self) -> BridgeResult<u64> {
        Ok(self.provider.get_block_number().await?.as_u64())
    }

    /// Imports `key_json` into the keystore directory and unlocks it.
    pub async fn load_account(&self, key_json: &str, passphrase: &str) -> BridgeResult<()> {
        let dir = self.config.keystore_dir();
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(keystore_file_name(key_json)?);
        std::fs::write(&path, key_json)?;
        self.unlock(&path, passphrase).await
    }

    /// Unlocks the signing account. Imports `account_json` when given,
    /// otherwise uses the first key already in the keystore, otherwise
    /// creates a new one.
    pub async fn initialize_keystore(
        &self,
        account_json: Option<&str>,
        passphrase: &str,
    ) -> BridgeResult<()> {
        if let Some(key_json) = account_json {
            return self.load_account(key_json, passphrase).await;
        }
        let dir = self.config.keystore_dir();
        std::fs::create_dir_all(&dir)?;
        if let Some(path) = first_key_file(&dir)? {
            return self.unlock(&path, passphrase).await;
        }
        let (wallet, id) =
            LocalWallet::new_keystore(&dir, &mut rand::thread_rng(), passphrase, None)?;
        tracing::info!(
            "[LightClient] Created new account {:?} in keystore ({})",
            wallet.address(),
            id
        );
        self.set_account(wallet).await;
        Ok(())
    }

    async fn unlock(&self, path: &Path, passphrase: &str) -> BridgeResult<()> {
        let wallet = LocalWallet::decrypt_keystore(path, passphrase).tap_err(|e| {
            tracing::error!("[LightClient] Failed to unlock {}: {:?}", path.display(), e)
        })?;
        self.set_account(wallet).await;
        Ok(())
    }

    async fn set_account(&self, wallet: LocalWallet) {
        let wallet = wallet.with_chain_id(self.config.network_id);
        tracing::info!("[LightClient] Loaded account {:?}", wallet.address());
        *self.account.write().await = Some(wallet);
    }

    pub async fn account_address(&self) -> BridgeResult<EthAddress> {
        self.account
            .read()
            .await
            .as_ref()
            .map(|w| w.address())
            .ok_or(BridgeError::NoAccountLoaded)
    }

    pub async fn account_balance_at(&self, height: u64) -> BridgeResult<U256> {
        let address = self.account_address().await?;
        let block = BlockId::Number(BlockNumber::Number(height.into()));
        Ok(self.provider.get_balance(address, Some(block)).await?)
    }

    /// Signs `tx` with the loaded account, replay-protected for `chain_id`,
    /// and returns the raw signed transaction.
    pub async fn sign_transaction(
        &self,
        tx: &TypedTransaction,
        chain_id: u64,
    ) -> BridgeResult<Bytes> {
        let account = self.account.read().await;
        let wallet = account.as_ref().ok_or(BridgeError::NoAccountLoaded)?;
        if let Some(from) = tx.from() {
            if *from != wallet.address() {
                return Err(BridgeError::SigningError(format!(
                    "not authorized to sign for {:?}",
                    from
                )));
            }
        }
        let wallet = wallet.clone().with_chain_id(chain_id);
        let mut tx = tx.clone();
        tx.set_chain_id(chain_id);
        let signature = wallet.sign_transaction(&tx).await?;
        Ok(tx.rlp_signed(&signature))
    }

    /// Tears down the session. Must be called once.
    pub fn close(&self) {
        tracing::info!("[LightClient] Closing light client session");
        self.cancel.cancel();
    }
}

#[async_trait]
impl<P> ForeignChainClient for LightClient<P>
where
    P: JsonRpcClient + 'static,
{
    async fn fetch_transaction(
        &self,
        block_hash: H256,
        tx_hash: TxHash,
    ) -> BridgeResult<(EthTransaction, u64)> {
        let block = self
            .provider
            .get_block_with_txs(block_hash)
            .await?
            .ok_or(BridgeError::TxNotFound)?;
        let block_height = block
            .number
            .ok_or_else(|| {
                BridgeError::ProviderError("light node returned a pending block".into())
            })?
            .as_u64();
        let chain_height = self.get_chain_height().await?;
        if block_height > chain_height {
            return Err(BridgeError::TxBlockAheadOfChain {
                tx: tx_hash,
                block_height,
                chain_height,
            });
        }
        let tx = block
            .transactions
            .into_iter()
            .find(|tx| tx.hash == tx_hash)
            .ok_or(BridgeError::TxNotFound)?;
        Ok((tx, chain_height - block_height + 1))
    }

    async fn is_synced(&self) -> BridgeResult<bool> {
        match self.provider.syncing().await? {
            SyncingStatus::IsSyncing(_) => Ok(false),
            // a node without peers is not syncing either, but still at genesis
            SyncingStatus::IsFalse => Ok(self.get_chain_height().await? > 0),
        }
    }

    async fn get_status(&self) -> BridgeResult<SyncStatus> {
        match self.provider.syncing().await? {
            SyncingStatus::IsSyncing(progress) => {
                let current_block = progress.current_block.as_u64();
                Ok(SyncStatus {
                    starting_block: progress.starting_block.as_u64(),
                    current_block,
                    highest_block: current_block.max(progress.highest_block.as_u64()),
                })
            }
            SyncingStatus::IsFalse => {
                let height = self.get_chain_height().await?;
                Ok(SyncStatus {
                    starting_block: height,
                    current_block: height,
                    highest_block: height,
                })
            }
        }
    }

    async fn get_balance_info(&self) -> BridgeResult<BalanceInfo> {
        let address = self.account_address().await?;
        let balance = self.provider.get_balance(address, None).await?;
        Ok(BalanceInfo { address, balance })
    }
}

/// Polls `client` every [`SYNC_POLL_INTERVAL`] until it reports it caught up
/// with the chain.
pub async fn wait_until_synced(
    client: &dyn ForeignChainClient,
    cancel: &CancellationToken,
) -> BridgeResult<()> {
    loop {
        match client.is_synced().await {
            Ok(true) => {
                tracing::info!("[LightClient] Light node is synced");
                return Ok(());
            }
            Ok(false) => tracing::debug!("[LightClient] Light node still syncing"),
            Err(e) => tracing::warn!("[LightClient] Failed to query sync status: {:?}", e),
        }
        tokio::select! {
            _ = cancel.cancelled() => return Err(BridgeError::SyncCancelled),
            _ = tokio::time::sleep(SYNC_POLL_INTERVAL) => {}
        }
    }
}

// Keystore files are named after the account address when the key json
// carries one.
fn keystore_file_name(key_json: &str) -> BridgeResult<String> {
    let value: serde_json::Value = serde_json::from_str(key_json)
        .map_err(|e| BridgeError::InvalidConfig(format!("invalid account json: {}", e)))?;
    let name = value
        .get("address")
        .and_then(|a| a.as_str())
        .map(|a| a.trim_start_matches("0x").to_lowercase())
        .unwrap_or_else(|| "account".to_string());
    Ok(format!("{}.json", name))
}

fn first_key_file(dir: &Path) -> BridgeResult<Option<PathBuf>> {
    let mut files = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file())
        .collect::<Vec<_>>();
    files.sort();
    Ok(files.into_iter().next())
}

#[cfg(test)]
impl LightClient<crate::eth_mock_provider::EthMockProvider> {
    pub fn new_mocked(
        provider: crate::eth_mock_provider::EthMockProvider,
        config: LightClientConfig,
    ) -> Self {
        Self::new(Provider::new(provider), config, CancellationToken::new())
            .expect("valid mocked config")
    }
}
