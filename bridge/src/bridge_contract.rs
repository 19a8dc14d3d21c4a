// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Typed binding of the TTFT20 token contract on top of the light client.

use crate::abi::{
    decode_live_log, MintFilter, RegisterWithdrawalAddressFilter, TransferFilter, TTFT20,
};
use crate::denomination::{denominate, FOREIGN_DECIMALS};
use crate::error::{BridgeError, BridgeResult};
use crate::eth_client::{ForeignChainClient, LightClient};
use crate::metrics::BridgeMetrics;
use crate::networks::NetworkConfiguration;
use crate::types::{Erc20Address, WithdrawEvent};
use async_trait::async_trait;
use ethers::providers::{JsonRpcClient, Middleware, PubsubClient};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{
    Block, BlockNumber, Filter, Log, Transaction as EthTransaction, TxHash, H256, U256,
};
use futures::{Stream, StreamExt};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::{RwLock, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Upper bound of every contract call and cache refresh.
pub const CALL_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeadInfo {
    pub number: u64,
    pub hash: H256,
}

/// Best effort view of the chain head and the bridge account, refreshed on
/// new heads.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ContractStats {
    pub head: Option<HeadInfo>,
    pub balance: Option<U256>,
    pub gas_price: Option<U256>,
    // next nonce after the last transaction this bridge sent
    pub nonce: Option<U256>,
}

/// Published by the contract watchers to the withdraw consumer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ContractEvent {
    Withdraw(WithdrawEvent),
    NewHead(u64),
}

/// What the coordinator and the validator need from the foreign chain.
#[async_trait]
pub trait BridgeContractApi: Send + Sync {
    async fn mint(
        &self,
        receiver: Erc20Address,
        amount: Option<U256>,
        txid: &str,
    ) -> BridgeResult<TxHash>;

    async fn register_withdrawal_address(&self, address: Erc20Address) -> BridgeResult<TxHash>;

    /// Whether a mint for home transaction `txid` already happened.
    async fn is_mint_tx_id(&self, txid: &str) -> BridgeResult<bool>;

    async fn is_withdrawal_address(&self, address: Erc20Address) -> BridgeResult<bool>;

    async fn get_past_withdraws(
        &self,
        start_height: u64,
        end_height: Option<u64>,
    ) -> BridgeResult<Vec<WithdrawEvent>>;

    async fn fetch_transaction(
        &self,
        block_hash: H256,
        tx_hash: TxHash,
    ) -> BridgeResult<(EthTransaction, u64)>;

    /// Spawns the head loop and one task per event subscription. New head
    /// numbers and withdraw events from `start_height` on are published to
    /// `sink`.
    fn start_watchers(
        self: Arc<Self>,
        sink: UnboundedSender<ContractEvent>,
        start_height: u64,
    ) -> Vec<JoinHandle<()>>;

    /// Tears down the light client session, stopping every watcher.
    fn close(&self);
}

pub struct BridgeContract<P> {
    network: NetworkConfiguration,
    light_client: Arc<LightClient<P>>,
    contract: TTFT20<ethers::providers::Provider<P>>,
    stats: Arc<RwLock<ContractStats>>,
    // a single refresh in flight at any time
    refresh_slot: Arc<Semaphore>,
    metrics: Arc<BridgeMetrics>,
}

impl<P> BridgeContract<P>
where
    P: JsonRpcClient + 'static,
{
    pub fn new(
        network: NetworkConfiguration,
        light_client: Arc<LightClient<P>>,
        metrics: Arc<BridgeMetrics>,
    ) -> Self {
        let contract = TTFT20::new(network.contract_address, light_client.provider());
        Self {
            network,
            light_client,
            contract,
            stats: Arc::new(RwLock::new(ContractStats::default())),
            refresh_slot: Arc::new(Semaphore::new(1)),
            metrics,
        }
    }

    pub fn light_client(&self) -> &Arc<LightClient<P>> {
        &self.light_client
    }

    pub async fn stats(&self) -> ContractStats {
        *self.stats.read().await
    }

    pub async fn mint(
        &self,
        receiver: Erc20Address,
        amount: Option<U256>,
        txid: &str,
    ) -> BridgeResult<TxHash> {
        let amount = amount.ok_or(BridgeError::InvalidAmount)?;
        tracing::info!(
            "[BridgeContract] Minting {} TTFT to {:?} for tx {}",
            denominate(amount, FOREIGN_DECIMALS),
            receiver,
            txid
        );
        let call = self.contract.mint_tokens(receiver, amount, txid.to_string());
        self.send_signed(call.tx, "mintTokens").await
    }

    pub async fn register_withdrawal_address(
        &self,
        address: Erc20Address,
    ) -> BridgeResult<TxHash> {
        tracing::info!(
            "[BridgeContract] Registering withdrawal address {:?}",
            address
        );
        let call = self.contract.register_withdrawal_address(address);
        self.send_signed(call.tx, "registerWithdrawalAddress").await
    }

    pub async fn transfer_funds(
        &self,
        recipient: Erc20Address,
        amount: Option<U256>,
    ) -> BridgeResult<TxHash> {
        let amount = amount.ok_or(BridgeError::InvalidAmount)?;
        let call = self.contract.transfer(recipient, amount);
        self.send_signed(call.tx, "transfer").await
    }

    pub async fn is_mint_tx_id(&self, txid: &str) -> BridgeResult<bool> {
        let call = self.contract.is_mint_id(txid.to_string());
        bounded("isMintID", async { Ok(call.call().await?) }).await
    }

    pub async fn is_withdrawal_address(&self, address: Erc20Address) -> BridgeResult<bool> {
        let call = self.contract.is_withdrawal_address(address);
        bounded("isWithdrawalAddress", async { Ok(call.call().await?) }).await
    }

    /// Withdraw events mined in `[start_height, end_height]`, up to the
    /// latest block when `end_height` is `None`.
    pub async fn get_past_withdraws(
        &self,
        start_height: u64,
        end_height: Option<u64>,
    ) -> BridgeResult<Vec<WithdrawEvent>> {
        let to_block = end_height
            .map(|h| BlockNumber::Number(h.into()))
            .unwrap_or(BlockNumber::Latest);
        let filter = self
            .contract
            .withdraw_filter()
            .from_block(start_height)
            .to_block(to_block)
            .filter;
        let logs = self.light_client.provider().get_logs(&filter).await?;
        Ok(logs.iter().filter_map(WithdrawEvent::try_from_log).collect())
    }

    async fn send_signed(&self, mut tx: TypedTransaction, name: &str) -> BridgeResult<TxHash> {
        let send = async {
            let provider = self.light_client.provider();
            let from = self.light_client.account_address().await?;
            tx.set_from(from);

            let pending_nonce = provider
                .get_transaction_count(from, Some(BlockNumber::Pending.into()))
                .await?;
            let cached_nonce = self.stats.read().await.nonce;
            let nonce = cached_nonce.map_or(pending_nonce, |n| n.max(pending_nonce));
            tx.set_nonce(nonce);

            let cached_price = self.stats.read().await.gas_price;
            let gas_price = match cached_price {
                Some(price) => price,
                None => provider.get_gas_price().await?,
            };
            tx.set_gas_price(gas_price);
            let gas = provider.estimate_gas(&tx, None).await?;
            tx.set_gas(gas);

            let raw = self
                .light_client
                .sign_transaction(&tx, self.network.network_id)
                .await?;
            let tx_hash = provider.send_raw_transaction(raw).await?.tx_hash();
            self.stats.write().await.nonce = Some(nonce + 1);
            Ok::<_, BridgeError>(tx_hash)
        };
        let tx_hash = bounded(name, send).await?;
        tracing::info!("[BridgeContract] Sent {} transaction {:?}", name, tx_hash);
        Ok(tx_hash)
    }

    /// Hands `head` to the refresh worker. Returns false when a refresh is
    /// still running, in which case the head is dropped.
    pub fn on_new_head(&self, head: &Block<TxHash>) -> bool {
        let (Some(number), Some(hash)) = (head.number, head.hash) else {
            return false;
        };
        let head = HeadInfo {
            number: number.as_u64(),
            hash,
        };
        self.metrics.last_seen_eth_head.set(head.number as i64);
        let Ok(permit) = self.refresh_slot.clone().try_acquire_owned() else {
            tracing::debug!(
                "[BridgeContract] Refresh in progress, dropping head {}",
                head.number
            );
            self.metrics.heads_dropped.inc();
            return false;
        };
        let light_client = self.light_client.clone();
        let stats = self.stats.clone();
        let metrics = self.metrics.clone();
        tokio::spawn(async move {
            refresh(light_client, stats, metrics, head).await;
            drop(permit);
        });
        true
    }
}

async fn bounded<T, F>(name: &str, call: F) -> BridgeResult<T>
where
    F: Future<Output = BridgeResult<T>>,
{
    tokio::time::timeout(CALL_TIMEOUT, call)
        .await
        .map_err(|_| BridgeError::TransientProviderError(format!("{} call timed out", name)))?
}

async fn refresh<P: JsonRpcClient + 'static>(
    light_client: Arc<LightClient<P>>,
    stats: Arc<RwLock<ContractStats>>,
    metrics: Arc<BridgeMetrics>,
    head: HeadInfo,
) {
    let fetch = async {
        let gas_price = light_client.provider().get_gas_price().await?;
        let balance = match light_client.account_balance_at(head.number).await {
            Ok(balance) => Some(balance),
            // read-only bridge, nothing to track
            Err(BridgeError::NoAccountLoaded) => None,
            Err(e) => return Err(e),
        };
        Ok::<_, BridgeError>((gas_price, balance))
    };
    match tokio::time::timeout(CALL_TIMEOUT, fetch).await {
        Ok(Ok((gas_price, balance))) => {
            let mut stats = stats.write().await;
            stats.head = Some(head);
            stats.gas_price = Some(gas_price);
            if balance.is_some() {
                stats.balance = balance;
            }
            metrics.heads_refreshed.inc();
        }
        Ok(Err(e)) => tracing::warn!(
            "[BridgeContract] Failed to refresh stats for head {}: {:?}",
            head.number,
            e
        ),
        Err(_) => tracing::warn!(
            "[BridgeContract] Refreshing stats for head {} timed out",
            head.number
        ),
    }
}

impl<P> BridgeContract<P>
where
    P: PubsubClient + 'static,
{
    /// Refreshes the cached stats on every new head and forwards the head
    /// number to `sink`.
    pub async fn run_heads_loop(&self, sink: UnboundedSender<ContractEvent>) -> BridgeResult<()> {
        let provider = self.light_client.provider();
        let cancel = self.light_client.cancellation_token();
        let mut heads = provider.subscribe_blocks().await?;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                head = heads.next() => match head {
                    Some(head) => {
                        self.on_new_head(&head);
                        let Some(number) = head.number else {
                            continue;
                        };
                        if sink.send(ContractEvent::NewHead(number.as_u64())).is_err() {
                            tracing::warn!(
                                "[BridgeContract] Withdraw consumer is gone, stopping heads loop"
                            );
                            return Ok(());
                        }
                    }
                    None => return Err(subscription_closed("heads")),
                },
            }
        }
    }

    async fn watch_logs<F>(&self, filter: Filter, name: &str, on_log: F) -> BridgeResult<()>
    where
        F: FnMut(&Log) -> bool + Send,
    {
        let provider = self.light_client.provider();
        let logs = provider.subscribe_logs(&filter).await?;
        drain_logs(logs, &self.light_client.cancellation_token(), name, on_log).await
    }

    pub async fn subscribe_transfers(&self) -> BridgeResult<()> {
        let filter = self.contract.transfer_filter().filter;
        self.watch_logs(filter, "transfer", |log| {
            if let Some(event) = decode_live_log::<TransferFilter>(log) {
                tracing::info!(
                    "[BridgeContract] Noticed transfer event: from {:?} to {:?} amount {}",
                    event.from,
                    event.to,
                    denominate(event.tokens, FOREIGN_DECIMALS)
                );
            }
            true
        })
        .await
    }

    pub async fn subscribe_mint(&self) -> BridgeResult<()> {
        let filter = self.contract.mint_filter().filter;
        self.watch_logs(filter, "mint", |log| {
            if let Some(event) = decode_live_log::<MintFilter>(log) {
                tracing::info!(
                    "[BridgeContract] Noticed mint event: receiver {:?} amount {} txid hash {:?}",
                    event.receiver,
                    denominate(event.tokens, FOREIGN_DECIMALS),
                    event.txid
                );
            }
            true
        })
        .await
    }

    pub async fn subscribe_register_withdrawal_address(&self) -> BridgeResult<()> {
        let filter = self.contract.register_withdrawal_address_filter().filter;
        self.watch_logs(filter, "register withdrawal address", |log| {
            if let Some(event) = decode_live_log::<RegisterWithdrawalAddressFilter>(log) {
                tracing::info!(
                    "[BridgeContract] Noticed withdraw address registration event: address {:?}",
                    event.addr
                );
            }
            true
        })
        .await
    }

    /// Publishes withdraw events from `start_height` on to `sink`. Events
    /// around the switch from history to the live feed may be published
    /// twice.
    pub async fn subscribe_withdraw(
        &self,
        sink: UnboundedSender<ContractEvent>,
        start_height: u64,
    ) -> BridgeResult<()> {
        let provider = self.light_client.provider();
        let filter = self.contract.withdraw_filter().filter;
        // subscribe before replaying so nothing mined meanwhile is missed
        let logs = provider.subscribe_logs(&filter).await?;

        let past = self.get_past_withdraws(start_height, None).await?;
        tracing::info!(
            "[BridgeContract] Replaying {} withdraw events from height {}",
            past.len(),
            start_height
        );
        for event in past {
            if !self.publish_withdraw(&sink, event) {
                return Ok(());
            }
        }

        drain_logs(
            logs,
            &self.light_client.cancellation_token(),
            "withdraw",
            |log| match WithdrawEvent::try_from_log(log) {
                Some(event) if event.block_height >= start_height => {
                    self.publish_withdraw(&sink, event)
                }
                _ => true,
            },
        )
        .await
    }

    fn publish_withdraw(
        &self,
        sink: &UnboundedSender<ContractEvent>,
        event: WithdrawEvent,
    ) -> bool {
        tracing::info!(
            "[BridgeContract] Noticed withdraw event: sender {:?} receiver {:?} amount {} tx {:?} block {}",
            event.sender,
            event.receiver,
            denominate(event.amount, FOREIGN_DECIMALS),
            event.tx_hash,
            event.block_height
        );
        self.metrics.withdraw_events_observed.inc();
        if sink.send(ContractEvent::Withdraw(event)).is_err() {
            tracing::warn!("[BridgeContract] Withdraw consumer is gone, stopping subscription");
            return false;
        }
        true
    }
}

async fn drain_logs<S, F>(
    mut logs: S,
    cancel: &CancellationToken,
    name: &str,
    mut on_log: F,
) -> BridgeResult<()>
where
    S: Stream<Item = Log> + Unpin,
    F: FnMut(&Log) -> bool,
{
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            log = logs.next() => match log {
                Some(log) => {
                    if !on_log(&log) {
                        return Ok(());
                    }
                }
                None => return Err(subscription_closed(name)),
            },
        }
    }
}

fn subscription_closed(name: &str) -> BridgeError {
    BridgeError::ProviderError(format!("{} subscription closed", name))
}

fn spawn_watcher<F>(name: &'static str, run: F) -> JoinHandle<()>
where
    F: Future<Output = BridgeResult<()>> + Send + 'static,
{
    tokio::spawn(async move {
        match run.await {
            Ok(()) => tracing::info!("[BridgeContract] {} watcher stopped", name),
            Err(e) => tracing::error!("[BridgeContract] {} watcher stopped: {:?}", name, e),
        }
    })
}

#[async_trait]
impl<P> BridgeContractApi for BridgeContract<P>
where
    P: PubsubClient + 'static,
{
    async fn mint(
        &self,
        receiver: Erc20Address,
        amount: Option<U256>,
        txid: &str,
    ) -> BridgeResult<TxHash> {
        BridgeContract::mint(self, receiver, amount, txid).await
    }

    async fn register_withdrawal_address(&self, address: Erc20Address) -> BridgeResult<TxHash> {
        BridgeContract::register_withdrawal_address(self, address).await
    }

    async fn is_mint_tx_id(&self, txid: &str) -> BridgeResult<bool> {
        BridgeContract::is_mint_tx_id(self, txid).await
    }

    async fn is_withdrawal_address(&self, address: Erc20Address) -> BridgeResult<bool> {
        BridgeContract::is_withdrawal_address(self, address).await
    }

    async fn get_past_withdraws(
        &self,
        start_height: u64,
        end_height: Option<u64>,
    ) -> BridgeResult<Vec<WithdrawEvent>> {
        BridgeContract::get_past_withdraws(self, start_height, end_height).await
    }

    async fn fetch_transaction(
        &self,
        block_hash: H256,
        tx_hash: TxHash,
    ) -> BridgeResult<(EthTransaction, u64)> {
        self.light_client.fetch_transaction(block_hash, tx_hash).await
    }

    fn start_watchers(
        self: Arc<Self>,
        sink: UnboundedSender<ContractEvent>,
        start_height: u64,
    ) -> Vec<JoinHandle<()>> {
        let head_sink = sink.clone();
        let heads = self.clone();
        let transfers = self.clone();
        let mints = self.clone();
        let registrations = self.clone();
        let withdraws = self;
        vec![
            spawn_watcher("heads", async move { heads.run_heads_loop(head_sink).await }),
            spawn_watcher("transfer", async move { transfers.subscribe_transfers().await }),
            spawn_watcher("mint", async move { mints.subscribe_mint().await }),
            spawn_watcher("register withdrawal address", async move {
                registrations.subscribe_register_withdrawal_address().await
            }),
            spawn_watcher("withdraw", async move {
                withdraws.subscribe_withdraw(sink, start_height).await
            }),
        ]
    }

    fn close(&self) {
        self.light_client.close();
    }
}
