// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::abi::WithdrawFilter;
use crate::bridge_contract::{BridgeContractApi, ContractEvent};
use crate::coordinator::{
    ConsensusChangeSubscriber, ConsensusSet, Erc20Registry, TransactionPool,
    TransactionPoolError,
};
use crate::error::{BridgeError, BridgeResult};
use crate::eth_client::{BalanceInfo, ForeignChainClient, LightClientConfig, SyncStatus};
use crate::eth_mock_provider::EthMockProvider;
use crate::networks::NetworkConfiguration;
use crate::types::{
    Block, BlockId, ConsensusChangeId, Erc20Address, Erc20AddressRegistrationTransaction,
    Erc20ConvertTransaction, PublicKey, Transaction, TransactionBody, TransactionId, UnlockHash,
    WithdrawEvent,
};
use async_trait::async_trait;
use ethers::abi::Token;
use ethers::contract::EthEvent;
use ethers::types::{
    Address as EthAddress, Block as EthBlock, Log, Transaction as EthTransaction, TxHash, H256,
    U256, U64,
};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn test_light_client_config(data_dir: PathBuf) -> LightClientConfig {
    let network = NetworkConfiguration::for_name("rinkeby").unwrap();
    LightClientConfig::from_network(&network, 30303, data_dir)
}

pub fn make_withdraw_log(
    contract: EthAddress,
    sender: EthAddress,
    receiver: EthAddress,
    amount: U256,
    tx_hash: TxHash,
    block_hash: H256,
    block_number: u64,
) -> Log {
    Log {
        address: contract,
        topics: vec![
            WithdrawFilter::signature(),
            H256::from(sender),
            H256::from(receiver),
        ],
        data: ethers::abi::encode(&[Token::Uint(amount)]).into(),
        block_hash: Some(block_hash),
        block_number: Some(U64::from(block_number)),
        transaction_hash: Some(tx_hash),
        removed: Some(false),
        ..Default::default()
    }
}

pub fn mock_block_number(mock: &EthMockProvider, number: u64) {
    mock.set_response("eth_blockNumber", (), U64::from(number))
        .unwrap();
}

pub fn mock_block_with_txs(
    mock: &EthMockProvider,
    block_hash: H256,
    number: u64,
    tx_hashes: Vec<TxHash>,
) {
    let block = EthBlock::<EthTransaction> {
        hash: Some(block_hash),
        number: Some(U64::from(number)),
        transactions: tx_hashes
            .into_iter()
            .map(|hash| EthTransaction {
                hash,
                block_hash: Some(block_hash),
                block_number: Some(U64::from(number)),
                ..Default::default()
            })
            .collect(),
        ..Default::default()
    };
    mock.set_response("eth_getBlockByHash", (block_hash, true), block)
        .unwrap();
}

/// Queues one `eth_syncing` answer: `None` for synced, otherwise
/// `(starting, current, highest)`.
pub fn mock_syncing(mock: &EthMockProvider, progress: Option<(u64, u64, u64)>) {
    let response = match progress {
        None => serde_json::Value::Bool(false),
        Some((starting, current, highest)) => serde_json::json!({
            "startingBlock": U64::from(starting),
            "currentBlock": U64::from(current),
            "highestBlock": U64::from(highest),
        }),
    };
    mock.add_response("eth_syncing", (), response).unwrap();
}

pub fn mock_chain_identity(mock: &EthMockProvider, network_id: u64, genesis_hash: H256) {
    mock.add_response("net_version", (), network_id.to_string())
        .unwrap();
    let genesis = EthBlock::<TxHash> {
        hash: Some(genesis_hash),
        number: Some(U64::zero()),
        ..Default::default()
    };
    mock.add_response("eth_getBlockByNumber", ("earliest", false), genesis)
        .unwrap();
}

pub fn make_block(n: u8, transactions: Vec<Transaction>) -> Block {
    Block {
        id: BlockId::new([n; 32]),
        parent_id: BlockId::new([n.wrapping_sub(1); 32]),
        transactions,
    }
}

pub fn make_convert_tx(id: u8, address: Erc20Address, value: U256) -> Transaction {
    Transaction {
        id: TransactionId::new([id; 32]),
        body: TransactionBody::Erc20Convert(Erc20ConvertTransaction {
            address,
            value,
            transaction_fee: U256::from(100_000_000u64),
        }),
    }
}

pub fn make_registration_tx(id: u8, public_key: PublicKey) -> Transaction {
    Transaction {
        id: TransactionId::new([id; 32]),
        body: TransactionBody::Erc20AddressRegistration(Erc20AddressRegistrationTransaction {
            public_key,
            registration_fee: U256::from(10_000_000_000u64),
            transaction_fee: U256::from(100_000_000u64),
        }),
    }
}

#[derive(Default)]
pub struct MockConsensusSet {
    subscriptions: Mutex<Vec<(String, ConsensusChangeId)>>,
    unsubscribed: Mutex<Vec<String>>,
}

impl MockConsensusSet {
    pub fn subscriptions(&self) -> Vec<(String, ConsensusChangeId)> {
        self.subscriptions.lock().unwrap().clone()
    }

    pub fn unsubscribed(&self) -> Vec<String> {
        self.unsubscribed.lock().unwrap().clone()
    }
}

#[async_trait]
impl ConsensusSet for MockConsensusSet {
    async fn subscribe(
        &self,
        subscriber_id: &str,
        last_change: ConsensusChangeId,
        _subscriber: Arc<dyn ConsensusChangeSubscriber>,
        _cancel: CancellationToken,
    ) -> BridgeResult<()> {
        self.subscriptions
            .lock()
            .unwrap()
            .push((subscriber_id.to_string(), last_change));
        Ok(())
    }

    fn unsubscribe(&self, subscriber_id: &str) {
        self.unsubscribed
            .lock()
            .unwrap()
            .push(subscriber_id.to_string());
    }

    async fn block_height_of_block(&self, _block_id: &BlockId) -> Option<u64> {
        None
    }
}

#[derive(Default)]
pub struct MockTransactionPool {
    accepted: Mutex<Vec<Vec<TransactionBody>>>,
    error: Mutex<Option<TransactionPoolError>>,
}

impl MockTransactionPool {
    pub fn accepted(&self) -> Vec<Vec<TransactionBody>> {
        self.accepted.lock().unwrap().clone()
    }

    pub fn fail_with(&self, error: Option<TransactionPoolError>) {
        *self.error.lock().unwrap() = error;
    }
}

#[async_trait]
impl TransactionPool for MockTransactionPool {
    async fn accept_transaction_set(
        &self,
        transactions: Vec<TransactionBody>,
    ) -> Result<(), TransactionPoolError> {
        if let Some(error) = self.error.lock().unwrap().clone() {
            return Err(error);
        }
        self.accepted.lock().unwrap().push(transactions);
        Ok(())
    }
}

#[derive(Default)]
pub struct MockErc20Registry {
    addresses: Mutex<HashMap<Erc20Address, UnlockHash>>,
}

impl MockErc20Registry {
    pub fn register(&self, address: Erc20Address, tft_address: UnlockHash) {
        self.addresses.lock().unwrap().insert(address, tft_address);
    }
}

#[async_trait]
impl Erc20Registry for MockErc20Registry {
    async fn tft_address_for_erc20_address(
        &self,
        address: Erc20Address,
    ) -> BridgeResult<Option<UnlockHash>> {
        Ok(self.addresses.lock().unwrap().get(&address).copied())
    }
}

/// Records contract calls and answers reads from canned data.
#[derive(Default)]
pub struct MockBridgeContract {
    mints: Mutex<Vec<(Erc20Address, U256, String)>>,
    registrations: Mutex<Vec<Erc20Address>>,
    fail_mints: AtomicBool,
    fail_registrations: AtomicBool,
    mint_checks: AtomicUsize,
    registration_checks: AtomicUsize,
    // reads never resolve while set
    stalled: AtomicBool,
    past_withdraws: Mutex<Vec<WithdrawEvent>>,
    past_withdraws_no_peers: AtomicUsize,
    past_withdraw_calls: AtomicUsize,
    // tx hash -> (block hash, confirmations)
    transactions: Mutex<HashMap<TxHash, (H256, u64)>>,
    fetch_no_peers: AtomicUsize,
    fetch_calls: AtomicUsize,
    watchers_started: AtomicUsize,
    closed: AtomicBool,
}

impl MockBridgeContract {
    pub fn mints(&self) -> Vec<(Erc20Address, U256, String)> {
        self.mints.lock().unwrap().clone()
    }

    pub fn registrations(&self) -> Vec<Erc20Address> {
        self.registrations.lock().unwrap().clone()
    }

    pub fn fail_mints(&self, fail: bool) {
        self.fail_mints.store(fail, Ordering::SeqCst);
    }

    pub fn fail_registrations(&self, fail: bool) {
        self.fail_registrations.store(fail, Ordering::SeqCst);
    }

    /// Number of `is_mint_tx_id` and `is_withdrawal_address` queries.
    pub fn guard_checks(&self) -> (usize, usize) {
        (
            self.mint_checks.load(Ordering::SeqCst),
            self.registration_checks.load(Ordering::SeqCst),
        )
    }

    pub fn stall(&self, stalled: bool) {
        self.stalled.store(stalled, Ordering::SeqCst);
    }

    pub fn add_past_withdraw(&self, event: WithdrawEvent) {
        self.past_withdraws.lock().unwrap().push(event);
    }

    /// The next `count` history fetches fail for lack of peers.
    pub fn fail_past_withdraws_without_peers(&self, count: usize) {
        self.past_withdraws_no_peers.store(count, Ordering::SeqCst);
    }

    pub fn past_withdraw_calls(&self) -> usize {
        self.past_withdraw_calls.load(Ordering::SeqCst)
    }

    pub fn add_transaction(&self, block_hash: H256, tx_hash: TxHash, confirmations: u64) {
        self.transactions
            .lock()
            .unwrap()
            .insert(tx_hash, (block_hash, confirmations));
    }

    pub fn remove_transaction(&self, tx_hash: TxHash) {
        self.transactions.lock().unwrap().remove(&tx_hash);
    }

    /// The next `count` transaction fetches fail for lack of peers.
    pub fn fail_fetch_without_peers(&self, count: usize) {
        self.fetch_no_peers.store(count, Ordering::SeqCst);
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn watchers_started(&self) -> usize {
        self.watchers_started.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

fn take_failure(remaining: &AtomicUsize) -> bool {
    remaining
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl BridgeContractApi for MockBridgeContract {
    async fn mint(
        &self,
        receiver: Erc20Address,
        amount: Option<U256>,
        txid: &str,
    ) -> BridgeResult<TxHash> {
        let amount = amount.ok_or(BridgeError::InvalidAmount)?;
        if self.fail_mints.load(Ordering::SeqCst) {
            return Err(BridgeError::ProviderError("execution reverted".into()));
        }
        self.mints
            .lock()
            .unwrap()
            .push((receiver, amount, txid.to_string()));
        Ok(TxHash::repeat_byte(0xee))
    }

    async fn register_withdrawal_address(&self, address: Erc20Address) -> BridgeResult<TxHash> {
        if self.fail_registrations.load(Ordering::SeqCst) {
            return Err(BridgeError::ProviderError("execution reverted".into()));
        }
        self.registrations.lock().unwrap().push(address);
        Ok(TxHash::repeat_byte(0xee))
    }

    async fn is_mint_tx_id(&self, txid: &str) -> BridgeResult<bool> {
        self.mint_checks.fetch_add(1, Ordering::SeqCst);
        Ok(self.mints.lock().unwrap().iter().any(|(_, _, id)| id == txid))
    }

    async fn is_withdrawal_address(&self, address: Erc20Address) -> BridgeResult<bool> {
        self.registration_checks.fetch_add(1, Ordering::SeqCst);
        Ok(self.registrations.lock().unwrap().contains(&address))
    }

    async fn get_past_withdraws(
        &self,
        start_height: u64,
        end_height: Option<u64>,
    ) -> BridgeResult<Vec<WithdrawEvent>> {
        self.past_withdraw_calls.fetch_add(1, Ordering::SeqCst);
        if self.stalled.load(Ordering::SeqCst) {
            futures::future::pending::<()>().await;
        }
        if take_failure(&self.past_withdraws_no_peers) {
            return Err(BridgeError::NoPeersAvailable);
        }
        Ok(self
            .past_withdraws
            .lock()
            .unwrap()
            .iter()
            .filter(|w| {
                w.block_height >= start_height && end_height.map_or(true, |h| w.block_height <= h)
            })
            .cloned()
            .collect())
    }

    async fn fetch_transaction(
        &self,
        block_hash: H256,
        tx_hash: TxHash,
    ) -> BridgeResult<(EthTransaction, u64)> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        if self.stalled.load(Ordering::SeqCst) {
            futures::future::pending::<()>().await;
        }
        if take_failure(&self.fetch_no_peers) {
            return Err(BridgeError::NoPeersAvailable);
        }
        match self.transactions.lock().unwrap().get(&tx_hash) {
            Some((block, confirmations)) if *block == block_hash => Ok((
                EthTransaction {
                    hash: tx_hash,
                    block_hash: Some(block_hash),
                    ..Default::default()
                },
                *confirmations,
            )),
            _ => Err(BridgeError::TxNotFound),
        }
    }

    fn start_watchers(
        self: Arc<Self>,
        _sink: UnboundedSender<ContractEvent>,
        _start_height: u64,
    ) -> Vec<JoinHandle<()>> {
        self.watchers_started.fetch_add(1, Ordering::SeqCst);
        vec![]
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct MockForeignChainClient {
    status: Mutex<Option<SyncStatus>>,
    // sync checks answered with "still syncing" before reporting synced
    syncing_checks: AtomicU64,
}

impl MockForeignChainClient {
    pub fn set_status(&self, status: SyncStatus) {
        *self.status.lock().unwrap() = Some(status);
    }

    pub fn synced_after(&self, checks: u64) {
        self.syncing_checks.store(checks, Ordering::SeqCst);
    }
}

#[async_trait]
impl ForeignChainClient for MockForeignChainClient {
    async fn fetch_transaction(
        &self,
        _block_hash: H256,
        _tx_hash: TxHash,
    ) -> BridgeResult<(EthTransaction, u64)> {
        Err(BridgeError::TxNotFound)
    }

    async fn is_synced(&self) -> BridgeResult<bool> {
        Ok(self
            .syncing_checks
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_err())
    }

    async fn get_status(&self) -> BridgeResult<SyncStatus> {
        self.status
            .lock()
            .unwrap()
            .ok_or_else(|| BridgeError::ProviderError("no status".into()))
    }

    async fn get_balance_info(&self) -> BridgeResult<BalanceInfo> {
        Err(BridgeError::NoAccountLoaded)
    }
}
