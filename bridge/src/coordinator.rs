// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! The bridge coordinator.
//!
//! Home-chain consensus changes are serialized through a single mutex and
//! drained through the reorg buffer. Blocks leaving the buffer have their
//! conversion and registration transactions mirrored on the token contract.
//! Withdraw events from the contract wait until they are buried under
//! [`MIN_CONFIRMATIONS`] foreign blocks, then are turned into coin-creation
//! transactions for the home-chain transaction pool.

use crate::bridge_contract::{BridgeContractApi, ContractEvent, CALL_TIMEOUT};
use crate::buffer::{BufferedBlock, ReorgBuffer};
use crate::denomination::{denominate, to_foreign_units, to_home_units, HOME_DECIMALS};
use crate::error::{BridgeError, BridgeResult};
use crate::metrics::BridgeMetrics;
use crate::persist::{BridgePersistence, PersistenceStore};
use crate::retry::retry_on_no_peers_within;
use crate::types::{
    erc20_address_from_public_key, Block, BlockId, ConsensusChange, ConsensusChangeId,
    Erc20Address, Erc20CoinCreationTransaction, Transaction, TransactionBody, UnlockHash,
    WithdrawEvent,
};
use crate::validator::MIN_CONFIRMATIONS;
use async_trait::async_trait;
use ethers::types::{TxHash, U256};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Number of newer home-chain blocks required before a block is acted on.
pub const CONFIRMATION_DEPTH: usize = 6;

/// Name under which the bridge subscribes to the consensus set.
pub const SUBSCRIBER_ID: &str = "erc20-bridge";

#[async_trait]
pub trait ConsensusChangeSubscriber: Send + Sync {
    /// Called serially, in chain order, for every consensus change.
    async fn process_consensus_change(&self, change: &ConsensusChange) -> BridgeResult<()>;
}

/// Home-chain consensus engine.
#[async_trait]
pub trait ConsensusSet: Send + Sync {
    /// Delivers every change after `last_change` to `subscriber`, then keeps
    /// delivering new ones until `subscriber_id` unsubscribes.
    async fn subscribe(
        &self,
        subscriber_id: &str,
        last_change: ConsensusChangeId,
        subscriber: Arc<dyn ConsensusChangeSubscriber>,
        cancel: CancellationToken,
    ) -> BridgeResult<()>;

    fn unsubscribe(&self, subscriber_id: &str);

    async fn block_height_of_block(&self, block_id: &BlockId) -> Option<u64>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransactionPoolError {
    #[error("transaction set already known")]
    Duplicate,
    #[error("transaction set rejected: {0}")]
    Rejected(String),
}

#[async_trait]
pub trait TransactionPool: Send + Sync {
    async fn accept_transaction_set(
        &self,
        transactions: Vec<TransactionBody>,
    ) -> Result<(), TransactionPoolError>;
}

/// Home-chain registry of withdrawal addresses.
#[async_trait]
pub trait Erc20Registry: Send + Sync {
    async fn tft_address_for_erc20_address(
        &self,
        address: Erc20Address,
    ) -> BridgeResult<Option<UnlockHash>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedemptionOutcome {
    Submitted,
    // the pool already holds this coin creation
    Duplicate,
    /// The withdraw is given up on.
    Dropped(&'static str),
    /// Not buried deep enough yet, tried again on a later head.
    Deferred(&'static str),
}

impl RedemptionOutcome {
    /// Whether the withdraw can be forgotten.
    pub fn is_final(&self) -> bool {
        !matches!(self, RedemptionOutcome::Deferred(_))
    }
}

// A confirmed block whose transactions were not all mirrored yet.
struct BacklogEntry {
    confirmed: BufferedBlock,
    // index of the first transaction still to mirror
    next_tx: usize,
}

struct BridgeState {
    buffer: ReorgBuffer,
    persistence: BridgePersistence,
    backlog: VecDeque<BacklogEntry>,
    closed: bool,
}

/// Confirmations of a block at `block_height` once the chain reached `head`,
/// counting the block itself.
pub fn confirmations_at(block_height: u64, head: u64) -> u64 {
    head.saturating_add(1).saturating_sub(block_height)
}

pub struct Bridge {
    consensus: Arc<dyn ConsensusSet>,
    tpool: Arc<dyn TransactionPool>,
    registry: Arc<dyn Erc20Registry>,
    contract: Arc<dyn BridgeContractApi>,
    store: PersistenceStore,
    state: Mutex<BridgeState>,
    minimum_transaction_fee: U256,
    metrics: Arc<BridgeMetrics>,
}

impl Bridge {
    /// Loads the persisted checkpoint, creating it on first run.
    pub fn new(
        consensus: Arc<dyn ConsensusSet>,
        tpool: Arc<dyn TransactionPool>,
        registry: Arc<dyn Erc20Registry>,
        contract: Arc<dyn BridgeContractApi>,
        store: PersistenceStore,
        minimum_transaction_fee: U256,
        metrics: Arc<BridgeMetrics>,
    ) -> BridgeResult<Self> {
        let persistence = store.init()?;
        tracing::info!(
            "[Bridge] Loaded checkpoint: height {}, recent change {}",
            persistence.height,
            persistence.recent_change
        );
        metrics
            .last_processed_home_height
            .set(persistence.height as i64);
        Ok(Self {
            consensus,
            tpool,
            registry,
            contract,
            store,
            state: Mutex::new(BridgeState {
                buffer: ReorgBuffer::new(CONFIRMATION_DEPTH),
                persistence,
                backlog: VecDeque::new(),
                closed: false,
            }),
            minimum_transaction_fee,
            metrics,
        })
    }

    pub async fn persistence(&self) -> BridgePersistence {
        self.state.lock().await.persistence
    }

    /// Subscribes to the consensus set from the checkpoint, then spawns the
    /// contract watchers and the withdraw consumer.
    pub async fn start(
        self: Arc<Self>,
        withdraw_start_height: u64,
        cancel: CancellationToken,
    ) -> BridgeResult<BridgeHandle> {
        let last_change = self.persistence().await.recent_change;
        self.consensus
            .subscribe(SUBSCRIBER_ID, last_change, self.clone(), cancel.child_token())
            .await?;

        let (tx, rx) = mpsc::unbounded_channel();
        let mut tasks = self.contract.clone().start_watchers(tx, withdraw_start_height);
        tasks.push(tokio::spawn(
            self.clone().run_withdraw_consumer(rx, cancel.clone()),
        ));
        tracing::info!("[Bridge] Started, {} tasks running", tasks.len());
        Ok(BridgeHandle {
            bridge: self,
            tasks,
            cancel,
        })
    }

    async fn process_change(&self, change: &ConsensusChange) -> BridgeResult<()> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(BridgeError::InternalError("bridge is closed".into()));
        }
        for block in &change.reverted_blocks {
            tracing::debug!("[Bridge] Reverting block {}", block.id);
            state.buffer.rewind();
        }
        for block in &change.applied_blocks {
            if let Some(confirmed) = state.buffer.push(block.clone(), change.id) {
                state.backlog.push_back(BacklogEntry {
                    confirmed,
                    next_tx: 0,
                });
            }
        }
        self.drain_backlog(&mut state).await
    }

    // Stops at the first failing transaction. Its block stays at the front of
    // the backlog so the checkpoint never moves past it, and the next attempt
    // resumes at that transaction.
    async fn drain_backlog(&self, state: &mut BridgeState) -> BridgeResult<()> {
        while let Some(entry) = state.backlog.front_mut() {
            self.process_block(&entry.confirmed.block, &mut entry.next_tx)
                .await?;
            let confirmed = &entry.confirmed;
            let persistence = BridgePersistence {
                recent_change: confirmed.change_id,
                height: state.persistence.height + 1,
            };
            self.store.save(&persistence)?;
            if let Some(height) = self.consensus.block_height_of_block(&confirmed.block.id).await {
                if height + 1 != persistence.height {
                    tracing::warn!(
                        "[Bridge] Block {} is at height {} but checkpoint moved to {}",
                        confirmed.block.id,
                        height,
                        persistence.height
                    );
                }
            }
            state.persistence = persistence;
            state.backlog.pop_front();
            self.metrics
                .last_processed_home_height
                .set(persistence.height as i64);
        }
        Ok(())
    }

    async fn process_block(&self, block: &Block, next_tx: &mut usize) -> BridgeResult<()> {
        for tx in block.transactions.iter().skip(*next_tx) {
            self.process_transaction(tx).await?;
            *next_tx += 1;
        }
        Ok(())
    }

    async fn process_transaction(&self, tx: &Transaction) -> BridgeResult<()> {
        match &tx.body {
            TransactionBody::Erc20Convert(convert) => {
                let txid = tx.id.to_string();
                tracing::info!(
                    "[Bridge] Found conversion of {} TFT to {:?} in tx {}",
                    denominate(convert.value, HOME_DECIMALS),
                    convert.address,
                    txid
                );
                let minted = self.contract.is_mint_tx_id(&txid).await;
                let result = match minted {
                    Ok(true) => {
                        tracing::info!("[Bridge] Tx {} was already minted, skipping", txid);
                        return Ok(());
                    }
                    Ok(false) => {
                        let amount = to_foreign_units(convert.value);
                        self.contract.mint(convert.address, amount, &txid).await
                    }
                    Err(e) => Err(e),
                };
                if let Err(e) = result {
                    tracing::error!("[Bridge] Failed to mint for tx {}: {:?}", txid, e);
                    self.metrics.mints_failed.inc();
                    return Err(e);
                }
                self.metrics.mints_submitted.inc();
            }
            TransactionBody::Erc20AddressRegistration(registration) => {
                let address = erc20_address_from_public_key(&registration.public_key);
                tracing::info!(
                    "[Bridge] Found withdrawal address registration of {:?} in tx {}",
                    address,
                    tx.id
                );
                let registered = self.contract.is_withdrawal_address(address).await;
                let result = match registered {
                    Ok(true) => {
                        tracing::info!(
                            "[Bridge] Withdrawal address {:?} already registered, skipping",
                            address
                        );
                        return Ok(());
                    }
                    Ok(false) => self.contract.register_withdrawal_address(address).await,
                    Err(e) => Err(e),
                };
                if let Err(e) = result {
                    tracing::error!(
                        "[Bridge] Failed to register withdrawal address {:?}: {:?}",
                        address,
                        e
                    );
                    self.metrics.registrations_failed.inc();
                    return Err(e);
                }
                self.metrics.registrations_submitted.inc();
            }
            _ => tracing::trace!("[Bridge] Ignoring tx {} (version {})", tx.id, tx.version()),
        }
        Ok(())
    }

    // Withdraws are keyed by foreign tx hash, so a replayed event only
    // replaces its earlier copy.
    async fn run_withdraw_consumer(
        self: Arc<Self>,
        mut events: UnboundedReceiver<ContractEvent>,
        cancel: CancellationToken,
    ) {
        let mut pending = HashMap::new();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(ContractEvent::Withdraw(event)) => {
                        tracing::debug!(
                            "[Bridge] Waiting for withdraw tx {:?} at height {} to mature",
                            event.tx_hash,
                            event.block_height
                        );
                        pending.insert(event.tx_hash, event);
                        self.metrics.pending_withdraws.set(pending.len() as i64);
                    }
                    Some(ContractEvent::NewHead(head)) => {
                        self.redeem_matured(&mut pending, head).await;
                    }
                    None => break,
                },
            }
        }
        if !pending.is_empty() {
            tracing::warn!(
                "[Bridge] Withdraw consumer stopped with {} withdraws pending",
                pending.len()
            );
        }
        tracing::info!("[Bridge] Withdraw consumer stopped");
    }

    /// Redeems, oldest first, every pending withdraw with at least
    /// [`MIN_CONFIRMATIONS`] at foreign height `head`. Deferred withdraws stay
    /// pending.
    async fn redeem_matured(&self, pending: &mut HashMap<TxHash, WithdrawEvent>, head: u64) {
        let mut matured = pending
            .values()
            .filter(|e| confirmations_at(e.block_height, head) >= MIN_CONFIRMATIONS)
            .cloned()
            .collect::<Vec<_>>();
        matured.sort_by_key(|e| e.block_height);
        for event in matured {
            if self.handle_withdraw(&event).await.is_final() {
                pending.remove(&event.tx_hash);
            }
        }
        self.metrics.pending_withdraws.set(pending.len() as i64);
    }

    /// Redeems a withdraw event as a coin creation on the home chain.
    pub async fn handle_withdraw(&self, event: &WithdrawEvent) -> RedemptionOutcome {
        let outcome = self.redeem(event).await;
        match &outcome {
            RedemptionOutcome::Submitted => {
                self.metrics.withdraw_redemptions_submitted.inc();
            }
            RedemptionOutcome::Duplicate => {
                tracing::info!(
                    "[Bridge] Coin creation for withdraw tx {:?} already known",
                    event.tx_hash
                );
            }
            RedemptionOutcome::Dropped(reason) => {
                self.metrics
                    .withdraw_redemptions_dropped
                    .with_label_values(&[*reason])
                    .inc();
            }
            RedemptionOutcome::Deferred(reason) => {
                self.metrics
                    .withdraw_redemptions_deferred
                    .with_label_values(&[*reason])
                    .inc();
            }
        }
        outcome
    }

    async fn redeem(&self, event: &WithdrawEvent) -> RedemptionOutcome {
        let address = match self.registry.tft_address_for_erc20_address(event.receiver).await {
            Ok(Some(address)) => address,
            Ok(None) => {
                tracing::warn!(
                    "[Bridge] Dropping withdraw tx {:?}: no TFT address registered for {:?}",
                    event.tx_hash,
                    event.receiver
                );
                return RedemptionOutcome::Dropped("unregistered");
            }
            Err(e) => {
                tracing::error!(
                    "[Bridge] Dropping withdraw tx {:?}: registry lookup failed: {:?}",
                    event.tx_hash,
                    e
                );
                return RedemptionOutcome::Dropped("registry_error");
            }
        };

        let Some(amount) = to_home_units(event.amount) else {
            tracing::error!(
                "[Bridge] Dropping withdraw tx {:?}: amount {} out of range",
                event.tx_hash,
                event.amount
            );
            return RedemptionOutcome::Dropped("invalid_amount");
        };
        if amount <= self.minimum_transaction_fee {
            tracing::warn!(
                "[Bridge] Dropping withdraw tx {:?}: {} TFT does not cover the transaction fee",
                event.tx_hash,
                denominate(amount, HOME_DECIMALS)
            );
            return RedemptionOutcome::Dropped("below_fee");
        }

        // the block must still be part of the foreign chain
        let fetched = retry_on_no_peers_within(
            "[Bridge] Fetching withdraw transaction",
            CALL_TIMEOUT,
            || self.contract.fetch_transaction(event.block_hash, event.tx_hash),
        )
        .await;
        let confirmations = match fetched {
            Ok((_, confirmations)) => confirmations,
            Err(e) => {
                tracing::error!(
                    "[Bridge] Dropping withdraw tx {:?}: failed to fetch transaction: {:?}",
                    event.tx_hash,
                    e
                );
                return RedemptionOutcome::Dropped("tx_unavailable");
            }
        };
        // the light node may lag behind the head that released the event
        if confirmations < MIN_CONFIRMATIONS {
            tracing::info!(
                "[Bridge] Deferring withdraw tx {:?}: {} of {} confirmations",
                event.tx_hash,
                confirmations,
                MIN_CONFIRMATIONS
            );
            return RedemptionOutcome::Deferred("immature");
        }

        let coin_creation = Erc20CoinCreationTransaction {
            address,
            value: amount - self.minimum_transaction_fee,
            transaction_fee: self.minimum_transaction_fee,
            transaction_id: event.tx_hash,
            block_id: event.block_hash,
        };
        tracing::info!(
            "[Bridge] Creating {} TFT for {} from withdraw tx {:?}",
            denominate(coin_creation.value, HOME_DECIMALS),
            address,
            event.tx_hash
        );
        match self
            .tpool
            .accept_transaction_set(vec![TransactionBody::Erc20CoinCreation(coin_creation)])
            .await
        {
            Ok(()) => RedemptionOutcome::Submitted,
            Err(TransactionPoolError::Duplicate) => RedemptionOutcome::Duplicate,
            Err(e) => {
                tracing::error!(
                    "[Bridge] Failed to submit coin creation for withdraw tx {:?}: {}",
                    event.tx_hash,
                    e
                );
                RedemptionOutcome::Dropped("rejected")
            }
        }
    }

    /// Closes the contract session and leaves the consensus set.
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        if state.closed {
            return;
        }
        state.closed = true;
        self.contract.close();
        self.consensus.unsubscribe(SUBSCRIBER_ID);
        tracing::info!("[Bridge] Closed");
    }
}

#[async_trait]
impl ConsensusChangeSubscriber for Bridge {
    async fn process_consensus_change(&self, change: &ConsensusChange) -> BridgeResult<()> {
        self.process_change(change).await.map_err(|e| {
            tracing::error!(
                "[Bridge] Failed to process consensus change {}: {:?}",
                change.id,
                e
            );
            e
        })
    }
}

/// Running bridge, returned by [`Bridge::start`].
pub struct BridgeHandle {
    bridge: Arc<Bridge>,
    tasks: Vec<JoinHandle<()>>,
    cancel: CancellationToken,
}

impl BridgeHandle {
    pub fn bridge(&self) -> &Arc<Bridge> {
        &self.bridge
    }

    pub async fn close(self) {
        self.bridge.close().await;
        self.cancel.cancel();
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::warn!("[Bridge] Task ended abnormally: {:?}", e);
            }
        }
    }
}
