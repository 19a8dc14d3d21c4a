// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Validation of home-chain coin creations against the foreign chain.

use crate::bridge_contract::{BridgeContractApi, CALL_TIMEOUT};
use crate::denomination::to_home_units;
use crate::error::{BridgeError, BridgeResult};
use crate::eth_client::{wait_until_synced, BalanceInfo, ForeignChainClient, SyncStatus};
use crate::metrics::BridgeMetrics;
use crate::retry::retry_on_no_peers_within;
use crate::types::{
    erc20_address_from_unlock_hash, Currency, Erc20Address, Erc20CoinCreationTransaction,
    Erc20Hash,
};
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Blocks, inclusive, a withdrawal must be buried under.
pub const MIN_CONFIRMATIONS: u64 = 25;

#[async_trait]
pub trait Erc20TransactionValidator: Send + Sync {
    /// Checks that `tx_id` in foreign block `block_id` withdrew
    /// `expected_amount` (home units) to `expected_address`.
    async fn validate_withdraw_tx(
        &self,
        block_id: Erc20Hash,
        tx_id: Erc20Hash,
        expected_address: Erc20Address,
        expected_amount: Currency,
    ) -> BridgeResult<()>;

    async fn get_status(&self) -> BridgeResult<Option<SyncStatus>>;

    async fn get_balance_info(&self) -> BridgeResult<Option<BalanceInfo>>;
}

/// Validates a coin-creation transaction: the withdrawal must cover the
/// created value plus the fee and must go to the address derived from the
/// credited home address.
pub async fn validate_coin_creation(
    validator: &dyn Erc20TransactionValidator,
    tx: &Erc20CoinCreationTransaction,
) -> BridgeResult<()> {
    validator
        .validate_withdraw_tx(
            tx.block_id,
            tx.transaction_id,
            erc20_address_from_unlock_hash(&tx.address),
            tx.claimed_amount(),
        )
        .await
}

/// Used when the bridge is disabled: every withdrawal is accepted.
pub struct NopErc20TransactionValidator;

#[async_trait]
impl Erc20TransactionValidator for NopErc20TransactionValidator {
    async fn validate_withdraw_tx(
        &self,
        _block_id: Erc20Hash,
        _tx_id: Erc20Hash,
        _expected_address: Erc20Address,
        _expected_amount: Currency,
    ) -> BridgeResult<()> {
        Ok(())
    }

    async fn get_status(&self) -> BridgeResult<Option<SyncStatus>> {
        Ok(None)
    }

    async fn get_balance_info(&self) -> BridgeResult<Option<BalanceInfo>> {
        Ok(None)
    }
}

pub struct Erc20NodeValidator {
    contract: Arc<dyn BridgeContractApi>,
    client: Arc<dyn ForeignChainClient>,
    metrics: Arc<BridgeMetrics>,
}

impl Erc20NodeValidator {
    pub fn new(
        contract: Arc<dyn BridgeContractApi>,
        client: Arc<dyn ForeignChainClient>,
        metrics: Arc<BridgeMetrics>,
    ) -> Self {
        Self {
            contract,
            client,
            metrics,
        }
    }

    /// Blocks until the light client finished its initial sync.
    pub async fn wait(&self, cancel: &CancellationToken) -> BridgeResult<()> {
        wait_until_synced(self.client.as_ref(), cancel).await
    }

    async fn check_withdraw_tx(
        &self,
        block_id: Erc20Hash,
        tx_id: Erc20Hash,
        expected_address: Erc20Address,
        expected_amount: Currency,
    ) -> BridgeResult<()> {
        let withdraws = retry_on_no_peers_within(
            "[Validator] Fetching past withdraws",
            CALL_TIMEOUT,
            || self.contract.get_past_withdraws(0, None),
        )
        .await?;
        let event = withdraws
            .into_iter()
            .find(|w| w.tx_hash == tx_id)
            .ok_or(BridgeError::NoMatchingWithdrawal)?;
        if event.block_hash != block_id {
            return Err(BridgeError::BlockHashMismatch);
        }
        if event.receiver != expected_address {
            return Err(BridgeError::ReceiverMismatch);
        }
        if to_home_units(event.amount) != Some(expected_amount) {
            return Err(BridgeError::AmountMismatch);
        }

        let (_, confirmations) = retry_on_no_peers_within(
            "[Validator] Fetching withdraw transaction",
            CALL_TIMEOUT,
            || self.contract.fetch_transaction(block_id, tx_id),
        )
        .await?;
        if confirmations < MIN_CONFIRMATIONS {
            return Err(BridgeError::InsufficientConfirmations {
                required: MIN_CONFIRMATIONS,
                actual: confirmations,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Erc20TransactionValidator for Erc20NodeValidator {
    async fn validate_withdraw_tx(
        &self,
        block_id: Erc20Hash,
        tx_id: Erc20Hash,
        expected_address: Erc20Address,
        expected_amount: Currency,
    ) -> BridgeResult<()> {
        let result = self
            .check_withdraw_tx(block_id, tx_id, expected_address, expected_amount)
            .await;
        let outcome = match &result {
            Ok(()) => "valid",
            Err(e) => {
                tracing::info!(
                    "[Validator] Rejected withdraw tx {:?} in block {:?}: {}",
                    tx_id,
                    block_id,
                    e
                );
                e.error_type()
            }
        };
        self.metrics
            .withdraw_validations
            .with_label_values(&[outcome])
            .inc();
        result
    }

    async fn get_status(&self) -> BridgeResult<Option<SyncStatus>> {
        self.client.get_status().await.map(Some)
    }

    async fn get_balance_info(&self) -> BridgeResult<Option<BalanceInfo>> {
        self.client.get_balance_info().await.map(Some)
    }
}
