// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use ethers::contract::ContractError;
use ethers::providers::{Middleware, ProviderError};
use ethers::signers::WalletError;
use ethers::types::TxHash;

/// Message geth-compatible light nodes return when no peer can serve a request.
pub const NO_PEERS_MESSAGE: &str = "no suitable peers available";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BridgeError {
    // Fatal startup configuration problem
    #[error("{0}")]
    InvalidConfig(String),
    // Network name is not in the network table
    #[error("Ethereum network {0} not supported")]
    UnsupportedNetwork(String),
    // Signing or account-balance call before an account was loaded
    #[error("no account was loaded into the light client")]
    NoAccountLoaded,
    // The light client has no peer able to serve the request
    #[error("{}", NO_PEERS_MESSAGE)]
    NoPeersAvailable,
    // Transient Ethereum provider error
    #[error("transient provider error: {0}")]
    TransientProviderError(String),
    // Ethereum provider error
    #[error("provider error: {0}")]
    ProviderError(String),
    // The referenced transaction does not exist
    #[error("transaction could not be found")]
    TxNotFound,
    // The referenced block is beyond the light client's view of the chain
    #[error("Tx {tx:?} is in block {block_height} while the current chain height is only {chain_height}")]
    TxBlockAheadOfChain {
        tx: TxHash,
        block_height: u64,
        chain_height: u64,
    },
    // No withdraw event matches the claimed transaction
    #[error("no matching withdrawal")]
    NoMatchingWithdrawal,
    #[error("withdraw event block hash does not match the claimed block")]
    BlockHashMismatch,
    #[error("withdraw event receiver does not match the expected address")]
    ReceiverMismatch,
    #[error("withdraw event amount does not match the expected amount")]
    AmountMismatch,
    #[error("insufficient block confirmations (required {required}, got {actual})")]
    InsufficientConfirmations { required: u64, actual: u64 },
    // Missing amount for a contract call
    #[error("invalid amount")]
    InvalidAmount,
    // Sync wait was cancelled before completion
    #[error("light client sync was cancelled")]
    SyncCancelled,
    // Storage Error
    #[error("storage error: {0}")]
    StorageError(String),
    #[error("signing error: {0}")]
    SigningError(String),
    // Internal Bridge error
    #[error("internal error: {0}")]
    InternalError(String),
    // Uncategorized error
    #[error("{0}")]
    Generic(String),
}

impl BridgeError {
    /// Returns a short string identifying the error type for metrics labels
    pub fn error_type(&self) -> &'static str {
        match self {
            BridgeError::InvalidConfig(_) => "invalid_config",
            BridgeError::UnsupportedNetwork(_) => "unsupported_network",
            BridgeError::NoAccountLoaded => "no_account_loaded",
            BridgeError::NoPeersAvailable => "no_peers",
            BridgeError::TransientProviderError(_) => "transient_provider_error",
            BridgeError::ProviderError(_) => "provider_error",
            BridgeError::TxNotFound => "tx_not_found",
            BridgeError::TxBlockAheadOfChain { .. } => "tx_block_ahead_of_chain",
            BridgeError::NoMatchingWithdrawal => "no_matching_withdrawal",
            BridgeError::BlockHashMismatch => "block_hash_mismatch",
            BridgeError::ReceiverMismatch => "receiver_mismatch",
            BridgeError::AmountMismatch => "amount_mismatch",
            BridgeError::InsufficientConfirmations { .. } => "insufficient_confirmations",
            BridgeError::InvalidAmount => "invalid_amount",
            BridgeError::SyncCancelled => "sync_cancelled",
            BridgeError::StorageError(_) => "storage_error",
            BridgeError::SigningError(_) => "signing_error",
            BridgeError::InternalError(_) => "internal_error",
            BridgeError::Generic(_) => "generic",
        }
    }

    /// Whether the error only means the light client currently lacks peers.
    pub fn is_no_peers(&self) -> bool {
        matches!(self, BridgeError::NoPeersAvailable)
    }
}

pub type BridgeResult<T> = Result<T, BridgeError>;

fn is_no_peers_message(message: &str) -> bool {
    message.contains(NO_PEERS_MESSAGE)
}

impl From<ProviderError> for BridgeError {
    fn from(e: ProviderError) -> Self {
        let message = e.to_string();
        if is_no_peers_message(&message) {
            return BridgeError::NoPeersAvailable;
        }
        BridgeError::ProviderError(format!("{:?}", e))
    }
}

impl<M: Middleware> From<ContractError<M>> for BridgeError {
    fn from(e: ContractError<M>) -> Self {
        let message = e.to_string();
        if is_no_peers_message(&message) {
            return BridgeError::NoPeersAvailable;
        }
        BridgeError::ProviderError(format!("{:?}", e))
    }
}

impl From<WalletError> for BridgeError {
    fn from(e: WalletError) -> Self {
        BridgeError::SigningError(e.to_string())
    }
}

impl From<std::io::Error> for BridgeError {
    fn from(e: std::io::Error) -> Self {
        BridgeError::StorageError(e.to_string())
    }
}

impl From<anyhow::Error> for BridgeError {
    fn from(e: anyhow::Error) -> Self {
        BridgeError::Generic(format!("{:#}", e))
    }
}
