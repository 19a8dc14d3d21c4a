// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Home-chain (tfchain) data model as seen by the bridge, plus the decoded
//! foreign-chain withdraw event.

use ethers::types::{Address as EthAddress, TxHash, H256, U256};
use fastcrypto::hash::{Blake2b256, HashFunction};
use serde::{Deserialize, Serialize};
use serde_with::{hex::Hex, serde_as};
use std::fmt;

pub const HASH_SIZE: usize = 32;
pub const ERC20_ADDRESS_LENGTH: usize = 20;

/// Transaction versions of the bridge-related home-chain transactions.
pub const TRANSACTION_VERSION_ERC20_CONVERSION: u8 = 208;
pub const TRANSACTION_VERSION_ERC20_COIN_CREATION: u8 = 209;
pub const TRANSACTION_VERSION_ERC20_ADDRESS_REGISTRATION: u8 = 210;

/// Unlock hash type of a single public key condition.
pub const UNLOCK_TYPE_PUBKEY: u8 = 1;

macro_rules! hash_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[serde_as]
        #[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(#[serde_as(as = "Hex")] pub [u8; HASH_SIZE]);

        impl $name {
            pub fn new(bytes: [u8; HASH_SIZE]) -> Self {
                Self(bytes)
            }

            pub fn as_bytes(&self) -> &[u8; HASH_SIZE] {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", hex::encode(self.0))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), hex::encode(self.0))
            }
        }
    };
}

hash_id!(
    /// Identifier of a consensus change delivered by the home chain.
    ConsensusChangeId
);
hash_id!(BlockId);
hash_id!(TransactionId);

/// Foreign-chain 32-byte hash (block or transaction) as embedded in
/// home-chain transactions.
pub type Erc20Hash = H256;

/// Foreign-chain address as embedded in home-chain transactions.
pub type Erc20Address = EthAddress;

/// Amount in smallest units of either chain.
pub type Currency = U256;

/// Sia-style public key: 16 byte algorithm specifier followed by the key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKey {
    pub algorithm: [u8; 16],
    pub key: Vec<u8>,
}

impl PublicKey {
    pub fn ed25519(key: [u8; 32]) -> Self {
        let mut algorithm = [0u8; 16];
        algorithm[..7].copy_from_slice(b"ed25519");
        Self {
            algorithm,
            key: key.to_vec(),
        }
    }

    // algorithm || u64 LE key length || key
    fn binary_encoding(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(16 + 8 + self.key.len());
        buf.extend_from_slice(&self.algorithm);
        buf.extend_from_slice(&(self.key.len() as u64).to_le_bytes());
        buf.extend_from_slice(&self.key);
        buf
    }
}

/// Home-chain address.
#[serde_as]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UnlockHash {
    pub kind: u8,
    #[serde_as(as = "Hex")]
    pub hash: [u8; HASH_SIZE],
}

impl UnlockHash {
    pub fn from_public_key(pk: &PublicKey) -> Self {
        Self {
            kind: UNLOCK_TYPE_PUBKEY,
            hash: Blake2b256::digest(pk.binary_encoding()).digest,
        }
    }
}

impl fmt::Display for UnlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02x}{}", self.kind, hex::encode(self.hash))
    }
}

/// Foreign address derived from a home-chain address: the trailing 20 bytes
/// of the blake2b-256 hash of the unlock hash.
pub fn erc20_address_from_unlock_hash(uh: &UnlockHash) -> Erc20Address {
    let mut encoded = Vec::with_capacity(1 + HASH_SIZE);
    encoded.push(uh.kind);
    encoded.extend_from_slice(&uh.hash);
    let digest = Blake2b256::digest(encoded).digest;
    EthAddress::from_slice(&digest[HASH_SIZE - ERC20_ADDRESS_LENGTH..])
}

/// Foreign address a home-chain public key withdraws to.
pub fn erc20_address_from_public_key(pk: &PublicKey) -> Erc20Address {
    erc20_address_from_unlock_hash(&UnlockHash::from_public_key(pk))
}

/// Pledges home-chain coins in exchange for foreign tokens.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Erc20ConvertTransaction {
    pub address: Erc20Address,
    pub value: Currency,
    pub transaction_fee: Currency,
}

/// Registers the foreign withdrawal address derived from `public_key`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Erc20AddressRegistrationTransaction {
    pub public_key: PublicKey,
    pub registration_fee: Currency,
    pub transaction_fee: Currency,
}

/// Creates home-chain coins backed by a foreign-chain withdrawal.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Erc20CoinCreationTransaction {
    pub address: UnlockHash,
    pub value: Currency,
    pub transaction_fee: Currency,
    pub transaction_id: Erc20Hash,
    pub block_id: Erc20Hash,
}

impl Erc20CoinCreationTransaction {
    /// Total amount the foreign withdrawal must account for. The contract does
    /// not know which part went to fees, so the fee is included.
    pub fn claimed_amount(&self) -> Currency {
        self.value.saturating_add(self.transaction_fee)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionBody {
    Erc20Convert(Erc20ConvertTransaction),
    Erc20AddressRegistration(Erc20AddressRegistrationTransaction),
    Erc20CoinCreation(Erc20CoinCreationTransaction),
    Other { version: u8 },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub body: TransactionBody,
}

impl Transaction {
    pub fn version(&self) -> u8 {
        match &self.body {
            TransactionBody::Erc20Convert(_) => TRANSACTION_VERSION_ERC20_CONVERSION,
            TransactionBody::Erc20AddressRegistration(_) => {
                TRANSACTION_VERSION_ERC20_ADDRESS_REGISTRATION
            }
            TransactionBody::Erc20CoinCreation(_) => TRANSACTION_VERSION_ERC20_COIN_CREATION,
            TransactionBody::Other { version } => *version,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub id: BlockId,
    pub parent_id: BlockId,
    pub transactions: Vec<Transaction>,
}

/// A range of blocks applied to and reverted from the home chain, delivered
/// serially by the consensus set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConsensusChange {
    pub id: ConsensusChangeId,
    pub reverted_blocks: Vec<Block>,
    pub applied_blocks: Vec<Block>,
}

/// Withdraw event decoded from the foreign-chain contract log.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WithdrawEvent {
    pub sender: EthAddress,
    pub receiver: EthAddress,
    pub amount: U256,
    pub tx_hash: TxHash,
    pub block_hash: H256,
    pub block_height: u64,
}
