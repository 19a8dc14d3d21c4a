// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::types::WithdrawEvent;
use ethers::contract::{abigen, parse_log, EthLogDecode};
use ethers::types::Log;

// Wrapped TFT token deployed on the foreign chain.
abigen!(
    TTFT20,
    r#"[
        function mintTokens(address receiver, uint256 tokens, string txid)
        function registerWithdrawalAddress(address addr)
        function transfer(address to, uint256 tokens) returns (bool)
        function isMintID(string _txid) view returns (bool)
        function isWithdrawalAddress(address _addr) view returns (bool)
        function balanceOf(address tokenOwner) view returns (uint256)
        function totalSupply() view returns (uint256)
        function decimals() view returns (uint8)
        event Transfer(address indexed from, address indexed to, uint256 tokens)
        event RegisterWithdrawalAddress(address indexed addr)
        event Mint(address indexed receiver, uint256 tokens, string indexed txid)
        event Withdraw(address indexed from, address indexed receiver, uint256 tokens)
    ]"#
);

/// Decodes a contract log into `D`. Logs flagged as removed by a reorg and
/// logs of other events yield `None`.
pub fn decode_live_log<D: EthLogDecode>(log: &Log) -> Option<D> {
    if log.removed == Some(true) {
        return None;
    }
    parse_log::<D>(log.clone()).ok()
}

impl WithdrawEvent {
    /// Builds the event from a mined Withdraw log. Pending logs carry no
    /// block information and are rejected.
    pub fn try_from_log(log: &Log) -> Option<Self> {
        let decoded: WithdrawFilter = decode_live_log(log)?;
        Some(Self {
            sender: decoded.from,
            receiver: decoded.receiver,
            amount: decoded.tokens,
            tx_hash: log.transaction_hash?,
            block_hash: log.block_hash?,
            block_height: log.block_number?.as_u64(),
        })
    }
}
