// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

#![allow(clippy::too_many_arguments)]

pub mod abi;
pub mod bridge_contract;
pub mod buffer;
pub mod config;
pub mod coordinator;
pub mod denomination;
pub mod error;
pub mod eth_client;
pub mod metered_eth_provider;
pub mod metrics;
pub mod networks;
pub mod node;
pub mod persist;
pub mod retry;
pub mod types;
pub mod validator;

#[cfg(test)]
pub mod eth_mock_provider;

#[cfg(test)]
pub(crate) mod test_utils;
