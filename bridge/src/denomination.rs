// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Amount conversion between home-chain and foreign-chain precision.
//!
//! Conversions go through whole coins: the amount is truncated to whole
//! units of the source chain, then scaled to the target chain. Remainders
//! below one coin are dropped, never rounded up.

use ethers::types::U256;

/// Decimal places of the home-chain coin.
pub const HOME_DECIMALS: u32 = 9;
/// Decimal places of the wrapped ERC20 token.
pub const FOREIGN_DECIMALS: u32 = 18;

pub fn home_precision() -> U256 {
    U256::exp10(HOME_DECIMALS as usize)
}

pub fn foreign_precision() -> U256 {
    U256::exp10(FOREIGN_DECIMALS as usize)
}

/// Home units to foreign units. `None` on overflow.
pub fn to_foreign_units(home_amount: U256) -> Option<U256> {
    let coins = home_amount / home_precision();
    coins.checked_mul(foreign_precision())
}

/// Foreign units to home units. `None` on overflow.
pub fn to_home_units(foreign_amount: U256) -> Option<U256> {
    let coins = foreign_amount / foreign_precision();
    coins.checked_mul(home_precision())
}

/// Renders `amount` with `decimals` decimal places, trailing zeros trimmed.
pub fn denominate(amount: U256, decimals: u32) -> String {
    let precision = U256::exp10(decimals as usize);
    let whole = amount / precision;
    let fraction = amount % precision;
    if fraction.is_zero() {
        return whole.to_string();
    }
    let fraction = format!("{:0>width$}", fraction.to_string(), width = decimals as usize);
    format!("{}.{}", whole, fraction.trim_end_matches('0'))
}
