//! Fixed-rate swap router standing in for the forked venue.
//!
//! Each token pair carries a constant rational rate, so routing is frictionless: the quoted output of an
//! exact-input swap is exactly `amount_in * numerator / denominator` per hop.

use std::collections::BTreeMap;

use alloy_primitives::{Address, U256};

use super::ledger::Ledger;
use crate::{errors::SettlementError, factory::SwapCall};

/// `amount_out = amount_in * numerator / denominator`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Rate {
    pub numerator: U256,
    pub denominator: U256,
}

impl Rate {
    pub fn new(numerator: u64, denominator: u64) -> Self {
        Self {
            numerator: U256::from(numerator),
            denominator: U256::from(denominator),
        }
    }

    fn out(&self, amount_in: U256) -> Result<U256, SettlementError> {
        amount_in
            .checked_mul(self.numerator)
            .and_then(|v| v.checked_div(self.denominator))
            .ok_or_else(|| revert("MATH_OVERFLOW"))
    }

    /// Smallest input whose output covers `amount_out`.
    fn input_for(&self, amount_out: U256) -> Result<U256, SettlementError> {
        if self.numerator.is_zero() {
            return Err(revert("INSUFFICIENT_LIQUIDITY"));
        }
        let scaled = amount_out
            .checked_mul(self.denominator)
            .ok_or_else(|| revert("MATH_OVERFLOW"))?;
        let quotient = scaled / self.numerator;
        if (scaled % self.numerator).is_zero() {
            Ok(quotient)
        } else {
            Ok(quotient + U256::from(1u64))
        }
    }
}

/// Amounts actually moved by one swap.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SwapFill {
    pub amount_in: U256,
    pub amount_out: U256,
}

fn revert(reason: &str) -> SettlementError {
    SettlementError::VenueReverted(format!("UniswapV2Router: {reason}"))
}

#[derive(Clone, Debug)]
pub struct Venue {
    address: Address,
    weth: Address,
    rates: BTreeMap<(Address, Address), Rate>,
}

impl Venue {
    pub fn new(address: Address, weth: Address) -> Self {
        Self {
            address,
            weth,
            rates: BTreeMap::new(),
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn weth(&self) -> Address {
        self.weth
    }

    pub fn set_rate(&mut self, token_in: Address, token_out: Address, rate: Rate) {
        self.rates.insert((token_in, token_out), rate);
    }

    fn rate(&self, token_in: Address, token_out: Address) -> Result<Rate, SettlementError> {
        self.rates
            .get(&(token_in, token_out))
            .copied()
            .ok_or_else(|| revert("INVALID_PATH"))
    }

    /// Output of an exact-input swap along `path`.
    pub fn amount_out(&self, path: &[Address], amount_in: U256) -> Result<U256, SettlementError> {
        if path.len() < 2 {
            return Err(revert("INVALID_PATH"));
        }
        path.windows(2)
            .try_fold(amount_in, |amount, hop| self.rate(hop[0], hop[1])?.out(amount))
    }

    /// Input required by an exact-output swap along `path`.
    pub fn amount_in(&self, path: &[Address], amount_out: U256) -> Result<U256, SettlementError> {
        if path.len() < 2 {
            return Err(revert("INVALID_PATH"));
        }
        path.windows(2)
            .rev()
            .try_fold(amount_out, |amount, hop| self.rate(hop[0], hop[1])?.input_for(amount))
    }

    /// Execute `call` on behalf of `caller`. Token inputs are pulled from `caller` (which must already
    /// hold them); native input is the call value held by `caller`. Unspent native value stays with
    /// `caller`.
    pub fn swap(
        &self,
        ledger: &mut Ledger,
        caller: Address,
        call: &SwapCall,
        timestamp: u64,
    ) -> Result<SwapFill, SettlementError> {
        if call.deadline() < U256::from(timestamp) {
            return Err(revert("EXPIRED"));
        }
        let path = call.path();
        let (first, last) = match (path.first(), path.last()) {
            (Some(first), Some(last)) if path.len() >= 2 => (*first, *last),
            _ => return Err(revert("INVALID_PATH")),
        };

        let fill = match call {
            SwapCall::ExactTokensForTokens { amount_in, amount_out_min, .. }
            | SwapCall::ExactTokensForEth { amount_in, amount_out_min, .. } => {
                let out = self.amount_out(path, *amount_in)?;
                if out < *amount_out_min {
                    return Err(revert("INSUFFICIENT_OUTPUT_AMOUNT"));
                }
                SwapFill { amount_in: *amount_in, amount_out: out }
            }
            SwapCall::TokensForExactTokens { amount_out, amount_in_max, .. }
            | SwapCall::TokensForExactEth { amount_out, amount_in_max, .. } => {
                let needed = self.amount_in(path, *amount_out)?;
                if needed > *amount_in_max {
                    return Err(revert("EXCESSIVE_INPUT_AMOUNT"));
                }
                SwapFill { amount_in: needed, amount_out: *amount_out }
            }
            SwapCall::ExactEthForTokens { value, amount_out_min, .. } => {
                let out = self.amount_out(path, *value)?;
                if out < *amount_out_min {
                    return Err(revert("INSUFFICIENT_OUTPUT_AMOUNT"));
                }
                SwapFill { amount_in: *value, amount_out: out }
            }
            SwapCall::EthForExactTokens { value, amount_out, .. } => {
                let needed = self.amount_in(path, *amount_out)?;
                if needed > *value {
                    return Err(revert("EXCESSIVE_INPUT_AMOUNT"));
                }
                SwapFill { amount_in: needed, amount_out: *amount_out }
            }
        };

        let native_in = matches!(
            call,
            SwapCall::ExactEthForTokens { .. } | SwapCall::EthForExactTokens { .. }
        );
        let native_out = matches!(
            call,
            SwapCall::ExactTokensForEth { .. } | SwapCall::TokensForExactEth { .. }
        );
        if native_in && first != self.weth {
            return Err(revert("INVALID_PATH"));
        }
        if native_out && last != self.weth {
            return Err(revert("INVALID_PATH"));
        }

        if native_in {
            ledger.transfer_native(caller, self.address, fill.amount_in)?;
        } else {
            ledger.transfer_token(first, caller, self.address, fill.amount_in)?;
        }
        if native_out {
            ledger.transfer_native(self.address, call.recipient(), fill.amount_out)?;
        } else {
            ledger.transfer_token(last, self.address, call.recipient(), fill.amount_out)?;
        }

        tracing::debug!(
            venue = %self.address,
            amount_in = %fill.amount_in,
            amount_out = %fill.amount_out,
            "venue swap filled"
        );
        Ok(fill)
    }
}
