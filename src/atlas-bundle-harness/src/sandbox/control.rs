//! The policy under test and the solver contracts that compete for it.

use alloy_primitives::{Address, Log, U256};
use alloy_sol_types::SolEvent;
use atlas_operation_types::{CallConfig, DAppConfig, TokensRewarded, UserOperation};
use serde::{Deserialize, Serialize};

use super::ledger::Ledger;
use crate::errors::{SettlementError, SolverRejection};

/// Swap-with-reward DApp control: the winning solver's bid is forwarded to the user in the reward token.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SwapRewardControl {
    pub address: Address,
    /// Party allowed to register as governance and sign dapp operations.
    pub signatory: Address,
    pub call_config: CallConfig,
    pub reward_token: Address,
    pub solver_gas_limit: u32,
}

impl SwapRewardControl {
    pub fn bid_format(&self, _user_op: &UserOperation) -> Address {
        self.reward_token
    }

    pub fn dapp_config(&self) -> DAppConfig {
        DAppConfig {
            to: self.address,
            callConfig: self.call_config.bits(),
            bidToken: self.reward_token,
            solverGasLimit: self.solver_gas_limit,
        }
    }

    /// Pay the bid held by the execution environment to `user` and emit `TokensRewarded` from the control.
    pub fn allocate_value(
        &self,
        ledger: &mut Ledger,
        execution_environment: Address,
        user: Address,
        bid_token: Address,
        bid_amount: U256,
    ) -> Result<Log, SettlementError> {
        ledger.transfer_token(bid_token, execution_environment, user, bid_amount)?;
        let event = TokensRewarded {
            user,
            token: bid_token,
            amount: bid_amount,
        };
        Ok(Log {
            address: self.address,
            data: event.encode_log_data(),
        })
    }
}

/// How a registered solver contract reacts to `solve()`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolverBehaviour {
    /// Transfers its bid in the bid token to the execution environment.
    #[default]
    PayBid,
    /// Reverts without paying.
    Revert,
    /// Returns successfully without paying the bid.
    Underpay,
}

impl SolverBehaviour {
    pub fn solve(
        self,
        ledger: &mut Ledger,
        solver_contract: Address,
        execution_environment: Address,
        bid_token: Address,
        bid_amount: U256,
    ) -> Result<(), SolverRejection> {
        match self {
            SolverBehaviour::Revert => Err(SolverRejection::Reverted),
            SolverBehaviour::Underpay => Err(SolverRejection::BidNotPaid { amount: bid_amount }),
            SolverBehaviour::PayBid => ledger
                .transfer_token(bid_token, solver_contract, execution_environment, bid_amount)
                .map_err(|_| SolverRejection::BidNotPaid { amount: bid_amount }),
        }
    }
}
