//! Operation Factory: turns scenario parameters into unsigned operation records.
//!
//! Venue calldata comes from a closed set of [`SwapCall`] variants, one per router calling
//! convention, so every payload is built from typed ABI calls.

use alloy_primitives::{Address, Bytes, B256, U256};
use alloy_sol_types::{SolCall, SolInterface};
use atlas_operation_types::{
    Asset, CallConfig, CallConfigFlag, DAppConfig, DAppOperation, ISwapSolver,
    IUniswapV2Router02::{self, IUniswapV2Router02Calls},
    SolverOperation, UserOperation,
};
use serde::{Deserialize, Serialize};

use crate::{bundle::Signed, hashing::call_chain_hash};

/// How the declared output amount binds the swap.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputBound {
    /// Output must be at least the declared amount (exact-input swap).
    Minimum,
    /// Output must be exactly the declared amount (exact-output swap).
    Exact,
}

impl OutputBound {
    pub fn describe(self) -> &'static str {
        match self {
            OutputBound::Minimum => "at least",
            OutputBound::Exact => "exactly",
        }
    }
}

/// What the user wants swapped.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapIntent {
    pub input: Asset,
    /// Exact input for [`OutputBound::Minimum`], maximum input for [`OutputBound::Exact`].
    pub amount_in: U256,
    pub output: Asset,
    pub amount_out: U256,
    pub bound: OutputBound,
    pub recipient: Address,
    /// Blocks until the operations expire.
    pub deadline_offset: u64,
}

/// Router calls the factory can produce.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SwapCall {
    ExactTokensForTokens {
        amount_in: U256,
        amount_out_min: U256,
        path: Vec<Address>,
        to: Address,
        deadline: U256,
    },
    TokensForExactTokens {
        amount_out: U256,
        amount_in_max: U256,
        path: Vec<Address>,
        to: Address,
        deadline: U256,
    },
    ExactEthForTokens {
        value: U256,
        amount_out_min: U256,
        path: Vec<Address>,
        to: Address,
        deadline: U256,
    },
    EthForExactTokens {
        value: U256,
        amount_out: U256,
        path: Vec<Address>,
        to: Address,
        deadline: U256,
    },
    ExactTokensForEth {
        amount_in: U256,
        amount_out_min: U256,
        path: Vec<Address>,
        to: Address,
        deadline: U256,
    },
    TokensForExactEth {
        amount_out: U256,
        amount_in_max: U256,
        path: Vec<Address>,
        to: Address,
        deadline: U256,
    },
}

impl SwapCall {
    /// Pick the router entry point for an intent. Native legs are routed through `weth`.
    pub fn for_intent(intent: &SwapIntent, weth: Address, deadline: U256) -> Self {
        let leg = |asset: Asset| asset.token().unwrap_or(weth);
        let path = vec![leg(intent.input), leg(intent.output)];
        let to = intent.recipient;
        match (intent.input, intent.output, intent.bound) {
            (Asset::Native, _, OutputBound::Minimum) => SwapCall::ExactEthForTokens {
                value: intent.amount_in,
                amount_out_min: intent.amount_out,
                path,
                to,
                deadline,
            },
            (Asset::Native, _, OutputBound::Exact) => SwapCall::EthForExactTokens {
                value: intent.amount_in,
                amount_out: intent.amount_out,
                path,
                to,
                deadline,
            },
            (Asset::Token(_), Asset::Native, OutputBound::Minimum) => SwapCall::ExactTokensForEth {
                amount_in: intent.amount_in,
                amount_out_min: intent.amount_out,
                path,
                to,
                deadline,
            },
            (Asset::Token(_), Asset::Native, OutputBound::Exact) => SwapCall::TokensForExactEth {
                amount_out: intent.amount_out,
                amount_in_max: intent.amount_in,
                path,
                to,
                deadline,
            },
            (Asset::Token(_), Asset::Token(_), OutputBound::Minimum) => {
                SwapCall::ExactTokensForTokens {
                    amount_in: intent.amount_in,
                    amount_out_min: intent.amount_out,
                    path,
                    to,
                    deadline,
                }
            }
            (Asset::Token(_), Asset::Token(_), OutputBound::Exact) => {
                SwapCall::TokensForExactTokens {
                    amount_out: intent.amount_out,
                    amount_in_max: intent.amount_in,
                    path,
                    to,
                    deadline,
                }
            }
        }
    }

    /// ABI-encoded router calldata.
    pub fn encode(&self) -> Bytes {
        let encoded = match self.clone() {
            SwapCall::ExactTokensForTokens { amount_in, amount_out_min, path, to, deadline } => {
                IUniswapV2Router02::swapExactTokensForTokensCall {
                    amountIn: amount_in,
                    amountOutMin: amount_out_min,
                    path,
                    to,
                    deadline,
                }
                .abi_encode()
            }
            SwapCall::TokensForExactTokens { amount_out, amount_in_max, path, to, deadline } => {
                IUniswapV2Router02::swapTokensForExactTokensCall {
                    amountOut: amount_out,
                    amountInMax: amount_in_max,
                    path,
                    to,
                    deadline,
                }
                .abi_encode()
            }
            SwapCall::ExactEthForTokens { amount_out_min, path, to, deadline, .. } => {
                IUniswapV2Router02::swapExactETHForTokensCall {
                    amountOutMin: amount_out_min,
                    path,
                    to,
                    deadline,
                }
                .abi_encode()
            }
            SwapCall::EthForExactTokens { amount_out, path, to, deadline, .. } => {
                IUniswapV2Router02::swapETHForExactTokensCall {
                    amountOut: amount_out,
                    path,
                    to,
                    deadline,
                }
                .abi_encode()
            }
            SwapCall::ExactTokensForEth { amount_in, amount_out_min, path, to, deadline } => {
                IUniswapV2Router02::swapExactTokensForETHCall {
                    amountIn: amount_in,
                    amountOutMin: amount_out_min,
                    path,
                    to,
                    deadline,
                }
                .abi_encode()
            }
            SwapCall::TokensForExactEth { amount_out, amount_in_max, path, to, deadline } => {
                IUniswapV2Router02::swapTokensForExactETHCall {
                    amountOut: amount_out,
                    amountInMax: amount_in_max,
                    path,
                    to,
                    deadline,
                }
                .abi_encode()
            }
        };
        encoded.into()
    }

    /// Decode router calldata; `value` is the native amount attached to the call.
    pub fn decode(data: &[u8], value: U256) -> Result<Self, alloy_sol_types::Error> {
        let call = match IUniswapV2Router02Calls::abi_decode(data, true)? {
            IUniswapV2Router02Calls::swapExactTokensForTokens(c) => SwapCall::ExactTokensForTokens {
                amount_in: c.amountIn,
                amount_out_min: c.amountOutMin,
                path: c.path,
                to: c.to,
                deadline: c.deadline,
            },
            IUniswapV2Router02Calls::swapTokensForExactTokens(c) => SwapCall::TokensForExactTokens {
                amount_out: c.amountOut,
                amount_in_max: c.amountInMax,
                path: c.path,
                to: c.to,
                deadline: c.deadline,
            },
            IUniswapV2Router02Calls::swapExactETHForTokens(c) => SwapCall::ExactEthForTokens {
                value,
                amount_out_min: c.amountOutMin,
                path: c.path,
                to: c.to,
                deadline: c.deadline,
            },
            IUniswapV2Router02Calls::swapETHForExactTokens(c) => SwapCall::EthForExactTokens {
                value,
                amount_out: c.amountOut,
                path: c.path,
                to: c.to,
                deadline: c.deadline,
            },
            IUniswapV2Router02Calls::swapExactTokensForETH(c) => SwapCall::ExactTokensForEth {
                amount_in: c.amountIn,
                amount_out_min: c.amountOutMin,
                path: c.path,
                to: c.to,
                deadline: c.deadline,
            },
            IUniswapV2Router02Calls::swapTokensForExactETH(c) => SwapCall::TokensForExactEth {
                amount_out: c.amountOut,
                amount_in_max: c.amountInMax,
                path: c.path,
                to: c.to,
                deadline: c.deadline,
            },
        };
        Ok(call)
    }

    /// Native value that must accompany the call.
    pub fn native_value(&self) -> U256 {
        match self {
            SwapCall::ExactEthForTokens { value, .. } | SwapCall::EthForExactTokens { value, .. } => *value,
            _ => U256::ZERO,
        }
    }

    /// Token pulled from the user before the call, with the amount.
    pub fn token_input(&self) -> Option<(Address, U256)> {
        match self {
            SwapCall::ExactTokensForTokens { amount_in, path, .. }
            | SwapCall::ExactTokensForEth { amount_in, path, .. } => {
                path.first().map(|token| (*token, *amount_in))
            }
            SwapCall::TokensForExactTokens { amount_in_max, path, .. }
            | SwapCall::TokensForExactEth { amount_in_max, path, .. } => {
                path.first().map(|token| (*token, *amount_in_max))
            }
            SwapCall::ExactEthForTokens { .. } | SwapCall::EthForExactTokens { .. } => None,
        }
    }

    pub fn path(&self) -> &[Address] {
        match self {
            SwapCall::ExactTokensForTokens { path, .. }
            | SwapCall::TokensForExactTokens { path, .. }
            | SwapCall::ExactEthForTokens { path, .. }
            | SwapCall::EthForExactTokens { path, .. }
            | SwapCall::ExactTokensForEth { path, .. }
            | SwapCall::TokensForExactEth { path, .. } => path,
        }
    }

    pub fn recipient(&self) -> Address {
        match self {
            SwapCall::ExactTokensForTokens { to, .. }
            | SwapCall::TokensForExactTokens { to, .. }
            | SwapCall::ExactEthForTokens { to, .. }
            | SwapCall::EthForExactTokens { to, .. }
            | SwapCall::ExactTokensForEth { to, .. }
            | SwapCall::TokensForExactEth { to, .. } => *to,
        }
    }

    /// Router deadline (unix seconds).
    pub fn deadline(&self) -> U256 {
        match self {
            SwapCall::ExactTokensForTokens { deadline, .. }
            | SwapCall::TokensForExactTokens { deadline, .. }
            | SwapCall::ExactEthForTokens { deadline, .. }
            | SwapCall::EthForExactTokens { deadline, .. }
            | SwapCall::ExactTokensForEth { deadline, .. }
            | SwapCall::TokensForExactEth { deadline, .. } => *deadline,
        }
    }
}

/// Chain position the operations are built against.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BlockEnv {
    pub number: u64,
    pub timestamp: u64,
}

/// Gas and expiry defaults applied to every operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationDefaults {
    pub user_gas: U256,
    pub max_fee_per_gas: U256,
    /// Seconds added to the block timestamp for the router deadline.
    pub router_deadline_secs: u64,
}

impl Default for OperationDefaults {
    fn default() -> Self {
        Self {
            user_gas: U256::from(1_000_000u64),
            max_fee_per_gas: U256::from(1_000_000_000_000u64),
            router_deadline_secs: 999,
        }
    }
}

/// Builds well-formed, unsigned operation records.
#[derive(Clone, Debug)]
pub struct OperationFactory {
    /// Settlement entry point every operation is addressed to.
    pub atlas: Address,
    pub venue: Address,
    pub weth: Address,
    pub defaults: OperationDefaults,
}

impl OperationFactory {
    pub fn new(atlas: Address, venue: Address, weth: Address) -> Self {
        Self {
            atlas,
            venue,
            weth,
            defaults: OperationDefaults::default(),
        }
    }

    #[must_use]
    pub fn with_defaults(mut self, defaults: OperationDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn swap_call(&self, intent: &SwapIntent, block: BlockEnv) -> SwapCall {
        let deadline = U256::from(block.timestamp.saturating_add(self.defaults.router_deadline_secs));
        SwapCall::for_intent(intent, self.weth, deadline)
    }

    /// User operation with an empty signature.
    pub fn user_operation(
        &self,
        user: Address,
        nonce: U256,
        block: BlockEnv,
        control: Address,
        call_config: CallConfig,
        intent: &SwapIntent,
    ) -> UserOperation {
        let call = self.swap_call(intent, block);
        UserOperation {
            from: user,
            to: self.atlas,
            value: call.native_value(),
            gas: self.defaults.user_gas,
            maxFeePerGas: self.defaults.max_fee_per_gas,
            nonce,
            deadline: U256::from(block.number.saturating_add(intent.deadline_offset)),
            dapp: self.venue,
            control,
            callConfig: call_config.bits(),
            sessionKey: Address::ZERO,
            data: call.encode(),
            signature: Bytes::new(),
        }
    }

    /// Solver operation bound to `user_op_hash`, bidding in `bid_token` (the control's bid format),
    /// with an empty signature.
    #[allow(clippy::too_many_arguments)]
    pub fn solver_operation(
        &self,
        solver: Address,
        solver_contract: Address,
        user_op: &UserOperation,
        user_op_hash: B256,
        config: &DAppConfig,
        bid_token: Address,
        bid_amount: U256,
    ) -> SolverOperation {
        SolverOperation {
            from: solver,
            to: self.atlas,
            value: U256::ZERO,
            gas: U256::from(config.solverGasLimit),
            maxFeePerGas: user_op.maxFeePerGas,
            deadline: user_op.deadline,
            solver: solver_contract,
            control: user_op.control,
            userOpHash: user_op_hash,
            bidToken: bid_token,
            bidAmount: bid_amount,
            data: ISwapSolver::solveCall {}.abi_encode().into(),
            signature: Bytes::new(),
        }
    }

    /// Governance authorization. Takes the already-signed user and solver records, so it can
    /// only be built once both are final.
    #[allow(clippy::too_many_arguments)]
    pub fn dapp_operation(
        &self,
        governance: Address,
        user_op: &Signed<UserOperation>,
        solver_ops: &[Signed<SolverOperation>],
        user_op_hash: B256,
        config: &DAppConfig,
        bundler: Address,
        nonce: U256,
    ) -> DAppOperation {
        let call_chain = if CallConfig(config.callConfig).has(CallConfigFlag::VerifyCallChainHash) {
            let solvers: Vec<SolverOperation> =
                solver_ops.iter().map(|op| op.record().clone()).collect();
            call_chain_hash(user_op.record(), &solvers)
        } else {
            B256::ZERO
        };
        DAppOperation {
            from: governance,
            to: self.atlas,
            nonce,
            deadline: user_op.deadline,
            control: user_op.control,
            bundler,
            userOpHash: user_op_hash,
            callChainHash: call_chain,
            signature: Bytes::new(),
        }
    }
}
