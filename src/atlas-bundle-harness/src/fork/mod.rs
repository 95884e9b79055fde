//! Collaborators backed by a forked node (anvil-style JSON-RPC).
//!
//! Reads go through `eth_call`, writes are sent as impersonated transactions, and snapshots map to
//! `evm_snapshot` / `evm_revert`. The harness is synchronous, so every request is driven to completion
//! on a private tokio runtime.

use std::future::Future;

use alloy_primitives::{Address, Bytes, Log, B256, U256};
use alloy_sol_types::{SolCall, SolEvent};
use atlas_operation_types::{
    CallConfig, ChainState, DAppConfig, DAppOperation, IAtlas, IAtlasVerification, IDAppControl,
    IERC20, SnapshotId, SolverOperation, StateError, TokenContracts, TokensRewarded, UserOperation,
};
use ethers::{
    providers::{Http, Middleware, Provider},
    types::{
        BlockNumber, Bytes as EthersBytes, TransactionReceipt, TransactionRequest, H160,
        U256 as EthersU256, U64,
    },
};
use serde::{Deserialize, Serialize};
use tokio::runtime::Runtime;

use crate::{
    collaborators::{
        PolicyContract, SettlementEngine, SettlementReceipt, TxContext, VerificationRegistry,
    },
    errors::{EnvironmentError, SettlementError},
};

/// Endpoint of the forked node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ForkConfig {
    pub rpc_url: String,
    /// When set, the node must report this chain id.
    pub chain_id: Option<u64>,
}

impl ForkConfig {
    /// Read `RPC_URL` (required) and `CHAIN_ID` (optional), loading `.env` first when present.
    pub fn from_env() -> Result<Self, EnvironmentError> {
        dotenv::dotenv().ok();
        let rpc_url = std::env::var("RPC_URL")
            .ok()
            .filter(|url| !url.trim().is_empty())
            .ok_or(EnvironmentError::MissingRpcUrl)?;
        let chain_id = match std::env::var("CHAIN_ID") {
            Ok(raw) => Some(raw.trim().parse::<u64>().map_err(|e| {
                EnvironmentError::Unavailable(format!("CHAIN_ID `{raw}` is not a number: {e}"))
            })?),
            Err(_) => None,
        };
        Ok(Self { rpc_url, chain_id })
    }
}

/// Deployed protocol contracts on the fork.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForkAddresses {
    pub atlas: Address,
    pub verification: Address,
}

pub struct ForkEnvironment {
    runtime: Runtime,
    provider: Provider<Http>,
    addresses: ForkAddresses,
    chain_id: u64,
}

impl std::fmt::Debug for ForkEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForkEnvironment")
            .field("addresses", &self.addresses)
            .field("chain_id", &self.chain_id)
            .finish_non_exhaustive()
    }
}

fn h160(address: Address) -> H160 {
    H160::from_slice(address.as_slice())
}

fn from_h160(address: H160) -> Address {
    Address::from_slice(address.as_bytes())
}

fn to_ethers_u256(value: U256) -> EthersU256 {
    EthersU256::from_big_endian(&value.to_be_bytes::<32>())
}

fn from_ethers_u256(value: EthersU256) -> U256 {
    let mut buf = [0u8; 32];
    value.to_big_endian(&mut buf);
    U256::from_be_bytes(buf)
}

fn convert_logs(receipt: &TransactionReceipt) -> Vec<Log> {
    receipt
        .logs
        .iter()
        .map(|log| {
            Log::new_unchecked(
                from_h160(log.address),
                log.topics.iter().map(|topic| B256::from(topic.0)).collect(),
                Bytes::copy_from_slice(&log.data),
            )
        })
        .collect()
}

fn rpc_error(err: impl std::fmt::Display) -> SettlementError {
    SettlementError::Rpc(err.to_string())
}

fn backend_error(err: impl std::fmt::Display) -> StateError {
    StateError::Backend(err.to_string())
}

impl ForkEnvironment {
    /// Connect and check the chain id. Any failure here is fatal to the run.
    pub fn connect(config: &ForkConfig, addresses: ForkAddresses) -> Result<Self, EnvironmentError> {
        let provider =
            Provider::<Http>::try_from(config.rpc_url.as_str()).map_err(|e| EnvironmentError::InvalidRpcUrl {
                url: config.rpc_url.clone(),
                reason: e.to_string(),
            })?;
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let chain_id = runtime
            .block_on(provider.get_chainid())
            .map_err(|e| EnvironmentError::Unavailable(e.to_string()))?
            .as_u64();
        if let Some(expected) = config.chain_id {
            if expected != chain_id {
                return Err(EnvironmentError::ChainIdMismatch {
                    expected,
                    found: chain_id,
                });
            }
        }
        tracing::info!(rpc_url = %config.rpc_url, chain_id, atlas = %addresses.atlas, "connected to fork");
        Ok(Self {
            runtime,
            provider,
            addresses,
            chain_id,
        })
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn addresses(&self) -> ForkAddresses {
        self.addresses
    }

    /// Overwrite the native balance of `account` (`anvil_setBalance`).
    pub fn set_native_balance(&mut self, account: Address, amount: U256) -> Result<(), StateError> {
        self.block_on(
            self.provider
                .request::<_, ()>("anvil_setBalance", (h160(account), to_ethers_u256(amount))),
        )
        .map_err(backend_error)
    }

    fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }

    fn view<C: SolCall>(&self, to: Address, call: &C) -> Result<C::Return, SettlementError> {
        let tx = TransactionRequest::new()
            .to(h160(to))
            .data(EthersBytes::from(call.abi_encode()));
        let output = self
            .block_on(self.provider.call(&tx.into(), None))
            .map_err(rpc_error)?;
        C::abi_decode_returns(&output, true).map_err(rpc_error)
    }

    fn impersonate(&self, account: Address) -> Result<(), SettlementError> {
        self.block_on(
            self.provider
                .request::<_, ()>("anvil_impersonateAccount", [h160(account)]),
        )
        .map_err(rpc_error)
    }

    fn send<C: SolCall>(
        &self,
        tx: TxContext,
        to: Address,
        call: &C,
    ) -> Result<TransactionReceipt, SettlementError> {
        self.impersonate(tx.from)?;
        let request = TransactionRequest::new()
            .from(h160(tx.from))
            .to(h160(to))
            .value(to_ethers_u256(tx.value))
            .data(EthersBytes::from(call.abi_encode()));
        tracing::debug!(from = %tx.from, %to, function = C::SIGNATURE, "sending fork transaction");
        let receipt = self
            .block_on(async {
                let pending = self.provider.send_transaction(request, None).await?;
                pending.await
            })
            .map_err(|e| SettlementError::Reverted(e.to_string()))?
            .ok_or_else(|| SettlementError::Rpc("transaction dropped from the mempool".into()))?;
        if receipt.status != Some(U64::from(1u64)) {
            return Err(SettlementError::Reverted(format!(
                "{} reverted in {:?}",
                C::SIGNATURE,
                receipt.transaction_hash
            )));
        }
        Ok(receipt)
    }

    fn settlement_receipt(&self, tx: TxContext, receipt: &TransactionReceipt) -> SettlementReceipt {
        let logs = convert_logs(receipt);
        let fee = receipt
            .gas_used
            .zip(receipt.effective_gas_price)
            .map(|(gas, price)| from_ethers_u256(gas).saturating_mul(from_ethers_u256(price)))
            .unwrap_or_default();
        // The fork reports no per-solver results; a reward notification marks a winning solver.
        let auction_won = logs
            .iter()
            .any(|log| log.data.topics().first() == Some(&TokensRewarded::SIGNATURE_HASH));
        SettlementReceipt {
            auction_won,
            logs,
            sender: tx.from,
            fee_paid: fee,
            simulated: false,
            solver_outcomes: Vec::new(),
        }
    }
}

impl ChainState for ForkEnvironment {
    fn native_balance(&self, account: Address) -> Result<U256, StateError> {
        self.block_on(self.provider.get_balance(h160(account), None))
            .map(from_ethers_u256)
            .map_err(backend_error)
    }

    fn block_number(&self) -> Result<u64, StateError> {
        self.block_on(self.provider.get_block_number())
            .map(|number| number.as_u64())
            .map_err(backend_error)
    }

    fn block_timestamp(&self) -> Result<u64, StateError> {
        let block = self
            .block_on(self.provider.get_block(BlockNumber::Latest))
            .map_err(backend_error)?
            .ok_or_else(|| StateError::Backend("latest block unavailable".into()))?;
        Ok(block.timestamp.as_u64())
    }

    fn cumulative_surcharge(&self) -> Result<U256, StateError> {
        self.view(self.addresses.atlas, &IAtlas::cumulativeSurchargeCall {})
            .map(|ret| ret._0)
            .map_err(backend_error)
    }

    fn bonded_balance(&self, account: Address) -> Result<U256, StateError> {
        self.view(
            self.addresses.atlas,
            &IAtlas::balanceOfBondedCall { account },
        )
        .map(|ret| ret._0)
        .map_err(backend_error)
    }

    fn snapshot(&mut self) -> Result<SnapshotId, StateError> {
        let id: EthersU256 = self
            .block_on(self.provider.request("evm_snapshot", ()))
            .map_err(backend_error)?;
        Ok(SnapshotId(from_ethers_u256(id)))
    }

    fn revert_to(&mut self, id: SnapshotId) -> Result<(), StateError> {
        let reverted: bool = self
            .block_on(
                self.provider
                    .request("evm_revert", [to_ethers_u256(id.0)]),
            )
            .map_err(backend_error)?;
        if reverted {
            Ok(())
        } else {
            Err(StateError::UnknownSnapshot(id))
        }
    }
}

impl TokenContracts for ForkEnvironment {
    fn balance_of(&self, token: Address, owner: Address) -> Result<U256, StateError> {
        self.view(token, &IERC20::balanceOfCall { owner })
            .map(|ret| ret.balance)
            .map_err(backend_error)
    }

    fn allowance(&self, token: Address, owner: Address, spender: Address) -> Result<U256, StateError> {
        self.view(token, &IERC20::allowanceCall { owner, spender })
            .map(|ret| ret.remaining)
            .map_err(backend_error)
    }

    fn approve(
        &mut self,
        token: Address,
        owner: Address,
        spender: Address,
        amount: U256,
    ) -> Result<(), StateError> {
        self.send(
            TxContext::new(owner),
            token,
            &IERC20::approveCall { spender, amount },
        )
        .map(|_| ())
        .map_err(backend_error)
    }
}

impl SettlementEngine for ForkEnvironment {
    fn metacall(
        &mut self,
        tx: TxContext,
        user_op: &UserOperation,
        solver_ops: &[SolverOperation],
        dapp_op: &DAppOperation,
    ) -> Result<SettlementReceipt, SettlementError> {
        let call = IAtlas::metacallCall {
            userOp: user_op.clone(),
            solverOps: solver_ops.to_vec(),
            dAppOp: dapp_op.clone(),
        };
        let receipt = self.send(tx, self.addresses.atlas, &call)?;
        Ok(self.settlement_receipt(tx, &receipt))
    }

    /// The deployed engine only accepts `execute` from its own address, so a transaction from an
    /// external account always reverts. Bundles reach a fork through `metacall`.
    fn execute(
        &mut self,
        tx: TxContext,
        _config: &DAppConfig,
        _user_op: &UserOperation,
        _solver_ops: &[SolverOperation],
        _execution_environment: Address,
        _bundler: Address,
        _user_op_hash: B256,
        _is_simulation: bool,
    ) -> Result<SettlementReceipt, SettlementError> {
        tracing::warn!(from = %tx.from, "execute refused on fork");
        Err(SettlementError::ExecuteRestricted {
            entry_point: self.addresses.atlas,
        })
    }

    fn create_execution_environment(
        &mut self,
        tx: TxContext,
        user: Address,
        control: Address,
    ) -> Result<Address, SettlementError> {
        let call = IAtlas::createExecutionEnvironmentCall { user, control };
        let environment = self.view(self.addresses.atlas, &call)?.executionEnvironment;
        self.send(tx, self.addresses.atlas, &call)?;
        Ok(environment)
    }

    fn deposit(&mut self, tx: TxContext) -> Result<(), SettlementError> {
        self.send(tx, self.addresses.atlas, &IAtlas::depositCall {})
            .map(|_| ())
    }

    fn bond(&mut self, tx: TxContext, amount: U256) -> Result<(), SettlementError> {
        self.send(tx, self.addresses.atlas, &IAtlas::bondCall { amount })
            .map(|_| ())
    }

    fn entry_point(&self) -> Address {
        self.addresses.atlas
    }
}

impl VerificationRegistry for ForkEnvironment {
    fn user_operation_payload(&self, op: &UserOperation) -> Result<B256, SettlementError> {
        self.view(
            self.addresses.verification,
            &IAtlasVerification::getUserOperationPayloadCall { userOp: op.clone() },
        )
        .map(|ret| ret.payload)
    }

    fn solver_payload(&self, op: &SolverOperation) -> Result<B256, SettlementError> {
        self.view(
            self.addresses.verification,
            &IAtlasVerification::getSolverPayloadCall { solverOp: op.clone() },
        )
        .map(|ret| ret.payload)
    }

    fn dapp_operation_payload(&self, op: &DAppOperation) -> Result<B256, SettlementError> {
        self.view(
            self.addresses.verification,
            &IAtlasVerification::getDAppOperationPayloadCall { dAppOp: op.clone() },
        )
        .map(|ret| ret.payload)
    }

    fn user_operation_hash(&self, op: &UserOperation) -> Result<B256, SettlementError> {
        self.view(
            self.addresses.verification,
            &IAtlasVerification::getUserOperationHashCall { userOp: op.clone() },
        )
        .map(|ret| ret.hash)
    }

    fn user_next_nonce(&self, user: Address, sequential: bool) -> Result<U256, SettlementError> {
        self.view(
            self.addresses.verification,
            &IAtlasVerification::getUserNextNonceCall { user, sequential },
        )
        .map(|ret| ret.nextNonce)
    }

    fn initialize_governance(&mut self, tx: TxContext, control: Address) -> Result<(), SettlementError> {
        self.send(
            tx,
            self.addresses.verification,
            &IAtlasVerification::initializeGovernanceCall { control },
        )
        .map(|_| ())
    }

    fn governance_of(&self, control: Address) -> Result<Option<Address>, SettlementError> {
        // Reverts while the control is not enabled.
        match self.view(
            self.addresses.verification,
            &IAtlasVerification::getGovFromControlCall { control },
        ) {
            Ok(ret) if ret.governanceAddress != Address::ZERO => Ok(Some(ret.governanceAddress)),
            Ok(_) | Err(SettlementError::Rpc(_)) => Ok(None),
            Err(other) => Err(other),
        }
    }
}

impl PolicyContract for ForkEnvironment {
    fn call_config(&self, control: Address) -> Result<CallConfig, SettlementError> {
        self.view(control, &IDAppControl::CALL_CONFIGCall {})
            .map(|ret| CallConfig(ret._0))
    }

    fn bid_format(&self, control: Address, user_op: &UserOperation) -> Result<Address, SettlementError> {
        self.view(
            control,
            &IDAppControl::getBidFormatCall { userOp: user_op.clone() },
        )
        .map(|ret| ret.bidToken)
    }

    fn dapp_config(&self, control: Address, user_op: &UserOperation) -> Result<DAppConfig, SettlementError> {
        self.view(
            control,
            &IDAppControl::getDAppConfigCall { userOp: user_op.clone() },
        )
        .map(|ret| ret.dConfig)
    }

    fn signatory(&self, control: Address) -> Result<Address, SettlementError> {
        self.view(control, &IDAppControl::getDAppSignatoryCall {})
            .map(|ret| ret.governanceAddress)
    }
}
