//! Interfaces of the external collaborators the harness drives: the settlement engine, the
//! verification registry and the policy (DAppControl) contract.
//!
//! Both the in-memory [`Sandbox`](crate::sandbox::Sandbox) and the RPC-backed
//! [`ForkEnvironment`](crate::fork::ForkEnvironment) implement all of them.

use alloy_primitives::{Address, Log, B256, U256};
use atlas_operation_types::{
    CallConfig, ChainState, DAppConfig, DAppOperation, SolverOperation, TokenContracts,
    UserOperation,
};

use crate::errors::{SettlementError, SolverOutcome};

/// Sender and attached native value of a call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TxContext {
    pub from: Address,
    pub value: U256,
}

impl TxContext {
    pub fn new(from: Address) -> Self {
        Self {
            from,
            value: U256::ZERO,
        }
    }

    #[must_use]
    pub fn with_value(mut self, value: U256) -> Self {
        self.value = value;
        self
    }
}

/// Result of one settlement call.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SettlementReceipt {
    pub auction_won: bool,
    /// Logs emitted during settlement, in order.
    pub logs: Vec<Log>,
    /// Account that sent the settlement transaction.
    pub sender: Address,
    /// Native fee paid by `sender`, accounted separately from balance deltas.
    pub fee_paid: U256,
    /// State was rolled back after execution.
    pub simulated: bool,
    /// Per-solver results in the order they were considered. Empty when the backend cannot report them.
    pub solver_outcomes: Vec<SolverOutcome>,
}

/// The settlement engine entry points.
pub trait SettlementEngine {
    fn metacall(
        &mut self,
        tx: TxContext,
        user_op: &UserOperation,
        solver_ops: &[SolverOperation],
        dapp_op: &DAppOperation,
    ) -> Result<SettlementReceipt, SettlementError>;

    #[allow(clippy::too_many_arguments)]
    fn execute(
        &mut self,
        tx: TxContext,
        config: &DAppConfig,
        user_op: &UserOperation,
        solver_ops: &[SolverOperation],
        execution_environment: Address,
        bundler: Address,
        user_op_hash: B256,
        is_simulation: bool,
    ) -> Result<SettlementReceipt, SettlementError>;

    fn create_execution_environment(
        &mut self,
        tx: TxContext,
        user: Address,
        control: Address,
    ) -> Result<Address, SettlementError>;

    /// Credit `tx.value` to the sender's unbonded balance.
    fn deposit(&mut self, tx: TxContext) -> Result<(), SettlementError>;

    /// Move `amount` of the sender's unbonded balance into its bond.
    fn bond(&mut self, tx: TxContext, amount: U256) -> Result<(), SettlementError>;

    /// Address of the settlement entry point (the `to` of every operation).
    fn entry_point(&self) -> Address;
}

/// Canonical hashing and governance bookkeeping.
pub trait VerificationRegistry {
    fn user_operation_payload(&self, op: &UserOperation) -> Result<B256, SettlementError>;

    fn solver_payload(&self, op: &SolverOperation) -> Result<B256, SettlementError>;

    fn dapp_operation_payload(&self, op: &DAppOperation) -> Result<B256, SettlementError>;

    /// Struct hash carried as `userOpHash` by solver and dapp operations.
    fn user_operation_hash(&self, op: &UserOperation) -> Result<B256, SettlementError>;

    fn user_next_nonce(&self, user: Address, sequential: bool) -> Result<U256, SettlementError>;

    /// Register the control's signatory as its governance. Must be sent by that signatory.
    fn initialize_governance(&mut self, tx: TxContext, control: Address) -> Result<(), SettlementError>;

    /// Governance registered for `control`, if any.
    fn governance_of(&self, control: Address) -> Result<Option<Address>, SettlementError>;
}

/// Read-only views on the policy contract under test.
pub trait PolicyContract {
    fn call_config(&self, control: Address) -> Result<CallConfig, SettlementError>;

    fn bid_format(&self, control: Address, user_op: &UserOperation) -> Result<Address, SettlementError>;

    fn dapp_config(&self, control: Address, user_op: &UserOperation) -> Result<DAppConfig, SettlementError>;

    fn signatory(&self, control: Address) -> Result<Address, SettlementError>;
}

/// Everything a scenario needs from its world.
pub trait Environment:
    ChainState + TokenContracts + SettlementEngine + VerificationRegistry + PolicyContract
{
}

impl<T> Environment for T where
    T: ChainState + TokenContracts + SettlementEngine + VerificationRegistry + PolicyContract
{
}
