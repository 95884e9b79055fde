use std::fmt;

use alloy_primitives::{Address, B256, U256};
use atlas_operation_types::{Asset, StateError};

use crate::scenario::ScenarioStage;

/// Why a single solver operation did not win.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SolverRejection {
    #[error("signature does not recover to the declared solver")]
    InvalidSignature,
    #[error("userOpHash {found} does not match user operation hash {expected}")]
    UserOpHashMismatch { expected: B256, found: B256 },
    #[error("bid token {found} is not the accepted bid token {expected}")]
    InvalidBidToken { expected: Address, found: Address },
    #[error("solver gas {gas} exceeds the policy limit {limit}")]
    GasLimitExceeded { gas: U256, limit: u32 },
    #[error("max fee per gas {max_fee} is below the gas price {gas_price}")]
    GasPriceTooHigh { max_fee: U256, gas_price: U256 },
    #[error("solver operation expired at block {deadline}")]
    Expired { deadline: U256 },
    #[error("solver operation targets control {found}, bundle control is {expected}")]
    ControlMismatch { expected: Address, found: Address },
    #[error("bonded balance {bonded} cannot cover {needed}")]
    InsufficientBond { bonded: U256, needed: U256 },
    #[error("solver contract {0} is unknown")]
    UnknownSolverContract(Address),
    #[error("solver contract reverted")]
    Reverted,
    #[error("bid of {amount} was not paid")]
    BidNotPaid { amount: U256 },
}

/// Rejections surfaced by the settlement engine, verification registry or policy contract.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SettlementError {
    #[error("user operation signature does not recover to {expected}")]
    InvalidUserSignature { expected: Address },
    #[error("dapp operation signature does not recover to governance {expected}")]
    InvalidDAppSignature { expected: Address },
    #[error("governance is not initialized for control {0}")]
    GovernanceNotInitialized(Address),
    #[error("governance for control {0} is already initialized")]
    GovernanceAlreadyInitialized(Address),
    #[error("caller {caller} is not the signatory of control {control}")]
    NotControlSignatory { caller: Address, control: Address },
    #[error("unknown control {0}")]
    UnknownControl(Address),
    #[error("user operation expired at block {deadline}")]
    UserOperationExpired { deadline: U256 },
    #[error("dapp operation expired at block {deadline}")]
    DAppOperationExpired { deadline: U256 },
    #[error("operation targets {found}, settlement engine is {expected}")]
    WrongEntryPoint { expected: Address, found: Address },
    #[error("control {found} does not match bundle control {expected}")]
    ControlMismatch { expected: Address, found: Address },
    #[error("call config {found:#x} does not match policy call config {expected:#x}")]
    CallConfigMismatch { expected: u32, found: u32 },
    #[error("dapp operation userOpHash {found} does not match {expected}")]
    UserOpHashMismatch { expected: B256, found: B256 },
    #[error("call chain hash {found} does not match {expected}")]
    CallChainHashMismatch { expected: B256, found: B256 },
    #[error("user nonce {0} is invalid or already used")]
    InvalidUserNonce(U256),
    #[error("dapp nonce {0} is invalid or already used")]
    InvalidDAppNonce(U256),
    #[error("bundler {found} is not the authorised bundler {expected}")]
    InvalidBundler { expected: Address, found: Address },
    #[error("sent value {sent} does not match user operation value {expected}")]
    ValueMismatch { expected: U256, sent: U256 },
    #[error("user max fee per gas {max_fee} is below the gas price {gas_price}")]
    GasPriceTooHigh { max_fee: U256, gas_price: U256 },
    #[error("no solver operations supplied and the policy forbids zero solvers")]
    NoSolverOperations,
    #[error("no solver fulfilled the user operation: {}", render_outcomes(.0))]
    NoSolverFulfilled(Vec<SolverOutcome>),
    #[error("insufficient {asset} balance for {account}: need {needed}, have {available}")]
    InsufficientBalance {
        account: Address,
        asset: Asset,
        needed: U256,
        available: U256,
    },
    #[error("insufficient allowance of token {token} from {owner} to {spender}: need {needed}, have {available}")]
    InsufficientAllowance {
        token: Address,
        owner: Address,
        spender: Address,
        needed: U256,
        available: U256,
    },
    #[error("execute on {entry_point} only accepts calls from the settlement engine itself; submit through metacall")]
    ExecuteRestricted { entry_point: Address },
    #[error("venue call reverted: {0}")]
    VenueReverted(String),
    #[error("transaction reverted: {0}")]
    Reverted(String),
    #[error("rpc error: {0}")]
    Rpc(String),
    #[error(transparent)]
    State(#[from] StateError),
}

/// Outcome of one solver operation inside a settlement attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SolverOutcome {
    pub index: usize,
    pub solver: Address,
    pub result: Result<(), SolverRejection>,
}

impl fmt::Display for SolverOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.result {
            Ok(()) => write!(f, "#{} {} won", self.index, self.solver),
            Err(reason) => write!(f, "#{} {} rejected ({reason})", self.index, self.solver),
        }
    }
}

fn render_outcomes(outcomes: &[SolverOutcome]) -> String {
    outcomes
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors while producing or checking signatures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignerError {
    #[error("invalid private key: {0}")]
    InvalidKey(String),
    #[error("malformed signature ({0} bytes, expected 65)")]
    MalformedSignature(usize),
    #[error("signature recovery failed")]
    RecoveryFailed,
    #[error("signing failed: {0}")]
    Signing(String),
    #[error("payload hash unavailable: {0}")]
    Payload(#[from] SettlementError),
}

/// A post-execution check that did not hold.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AssertionFailure {
    #[error("input {asset} balance of {account}: expected {expected}, found {actual}")]
    InputBalance {
        account: Address,
        asset: Asset,
        expected: U256,
        actual: U256,
    },
    #[error("output {asset} balance of {account}: expected {bound} {expected}, found {actual}")]
    OutputBalance {
        account: Address,
        asset: Asset,
        bound: &'static str,
        expected: U256,
        actual: U256,
    },
    #[error("reward {asset} balance of {account}: expected {expected}, found {actual}")]
    RewardBalance {
        account: Address,
        asset: Asset,
        expected: U256,
        actual: U256,
    },
    #[error("no TokensRewarded notification was emitted")]
    RewardEventMissing,
    #[error("TokensRewarded emitted {0} times, expected exactly once")]
    RewardEventDuplicated(usize),
    #[error("TokensRewarded({user}, {token}, {amount}) does not match expected ({expected_user}, {expected_token}, {expected_amount})")]
    RewardEventMismatch {
        user: Address,
        token: Address,
        amount: U256,
        expected_user: Address,
        expected_token: Address,
        expected_amount: U256,
    },
    #[error("TokensRewarded log could not be decoded")]
    RewardEventMalformed,
    #[error("cumulative surcharge grew by {actual}, expected at least {expected}")]
    Surcharge { expected: U256, actual: U256 },
    #[error("settlement reported no winning solver")]
    AuctionNotWon,
    #[error("bundle settled but a rejection was expected")]
    UnexpectedSettlement,
    #[error("rejected bundle moved the {asset} balance of {account} from {before} to {after}")]
    PartialStateChange {
        account: Address,
        asset: Asset,
        before: U256,
        after: U256,
    },
}

/// Failure cause inside a scenario stage.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScenarioFailure {
    #[error(transparent)]
    Settlement(#[from] SettlementError),
    #[error(transparent)]
    Signer(#[from] SignerError),
    #[error(transparent)]
    Assertion(#[from] AssertionFailure),
    #[error(transparent)]
    State(#[from] StateError),
}

/// A scenario aborted at `stage`; the remaining stages were not attempted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("scenario `{scenario}` failed at {stage}: {failure}")]
pub struct ScenarioError {
    pub scenario: String,
    pub stage: ScenarioStage,
    pub failure: ScenarioFailure,
}

/// The forked-state backend could not be reached or configured. Fatal for the whole run.
#[derive(Debug, thiserror::Error)]
pub enum EnvironmentError {
    #[error("RPC_URL is not set; a forked node endpoint is required")]
    MissingRpcUrl,
    #[error("invalid RPC url `{url}`: {reason}")]
    InvalidRpcUrl { url: String, reason: String },
    #[error("fork endpoint unavailable: {0}")]
    Unavailable(String),
    #[error("fork chain id {found} does not match configured chain id {expected}")]
    ChainIdMismatch { expected: u64, found: u64 },
    #[error("failed to start async runtime: {0}")]
    Runtime(#[from] std::io::Error),
}
