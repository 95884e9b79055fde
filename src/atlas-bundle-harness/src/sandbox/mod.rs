//! Deterministic in-memory world implementing every collaborator the harness drives.
//!
//! A [`Sandbox`] is an isolated copy of "forked" chain state: scenarios running on different sandboxes
//! never share mutable state, and snapshots make a single sandbox reusable across scenarios.

mod control;
mod engine;
mod ledger;
mod venue;
mod verification;

use std::collections::BTreeMap;

use alloy_primitives::{keccak256, Address, U256};
use atlas_operation_types::{ChainState, SnapshotId, StateError, TokenContracts};

pub use control::{SolverBehaviour, SwapRewardControl};
pub use engine::{SURCHARGE_RATE, SURCHARGE_SCALE};
pub use ledger::Ledger;
pub use venue::{Rate, SwapFill, Venue};

use crate::{errors::SettlementError, factory::BlockEnv, hashing::Domain};

/// Chain and fee parameters of a sandbox.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SandboxConfig {
    pub chain_id: u64,
    /// Settlement engine entry point.
    pub atlas: Address,
    /// Verification registry (EIP-712 verifying contract).
    pub verification: Address,
    pub gas_price: U256,
    /// Surcharge in parts of [`SURCHARGE_SCALE`].
    pub surcharge_rate: U256,
    /// Gas billed to the settlement sender.
    pub metacall_gas: u64,
    /// Gas billed to a winning solver, capped by the solver's own gas limit.
    pub solver_gas_used: u64,
    pub block: BlockEnv,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            chain_id: 1,
            atlas: Address::repeat_byte(0xa7),
            verification: Address::repeat_byte(0xa8),
            gas_price: U256::ZERO,
            surcharge_rate: U256::from(SURCHARGE_RATE),
            metacall_gas: 500_000,
            solver_gas_used: 200_000,
            block: BlockEnv {
                number: 19_000_000,
                timestamp: 1_700_000_000,
            },
        }
    }
}

#[derive(Clone, Debug)]
pub struct Sandbox {
    config: SandboxConfig,
    block: BlockEnv,
    ledger: Ledger,
    venue: Venue,
    controls: BTreeMap<Address, SwapRewardControl>,
    solvers: BTreeMap<Address, SolverBehaviour>,
    snapshots: Vec<(SnapshotId, Ledger, BlockEnv)>,
    next_snapshot: u64,
}

impl Sandbox {
    pub fn builder(config: SandboxConfig, venue: Address, weth: Address) -> SandboxBuilder {
        SandboxBuilder::new(config, venue, weth)
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn venue(&self) -> &Venue {
        &self.venue
    }

    pub fn block(&self) -> BlockEnv {
        self.block
    }

    pub fn domain(&self) -> Domain {
        Domain::new(self.config.chain_id, self.config.verification)
    }

    /// Advance the chain by `blocks`, `seconds_per_block` apart.
    pub fn mine(&mut self, blocks: u64, seconds_per_block: u64) {
        self.block.number = self.block.number.saturating_add(blocks);
        self.block.timestamp = self
            .block
            .timestamp
            .saturating_add(blocks.saturating_mul(seconds_per_block));
    }

    pub fn set_gas_price(&mut self, gas_price: U256) {
        self.config.gas_price = gas_price;
    }

    /// Mint balances mid-run (a cheat code, like `deal`).
    pub fn deal_native(&mut self, account: Address, amount: U256) {
        self.ledger.mint_native(account, amount);
    }

    pub fn deal_token(&mut self, token: Address, account: Address, amount: U256) {
        self.ledger.mint_token(token, account, amount);
    }

    pub fn control(&self, address: Address) -> Result<&SwapRewardControl, SettlementError> {
        self.controls
            .get(&address)
            .ok_or(SettlementError::UnknownControl(address))
    }

    /// Deterministic execution environment address for `(user, control)`.
    pub fn execution_environment_address(&self, user: Address, control: Address) -> Address {
        let mut buf = Vec::with_capacity(60);
        buf.extend_from_slice(self.config.atlas.as_slice());
        buf.extend_from_slice(user.as_slice());
        buf.extend_from_slice(control.as_slice());
        Address::from_slice(&keccak256(buf)[12..])
    }
}

impl ChainState for Sandbox {
    fn native_balance(&self, account: Address) -> Result<U256, StateError> {
        Ok(self.ledger.native(account))
    }

    fn block_number(&self) -> Result<u64, StateError> {
        Ok(self.block.number)
    }

    fn block_timestamp(&self) -> Result<u64, StateError> {
        Ok(self.block.timestamp)
    }

    fn cumulative_surcharge(&self) -> Result<U256, StateError> {
        Ok(self.ledger.cumulative_surcharge())
    }

    fn bonded_balance(&self, account: Address) -> Result<U256, StateError> {
        Ok(self.ledger.bonded(account))
    }

    fn snapshot(&mut self) -> Result<SnapshotId, StateError> {
        let id = SnapshotId(U256::from(self.next_snapshot));
        self.next_snapshot += 1;
        self.snapshots.push((id, self.ledger.clone(), self.block));
        Ok(id)
    }

    fn revert_to(&mut self, id: SnapshotId) -> Result<(), StateError> {
        let position = self
            .snapshots
            .iter()
            .position(|(candidate, _, _)| *candidate == id)
            .ok_or(StateError::UnknownSnapshot(id))?;
        let (_, ledger, block) = self.snapshots[position].clone();
        self.snapshots.truncate(position);
        self.ledger = ledger;
        self.block = block;
        Ok(())
    }
}

impl TokenContracts for Sandbox {
    fn balance_of(&self, token: Address, owner: Address) -> Result<U256, StateError> {
        Ok(self.ledger.token(token, owner))
    }

    fn allowance(&self, token: Address, owner: Address, spender: Address) -> Result<U256, StateError> {
        Ok(self.ledger.allowance(token, owner, spender))
    }

    fn approve(
        &mut self,
        token: Address,
        owner: Address,
        spender: Address,
        amount: U256,
    ) -> Result<(), StateError> {
        self.ledger.approve(token, owner, spender, amount);
        Ok(())
    }
}

/// Seeds balances, venue rates, policy controls and solver contracts.
#[derive(Clone, Debug)]
pub struct SandboxBuilder {
    config: SandboxConfig,
    ledger: Ledger,
    venue: Venue,
    controls: BTreeMap<Address, SwapRewardControl>,
    solvers: BTreeMap<Address, SolverBehaviour>,
}

impl SandboxBuilder {
    pub fn new(config: SandboxConfig, venue: Address, weth: Address) -> Self {
        Self {
            config,
            ledger: Ledger::default(),
            venue: Venue::new(venue, weth),
            controls: BTreeMap::new(),
            solvers: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn fund_native(mut self, account: Address, amount: U256) -> Self {
        self.ledger.mint_native(account, amount);
        self
    }

    #[must_use]
    pub fn fund_token(mut self, token: Address, account: Address, amount: U256) -> Self {
        self.ledger.mint_token(token, account, amount);
        self
    }

    /// Venue inventory paid out by swaps ending in `token`.
    #[must_use]
    pub fn venue_liquidity(mut self, token: Address, amount: U256) -> Self {
        let venue = self.venue.address();
        self.ledger.mint_token(token, venue, amount);
        self
    }

    #[must_use]
    pub fn venue_native_liquidity(mut self, amount: U256) -> Self {
        let venue = self.venue.address();
        self.ledger.mint_native(venue, amount);
        self
    }

    #[must_use]
    pub fn rate(mut self, token_in: Address, token_out: Address, rate: Rate) -> Self {
        self.venue.set_rate(token_in, token_out, rate);
        self
    }

    #[must_use]
    pub fn control(mut self, control: SwapRewardControl) -> Self {
        self.controls.insert(control.address, control);
        self
    }

    #[must_use]
    pub fn solver_contract(mut self, contract: Address, behaviour: SolverBehaviour) -> Self {
        self.solvers.insert(contract, behaviour);
        self
    }

    pub fn build(self) -> Sandbox {
        let block = self.config.block;
        Sandbox {
            config: self.config,
            block,
            ledger: self.ledger,
            venue: self.venue,
            controls: self.controls,
            solvers: self.solvers,
            snapshots: Vec::new(),
            next_snapshot: 1,
        }
    }
}
