//! Ready-made sandbox world and the two reference swap scenarios.

use alloy_primitives::{Address, U256};
use atlas_operation_types::{Asset, CallConfig, CallConfigFlag};

use crate::{
    errors::SignerError,
    factory::{OperationFactory, OutputBound, SwapIntent},
    sandbox::{Rate, Sandbox, SandboxBuilder, SandboxConfig, SolverBehaviour, SwapRewardControl, SURCHARGE_SCALE},
    scenario::{Expect, ScenarioParties, SolverParty, SwapScenario},
    signer::OperationSigner,
    submitter::SubmitMode,
};

/// `amount * 10^18`.
pub fn units(amount: u64) -> U256 {
    U256::from(amount) * U256::from(10u64).pow(U256::from(18u64))
}

pub const GWEI: u64 = 1_000_000_000;
pub const DEADLINE_BLOCKS: u64 = 10;
pub const SOLVER_GAS_LIMIT: u32 = 500_000;

#[derive(Clone, Debug)]
pub struct SolverIdentity {
    pub signer: OperationSigner,
    pub contract: Address,
    pub behaviour: SolverBehaviour,
}

/// Token A, token B, a reward token and WETH around a fixed-rate venue: A to B at 0.9, WETH to B at
/// 1000. One user, one governance signatory, two solvers.
#[derive(Clone, Debug)]
pub struct SandboxWorld {
    pub config: SandboxConfig,
    pub venue: Address,
    pub weth: Address,
    pub token_a: Address,
    pub token_b: Address,
    pub reward_token: Address,
    pub control: Address,
    pub call_config: CallConfig,
    pub user: OperationSigner,
    pub governance: OperationSigner,
    pub solvers: Vec<SolverIdentity>,
    /// Native bonded by each solver during scenario setup.
    pub solver_bond: U256,
}

impl SandboxWorld {
    pub fn standard() -> Result<Self, SignerError> {
        let config = SandboxConfig {
            gas_price: U256::from(GWEI),
            ..SandboxConfig::default()
        };
        let solvers = vec![
            SolverIdentity {
                signer: OperationSigner::from_label("solver-1")?,
                contract: Address::repeat_byte(0x51),
                behaviour: SolverBehaviour::PayBid,
            },
            SolverIdentity {
                signer: OperationSigner::from_label("solver-2")?,
                contract: Address::repeat_byte(0x52),
                behaviour: SolverBehaviour::PayBid,
            },
        ];
        Ok(Self {
            config,
            venue: Address::repeat_byte(0x5a),
            weth: Address::repeat_byte(0xee),
            token_a: Address::repeat_byte(0x0a),
            token_b: Address::repeat_byte(0x0b),
            reward_token: Address::repeat_byte(0x0c),
            control: Address::repeat_byte(0xdc),
            call_config: CallConfig::from_flags(&[CallConfigFlag::RequireFulfillment]),
            user: OperationSigner::from_label("user")?,
            governance: OperationSigner::from_label("governance")?,
            solvers,
            solver_bond: units(1),
        })
    }

    pub fn control_contract(&self) -> SwapRewardControl {
        SwapRewardControl {
            address: self.control,
            signatory: self.governance.address(),
            call_config: self.call_config,
            reward_token: self.reward_token,
            solver_gas_limit: SOLVER_GAS_LIMIT,
        }
    }

    /// Builder seeded with balances, venue rates, the control and the solver contracts.
    pub fn builder(&self) -> SandboxBuilder {
        let mut builder = Sandbox::builder(self.config.clone(), self.venue, self.weth)
            .rate(self.token_a, self.token_b, Rate::new(9, 10))
            .rate(self.weth, self.token_b, Rate::new(1000, 1))
            .venue_liquidity(self.token_b, units(1_000_000))
            .fund_token(self.token_a, self.user.address(), units(10_000))
            .fund_native(self.user.address(), units(100))
            .control(self.control_contract());
        for solver in &self.solvers {
            builder = builder
                .fund_native(solver.signer.address(), units(10))
                .fund_token(self.reward_token, solver.contract, units(1_000))
                .solver_contract(solver.contract, solver.behaviour);
        }
        builder
    }

    pub fn sandbox(&self) -> Sandbox {
        self.builder().build()
    }

    pub fn factory(&self) -> OperationFactory {
        OperationFactory::new(self.config.atlas, self.venue, self.weth)
    }

    /// Surcharge added by one winning solver.
    pub fn expected_surcharge(&self) -> U256 {
        let gas = self.config.solver_gas_used.min(u64::from(SOLVER_GAS_LIMIT));
        let gas_cost = U256::from(gas) * self.config.gas_price;
        gas_cost * self.config.surcharge_rate / U256::from(SURCHARGE_SCALE)
    }

    /// Parties with one bid per solver, in priority order.
    pub fn parties(&self, bids: &[U256]) -> ScenarioParties {
        ScenarioParties {
            user: self.user.clone(),
            governance: self.governance.clone(),
            solvers: self
                .solvers
                .iter()
                .zip(bids)
                .map(|(solver, bid)| SolverParty {
                    signer: solver.signer.clone(),
                    contract: solver.contract,
                    bid_amount: *bid,
                    bond: self.solver_bond,
                })
                .collect(),
        }
    }

    fn scenario(&self, name: &str, intent: SwapIntent, bids: &[U256]) -> SwapScenario {
        SwapScenario {
            name: name.to_string(),
            factory: self.factory(),
            control: self.control,
            intent,
            parties: self.parties(bids),
            sender: self.user.address(),
            mode: SubmitMode::Metacall,
            expect: Expect::Settled,
            expected_winner: (!bids.is_empty()).then_some(0),
            min_surcharge_increase: Some(self.expected_surcharge()),
            corrupt_user_op_hash: false,
        }
    }

    /// Exact `amount_in` of token A for at least `min_out` of token B.
    pub fn token_to_token(&self, name: &str, amount_in: U256, min_out: U256, bids: &[U256]) -> SwapScenario {
        let intent = SwapIntent {
            input: Asset::Token(self.token_a),
            amount_in,
            output: Asset::Token(self.token_b),
            amount_out: min_out,
            bound: OutputBound::Minimum,
            recipient: self.user.address(),
            deadline_offset: DEADLINE_BLOCKS,
        };
        self.scenario(name, intent, bids)
    }

    /// Native `value` for exactly `amount_out` of token B.
    pub fn native_to_exact_token(&self, name: &str, value: U256, amount_out: U256, bids: &[U256]) -> SwapScenario {
        let intent = SwapIntent {
            input: Asset::Native,
            amount_in: value,
            output: Asset::Token(self.token_b),
            amount_out,
            bound: OutputBound::Exact,
            recipient: self.user.address(),
            deadline_offset: DEADLINE_BLOCKS,
        };
        self.scenario(name, intent, bids)
    }
}
