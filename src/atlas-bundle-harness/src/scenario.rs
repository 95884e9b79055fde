//! Scenario state machine: `Built -> Signed -> Submitted -> Verified`.
//!
//! Stages run strictly in order; the first failure aborts the scenario and is reported with the stage
//! it happened in. There are no retries.

use std::fmt;

use alloy_primitives::{keccak256, Address, B256, U256};
use atlas_operation_types::{Asset, CallConfigFlag, SolverOperation};
use serde::{Deserialize, Serialize};

use crate::{
    bundle::{Signed, SignedBundle},
    collaborators::{Environment, SettlementReceipt, TxContext},
    errors::{ScenarioError, ScenarioFailure, SettlementError},
    factory::{BlockEnv, OperationFactory, SwapIntent},
    signer::OperationSigner,
    submitter::{BundleSubmitter, SubmitMode},
    verifier::{Expectation, InputExpectation, InvariantVerifier, OutputExpectation, RewardExpectation},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioStage {
    Built,
    Signed,
    Submitted,
    Verified,
}

impl fmt::Display for ScenarioStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScenarioStage::Built => "BUILT",
            ScenarioStage::Signed => "SIGNED",
            ScenarioStage::Submitted => "SUBMITTED",
            ScenarioStage::Verified => "VERIFIED",
        };
        f.write_str(name)
    }
}

/// Expected fate of the bundle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expect {
    #[default]
    Settled,
    /// Rejected by the settlement engine with no tracked state change.
    Rejected,
}

#[derive(Clone, Debug)]
pub struct SolverParty {
    /// EOA signing the solver operation and owning the bond.
    pub signer: OperationSigner,
    /// Solver contract called by the settlement engine.
    pub contract: Address,
    pub bid_amount: U256,
    /// Native amount deposited and bonded during setup.
    pub bond: U256,
}

#[derive(Clone, Debug)]
pub struct ScenarioParties {
    pub user: OperationSigner,
    /// Signatory of the control, registered as its governance.
    pub governance: OperationSigner,
    /// In priority order.
    pub solvers: Vec<SolverParty>,
}

#[derive(Clone, Debug)]
pub struct SwapScenario {
    pub name: String,
    pub factory: OperationFactory,
    pub control: Address,
    pub intent: SwapIntent,
    pub parties: ScenarioParties,
    /// Account sending the settlement transaction.
    pub sender: Address,
    pub mode: SubmitMode,
    pub expect: Expect,
    /// Index of the solver expected to win.
    pub expected_winner: Option<usize>,
    pub min_surcharge_increase: Option<U256>,
    /// Solver operations commit to a wrong `userOpHash`.
    pub corrupt_user_op_hash: bool,
}

/// Report of a scenario that reached `Verified`.
#[derive(Clone, Debug)]
pub struct ScenarioOutcome {
    pub name: String,
    pub user_op_hash: B256,
    /// Present when the bundle settled.
    pub receipt: Option<SettlementReceipt>,
    /// Present when the bundle was rejected as expected.
    pub rejection: Option<SettlementError>,
}

/// A bundle that went through `Built` and `Signed`, ready to submit.
#[derive(Clone, Debug)]
pub struct PreparedBundle {
    pub bundle: SignedBundle,
    pub user_op_hash: B256,
    /// Reward token reported by the control's bid format.
    pub bid_token: Address,
}

impl SwapScenario {
    fn fail(&self, stage: ScenarioStage) -> impl FnOnce(ScenarioFailure) -> ScenarioError + '_ {
        move |failure| {
            tracing::warn!(scenario = %self.name, %stage, %failure, "scenario failed");
            ScenarioError {
                scenario: self.name.clone(),
                stage,
                failure,
            }
        }
    }

    /// Expected outcome derived from the intent, the bid token and the expected winner.
    ///
    /// Native input is attached as call value, so it is charged to the sender rather than the user.
    pub fn expectation(&self, bid_token: Address) -> Expectation {
        let user = self.parties.user.address();
        let reward = self
            .expected_winner
            .and_then(|index| self.parties.solvers.get(index))
            .map(|solver| RewardExpectation {
                user,
                token: bid_token,
                amount: solver.bid_amount,
            });
        let payer = if self.intent.input.is_native() {
            self.sender
        } else {
            user
        };
        Expectation {
            input: InputExpectation {
                account: payer,
                asset: self.intent.input,
                amount: self.intent.amount_in,
            },
            output: OutputExpectation {
                account: self.intent.recipient,
                asset: self.intent.output,
                amount: self.intent.amount_out,
                bound: self.intent.bound,
            },
            reward,
            min_surcharge_increase: self.min_surcharge_increase,
        }
    }

    /// Governance registration, input approval and solver bonds.
    fn setup<E: Environment + ?Sized>(&self, env: &mut E) -> Result<(), ScenarioFailure> {
        let governance = self.parties.governance.address();
        if env.signatory(self.control)? != governance {
            return Err(SettlementError::NotControlSignatory {
                caller: governance,
                control: self.control,
            }
            .into());
        }
        if env.governance_of(self.control)?.is_none() {
            env.initialize_governance(TxContext::new(governance), self.control)?;
        }
        if let Asset::Token(token) = self.intent.input {
            let spender = env.entry_point();
            env.approve(token, self.parties.user.address(), spender, self.intent.amount_in)?;
        }
        for solver in &self.parties.solvers {
            let tx = TxContext::new(solver.signer.address());
            env.deposit(tx.with_value(solver.bond))?;
            env.bond(tx, solver.bond)?;
        }
        Ok(())
    }

    /// Run `Built` and `Signed`: setup, build the three records and sign them.
    pub fn prepare<E: Environment + ?Sized>(&self, env: &mut E) -> Result<PreparedBundle, ScenarioError> {
        // BUILT
        self.setup(env).map_err(self.fail(ScenarioStage::Built))?;
        let user = self.parties.user.address();
        let (config, user_op, bid_token) = (|| -> Result<_, ScenarioFailure> {
            let call_config = env.call_config(self.control)?;
            let sequential = call_config.has(CallConfigFlag::UserNoncesSequential);
            let nonce = env.user_next_nonce(user, sequential)?;
            let block = BlockEnv {
                number: env.block_number()?,
                timestamp: env.block_timestamp()?,
            };
            let user_op =
                self.factory
                    .user_operation(user, nonce, block, self.control, call_config, &self.intent);
            let config = env.dapp_config(self.control, &user_op)?;
            let bid_token = env.bid_format(self.control, &user_op)?;
            Ok((config, user_op, bid_token))
        })()
        .map_err(self.fail(ScenarioStage::Built))?;
        tracing::info!(scenario = %self.name, stage = %ScenarioStage::Built, nonce = %user_op.nonce, %bid_token, "operations built");

        // SIGNED
        let (bundle, user_op_hash) = (|| -> Result<_, ScenarioFailure> {
            let signed_user = self.parties.user.sign(&*env, user_op)?;
            let user_op_hash = env.user_operation_hash(signed_user.record())?;
            let committed_hash = if self.corrupt_user_op_hash {
                keccak256(user_op_hash)
            } else {
                user_op_hash
            };
            let mut signed_solvers: Vec<Signed<SolverOperation>> =
                Vec::with_capacity(self.parties.solvers.len());
            for solver in &self.parties.solvers {
                let op = self.factory.solver_operation(
                    solver.signer.address(),
                    solver.contract,
                    signed_user.record(),
                    committed_hash,
                    &config,
                    bid_token,
                    solver.bid_amount,
                );
                signed_solvers.push(solver.signer.sign(&*env, op)?);
            }
            let dapp_op = self.factory.dapp_operation(
                self.parties.governance.address(),
                &signed_user,
                &signed_solvers,
                user_op_hash,
                &config,
                self.sender,
                U256::ZERO,
            );
            let signed_dapp = self.parties.governance.sign(&*env, dapp_op)?;
            Ok((
                SignedBundle::new(signed_user, signed_solvers, signed_dapp, config.clone()),
                user_op_hash,
            ))
        })()
        .map_err(self.fail(ScenarioStage::Signed))?;
        tracing::info!(scenario = %self.name, stage = %ScenarioStage::Signed, %user_op_hash, "bundle signed");

        Ok(PreparedBundle {
            bundle,
            user_op_hash,
            bid_token,
        })
    }

    pub fn run<E: Environment + ?Sized>(&self, env: &mut E) -> Result<ScenarioOutcome, ScenarioError> {
        tracing::info!(scenario = %self.name, mode = self.mode.name(), "scenario started");
        let PreparedBundle {
            bundle,
            user_op_hash,
            bid_token,
        } = self.prepare(env)?;

        // SUBMITTED -> VERIFIED
        let submitter = BundleSubmitter::new(self.sender, self.mode);
        let verifier = InvariantVerifier::new(self.expectation(bid_token));
        let stage_of = |failure: &ScenarioFailure| match failure {
            ScenarioFailure::Assertion(_) => ScenarioStage::Verified,
            _ => ScenarioStage::Submitted,
        };
        let outcome = match self.expect {
            Expect::Settled => verifier
                .run(env, &submitter, &bundle)
                .map(|receipt| ScenarioOutcome {
                    name: self.name.clone(),
                    user_op_hash,
                    receipt: Some(receipt),
                    rejection: None,
                }),
            Expect::Rejected => verifier
                .run_rejected(env, &submitter, &bundle)
                .map(|rejection| ScenarioOutcome {
                    name: self.name.clone(),
                    user_op_hash,
                    receipt: None,
                    rejection: Some(rejection),
                }),
        };
        let outcome = outcome.map_err(|failure| {
            let stage = stage_of(&failure);
            self.fail(stage)(failure)
        })?;
        tracing::info!(scenario = %self.name, stage = %ScenarioStage::Verified, "scenario passed");
        Ok(outcome)
    }
}
