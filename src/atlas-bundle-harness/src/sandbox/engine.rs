//! Settlement engine of the sandbox.
//!
//! Every rejection the engine can decide from the submitted records alone (signatures, hash binding,
//! nonces, deadlines, solver eligibility) is decided before the ledger is touched. Execution itself runs
//! on a checkpoint of the ledger that is restored on failure and after simulations, so a bundle is
//! all-or-nothing.

use alloy_primitives::{Address, Log, B256, U256};
use alloy_sol_types::SolCall;
use atlas_operation_types::{
    CallConfig, CallConfigFlag, DAppConfig, DAppOperation, ISwapSolver, SolverOperation,
    UserOperation,
};

use super::{control::SwapRewardControl, Sandbox};
use crate::{
    collaborators::{SettlementEngine, SettlementReceipt, TxContext},
    errors::{SettlementError, SolverOutcome, SolverRejection},
    factory::SwapCall,
    hashing::{
        call_chain_hash, dapp_operation_payload, solver_operation_payload, user_operation_hash,
        user_operation_payload,
    },
    signer::recover_signer,
};

pub const SURCHARGE_SCALE: u64 = 10_000_000;
/// 10 %.
pub const SURCHARGE_RATE: u64 = 1_000_000;

/// Receives settlement fees.
const COINBASE: Address = Address::ZERO;

/// One settlement attempt, shared by `metacall` and `execute`.
struct Settlement<'a> {
    tx: TxContext,
    config: &'a DAppConfig,
    user_op: &'a UserOperation,
    solver_ops: &'a [SolverOperation],
    user_op_hash: B256,
    bundler: Address,
    execution_environment: Address,
    dapp_nonce: Option<(Address, U256)>,
    simulate: bool,
}

impl Sandbox {
    fn signed_by(digest: B256, signature: &[u8], expected: Address) -> bool {
        recover_signer(digest, signature).is_ok_and(|recovered| recovered == expected)
    }

    /// Gas cost and surcharge billed to a winning solver.
    fn solver_charge(&self, op: &SolverOperation) -> (U256, U256) {
        let gas_used = U256::from(self.config.solver_gas_used).min(op.gas);
        let gas_cost = gas_used.saturating_mul(self.config.gas_price);
        let surcharge =
            gas_cost.saturating_mul(self.config.surcharge_rate) / U256::from(SURCHARGE_SCALE);
        (gas_cost, surcharge)
    }

    fn validate_user_operation(
        &self,
        tx: TxContext,
        config: &DAppConfig,
        user_op: &UserOperation,
    ) -> Result<(), SettlementError> {
        let atlas = self.config.atlas;
        if user_op.to != atlas {
            return Err(SettlementError::WrongEntryPoint {
                expected: atlas,
                found: user_op.to,
            });
        }
        if config.to != user_op.control {
            return Err(SettlementError::ControlMismatch {
                expected: config.to,
                found: user_op.control,
            });
        }
        if user_op.callConfig != config.callConfig {
            return Err(SettlementError::CallConfigMismatch {
                expected: config.callConfig,
                found: user_op.callConfig,
            });
        }
        if user_op.dapp != self.venue.address() {
            return Err(SettlementError::Reverted(format!(
                "user operation targets unknown dapp {}",
                user_op.dapp
            )));
        }
        if user_op.deadline < U256::from(self.block.number) {
            return Err(SettlementError::UserOperationExpired {
                deadline: user_op.deadline,
            });
        }
        if user_op.maxFeePerGas < self.config.gas_price {
            return Err(SettlementError::GasPriceTooHigh {
                max_fee: user_op.maxFeePerGas,
                gas_price: self.config.gas_price,
            });
        }
        if tx.value != user_op.value {
            return Err(SettlementError::ValueMismatch {
                expected: user_op.value,
                sent: tx.value,
            });
        }
        let sequential = CallConfig(config.callConfig).has(CallConfigFlag::UserNoncesSequential);
        if !self
            .ledger
            .user_nonce_available(user_op.from, user_op.nonce, sequential)
        {
            return Err(SettlementError::InvalidUserNonce(user_op.nonce));
        }
        Ok(())
    }

    fn validate_solver_operation(
        &self,
        op: &SolverOperation,
        config: &DAppConfig,
        user_op_hash: B256,
    ) -> Result<(), SolverRejection> {
        if !Self::signed_by(
            solver_operation_payload(&self.domain(), op),
            &op.signature,
            op.from,
        ) {
            return Err(SolverRejection::InvalidSignature);
        }
        if op.userOpHash != user_op_hash {
            return Err(SolverRejection::UserOpHashMismatch {
                expected: user_op_hash,
                found: op.userOpHash,
            });
        }
        if op.control != config.to {
            return Err(SolverRejection::ControlMismatch {
                expected: config.to,
                found: op.control,
            });
        }
        if op.bidToken != config.bidToken {
            return Err(SolverRejection::InvalidBidToken {
                expected: config.bidToken,
                found: op.bidToken,
            });
        }
        if op.gas > U256::from(config.solverGasLimit) {
            return Err(SolverRejection::GasLimitExceeded {
                gas: op.gas,
                limit: config.solverGasLimit,
            });
        }
        if op.maxFeePerGas < self.config.gas_price {
            return Err(SolverRejection::GasPriceTooHigh {
                max_fee: op.maxFeePerGas,
                gas_price: self.config.gas_price,
            });
        }
        if op.deadline < U256::from(self.block.number) {
            return Err(SolverRejection::Expired {
                deadline: op.deadline,
            });
        }
        if !self.solvers.contains_key(&op.solver) {
            return Err(SolverRejection::UnknownSolverContract(op.solver));
        }
        let (gas_cost, surcharge) = self.solver_charge(op);
        let needed = gas_cost.saturating_add(surcharge);
        let bonded = self.ledger.bonded(op.from);
        if bonded < needed {
            return Err(SolverRejection::InsufficientBond { bonded, needed });
        }
        Ok(())
    }

    fn settle(&mut self, request: Settlement<'_>) -> Result<SettlementReceipt, SettlementError> {
        let call_config = CallConfig(request.config.callConfig);
        if request.solver_ops.is_empty() && !call_config.has(CallConfigFlag::ZeroSolvers) {
            return Err(SettlementError::NoSolverOperations);
        }

        let mut outcomes = Vec::with_capacity(request.solver_ops.len());
        let mut eligible = Vec::with_capacity(request.solver_ops.len());
        for (index, op) in request.solver_ops.iter().enumerate() {
            match self.validate_solver_operation(op, request.config, request.user_op_hash) {
                Ok(()) => eligible.push(index),
                Err(reason) => {
                    tracing::debug!(index, solver = %op.from, %reason, "solver operation rejected");
                    outcomes.push(SolverOutcome {
                        index,
                        solver: op.from,
                        result: Err(reason),
                    });
                }
            }
        }
        if eligible.is_empty()
            && !request.solver_ops.is_empty()
            && call_config.has(CallConfigFlag::RequireFulfillment)
        {
            return Err(SettlementError::NoSolverFulfilled(outcomes));
        }

        let checkpoint = (self.ledger.clone(), self.block);
        let result = self.run_bundle(&request, &eligible, &mut outcomes);
        outcomes.sort_by_key(|outcome| outcome.index);
        match result {
            Ok((auction_won, logs, fee_paid)) => {
                if request.simulate {
                    (self.ledger, self.block) = checkpoint;
                }
                tracing::info!(
                    auction_won,
                    simulated = request.simulate,
                    fee = %fee_paid,
                    "bundle settled"
                );
                Ok(SettlementReceipt {
                    auction_won,
                    logs,
                    sender: request.tx.from,
                    fee_paid,
                    simulated: request.simulate,
                    solver_outcomes: outcomes,
                })
            }
            Err(err) => {
                (self.ledger, self.block) = checkpoint;
                let err = match err {
                    SettlementError::NoSolverFulfilled(_) => SettlementError::NoSolverFulfilled(outcomes),
                    other => other,
                };
                tracing::info!(%err, "bundle reverted");
                Err(err)
            }
        }
    }

    /// Mutating part of a settlement. Returns `(auction_won, logs, fee_paid)`.
    fn run_bundle(
        &mut self,
        request: &Settlement<'_>,
        eligible: &[usize],
        outcomes: &mut Vec<SolverOutcome>,
    ) -> Result<(bool, Vec<Log>, U256), SettlementError> {
        let call_config = CallConfig(request.config.callConfig);
        let user_op = request.user_op;
        let environment = request.execution_environment;

        self.ledger.consume_user_nonce(
            user_op.from,
            user_op.nonce,
            call_config.has(CallConfigFlag::UserNoncesSequential),
        );
        if let Some((signer, nonce)) = request.dapp_nonce {
            self.ledger.consume_dapp_nonce(
                signer,
                nonce,
                call_config.has(CallConfigFlag::DappNoncesSequential),
            );
        }
        self.ledger
            .set_execution_environment(user_op.from, user_op.control, environment);

        // User call, forwarded through the execution environment.
        let call = SwapCall::decode(&user_op.data, user_op.value)
            .map_err(|e| SettlementError::Reverted(format!("undecodable user call: {e}")))?;
        self.ledger
            .transfer_native(request.tx.from, environment, request.tx.value)?;
        let pulled = match call.token_input() {
            Some((token, amount)) => {
                self.ledger
                    .transfer_from(token, self.config.atlas, user_op.from, environment, amount)?;
                Some((token, amount))
            }
            None => None,
        };
        let venue = self.venue.clone();
        let fill = venue.swap(&mut self.ledger, environment, &call, self.block.timestamp)?;
        match pulled {
            Some((token, amount)) => {
                self.ledger
                    .transfer_token(token, environment, user_op.from, amount - fill.amount_in)?;
            }
            None => {
                self.ledger.transfer_native(
                    environment,
                    user_op.from,
                    call.native_value() - fill.amount_in,
                )?;
            }
        }

        let control = self.control(user_op.control)?.clone();
        let mut logs = Vec::new();
        let mut auction_won = false;
        for &index in eligible {
            let op = &request.solver_ops[index];
            let attempt = self.ledger.clone();
            match self.run_solver(op, &control, environment, user_op.from, request.bundler) {
                Ok(log) => {
                    tracing::info!(index, solver = %op.from, bid = %op.bidAmount, "solver won");
                    logs.push(log);
                    outcomes.push(SolverOutcome {
                        index,
                        solver: op.from,
                        result: Ok(()),
                    });
                    auction_won = true;
                    break;
                }
                Err(reason) => {
                    self.ledger = attempt;
                    tracing::debug!(index, solver = %op.from, %reason, "solver failed");
                    outcomes.push(SolverOutcome {
                        index,
                        solver: op.from,
                        result: Err(reason),
                    });
                }
            }
        }
        if !auction_won && call_config.has(CallConfigFlag::RequireFulfillment) {
            return Err(SettlementError::NoSolverFulfilled(Vec::new()));
        }

        let fee = self
            .config
            .gas_price
            .saturating_mul(U256::from(self.config.metacall_gas));
        self.ledger.transfer_native(request.tx.from, COINBASE, fee)?;
        Ok((auction_won, logs, fee))
    }

    fn run_solver(
        &mut self,
        op: &SolverOperation,
        control: &SwapRewardControl,
        environment: Address,
        user: Address,
        bundler: Address,
    ) -> Result<Log, SolverRejection> {
        if !op.data.starts_with(&ISwapSolver::solveCall::SELECTOR) {
            return Err(SolverRejection::Reverted);
        }
        let behaviour = self
            .solvers
            .get(&op.solver)
            .copied()
            .ok_or(SolverRejection::UnknownSolverContract(op.solver))?;
        behaviour.solve(&mut self.ledger, op.solver, environment, op.bidToken, op.bidAmount)?;

        let (gas_cost, surcharge) = self.solver_charge(op);
        let needed = gas_cost.saturating_add(surcharge);
        self.ledger
            .debit_bonded(op.from, needed)
            .map_err(|bonded| SolverRejection::InsufficientBond { bonded, needed })?;
        self.ledger.credit_unbonded(bundler, gas_cost);
        self.ledger.add_surcharge(surcharge);

        control
            .allocate_value(&mut self.ledger, environment, user, op.bidToken, op.bidAmount)
            .map_err(|_| SolverRejection::BidNotPaid { amount: op.bidAmount })
    }
}

impl SettlementEngine for Sandbox {
    fn metacall(
        &mut self,
        tx: TxContext,
        user_op: &UserOperation,
        solver_ops: &[SolverOperation],
        dapp_op: &DAppOperation,
    ) -> Result<SettlementReceipt, SettlementError> {
        let control = self.control(user_op.control)?;
        let config = control.dapp_config();
        let atlas = self.config.atlas;
        let domain = self.domain();

        if dapp_op.to != atlas {
            return Err(SettlementError::WrongEntryPoint {
                expected: atlas,
                found: dapp_op.to,
            });
        }
        if dapp_op.control != user_op.control {
            return Err(SettlementError::ControlMismatch {
                expected: user_op.control,
                found: dapp_op.control,
            });
        }
        self.validate_user_operation(tx, &config, user_op)?;
        if !Self::signed_by(
            user_operation_payload(&domain, user_op),
            &user_op.signature,
            user_op.from,
        ) {
            return Err(SettlementError::InvalidUserSignature {
                expected: user_op.from,
            });
        }

        let user_op_hash = user_operation_hash(user_op);
        if dapp_op.userOpHash != user_op_hash {
            return Err(SettlementError::UserOpHashMismatch {
                expected: user_op_hash,
                found: dapp_op.userOpHash,
            });
        }
        let governance = self
            .ledger
            .governance(user_op.control)
            .ok_or(SettlementError::GovernanceNotInitialized(user_op.control))?;
        if dapp_op.from != governance
            || !Self::signed_by(
                dapp_operation_payload(&domain, dapp_op),
                &dapp_op.signature,
                governance,
            )
        {
            return Err(SettlementError::InvalidDAppSignature {
                expected: governance,
            });
        }
        if dapp_op.deadline < U256::from(self.block.number) {
            return Err(SettlementError::DAppOperationExpired {
                deadline: dapp_op.deadline,
            });
        }
        if dapp_op.bundler != Address::ZERO && dapp_op.bundler != tx.from {
            return Err(SettlementError::InvalidBundler {
                expected: dapp_op.bundler,
                found: tx.from,
            });
        }
        let call_config = CallConfig(config.callConfig);
        if call_config.has(CallConfigFlag::VerifyCallChainHash) {
            let expected = call_chain_hash(user_op, solver_ops);
            if dapp_op.callChainHash != expected {
                return Err(SettlementError::CallChainHashMismatch {
                    expected,
                    found: dapp_op.callChainHash,
                });
            }
        }
        if !self.ledger.dapp_nonce_available(
            dapp_op.from,
            dapp_op.nonce,
            call_config.has(CallConfigFlag::DappNoncesSequential),
        ) {
            return Err(SettlementError::InvalidDAppNonce(dapp_op.nonce));
        }

        let execution_environment = self.execution_environment_address(user_op.from, user_op.control);
        self.settle(Settlement {
            tx,
            config: &config,
            user_op,
            solver_ops,
            user_op_hash,
            bundler: tx.from,
            execution_environment,
            dapp_nonce: Some((dapp_op.from, dapp_op.nonce)),
            simulate: false,
        })
    }

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
    ) -> Result<SettlementReceipt, SettlementError> {
        let expected_config = self.control(user_op.control)?.dapp_config();
        if *config != expected_config {
            return Err(SettlementError::CallConfigMismatch {
                expected: expected_config.callConfig,
                found: config.callConfig,
            });
        }
        self.validate_user_operation(tx, config, user_op)?;
        let computed = user_operation_hash(user_op);
        if user_op_hash != computed {
            return Err(SettlementError::UserOpHashMismatch {
                expected: computed,
                found: user_op_hash,
            });
        }
        let expected_environment = self.execution_environment_address(user_op.from, user_op.control);
        if execution_environment != expected_environment {
            return Err(SettlementError::Reverted(format!(
                "execution environment {execution_environment} does not belong to user {} and control {}",
                user_op.from, user_op.control
            )));
        }

        self.settle(Settlement {
            tx,
            config,
            user_op,
            solver_ops,
            user_op_hash,
            bundler,
            execution_environment,
            dapp_nonce: None,
            simulate: is_simulation,
        })
    }

    fn create_execution_environment(
        &mut self,
        _tx: TxContext,
        user: Address,
        control: Address,
    ) -> Result<Address, SettlementError> {
        self.control(control)?;
        if let Some(existing) = self.ledger.execution_environment(user, control) {
            return Ok(existing);
        }
        let environment = self.execution_environment_address(user, control);
        self.ledger.set_execution_environment(user, control, environment);
        tracing::debug!(%user, %control, %environment, "execution environment created");
        Ok(environment)
    }

    fn deposit(&mut self, tx: TxContext) -> Result<(), SettlementError> {
        self.ledger
            .transfer_native(tx.from, self.config.atlas, tx.value)?;
        self.ledger.credit_unbonded(tx.from, tx.value);
        Ok(())
    }

    fn bond(&mut self, tx: TxContext, amount: U256) -> Result<(), SettlementError> {
        self.ledger.bond(tx.from, amount)
    }

    fn entry_point(&self) -> Address {
        self.config.atlas
    }
}
