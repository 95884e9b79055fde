//! Bundle Submitter: one settlement call per bundle, bundle contents passed through untouched.

use alloy_primitives::Address;
use serde::{Deserialize, Serialize};

use crate::{
    bundle::SignedBundle,
    collaborators::{SettlementEngine, SettlementReceipt, TxContext, VerificationRegistry},
    errors::SettlementError,
};

/// How the settlement entry point is invoked.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum SubmitMode {
    /// `metacall`: the engine derives the execution environment; the sender is the bundler.
    Metacall,
    /// `execute` with an explicit environment and bundler.
    Execute {
        /// Resolved with `createExecutionEnvironment` when absent.
        #[serde(default)]
        execution_environment: Option<Address>,
        bundler: Address,
        #[serde(default)]
        is_simulation: bool,
    },
}

impl SubmitMode {
    pub fn name(&self) -> &'static str {
        match self {
            SubmitMode::Metacall => "metacall",
            SubmitMode::Execute { is_simulation: true, .. } => "execute (simulation)",
            SubmitMode::Execute { .. } => "execute",
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct BundleSubmitter {
    sender: Address,
    mode: SubmitMode,
}

impl BundleSubmitter {
    pub fn new(sender: Address, mode: SubmitMode) -> Self {
        Self { sender, mode }
    }

    pub fn sender(&self) -> Address {
        self.sender
    }

    pub fn mode(&self) -> SubmitMode {
        self.mode
    }

    /// Send `bundle` to the settlement entry point, attaching the user operation's value.
    pub fn submit<E>(&self, engine: &mut E, bundle: &SignedBundle) -> Result<SettlementReceipt, SettlementError>
    where
        E: SettlementEngine + VerificationRegistry + ?Sized,
    {
        let user_op = bundle.user_operation();
        let solver_ops = bundle.solver_operations();
        let tx = TxContext::new(self.sender).with_value(user_op.value);
        tracing::info!(
            mode = self.mode.name(),
            sender = %self.sender,
            solvers = solver_ops.len(),
            value = %user_op.value,
            "submitting bundle"
        );

        match self.mode {
            SubmitMode::Metacall => engine.metacall(tx, user_op, &solver_ops, bundle.dapp_operation()),
            SubmitMode::Execute {
                execution_environment,
                bundler,
                is_simulation,
            } => {
                let environment = match execution_environment {
                    Some(environment) => environment,
                    None => engine.create_execution_environment(
                        TxContext::new(self.sender),
                        user_op.from,
                        user_op.control,
                    )?,
                };
                let user_op_hash = engine.user_operation_hash(user_op)?;
                engine.execute(
                    tx,
                    bundle.config(),
                    user_op,
                    &solver_ops,
                    environment,
                    bundler,
                    user_op_hash,
                    is_simulation,
                )
            }
        }
    }
}

