//! Builds, signs, submits and verifies Atlas three-party operation bundles.
//!
//! The flow is strictly forward: [`OperationFactory`] builds unsigned records, [`OperationSigner`]
//! signs each party's record, [`BundleSubmitter`] sends the [`SignedBundle`] to the settlement engine
//! once, and [`InvariantVerifier`] checks the balance deltas and reward notification around that call.
//! [`SwapScenario`] drives the four stages against any [`Environment`]: the in-memory [`Sandbox`] or a
//! [`ForkEnvironment`] connected to a forked node.

pub mod bundle;
pub mod collaborators;
pub mod errors;
pub mod factory;
pub mod fork;
pub mod hashing;
pub mod presets;
pub mod sandbox;
pub mod scenario;
pub mod signer;
pub mod submitter;
pub mod verifier;

pub use bundle::{Signable, Signed, SignedBundle};
pub use collaborators::{
    Environment, PolicyContract, SettlementEngine, SettlementReceipt, TxContext,
    VerificationRegistry,
};
pub use errors::{
    AssertionFailure, EnvironmentError, ScenarioError, ScenarioFailure, SettlementError,
    SignerError, SolverOutcome, SolverRejection,
};
pub use factory::{BlockEnv, OperationDefaults, OperationFactory, OutputBound, SwapCall, SwapIntent};
pub use fork::{ForkAddresses, ForkConfig, ForkEnvironment};
pub use hashing::Domain;
pub use sandbox::{Sandbox, SandboxBuilder, SandboxConfig};
pub use scenario::{
    Expect, PreparedBundle, ScenarioOutcome, ScenarioParties, ScenarioStage, SolverParty,
    SwapScenario,
};
pub use signer::{recover_signer, OperationSigner};
pub use submitter::{BundleSubmitter, SubmitMode};
pub use verifier::{
    ExecutionSnapshot, Expectation, InputExpectation, InvariantVerifier, OutputExpectation,
    RewardExpectation,
};

#[cfg(test)]
mod tests;
