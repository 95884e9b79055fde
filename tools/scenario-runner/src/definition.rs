use alloy_primitives::Address;
use anyhow::{bail, Result};
use atlas_bundle_harness::{
    presets::{units, SandboxWorld, SolverIdentity},
    sandbox::SolverBehaviour,
    Expect, OperationSigner, SubmitMode, SwapScenario,
};
use serde::Deserialize;

/// Identities beyond the preset ones get contracts at `0x51..`, `0x52..`, and so on.
const MAX_SOLVERS: usize = 16;

#[derive(Debug, Deserialize)]
pub struct ScenarioFile {
    pub scenarios: Vec<ScenarioDefinition>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwapKind {
    /// Exact token A in, at least `amount_out` token B.
    TokenToToken,
    /// Native in, exactly `amount_out` token B.
    NativeToExactToken,
}

#[derive(Clone, Debug, Deserialize)]
pub struct SolverDefinition {
    /// Whole reward tokens.
    pub bid: u64,
    /// Sandbox only; a fork runs whatever solver contract is deployed.
    #[serde(default)]
    pub behaviour: SolverBehaviour,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ScenarioDefinition {
    pub name: String,
    pub kind: SwapKind,
    /// Whole tokens (18 decimals).
    pub amount_in: u64,
    pub amount_out: u64,
    #[serde(default)]
    pub solvers: Vec<SolverDefinition>,
    #[serde(default = "default_mode")]
    pub mode: SubmitMode,
    #[serde(default)]
    pub expect: Expect,
    /// Defaults to the first solver that pays its bid.
    #[serde(default)]
    pub expected_winner: Option<usize>,
    #[serde(default)]
    pub corrupt_user_op_hash: bool,
}

fn default_mode() -> SubmitMode {
    SubmitMode::Metacall
}

impl ScenarioDefinition {
    /// `base` with one solver identity per declared solver. Extra identities are only minted when
    /// `extend` is set, since on a fork every solver contract must already be deployed.
    pub fn world(&self, base: &SandboxWorld, extend: bool) -> Result<SandboxWorld> {
        let mut world = base.clone();
        if self.solvers.len() > world.solvers.len() {
            if !extend {
                bail!(
                    "scenario `{}` declares {} solvers but only {} are deployed",
                    self.name,
                    self.solvers.len(),
                    world.solvers.len()
                );
            }
            if self.solvers.len() > MAX_SOLVERS {
                bail!("scenario `{}` declares more than {MAX_SOLVERS} solvers", self.name);
            }
            for index in world.solvers.len()..self.solvers.len() {
                world.solvers.push(SolverIdentity {
                    signer: OperationSigner::from_label(&format!("solver-{}", index + 1))?,
                    contract: Address::repeat_byte(0x51 + index as u8),
                    behaviour: SolverBehaviour::PayBid,
                });
            }
        }
        for (identity, solver) in world.solvers.iter_mut().zip(&self.solvers) {
            identity.behaviour = solver.behaviour;
        }
        Ok(world)
    }

    /// A fork settles through `metacall` only: its engine refuses `execute` from external accounts.
    pub fn ensure_fork_compatible(&self) -> Result<()> {
        if let SubmitMode::Execute { .. } = self.mode {
            bail!(
                "scenario `{}` uses execute mode, which the deployed settlement engine only accepts from \
                 itself; use metacall on a fork",
                self.name
            );
        }
        Ok(())
    }

    pub fn scenario(&self, world: &SandboxWorld) -> SwapScenario {
        let bids: Vec<_> = self.solvers.iter().map(|solver| units(solver.bid)).collect();
        let (amount_in, amount_out) = (units(self.amount_in), units(self.amount_out));
        let mut scenario = match self.kind {
            SwapKind::TokenToToken => world.token_to_token(&self.name, amount_in, amount_out, &bids),
            SwapKind::NativeToExactToken => {
                world.native_to_exact_token(&self.name, amount_in, amount_out, &bids)
            }
        };
        scenario.mode = self.mode;
        scenario.expect = self.expect;
        scenario.corrupt_user_op_hash = self.corrupt_user_op_hash;
        scenario.expected_winner = match self.expect {
            Expect::Rejected => None,
            Expect::Settled => self.expected_winner.or_else(|| {
                self.solvers
                    .iter()
                    .position(|solver| solver.behaviour == SolverBehaviour::PayBid)
            }),
        };
        scenario
    }
}
