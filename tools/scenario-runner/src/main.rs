use std::{
    fs,
    path::{Path, PathBuf},
    time::Instant,
};

use alloy_primitives::Address;
use anyhow::{bail, Context, Result};
use atlas_bundle_harness::{
    presets::{units, SandboxWorld},
    Environment, EnvironmentError, ForkAddresses, ForkConfig, ForkEnvironment, OperationSigner,
    ScenarioStage, SwapScenario,
};
use clap::{Parser, ValueEnum};
use serde::Serialize;
use serde_json::{json, Value};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use tracing_subscriber::EnvFilter;

mod definition;

use definition::{ScenarioDefinition, ScenarioFile};

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, Serialize)]
#[serde(rename_all = "snake_case")]
enum Backend {
    /// Deterministic in-memory sandbox, one per scenario.
    Sandbox,
    /// Anvil-style forked node at `--rpc-url`.
    Fork,
}

/// Run Atlas swap scenarios (build, sign, submit, verify) and write a JSON report.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// Scenario definitions (JSON). `scenarios/fork.json` holds the metacall-only set for `--backend fork`.
    #[arg(long, default_value = "tools/scenario-runner/scenarios/swap.json")]
    scenarios: PathBuf,

    #[arg(long, value_enum, default_value_t = Backend::Sandbox)]
    backend: Backend,

    /// Forked node endpoint, required by `--backend fork`.
    #[arg(long, env = "RPC_URL")]
    rpc_url: Option<String>,

    /// Chain id the fork must report.
    #[arg(long, env = "CHAIN_ID")]
    chain_id: Option<u64>,

    /// Deployment addresses on the fork (same layout as the deployer output).
    #[arg(long, default_value = "deployments.fork.json")]
    deployments_path: PathBuf,

    /// Private key of the control's signatory on the fork (hex string, 0x...).
    #[arg(long, env = "GOVERNANCE_KEY")]
    governance_key: Option<String>,

    #[arg(long, default_value = "scenario-report.json")]
    report_path: PathBuf,

    /// Run only the named scenarios (repeatable).
    #[arg(long)]
    only: Vec<String>,

    /// Run sandbox scenarios concurrently, each on its own sandbox.
    #[arg(long)]
    parallel: bool,
}

#[derive(Debug, Serialize)]
struct ScenarioResult {
    name: String,
    passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    stage: Option<ScenarioStage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_op_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    auction_won: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    fee_paid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    rejection: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    solver_outcomes: Vec<String>,
    duration_ms: u128,
}

impl ScenarioResult {
    fn invalid(name: &str, message: String) -> Self {
        Self {
            name: name.to_string(),
            passed: false,
            stage: None,
            message: Some(message),
            user_op_hash: None,
            auction_won: None,
            fee_paid: None,
            rejection: None,
            solver_outcomes: Vec::new(),
            duration_ms: 0,
        }
    }
}

fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let cli = Cli::parse();

    let file = load_scenarios(&cli.scenarios)?;
    let selected: Vec<&ScenarioDefinition> = file
        .scenarios
        .iter()
        .filter(|definition| cli.only.is_empty() || cli.only.contains(&definition.name))
        .collect();
    if selected.is_empty() {
        bail!("no scenarios selected from {}", cli.scenarios.display());
    }

    let started_at = now();
    let base = SandboxWorld::standard()?;
    let results = match cli.backend {
        Backend::Sandbox => run_sandbox(&base, &selected, cli.parallel),
        Backend::Fork => run_fork(&cli, base, &selected)?,
    };

    for result in &results {
        match (&result.stage, &result.message) {
            (_, None) => println!("PASS {}", result.name),
            (Some(stage), Some(message)) => println!("FAIL {} at {stage}: {message}", result.name),
            (None, Some(message)) => println!("FAIL {}: {message}", result.name),
        }
    }
    write_report(&cli, &started_at, &results)?;

    let failed = results.iter().filter(|result| !result.passed).count();
    if failed > 0 {
        bail!("{failed} of {} scenarios failed", results.len());
    }
    println!("All {} scenarios passed", results.len());
    Ok(())
}

fn load_scenarios(path: &Path) -> Result<ScenarioFile> {
    let raw = fs::read_to_string(path).with_context(|| format!("failed reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("failed parsing scenarios in {}", path.display()))
}

fn run_one<E: Environment + ?Sized>(scenario: &SwapScenario, env: &mut E) -> ScenarioResult {
    let started = Instant::now();
    let outcome = scenario.run(env);
    let duration_ms = started.elapsed().as_millis();
    match outcome {
        Ok(outcome) => ScenarioResult {
            name: outcome.name,
            passed: true,
            stage: None,
            message: None,
            user_op_hash: Some(outcome.user_op_hash.to_string()),
            auction_won: outcome.receipt.as_ref().map(|receipt| receipt.auction_won),
            fee_paid: outcome.receipt.as_ref().map(|receipt| receipt.fee_paid.to_string()),
            rejection: outcome.rejection.as_ref().map(ToString::to_string),
            solver_outcomes: outcome
                .receipt
                .map(|receipt| receipt.solver_outcomes.iter().map(ToString::to_string).collect())
                .unwrap_or_default(),
            duration_ms,
        },
        Err(err) => ScenarioResult {
            stage: Some(err.stage),
            duration_ms,
            ..ScenarioResult::invalid(&err.scenario, err.failure.to_string())
        },
    }
}

fn run_sandbox(base: &SandboxWorld, definitions: &[&ScenarioDefinition], parallel: bool) -> Vec<ScenarioResult> {
    let run = |definition: &ScenarioDefinition| match definition.world(base, true) {
        Ok(world) => {
            let mut sandbox = world.sandbox();
            run_one(&definition.scenario(&world), &mut sandbox)
        }
        Err(err) => ScenarioResult::invalid(&definition.name, format!("{err:#}")),
    };
    if !parallel {
        return definitions.iter().map(|definition| run(definition)).collect();
    }

    let run = &run;
    std::thread::scope(|scope| {
        let handles: Vec<_> = definitions
            .iter()
            .map(|definition| (definition.name.as_str(), scope.spawn(move || run(definition))))
            .collect();
        handles
            .into_iter()
            .map(|(name, handle)| {
                handle
                    .join()
                    .unwrap_or_else(|_| ScenarioResult::invalid(name, "scenario thread panicked".to_string()))
            })
            .collect()
    })
}

fn run_fork(cli: &Cli, base: SandboxWorld, definitions: &[&ScenarioDefinition]) -> Result<Vec<ScenarioResult>> {
    let rpc_url = cli.rpc_url.clone().ok_or(EnvironmentError::MissingRpcUrl)?;
    let config = ForkConfig {
        rpc_url,
        chain_id: cli.chain_id,
    };
    let deployments = read_json(&cli.deployments_path)?;
    let world = fork_world(base, &deployments, cli.governance_key.as_deref())?;
    let mut env = ForkEnvironment::connect(
        &config,
        ForkAddresses {
            atlas: world.config.atlas,
            verification: world.config.verification,
        },
    )?;
    tracing::info!(chain_id = env.chain_id(), rpc = %config.rpc_url, "connected to fork");

    // Token balances on the fork are whatever the deployment seeded; only gas money is topped up.
    env.set_native_balance(world.user.address(), units(100))?;
    for solver in &world.solvers {
        env.set_native_balance(solver.signer.address(), units(10))?;
    }

    let mut results = Vec::with_capacity(definitions.len());
    for definition in definitions {
        let prepared = definition
            .ensure_fork_compatible()
            .and_then(|()| definition.world(&world, false));
        let result = match prepared {
            Ok(world) => run_isolated(&definition.scenario(&world), &mut env)?,
            Err(err) => ScenarioResult::invalid(&definition.name, format!("{err:#}")),
        };
        results.push(result);
    }
    Ok(results)
}

/// Run `scenario` between a snapshot and a revert, so every scenario on a shared chain starts from
/// the same state. A failed revert aborts the run since later scenarios would inherit its effects.
fn run_isolated<E: Environment + ?Sized>(scenario: &SwapScenario, env: &mut E) -> Result<ScenarioResult> {
    let id = match env.snapshot() {
        Ok(id) => id,
        Err(err) => return Ok(ScenarioResult::invalid(&scenario.name, format!("snapshot failed: {err}"))),
    };
    let result = run_one(scenario, env);
    env.revert_to(id)
        .with_context(|| format!("failed reverting state after scenario `{}`", scenario.name))?;
    tracing::debug!(scenario = %scenario.name, snapshot = %id, "state reverted");
    Ok(result)
}

/// Point the preset world at the contracts recorded under `deployments.<key>.address`.
fn fork_world(mut world: SandboxWorld, deployments: &Value, governance_key: Option<&str>) -> Result<SandboxWorld> {
    world.config.atlas = deployed(deployments, "atlas")?;
    world.config.verification = deployed(deployments, "atlas-verification")?;
    world.venue = deployed(deployments, "uniswap-v2-router")?;
    world.weth = deployed(deployments, "weth")?;
    world.token_a = deployed(deployments, "token-a")?;
    world.token_b = deployed(deployments, "token-b")?;
    world.reward_token = deployed(deployments, "reward-token")?;
    world.control = deployed(deployments, "swap-reward-control")?;

    let mut solvers = Vec::new();
    for (index, mut identity) in world.solvers.into_iter().enumerate() {
        match deployed(deployments, &format!("solver-{}", index + 1)) {
            Ok(contract) => {
                identity.contract = contract;
                solvers.push(identity);
            }
            Err(_) => break,
        }
    }
    world.solvers = solvers;

    if let Some(key) = governance_key {
        world.governance = OperationSigner::from_hex(key).context("invalid GOVERNANCE_KEY")?;
    }
    Ok(world)
}

fn deployed(deployments: &Value, key: &str) -> Result<Address> {
    let raw = deployments["deployments"][key]["address"]
        .as_str()
        .with_context(|| format!("deployments.{key}.address missing"))?;
    raw.parse()
        .with_context(|| format!("deployments.{key}.address `{raw}` is not an address"))
}

fn read_json(path: &Path) -> Result<Value> {
    let raw = fs::read_to_string(path).with_context(|| format!("failed reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("failed parsing JSON in {}", path.display()))
}

fn now() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "unknown".to_string())
}

fn write_report(cli: &Cli, started_at: &str, results: &[ScenarioResult]) -> Result<()> {
    let passed = results.iter().filter(|result| result.passed).count();
    let report = json!({
        "backend": cli.backend,
        "scenarios_path": cli.scenarios.display().to_string(),
        "started_at": started_at,
        "finished_at": now(),
        "passed": passed,
        "failed": results.len() - passed,
        "results": results,
    });
    write_json_atomic(&cli.report_path, &report)
}

fn write_json_atomic(path: &Path, value: &Value) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    if !parent.exists() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed creating directory {}", parent.display()))?;
    }

    let serialised = serde_json::to_string_pretty(value).context("failed serialising report JSON")?;
    let tmp_path = tmp_path_for(path);
    fs::write(&tmp_path, serialised.as_bytes())
        .with_context(|| format!("failed writing temp file {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("failed replacing {}", path.display()))?;
    Ok(())
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_os_string();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}
