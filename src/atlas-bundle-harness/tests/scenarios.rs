use alloy_primitives::{Address, U256};
use atlas_bundle_harness::{
    presets::{units, SandboxWorld},
    sandbox::SolverBehaviour,
    Expect, ScenarioFailure, ScenarioStage, SettlementError, SubmitMode, SwapScenario,
    VerificationRegistry,
};
use atlas_operation_types::{ChainState, TokenContracts};

fn execute_mode() -> SubmitMode {
    SubmitMode::Execute {
        execution_environment: None,
        bundler: Address::ZERO,
        is_simulation: false,
    }
}

fn token_swap(world: &SandboxWorld) -> SwapScenario {
    world.token_to_token("token-a-for-token-b", units(1000), units(900), &[units(10)])
}

fn native_swap(world: &SandboxWorld) -> SwapScenario {
    world.native_to_exact_token("eth-for-exact-token-b", units(1), units(1000), &[units(10)])
}

#[test]
fn test_token_swap_settles_through_metacall() -> eyre::Result<()> {
    let world = SandboxWorld::standard()?;
    let mut sandbox = world.sandbox();
    let user = world.user.address();
    let surcharge_before = sandbox.cumulative_surcharge()?;

    let outcome = token_swap(&world).run(&mut sandbox)?;
    let receipt = outcome.receipt.expect("settled");
    assert!(receipt.auction_won);
    assert!(outcome.rejection.is_none());

    assert_eq!(sandbox.balance_of(world.token_a, user)?, units(9_000));
    assert_eq!(sandbox.balance_of(world.token_b, user)?, units(900));
    assert_eq!(sandbox.balance_of(world.reward_token, user)?, units(10));
    assert_eq!(
        sandbox.cumulative_surcharge()? - surcharge_before,
        world.expected_surcharge()
    );
    Ok(())
}

#[test]
fn test_native_swap_settles_through_metacall() -> eyre::Result<()> {
    let world = SandboxWorld::standard()?;
    let mut sandbox = world.sandbox();
    let user = world.user.address();
    let native_before = sandbox.native_balance(user)?;

    let outcome = native_swap(&world).run(&mut sandbox)?;
    let receipt = outcome.receipt.expect("settled");

    assert_eq!(sandbox.balance_of(world.token_b, user)?, units(1000));
    assert_eq!(
        sandbox.native_balance(user)?,
        native_before - units(1) - receipt.fee_paid
    );
    assert!(receipt.fee_paid > U256::ZERO);
    Ok(())
}

#[test]
fn test_both_swaps_settle_through_execute() -> eyre::Result<()> {
    let world = SandboxWorld::standard()?;
    let mut sandbox = world.sandbox();
    for mut scenario in [token_swap(&world), native_swap(&world)] {
        scenario.mode = execute_mode();
        let outcome = scenario.run(&mut sandbox)?;
        assert!(outcome.receipt.expect("settled").auction_won);
    }
    let user = world.user.address();
    assert_eq!(sandbox.balance_of(world.token_b, user)?, units(1900));
    assert_eq!(sandbox.balance_of(world.reward_token, user)?, units(20));
    Ok(())
}

#[test]
fn test_native_execute_charges_the_sending_bundler() -> eyre::Result<()> {
    let world = SandboxWorld::standard()?;
    let mut sandbox = world.sandbox();
    let bundler = Address::repeat_byte(0xb0);
    sandbox.deal_native(bundler, units(5));
    let user = world.user.address();
    let user_native = sandbox.native_balance(user)?;

    let mut scenario = native_swap(&world);
    scenario.sender = bundler;
    scenario.mode = SubmitMode::Execute {
        execution_environment: None,
        bundler,
        is_simulation: false,
    };
    assert_eq!(scenario.expectation(world.reward_token).input.account, bundler);

    let receipt = scenario.run(&mut sandbox)?.receipt.expect("settled");
    assert_eq!(sandbox.native_balance(user)?, user_native);
    assert_eq!(
        sandbox.native_balance(bundler)?,
        units(5) - units(1) - receipt.fee_paid
    );
    assert_eq!(sandbox.balance_of(world.token_b, user)?, units(1000));
    assert_eq!(sandbox.balance_of(world.reward_token, user)?, units(10));
    Ok(())
}

#[test]
fn test_simulation_leaves_state_untouched() -> eyre::Result<()> {
    let world = SandboxWorld::standard()?;
    let mut sandbox = world.sandbox();
    let mut scenario = token_swap(&world);
    scenario.mode = SubmitMode::Execute {
        execution_environment: None,
        bundler: Address::ZERO,
        is_simulation: true,
    };
    scenario.min_surcharge_increase = None;

    let outcome = scenario.run(&mut sandbox)?;
    let receipt = outcome.receipt.expect("simulated receipt");
    assert!(receipt.simulated);
    assert!(receipt.auction_won);

    let user = world.user.address();
    assert_eq!(sandbox.balance_of(world.token_a, user)?, units(10_000));
    assert_eq!(sandbox.balance_of(world.token_b, user)?, U256::ZERO);
    assert_eq!(sandbox.user_next_nonce(user, false)?, U256::from(1u64));
    Ok(())
}

#[test]
fn test_mismatched_user_op_hash_is_rejected_without_state_change() -> eyre::Result<()> {
    let world = SandboxWorld::standard()?;
    let mut sandbox = world.sandbox();
    let mut scenario = token_swap(&world);
    scenario.corrupt_user_op_hash = true;
    scenario.expect = Expect::Rejected;
    scenario.expected_winner = None;

    let outcome = scenario.run(&mut sandbox)?;
    match outcome.rejection {
        Some(SettlementError::NoSolverFulfilled(outcomes)) => {
            assert_eq!(outcomes.len(), 1);
            assert!(outcomes[0].result.is_err());
        }
        other => panic!("unexpected rejection: {other:?}"),
    }
    let user = world.user.address();
    assert_eq!(sandbox.balance_of(world.token_a, user)?, units(10_000));
    assert_eq!(sandbox.balance_of(world.reward_token, user)?, U256::ZERO);
    Ok(())
}

#[test]
fn test_failing_solvers_reject_required_fulfillment() -> eyre::Result<()> {
    let mut world = SandboxWorld::standard()?;
    for solver in &mut world.solvers {
        solver.behaviour = SolverBehaviour::Underpay;
    }
    let mut sandbox = world.sandbox();
    let mut scenario =
        world.token_to_token("underpaid", units(1000), units(900), &[units(10), units(20)]);
    scenario.expect = Expect::Rejected;
    scenario.expected_winner = None;

    let outcome = scenario.run(&mut sandbox)?;
    assert!(matches!(
        outcome.rejection,
        Some(SettlementError::NoSolverFulfilled(ref outcomes)) if outcomes.len() == 2
    ));
    Ok(())
}

#[test]
fn test_settling_when_rejection_expected_fails_at_verified() -> eyre::Result<()> {
    let world = SandboxWorld::standard()?;
    let mut sandbox = world.sandbox();
    let mut scenario = token_swap(&world);
    scenario.expect = Expect::Rejected;

    let err = scenario.run(&mut sandbox).unwrap_err();
    assert_eq!(err.stage, ScenarioStage::Verified);
    assert!(matches!(err.failure, ScenarioFailure::Assertion(_)));
    Ok(())
}

#[test]
fn test_unreachable_minimum_fails_at_submitted() -> eyre::Result<()> {
    let world = SandboxWorld::standard()?;
    let mut sandbox = world.sandbox();
    let scenario = world.token_to_token("greedy", units(1000), units(901), &[units(10)]);

    let err = scenario.run(&mut sandbox).unwrap_err();
    assert_eq!(err.stage, ScenarioStage::Submitted);
    assert!(matches!(
        err.failure,
        ScenarioFailure::Settlement(SettlementError::VenueReverted(_))
    ));
    assert_eq!(sandbox.balance_of(world.token_a, world.user.address())?, units(10_000));
    Ok(())
}

#[test]
fn test_deadline_at_current_block_is_accepted() -> eyre::Result<()> {
    let world = SandboxWorld::standard()?;
    let mut sandbox = world.sandbox();
    let mut scenario = token_swap(&world);
    scenario.intent.deadline_offset = 0;

    let outcome = scenario.run(&mut sandbox)?;
    assert!(outcome.receipt.is_some());
    Ok(())
}
