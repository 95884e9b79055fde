use alloy_primitives::{Address, Bytes, Log, B256, U256};
use alloy_sol_types::{SolEvent, SolValue};
use atlas_operation_types::{
    Asset, CallConfigFlag, ChainState, SnapshotId, StateError, TokenContracts, TokensRewarded,
};
use proptest::prelude::*;

use crate::{
    collaborators::{PolicyContract, SettlementEngine, SettlementReceipt, TxContext, VerificationRegistry},
    errors::{AssertionFailure, ScenarioFailure, SettlementError, SignerError, SolverRejection},
    factory::{BlockEnv, OutputBound, SwapCall, SwapIntent},
    hashing::{call_chain_hash, user_operation_hash, Domain},
    presets::{units, SandboxWorld},
    sandbox::{Ledger, Rate, Sandbox, SolverBehaviour, Venue},
    signer::{recover_signer, OperationSigner},
    verifier::{verify_reward_event, Expectation, InputExpectation, InvariantVerifier, OutputExpectation, RewardExpectation},
    scenario::ScenarioStage,
    SignedBundle,
};

fn world() -> SandboxWorld {
    SandboxWorld::standard().expect("standard world")
}

/// Governance, input approval and a bond for the first solver.
fn setup(world: &SandboxWorld, sandbox: &mut Sandbox) {
    sandbox
        .initialize_governance(TxContext::new(world.governance.address()), world.control)
        .unwrap();
    let atlas = sandbox.entry_point();
    sandbox
        .approve(world.token_a, world.user.address(), atlas, units(1000))
        .unwrap();
    let solver = world.solvers[0].signer.address();
    sandbox
        .deposit(TxContext::new(solver).with_value(units(1)))
        .unwrap();
    sandbox.bond(TxContext::new(solver), units(1)).unwrap();
}

fn token_intent(world: &SandboxWorld) -> SwapIntent {
    world
        .token_to_token("intent", units(1000), units(900), &[])
        .intent
}

fn bundle_signed_by(world: &SandboxWorld, sandbox: &Sandbox, user_key: &OperationSigner, bid: U256) -> SignedBundle {
    let factory = world.factory();
    let user_op = factory.user_operation(
        world.user.address(),
        U256::from(1u64),
        sandbox.block(),
        world.control,
        world.call_config,
        &token_intent(world),
    );
    let config = world.control_contract().dapp_config();
    let signed_user = user_key.sign(sandbox, user_op).unwrap();
    let hash = user_operation_hash(signed_user.record());
    let bid_token = sandbox.bid_format(world.control, signed_user.record()).unwrap();
    let solver = &world.solvers[0];
    let op = factory.solver_operation(
        solver.signer.address(),
        solver.contract,
        signed_user.record(),
        hash,
        &config,
        bid_token,
        bid,
    );
    let signed_solver = solver.signer.sign(sandbox, op).unwrap();
    let dapp_op = factory.dapp_operation(
        world.governance.address(),
        &signed_user,
        std::slice::from_ref(&signed_solver),
        hash,
        &config,
        world.user.address(),
        U256::ZERO,
    );
    let signed_dapp = world.governance.sign(sandbox, dapp_op).unwrap();
    SignedBundle::new(signed_user, vec![signed_solver], signed_dapp, config)
}

#[test]
fn test_sign_digest_recovers_signer() {
    let signer = OperationSigner::from_label("alice").unwrap();
    let digest = B256::repeat_byte(0x42);
    let signature = signer.sign_digest(digest).unwrap();
    assert_eq!(signature.len(), 65);
    assert!(matches!(signature[64], 27 | 28));
    assert_eq!(recover_signer(digest, &signature).unwrap(), signer.address());

    let mut raw_v = signature.to_vec();
    raw_v[64] -= 27;
    assert_eq!(recover_signer(digest, &raw_v).unwrap(), signer.address());
}

#[test]
fn test_recover_rejects_malformed_signature() {
    let digest = B256::repeat_byte(1);
    assert_eq!(
        recover_signer(digest, &[0u8; 64]),
        Err(SignerError::MalformedSignature(64))
    );
    let mut bad_v = vec![1u8; 65];
    bad_v[64] = 5;
    assert_eq!(recover_signer(digest, &bad_v), Err(SignerError::RecoveryFailed));
}

#[test]
fn test_labelled_signer_address_matches_recovered_signer() {
    let signer = OperationSigner::from_label("governance").unwrap();
    assert_eq!(signer.address(), OperationSigner::from_label("governance").unwrap().address());
    assert_ne!(signer.address(), OperationSigner::from_label("user").unwrap().address());

    let digest = B256::repeat_byte(0x24);
    let signature = signer.sign_digest(digest).unwrap();
    assert_eq!(recover_signer(digest, &signature).unwrap(), signer.address());
}

#[test]
fn test_signer_from_hex_matches_from_slice() {
    let secret = [7u8; 32];
    let from_hex = OperationSigner::from_hex(&format!("0x{}", hex::encode(secret))).unwrap();
    let from_slice = OperationSigner::from_slice(&secret).unwrap();
    assert_eq!(from_hex.address(), from_slice.address());
    assert!(matches!(
        OperationSigner::from_hex("0xzz"),
        Err(SignerError::InvalidKey(_))
    ));
    assert!(matches!(
        OperationSigner::from_slice(&[0u8; 32]),
        Err(SignerError::InvalidKey(_))
    ));
}

#[test]
fn test_signing_only_writes_the_signature_slot() {
    let world = world();
    let sandbox = world.sandbox();
    let unsigned = world.factory().user_operation(
        world.user.address(),
        U256::from(1u64),
        sandbox.block(),
        world.control,
        world.call_config,
        &token_intent(&world),
    );
    let signed = world.user.sign(&sandbox, unsigned.clone()).unwrap();

    let mut stripped = signed.record().clone();
    stripped.signature = Bytes::new();
    assert_eq!(stripped, unsigned);

    let payload = sandbox.user_operation_payload(&unsigned).unwrap();
    assert_eq!(
        recover_signer(payload, &signed.signature).unwrap(),
        world.user.address()
    );
}

#[test]
fn test_signer_does_not_check_declared_party() {
    let world = world();
    let sandbox = world.sandbox();
    let bundle = bundle_signed_by(&world, &sandbox, &world.governance, units(10));
    let user_op = bundle.user_operation();
    let payload = sandbox.user_operation_payload(user_op).unwrap();
    assert_eq!(
        recover_signer(payload, &user_op.signature).unwrap(),
        world.governance.address()
    );
    assert_ne!(user_op.from, world.governance.address());
}

#[test]
fn test_factory_output_is_deterministic() {
    let world = world();
    let factory = world.factory();
    let block = BlockEnv {
        number: 100,
        timestamp: 1_000,
    };
    let intent = token_intent(&world);
    let first = factory.user_operation(world.user.address(), U256::from(3u64), block, world.control, world.call_config, &intent);
    let second = factory.user_operation(world.user.address(), U256::from(3u64), block, world.control, world.call_config, &intent);
    assert_eq!(first.abi_encode(), second.abi_encode());
    assert_eq!(user_operation_hash(&first), user_operation_hash(&second));
    assert_eq!(first.deadline, U256::from(110u64));
    assert_eq!(first.to, world.config.atlas);
    assert_eq!(first.dapp, world.venue);
}

#[test]
fn test_swap_call_variant_follows_intent() {
    let world = world();
    let intent = SwapIntent {
        input: Asset::Native,
        amount_in: units(1),
        output: Asset::Token(world.token_b),
        amount_out: units(1000),
        bound: OutputBound::Exact,
        recipient: world.user.address(),
        deadline_offset: 5,
    };
    let call = SwapCall::for_intent(&intent, world.weth, U256::from(2_000u64));
    assert!(matches!(call, SwapCall::EthForExactTokens { .. }));
    assert_eq!(call.native_value(), units(1));
    assert_eq!(call.path(), &[world.weth, world.token_b]);
    assert_eq!(call.token_input(), None);
    assert_eq!(SwapCall::decode(&call.encode(), units(1)).unwrap(), call);

    let minimum = SwapIntent {
        input: Asset::Token(world.token_a),
        output: Asset::Native,
        bound: OutputBound::Minimum,
        ..intent
    };
    let call = SwapCall::for_intent(&minimum, world.weth, U256::from(2_000u64));
    assert!(matches!(call, SwapCall::ExactTokensForEth { .. }));
    assert_eq!(call.token_input(), Some((world.token_a, units(1))));
}

#[test]
fn test_payload_is_bound_to_domain() {
    let world = world();
    let op = world.factory().user_operation(
        world.user.address(),
        U256::from(1u64),
        BlockEnv::default(),
        world.control,
        world.call_config,
        &token_intent(&world),
    );
    let mainnet = Domain::new(1, world.config.verification);
    let other = Domain::new(10, world.config.verification);
    let struct_hash = user_operation_hash(&op);
    assert_ne!(mainnet.typed_digest(struct_hash), other.typed_digest(struct_hash));
    assert_ne!(mainnet.typed_digest(struct_hash), struct_hash);
}

#[test]
fn test_call_chain_hash_depends_on_solver_order() {
    let world = world();
    let sandbox = world.sandbox();
    let bundle = bundle_signed_by(&world, &sandbox, &world.user, units(10));
    let mut first = bundle.solver_operations()[0].clone();
    let mut second = first.clone();
    first.bidAmount = units(1);
    second.bidAmount = units(2);
    let user_op = bundle.user_operation();
    assert_ne!(
        call_chain_hash(user_op, &[first.clone(), second.clone()]),
        call_chain_hash(user_op, &[second, first])
    );
}

#[test]
fn test_venue_quotes_are_frictionless() {
    let (a, b, weth) = (Address::repeat_byte(1), Address::repeat_byte(2), Address::repeat_byte(3));
    let mut venue = Venue::new(Address::repeat_byte(9), weth);
    venue.set_rate(a, b, Rate::new(9, 10));
    venue.set_rate(weth, b, Rate::new(1000, 1));
    assert_eq!(venue.amount_out(&[a, b], units(1000)).unwrap(), units(900));
    assert_eq!(venue.amount_in(&[weth, b], units(1000)).unwrap(), units(1));
    // Exact-output inputs round up.
    assert_eq!(venue.amount_in(&[a, b], U256::from(1u64)).unwrap(), U256::from(2u64));
    assert!(matches!(
        venue.amount_out(&[b, a], units(1)),
        Err(SettlementError::VenueReverted(_))
    ));
    assert!(venue.amount_out(&[a], units(1)).is_err());
}

#[test]
fn test_venue_swap_enforces_minimum_output() {
    let world = world();
    let venue = world.sandbox().venue().clone();
    let mut ledger = Ledger::default();
    let caller = Address::repeat_byte(0x77);
    ledger.mint_token(world.token_a, caller, units(1000));
    ledger.mint_token(world.token_b, venue.address(), units(5000));
    let greedy = SwapCall::ExactTokensForTokens {
        amount_in: units(1000),
        amount_out_min: units(901),
        path: vec![world.token_a, world.token_b],
        to: caller,
        deadline: U256::MAX,
    };
    assert!(venue.swap(&mut ledger, caller, &greedy, 0).is_err());

    let fair = SwapCall::ExactTokensForTokens {
        amount_in: units(1000),
        amount_out_min: units(900),
        path: vec![world.token_a, world.token_b],
        to: caller,
        deadline: U256::MAX,
    };
    let fill = venue.swap(&mut ledger, caller, &fair, 0).unwrap();
    assert_eq!(fill.amount_out, units(900));
    assert_eq!(ledger.token(world.token_a, caller), U256::ZERO);
    assert_eq!(ledger.token(world.token_b, caller), units(900));
}

#[test]
fn test_ledger_transfer_from_checks_allowance() {
    let (token, owner, spender, to) = (
        Address::repeat_byte(1),
        Address::repeat_byte(2),
        Address::repeat_byte(3),
        Address::repeat_byte(4),
    );
    let mut ledger = Ledger::default();
    ledger.mint_token(token, owner, U256::from(100u64));
    ledger.approve(token, owner, spender, U256::from(40u64));
    assert!(matches!(
        ledger.transfer_from(token, spender, owner, to, U256::from(50u64)),
        Err(SettlementError::InsufficientAllowance { .. })
    ));
    ledger
        .transfer_from(token, spender, owner, to, U256::from(40u64))
        .unwrap();
    assert_eq!(ledger.allowance(token, owner, spender), U256::ZERO);
    assert_eq!(ledger.token(token, to), U256::from(40u64));

    ledger.approve(token, owner, spender, U256::MAX);
    ledger
        .transfer_from(token, spender, owner, to, U256::from(10u64))
        .unwrap();
    assert_eq!(ledger.allowance(token, owner, spender), U256::MAX);
}

#[test]
fn test_snapshot_revert_consumes_later_ids() {
    let world = world();
    let mut sandbox = world.sandbox();
    let user = world.user.address();
    let first = sandbox.snapshot().unwrap();
    sandbox.deal_token(world.token_b, user, units(1));
    let second = sandbox.snapshot().unwrap();
    sandbox.deal_token(world.token_b, user, units(1));

    sandbox.revert_to(first).unwrap();
    assert_eq!(sandbox.balance_of(world.token_b, user).unwrap(), U256::ZERO);
    assert_eq!(
        sandbox.revert_to(second),
        Err(StateError::UnknownSnapshot(second))
    );
    assert_eq!(
        sandbox.revert_to(SnapshotId(U256::from(99u64))),
        Err(StateError::UnknownSnapshot(SnapshotId(U256::from(99u64))))
    );
}

#[test]
fn test_governance_initialization_requires_signatory() {
    let world = world();
    let mut sandbox = world.sandbox();
    assert!(matches!(
        sandbox.initialize_governance(TxContext::new(world.user.address()), world.control),
        Err(SettlementError::NotControlSignatory { .. })
    ));
    sandbox
        .initialize_governance(TxContext::new(world.governance.address()), world.control)
        .unwrap();
    assert_eq!(
        sandbox.governance_of(world.control).unwrap(),
        Some(world.governance.address())
    );
    assert_eq!(
        sandbox.initialize_governance(TxContext::new(world.governance.address()), world.control),
        Err(SettlementError::GovernanceAlreadyInitialized(world.control))
    );
    assert!(matches!(
        sandbox.initialize_governance(TxContext::new(world.governance.address()), Address::ZERO),
        Err(SettlementError::UnknownControl(_))
    ));
}

#[test]
fn test_metacall_rejects_wrong_user_key_without_state_change() {
    let world = world();
    let mut sandbox = world.sandbox();
    setup(&world, &mut sandbox);
    let bundle = bundle_signed_by(&world, &sandbox, &world.governance, units(10));
    let before = sandbox.ledger().clone();
    let err = sandbox
        .metacall(
            TxContext::new(world.user.address()),
            bundle.user_operation(),
            &bundle.solver_operations(),
            bundle.dapp_operation(),
        )
        .unwrap_err();
    assert_eq!(
        err,
        SettlementError::InvalidUserSignature {
            expected: world.user.address()
        }
    );
    assert_eq!(sandbox.ledger(), &before);
}

#[test]
fn test_metacall_requires_governance() {
    let world = world();
    let mut sandbox = world.sandbox();
    let bundle = bundle_signed_by(&world, &sandbox, &world.user, units(10));
    let err = sandbox
        .metacall(
            TxContext::new(world.user.address()),
            bundle.user_operation(),
            &bundle.solver_operations(),
            bundle.dapp_operation(),
        )
        .unwrap_err();
    assert_eq!(err, SettlementError::GovernanceNotInitialized(world.control));
}

#[test]
fn test_metacall_replay_is_rejected() {
    let world = world();
    let mut sandbox = world.sandbox();
    setup(&world, &mut sandbox);
    sandbox
        .approve(world.token_a, world.user.address(), world.config.atlas, U256::MAX)
        .unwrap();
    let bundle = bundle_signed_by(&world, &sandbox, &world.user, units(10));
    let tx = TxContext::new(world.user.address());
    let receipt = sandbox
        .metacall(tx, bundle.user_operation(), &bundle.solver_operations(), bundle.dapp_operation())
        .unwrap();
    assert!(receipt.auction_won);
    assert_eq!(receipt.solver_outcomes.len(), 1);
    assert_eq!(
        sandbox.metacall(tx, bundle.user_operation(), &bundle.solver_operations(), bundle.dapp_operation()),
        Err(SettlementError::InvalidUserNonce(U256::from(1u64)))
    );
}

#[test]
fn test_solver_without_bond_is_rejected_statically() {
    let world = world();
    let mut sandbox = world.sandbox();
    sandbox
        .initialize_governance(TxContext::new(world.governance.address()), world.control)
        .unwrap();
    sandbox
        .approve(world.token_a, world.user.address(), world.config.atlas, units(1000))
        .unwrap();
    let bundle = bundle_signed_by(&world, &sandbox, &world.user, units(10));
    let err = sandbox
        .metacall(
            TxContext::new(world.user.address()),
            bundle.user_operation(),
            &bundle.solver_operations(),
            bundle.dapp_operation(),
        )
        .unwrap_err();
    match err {
        SettlementError::NoSolverFulfilled(outcomes) => {
            assert_eq!(outcomes.len(), 1);
            assert!(matches!(
                outcomes[0].result,
                Err(SolverRejection::InsufficientBond { .. })
            ));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_solver_priority_falls_through_to_next_solver() {
    let mut world = world();
    world.solvers[0].behaviour = SolverBehaviour::Revert;
    let mut sandbox = world.sandbox();
    let mut scenario = world.token_to_token("fallthrough", units(1000), units(900), &[units(10), units(20)]);
    scenario.expected_winner = Some(1);

    let outcome = scenario.run(&mut sandbox).unwrap();
    let receipt = outcome.receipt.unwrap();
    assert_eq!(receipt.solver_outcomes.len(), 2);
    assert_eq!(receipt.solver_outcomes[0].result, Err(SolverRejection::Reverted));
    assert_eq!(receipt.solver_outcomes[1].result, Ok(()));
    assert_eq!(
        sandbox.balance_of(world.reward_token, world.user.address()).unwrap(),
        units(20)
    );
}

#[test]
fn test_call_chain_hash_flag_is_enforced_and_satisfied() {
    let mut world = world();
    world.call_config = world.call_config.with(CallConfigFlag::VerifyCallChainHash);
    let mut sandbox = world.sandbox();
    let scenario = world.token_to_token("call-chain", units(1000), units(900), &[units(5)]);
    let outcome = scenario.run(&mut sandbox).unwrap();
    assert!(outcome.receipt.unwrap().auction_won);
}

fn balances_expectation(world: &SandboxWorld, reward: Option<RewardExpectation>) -> Expectation {
    Expectation {
        input: InputExpectation {
            account: world.user.address(),
            asset: Asset::Token(world.token_a),
            amount: U256::ZERO,
        },
        output: OutputExpectation {
            account: world.user.address(),
            asset: Asset::Token(world.token_b),
            amount: units(900),
            bound: OutputBound::Minimum,
        },
        reward,
        min_surcharge_increase: None,
    }
}

fn reward_log(world: &SandboxWorld, token: Address, amount: U256) -> Log {
    Log {
        address: world.control,
        data: TokensRewarded {
            user: world.user.address(),
            token,
            amount,
        }
        .encode_log_data(),
    }
}

#[test]
fn test_verifier_names_the_failing_input_check() {
    let world = world();
    let mut sandbox = world.sandbox();
    let mut expectation = balances_expectation(&world, None);
    expectation.input.amount = units(1000);
    let verifier = InvariantVerifier::new(expectation);
    let pre = verifier.capture(&sandbox).unwrap();
    sandbox.deal_token(world.token_b, world.user.address(), units(900));
    let post = verifier.capture(&sandbox).unwrap();

    let err = verifier
        .verify(&pre, &post, &SettlementReceipt::default())
        .unwrap_err();
    assert!(matches!(err, AssertionFailure::InputBalance { .. }));
    assert!(err.to_string().starts_with("input token"));
}

#[test]
fn test_verifier_combines_deltas_on_shared_balance() {
    let world = world();
    let reward = RewardExpectation {
        user: world.user.address(),
        token: world.token_b,
        amount: units(10),
    };
    let verifier = InvariantVerifier::new(balances_expectation(&world, Some(reward)));
    let receipt = SettlementReceipt {
        auction_won: true,
        logs: vec![reward_log(&world, world.token_b, units(10))],
        ..SettlementReceipt::default()
    };

    let mut sandbox = world.sandbox();
    let pre = verifier.capture(&sandbox).unwrap();
    sandbox.deal_token(world.token_b, world.user.address(), units(910));
    let post = verifier.capture(&sandbox).unwrap();
    verifier.verify(&pre, &post, &receipt).unwrap();

    let mut short = world.sandbox();
    let pre = verifier.capture(&short).unwrap();
    short.deal_token(world.token_b, world.user.address(), units(905));
    let post = verifier.capture(&short).unwrap();
    match verifier.verify(&pre, &post, &receipt).unwrap_err() {
        AssertionFailure::OutputBalance { expected, actual, bound, .. } => {
            assert_eq!(expected, units(910));
            assert_eq!(actual, units(905));
            assert_eq!(bound, "at least");
        }
        other => panic!("unexpected failure: {other}"),
    }
}

#[test]
fn test_verifier_exact_output_rejects_surplus() {
    let world = world();
    let mut expectation = balances_expectation(&world, None);
    expectation.output.bound = OutputBound::Exact;
    let verifier = InvariantVerifier::new(expectation);
    let mut sandbox = world.sandbox();
    let pre = verifier.capture(&sandbox).unwrap();
    sandbox.deal_token(world.token_b, world.user.address(), units(901));
    let post = verifier.capture(&sandbox).unwrap();
    let err = verifier
        .verify(&pre, &post, &SettlementReceipt::default())
        .unwrap_err();
    assert!(err.to_string().contains("expected exactly"));
}

#[test]
fn test_verifier_requires_won_auction_for_reward() {
    let world = world();
    let reward = RewardExpectation {
        user: world.user.address(),
        token: world.reward_token,
        amount: units(1),
    };
    let verifier = InvariantVerifier::new(balances_expectation(&world, Some(reward)));
    let sandbox = world.sandbox();
    let snapshot = verifier.capture(&sandbox).unwrap();
    assert_eq!(
        verifier.verify(&snapshot, &snapshot, &SettlementReceipt::default()),
        Err(AssertionFailure::AuctionNotWon)
    );
}

#[test]
fn test_reward_event_must_be_unique_and_match() {
    let world = world();
    let expected = RewardExpectation {
        user: world.user.address(),
        token: world.reward_token,
        amount: units(10),
    };
    let missing = SettlementReceipt::default();
    assert_eq!(
        verify_reward_event(&missing, &expected),
        Err(AssertionFailure::RewardEventMissing)
    );

    let log = reward_log(&world, world.reward_token, units(10));
    let duplicated = SettlementReceipt {
        logs: vec![log.clone(), log.clone()],
        ..SettlementReceipt::default()
    };
    assert_eq!(
        verify_reward_event(&duplicated, &expected),
        Err(AssertionFailure::RewardEventDuplicated(2))
    );

    let wrong_amount = SettlementReceipt {
        logs: vec![reward_log(&world, world.reward_token, units(9))],
        ..SettlementReceipt::default()
    };
    assert!(matches!(
        verify_reward_event(&wrong_amount, &expected),
        Err(AssertionFailure::RewardEventMismatch { .. })
    ));

    let single = SettlementReceipt {
        logs: vec![log],
        ..SettlementReceipt::default()
    };
    assert_eq!(verify_reward_event(&single, &expected), Ok(()));
}

#[test]
fn test_verify_unchanged_reports_moved_balance() {
    let world = world();
    let verifier = InvariantVerifier::new(balances_expectation(&world, None));
    let mut sandbox = world.sandbox();
    let pre = verifier.capture(&sandbox).unwrap();
    sandbox.deal_token(world.token_b, world.user.address(), U256::from(1u64));
    let post = verifier.capture(&sandbox).unwrap();
    assert!(matches!(
        verifier.verify_unchanged(&pre, &post),
        Err(AssertionFailure::PartialStateChange { .. })
    ));
}

/// Balances only. Block queries fail, like a provider that cannot serve them.
struct BalancesOnly<'a>(&'a Sandbox);

impl ChainState for BalancesOnly<'_> {
    fn native_balance(&self, account: Address) -> Result<U256, StateError> {
        self.0.native_balance(account)
    }

    fn block_number(&self) -> Result<u64, StateError> {
        Err(StateError::Backend("block unavailable".to_string()))
    }

    fn snapshot(&mut self) -> Result<SnapshotId, StateError> {
        Err(StateError::NotImplemented)
    }

    fn revert_to(&mut self, _id: SnapshotId) -> Result<(), StateError> {
        Err(StateError::NotImplemented)
    }
}

impl TokenContracts for BalancesOnly<'_> {
    fn balance_of(&self, token: Address, owner: Address) -> Result<U256, StateError> {
        self.0.balance_of(token, owner)
    }

    fn approve(&mut self, _: Address, _: Address, _: Address, _: U256) -> Result<(), StateError> {
        Err(StateError::NotImplemented)
    }
}

#[test]
fn test_capture_reads_only_balances_without_surcharge_expectation() {
    let world = world();
    let sandbox = world.sandbox();
    let verifier = InvariantVerifier::new(balances_expectation(&world, None));
    let snapshot = verifier.capture(&BalancesOnly(&sandbox)).unwrap();
    assert!(snapshot.cumulative_surcharge.is_none());
    assert_eq!(
        snapshot.balance(Asset::Token(world.token_a), world.user.address()),
        units(10_000)
    );

    let mut expectation = balances_expectation(&world, None);
    expectation.min_surcharge_increase = Some(U256::from(1u64));
    let with_surcharge = InvariantVerifier::new(expectation);
    assert_eq!(
        with_surcharge.capture(&BalancesOnly(&sandbox)).unwrap_err(),
        StateError::NotImplemented
    );
}

#[test]
fn test_bundle_exposes_signed_solver_operations_in_order() {
    let world = world();
    let mut sandbox = world.sandbox();
    let scenario = world.token_to_token("ordered", units(1000), units(900), &[units(10), units(20)]);
    let prepared = scenario.prepare(&mut sandbox).unwrap();
    let bundle = &prepared.bundle;

    let ops = bundle.solver_operations();
    assert_eq!(ops.len(), bundle.solver_count());
    assert_eq!(ops.len(), 2);
    for (op, solver) in ops.iter().zip(&world.solvers) {
        assert_eq!(op.from, solver.signer.address());
        assert_eq!(op.signature.len(), 65);
    }
    assert_eq!(ops[0].bidAmount, units(10));
    assert_eq!(ops[1].bidAmount, units(20));
}

#[test]
fn test_prepared_solver_bids_use_control_bid_format() {
    let world = world();
    let mut sandbox = world.sandbox();
    let scenario = world.token_to_token("bid-format", units(1000), units(900), &[units(10), units(20)]);
    let prepared = scenario.prepare(&mut sandbox).unwrap();

    let bid_token = sandbox
        .bid_format(world.control, prepared.bundle.user_operation())
        .unwrap();
    assert_eq!(prepared.bid_token, bid_token);
    assert!(prepared
        .bundle
        .solver_operations()
        .iter()
        .all(|op| op.bidToken == bid_token));
    let reward = scenario.expectation(prepared.bid_token).reward.unwrap();
    assert_eq!(reward.token, bid_token);
}

#[test]
fn test_prepare_rejects_governance_that_is_not_the_signatory() {
    let mut world = world();
    let mut sandbox = world.sandbox();
    world.governance = OperationSigner::from_label("impostor").unwrap();
    let scenario = world.token_to_token("impostor", units(1000), units(900), &[units(10)]);

    let err = scenario.prepare(&mut sandbox).unwrap_err();
    assert_eq!(err.stage, ScenarioStage::Built);
    assert!(matches!(
        err.failure,
        ScenarioFailure::Settlement(SettlementError::NotControlSignatory { caller, control })
            if caller == world.governance.address() && control == world.control
    ));
    assert_eq!(sandbox.governance_of(world.control).unwrap(), None);
}

proptest! {
    #[test]
    fn test_signature_round_trip_prop(
        secret in proptest::array::uniform32(any::<u8>()),
        digest in proptest::array::uniform32(any::<u8>()),
    ) {
        let signer = OperationSigner::from_slice(&secret);
        prop_assume!(signer.is_ok());
        let signer = signer.unwrap();
        let digest = B256::from(digest);
        let signature = signer.sign_digest(digest).unwrap();
        prop_assert_eq!(recover_signer(digest, &signature).unwrap(), signer.address());
    }

    #[test]
    fn test_factory_determinism_prop(amount_in in 1u64.., nonce in 1u64.., number in 0u64..1_000_000) {
        let world = world();
        let factory = world.factory();
        let mut intent = token_intent(&world);
        intent.amount_in = U256::from(amount_in);
        let block = BlockEnv { number, timestamp: number * 12 };
        let build = || factory.user_operation(
            world.user.address(),
            U256::from(nonce),
            block,
            world.control,
            world.call_config,
            &intent,
        );
        prop_assert_eq!(build().abi_encode(), build().abi_encode());
        prop_assert_eq!(user_operation_hash(&build()), user_operation_hash(&build()));
    }
}
