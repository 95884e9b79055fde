//! Invariant Verifier: snapshots the tracked balances around a submission and checks the economic
//! outcome of the bundle.
//!
//! Checks run in a fixed order (auction, input, output, reward balance, reward notification, surcharge)
//! and stop at the first failure. When several expectations touch the same `(asset, account)` pair, e.g.
//! a reward paid in the output token, each check compares against the combined expected change of that
//! pair.

use std::collections::BTreeMap;

use alloy_primitives::{Address, U256};
use alloy_sol_types::SolEvent;
use atlas_operation_types::{asset_balance, Asset, ChainState, StateError, TokenContracts, TokensRewarded};
use serde::{Deserialize, Serialize};

use crate::{
    bundle::SignedBundle,
    collaborators::{SettlementEngine, SettlementReceipt, VerificationRegistry},
    errors::{AssertionFailure, ScenarioFailure, SettlementError},
    factory::OutputBound,
    submitter::BundleSubmitter,
};

/// The initiating party pays exactly `amount` of `asset`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputExpectation {
    pub account: Address,
    pub asset: Asset,
    pub amount: U256,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputExpectation {
    pub account: Address,
    pub asset: Asset,
    pub amount: U256,
    pub bound: OutputBound,
}

/// A single `TokensRewarded(user, token, amount)` and the matching balance increase of `user`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardExpectation {
    pub user: Address,
    pub token: Address,
    pub amount: U256,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expectation {
    pub input: InputExpectation,
    pub output: OutputExpectation,
    #[serde(default)]
    pub reward: Option<RewardExpectation>,
    #[serde(default)]
    pub min_surcharge_increase: Option<U256>,
}

impl Expectation {
    /// Balances the verifier snapshots, without duplicates.
    pub fn tracked(&self) -> Vec<(Asset, Address)> {
        let mut keys = vec![
            (self.input.asset, self.input.account),
            (self.output.asset, self.output.account),
        ];
        if let Some(reward) = &self.reward {
            keys.push((Asset::Token(reward.token), reward.user));
        }
        keys.sort();
        keys.dedup();
        keys
    }
}

/// Tracked balances, plus the cumulative surcharge when a surcharge increase is expected.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExecutionSnapshot {
    pub cumulative_surcharge: Option<U256>,
    balances: BTreeMap<(Asset, Address), U256>,
}

impl ExecutionSnapshot {
    pub fn balance(&self, asset: Asset, account: Address) -> U256 {
        self.balances
            .get(&(asset, account))
            .copied()
            .unwrap_or_default()
    }

    pub fn balances(&self) -> impl Iterator<Item = (&(Asset, Address), &U256)> {
        self.balances.iter()
    }
}

/// Expected change of one `(asset, account)` pair, summed over all expectations touching it.
#[derive(Clone, Copy, Debug, Default)]
struct Change {
    increase: U256,
    decrease: U256,
    at_least: bool,
}

impl Change {
    fn expected_post(&self, pre: U256) -> U256 {
        pre.saturating_add(self.increase).saturating_sub(self.decrease)
    }

    fn holds(&self, pre: U256, post: U256) -> bool {
        let lhs = post.saturating_add(self.decrease);
        let rhs = pre.saturating_add(self.increase);
        if self.at_least {
            lhs >= rhs
        } else {
            lhs == rhs
        }
    }
}

#[derive(Clone, Debug)]
pub struct InvariantVerifier {
    expectation: Expectation,
}

impl InvariantVerifier {
    pub fn new(expectation: Expectation) -> Self {
        Self { expectation }
    }

    pub fn expectation(&self) -> &Expectation {
        &self.expectation
    }

    pub fn capture<S>(&self, state: &S) -> Result<ExecutionSnapshot, StateError>
    where
        S: ChainState + TokenContracts + ?Sized,
    {
        let mut balances = BTreeMap::new();
        for (asset, account) in self.expectation.tracked() {
            balances.insert((asset, account), asset_balance(state, asset, account)?);
        }
        let cumulative_surcharge = match self.expectation.min_surcharge_increase {
            Some(_) => Some(state.cumulative_surcharge()?),
            None => None,
        };
        Ok(ExecutionSnapshot {
            cumulative_surcharge,
            balances,
        })
    }

    fn changes(&self, receipt: &SettlementReceipt) -> BTreeMap<(Asset, Address), Change> {
        let expectation = &self.expectation;
        let mut changes: BTreeMap<(Asset, Address), Change> = BTreeMap::new();

        let input = changes
            .entry((expectation.input.asset, expectation.input.account))
            .or_default();
        input.decrease = input.decrease.saturating_add(expectation.input.amount);

        let output = changes
            .entry((expectation.output.asset, expectation.output.account))
            .or_default();
        output.increase = output.increase.saturating_add(expectation.output.amount);
        output.at_least |= expectation.output.bound == OutputBound::Minimum;

        if let Some(reward) = &expectation.reward {
            let entry = changes
                .entry((Asset::Token(reward.token), reward.user))
                .or_default();
            entry.increase = entry.increase.saturating_add(reward.amount);
        }

        // The settlement fee is accounted separately from balance deltas.
        if let Some(sender) = changes.get_mut(&(Asset::Native, receipt.sender)) {
            sender.decrease = sender.decrease.saturating_add(receipt.fee_paid);
        }
        changes
    }

    /// Check a settled bundle. `pre` and `post` must come from [`capture`](Self::capture).
    pub fn verify(
        &self,
        pre: &ExecutionSnapshot,
        post: &ExecutionSnapshot,
        receipt: &SettlementReceipt,
    ) -> Result<(), AssertionFailure> {
        let expectation = &self.expectation;
        if expectation.reward.is_some() && !receipt.auction_won {
            return Err(AssertionFailure::AuctionNotWon);
        }
        let changes = self.changes(receipt);
        let check = |asset: Asset, account: Address| {
            let change = changes.get(&(asset, account)).copied().unwrap_or_default();
            let before = pre.balance(asset, account);
            let after = post.balance(asset, account);
            (change.holds(before, after), change.expected_post(before), after)
        };

        let input = &expectation.input;
        let (ok, expected, actual) = check(input.asset, input.account);
        if !ok {
            return Err(AssertionFailure::InputBalance {
                account: input.account,
                asset: input.asset,
                expected,
                actual,
            });
        }

        let output = &expectation.output;
        let (ok, expected, actual) = check(output.asset, output.account);
        if !ok {
            return Err(AssertionFailure::OutputBalance {
                account: output.account,
                asset: output.asset,
                bound: output.bound.describe(),
                expected,
                actual,
            });
        }

        if let Some(reward) = &expectation.reward {
            let asset = Asset::Token(reward.token);
            let (ok, expected, actual) = check(asset, reward.user);
            if !ok {
                return Err(AssertionFailure::RewardBalance {
                    account: reward.user,
                    asset,
                    expected,
                    actual,
                });
            }
            verify_reward_event(receipt, reward)?;
        }

        if let Some(minimum) = expectation.min_surcharge_increase {
            let before = pre.cumulative_surcharge.unwrap_or_default();
            let after = post.cumulative_surcharge.unwrap_or_default();
            let grown = after.saturating_sub(before);
            if grown < minimum {
                return Err(AssertionFailure::Surcharge {
                    expected: minimum,
                    actual: grown,
                });
            }
        }
        Ok(())
    }

    /// Check a simulated settlement: the auction outcome and notification are reported, but no tracked
    /// balance may have moved.
    pub fn verify_simulated(
        &self,
        pre: &ExecutionSnapshot,
        post: &ExecutionSnapshot,
        receipt: &SettlementReceipt,
    ) -> Result<(), AssertionFailure> {
        if let Some(reward) = &self.expectation.reward {
            if !receipt.auction_won {
                return Err(AssertionFailure::AuctionNotWon);
            }
            verify_reward_event(receipt, reward)?;
        }
        self.verify_unchanged(pre, post)
    }

    /// Check that a rejected bundle left every tracked balance and the surcharge untouched.
    pub fn verify_unchanged(
        &self,
        pre: &ExecutionSnapshot,
        post: &ExecutionSnapshot,
    ) -> Result<(), AssertionFailure> {
        for (asset, account) in self.expectation.tracked() {
            let before = pre.balance(asset, account);
            let after = post.balance(asset, account);
            if before != after {
                return Err(AssertionFailure::PartialStateChange {
                    account,
                    asset,
                    before,
                    after,
                });
            }
        }
        if let (Some(before), Some(after)) = (pre.cumulative_surcharge, post.cumulative_surcharge) {
            if before != after {
                return Err(AssertionFailure::Surcharge {
                    expected: U256::ZERO,
                    actual: after.saturating_sub(before),
                });
            }
        }
        Ok(())
    }

    /// Capture, submit once, capture again and check the outcome of a bundle expected to settle.
    pub fn run<E>(
        &self,
        env: &mut E,
        submitter: &BundleSubmitter,
        bundle: &SignedBundle,
    ) -> Result<SettlementReceipt, ScenarioFailure>
    where
        E: ChainState + TokenContracts + SettlementEngine + VerificationRegistry + ?Sized,
    {
        let pre = self.capture(env)?;
        let receipt = submitter.submit(env, bundle)?;
        let post = self.capture(env)?;
        if receipt.simulated {
            self.verify_simulated(&pre, &post, &receipt)?;
        } else {
            self.verify(&pre, &post, &receipt)?;
        }
        tracing::info!(
            auction_won = receipt.auction_won,
            fee = %receipt.fee_paid,
            "invariants hold"
        );
        Ok(receipt)
    }

    /// Capture, submit once and require a rejection with no tracked state change. Returns the
    /// rejection.
    pub fn run_rejected<E>(
        &self,
        env: &mut E,
        submitter: &BundleSubmitter,
        bundle: &SignedBundle,
    ) -> Result<SettlementError, ScenarioFailure>
    where
        E: ChainState + TokenContracts + SettlementEngine + VerificationRegistry + ?Sized,
    {
        let pre = self.capture(env)?;
        match submitter.submit(env, bundle) {
            Ok(_) => Err(AssertionFailure::UnexpectedSettlement.into()),
            Err(rejection) => {
                let post = self.capture(env)?;
                self.verify_unchanged(&pre, &post)?;
                tracing::info!(%rejection, "bundle rejected without state change");
                Ok(rejection)
            }
        }
    }
}

/// Exactly one `TokensRewarded` log, with matching indexed user and token and amount.
pub fn verify_reward_event(
    receipt: &SettlementReceipt,
    expected: &RewardExpectation,
) -> Result<(), AssertionFailure> {
    let rewards: Vec<_> = receipt
        .logs
        .iter()
        .filter(|log| log.data.topics().first() == Some(&TokensRewarded::SIGNATURE_HASH))
        .collect();
    let log = match rewards.as_slice() {
        [] => return Err(AssertionFailure::RewardEventMissing),
        [log] => *log,
        many => return Err(AssertionFailure::RewardEventDuplicated(many.len())),
    };
    let event = TokensRewarded::decode_log_data(&log.data, true)
        .map_err(|_| AssertionFailure::RewardEventMalformed)?;
    if event.user != expected.user || event.token != expected.token || event.amount != expected.amount {
        return Err(AssertionFailure::RewardEventMismatch {
            user: event.user,
            token: event.token,
            amount: event.amount,
            expected_user: expected.user,
            expected_token: expected.token,
            expected_amount: expected.amount,
        });
    }
    Ok(())
}
