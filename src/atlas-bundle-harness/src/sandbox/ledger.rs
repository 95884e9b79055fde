//! Account state of the sandbox: balances, allowances, settlement-engine accounting and nonces.
//!
//! The whole ledger is a value type; snapshots and atomic rollbacks are plain clones.

use std::collections::{BTreeMap, BTreeSet};

use alloy_primitives::{Address, U256};
use atlas_operation_types::Asset;

use crate::errors::SettlementError;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Ledger {
    native: BTreeMap<Address, U256>,
    /// (token, owner) => balance
    tokens: BTreeMap<(Address, Address), U256>,
    /// (token, owner, spender) => allowance
    allowances: BTreeMap<(Address, Address, Address), U256>,
    unbonded: BTreeMap<Address, U256>,
    bonded: BTreeMap<Address, U256>,
    cumulative_surcharge: U256,
    used_user_nonces: BTreeSet<(Address, U256)>,
    last_sequential_user_nonce: BTreeMap<Address, U256>,
    used_dapp_nonces: BTreeSet<(Address, U256)>,
    last_sequential_dapp_nonce: BTreeMap<Address, U256>,
    /// (user, control) => execution environment
    execution_environments: BTreeMap<(Address, Address), Address>,
    /// control => governance signatory
    governance: BTreeMap<Address, Address>,
}

impl Ledger {
    pub fn native(&self, account: Address) -> U256 {
        self.native.get(&account).copied().unwrap_or_default()
    }

    pub fn token(&self, token: Address, owner: Address) -> U256 {
        self.tokens.get(&(token, owner)).copied().unwrap_or_default()
    }

    pub fn balance(&self, asset: Asset, account: Address) -> U256 {
        match asset {
            Asset::Native => self.native(account),
            Asset::Token(token) => self.token(token, account),
        }
    }

    pub fn mint_native(&mut self, account: Address, amount: U256) {
        let entry = self.native.entry(account).or_default();
        *entry = entry.saturating_add(amount);
    }

    pub fn mint_token(&mut self, token: Address, owner: Address, amount: U256) {
        let entry = self.tokens.entry((token, owner)).or_default();
        *entry = entry.saturating_add(amount);
    }

    pub fn transfer_native(
        &mut self,
        from: Address,
        to: Address,
        amount: U256,
    ) -> Result<(), SettlementError> {
        if amount.is_zero() {
            return Ok(());
        }
        let available = self.native(from);
        let remaining = available
            .checked_sub(amount)
            .ok_or(SettlementError::InsufficientBalance {
                account: from,
                asset: Asset::Native,
                needed: amount,
                available,
            })?;
        self.native.insert(from, remaining);
        self.mint_native(to, amount);
        Ok(())
    }

    pub fn transfer_token(
        &mut self,
        token: Address,
        from: Address,
        to: Address,
        amount: U256,
    ) -> Result<(), SettlementError> {
        if amount.is_zero() {
            return Ok(());
        }
        let available = self.token(token, from);
        let remaining = available
            .checked_sub(amount)
            .ok_or(SettlementError::InsufficientBalance {
                account: from,
                asset: Asset::Token(token),
                needed: amount,
                available,
            })?;
        self.tokens.insert((token, from), remaining);
        self.mint_token(token, to, amount);
        Ok(())
    }

    pub fn transfer(
        &mut self,
        asset: Asset,
        from: Address,
        to: Address,
        amount: U256,
    ) -> Result<(), SettlementError> {
        match asset {
            Asset::Native => self.transfer_native(from, to, amount),
            Asset::Token(token) => self.transfer_token(token, from, to, amount),
        }
    }

    pub fn allowance(&self, token: Address, owner: Address, spender: Address) -> U256 {
        self.allowances
            .get(&(token, owner, spender))
            .copied()
            .unwrap_or_default()
    }

    pub fn approve(&mut self, token: Address, owner: Address, spender: Address, amount: U256) {
        self.allowances.insert((token, owner, spender), amount);
    }

    /// ERC-20 `transferFrom`; an allowance of `U256::MAX` is never decremented.
    pub fn transfer_from(
        &mut self,
        token: Address,
        spender: Address,
        owner: Address,
        to: Address,
        amount: U256,
    ) -> Result<(), SettlementError> {
        let allowance = self.allowance(token, owner, spender);
        if allowance < amount {
            return Err(SettlementError::InsufficientAllowance {
                token,
                owner,
                spender,
                needed: amount,
                available: allowance,
            });
        }
        self.transfer_token(token, owner, to, amount)?;
        if allowance != U256::MAX {
            self.approve(token, owner, spender, allowance - amount);
        }
        Ok(())
    }

    pub fn unbonded(&self, account: Address) -> U256 {
        self.unbonded.get(&account).copied().unwrap_or_default()
    }

    pub fn bonded(&self, account: Address) -> U256 {
        self.bonded.get(&account).copied().unwrap_or_default()
    }

    pub fn credit_unbonded(&mut self, account: Address, amount: U256) {
        let entry = self.unbonded.entry(account).or_default();
        *entry = entry.saturating_add(amount);
    }

    pub fn bond(&mut self, account: Address, amount: U256) -> Result<(), SettlementError> {
        let available = self.unbonded(account);
        let remaining = available
            .checked_sub(amount)
            .ok_or(SettlementError::InsufficientBalance {
                account,
                asset: Asset::Native,
                needed: amount,
                available,
            })?;
        self.unbonded.insert(account, remaining);
        let entry = self.bonded.entry(account).or_default();
        *entry = entry.saturating_add(amount);
        Ok(())
    }

    /// Debit bonded collateral; returns the available amount when it does not cover `amount`.
    pub fn debit_bonded(&mut self, account: Address, amount: U256) -> Result<(), U256> {
        let available = self.bonded(account);
        let remaining = available.checked_sub(amount).ok_or(available)?;
        self.bonded.insert(account, remaining);
        Ok(())
    }

    pub fn cumulative_surcharge(&self) -> U256 {
        self.cumulative_surcharge
    }

    pub fn add_surcharge(&mut self, amount: U256) {
        self.cumulative_surcharge = self.cumulative_surcharge.saturating_add(amount);
    }

    /// Next usable user nonce: `last + 1` when sequential, otherwise the lowest unused nonce >= 1.
    pub fn next_user_nonce(&self, user: Address, sequential: bool) -> U256 {
        if sequential {
            return self
                .last_sequential_user_nonce
                .get(&user)
                .copied()
                .unwrap_or_default()
                + U256::from(1u64);
        }
        let mut nonce = U256::from(1u64);
        while self.used_user_nonces.contains(&(user, nonce)) {
            nonce += U256::from(1u64);
        }
        nonce
    }

    pub fn user_nonce_available(&self, user: Address, nonce: U256, sequential: bool) -> bool {
        if nonce.is_zero() {
            return false;
        }
        if sequential {
            return nonce == self.next_user_nonce(user, true);
        }
        !self.used_user_nonces.contains(&(user, nonce))
    }

    pub fn consume_user_nonce(&mut self, user: Address, nonce: U256, sequential: bool) {
        if sequential {
            self.last_sequential_user_nonce.insert(user, nonce);
        } else {
            self.used_user_nonces.insert((user, nonce));
        }
    }

    /// Dapp nonce 0 means "no nonce" unless nonces are sequential.
    pub fn dapp_nonce_available(&self, signer: Address, nonce: U256, sequential: bool) -> bool {
        if sequential {
            let last = self
                .last_sequential_dapp_nonce
                .get(&signer)
                .copied()
                .unwrap_or_default();
            return nonce == last + U256::from(1u64);
        }
        nonce.is_zero() || !self.used_dapp_nonces.contains(&(signer, nonce))
    }

    pub fn consume_dapp_nonce(&mut self, signer: Address, nonce: U256, sequential: bool) {
        if sequential {
            self.last_sequential_dapp_nonce.insert(signer, nonce);
        } else if !nonce.is_zero() {
            self.used_dapp_nonces.insert((signer, nonce));
        }
    }

    pub fn execution_environment(&self, user: Address, control: Address) -> Option<Address> {
        self.execution_environments.get(&(user, control)).copied()
    }

    pub fn set_execution_environment(&mut self, user: Address, control: Address, environment: Address) {
        self.execution_environments.insert((user, control), environment);
    }

    pub fn governance(&self, control: Address) -> Option<Address> {
        self.governance.get(&control).copied()
    }

    pub fn set_governance(&mut self, control: Address, signatory: Address) {
        self.governance.insert(control, signatory);
    }
}
