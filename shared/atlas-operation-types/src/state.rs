use std::fmt;

use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};

/// Errors while reading or rewinding chain state.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StateError {
    /// Used by partial providers that do not track the requested fact.
    #[error("state query not implemented by this provider")]
    NotImplemented,
    /// Snapshot id was never issued or has already been consumed by a revert.
    #[error("unknown snapshot {0}")]
    UnknownSnapshot(SnapshotId),
    /// The backing node or store failed.
    #[error("state backend error: {0}")]
    Backend(String),
}

/// Balance-bearing asset: the chain's native currency or an ERC-20 token.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Asset {
    Native,
    Token(Address),
}

impl Asset {
    pub const fn is_native(&self) -> bool {
        matches!(self, Asset::Native)
    }

    pub const fn token(&self) -> Option<Address> {
        match self {
            Asset::Native => None,
            Asset::Token(token) => Some(*token),
        }
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Asset::Native => f.write_str("native"),
            Asset::Token(token) => write!(f, "token {token}"),
        }
    }
}

/// Snapshot handle. Reverting to an id consumes it together with every later id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnapshotId(pub U256);

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Chain-state provider, implemented by the in-memory sandbox and by a forked node.
pub trait ChainState {
    fn native_balance(&self, account: Address) -> Result<U256, StateError>;

    fn block_number(&self) -> Result<u64, StateError>;

    fn block_timestamp(&self) -> Result<u64, StateError> {
        Err(StateError::NotImplemented)
    }

    /// Surcharge accumulated by the settlement engine across all bundles.
    fn cumulative_surcharge(&self) -> Result<U256, StateError> {
        Err(StateError::NotImplemented)
    }

    /// Bonded settlement-engine balance of an account (solver collateral).
    fn bonded_balance(&self, _account: Address) -> Result<U256, StateError> {
        Err(StateError::NotImplemented)
    }

    fn snapshot(&mut self) -> Result<SnapshotId, StateError>;

    fn revert_to(&mut self, id: SnapshotId) -> Result<(), StateError>;
}

/// ERC-20 surface the harness relies on.
pub trait TokenContracts {
    fn balance_of(&self, token: Address, owner: Address) -> Result<U256, StateError>;

    fn allowance(&self, _token: Address, _owner: Address, _spender: Address) -> Result<U256, StateError> {
        Err(StateError::NotImplemented)
    }

    fn approve(
        &mut self,
        token: Address,
        owner: Address,
        spender: Address,
        amount: U256,
    ) -> Result<(), StateError>;
}

/// Read the balance of `account` in `asset`, using the native balance for [`Asset::Native`].
pub fn asset_balance<S>(state: &S, asset: Asset, account: Address) -> Result<U256, StateError>
where
    S: ChainState + TokenContracts + ?Sized,
{
    match asset {
        Asset::Native => state.native_balance(account),
        Asset::Token(token) => state.balance_of(token, account),
    }
}
