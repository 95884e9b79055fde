//! Shared types for Atlas operation bundles: ABI records, call-config flags and chain-state traits.

pub mod call_config;
pub mod operations;
pub mod state;

pub use call_config::{CallConfig, CallConfigFlag};
pub use operations::{
    DAppConfig, DAppOperation, IAtlas, IAtlasVerification, IDAppControl, IERC20, ISwapSolver,
    IUniswapV2Router02, SolverOperation, TokensRewarded, UserOperation,
};
pub use state::{asset_balance, Asset, ChainState, SnapshotId, StateError, TokenContracts};

#[cfg(test)]
mod tests;
