//! Solidity ABI surface for Atlas operations and the collaborators the harness talks to.
//!
//! The structs are ABI-identical to the on-chain `UserOperation` / `SolverOperation` /
//! `DAppOperation` / `DAppConfig` so the same values can be hashed locally, sent over JSON-RPC,
//! or executed against the in-memory sandbox.

use alloy_sol_types::sol;

sol! {
    /// Signed user intent.
    #[derive(Debug, Default, PartialEq, Eq)]
    struct UserOperation {
        address from;
        address to;
        uint256 value;
        uint256 gas;
        uint256 maxFeePerGas;
        uint256 nonce;
        /// Block number after which the operation is void.
        uint256 deadline;
        /// Venue the user call is forwarded to.
        address dapp;
        /// Policy (DAppControl) governing the bundle.
        address control;
        uint32 callConfig;
        address sessionKey;
        bytes data;
        bytes signature;
    }

    /// Signed solver fulfillment competing for a user operation.
    #[derive(Debug, Default, PartialEq, Eq)]
    struct SolverOperation {
        address from;
        address to;
        uint256 value;
        uint256 gas;
        uint256 maxFeePerGas;
        uint256 deadline;
        /// Solver contract executing the fulfillment.
        address solver;
        address control;
        /// Struct hash of the paired user operation.
        bytes32 userOpHash;
        address bidToken;
        uint256 bidAmount;
        bytes data;
        bytes signature;
    }

    /// Governance authorization over a user operation and its solver set.
    #[derive(Debug, Default, PartialEq, Eq)]
    struct DAppOperation {
        address from;
        address to;
        uint256 nonce;
        uint256 deadline;
        address control;
        address bundler;
        bytes32 userOpHash;
        bytes32 callChainHash;
        bytes signature;
    }

    /// Policy configuration supplied to the settlement entry point.
    #[derive(Debug, Default, PartialEq, Eq)]
    struct DAppConfig {
        address to;
        uint32 callConfig;
        address bidToken;
        uint32 solverGasLimit;
    }

    /// Reward notification emitted by the reward control once a solver wins.
    #[derive(Debug, PartialEq, Eq)]
    event TokensRewarded(address indexed user, address indexed token, uint256 amount);

    interface IAtlas {
        function metacall(
            UserOperation calldata userOp,
            SolverOperation[] calldata solverOps,
            DAppOperation calldata dAppOp
        ) external payable returns (bool auctionWon);

        function execute(
            DAppConfig calldata dConfig,
            UserOperation calldata userOp,
            SolverOperation[] calldata solverOps,
            address executionEnvironment,
            address bundler,
            bytes32 userOpHash,
            bool isSimulation
        ) external payable returns (bool auctionWon);

        function createExecutionEnvironment(address user, address control)
            external
            returns (address executionEnvironment);

        function deposit() external payable;
        function bond(uint256 amount) external;
        function cumulativeSurcharge() external view returns (uint256);
        function balanceOfBonded(address account) external view returns (uint256);
    }

    interface IAtlasVerification {
        function getUserOperationPayload(UserOperation memory userOp) external view returns (bytes32 payload);
        function getSolverPayload(SolverOperation calldata solverOp) external view returns (bytes32 payload);
        function getDAppOperationPayload(DAppOperation memory dAppOp) external view returns (bytes32 payload);
        function getUserOperationHash(UserOperation memory userOp) external view returns (bytes32 hash);
        function getUserNextNonce(address user, bool sequential) external view returns (uint256 nextNonce);
        function initializeGovernance(address control) external;
        function getGovFromControl(address control) external view returns (address governanceAddress);
    }

    interface IDAppControl {
        function CALL_CONFIG() external view returns (uint32);
        function getBidFormat(UserOperation calldata userOp) external view returns (address bidToken);
        function getDAppConfig(UserOperation calldata userOp) external view returns (DAppConfig memory dConfig);
        function getDAppSignatory() external view returns (address governanceAddress);
    }

    interface IERC20 {
        function balanceOf(address owner) external view returns (uint256 balance);
        function allowance(address owner, address spender) external view returns (uint256 remaining);
        function approve(address spender, uint256 amount) external returns (bool);
    }

    interface IUniswapV2Router02 {
        function swapExactTokensForTokens(
            uint256 amountIn,
            uint256 amountOutMin,
            address[] calldata path,
            address to,
            uint256 deadline
        ) external returns (uint256[] memory amounts);

        function swapTokensForExactTokens(
            uint256 amountOut,
            uint256 amountInMax,
            address[] calldata path,
            address to,
            uint256 deadline
        ) external returns (uint256[] memory amounts);

        function swapExactETHForTokens(
            uint256 amountOutMin,
            address[] calldata path,
            address to,
            uint256 deadline
        ) external payable returns (uint256[] memory amounts);

        function swapETHForExactTokens(
            uint256 amountOut,
            address[] calldata path,
            address to,
            uint256 deadline
        ) external payable returns (uint256[] memory amounts);

        function swapExactTokensForETH(
            uint256 amountIn,
            uint256 amountOutMin,
            address[] calldata path,
            address to,
            uint256 deadline
        ) external returns (uint256[] memory amounts);

        function swapTokensForExactETH(
            uint256 amountOut,
            uint256 amountInMax,
            address[] calldata path,
            address to,
            uint256 deadline
        ) external returns (uint256[] memory amounts);
    }

    interface ISwapSolver {
        function solve() external;
    }
}
