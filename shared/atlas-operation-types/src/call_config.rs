use serde::{Deserialize, Serialize};

/// Call-configuration flags, bit positions as packed by the DAppControl `CALL_CONFIG`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum CallConfigFlag {
    UserNoncesSequential = 0,
    DappNoncesSequential = 1,
    RequirePreOps = 2,
    TrackPreOpsReturnData = 3,
    TrackUserReturnData = 4,
    DelegateUser = 5,
    RequirePreSolver = 6,
    RequirePostSolver = 7,
    ZeroSolvers = 8,
    ReuseUserOp = 9,
    UserAuctioneer = 10,
    SolverAuctioneer = 11,
    UnknownAuctioneer = 12,
    VerifyCallChainHash = 13,
    ForwardReturnData = 14,
    RequireFulfillment = 15,
    TrustedOpHash = 16,
    InvertBidValue = 17,
    ExPostBids = 18,
    AllowAllocateValueFailure = 19,
}

impl CallConfigFlag {
    pub const ALL: [CallConfigFlag; 20] = [
        CallConfigFlag::UserNoncesSequential,
        CallConfigFlag::DappNoncesSequential,
        CallConfigFlag::RequirePreOps,
        CallConfigFlag::TrackPreOpsReturnData,
        CallConfigFlag::TrackUserReturnData,
        CallConfigFlag::DelegateUser,
        CallConfigFlag::RequirePreSolver,
        CallConfigFlag::RequirePostSolver,
        CallConfigFlag::ZeroSolvers,
        CallConfigFlag::ReuseUserOp,
        CallConfigFlag::UserAuctioneer,
        CallConfigFlag::SolverAuctioneer,
        CallConfigFlag::UnknownAuctioneer,
        CallConfigFlag::VerifyCallChainHash,
        CallConfigFlag::ForwardReturnData,
        CallConfigFlag::RequireFulfillment,
        CallConfigFlag::TrustedOpHash,
        CallConfigFlag::InvertBidValue,
        CallConfigFlag::ExPostBids,
        CallConfigFlag::AllowAllocateValueFailure,
    ];

    pub const fn mask(self) -> u32 {
        1u32 << (self as u8)
    }
}

impl TryFrom<u8> for CallConfigFlag {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        CallConfigFlag::ALL
            .get(value as usize)
            .copied()
            .ok_or(value)
    }
}

/// Packed call configuration (`uint32 callConfig`).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallConfig(pub u32);

impl CallConfig {
    pub fn from_flags(flags: &[CallConfigFlag]) -> Self {
        flags.iter().fold(CallConfig(0), |cfg, flag| cfg.with(*flag))
    }

    pub const fn has(self, flag: CallConfigFlag) -> bool {
        self.0 & flag.mask() != 0
    }

    #[must_use]
    pub const fn with(self, flag: CallConfigFlag) -> Self {
        CallConfig(self.0 | flag.mask())
    }

    #[must_use]
    pub const fn without(self, flag: CallConfigFlag) -> Self {
        CallConfig(self.0 & !flag.mask())
    }

    /// Set flags in bit order.
    pub fn flags(self) -> Vec<CallConfigFlag> {
        CallConfigFlag::ALL
            .iter()
            .copied()
            .filter(|flag| self.has(*flag))
            .collect()
    }

    pub const fn bits(self) -> u32 {
        self.0
    }
}

impl From<u32> for CallConfig {
    fn from(bits: u32) -> Self {
        CallConfig(bits)
    }
}

impl From<CallConfig> for u32 {
    fn from(cfg: CallConfig) -> Self {
        cfg.0
    }
}
