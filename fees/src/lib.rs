#![forbid(unsafe_code)]

//! Fee collection and multi-party reward distribution.
//!
//! [`FeeLedger`] records every fee as it is generated; the
//! [`DistributionEngine`] periodically sweeps a token's collected fees,
//! splits them between validators, company and development per the configured
//! [`DistributionRatio`], allocates the validator pot proportionally to
//! participation weight, and credits each participant's pending balance on
//! either the public or the encrypted rail.

pub mod accounts;
pub mod allocator;
pub mod cascade;
pub mod clock;
pub mod engine;
pub mod ledger;
pub mod ratio;

pub use accounts::{DualLedger, ParticipantAccount, PrivateCredit, RewardMode};
pub use allocator::{allocate_proportional, Allocation};
pub use cascade::{split_fee, CascadeBreakdown, CascadeRouting};
pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::{
    Distribution, DistributionEngine, EngineConfig, ValidatorAllocation,
};
pub use ledger::{FeeCollectionRecord, FeeLedger, FeeSource};
pub use ratio::{DistributionRatio, Shares, VALIDATOR_FLOOR_BPS};

use thiserror::Error;

pub type AccountId = String;
pub type TokenId = String;
pub type Balance = u64;
pub type UnixTimestamp = u64;

pub const BASIS_POINTS_DIVISOR: u64 = 10_000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FeeError {
    #[error("ratio shares sum to {sum} basis points, expected 10000")]
    InvalidConfiguration { sum: u64 },
    #[error("validator share {validator_bps} bps below floor {floor} bps")]
    ValidatorShareBelowFloor { validator_bps: u64, floor: u64 },
    #[error("fee amount must be non-zero")]
    ZeroAmount,
    #[error("participant weight sum overflows")]
    WeightOverflow,
    #[error("participant list is empty")]
    EmptyParticipants,
    #[error("unknown participant {0}")]
    UnknownParticipant(AccountId),
    #[error("participant {0} already registered")]
    ParticipantExists(AccountId),
    #[error("participant {0} is deactivated")]
    InactiveParticipant(AccountId),
    #[error("too early for distribution: {remaining_secs}s of the interval remain")]
    TooEarlyForDistribution { remaining_secs: u64 },
    #[error("distributable pot {available} below minimum {minimum}")]
    BelowMinimumThreshold { available: Balance, minimum: Balance },
    #[error("no rewards pending for {participant} in token {token}")]
    NoRewardsPending {
        participant: AccountId,
        token: TokenId,
    },
    #[error("requested {requested} exceeds pending balance {available}")]
    InsufficientPendingBalance {
        requested: Balance,
        available: Balance,
    },
    #[error("participant {participant} already credited on the {committed:?} rail for distribution {distribution_id}")]
    RewardModeConflict {
        participant: AccountId,
        distribution_id: u64,
        committed: RewardMode,
    },
    #[error("allocation invariant violated: {detail}")]
    IntegrityViolation { detail: String },
    #[error("mpc runtime failure: {0}")]
    Mpc(#[from] mpc::MpcError),
}

pub type Result<T> = std::result::Result<T, FeeError>;
