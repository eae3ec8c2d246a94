use crate::{Balance, FeeError, Result, BASIS_POINTS_DIVISOR};
use serde::{Deserialize, Serialize};

/// Validators must always carry the majority of every distribution.
pub const VALIDATOR_FLOOR_BPS: u64 = 5_000;

/// How a distribution pot splits between validators, company and
/// development. Shares are basis points and must sum to exactly 10000.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionRatio {
    validator_bps: u64,
    company_bps: u64,
    development_bps: u64,
}

impl DistributionRatio {
    pub fn new(validator_bps: u64, company_bps: u64, development_bps: u64) -> Result<Self> {
        let sum = validator_bps
            .saturating_add(company_bps)
            .saturating_add(development_bps);
        if sum != BASIS_POINTS_DIVISOR {
            return Err(FeeError::InvalidConfiguration { sum });
        }
        if validator_bps < VALIDATOR_FLOOR_BPS {
            return Err(FeeError::ValidatorShareBelowFloor {
                validator_bps,
                floor: VALIDATOR_FLOOR_BPS,
            });
        }
        Ok(Self {
            validator_bps,
            company_bps,
            development_bps,
        })
    }

    pub fn validator_bps(&self) -> u64 {
        self.validator_bps
    }

    pub fn company_bps(&self) -> u64 {
        self.company_bps
    }

    pub fn development_bps(&self) -> u64 {
        self.development_bps
    }

    /// Floor-divides `total` into the three shares. Residue from the floor
    /// division is left for the caller to route; it is never larger than 2.
    pub fn compute_shares(&self, total: Balance) -> Shares {
        Shares {
            validator: apply_bps(total, self.validator_bps),
            company: apply_bps(total, self.company_bps),
            development: apply_bps(total, self.development_bps),
        }
    }
}

impl Default for DistributionRatio {
    fn default() -> Self {
        Self {
            validator_bps: 7_000,
            company_bps: 2_000,
            development_bps: 1_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shares {
    pub validator: Balance,
    pub company: Balance,
    pub development: Balance,
}

impl Shares {
    /// Amount of `total` not covered by the three floored shares.
    pub fn residue(&self, total: Balance) -> Balance {
        total
            .saturating_sub(self.validator)
            .saturating_sub(self.company)
            .saturating_sub(self.development)
    }
}

pub(crate) fn apply_bps(total: Balance, bps: u64) -> Balance {
    ((u128::from(total) * u128::from(bps)) / u128::from(BASIS_POINTS_DIVISOR)) as Balance
}
