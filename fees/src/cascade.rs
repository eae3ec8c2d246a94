use crate::ratio::apply_bps;
use crate::{AccountId, Balance};
use serde::{Deserialize, Serialize};

// Top-level split of a marketplace fee: transaction / referral / listing.
const TRANSACTION_TIER_BPS: u64 = 5_000;
const REFERRAL_TIER_BPS: u64 = 2_500;
const LISTING_TIER_BPS: u64 = 2_500;

// Every tier splits again 70/20/10 between its primary, secondary and
// treasury leaves.
const PRIMARY_BPS: u64 = 7_000;
const SECONDARY_BPS: u64 = 2_000;
const TERTIARY_BPS: u64 = 1_000;

/// Recipients resolved by the caller before the split. A `None` entry routes
/// that leaf's allocation to the treasury instead.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CascadeRouting {
    pub referrer: Option<AccountId>,
    pub parent_referrer: Option<AccountId>,
    pub listing_node: Option<AccountId>,
    pub selling_node: Option<AccountId>,
}

/// Leaf allocations of a fee cascade. The leaves always sum to exactly the
/// input fee: all floor-division residue routes to the treasury.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CascadeBreakdown {
    pub total: Balance,
    pub transaction_fee: Balance,
    pub referral_fee: Balance,
    pub listing_fee: Balance,
    pub validator_pool: Balance,
    pub staking_pool: Balance,
    pub treasury: Balance,
    pub referrer: Balance,
    pub parent_referrer: Balance,
    pub listing_node: Balance,
    pub selling_node: Balance,
}

impl CascadeBreakdown {
    pub fn leaf_sum(&self) -> Balance {
        self.validator_pool
            .saturating_add(self.staking_pool)
            .saturating_add(self.treasury)
            .saturating_add(self.referrer)
            .saturating_add(self.parent_referrer)
            .saturating_add(self.listing_node)
            .saturating_add(self.selling_node)
    }
}

/// Splits `fee` through the three-tier cascade.
pub fn split_fee(fee: Balance, routing: &CascadeRouting) -> CascadeBreakdown {
    let transaction_fee = apply_bps(fee, TRANSACTION_TIER_BPS);
    let referral_fee = apply_bps(fee, REFERRAL_TIER_BPS);
    let listing_fee = apply_bps(fee, LISTING_TIER_BPS);
    let top_residue = fee
        .saturating_sub(transaction_fee)
        .saturating_sub(referral_fee)
        .saturating_sub(listing_fee);

    let mut out = CascadeBreakdown {
        total: fee,
        transaction_fee,
        referral_fee,
        listing_fee,
        treasury: top_residue,
        ..CascadeBreakdown::default()
    };

    // Transaction tier: validator pool / treasury / staking pool.
    let (primary, secondary, tertiary) = split_tier(transaction_fee);
    out.validator_pool = primary;
    out.treasury = out.treasury.saturating_add(secondary);
    out.staking_pool = tertiary;
    out.treasury = out
        .treasury
        .saturating_add(tier_residue(transaction_fee, primary, secondary, tertiary));

    // Referral tier: referrer / parent referrer / treasury. Unresolved
    // recipients collapse into the treasury leaf.
    let (primary, secondary, tertiary) = split_tier(referral_fee);
    if routing.referrer.is_some() {
        out.referrer = primary;
    } else {
        out.treasury = out.treasury.saturating_add(primary);
    }
    if routing.parent_referrer.is_some() {
        out.parent_referrer = secondary;
    } else {
        out.treasury = out.treasury.saturating_add(secondary);
    }
    out.treasury = out.treasury.saturating_add(tertiary);
    out.treasury = out
        .treasury
        .saturating_add(tier_residue(referral_fee, primary, secondary, tertiary));

    // Listing tier: listing node / selling node / treasury.
    let (primary, secondary, tertiary) = split_tier(listing_fee);
    if routing.listing_node.is_some() {
        out.listing_node = primary;
    } else {
        out.treasury = out.treasury.saturating_add(primary);
    }
    if routing.selling_node.is_some() {
        out.selling_node = secondary;
    } else {
        out.treasury = out.treasury.saturating_add(secondary);
    }
    out.treasury = out.treasury.saturating_add(tertiary);
    out.treasury = out
        .treasury
        .saturating_add(tier_residue(listing_fee, primary, secondary, tertiary));

    out
}

fn split_tier(tier: Balance) -> (Balance, Balance, Balance) {
    (
        apply_bps(tier, PRIMARY_BPS),
        apply_bps(tier, SECONDARY_BPS),
        apply_bps(tier, TERTIARY_BPS),
    )
}

fn tier_residue(tier: Balance, a: Balance, b: Balance, c: Balance) -> Balance {
    tier.saturating_sub(a).saturating_sub(b).saturating_sub(c)
}
