use crate::accounts::{DualLedger, PrivateCredit, RewardMode};
use crate::allocator::allocate_proportional;
use crate::clock::Clock;
use crate::ledger::FeeLedger;
use crate::ratio::DistributionRatio;
use crate::{AccountId, Balance, FeeError, Result, TokenId, UnixTimestamp};
use metrics::{gauge, histogram, increment_counter};
use mpc::{Ciphertext, MpcRuntime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Minimum seconds between two distributions.
    pub distribution_interval: u64,
    /// Pots below this are left to accumulate.
    pub minimum_distribution_amount: Balance,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            distribution_interval: 86_400,
            minimum_distribution_amount: 100,
        }
    }
}

/// A participant's slice of one distribution. Mutated only by that
/// participant's claim, at most once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatorAllocation {
    pub amount: Balance,
    pub claimed: bool,
    pub claim_time: Option<UnixTimestamp>,
    pub score_snapshot: u64,
    pub encrypted_amount: Option<Ciphertext>,
}

/// Immutable record of one completed distribution cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Distribution {
    pub id: u64,
    pub token: TokenId,
    pub total_amount: Balance,
    pub validator_share: Balance,
    pub company_share: Balance,
    pub development_share: Balance,
    pub timestamp: UnixTimestamp,
    pub participant_count: usize,
    pub completed: bool,
    pub allocations: BTreeMap<AccountId, ValidatorAllocation>,
}

/// Orchestrates timed distribution cycles over the fee ledger and the dual
/// accounting ledger. One instance per deployment; callers serialize access.
pub struct DistributionEngine {
    config: EngineConfig,
    ratio: DistributionRatio,
    fees: FeeLedger,
    accounts: DualLedger,
    clock: Box<dyn Clock>,
    last_distribution_time: UnixTimestamp,
    next_distribution_id: u64,
    pending_company: Balance,
    pending_development: Balance,
    distributions: BTreeMap<u64, Distribution>,
    total_distributed: u128,
}

impl DistributionEngine {
    pub fn new(config: EngineConfig, ratio: DistributionRatio, clock: Box<dyn Clock>) -> Self {
        Self {
            config,
            ratio,
            fees: FeeLedger::new(),
            accounts: DualLedger::new(),
            clock,
            last_distribution_time: 0,
            next_distribution_id: 0,
            pending_company: 0,
            pending_development: 0,
            distributions: BTreeMap::new(),
            total_distributed: 0,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn ratio(&self) -> &DistributionRatio {
        &self.ratio
    }

    /// Requires a ratio-admin identity upstream.
    pub fn update_ratios(
        &mut self,
        validator_bps: u64,
        company_bps: u64,
        development_bps: u64,
    ) -> Result<()> {
        self.ratio = DistributionRatio::new(validator_bps, company_bps, development_bps)?;
        Ok(())
    }

    pub fn fee_ledger(&self) -> &FeeLedger {
        &self.fees
    }

    pub fn fee_ledger_mut(&mut self) -> &mut FeeLedger {
        &mut self.fees
    }

    pub fn accounts(&self) -> &DualLedger {
        &self.accounts
    }

    pub fn accounts_mut(&mut self) -> &mut DualLedger {
        &mut self.accounts
    }

    pub fn pending_company_fees(&self) -> Balance {
        self.pending_company
    }

    pub fn pending_development_fees(&self) -> Balance {
        self.pending_development
    }

    pub fn distribution(&self, id: u64) -> Option<&Distribution> {
        self.distributions.get(&id)
    }

    pub fn distributions(&self) -> impl Iterator<Item = &Distribution> {
        self.distributions.values()
    }

    pub fn last_distribution_time(&self) -> UnixTimestamp {
        self.last_distribution_time
    }

    pub fn total_distributed(&self) -> u128 {
        self.total_distributed
    }

    /// Runs one distribution cycle for `token`. Requires a distributor-role
    /// identity upstream.
    ///
    /// Every precondition is checked, and every fallible computation is
    /// staged, before the first state write, so a failure anywhere leaves the
    /// engine exactly as it was. With an MPC runtime present the validator
    /// allocations are credited on the private rail, otherwise on the public
    /// rail; the rail is stamped per (participant, distribution) so the same
    /// allocation can never land on both.
    pub fn distribute(
        &mut self,
        token: &str,
        participants: &[(AccountId, u64)],
        mpc: Option<&dyn MpcRuntime>,
    ) -> Result<u64> {
        if participants.is_empty() {
            return Err(FeeError::EmptyParticipants);
        }
        let now = self.clock.now();
        if self.last_distribution_time > 0 {
            let ready_at = self
                .last_distribution_time
                .saturating_add(self.config.distribution_interval);
            if now < ready_at {
                return Err(FeeError::TooEarlyForDistribution {
                    remaining_secs: ready_at - now,
                });
            }
        }
        let pot = self.fees.collected(token);
        if pot < self.config.minimum_distribution_amount {
            return Err(FeeError::BelowMinimumThreshold {
                available: pot,
                minimum: self.config.minimum_distribution_amount,
            });
        }

        // Duplicate ids collapse into a single participant with summed weight.
        let mut merged: BTreeMap<AccountId, u64> = BTreeMap::new();
        for (id, weight) in participants {
            self.accounts.ensure_active(id)?;
            let entry = merged.entry(id.clone()).or_insert(0);
            *entry = entry.checked_add(*weight).ok_or(FeeError::WeightOverflow)?;
        }

        let shares = self.ratio.compute_shares(pot);
        let residue = shares.residue(pot);
        let allocation = allocate_proportional(shares.validator, participants)?;
        if allocation
            .allocated
            .saturating_add(allocation.remainder)
            != shares.validator
        {
            return Err(FeeError::IntegrityViolation {
                detail: format!(
                    "allocated {} + remainder {} != validator share {}",
                    allocation.allocated, allocation.remainder, shares.validator
                ),
            });
        }

        let mode = if mpc.is_some() {
            RewardMode::Private
        } else {
            RewardMode::Public
        };

        // Stage all credits before the first write.
        let mut staged: Vec<(AccountId, Balance, Option<Ciphertext>, Option<PrivateCredit>)> =
            Vec::with_capacity(merged.len());
        for id in merged.keys() {
            let amount = allocation.amounts.get(id).copied().unwrap_or(0);
            if amount == 0 {
                staged.push((id.clone(), 0, None, None));
                continue;
            }
            match mpc {
                Some(runtime) => {
                    let handle = runtime.encrypt(amount);
                    let credit =
                        self.accounts
                            .stage_private_credit(id, token, &handle, runtime)?;
                    staged.push((id.clone(), amount, Some(handle), Some(credit)));
                }
                None => staged.push((id.clone(), amount, None, None)),
            }
        }

        // Commit phase: nothing below may fail.
        let distribution_id = self.next_distribution_id;
        let swept = self.fees.sweep(token);
        debug_assert_eq!(swept, pot);
        let mut allocations = BTreeMap::new();
        for (id, amount, handle, credit) in staged {
            if amount > 0 {
                // Fresh distribution id: the stamp cannot already exist.
                self.accounts.commit_mode(distribution_id, &id, mode)?;
                match credit {
                    Some(credit) => self.accounts.apply_private_credit(credit),
                    None => self.accounts.credit_public(&id, token, amount)?,
                }
            }
            let score_snapshot = merged.get(&id).copied().unwrap_or(0);
            allocations.insert(
                id,
                ValidatorAllocation {
                    amount,
                    claimed: false,
                    claim_time: None,
                    score_snapshot,
                    encrypted_amount: handle,
                },
            );
        }

        // Company and development shares accumulate for later withdrawal; all
        // rounding residue routes to the company (treasury) accumulator.
        self.pending_company = self
            .pending_company
            .saturating_add(shares.company)
            .saturating_add(residue)
            .saturating_add(allocation.remainder);
        self.pending_development = self.pending_development.saturating_add(shares.development);

        let record = Distribution {
            id: distribution_id,
            token: token.to_string(),
            total_amount: pot,
            validator_share: shares.validator,
            company_share: shares.company,
            development_share: shares.development,
            timestamp: now,
            participant_count: allocations.len(),
            completed: true,
            allocations,
        };
        self.distributions.insert(distribution_id, record);
        self.next_distribution_id += 1;
        self.last_distribution_time = now;
        self.total_distributed = self.total_distributed.saturating_add(u128::from(pot));

        increment_counter!("fees_distributions_completed_total");
        histogram!("fees_distribution_pot", pot as f64);
        gauge!("fees_pending_company", self.pending_company as f64);
        gauge!(
            "fees_pending_development",
            self.pending_development as f64
        );

        Ok(distribution_id)
    }

    /// Claims a participant's pending rewards on the given rail and marks the
    /// matching allocations claimed. A repeat claim with nothing newly
    /// pending fails with `NoRewardsPending`.
    pub fn claim(
        &mut self,
        id: &str,
        token: &str,
        mode: RewardMode,
        mpc: Option<&dyn MpcRuntime>,
    ) -> Result<Balance> {
        let now = self.clock.now();
        // A private claim without a runtime drains the public rail instead;
        // the allocation stamps below must follow the rail actually drained.
        let effective_mode = match mode {
            RewardMode::Private if mpc.is_none() => RewardMode::Public,
            other => other,
        };
        let amount = match mode {
            RewardMode::Public => self.accounts.claim_public(id, token, now)?,
            RewardMode::Private => self.accounts.claim_private(id, token, now, mpc)?,
        };
        for distribution in self.distributions.values_mut() {
            if distribution.token != token {
                continue;
            }
            // Only allocations credited on the drained rail are covered by
            // this claim; the other rail's records stay untouched.
            if self.accounts.mode_of(distribution.id, id) != Some(effective_mode) {
                continue;
            }
            if let Some(alloc) = distribution.allocations.get_mut(id) {
                if !alloc.claimed && alloc.amount > 0 {
                    alloc.claimed = true;
                    alloc.claim_time = Some(now);
                }
            }
        }
        increment_counter!("fees_claims_total");
        Ok(amount)
    }

    /// Requires a company-treasury identity upstream.
    pub fn withdraw_company_fees(&mut self, amount: Balance) -> Result<()> {
        if amount == 0 {
            return Err(FeeError::ZeroAmount);
        }
        if amount > self.pending_company {
            return Err(FeeError::InsufficientPendingBalance {
                requested: amount,
                available: self.pending_company,
            });
        }
        self.pending_company -= amount;
        Ok(())
    }

    /// Requires a development-treasury identity upstream.
    pub fn withdraw_development_fees(&mut self, amount: Balance) -> Result<()> {
        if amount == 0 {
            return Err(FeeError::ZeroAmount);
        }
        if amount > self.pending_development {
            return Err(FeeError::InsufficientPendingBalance {
                requested: amount,
                available: self.pending_development,
            });
        }
        self.pending_development -= amount;
        Ok(())
    }
}
