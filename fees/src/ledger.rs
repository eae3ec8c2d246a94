use crate::{AccountId, Balance, FeeError, Result, TokenId, UnixTimestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Where a fee originated. Recorded with every collection so revenue can be
/// audited per source independently of how it is later distributed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeeSource {
    Transaction,
    Referral,
    Listing,
    Auction,
    Offer,
}

/// Append-only record of a single fee collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeCollectionRecord {
    pub token: TokenId,
    pub amount: Balance,
    pub source: FeeSource,
    pub timestamp: UnixTimestamp,
    pub collector: AccountId,
}

/// Tracks raw fee collection by token, independent of distribution logic.
///
/// `collected` holds amounts awaiting a distribution sweep; `swept` is the
/// lifetime total already handed to the distribution engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeeLedger {
    records: Vec<FeeCollectionRecord>,
    collected: BTreeMap<TokenId, Balance>,
    swept: BTreeMap<TokenId, Balance>,
    total_collected: u128,
}

impl FeeLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(
        &mut self,
        token: TokenId,
        source: FeeSource,
        amount: Balance,
        collector: AccountId,
        now: UnixTimestamp,
    ) -> Result<()> {
        if amount == 0 {
            return Err(FeeError::ZeroAmount);
        }
        let bucket = self.collected.entry(token.clone()).or_insert(0);
        *bucket = bucket.saturating_add(amount);
        self.total_collected = self.total_collected.saturating_add(u128::from(amount));
        self.records.push(FeeCollectionRecord {
            token,
            amount,
            source,
            timestamp: now,
            collector,
        });
        Ok(())
    }

    /// Amount collected for `token` and not yet swept into a distribution.
    pub fn collected(&self, token: &str) -> Balance {
        self.collected.get(token).copied().unwrap_or(0)
    }

    /// Lifetime amount already handed to the distribution engine for `token`.
    pub fn swept(&self, token: &str) -> Balance {
        self.swept.get(token).copied().unwrap_or(0)
    }

    /// Moves the collected balance for `token` into the swept total and
    /// returns it. The caller owns routing of the returned amount.
    pub fn sweep(&mut self, token: &str) -> Balance {
        let amount = match self.collected.get_mut(token) {
            Some(bucket) => std::mem::take(bucket),
            None => 0,
        };
        if amount > 0 {
            let total = self.swept.entry(token.to_string()).or_insert(0);
            *total = total.saturating_add(amount);
        }
        amount
    }

    pub fn records(&self) -> &[FeeCollectionRecord] {
        &self.records
    }

    pub fn total_collected(&self) -> u128 {
        self.total_collected
    }

    pub fn to_bytes(&self) -> std::result::Result<Vec<u8>, String> {
        serde_json::to_vec(self).map_err(|err| err.to_string())
    }

    pub fn from_bytes(bytes: &[u8]) -> std::result::Result<Self, String> {
        serde_json::from_slice(bytes).map_err(|err| err.to_string())
    }
}
