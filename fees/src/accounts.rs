use crate::{AccountId, Balance, FeeError, Result, TokenId, UnixTimestamp};
use mpc::{Ciphertext, MpcRuntime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Which accounting rail a participant's allocation was credited on for a
/// given distribution. The two rails are alternatives, never halves of one
/// total, so a distribution may populate at most one of them per participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RewardMode {
    Public,
    Private,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipantAccount {
    pub id: AccountId,
    pub active: bool,
    pub participation_score: u64,
    pending: BTreeMap<TokenId, Balance>,
    pub total_claimed: Balance,
    pub last_claim_time: Option<UnixTimestamp>,
    encrypted_total: Option<Ciphertext>,
    encrypted_pending: BTreeMap<TokenId, Ciphertext>,
}

impl ParticipantAccount {
    fn new(id: AccountId) -> Self {
        Self {
            id,
            active: true,
            participation_score: 0,
            pending: BTreeMap::new(),
            total_claimed: 0,
            last_claim_time: None,
            encrypted_total: None,
            encrypted_pending: BTreeMap::new(),
        }
    }

    pub fn pending(&self, token: &str) -> Balance {
        self.pending.get(token).copied().unwrap_or(0)
    }

    pub fn encrypted_pending(&self, token: &str) -> Option<&Ciphertext> {
        self.encrypted_pending.get(token)
    }

    pub fn encrypted_total(&self) -> Option<&Ciphertext> {
        self.encrypted_total.as_ref()
    }
}

/// Staged outcome of a private credit; see
/// [`DualLedger::stage_private_credit`].
#[derive(Debug, Clone)]
pub struct PrivateCredit {
    id: AccountId,
    token: TokenId,
    pending: Ciphertext,
    total: Ciphertext,
}

/// Per-participant dual accounting: a plain pending balance and a shadow
/// encrypted balance per token. The two views are never summed or compared;
/// the distribution engine commits each (participant, distribution) pair to
/// exactly one rail.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DualLedger {
    accounts: BTreeMap<AccountId, ParticipantAccount>,
    mode_commitments: BTreeMap<u64, BTreeMap<AccountId, RewardMode>>,
}

impl DualLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, id: AccountId) -> Result<()> {
        if self.accounts.contains_key(&id) {
            return Err(FeeError::ParticipantExists(id));
        }
        self.accounts.insert(id.clone(), ParticipantAccount::new(id));
        Ok(())
    }

    /// Soft deactivation; the account and its history are retained.
    pub fn deactivate(&mut self, id: &str) -> Result<()> {
        let account = self
            .accounts
            .get_mut(id)
            .ok_or_else(|| FeeError::UnknownParticipant(id.to_string()))?;
        account.active = false;
        Ok(())
    }

    pub fn set_score(&mut self, id: &str, score: u64) -> Result<()> {
        let account = self
            .accounts
            .get_mut(id)
            .ok_or_else(|| FeeError::UnknownParticipant(id.to_string()))?;
        account.participation_score = score;
        Ok(())
    }

    pub fn account(&self, id: &str) -> Option<&ParticipantAccount> {
        self.accounts.get(id)
    }

    pub fn accounts(&self) -> impl Iterator<Item = &ParticipantAccount> {
        self.accounts.values()
    }

    pub fn ensure_active(&self, id: &str) -> Result<()> {
        let account = self
            .accounts
            .get(id)
            .ok_or_else(|| FeeError::UnknownParticipant(id.to_string()))?;
        if !account.active {
            return Err(FeeError::InactiveParticipant(id.to_string()));
        }
        Ok(())
    }

    /// Stamps the rail used for (participant, distribution). A second stamp
    /// for the same pair fails, which is what prevents the same allocation
    /// landing on both rails.
    pub fn commit_mode(
        &mut self,
        distribution_id: u64,
        id: &str,
        mode: RewardMode,
    ) -> Result<()> {
        let per_distribution = self.mode_commitments.entry(distribution_id).or_default();
        if let Some(committed) = per_distribution.get(id) {
            return Err(FeeError::RewardModeConflict {
                participant: id.to_string(),
                distribution_id,
                committed: *committed,
            });
        }
        per_distribution.insert(id.to_string(), mode);
        Ok(())
    }

    pub fn mode_of(&self, distribution_id: u64, id: &str) -> Option<RewardMode> {
        self.mode_commitments
            .get(&distribution_id)
            .and_then(|m| m.get(id))
            .copied()
    }

    pub fn credit_public(&mut self, id: &str, token: &str, amount: Balance) -> Result<()> {
        if amount == 0 {
            return Err(FeeError::ZeroAmount);
        }
        let account = self
            .accounts
            .get_mut(id)
            .ok_or_else(|| FeeError::UnknownParticipant(id.to_string()))?;
        let pending = account.pending.entry(token.to_string()).or_insert(0);
        *pending = pending.saturating_add(amount);
        Ok(())
    }

    /// Homomorphically adds `amount` onto the participant's encrypted pending
    /// and lifetime-earnings handles.
    pub fn credit_private(
        &mut self,
        id: &str,
        token: &str,
        amount: &Ciphertext,
        mpc: &dyn MpcRuntime,
    ) -> Result<()> {
        let staged = self.stage_private_credit(id, token, amount, mpc)?;
        self.apply_private_credit(staged);
        Ok(())
    }

    /// Computes the post-credit handles without touching any state. The
    /// distribution engine stages every participant's credit first so a
    /// runtime failure mid-cycle leaves no partial distribution behind.
    pub fn stage_private_credit(
        &self,
        id: &str,
        token: &str,
        amount: &Ciphertext,
        mpc: &dyn MpcRuntime,
    ) -> Result<PrivateCredit> {
        let account = self
            .accounts
            .get(id)
            .ok_or_else(|| FeeError::UnknownParticipant(id.to_string()))?;
        let pending = match account.encrypted_pending.get(token) {
            Some(existing) => mpc.add(existing, amount)?,
            None => amount.clone(),
        };
        let total = match &account.encrypted_total {
            Some(existing) => mpc.add(existing, amount)?,
            None => amount.clone(),
        };
        Ok(PrivateCredit {
            id: id.to_string(),
            token: token.to_string(),
            pending,
            total,
        })
    }

    /// Writes a staged credit. Infallible by construction: the stage step
    /// already proved the account exists.
    pub fn apply_private_credit(&mut self, credit: PrivateCredit) {
        if let Some(account) = self.accounts.get_mut(&credit.id) {
            account.encrypted_pending.insert(credit.token, credit.pending);
            account.encrypted_total = Some(credit.total);
        }
    }

    /// Zeroes the plain pending balance and returns it. A repeat call with no
    /// intervening credit fails with `NoRewardsPending`.
    pub fn claim_public(
        &mut self,
        id: &str,
        token: &str,
        now: UnixTimestamp,
    ) -> Result<Balance> {
        let account = self
            .accounts
            .get_mut(id)
            .ok_or_else(|| FeeError::UnknownParticipant(id.to_string()))?;
        let amount = account.pending.remove(token).unwrap_or(0);
        if amount == 0 {
            return Err(FeeError::NoRewardsPending {
                participant: id.to_string(),
                token: token.to_string(),
            });
        }
        account.total_claimed = account.total_claimed.saturating_add(amount);
        account.last_claim_time = Some(now);
        Ok(amount)
    }

    /// Decrypts and zeroes the encrypted pending balance, revealing the value
    /// only to the claimant. Without an MPC runtime this transparently falls
    /// back to the public path.
    pub fn claim_private(
        &mut self,
        id: &str,
        token: &str,
        now: UnixTimestamp,
        mpc: Option<&dyn MpcRuntime>,
    ) -> Result<Balance> {
        let runtime = match mpc {
            Some(runtime) => runtime,
            None => return self.claim_public(id, token, now),
        };
        let account = self
            .accounts
            .get_mut(id)
            .ok_or_else(|| FeeError::UnknownParticipant(id.to_string()))?;
        let handle = account.encrypted_pending.remove(token).ok_or_else(|| {
            FeeError::NoRewardsPending {
                participant: id.to_string(),
                token: token.to_string(),
            }
        })?;
        let amount = runtime.decrypt(&handle)?;
        if amount == 0 {
            return Err(FeeError::NoRewardsPending {
                participant: id.to_string(),
                token: token.to_string(),
            });
        }
        account.total_claimed = account.total_claimed.saturating_add(amount);
        account.last_claim_time = Some(now);
        Ok(amount)
    }

    pub fn to_bytes(&self) -> std::result::Result<Vec<u8>, String> {
        serde_json::to_vec(self).map_err(|err| err.to_string())
    }

    pub fn from_bytes(bytes: &[u8]) -> std::result::Result<Self, String> {
        serde_json::from_slice(bytes).map_err(|err| err.to_string())
    }
}
