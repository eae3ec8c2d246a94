use crate::{AccountId, Balance, FeeError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Outcome of a proportional allocation. `allocated + remainder == pot`
/// always holds; the remainder is the floor-division dust plus, when total
/// weight is zero, the entire pot. Routing the remainder is the caller's
/// responsibility.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Allocation {
    pub amounts: BTreeMap<AccountId, Balance>,
    pub allocated: Balance,
    pub remainder: Balance,
}

/// Allocates `pot` across `participants` in proportion to weight, using
/// integer arithmetic only. Single linear pass, no per-participant calls.
pub fn allocate_proportional(
    pot: Balance,
    participants: &[(AccountId, u64)],
) -> Result<Allocation> {
    if participants.is_empty() {
        return Err(FeeError::EmptyParticipants);
    }
    let mut total_weight: u64 = 0;
    for (_, weight) in participants {
        total_weight = total_weight
            .checked_add(*weight)
            .ok_or(FeeError::WeightOverflow)?;
    }

    let mut amounts = BTreeMap::new();
    if total_weight == 0 {
        for (id, _) in participants {
            amounts.insert(id.clone(), 0);
        }
        return Ok(Allocation {
            amounts,
            allocated: 0,
            remainder: pot,
        });
    }

    let mut allocated: Balance = 0;
    for (id, weight) in participants {
        let amount = ((u128::from(pot) * u128::from(*weight)) / u128::from(total_weight)) as u64;
        let entry = amounts.entry(id.clone()).or_insert(0);
        *entry = entry.saturating_add(amount);
        allocated = allocated.saturating_add(amount);
    }
    Ok(Allocation {
        amounts,
        allocated,
        remainder: pot.saturating_sub(allocated),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(pairs: &[(&str, u64)]) -> Vec<(AccountId, u64)> {
        pairs.iter().map(|(id, w)| (id.to_string(), *w)).collect()
    }

    #[test]
    fn exact_proportions_leave_no_remainder() {
        let alloc = allocate_proportional(1_000, &ids(&[("a", 70), ("b", 30)])).unwrap();
        assert_eq!(alloc.amounts["a"], 700);
        assert_eq!(alloc.amounts["b"], 300);
        assert_eq!(alloc.allocated, 1_000);
        assert_eq!(alloc.remainder, 0);
    }

    #[test]
    fn floor_rounding_leaves_explicit_remainder() {
        let alloc =
            allocate_proportional(100, &ids(&[("a", 1), ("b", 1), ("c", 1)])).unwrap();
        assert_eq!(alloc.amounts["a"], 33);
        assert_eq!(alloc.amounts["b"], 33);
        assert_eq!(alloc.amounts["c"], 33);
        assert_eq!(alloc.allocated, 99);
        assert_eq!(alloc.remainder, 1);
    }

    #[test]
    fn zero_total_weight_returns_full_pot_as_remainder() {
        let alloc = allocate_proportional(500, &ids(&[("a", 0), ("b", 0)])).unwrap();
        assert_eq!(alloc.amounts["a"], 0);
        assert_eq!(alloc.amounts["b"], 0);
        assert_eq!(alloc.allocated, 0);
        assert_eq!(alloc.remainder, 500);
    }

    #[test]
    fn empty_participants_rejected() {
        assert_eq!(
            allocate_proportional(100, &[]).unwrap_err(),
            FeeError::EmptyParticipants
        );
    }

    #[test]
    fn weight_sum_overflow_detected() {
        let err = allocate_proportional(100, &ids(&[("a", u64::MAX), ("b", 1)])).unwrap_err();
        assert_eq!(err, FeeError::WeightOverflow);
    }

    #[test]
    fn conservation_bound_holds_for_skewed_weights() {
        let participants = ids(&[("a", 1), ("b", 999), ("c", 31), ("d", 7), ("e", 13)]);
        let pot = 1_000_003;
        let alloc = allocate_proportional(pot, &participants).unwrap();
        assert!(alloc.allocated <= pot);
        assert!(alloc.remainder < participants.len() as u64);
        assert_eq!(alloc.allocated + alloc.remainder, pot);
    }

    #[test]
    fn duplicate_ids_accumulate() {
        let alloc = allocate_proportional(100, &ids(&[("a", 1), ("a", 1)])).unwrap();
        assert_eq!(alloc.amounts["a"], 100);
        assert_eq!(alloc.remainder, 0);
    }
}
