//! Seeded weighted sampling without replacement.
//!
//! Given the same pool, prize table and seed, [`pick_winners`] always
//! produces the same winners in the same order. The pool is walked in
//! MSISDN order and the PRNG is ChaCha20 seeded from the draw seed, so a
//! recorded draw can be replayed and audited.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use recharge_types::{Msisdn, NotificationStatus, Prize, Timestamp, UnawardedSlot, Winner};

use crate::eligibility::CandidatePool;

/// Result of a pick.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PickOutcome {
    /// Picking order: ascending rank, then pick order within the rank.
    pub winners: Vec<Winner>,
    /// Slots that could not be filled.
    pub unawarded: Vec<UnawardedSlot>,
}

/// Pick winners for every prize slot.
///
/// Each pick draws an MSISDN with probability proportional to its weight
/// among those not yet picked. When the pool runs dry the remaining slots
/// are reported as unawarded.
pub fn pick_winners(
    pool: &CandidatePool,
    prizes: &[Prize],
    seed: u64,
    picked_at: Timestamp,
) -> PickOutcome {
    let mut rng = ChaCha20Rng::seed_from_u64(seed);
    let mut remaining: Vec<(&Msisdn, u64)> = pool
        .iter()
        .filter(|(_, weight)| **weight > 0)
        .map(|(msisdn, weight)| (msisdn, u64::from(*weight)))
        .collect();
    let mut total: u64 = remaining.iter().map(|(_, w)| w).sum();

    let mut ordered: Vec<&Prize> = prizes.iter().collect();
    ordered.sort_by_key(|p| p.rank);

    let mut outcome = PickOutcome::default();
    for prize in ordered {
        let mut awarded = 0u32;
        while awarded < prize.quantity && !remaining.is_empty() {
            let target = rng.gen_range(0..total);
            let idx = select_index(&remaining, target);
            let (msisdn, weight) = remaining.remove(idx);
            total -= weight;
            outcome.winners.push(Winner {
                msisdn: msisdn.clone(),
                rank: prize.rank,
                prize_amount: prize.amount,
                picked_at,
                notification_status: NotificationStatus::Pending,
            });
            awarded += 1;
        }
        if awarded < prize.quantity {
            outcome.unawarded.push(UnawardedSlot {
                rank: prize.rank,
                count: prize.quantity - awarded,
            });
        }
    }
    outcome
}

/// Index of the entry whose cumulative weight range covers `target`.
fn select_index(entries: &[(&Msisdn, u64)], target: u64) -> usize {
    let mut cumulative = 0u64;
    for (idx, (_, weight)) in entries.iter().enumerate() {
        cumulative += weight;
        if target < cumulative {
            return idx;
        }
    }
    entries.len().saturating_sub(1)
}
