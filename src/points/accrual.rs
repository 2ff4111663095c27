use alloy::primitives::Address;
use chrono::{DateTime, Utc};
use num_bigint::BigUint;
use rustc_hash::FxHashMap;

use crate::db::models::{AccountAward, BalanceChange};
use crate::points::PointsRate;

/// Compute one accrual run's awards for a single chain.
///
/// Each row's `balance_after` is held from its `created_at` until the next
/// row of the same account, and the last row of every account extends to
/// `now`. When an account has a previous calculation time `L`, intervals are
/// clipped to start no earlier than `L`, so time already paid for is never
/// counted again. The zero address never accrues.
///
/// Every account with at least one row gets an award stamped at `now`, even
/// when it earned nothing; the caller decides what to persist.
pub fn compute_awards(
    mut changes: Vec<BalanceChange>,
    last_calculated: &FxHashMap<Address, DateTime<Utc>>,
    now: DateTime<Utc>,
    rate: &PointsRate,
) -> Vec<AccountAward> {
    changes.sort_by(|a, b| {
        (a.address, a.created_at, a.block_number, a.log_index).cmp(&(
            b.address,
            b.created_at,
            b.block_number,
            b.log_index,
        ))
    });

    let mut awards = Vec::new();

    for run in changes.chunk_by(|a, b| a.address == b.address) {
        let address = run[0].address;
        if address == Address::ZERO {
            continue;
        }

        let lower_bound = last_calculated.get(&address).copied();
        let mut points_added = BigUint::default();

        for (idx, change) in run.iter().enumerate() {
            let held_until = run.get(idx + 1).map_or(now, |next| next.created_at);
            let held_from = match lower_bound {
                Some(last) => change.created_at.max(last),
                None => change.created_at,
            };

            let seconds = (held_until - held_from).num_seconds();
            if seconds > 0 {
                points_added += rate.points_for(&change.balance_after, seconds as u64);
            }
        }

        let latest = &run[run.len() - 1];
        awards.push(AccountAward {
            address,
            balance_snapshot: latest.balance_after.clone(),
            points_added,
            calculated_at: now,
        });
    }

    awards
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{change, ts, ALICE, BOB};
    use num_traits::Zero;

    fn rate() -> PointsRate {
        PointsRate::from_decimal(0.05, 1_000).unwrap()
    }

    fn award_for(awards: &[AccountAward], address: Address) -> &AccountAward {
        awards.iter().find(|a| a.address == address).unwrap()
    }

    #[test]
    fn test_single_holder_one_hour() {
        let changes = vec![change(ALICE, 1, 1_000, 0)];
        let awards = compute_awards(changes, &FxHashMap::default(), ts(3_600), &rate());

        assert_eq!(awards.len(), 1);
        assert_eq!(awards[0].points_added, BigUint::from(50u32));
        assert_eq!(awards[0].balance_snapshot, BigUint::from(1_000u32));
        assert_eq!(awards[0].calculated_at, ts(3_600));
    }

    #[test]
    fn test_balance_is_held_until_next_change() {
        // 1000 for one hour, then 2000 for one hour
        let changes = vec![change(ALICE, 1, 1_000, 0), change(ALICE, 2, 2_000, 3_600)];
        let awards = compute_awards(changes, &FxHashMap::default(), ts(7_200), &rate());

        assert_eq!(awards[0].points_added, BigUint::from(150u32));
        assert_eq!(awards[0].balance_snapshot, BigUint::from(2_000u32));
    }

    #[test]
    fn test_address_switch_does_not_leak() {
        // Input deliberately interleaved; each account only earns on its own rows
        let changes = vec![
            change(BOB, 2, 2_000, 3_600),
            change(ALICE, 1, 1_000, 0),
        ];
        let awards = compute_awards(changes, &FxHashMap::default(), ts(7_200), &rate());

        assert_eq!(awards.len(), 2);
        assert_eq!(award_for(&awards, ALICE).points_added, BigUint::from(100u32));
        assert_eq!(award_for(&awards, BOB).points_added, BigUint::from(100u32));
    }

    #[test]
    fn test_clips_to_last_calculation() {
        let changes = vec![change(ALICE, 1, 1_000, 0)];
        let mut last = FxHashMap::default();
        last.insert(ALICE, ts(3_600));

        let awards = compute_awards(changes, &last, ts(7_200), &rate());
        assert_eq!(awards[0].points_added, BigUint::from(50u32));
    }

    #[test]
    fn test_rerun_at_same_instant_adds_nothing() {
        let changes = vec![change(ALICE, 1, 1_000, 0), change(ALICE, 2, 500, 1_800)];
        let mut last = FxHashMap::default();
        last.insert(ALICE, ts(7_200));

        let awards = compute_awards(changes, &last, ts(7_200), &rate());
        assert_eq!(awards.len(), 1);
        assert!(awards[0].points_added.is_zero());
    }

    #[test]
    fn test_zero_address_never_accrues() {
        let changes = vec![
            change(Address::ZERO, 1, 0, 0),
            change(ALICE, 1, 1_000, 0),
        ];
        let awards = compute_awards(changes, &FxHashMap::default(), ts(3_600), &rate());

        assert_eq!(awards.len(), 1);
        assert_eq!(awards[0].address, ALICE);
    }

    #[test]
    fn test_change_after_now_contributes_nothing() {
        let changes = vec![change(ALICE, 1, 1_000, 10_000)];
        let awards = compute_awards(changes, &FxHashMap::default(), ts(3_600), &rate());
        assert!(awards[0].points_added.is_zero());
    }

    #[test]
    fn test_split_runs_sum_to_single_run() {
        let changes = vec![change(ALICE, 1, 7_200, 0), change(ALICE, 2, 3_600, 3_600)];

        let single = compute_awards(changes.clone(), &FxHashMap::default(), ts(10_800), &rate());

        let first = compute_awards(changes.clone(), &FxHashMap::default(), ts(5_400), &rate());
        let mut last = FxHashMap::default();
        last.insert(ALICE, ts(5_400));
        let second = compute_awards(changes, &last, ts(10_800), &rate());

        assert_eq!(
            single[0].points_added,
            &first[0].points_added + &second[0].points_added
        );
    }
}
