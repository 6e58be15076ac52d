//! Task reward tax.

use polis_crdt::BPS_DENOMINATOR;

/// Tax owed on a reward of `reward` SP at `tax_rate_bps` basis points.
///
/// `max(1, round(reward * rate))`, rounding half up, so small rewards still
/// contribute. Never exceeds the reward itself; a zero reward owes nothing.
pub const fn compute_tax(reward: u64, tax_rate_bps: u32) -> u64 {
    if reward == 0 {
        return 0;
    }
    let capped = if tax_rate_bps > BPS_DENOMINATOR {
        BPS_DENOMINATOR
    } else {
        tax_rate_bps
    };
    let bps = capped as u128;
    let denom = BPS_DENOMINATOR as u128;
    let rounded = ((reward as u128) * bps + denom / 2) / denom;
    let tax = if rounded < 1 { 1 } else { rounded as u64 };
    if tax > reward {
        reward
    } else {
        tax
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn rounding() {
        assert_eq!(compute_tax(100, 500), 5);
        assert_eq!(compute_tax(10, 500), 1); // 0.5 rounds up
        assert_eq!(compute_tax(9, 500), 1); // floor of 1
        assert_eq!(compute_tax(1, 500), 1);
        assert_eq!(compute_tax(1_000, 250), 25);
        assert_eq!(compute_tax(30, 500), 2); // 1.5 rounds up
    }

    #[test]
    fn edges() {
        assert_eq!(compute_tax(0, 500), 0);
        assert_eq!(compute_tax(50, 10_000), 50);
        assert_eq!(compute_tax(50, 50_000), 50);
        assert_eq!(compute_tax(u64::MAX, 10_000), u64::MAX);
    }

    proptest! {
        #[test]
        fn positive_reward_pays_at_least_one(reward in 1u64..u64::MAX, bps in 1u32..10_000) {
            let tax = compute_tax(reward, bps);
            prop_assert!(tax >= 1);
            prop_assert!(tax <= reward);
        }
    }
}
