//! Ratification quorum.
//!
//! A strict majority of the validator set:
//! - 0 validators → nothing can be ratified
//! - n validators → floor(n / 2) + 1 unique votes

/// Unique validator votes required to ratify with a set of `validators`.
///
/// # Examples
///
/// ```
/// use polis_governance::quorum;
///
/// assert_eq!(quorum(1), 1);
/// assert_eq!(quorum(4), 3);
/// assert_eq!(quorum(7), 4);
/// ```
pub const fn quorum(validators: usize) -> usize {
    if validators == 0 {
        return usize::MAX;
    }
    validators / 2 + 1
}

/// Check if a vote count meets quorum.
pub const fn meets_quorum(votes: usize, validators: usize) -> bool {
    votes >= quorum(validators)
}

/// How many more votes are needed.
pub const fn votes_needed(current: usize, validators: usize) -> usize {
    let q = quorum(validators);
    if current >= q {
        0
    } else {
        q - current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quorum_is_strict_majority() {
        let cases = [(1, 1), (2, 2), (3, 2), (4, 3), (5, 3), (6, 4), (7, 4), (10, 6), (21, 11)];
        for (n, expected) in cases {
            assert_eq!(quorum(n), expected, "quorum({})", n);
            // Two disjoint quorums cannot exist.
            assert!(2 * quorum(n) > n);
        }
    }

    #[test]
    fn empty_set_never_ratifies() {
        assert!(!meets_quorum(usize::MAX - 1, 0));
        assert!(!meets_quorum(0, 0));
    }

    #[test]
    fn needed_counts_down() {
        assert_eq!(votes_needed(0, 7), 4);
        assert_eq!(votes_needed(3, 7), 1);
        assert_eq!(votes_needed(9, 7), 0);
    }
}
