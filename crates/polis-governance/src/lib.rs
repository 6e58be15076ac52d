//! Polis Governance
//!
//! Two tiers:
//!
//! 1. **Community vote.** Registered nodes cast reputation-weighted ballots;
//!    close is a pure reducer over those ballots. Self-executing kinds apply
//!    on approval, privileged kinds move to pending ratification.
//! 2. **Ratification.** The top-N validators by reputation endorse pending
//!    proposals; the first quorum emits exactly one execution command.
//!
//! # Quorum
//!
//! - n validators → floor(n / 2) + 1 unique votes
//!
//! Every derived value here (weights, outcome, validator set, quorum) is a
//! function of replicated inputs only, so nodes never need to coordinate.

mod error;
mod proposals;
mod quorum;
mod ratification;
mod validators;
mod weight;

pub use error::{Error, Result};
pub use proposals::{close, close_due, close_trigger, propose, vote, CloseOutcome, CloseTrigger, NewProposal};
pub use quorum::{meets_quorum, quorum, votes_needed};
pub use ratification::{ratify, record_execution, tally_pending, try_finalize, RatifyOutcome};
pub use validators::ValidatorSet;
pub use weight::{tally, vote_weight, Tally};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quorum_scales_correctly() {
        assert_eq!(quorum(1), 1);
        assert_eq!(quorum(3), 2);
        assert_eq!(quorum(7), 4);
        assert_eq!(quorum(8), 5);
    }
}
