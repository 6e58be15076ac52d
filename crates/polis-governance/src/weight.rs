//! Reputation-weighted tally.

use polis_crdt::{GlobalState, Outcome, Proposal, VoteChoice};
use polis_ledger::reputation_of;
use serde::{Deserialize, Serialize};

/// `w(node) = 1 + log2(reputation + 1)`.
///
/// Every voter counts for at least 1; influence grows logarithmically so a
/// single high-reputation node cannot outvote the network linearly.
pub fn vote_weight(reputation: u64) -> f64 {
    1.0 + ((reputation as f64) + 1.0).log2()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Tally {
    pub approve_weight: f64,
    pub reject_weight: f64,
    pub abstain_weight: f64,
    pub voters: usize,
}

impl Tally {
    /// Approved iff approval strictly outweighs rejection. Ties reject.
    pub fn outcome(&self) -> Outcome {
        if self.approve_weight > self.reject_weight {
            Outcome::Approved
        } else {
            Outcome::Rejected
        }
    }
}

/// Sum counted ballots by choice, weighting each voter by reputation as of
/// the proposal deadline. Voters iterate in id order, so the float sums are
/// identical on every node.
pub fn tally(state: &GlobalState, proposal: &Proposal) -> Tally {
    let mut tally = Tally::default();
    for (voter, vote) in proposal.counted_votes() {
        let weight = vote_weight(reputation_of(state, voter, Some(proposal.deadline)));
        match vote.choice {
            VoteChoice::Approve => tally.approve_weight += weight,
            VoteChoice::Reject => tally.reject_weight += weight,
            VoteChoice::Abstain => tally.abstain_weight += weight,
        }
        tally.voters += 1;
    }
    tally
}
