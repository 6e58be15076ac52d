//! Reputation projection.
//!
//! Reputation is `genesis_reputation + Σ awards`. Awards only ever get added,
//! so reputation never decreases. Passing a cutoff restricts the sum to
//! awards stamped at or before it, which pins a tally to the inputs that
//! existed when voting ended.

use polis_crdt::{GlobalState, NodeId, Timestamp};
use std::collections::BTreeMap;

/// Reputation of every registered node.
pub fn reputations(state: &GlobalState, cutoff: Option<Timestamp>) -> BTreeMap<NodeId, u64> {
    let mut out: BTreeMap<NodeId, u64> = state
        .nodes
        .values()
        .map(|n| (n.id.clone(), n.genesis_reputation))
        .collect();
    for award in state.awards.values() {
        if cutoff.is_some_and(|c| award.awarded_at > c) {
            continue;
        }
        if let Some(rep) = out.get_mut(&award.node_id) {
            *rep = rep.saturating_add(award.amount);
        }
    }
    out
}

pub fn reputation_of(state: &GlobalState, node_id: &str, cutoff: Option<Timestamp>) -> u64 {
    let Some(node) = state.nodes.get(node_id) else {
        return 0;
    };
    state
        .awards
        .values()
        .filter(|a| a.node_id == node_id)
        .filter(|a| cutoff.map_or(true, |c| a.awarded_at <= c))
        .fold(node.genesis_reputation, |acc, a| acc.saturating_add(a.amount))
}

#[cfg(test)]
mod tests {
    use super::*;
    use polis_crdt::{GenesisNode, GenesisSpec, ReputationAward};

    fn state() -> GlobalState {
        let mut s = GlobalState::genesis(&GenesisSpec {
            nodes: vec![GenesisNode {
                id: "alice".into(),
                address: String::new(),
                public_key: None,
                reputation: 3,
                balance: 0,
            }],
            created_at: 0,
        });
        s.add_award(ReputationAward::task_completed("t1", "alice", 100));
        s.add_award(ReputationAward::vote_cast("p1", "alice", 200));
        s.add_award(ReputationAward::vote_cast("p1", "ghost", 200));
        s
    }

    #[test]
    fn sums_awards() {
        let s = state();
        assert_eq!(reputation_of(&s, "alice", None), 14);
        assert_eq!(reputations(&s, None)["alice"], 14);
        assert!(!reputations(&s, None).contains_key("ghost"));
    }

    #[test]
    fn cutoff_excludes_later_awards() {
        let s = state();
        assert_eq!(reputation_of(&s, "alice", Some(150)), 13);
        assert_eq!(reputations(&s, Some(50))["alice"], 3);
    }

    #[test]
    fn duplicate_award_counts_once() {
        let mut s = state();
        assert!(!s.add_award(ReputationAward::task_completed("t1", "alice", 90)));
        assert_eq!(reputation_of(&s, "alice", None), 14);
    }
}
