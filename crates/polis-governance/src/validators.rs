//! Validator set selection.
//!
//! The set is the top N nodes by reputation, ties broken by lexicographic
//! id. It is a pure function of the reputation snapshot, so every node that
//! observes the same awards selects the same validators without talking to
//! anyone.

use crate::quorum::quorum;
use polis_crdt::{GlobalState, NodeId};
use polis_ledger::reputations;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorSet {
    /// Members in rank order.
    pub members: Vec<NodeId>,
}

impl ValidatorSet {
    /// Top `size` entries of a reputation snapshot.
    pub fn from_reputations(reputations: &BTreeMap<NodeId, u64>, size: usize) -> Self {
        let mut ranked: Vec<(&NodeId, u64)> = reputations.iter().map(|(id, r)| (id, *r)).collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        Self {
            members: ranked.into_iter().take(size).map(|(id, _)| id.clone()).collect(),
        }
    }

    /// The current set, sized by the network configuration.
    pub fn compute(state: &GlobalState) -> Self {
        let size = state.config().validator_set_size as usize;
        Self::from_reputations(&reputations(state, None), size)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains(&self, node_id: &str) -> bool {
        self.members.iter().any(|m| m == node_id)
    }

    pub fn quorum(&self) -> usize {
        quorum(self.len())
    }
}
