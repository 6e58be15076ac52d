//! Node records and reputation awards.

use crate::merge::{merge_immutable, Merge};
use crate::{NodeId, Timestamp};
use serde::{Deserialize, Serialize};

/// A peer known to the network.
///
/// Balance is deliberately absent: it is derived from the transaction log.
/// Reputation is `genesis_reputation` plus the sum of replicated awards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    /// `b3b3/<hex>` identifier derived from the node's public key.
    pub id: NodeId,
    pub address: String,
    #[serde(default)]
    pub public_key: Option<String>,
    #[serde(default)]
    pub genesis_reputation: u64,
    pub joined_at: Timestamp,
    pub last_seen: Timestamp,
}

impl NodeRecord {
    pub fn new(id: impl Into<NodeId>, address: impl Into<String>, now: Timestamp) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
            public_key: None,
            genesis_reputation: 0,
            joined_at: now,
            last_seen: now,
        }
    }

    pub fn with_reputation(mut self, reputation: u64) -> Self {
        self.genesis_reputation = reputation;
        self
    }

    pub fn with_public_key(mut self, public_key: impl Into<String>) -> Self {
        self.public_key = Some(public_key.into());
        self
    }
}

impl Merge for NodeRecord {
    fn merge(&mut self, other: &Self) -> bool {
        let mut changed = false;

        // Address and key travel with the freshest sighting.
        let ours = (self.last_seen, &self.address, &self.public_key);
        let theirs = (other.last_seen, &other.address, &other.public_key);
        if theirs > ours {
            self.last_seen = other.last_seen;
            self.address = other.address.clone();
            self.public_key = other.public_key.clone();
            changed = true;
        }
        if other.genesis_reputation > self.genesis_reputation {
            self.genesis_reputation = other.genesis_reputation;
            changed = true;
        }
        if other.joined_at < self.joined_at {
            self.joined_at = other.joined_at;
            changed = true;
        }
        changed
    }
}

/// Why reputation was awarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AwardReason {
    TaskCompleted,
    VoteCast,
}

impl AwardReason {
    /// Fixed reputation increment for each event.
    pub const fn amount(&self) -> u64 {
        match self {
            AwardReason::TaskCompleted => 10,
            AwardReason::VoteCast => 1,
        }
    }
}

/// An append-only reputation increment.
///
/// Ids are derived from the triggering event so every node that observes the
/// same event produces the same award.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ReputationAward {
    pub id: String,
    pub node_id: NodeId,
    pub reason: AwardReason,
    pub amount: u64,
    pub awarded_at: Timestamp,
}

impl ReputationAward {
    pub fn task_completed(task_id: &str, node_id: &str, now: Timestamp) -> Self {
        Self {
            id: format!("task:{}:completed", task_id),
            node_id: node_id.to_string(),
            reason: AwardReason::TaskCompleted,
            amount: AwardReason::TaskCompleted.amount(),
            awarded_at: now,
        }
    }

    pub fn vote_cast(proposal_id: &str, node_id: &str, now: Timestamp) -> Self {
        Self {
            id: format!("vote:{}:{}", proposal_id, node_id),
            node_id: node_id.to_string(),
            reason: AwardReason::VoteCast,
            amount: AwardReason::VoteCast.amount(),
            awarded_at: now,
        }
    }
}

impl Merge for ReputationAward {
    fn merge(&mut self, other: &Self) -> bool {
        // Concurrent settlement of the same event: keep the earliest stamp.
        if other.id == self.id && other.node_id == self.node_id && other.awarded_at < self.awarded_at {
            self.awarded_at = other.awarded_at;
            return true;
        }
        merge_immutable(self, other, "reputation award")
    }
}
