//! Channels and their transaction logs.

use crate::merge::{merge_immutable, merge_map, merge_option_min, merge_set, Merge};
use crate::proposal::Proposal;
use crate::status::{ChannelStatus, ForwardOnly};
use crate::task::Task;
use crate::{ChannelId, NodeId, ProposalId, TaskId, Timestamp, TxId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Account that funds genesis allocations. The only account allowed to go
/// negative.
pub const GENESIS_ACCOUNT: &str = "genesis";

/// Name of the channel every network starts with.
pub const GENERAL_CHANNEL: &str = "general";

/// An SP transfer. Immutable once written.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TxId,
    pub from: NodeId,
    pub to: NodeId,
    pub amount: u64,
    /// Portion of `amount` credited to the channel treasury instead of `to`.
    pub tax: u64,
    pub timestamp: Timestamp,
    #[serde(default)]
    pub task_id: Option<TaskId>,
}

impl Transaction {
    /// Allocation minted from the genesis account.
    pub fn genesis_allocation(node_id: &str, amount: u64) -> Self {
        Self {
            id: format!("genesis:{}", node_id),
            from: GENESIS_ACCOUNT.to_string(),
            to: node_id.to_string(),
            amount,
            tax: 0,
            timestamp: 0,
            task_id: None,
        }
    }

    /// Deterministic id of the payout for a completed task.
    pub fn settlement_id(task_id: &str) -> TxId {
        let hash = blake3::hash(format!("settle:{}", task_id).as_bytes());
        format!("tx-{}", &hash.to_hex()[..16])
    }
}

impl Merge for Transaction {
    fn merge(&mut self, other: &Self) -> bool {
        merge_immutable(self, other, "transaction")
    }
}

/// A workspace owning tasks, proposals and a transaction log.
///
/// Entities moved out by a split or merge stay in the maps but are listed in
/// `relocated_*` with their destination, so a late update to the old copy can
/// still be forwarded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub id: ChannelId,
    pub name: String,
    pub status: ChannelStatus,
    pub created_at: Timestamp,
    #[serde(default)]
    pub tasks: BTreeMap<TaskId, Task>,
    #[serde(default)]
    pub proposals: BTreeMap<ProposalId, Proposal>,
    #[serde(default)]
    pub transactions: BTreeMap<TxId, Transaction>,
    #[serde(default)]
    pub relocated_tasks: BTreeMap<TaskId, ChannelId>,
    #[serde(default)]
    pub relocated_proposals: BTreeMap<ProposalId, ChannelId>,
    #[serde(default)]
    pub split_into: BTreeSet<ChannelId>,
    #[serde(default)]
    pub merged_into: Option<ChannelId>,
    #[serde(default)]
    pub archived_at: Option<Timestamp>,
}

impl Channel {
    pub fn new(id: impl Into<ChannelId>, name: impl Into<String>, now: Timestamp) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            status: ChannelStatus::Active,
            created_at: now,
            tasks: BTreeMap::new(),
            proposals: BTreeMap::new(),
            transactions: BTreeMap::new(),
            relocated_tasks: BTreeMap::new(),
            relocated_proposals: BTreeMap::new(),
            split_into: BTreeSet::new(),
            merged_into: None,
            archived_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == ChannelStatus::Active
    }

    /// Copy of the channel without its entity maps.
    pub fn header(&self) -> Channel {
        Channel {
            tasks: BTreeMap::new(),
            proposals: BTreeMap::new(),
            transactions: BTreeMap::new(),
            ..self.clone()
        }
    }

    pub fn archive(&mut self, now: Timestamp) {
        self.status = self.status.join(ChannelStatus::Archived);
        merge_option_min(&mut self.archived_at, &Some(now));
    }

    /// Tasks that still live here.
    pub fn visible_tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks
            .values()
            .filter(|t| !self.relocated_tasks.contains_key(&t.id))
    }

    /// Proposals that still live here.
    pub fn visible_proposals(&self) -> impl Iterator<Item = &Proposal> {
        self.proposals
            .values()
            .filter(|p| !self.relocated_proposals.contains_key(&p.id))
    }

    pub fn has_task(&self, id: &str) -> bool {
        self.tasks.contains_key(id) && !self.relocated_tasks.contains_key(id)
    }

    pub fn has_proposal(&self, id: &str) -> bool {
        self.proposals.contains_key(id) && !self.relocated_proposals.contains_key(id)
    }
}

impl Merge for Channel {
    fn merge(&mut self, other: &Self) -> bool {
        let mut changed = false;

        if (other.created_at, &other.name) < (self.created_at, &self.name) {
            self.created_at = other.created_at;
            self.name = other.name.clone();
            changed = true;
        }
        if other.status.is_ahead_of(&self.status) {
            self.status = other.status;
            changed = true;
        }

        changed |= !merge_map(&mut self.tasks, &other.tasks).is_empty();
        changed |= !merge_map(&mut self.proposals, &other.proposals).is_empty();
        changed |= !merge_map(&mut self.transactions, &other.transactions).is_empty();
        changed |= !merge_map(&mut self.relocated_tasks, &other.relocated_tasks).is_empty();
        changed |=
            !merge_map(&mut self.relocated_proposals, &other.relocated_proposals).is_empty();
        changed |= merge_set(&mut self.split_into, &other.split_into);
        changed |= merge_option_min(&mut self.merged_into, &other.merged_into);
        changed |= merge_option_min(&mut self.archived_at, &other.archived_at);
        changed
    }
}
