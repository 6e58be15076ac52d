//! Ratification votes, privileged operations and the execution log.

use crate::merge::{merge_immutable, merge_option_max, merge_set, Merge};
use crate::{ChannelId, CommandId, NodeId, ProposalId, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// How `split_channel` assigns entities to destination channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitLogic {
    /// An entity matches a destination when it carries one of the listed tags.
    ByTag,
    /// An entity matches a destination when its title starts with one of the
    /// listed prefixes (case-insensitive).
    ByTitlePrefix,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SplitChannelParams {
    pub target: ChannelId,
    pub new_channels: Vec<ChannelId>,
    pub split_logic: SplitLogic,
    /// Matchers per destination. Destinations are tried in `new_channels`
    /// order; the first match wins.
    #[serde(default)]
    pub split_params: BTreeMap<ChannelId, Vec<String>>,
}

/// Ids are globally unique, so keeping every entity is the only resolution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictResolution {
    #[default]
    KeepAll,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MergeChannelsParams {
    pub sources: Vec<ChannelId>,
    pub target: ChannelId,
    #[serde(default)]
    pub conflict_resolution: ConflictResolution,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UpgradeParams {
    pub package_ref: String,
    /// Hex BLAKE3 of the package bytes.
    pub hash: String,
    pub version: String,
}

/// The closed set of privileged operations the executor understands.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "operation", content = "params", rename_all = "snake_case")]
pub enum Operation {
    SplitChannel(SplitChannelParams),
    MergeChannels(MergeChannelsParams),
    ExecuteUpgrade(UpgradeParams),
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::SplitChannel(_) => "split_channel",
            Operation::MergeChannels(_) => "merge_channels",
            Operation::ExecuteUpgrade(_) => "execute_upgrade",
        }
    }
}

/// A validator's endorsement of a pending proposal.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RatificationVote {
    pub proposal_id: ProposalId,
    pub validator_id: NodeId,
    pub timestamp: Timestamp,
}

impl Merge for RatificationVote {
    // Duplicates collapse by validator; the earliest endorsement stands.
    fn merge(&mut self, other: &Self) -> bool {
        if other.timestamp < self.timestamp {
            self.timestamp = other.timestamp;
            return true;
        }
        false
    }
}

/// Derive the command id for a proposal. One proposal, one id, on every node.
pub fn command_id_for(proposal_id: &str) -> CommandId {
    let hash = blake3::hash(format!("command:{}", proposal_id).as_bytes());
    format!("cmd-{}", &hash.to_hex()[..16])
}

/// An entry in the append-only execution log.
///
/// `executed`, `success` and `result` are replicated for observability only;
/// whether *this* node has applied a command is tracked by its executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionCommand {
    pub command_id: CommandId,
    pub proposal_id: ProposalId,
    #[serde(flatten)]
    pub operation: Operation,
    pub ratified_at: Timestamp,
    pub ratified_by: BTreeSet<NodeId>,
    #[serde(default)]
    pub executed: bool,
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub result: Option<String>,
}

impl ExecutionCommand {
    pub fn new(
        proposal_id: impl Into<ProposalId>,
        operation: Operation,
        ratified_at: Timestamp,
        ratified_by: impl IntoIterator<Item = NodeId>,
    ) -> Self {
        let proposal_id = proposal_id.into();
        Self {
            command_id: command_id_for(&proposal_id),
            proposal_id,
            operation,
            ratified_at,
            ratified_by: ratified_by.into_iter().collect(),
            executed: false,
            success: None,
            result: None,
        }
    }

    /// Position key in the global execution order.
    pub fn order_key(&self) -> (Timestamp, &str) {
        (self.ratified_at, &self.command_id)
    }

    pub fn record_outcome(&mut self, success: bool, result: impl Into<String>) {
        self.executed = true;
        self.success = Some(success);
        self.result = Some(result.into());
    }
}

impl Merge for ExecutionCommand {
    fn merge(&mut self, other: &Self) -> bool {
        let mut changed = false;
        let ours = (&self.proposal_id, &self.operation);
        let theirs = (&other.proposal_id, &other.operation);
        if ours != theirs {
            let mut key = (self.proposal_id.clone(), self.operation.clone());
            if merge_immutable(&mut key, &(other.proposal_id.clone(), other.operation.clone()), "command") {
                self.proposal_id = key.0;
                self.operation = key.1;
                changed = true;
            }
        }
        if other.ratified_at < self.ratified_at {
            self.ratified_at = other.ratified_at;
            changed = true;
        }
        changed |= merge_set(&mut self.ratified_by, &other.ratified_by);
        if other.executed && !self.executed {
            self.executed = true;
            changed = true;
        }
        changed |= merge_option_max(&mut self.success, &other.success);
        changed |= merge_option_max(&mut self.result, &other.result);
        changed
    }
}
