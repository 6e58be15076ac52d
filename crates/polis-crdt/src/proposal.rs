//! Governance proposals.
//!
//! A proposal's kind is a closed tagged union; each variant carries its own
//! typed parameters and declares whether approval applies it directly or
//! routes it through ratification.

use crate::command::{Operation, UpgradeParams};
use crate::config::ConfigUpdate;
use crate::error::{Error, Result};
use crate::merge::{merge_map, merge_option_max, Merge};
use crate::status::{ForwardOnly, ProposalStatus};
use crate::{CommandId, NodeId, ProposalId, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "type", content = "params", rename_all = "snake_case")]
pub enum ProposalKind {
    /// Signalling only. Approval closes the proposal.
    Generic,
    /// Changes a network parameter on approval.
    ConfigChange(ConfigUpdate),
    /// Structural change to the channel topology.
    NetworkOperation(Operation),
    /// Any privileged operation, proposed directly.
    Command(Operation),
    CodeUpgrade(UpgradeParams),
}

impl ProposalKind {
    pub fn name(&self) -> &'static str {
        match self {
            ProposalKind::Generic => "generic",
            ProposalKind::ConfigChange(_) => "config_change",
            ProposalKind::NetworkOperation(_) => "network_operation",
            ProposalKind::Command(_) => "command",
            ProposalKind::CodeUpgrade(_) => "code_upgrade",
        }
    }

    /// Applied in place as soon as the proposal is approved.
    pub fn is_self_executing(&self) -> bool {
        matches!(self, ProposalKind::ConfigChange(_))
    }

    /// Must pass through validator ratification before execution.
    pub fn requires_ratification(&self) -> bool {
        self.operation().is_some()
    }

    /// The operation a ratified proposal turns into.
    pub fn operation(&self) -> Option<Operation> {
        match self {
            ProposalKind::NetworkOperation(op) | ProposalKind::Command(op) => Some(op.clone()),
            ProposalKind::CodeUpgrade(params) => Some(Operation::ExecuteUpgrade(params.clone())),
            ProposalKind::Generic | ProposalKind::ConfigChange(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteChoice {
    Approve,
    Reject,
    Abstain,
}

/// A single voter's ballot. Immutable once cast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Vote {
    pub cast_at: Timestamp,
    pub choice: VoteChoice,
}

impl Merge for Vote {
    // Two ballots from one voter can only come from a misbehaving replica;
    // every node keeps the earliest.
    fn merge(&mut self, other: &Self) -> bool {
        if other < self {
            *self = *other;
            true
        } else {
            false
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Approved,
    Rejected,
}

/// What happened when the proposal's effect was applied.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_id: Option<CommandId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutionResult {
    pub fn ok(detail: impl Into<String>) -> Self {
        Self {
            success: true,
            command_id: None,
            detail: Some(detail.into()),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            command_id: None,
            detail: None,
            error: Some(error.into()),
        }
    }

    pub fn with_command(mut self, command_id: impl Into<CommandId>) -> Self {
        self.command_id = Some(command_id.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    pub id: ProposalId,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub proposer: NodeId,
    pub kind: ProposalKind,
    pub status: ProposalStatus,
    #[serde(default)]
    pub votes: BTreeMap<NodeId, Vote>,
    #[serde(default)]
    pub outcome: Option<Outcome>,
    #[serde(default)]
    pub execution_result: Option<ExecutionResult>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    /// Validator set that ratifies this proposal, fixed by the proposer.
    /// Empty for kinds that need no ratification.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub validators: Vec<NodeId>,
    pub created_at: Timestamp,
    pub deadline: Timestamp,
}

type ProposalIdentity<'a> = (
    Timestamp,
    Timestamp,
    &'a str,
    &'a str,
    &'a str,
    &'a ProposalKind,
    &'a BTreeSet<String>,
    &'a [NodeId],
);

impl Proposal {
    pub fn new(
        id: impl Into<ProposalId>,
        title: impl Into<String>,
        proposer: impl Into<NodeId>,
        kind: ProposalKind,
        created_at: Timestamp,
        deadline: Timestamp,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: String::new(),
            proposer: proposer.into(),
            kind,
            status: ProposalStatus::Open,
            votes: BTreeMap::new(),
            outcome: None,
            execution_result: None,
            tags: BTreeSet::new(),
            validators: Vec::new(),
            created_at,
            deadline,
        }
    }

    pub fn with_validators(mut self, validators: Vec<NodeId>) -> Self {
        self.validators = validators;
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    fn identity(&self) -> ProposalIdentity<'_> {
        (
            self.created_at,
            self.deadline,
            &self.title,
            &self.description,
            &self.proposer,
            &self.kind,
            &self.tags,
            &self.validators,
        )
    }

    /// Record `voter`'s ballot. One ballot per voter, only while open and
    /// not past the deadline.
    pub fn cast_vote(&mut self, voter: &str, choice: VoteChoice, now: Timestamp) -> Result<()> {
        if self.status != ProposalStatus::Open {
            return Err(Error::InvalidInput(format!(
                "proposal {} is {}",
                self.id, self.status
            )));
        }
        if now > self.deadline {
            return Err(Error::InvalidInput(format!(
                "voting on {} ended at {}",
                self.id, self.deadline
            )));
        }
        if self.votes.contains_key(voter) {
            return Err(Error::Duplicate(format!("vote by {} on {}", voter, self.id)));
        }
        self.votes.insert(voter.to_string(), Vote { cast_at: now, choice });
        Ok(())
    }

    /// Ballots that count toward the tally.
    pub fn counted_votes(&self) -> impl Iterator<Item = (&NodeId, &Vote)> {
        let deadline = self.deadline;
        self.votes.iter().filter(move |(_, v)| v.cast_at <= deadline)
    }

    /// Move to `next` following the proposal transition table.
    pub fn transition(&mut self, next: ProposalStatus) -> Result<()> {
        if self.status == next {
            return Ok(());
        }
        if !self.status.can_transition_to(&next) {
            return Err(Error::InvalidTransition {
                entity: format!("proposal {}", self.id),
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        Ok(())
    }
}

impl Merge for Proposal {
    fn merge(&mut self, other: &Self) -> bool {
        let mut changed = false;

        if other.identity() < self.identity() {
            self.title = other.title.clone();
            self.description = other.description.clone();
            self.proposer = other.proposer.clone();
            self.kind = other.kind.clone();
            self.tags = other.tags.clone();
            self.validators = other.validators.clone();
            self.created_at = other.created_at;
            self.deadline = other.deadline;
            changed = true;
        }

        changed |= !merge_map(&mut self.votes, &other.votes).is_empty();

        // Outcome is decided together with status.
        if other.status.is_ahead_of(&self.status) {
            self.status = other.status;
            self.outcome = other.outcome;
            changed = true;
        } else if self.status.is_ahead_of(&other.status) {
            debug!(
                "proposal {}: discarding regression {} -> {}",
                self.id, self.status, other.status
            );
        } else {
            changed |= merge_option_max(&mut self.outcome, &other.outcome);
        }

        changed |= merge_option_max(&mut self.execution_result, &other.execution_result);
        changed
    }
}
