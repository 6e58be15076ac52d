//! Proposal state machine: create, vote, close.
//!
//! Closing is a pure reducer over the replicated ballots. Any node may close
//! a proposal once it is due; concurrent closes compute the same outcome, and
//! the status merge settles the rest.

use crate::error::{Error, Result};
use crate::validators::ValidatorSet;
use crate::weight::{tally, Tally};
use polis_crdt::{
    derive_id, ChannelId, ConfigRecord, ExecutionResult, GlobalState, NodeId, Operation,
    Outcome, Proposal, ProposalId, ProposalKind, ProposalStatus, ReputationAward, Timestamp,
    VoteChoice,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

/// Parameters of a new proposal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewProposal {
    pub channel: ChannelId,
    pub proposer: NodeId,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub kind: ProposalKind,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    /// Overrides the network voting period.
    #[serde(default)]
    pub voting_period_ms: Option<u64>,
}

fn validate(kind: &ProposalKind) -> Result<()> {
    let invalid = |msg: &str| Err(Error::InvalidProposal(msg.to_string()));
    let check_op = |op: &Operation| -> Result<()> {
        match op {
            Operation::SplitChannel(p) => {
                if p.new_channels.is_empty() {
                    return invalid("split needs at least one new channel");
                }
                let unique: BTreeSet<&String> = p.new_channels.iter().collect();
                if unique.len() != p.new_channels.len() || unique.contains(&p.target) {
                    return invalid("split destinations must be distinct from each other and the target");
                }
                Ok(())
            }
            Operation::MergeChannels(p) => {
                if p.sources.is_empty() || p.sources.contains(&p.target) {
                    return invalid("merge needs sources distinct from the target");
                }
                Ok(())
            }
            Operation::ExecuteUpgrade(p) => {
                if p.hash.len() != 64 || !p.hash.chars().all(|c| c.is_ascii_hexdigit()) {
                    return invalid("upgrade hash must be 64 hex characters");
                }
                Ok(())
            }
        }
    };
    match kind {
        ProposalKind::Generic | ProposalKind::ConfigChange(_) => Ok(()),
        ProposalKind::NetworkOperation(Operation::ExecuteUpgrade(_)) => {
            invalid("upgrades are proposed as code_upgrade")
        }
        ProposalKind::NetworkOperation(op) | ProposalKind::Command(op) => check_op(op),
        ProposalKind::CodeUpgrade(params) => check_op(&Operation::ExecuteUpgrade(params.clone())),
    }
}

/// Create an open proposal. Returns its id.
pub fn propose(state: &mut GlobalState, new: NewProposal, now: Timestamp) -> Result<ProposalId> {
    if new.title.trim().is_empty() {
        return Err(Error::InvalidProposal("title is empty".into()));
    }
    validate(&new.kind)?;
    let period = new
        .voting_period_ms
        .unwrap_or_else(|| state.config().voting_period_ms);
    let id = derive_id("prop", &[&new.proposer, &now.to_string(), &new.title]);
    let mut proposal = Proposal::new(
        id.clone(),
        new.title,
        new.proposer,
        new.kind,
        now,
        now.saturating_add(period),
    )
    .with_description(new.description);
    proposal.tags = new.tags;
    if proposal.kind.requires_ratification() {
        proposal.validators = ValidatorSet::compute(state).members;
    }
    info!("proposal {} ({}) opened in {}", id, proposal.kind.name(), new.channel);
    state.create_proposal(&new.channel, proposal)?;
    Ok(id)
}

/// Cast a ballot and record the voter's participation award.
pub fn vote(
    state: &mut GlobalState,
    proposal_id: &str,
    voter: &str,
    choice: VoteChoice,
    now: Timestamp,
) -> Result<()> {
    if !state.is_registered(voter) {
        return Err(polis_crdt::Error::UnknownNode(voter.to_string()).into());
    }
    state.proposal_mut(proposal_id)?.cast_vote(voter, choice, now)?;
    state.add_award(ReputationAward::vote_cast(proposal_id, voter, now));
    debug!("{} voted {:?} on {}", voter, choice, proposal_id);
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseTrigger {
    DeadlinePassed,
    AllVoted,
}

/// Why `proposal` may be closed at `now`, if it may.
///
/// `AllVoted` is judged against the members this replica knows about. A
/// replica that has not yet heard of a newly joined node may close early
/// and miss that node's ballot. Replicas that close on different ballot sets
/// may disagree on the outcome until the status merge keeps the more
/// advanced status. Privileged proposals still need a validator quorum
/// after that, which a replica with a partial view cannot supply alone.
pub fn close_trigger(state: &GlobalState, proposal: &Proposal, now: Timestamp) -> Option<CloseTrigger> {
    if now > proposal.deadline {
        return Some(CloseTrigger::DeadlinePassed);
    }
    let all_voted = !state.nodes.is_empty()
        && state
            .nodes
            .keys()
            .all(|n| proposal.counted_votes().any(|(voter, _)| voter == n));
    all_voted.then_some(CloseTrigger::AllVoted)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloseOutcome {
    pub proposal_id: ProposalId,
    pub outcome: Outcome,
    pub status: ProposalStatus,
    pub tally: Tally,
}

/// Close a proposal. Idempotent: closing an already-closed proposal returns
/// its recorded result without touching state.
pub fn close(state: &mut GlobalState, proposal_id: &str, now: Timestamp) -> Result<CloseOutcome> {
    let proposal = state
        .proposal(proposal_id)
        .cloned()
        .ok_or_else(|| polis_crdt::Error::ProposalNotFound(proposal_id.to_string()))?;
    let tally = tally(state, &proposal);

    if proposal.status != ProposalStatus::Open {
        return Ok(CloseOutcome {
            proposal_id: proposal.id,
            outcome: proposal.outcome.unwrap_or_else(|| tally.outcome()),
            status: proposal.status,
            tally,
        });
    }
    if close_trigger(state, &proposal, now).is_none() {
        return Err(Error::NotClosable {
            proposal: proposal.id,
            reason: format!("voting open until {}", proposal.deadline),
        });
    }

    let outcome = tally.outcome();
    let (status, result) = match (outcome, &proposal.kind) {
        (Outcome::Rejected, _) => (ProposalStatus::Rejected, None),
        (Outcome::Approved, ProposalKind::ConfigChange(update)) => {
            state.add_config_record(ConfigRecord {
                applied_at: proposal.deadline,
                id: proposal.id.clone(),
                update: update.clone(),
            });
            (
                ProposalStatus::Executed,
                Some(ExecutionResult::ok(format!("applied {:?}", update))),
            )
        }
        (Outcome::Approved, kind) if kind.requires_ratification() => {
            (ProposalStatus::PendingRatification, None)
        }
        (Outcome::Approved, _) => (ProposalStatus::Closed, None),
    };

    let stored = state.proposal_mut(proposal_id)?;
    stored.transition(status)?;
    stored.outcome = Some(outcome);
    if result.is_some() {
        stored.execution_result = result;
    }
    info!(
        "proposal {} closed: {:?} ({:.3} approve / {:.3} reject) -> {}",
        proposal_id, outcome, tally.approve_weight, tally.reject_weight, status
    );
    Ok(CloseOutcome {
        proposal_id: proposal_id.to_string(),
        outcome,
        status,
        tally,
    })
}

/// Close every open proposal that is due. Used by the closer loop.
pub fn close_due(state: &mut GlobalState, now: Timestamp) -> Vec<CloseOutcome> {
    let due: Vec<ProposalId> = state
        .proposals()
        .filter(|(_, p)| p.status == ProposalStatus::Open)
        .filter(|(_, p)| close_trigger(state, p, now).is_some())
        .map(|(_, p)| p.id.clone())
        .collect();
    let mut closed = Vec::with_capacity(due.len());
    for id in &due {
        match close(state, id, now) {
            Ok(outcome) => closed.push(outcome),
            Err(e) => warn!("could not close proposal {}: {}", id, e),
        }
    }
    closed
}
