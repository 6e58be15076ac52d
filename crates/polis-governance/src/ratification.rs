//! Validator ratification of privileged proposals.
//!
//! A pending proposal becomes an [`ExecutionCommand`] the first time a quorum
//! of its validator set has endorsed it. The set is the one the proposer
//! recorded on the proposal, so replicas whose reputation views differ still
//! count the same votes. The command's id derives from the proposal id and
//! the log refuses a second command for the same proposal, so late votes and
//! concurrent tallies cannot emit duplicates. `ratified_at` and
//! `ratified_by` come from the earliest quorum of votes, which makes them
//! identical on every node that holds the same votes.

use crate::error::{Error, Result};
use crate::validators::ValidatorSet;
use polis_crdt::{
    ExecutionCommand, ExecutionResult, GlobalState, ProposalId, ProposalStatus,
    RatificationVote, Timestamp,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum RatifyOutcome {
    /// Vote recorded, quorum not yet reached.
    Recorded { votes: usize, quorum: usize },
    /// This vote completed the quorum.
    Ratified { command: ExecutionCommand },
    /// The validator had already voted.
    Duplicate,
    /// A command already exists; the vote has no effect.
    AlreadyRatified,
}

/// Submit `validator`'s ratification vote.
pub fn ratify(
    state: &mut GlobalState,
    proposal_id: &str,
    validator: &str,
    now: Timestamp,
) -> Result<RatifyOutcome> {
    let status = state
        .proposal(proposal_id)
        .map(|p| p.status)
        .ok_or_else(|| polis_crdt::Error::ProposalNotFound(proposal_id.to_string()))?;
    if state.command_for_proposal(proposal_id).is_some()
        || matches!(
            status,
            ProposalStatus::Ratified | ProposalStatus::Executed | ProposalStatus::Failed
        )
    {
        debug!("late ratification from {} on {}", validator, proposal_id);
        return Ok(RatifyOutcome::AlreadyRatified);
    }
    if status != ProposalStatus::PendingRatification {
        return Err(Error::NotPending {
            proposal: proposal_id.to_string(),
            status: status.to_string(),
        });
    }

    let validators = validators_for(state, proposal_id)?;
    if !validators.contains(validator) {
        return Err(Error::NotValidator {
            node: validator.to_string(),
        });
    }

    let fresh = state.add_ratification(RatificationVote {
        proposal_id: proposal_id.to_string(),
        validator_id: validator.to_string(),
        timestamp: now,
    });
    if !fresh {
        return Ok(RatifyOutcome::Duplicate);
    }

    match try_finalize(state, proposal_id, &validators)? {
        Some(command) => Ok(RatifyOutcome::Ratified { command }),
        None => Ok(RatifyOutcome::Recorded {
            votes: valid_votes(state, proposal_id, &validators).len(),
            quorum: validators.quorum(),
        }),
    }
}

/// The validator set that ratifies `proposal_id`: the one pinned on the
/// proposal, or the current set for proposals created without one.
pub fn validators_for(state: &GlobalState, proposal_id: &str) -> Result<ValidatorSet> {
    let proposal = state
        .proposal(proposal_id)
        .ok_or_else(|| polis_crdt::Error::ProposalNotFound(proposal_id.to_string()))?;
    if proposal.validators.is_empty() {
        return Ok(ValidatorSet::compute(state));
    }
    Ok(ValidatorSet {
        members: proposal.validators.clone(),
    })
}

fn valid_votes(state: &GlobalState, proposal_id: &str, validators: &ValidatorSet) -> Vec<RatificationVote> {
    let mut votes: Vec<RatificationVote> = state
        .ratifications_for(proposal_id)
        .map(|m| {
            m.values()
                .filter(|v| validators.contains(&v.validator_id))
                .cloned()
                .collect()
        })
        .unwrap_or_default();
    votes.sort_by(|a, b| (a.timestamp, &a.validator_id).cmp(&(b.timestamp, &b.validator_id)));
    votes
}

/// Emit the command for `proposal_id` if quorum is met and none exists yet.
pub fn try_finalize(
    state: &mut GlobalState,
    proposal_id: &str,
    validators: &ValidatorSet,
) -> Result<Option<ExecutionCommand>> {
    if state.command_for_proposal(proposal_id).is_some() {
        return Ok(None);
    }
    let proposal = state
        .proposal(proposal_id)
        .ok_or_else(|| polis_crdt::Error::ProposalNotFound(proposal_id.to_string()))?;
    if proposal.status != ProposalStatus::PendingRatification {
        return Ok(None);
    }
    let Some(operation) = proposal.kind.operation() else {
        return Err(Error::InvalidProposal(format!(
            "{} has no operation to ratify",
            proposal_id
        )));
    };

    let votes = valid_votes(state, proposal_id, validators);
    let quorum = validators.quorum();
    if votes.len() < quorum {
        return Ok(None);
    }
    let deciding = &votes[..quorum];
    let ratified_at = deciding[quorum - 1].timestamp;
    let command = ExecutionCommand::new(
        proposal_id,
        operation,
        ratified_at,
        deciding.iter().map(|v| v.validator_id.clone()),
    );

    state.add_command(command.clone());
    let stored = state.proposal_mut(proposal_id)?;
    stored.transition(ProposalStatus::Ratified)?;
    stored.execution_result = None;
    info!(
        "proposal {} ratified by {}/{} validators -> command {}",
        proposal_id,
        quorum,
        validators.len(),
        command.command_id
    );
    Ok(Some(command))
}

/// Finalize every pending proposal that has reached quorum. Used by the
/// ratification loop, which also picks up votes that arrived via gossip.
pub fn tally_pending(state: &mut GlobalState) -> Vec<ExecutionCommand> {
    let pending: Vec<ProposalId> = state
        .proposals()
        .filter(|(_, p)| p.status == ProposalStatus::PendingRatification)
        .map(|(_, p)| p.id.clone())
        .collect();
    let mut commands = Vec::new();
    for id in &pending {
        let finalized = validators_for(state, id).and_then(|v| try_finalize(state, id, &v));
        match finalized {
            Ok(Some(command)) => commands.push(command),
            Ok(None) => {}
            Err(e) => warn!("could not tally ratifications for {}: {}", id, e),
        }
    }
    commands
}

/// Copy a command's replicated outcome back onto its proposal.
pub fn record_execution(state: &mut GlobalState, command: &ExecutionCommand) -> Result<()> {
    let Some(success) = command.success else {
        return Ok(());
    };
    let proposal = state.proposal_mut(&command.proposal_id)?;
    if proposal.status == ProposalStatus::PendingRatification {
        proposal.transition(ProposalStatus::Ratified)?;
    }
    let detail = command.result.clone().unwrap_or_default();
    let (status, result) = if success {
        (ProposalStatus::Executed, ExecutionResult::ok(detail))
    } else {
        (ProposalStatus::Failed, ExecutionResult::failed(detail))
    };
    proposal.transition(status)?;
    proposal.execution_result = Some(result.with_command(command.command_id.clone()));
    Ok(())
}
