//! Pure structural transforms.
//!
//! Each transform takes the current state by reference and returns a new
//! state plus a summary, or an error with the input untouched. `now` is the
//! command's `ratified_at`, never the local clock, so every node produces
//! the same output.

use crate::error::{Error, Result};
use polis_crdt::{
    Channel, ChannelId, GlobalState, MergeChannelsParams, Proposal,
    SplitChannelParams, SplitLogic, Task, Timestamp,
};
use std::collections::{BTreeMap, BTreeSet};

fn matches(logic: SplitLogic, matchers: &[String], title: &str, tags: &BTreeSet<String>) -> bool {
    match logic {
        SplitLogic::ByTag => matchers.iter().any(|m| tags.contains(m)),
        SplitLogic::ByTitlePrefix => {
            let title = title.to_lowercase();
            matchers.iter().any(|m| title.starts_with(&m.to_lowercase()))
        }
    }
}

fn destination<'a>(params: &'a SplitChannelParams, title: &str, tags: &BTreeSet<String>) -> Option<&'a ChannelId> {
    let empty = Vec::new();
    params.new_channels.iter().find(|dest| {
        let matchers = params.split_params.get(*dest).unwrap_or(&empty);
        matches(params.split_logic, matchers, title, tags)
    })
}

fn require_active<'a>(state: &'a GlobalState, id: &str) -> Result<&'a Channel> {
    let channel = state
        .channel(id)
        .ok_or_else(|| Error::Precondition(format!("channel {} does not exist", id)))?;
    if !channel.is_active() {
        return Err(Error::Precondition(format!("channel {} is archived", id)));
    }
    Ok(channel)
}

/// Move entities into `dest`, leaving relocation markers in `source`.
fn relocate(
    next: &mut GlobalState,
    source: &ChannelId,
    dest: &ChannelId,
    tasks: Vec<Task>,
    proposals: Vec<Proposal>,
) {
    if let Some(channel) = next.channels.get_mut(source) {
        for task in &tasks {
            channel.relocated_tasks.insert(task.id.clone(), dest.clone());
        }
        for proposal in &proposals {
            channel.relocated_proposals.insert(proposal.id.clone(), dest.clone());
        }
    }
    if let Some(channel) = next.channels.get_mut(dest) {
        for task in tasks {
            channel.tasks.insert(task.id.clone(), task);
        }
        for proposal in proposals {
            channel.proposals.insert(proposal.id.clone(), proposal);
        }
    }
}

/// Partition `target`'s tasks and proposals into new channels.
///
/// Destinations are tried in `new_channels` order and the first whose
/// matchers fit wins. Unmatched entities stay in the archived source, so
/// the entity count is conserved.
pub fn split_channel(
    state: &GlobalState,
    params: &SplitChannelParams,
    now: Timestamp,
) -> Result<(GlobalState, String)> {
    let source = require_active(state, &params.target)?;
    if params.new_channels.is_empty() {
        return Err(Error::Precondition("no destination channels".into()));
    }
    let mut seen = BTreeSet::new();
    for dest in &params.new_channels {
        if dest == &params.target || !seen.insert(dest) {
            return Err(Error::Precondition(format!("destination {} repeats", dest)));
        }
        if state.channel(dest).is_some() {
            return Err(Error::Precondition(format!("channel {} already exists", dest)));
        }
    }

    let mut tasks: BTreeMap<&ChannelId, Vec<Task>> = BTreeMap::new();
    let mut proposals: BTreeMap<&ChannelId, Vec<Proposal>> = BTreeMap::new();
    let mut unmatched = 0usize;
    for task in source.visible_tasks() {
        match destination(params, &task.title, &task.tags) {
            Some(dest) => tasks.entry(dest).or_default().push(task.clone()),
            None => unmatched += 1,
        }
    }
    for proposal in source.visible_proposals() {
        match destination(params, &proposal.title, &proposal.tags) {
            Some(dest) => proposals.entry(dest).or_default().push(proposal.clone()),
            None => unmatched += 1,
        }
    }

    let mut next = state.clone();
    let mut summary = Vec::new();
    for dest in &params.new_channels {
        next.create_channel(Channel::new(dest.clone(), dest.clone(), now))?;
        let moved_tasks = tasks.remove(dest).unwrap_or_default();
        let moved_proposals = proposals.remove(dest).unwrap_or_default();
        summary.push(format!(
            "{}: {} tasks, {} proposals",
            dest,
            moved_tasks.len(),
            moved_proposals.len()
        ));
        relocate(&mut next, &params.target, dest, moved_tasks, moved_proposals);
    }
    if let Some(channel) = next.channels.get_mut(&params.target) {
        channel.split_into.extend(params.new_channels.iter().cloned());
        channel.archive(now);
    }
    Ok((
        next,
        format!(
            "split {} into [{}]; {} unmatched",
            params.target,
            summary.join(", "),
            unmatched
        ),
    ))
}

/// Union every source's tasks and proposals into `target`, creating it if
/// needed, and archive the sources.
pub fn merge_channels(
    state: &GlobalState,
    params: &MergeChannelsParams,
    now: Timestamp,
) -> Result<(GlobalState, String)> {
    if params.sources.is_empty() {
        return Err(Error::Precondition("no source channels".into()));
    }
    let mut seen = BTreeSet::new();
    for source in &params.sources {
        if source == &params.target || !seen.insert(source) {
            return Err(Error::Precondition(format!("source {} repeats", source)));
        }
        require_active(state, source)?;
    }
    if state.channel(&params.target).is_some() {
        require_active(state, &params.target)?;
    }

    let mut next = state.clone();
    if next.channel(&params.target).is_none() {
        next.create_channel(Channel::new(params.target.clone(), params.target.clone(), now))?;
    }
    let mut moved = 0usize;
    for source in &params.sources {
        let Some(channel) = state.channel(source) else {
            continue;
        };
        let tasks: Vec<Task> = channel.visible_tasks().cloned().collect();
        let proposals: Vec<Proposal> = channel.visible_proposals().cloned().collect();
        moved += tasks.len() + proposals.len();
        relocate(&mut next, source, &params.target, tasks, proposals);
        if let Some(channel) = next.channels.get_mut(source) {
            channel.merged_into = Some(params.target.clone());
            channel.archive(now);
        }
    }
    Ok((
        next,
        format!(
            "merged [{}] into {}; {} entities moved",
            params.sources.join(", "),
            params.target,
            moved
        ),
    ))
}
