//! The replicated state root.

use crate::channel::{Channel, Transaction, GENERAL_CHANNEL};
use crate::command::{command_id_for, ExecutionCommand, RatificationVote};
use crate::config::{fold_config, ConfigRecord, NetworkConfig, UpgradeRecord};
use crate::error::{Error, Result};
use crate::merge::{merge_map, Merge, MergeReport};
use crate::node::{NodeRecord, ReputationAward};
use crate::proposal::Proposal;
use crate::task::Task;
use crate::{ChannelId, CommandId, NodeId, ProposalId, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, trace};

/// A node in the genesis set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisNode {
    pub id: NodeId,
    pub address: String,
    #[serde(default)]
    pub public_key: Option<String>,
    #[serde(default)]
    pub reputation: u64,
    #[serde(default)]
    pub balance: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisSpec {
    pub nodes: Vec<GenesisNode>,
    #[serde(default)]
    pub created_at: Timestamp,
}

/// One node's view of the whole network.
///
/// Every collection is a grow-only map keyed by a globally unique id, so the
/// whole state is a join-semilattice under [`GlobalState::merge`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalState {
    #[serde(default)]
    pub nodes: BTreeMap<NodeId, NodeRecord>,
    #[serde(default)]
    pub channels: BTreeMap<ChannelId, Channel>,
    #[serde(default)]
    pub awards: BTreeMap<String, ReputationAward>,
    #[serde(default)]
    pub ratifications: BTreeMap<ProposalId, BTreeMap<NodeId, RatificationVote>>,
    #[serde(default)]
    pub commands: BTreeMap<CommandId, ExecutionCommand>,
    #[serde(default)]
    pub config_records: BTreeMap<String, ConfigRecord>,
    #[serde(default)]
    pub upgrades: BTreeMap<String, UpgradeRecord>,
}

impl GlobalState {
    pub fn new() -> Self {
        Self::default()
    }

    /// True for a state holding no entries at all, such as an empty delta.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
            && self.channels.is_empty()
            && self.awards.is_empty()
            && self.ratifications.is_empty()
            && self.commands.is_empty()
            && self.config_records.is_empty()
            && self.upgrades.is_empty()
    }

    /// Initial state: genesis nodes, the general channel and the genesis
    /// allocations.
    pub fn genesis(seed: &GenesisSpec) -> Self {
        let mut state = GlobalState::new();
        let mut general = Channel::new(GENERAL_CHANNEL, "General", seed.created_at);
        for node in &seed.nodes {
            let mut record = NodeRecord::new(node.id.clone(), node.address.clone(), seed.created_at)
                .with_reputation(node.reputation);
            record.public_key = node.public_key.clone();
            state.nodes.insert(node.id.clone(), record);
            if node.balance > 0 {
                let tx = Transaction::genesis_allocation(&node.id, node.balance);
                general.transactions.insert(tx.id.clone(), tx);
            }
        }
        state.channels.insert(general.id.clone(), general);
        state
    }

    /// Join `other` into this state.
    pub fn merge(&mut self, other: &GlobalState) -> MergeReport {
        let mut report = MergeReport::default();
        report.absorb(merge_map(&mut self.nodes, &other.nodes));
        report.absorb(merge_map(&mut self.channels, &other.channels));
        report.absorb(merge_map(&mut self.awards, &other.awards));
        report.absorb(merge_map(&mut self.ratifications, &other.ratifications));
        report.absorb(merge_map(&mut self.commands, &other.commands));
        report.absorb(merge_map(&mut self.config_records, &other.config_records));
        report.absorb(merge_map(&mut self.upgrades, &other.upgrades));
        let forwarded = self.forward_relocated();
        if forwarded > 0 {
            debug!("forwarded {} updates to relocated entities", forwarded);
        }
        report
    }

    /// Push updates that landed on a stale copy of a moved entity down its
    /// relocation chain.
    ///
    /// Each pass joins every copy into the copy one hop downstream; passes
    /// repeat until nothing changes, so every copy covers all copies that
    /// precede it. A chain never visits more channels than exist, which
    /// bounds the number of passes.
    fn forward_relocated(&mut self) -> usize {
        let mut total = 0;
        for _ in 0..=self.channels.len() {
            let changed = self.forward_one_hop();
            if changed == 0 {
                break;
            }
            total += changed;
        }
        total
    }

    fn forward_one_hop(&mut self) -> usize {
        let mut tasks: Vec<(ChannelId, Task)> = Vec::new();
        let mut proposals: Vec<(ChannelId, Proposal)> = Vec::new();
        for channel in self.channels.values() {
            for (id, dest) in &channel.relocated_tasks {
                if let Some(task) = channel.tasks.get(id) {
                    tasks.push((dest.clone(), task.clone()));
                }
            }
            for (id, dest) in &channel.relocated_proposals {
                if let Some(proposal) = channel.proposals.get(id) {
                    proposals.push((dest.clone(), proposal.clone()));
                }
            }
        }

        let mut changed = 0;
        for (dest, task) in tasks {
            if let Some(channel) = self.channels.get_mut(&dest) {
                match channel.tasks.get_mut(&task.id) {
                    Some(copy) => changed += usize::from(copy.merge(&task)),
                    None => {
                        channel.tasks.insert(task.id.clone(), task);
                        changed += 1;
                    }
                }
            }
        }
        for (dest, proposal) in proposals {
            if let Some(channel) = self.channels.get_mut(&dest) {
                match channel.proposals.get_mut(&proposal.id) {
                    Some(copy) => changed += usize::from(copy.merge(&proposal)),
                    None => {
                        channel.proposals.insert(proposal.id.clone(), proposal);
                        changed += 1;
                    }
                }
            }
        }
        changed
    }

    // ----- nodes -----

    pub fn register_node(&mut self, record: NodeRecord) -> bool {
        match self.nodes.get_mut(&record.id) {
            Some(existing) => existing.merge(&record),
            None => {
                self.nodes.insert(record.id.clone(), record);
                true
            }
        }
    }

    pub fn is_registered(&self, node_id: &str) -> bool {
        self.nodes.contains_key(node_id)
    }

    fn require_node(&self, node_id: &str) -> Result<()> {
        if self.is_registered(node_id) {
            Ok(())
        } else {
            Err(Error::UnknownNode(node_id.to_string()))
        }
    }

    // ----- channels -----

    pub fn channel(&self, id: &str) -> Option<&Channel> {
        self.channels.get(id)
    }

    pub fn create_channel(&mut self, channel: Channel) -> Result<()> {
        if self.channels.contains_key(&channel.id) {
            return Err(Error::Duplicate(format!("channel {}", channel.id)));
        }
        self.channels.insert(channel.id.clone(), channel);
        Ok(())
    }

    fn active_channel_mut(&mut self, id: &str) -> Result<&mut Channel> {
        let channel = self
            .channels
            .get_mut(id)
            .ok_or_else(|| Error::ChannelNotFound(id.to_string()))?;
        if !channel.is_active() {
            return Err(Error::ChannelArchived(id.to_string()));
        }
        Ok(channel)
    }

    // ----- tasks -----

    /// Channel a task currently lives in.
    pub fn locate_task(&self, task_id: &str) -> Option<&ChannelId> {
        self.channels
            .values()
            .find(|c| c.has_task(task_id))
            .map(|c| &c.id)
    }

    pub fn task(&self, task_id: &str) -> Option<&Task> {
        let channel = self.locate_task(task_id)?;
        self.channels.get(channel)?.tasks.get(task_id)
    }

    pub fn tasks(&self) -> impl Iterator<Item = (&ChannelId, &Task)> {
        self.channels
            .values()
            .flat_map(|c| c.visible_tasks().map(move |t| (&c.id, t)))
    }

    fn task_mut(&mut self, task_id: &str) -> Result<&mut Task> {
        let channel = self
            .locate_task(task_id)
            .cloned()
            .ok_or_else(|| Error::TaskNotFound(task_id.to_string()))?;
        self.channels
            .get_mut(&channel)
            .and_then(|c| c.tasks.get_mut(task_id))
            .ok_or_else(|| Error::TaskNotFound(task_id.to_string()))
    }

    pub fn create_task(&mut self, channel_id: &str, task: Task) -> Result<()> {
        self.require_node(&task.creator)?;
        if self.channels.values().any(|c| c.tasks.contains_key(&task.id)) {
            return Err(Error::Duplicate(format!("task {}", task.id)));
        }
        let channel = self.active_channel_mut(channel_id)?;
        trace!("task {} created in {}", task.id, channel_id);
        channel.tasks.insert(task.id.clone(), task);
        Ok(())
    }

    pub fn open_auction(&mut self, task_id: &str, deadline: Timestamp) -> Result<()> {
        self.task_mut(task_id)?.open_auction(deadline)
    }

    pub fn place_bid(&mut self, task_id: &str, bidder: &str, amount: u64, now: Timestamp) -> Result<()> {
        self.require_node(bidder)?;
        self.task_mut(task_id)?.place_bid(bidder, amount, now)
    }

    pub fn select_bid(&mut self, task_id: &str, bidder: &str) -> Result<()> {
        self.task_mut(task_id)?.select_bid(bidder)
    }

    pub fn claim_task(&mut self, task_id: &str, node_id: &str) -> Result<()> {
        self.require_node(node_id)?;
        self.task_mut(task_id)?.claim(node_id)
    }

    pub fn start_task(&mut self, task_id: &str) -> Result<()> {
        self.task_mut(task_id)?.start()
    }

    /// Mark a task completed. Payout is handled by the ledger.
    pub fn complete_task(&mut self, task_id: &str) -> Result<()> {
        self.task_mut(task_id)?.complete()
    }

    pub fn fail_task(&mut self, task_id: &str) -> Result<()> {
        self.task_mut(task_id)?.fail()
    }

    // ----- proposals -----

    pub fn locate_proposal(&self, proposal_id: &str) -> Option<&ChannelId> {
        self.channels
            .values()
            .find(|c| c.has_proposal(proposal_id))
            .map(|c| &c.id)
    }

    pub fn proposal(&self, proposal_id: &str) -> Option<&Proposal> {
        let channel = self.locate_proposal(proposal_id)?;
        self.channels.get(channel)?.proposals.get(proposal_id)
    }

    pub fn proposal_mut(&mut self, proposal_id: &str) -> Result<&mut Proposal> {
        let channel = self
            .locate_proposal(proposal_id)
            .cloned()
            .ok_or_else(|| Error::ProposalNotFound(proposal_id.to_string()))?;
        self.channels
            .get_mut(&channel)
            .and_then(|c| c.proposals.get_mut(proposal_id))
            .ok_or_else(|| Error::ProposalNotFound(proposal_id.to_string()))
    }

    pub fn proposals(&self) -> impl Iterator<Item = (&ChannelId, &Proposal)> {
        self.channels
            .values()
            .flat_map(|c| c.visible_proposals().map(move |p| (&c.id, p)))
    }

    pub fn create_proposal(&mut self, channel_id: &str, proposal: Proposal) -> Result<()> {
        self.require_node(&proposal.proposer)?;
        if self.channels.values().any(|c| c.proposals.contains_key(&proposal.id)) {
            return Err(Error::Duplicate(format!("proposal {}", proposal.id)));
        }
        if proposal.deadline < proposal.created_at {
            return Err(Error::InvalidInput(format!(
                "proposal {} deadline precedes creation",
                proposal.id
            )));
        }
        let channel = self.active_channel_mut(channel_id)?;
        channel.proposals.insert(proposal.id.clone(), proposal);
        Ok(())
    }

    // ----- transactions and awards -----

    /// Append a transaction to a channel's log. Returns false if it was
    /// already present.
    pub fn add_transaction(&mut self, channel_id: &str, tx: Transaction) -> Result<bool> {
        let channel = self
            .channels
            .get_mut(channel_id)
            .ok_or_else(|| Error::ChannelNotFound(channel_id.to_string()))?;
        match channel.transactions.get_mut(&tx.id) {
            Some(existing) => {
                existing.merge(&tx);
                Ok(false)
            }
            None => {
                channel.transactions.insert(tx.id.clone(), tx);
                Ok(true)
            }
        }
    }

    pub fn transactions(&self) -> impl Iterator<Item = (&ChannelId, &Transaction)> {
        self.channels
            .values()
            .flat_map(|c| c.transactions.values().map(move |t| (&c.id, t)))
    }

    pub fn add_award(&mut self, award: ReputationAward) -> bool {
        match self.awards.get_mut(&award.id) {
            Some(existing) => {
                existing.merge(&award);
                false
            }
            None => {
                self.awards.insert(award.id.clone(), award);
                true
            }
        }
    }

    // ----- ratification and execution log -----

    /// Record a ratification vote. Returns false for a duplicate.
    pub fn add_ratification(&mut self, vote: RatificationVote) -> bool {
        let votes = self.ratifications.entry(vote.proposal_id.clone()).or_default();
        match votes.get_mut(&vote.validator_id) {
            Some(existing) => {
                existing.merge(&vote);
                false
            }
            None => {
                votes.insert(vote.validator_id.clone(), vote);
                true
            }
        }
    }

    pub fn ratifications_for(&self, proposal_id: &str) -> Option<&BTreeMap<NodeId, RatificationVote>> {
        self.ratifications.get(proposal_id)
    }

    pub fn command_for_proposal(&self, proposal_id: &str) -> Option<&ExecutionCommand> {
        self.commands.get(&command_id_for(proposal_id))
    }

    /// Append a command unless one already exists for its proposal.
    pub fn add_command(&mut self, command: ExecutionCommand) -> bool {
        if self.command_for_proposal(&command.proposal_id).is_some() {
            return false;
        }
        self.commands.insert(command.command_id.clone(), command);
        true
    }

    /// The execution log in its global order.
    pub fn ordered_commands(&self) -> Vec<&ExecutionCommand> {
        let mut log: Vec<&ExecutionCommand> = self.commands.values().collect();
        log.sort_by(|a, b| a.order_key().cmp(&b.order_key()));
        log
    }

    // ----- configuration -----

    pub fn config(&self) -> NetworkConfig {
        fold_config(&self.config_records, &self.upgrades)
    }

    pub fn add_config_record(&mut self, record: ConfigRecord) -> bool {
        if self.config_records.contains_key(&record.id) {
            return false;
        }
        self.config_records.insert(record.id.clone(), record);
        true
    }

    pub fn add_upgrade(&mut self, record: UpgradeRecord) -> bool {
        if self.upgrades.contains_key(&record.version) {
            return false;
        }
        self.upgrades.insert(record.version.clone(), record);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::TaskStatus;

    pub(crate) fn genesis() -> GlobalState {
        GlobalState::genesis(&GenesisSpec {
            nodes: vec![
                GenesisNode {
                    id: "alice".into(),
                    address: "127.0.0.1:7001".into(),
                    public_key: None,
                    reputation: 20,
                    balance: 1_000,
                },
                GenesisNode {
                    id: "bob".into(),
                    address: "127.0.0.1:7002".into(),
                    public_key: None,
                    reputation: 0,
                    balance: 500,
                },
            ],
            created_at: 0,
        })
    }

    #[test]
    fn genesis_creates_general_and_allocations() {
        let state = genesis();
        let general = state.channel(GENERAL_CHANNEL).unwrap();
        assert_eq!(general.transactions.len(), 2);
        assert_eq!(state.nodes["alice"].genesis_reputation, 20);
    }

    #[test]
    fn task_lifecycle_through_state() {
        let mut state = genesis();
        state
            .create_task(GENERAL_CHANNEL, Task::new("t1", "Docs", 40, "alice", 10))
            .unwrap();
        state.claim_task("t1", "bob").unwrap();
        state.start_task("t1").unwrap();
        state.complete_task("t1").unwrap();
        assert_eq!(state.task("t1").unwrap().status, TaskStatus::Completed);
        assert!(matches!(state.start_task("t1"), Err(Error::InvalidTransition { .. })));
    }

    #[test]
    fn unknown_nodes_and_channels_are_refused() {
        let mut state = genesis();
        assert_eq!(
            state.create_task(GENERAL_CHANNEL, Task::new("t1", "x", 1, "mallory", 0)),
            Err(Error::UnknownNode("mallory".into()))
        );
        assert_eq!(
            state.create_task("nowhere", Task::new("t1", "x", 1, "alice", 0)),
            Err(Error::ChannelNotFound("nowhere".into()))
        );
    }

    #[test]
    fn merge_forwards_updates_to_relocated_task() {
        let mut state = genesis();
        state
            .create_task(GENERAL_CHANNEL, Task::new("t1", "Docs", 40, "alice", 10))
            .unwrap();
        let stale = state.clone();

        // Move t1 into `backend`.
        let mut backend = Channel::new("backend", "backend", 20);
        let task = state.task("t1").cloned().unwrap();
        backend.tasks.insert("t1".into(), task);
        state.create_channel(backend).unwrap();
        let general = state.channels.get_mut(GENERAL_CHANNEL).unwrap();
        general.relocated_tasks.insert("t1".into(), "backend".into());
        general.archive(20);

        // A replica that never saw the move claims the old copy.
        let mut lagging = stale;
        lagging.claim_task("t1", "bob").unwrap();

        state.merge(&lagging);
        assert_eq!(state.locate_task("t1").map(String::as_str), Some("backend"));
        assert_eq!(state.task("t1").unwrap().assignee.as_deref(), Some("bob"));
    }

    #[test]
    fn stale_update_reaches_every_hop_of_a_chain() {
        let mut state = genesis();
        state
            .create_task(GENERAL_CHANNEL, Task::new("t1", "Docs", 40, "alice", 10))
            .unwrap();
        let stale = state.clone();

        // general -> backend -> all, as a split followed by a merge.
        for (from, to, at) in [(GENERAL_CHANNEL, "backend", 20), ("backend", "all", 30)] {
            let task = state.task("t1").cloned().unwrap();
            let mut dest = Channel::new(to, to, at);
            dest.tasks.insert("t1".into(), task);
            state.create_channel(dest).unwrap();
            let source = state.channels.get_mut(from).unwrap();
            source.relocated_tasks.insert("t1".into(), to.into());
            source.archive(at);
        }

        let mut lagging = stale;
        lagging.claim_task("t1", "bob").unwrap();
        state.merge(&lagging);

        assert_eq!(state.locate_task("t1").map(String::as_str), Some("all"));
        for channel in ["backend", "all"] {
            let copy = &state.channels[channel].tasks["t1"];
            assert_eq!(copy.assignee.as_deref(), Some("bob"), "{}", channel);
        }
    }

    #[test]
    fn at_most_one_command_per_proposal() {
        use crate::command::{Operation, UpgradeParams};
        let mut state = genesis();
        let op = Operation::ExecuteUpgrade(UpgradeParams {
            package_ref: "p".into(),
            hash: "h".into(),
            version: "2".into(),
        });
        assert!(state.add_command(ExecutionCommand::new("p1", op.clone(), 5, vec!["alice".into()])));
        assert!(!state.add_command(ExecutionCommand::new("p1", op, 6, vec!["bob".into()])));
        assert_eq!(state.commands.len(), 1);
    }
}
