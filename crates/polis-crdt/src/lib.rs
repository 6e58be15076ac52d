//! Polis Replicated State Store
//!
//! Each node keeps a full local view of the network as a join-semilattice:
//!
//! - Collections are grow-only maps keyed by globally unique ids
//! - Entities with a lifecycle merge by taking the more advanced status
//! - Balances are never stored; they are folded from the transaction log
//!
//! Merging the same or overlapping states in any order, any number of times,
//! converges to the same result.

pub mod channel;
pub mod command;
pub mod config;
pub mod digest;
pub mod error;
pub mod merge;
pub mod node;
pub mod proposal;
pub mod state;
pub mod status;
pub mod task;

pub use channel::{Channel, Transaction, GENERAL_CHANNEL, GENESIS_ACCOUNT};
pub use command::{
    command_id_for, ConflictResolution, ExecutionCommand, MergeChannelsParams, Operation,
    RatificationVote, SplitChannelParams, SplitLogic, UpgradeParams,
};
pub use config::{ConfigRecord, ConfigUpdate, NetworkConfig, UpgradeRecord, BPS_DENOMINATOR};
pub use digest::{Collection, CollectionDigest, StateDigest};
pub use error::{Error, Result};
pub use merge::{Merge, MergeReport};
pub use node::{AwardReason, NodeRecord, ReputationAward};
pub use proposal::{ExecutionResult, Outcome, Proposal, ProposalKind, Vote, VoteChoice};
pub use state::{GenesisNode, GenesisSpec, GlobalState};
pub use status::{ChannelStatus, ForwardOnly, ProposalStatus, TaskStatus};
pub use task::{Auction, Bid, Task};

pub type NodeId = String;
pub type ChannelId = String;
pub type TaskId = String;
pub type ProposalId = String;
pub type TxId = String;
pub type CommandId = String;

/// Milliseconds since the Unix epoch.
pub type Timestamp = u64;

/// Current wall-clock time in milliseconds.
pub fn now_millis() -> Timestamp {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Timestamp)
        .unwrap_or_default()
}

/// Short content-derived id: `<prefix>-<16 hex chars>`.
pub fn derive_id(prefix: &str, parts: &[&str]) -> String {
    let mut hasher = blake3::Hasher::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update(&[0]);
    }
    format!("{}-{}", prefix, &hasher.finalize().to_hex()[..16])
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const NODES: [&str; 3] = ["alice", "bob", "carol"];

    /// A local operation a replica may apply.
    #[derive(Debug, Clone)]
    enum Op {
        CreateTask(u8),
        Claim(u8, usize),
        Start(u8),
        Complete(u8),
        Fail(u8),
        Propose(u8),
        Vote(u8, usize, bool),
        Award(u8, usize),
        /// Move a task one hop along general -> moved -> final.
        Relocate(u8, usize),
        RelocateProposal(u8),
    }

    const HOPS: [(&str, &str); 2] = [(GENERAL_CHANNEL, "moved"), ("moved", "final")];

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u8..4).prop_map(Op::CreateTask),
            (0u8..4, 0usize..3).prop_map(|(t, n)| Op::Claim(t, n)),
            (0u8..4).prop_map(Op::Start),
            (0u8..4).prop_map(Op::Complete),
            (0u8..4).prop_map(Op::Fail),
            (0u8..3).prop_map(Op::Propose),
            (0u8..3, 0usize..3, any::<bool>()).prop_map(|(p, n, y)| Op::Vote(p, n, y)),
            (0u8..4, 0usize..3).prop_map(|(t, n)| Op::Award(t, n)),
            (0u8..4, 0usize..2).prop_map(|(t, h)| Op::Relocate(t, h)),
            (0u8..3).prop_map(Op::RelocateProposal),
        ]
    }

    fn base() -> GlobalState {
        GlobalState::genesis(&GenesisSpec {
            nodes: NODES
                .iter()
                .map(|n| GenesisNode {
                    id: n.to_string(),
                    address: format!("{}:7000", n),
                    public_key: None,
                    reputation: 1,
                    balance: 100,
                })
                .collect(),
            created_at: 0,
        })
    }

    // Failures are expected: replicas apply ops blindly.
    fn apply(state: &mut GlobalState, ops: &[Op]) {
        for (i, op) in ops.iter().enumerate() {
            let now = i as Timestamp + 1;
            let _ = match op {
                Op::CreateTask(t) => state.create_task(
                    GENERAL_CHANNEL,
                    Task::new(format!("t{}", t), "task", 10, "alice", 0),
                ),
                Op::Claim(t, n) => state.claim_task(&format!("t{}", t), NODES[*n]),
                Op::Start(t) => state.start_task(&format!("t{}", t)),
                Op::Complete(t) => state.complete_task(&format!("t{}", t)),
                Op::Fail(t) => state.fail_task(&format!("t{}", t)),
                Op::Propose(p) => state.create_proposal(
                    GENERAL_CHANNEL,
                    Proposal::new(format!("p{}", p), "p", "bob", ProposalKind::Generic, 0, 100),
                ),
                Op::Vote(p, n, yes) => {
                    let choice = if *yes { VoteChoice::Approve } else { VoteChoice::Reject };
                    state
                        .proposal_mut(&format!("p{}", p))
                        .and_then(|p| p.cast_vote(NODES[*n], choice, now))
                }
                Op::Award(t, n) => {
                    state.add_award(ReputationAward::task_completed(
                        &format!("t{}", t),
                        NODES[*n],
                        now,
                    ));
                    Ok(())
                }
                Op::Relocate(t, hop) => {
                    let (from, to) = HOPS[*hop];
                    relocate_task(state, &format!("t{}", t), from, to)
                }
                Op::RelocateProposal(p) => {
                    relocate_proposal(state, &format!("p{}", p), GENERAL_CHANNEL, "moved")
                }
            };
        }
    }

    fn ensure_channel(state: &mut GlobalState, id: &str) -> Result<()> {
        if state.channel(id).is_none() {
            state.create_channel(Channel::new(id, id, 0))?;
        }
        Ok(())
    }

    /// What a split or merge does to one task: a copy lands in `to` and
    /// `from` keeps the old copy behind a marker.
    fn relocate_task(state: &mut GlobalState, id: &str, from: &str, to: &str) -> Result<()> {
        let task = state
            .channel(from)
            .filter(|c| c.has_task(id))
            .and_then(|c| c.tasks.get(id))
            .cloned()
            .ok_or_else(|| Error::TaskNotFound(id.to_string()))?;
        ensure_channel(state, to)?;
        if let Some(dest) = state.channels.get_mut(to) {
            dest.tasks.entry(id.to_string()).or_insert(task);
        }
        if let Some(source) = state.channels.get_mut(from) {
            source.relocated_tasks.insert(id.to_string(), to.to_string());
        }
        Ok(())
    }

    fn relocate_proposal(state: &mut GlobalState, id: &str, from: &str, to: &str) -> Result<()> {
        let proposal = state
            .channel(from)
            .filter(|c| c.has_proposal(id))
            .and_then(|c| c.proposals.get(id))
            .cloned()
            .ok_or_else(|| Error::ProposalNotFound(id.to_string()))?;
        ensure_channel(state, to)?;
        if let Some(dest) = state.channels.get_mut(to) {
            dest.proposals.entry(id.to_string()).or_insert(proposal);
        }
        if let Some(source) = state.channels.get_mut(from) {
            source.relocated_proposals.insert(id.to_string(), to.to_string());
        }
        Ok(())
    }

    fn replica() -> impl Strategy<Value = GlobalState> {
        prop::collection::vec(op(), 0..24).prop_map(|ops| {
            let mut s = base();
            apply(&mut s, &ops);
            s
        })
    }

    fn merged(a: &GlobalState, b: &GlobalState) -> GlobalState {
        let mut out = a.clone();
        out.merge(b);
        out
    }

    proptest! {
        #[test]
        fn merge_is_commutative(a in replica(), b in replica()) {
            prop_assert_eq!(merged(&a, &b), merged(&b, &a));
        }

        #[test]
        fn merge_is_associative(a in replica(), b in replica(), c in replica()) {
            prop_assert_eq!(merged(&merged(&a, &b), &c), merged(&a, &merged(&b, &c)));
        }

        #[test]
        fn merge_is_idempotent(a in replica(), b in replica()) {
            let once = merged(&a, &b);
            prop_assert_eq!(merged(&once, &b), once.clone());
            prop_assert_eq!(merged(&a, &a), a);
        }

        #[test]
        fn delta_order_does_not_matter(s in replica(), d1 in replica(), d2 in replica()) {
            prop_assert_eq!(merged(&merged(&s, &d1), &d2), merged(&merged(&s, &d2), &d1));
        }

        #[test]
        fn status_never_regresses(a in replica(), b in replica()) {
            let m = merged(&a, &b);
            for (_, task) in m.tasks() {
                for side in [&a, &b] {
                    if let Some(before) = side.task(&task.id) {
                        prop_assert!(!before.status.is_ahead_of(&task.status));
                    }
                }
            }
        }

        #[test]
        fn relocated_copies_cover_stale_ones(a in replica(), b in replica()) {
            let m = merged(&a, &b);
            for channel in m.channels.values() {
                for (id, dest) in &channel.relocated_tasks {
                    let stale = &channel.tasks[id];
                    let moved = &m.channels[dest].tasks[id];
                    prop_assert!(!stale.status.is_ahead_of(&moved.status));
                }
            }
        }

        #[test]
        fn delta_brings_peer_to_join(a in replica(), b in replica()) {
            let mut a2 = a.clone();
            a2.merge(&b.delta_for(&a.digest()));
            prop_assert!(a2.same_contents(&merged(&a, &b)));
        }
    }

    #[test]
    fn derive_id_is_stable() {
        assert_eq!(derive_id("task", &["a", "b"]), derive_id("task", &["a", "b"]));
        assert_ne!(derive_id("task", &["ab"]), derive_id("task", &["a", "b"]));
        assert!(derive_id("task", &["x"]).starts_with("task-"));
    }
}
