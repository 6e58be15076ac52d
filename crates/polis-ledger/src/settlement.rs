//! Task completion payout.

use crate::error::{Error, Result};
use crate::tax::compute_tax;
use polis_crdt::{ChannelId, GlobalState, ReputationAward, Timestamp, Transaction};
use serde::{Deserialize, Serialize};
use tracing::info;

/// What completing a task appended to the state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settlement {
    pub channel: ChannelId,
    pub transaction: Transaction,
    pub award: ReputationAward,
}

/// Complete a task and pay its assignee.
///
/// The payout goes from the task creator to the assignee, taxed at the
/// current network rate into the channel treasury, and the assignee earns a
/// completion award. Both ids derive from the task id, so nodes that settle
/// the same task concurrently converge on a single payout.
pub fn complete_task(state: &mut GlobalState, task_id: &str, now: Timestamp) -> Result<Settlement> {
    let (channel, task) = match state.locate_task(task_id) {
        Some(channel) => {
            let channel = channel.clone();
            let task = state
                .task(task_id)
                .cloned()
                .ok_or_else(|| polis_crdt::Error::TaskNotFound(task_id.to_string()))?;
            (channel, task)
        }
        None => return Err(polis_crdt::Error::TaskNotFound(task_id.to_string()).into()),
    };
    let assignee = task
        .assignee
        .clone()
        .ok_or_else(|| Error::Unassigned(task_id.to_string()))?;

    state.complete_task(task_id)?;

    let tax = compute_tax(task.reward, state.config().tax_rate_bps);
    let transaction = Transaction {
        id: Transaction::settlement_id(task_id),
        from: task.creator.clone(),
        to: assignee.clone(),
        amount: task.reward,
        tax,
        timestamp: now,
        task_id: Some(task_id.to_string()),
    };
    let award = ReputationAward::task_completed(task_id, &assignee, now);

    state.add_transaction(&channel, transaction.clone())?;
    state.add_award(award.clone());
    info!(
        "task {} settled: {} SP to {} ({} tax to {})",
        task_id, task.reward, assignee, tax, channel
    );
    Ok(Settlement {
        channel,
        transaction,
        award,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::projection::project;
    use crate::reputation::reputation_of;
    use polis_crdt::{GenesisNode, GenesisSpec, Task, TaskStatus, GENERAL_CHANNEL};

    fn state() -> GlobalState {
        let mut s = GlobalState::genesis(&GenesisSpec {
            nodes: ["alice", "bob"]
                .iter()
                .map(|n| GenesisNode {
                    id: n.to_string(),
                    address: String::new(),
                    public_key: None,
                    reputation: 0,
                    balance: 1_000,
                })
                .collect(),
            created_at: 0,
        });
        s.create_task(GENERAL_CHANNEL, Task::new("t1", "Docs", 100, "alice", 1))
            .unwrap();
        s
    }

    #[test]
    fn completion_pays_assignee_and_treasury() {
        let mut s = state();
        s.claim_task("t1", "bob").unwrap();
        s.start_task("t1").unwrap();
        let settlement = complete_task(&mut s, "t1", 10).unwrap();
        assert_eq!(settlement.transaction.tax, 5);

        let view = project(&s);
        assert_eq!(view.balance("alice"), 900);
        assert_eq!(view.balance("bob"), 1_095);
        assert_eq!(view.treasury(GENERAL_CHANNEL), 5);
        assert_eq!(reputation_of(&s, "bob", None), 10);
        assert_eq!(s.task("t1").unwrap().status, TaskStatus::Completed);
    }

    #[test]
    fn concurrent_settlement_converges_to_one_payout() {
        let mut a = state();
        a.claim_task("t1", "bob").unwrap();
        a.start_task("t1").unwrap();
        let mut b = a.clone();
        complete_task(&mut a, "t1", 10).unwrap();
        complete_task(&mut b, "t1", 12).unwrap();

        a.merge(&b);
        let view = project(&a);
        assert_eq!(view.balance("bob"), 1_095);
        assert_eq!(reputation_of(&a, "bob", None), 10);
    }

    #[test]
    fn unassigned_task_cannot_settle() {
        let mut s = state();
        assert_eq!(
            complete_task(&mut s, "t1", 5),
            Err(Error::Unassigned("t1".into()))
        );
        assert_eq!(s.task("t1").unwrap().status, TaskStatus::Open);
    }
}
