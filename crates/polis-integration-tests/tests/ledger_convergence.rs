//! The ledger is a pure function of the transaction set: replicas that
//! settle work independently agree on every balance once their states meet,
//! whatever order the deltas arrive in.

use polis_crdt::{GlobalState, Task, GENERAL_CHANNEL, GENESIS_ACCOUNT};
use polis_gossip::MemoryNetwork;
use polis_integration_tests::{genesis, TestCluster};
use proptest::prelude::*;

const NODES: [&str; 3] = ["alice", "bob", "carol"];

/// (creator, assignee, reward) for one settled task.
type Job = (usize, usize, u64);

/// One replica's independent history, as a state grown from `base`.
fn settle_jobs(base: &GlobalState, replica: usize, jobs: &[Job]) -> GlobalState {
    let mut state = base.clone();
    for (j, (creator, assignee, reward)) in jobs.iter().enumerate() {
        let id = format!("r{}-t{}", replica, j);
        let now = j as u64 + 1;
        state
            .create_task(GENERAL_CHANNEL, Task::new(id.clone(), "job", *reward, NODES[*creator], now))
            .unwrap();
        state.claim_task(&id, NODES[*assignee]).unwrap();
        state.start_task(&id).unwrap();
        polis_ledger::complete_task(&mut state, &id, now).unwrap();
    }
    state
}

fn job() -> impl Strategy<Value = Job> {
    (0usize..3, 0usize..3, 0u64..150)
}

fn replicas() -> impl Strategy<Value = Vec<Vec<Job>>> {
    prop::collection::vec(prop::collection::vec(job(), 0..6), 1..5)
}

proptest! {
    #[test]
    fn delivery_order_does_not_change_balances(
        (histories, order) in replicas().prop_flat_map(|h| {
            let n = h.len();
            (Just(h), Just((0..n).collect::<Vec<_>>()).prop_shuffle())
        })
    ) {
        let ids: Vec<String> = NODES.iter().map(|n| n.to_string()).collect();
        let base = genesis(&ids, 100);
        let deltas: Vec<GlobalState> = histories
            .iter()
            .enumerate()
            .map(|(i, jobs)| settle_jobs(&base, i, jobs))
            .collect();

        let mut in_order = base.clone();
        for delta in &deltas {
            in_order.merge(delta);
        }
        let mut shuffled = base.clone();
        for &i in &order {
            shuffled.merge(&deltas[i]);
        }

        let expected = polis_ledger::project(&in_order);
        prop_assert_eq!(&polis_ledger::project(&shuffled), &expected);
        prop_assert_eq!(expected.net_supply(), 0);
        for (account, balance) in &expected.balances {
            if account != GENESIS_ACCOUNT {
                prop_assert!(*balance >= 0, "{} went negative", account);
            }
        }
    }
}

#[tokio::test]
async fn gossiped_settlements_give_identical_ledgers() {
    let mut cluster = TestCluster::new(3, MemoryNetwork::with_faults(0.2, 0.2, 11));
    for i in 0..3 {
        let me = format!("n{}", i);
        let peer = format!("n{}", (i + 1) % 3);
        let id = format!("task-{}", i);
        let mut state = cluster.ctx(i).state().write().await;
        state
            .create_task(GENERAL_CHANNEL, Task::new(id.clone(), "pair up", 200, me, 10 + i as u64))
            .unwrap();
        state.claim_task(&id, &peer).unwrap();
        state.start_task(&id).unwrap();
        polis_ledger::complete_task(&mut state, &id, 20 + i as u64).unwrap();
    }
    cluster.settle(60).await.expect("settlements spread");

    let mut views = Vec::new();
    for node in &cluster.nodes {
        node.ctx.refresh_ledger().await;
        views.push(node.ctx.ledger().await);
    }
    assert!(views.windows(2).all(|w| w[0] == w[1]));

    let view = &views[0];
    let tax = polis_ledger::compute_tax(200, polis_crdt::NetworkConfig::default().tax_rate_bps);
    // Each node paid 200 and received 200 - tax.
    for i in 0..3 {
        assert_eq!(view.balance(&format!("n{}", i)), 1_000 - tax as i64);
    }
    assert_eq!(view.treasury(GENERAL_CHANNEL), 3 * tax);
    assert_eq!(view.net_supply(), 0);
}
