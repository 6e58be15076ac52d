//! Test harness: several full node contexts wired together by an in-memory
//! gossip network, stepped by hand.

use polis_crdt::{GenesisNode, GenesisSpec, GlobalState};
use polis_executor::{ExecutorConfig, ExecutorCursor, ManifestSandbox, MemorySource, VerifiedRuntime};
use polis_gossip::{GossipConfig, GossipMessage, GossipService, MemoryNetwork, MemoryTransport};
use polis_node::{NodeContext, NodeRuntime};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Genesis for `ids`: reputation descends with position, everyone holds
/// `balance` SP.
pub fn genesis(ids: &[String], balance: u64) -> GlobalState {
    let count = ids.len() as u64;
    GlobalState::genesis(&GenesisSpec {
        nodes: ids
            .iter()
            .enumerate()
            .map(|(i, id)| GenesisNode {
                id: id.clone(),
                address: String::new(),
                public_key: None,
                reputation: 10 * (count - i as u64),
                balance,
            })
            .collect(),
        created_at: 0,
    })
}

pub fn runtime(packages: &MemorySource) -> NodeRuntime {
    Arc::new(VerifiedRuntime::new(packages.clone(), ManifestSandbox))
}

pub struct TestNode {
    pub ctx: Arc<NodeContext>,
    pub gossip: Arc<GossipService<MemoryTransport>>,
    inbox: mpsc::Receiver<GossipMessage>,
}

pub struct TestCluster {
    pub network: MemoryNetwork,
    pub nodes: Vec<TestNode>,
}

impl TestCluster {
    pub fn new(n: usize, network: MemoryNetwork) -> Self {
        Self::with_packages(n, network, MemorySource::new())
    }

    /// Nodes `n0..n{n-1}` sharing one genesis, each able to fetch `packages`.
    pub fn with_packages(n: usize, network: MemoryNetwork, packages: MemorySource) -> Self {
        let ids: Vec<String> = (0..n).map(|i| format!("n{}", i)).collect();
        let base = genesis(&ids, 1_000);
        let nodes = ids
            .iter()
            .map(|id| {
                let (transport, inbox) = network.join(id.clone());
                let ctx = Arc::new(NodeContext::new(
                    id.clone(),
                    base.clone(),
                    runtime(&packages),
                    ExecutorConfig::default(),
                    ExecutorCursor::default(),
                    None,
                ));
                let gossip = Arc::new(GossipService::new(
                    id.clone(),
                    Arc::clone(ctx.state()),
                    Arc::new(transport),
                    GossipConfig {
                        fanout: 2,
                        ..GossipConfig::default()
                    },
                ));
                TestNode { ctx, gossip, inbox }
            })
            .collect();
        Self { network, nodes }
    }

    pub fn ctx(&self, i: usize) -> &NodeContext {
        &self.nodes[i].ctx
    }

    /// Deliver queued messages until every inbox is empty.
    pub async fn drain(&mut self) {
        loop {
            let mut handled = 0;
            for node in &mut self.nodes {
                while let Ok(message) = node.inbox.try_recv() {
                    let _ = node.gossip.handle(message).await;
                    handled += 1;
                }
            }
            if handled == 0 {
                break;
            }
        }
    }

    pub async fn round(&mut self) {
        for node in &self.nodes {
            node.gossip.tick().await;
        }
        self.drain().await;
    }

    pub async fn converged(&self) -> bool {
        let first = self.nodes[0].ctx.state().read().await.clone();
        for node in &self.nodes[1..] {
            if !node.ctx.state().read().await.same_contents(&first) {
                return false;
            }
        }
        true
    }

    /// Gossip until every replica holds the same contents. Returns the
    /// number of rounds, or `None` if `max_rounds` was not enough.
    pub async fn settle(&mut self, max_rounds: usize) -> Option<usize> {
        for rounds in 0..=max_rounds {
            if self.converged().await {
                return Some(rounds);
            }
            self.round().await;
        }
        None
    }
}
