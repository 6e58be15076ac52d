//! The gossip loop.

use crate::error::{Error, Result};
use crate::message::GossipMessage;
use crate::transport::Transport;
use polis_crdt::{GlobalState, MergeReport, NodeId};
use rand::seq::SliceRandom;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, RwLock};
use tracing::{debug, info, trace, warn};

#[derive(Debug, Clone)]
pub struct GossipConfig {
    /// Time between rounds.
    pub interval: Duration,
    /// Peers contacted per round.
    pub fanout: usize,
    /// Bound on a single send.
    pub peer_timeout: Duration,
}

impl Default for GossipConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            fanout: 3,
            peer_timeout: Duration::from_secs(2),
        }
    }
}

/// Push-pull anti-entropy over a shared [`GlobalState`].
///
/// Peers are the nodes registered in the state; a newcomer becomes one once
/// its node record has been merged, which the bootstrap hello delivers.
/// Each round samples up to `fanout` of them and opens an exchange by
/// sending our digest; the rest of the exchange is driven by [`handle`].
///
/// [`handle`]: GossipService::handle
pub struct GossipService<T> {
    id: NodeId,
    state: Arc<RwLock<GlobalState>>,
    transport: Arc<T>,
    config: GossipConfig,
    changes: watch::Sender<u64>,
}

impl<T: Transport> GossipService<T> {
    pub fn new(
        id: impl Into<NodeId>,
        state: Arc<RwLock<GlobalState>>,
        transport: Arc<T>,
        config: GossipConfig,
    ) -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            id: id.into(),
            state,
            transport,
            config,
            changes,
        }
    }

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    pub fn state(&self) -> &Arc<RwLock<GlobalState>> {
        &self.state
    }

    /// Bumped every time a merge changes the local state.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    /// Everyone we could gossip with.
    pub async fn peers(&self) -> Vec<NodeId> {
        self.state
            .read()
            .await
            .nodes
            .keys()
            .filter(|id| **id != self.id)
            .cloned()
            .collect()
    }

    /// One gossip round. Returns the number of peers reached.
    pub async fn tick(&self) -> usize {
        let peers = self.peers().await;
        if peers.is_empty() {
            trace!("no peers to gossip with");
            return 0;
        }
        let targets: Vec<NodeId> = {
            let mut rng = rand::thread_rng();
            peers
                .choose_multiple(&mut rng, self.config.fanout)
                .cloned()
                .collect()
        };
        let digest = self.state.read().await.digest();

        let mut reached = 0;
        for peer in targets {
            let message = GossipMessage::Digest {
                from: self.id.clone(),
                digest: digest.clone(),
            };
            match self.send(&peer, message).await {
                Ok(()) => reached += 1,
                Err(e) => warn!("gossip to {} skipped: {}", peer, e),
            }
        }
        reached
    }

    async fn send(&self, peer: &NodeId, message: GossipMessage) -> Result<()> {
        tokio::time::timeout(self.config.peer_timeout, self.transport.send(peer, message))
            .await
            .map_err(|_| Error::Timeout(self.config.peer_timeout))?
    }

    /// Join `delta` into the local state.
    pub async fn apply(&self, delta: &GlobalState) -> MergeReport {
        if delta.is_empty() {
            return MergeReport::default();
        }
        let report = self.state.write().await.merge(delta);
        if !report.is_empty() {
            self.changes.send_modify(|generation| *generation += 1);
        }
        report
    }

    /// Process one inbound message. Returns what it changed locally.
    pub async fn handle(&self, message: GossipMessage) -> Result<MergeReport> {
        let from = message.sender().clone();
        if from == self.id {
            return Ok(MergeReport::default());
        }
        match message {
            GossipMessage::Digest { digest, .. } => {
                let (ours, delta) = {
                    let state = self.state.read().await;
                    (state.digest(), state.delta_for(&digest))
                };
                let reply = GossipMessage::DigestReply {
                    from: self.id.clone(),
                    digest: ours,
                    delta,
                };
                self.send(&from, reply).await?;
                Ok(MergeReport::default())
            }
            GossipMessage::DigestReply { digest, delta, .. } => {
                let report = self.apply(&delta).await;
                let back = self.state.read().await.delta_for(&digest);
                if !back.is_empty() {
                    let message = GossipMessage::Delta {
                        from: self.id.clone(),
                        delta: back,
                    };
                    self.send(&from, message).await?;
                }
                if !report.is_empty() {
                    debug!("merged from {}: +{} ~{}", from, report.added, report.updated);
                }
                Ok(report)
            }
            GossipMessage::Delta { delta, .. } => {
                let report = self.apply(&delta).await;
                if !report.is_empty() {
                    debug!("merged from {}: +{} ~{}", from, report.added, report.updated);
                }
                Ok(report)
            }
        }
    }

    /// Run rounds on the configured interval and handle inbound messages
    /// until `shutdown` flips to true or its sender is dropped.
    pub async fn run(
        self: Arc<Self>,
        mut inbound: mpsc::Receiver<GossipMessage>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!(
            "gossip started for {} (every {:?}, fanout {})",
            self.id, self.config.interval, self.config.fanout
        );
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick().await;
                }
                received = inbound.recv() => {
                    let Some(message) = received else {
                        warn!("gossip inbox closed");
                        break;
                    };
                    let kind = message.kind();
                    if let Err(e) = self.handle(message).await {
                        warn!("gossip {} not answered: {}", kind, e);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("gossip stopped for {}", self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryNetwork;
    use polis_crdt::{GenesisNode, GenesisSpec, NodeRecord, Task, GENERAL_CHANNEL};

    fn genesis(ids: &[String]) -> GlobalState {
        GlobalState::genesis(&GenesisSpec {
            nodes: ids
                .iter()
                .map(|id| GenesisNode {
                    id: id.clone(),
                    address: String::new(),
                    public_key: None,
                    reputation: 0,
                    balance: 100,
                })
                .collect(),
            created_at: 0,
        })
    }

    struct Cluster {
        services: Vec<Arc<GossipService<crate::transport::MemoryTransport>>>,
        inboxes: Vec<mpsc::Receiver<GossipMessage>>,
    }

    impl Cluster {
        fn new(n: usize, network: &MemoryNetwork, fanout: usize) -> Self {
            let ids: Vec<String> = (0..n).map(|i| format!("n{}", i)).collect();
            let base = genesis(&ids);
            let mut services = Vec::new();
            let mut inboxes = Vec::new();
            for id in &ids {
                let (transport, rx) = network.join(id.clone());
                let config = GossipConfig {
                    fanout,
                    ..GossipConfig::default()
                };
                services.push(Arc::new(GossipService::new(
                    id.clone(),
                    Arc::new(RwLock::new(base.clone())),
                    Arc::new(transport),
                    config,
                )));
                inboxes.push(rx);
            }
            Self { services, inboxes }
        }

        /// Deliver queued messages until every inbox is empty.
        async fn drain(&mut self) {
            loop {
                let mut handled = 0;
                for (svc, rx) in self.services.iter().zip(self.inboxes.iter_mut()) {
                    while let Ok(message) = rx.try_recv() {
                        let _ = svc.handle(message).await;
                        handled += 1;
                    }
                }
                if handled == 0 {
                    break;
                }
            }
        }

        async fn round(&mut self) {
            for svc in &self.services {
                svc.tick().await;
            }
            self.drain().await;
        }

        async fn converged(&self) -> bool {
            let first = self.services[0].state.read().await.clone();
            for svc in &self.services[1..] {
                if !svc.state.read().await.same_contents(&first) {
                    return false;
                }
            }
            true
        }
    }

    #[tokio::test]
    async fn one_exchange_syncs_both_sides() {
        let network = MemoryNetwork::new();
        let mut cluster = Cluster::new(2, &network, 1);
        cluster.services[0]
            .state
            .write()
            .await
            .create_task(GENERAL_CHANNEL, Task::new("t-a", "from a", 1, "n0", 1))
            .unwrap();
        cluster.services[1]
            .state
            .write()
            .await
            .create_task(GENERAL_CHANNEL, Task::new("t-b", "from b", 1, "n1", 1))
            .unwrap();

        let changes = cluster.services[1].subscribe();
        assert_eq!(cluster.services[0].tick().await, 1);
        cluster.drain().await;

        assert!(cluster.converged().await);
        assert!(cluster.services[1].state.read().await.task("t-a").is_some());
        assert!(changes.has_changed().unwrap());
    }

    #[tokio::test]
    async fn converges_under_loss_and_duplication() {
        let network = MemoryNetwork::with_faults(0.2, 0.1, 42);
        let mut cluster = Cluster::new(10, &network, 3);
        for (i, svc) in cluster.services.iter().enumerate() {
            let mut state = svc.state.write().await;
            state
                .create_task(
                    GENERAL_CHANNEL,
                    Task::new(format!("t{}", i), "work", 5, format!("n{}", i), i as u64),
                )
                .unwrap();
        }

        let mut rounds = 0;
        while !cluster.converged().await {
            rounds += 1;
            assert!(rounds <= 60, "no convergence after {} rounds", rounds);
            cluster.round().await;
        }
        let state = cluster.services[9].state.read().await;
        assert_eq!(state.tasks().count(), 10);
    }

    #[tokio::test]
    async fn unreachable_peers_are_skipped() {
        let network = MemoryNetwork::new();
        let cluster = Cluster::new(3, &network, 2);
        network.set_down("n1", true);
        network.set_down("n2", true);
        assert_eq!(cluster.services[0].tick().await, 0);
    }

    #[tokio::test]
    async fn own_messages_are_ignored() {
        let network = MemoryNetwork::new();
        let cluster = Cluster::new(1, &network, 1);
        let svc = &cluster.services[0];
        let report = svc
            .handle(GossipMessage::Delta {
                from: "n0".into(),
                delta: GlobalState::new(),
            })
            .await
            .unwrap();
        assert!(report.is_empty());
        assert!(svc.peers().await.is_empty());
    }

    #[tokio::test]
    async fn only_registered_senders_become_peers() {
        let network = MemoryNetwork::new();
        let cluster = Cluster::new(2, &network, 1);
        let svc = &cluster.services[0];
        for i in 0..50 {
            svc.handle(GossipMessage::Delta {
                from: format!("ghost-{}", i),
                delta: GlobalState::new(),
            })
            .await
            .unwrap();
        }
        assert_eq!(svc.peers().await, vec!["n1".to_string()]);

        let mut hello = GlobalState::new();
        hello.register_node(NodeRecord::new("n9", "127.0.0.1:7009", 5));
        svc.handle(GossipMessage::Delta {
            from: "n9".into(),
            delta: hello,
        })
        .await
        .unwrap();
        assert_eq!(svc.peers().await, vec!["n1".to_string(), "n9".to_string()]);
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let network = MemoryNetwork::new();
        let mut cluster = Cluster::new(2, &network, 1);
        let svc = Arc::clone(&cluster.services[0]);
        let inbox = cluster.inboxes.remove(0);
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(svc.run(inbox, rx));
        tokio::time::sleep(Duration::from_millis(20)).await;
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
