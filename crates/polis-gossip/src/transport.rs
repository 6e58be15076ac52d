//! Transport seam and an in-memory network for tests and simulations.

use crate::error::{Error, Result};
use crate::message::GossipMessage;
use async_trait::async_trait;
use polis_crdt::NodeId;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::trace;

/// Capacity of a node's inbound gossip queue.
pub const INBOX_CAPACITY: usize = 1024;

/// Fire-and-forget delivery of gossip messages.
///
/// Delivery is best effort. `Ok(())` means the message left this node, not
/// that the peer received it; inbound messages arrive on the receiver handed
/// to [`crate::GossipService::run`].
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, peer: &NodeId, message: GossipMessage) -> Result<()>;
}

struct NetworkInner {
    inboxes: HashMap<NodeId, mpsc::Sender<GossipMessage>>,
    down: BTreeSet<NodeId>,
    loss: f64,
    duplication: f64,
    rng: StdRng,
}

/// Simulated network joining any number of in-process nodes.
///
/// Optionally drops and duplicates messages at fixed rates from a seeded
/// RNG, and can take nodes down to model partitions.
#[derive(Clone)]
pub struct MemoryNetwork {
    inner: Arc<Mutex<NetworkInner>>,
}

impl Default for MemoryNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryNetwork {
    /// A perfect network.
    pub fn new() -> Self {
        Self::with_faults(0.0, 0.0, 0)
    }

    /// A network that drops each message with probability `loss` and
    /// delivers it twice with probability `duplication`.
    pub fn with_faults(loss: f64, duplication: f64, seed: u64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(NetworkInner {
                inboxes: HashMap::new(),
                down: BTreeSet::new(),
                loss: loss.clamp(0.0, 1.0),
                duplication: duplication.clamp(0.0, 1.0),
                rng: StdRng::seed_from_u64(seed),
            })),
        }
    }

    /// Attach a node. Returns its transport and inbound queue.
    pub fn join(&self, id: impl Into<NodeId>) -> (MemoryTransport, mpsc::Receiver<GossipMessage>) {
        let id = id.into();
        let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
        if let Ok(mut inner) = self.inner.lock() {
            inner.inboxes.insert(id.clone(), tx);
        }
        (
            MemoryTransport {
                id,
                network: self.clone(),
            },
            rx,
        )
    }

    /// Take a node off the network (`true`) or bring it back (`false`).
    pub fn set_down(&self, id: &str, down: bool) {
        if let Ok(mut inner) = self.inner.lock() {
            if down {
                inner.down.insert(id.to_string());
            } else {
                inner.down.remove(id);
            }
        }
    }

    fn deliver(&self, from: &str, to: &str, message: GossipMessage) -> Result<()> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| Error::Transport("network lock poisoned".into()))?;
        if inner.down.contains(to) || inner.down.contains(from) {
            return Err(Error::Unreachable(to.to_string()));
        }
        let inbox = inner
            .inboxes
            .get(to)
            .cloned()
            .ok_or_else(|| Error::Unreachable(to.to_string()))?;

        let loss = inner.loss;
        let duplication = inner.duplication;
        if loss > 0.0 && inner.rng.gen_bool(loss) {
            trace!("dropped {} {} -> {}", message.kind(), from, to);
            return Ok(());
        }
        let copies = if duplication > 0.0 && inner.rng.gen_bool(duplication) {
            2
        } else {
            1
        };
        for _ in 0..copies {
            // A full inbox behaves like loss.
            let _ = inbox.try_send(message.clone());
        }
        Ok(())
    }
}

/// One node's handle on a [`MemoryNetwork`].
#[derive(Clone)]
pub struct MemoryTransport {
    id: NodeId,
    network: MemoryNetwork,
}

impl MemoryTransport {
    pub fn id(&self) -> &NodeId {
        &self.id
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&self, peer: &NodeId, message: GossipMessage) -> Result<()> {
        self.network.deliver(&self.id, peer, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polis_crdt::StateDigest;

    fn digest_from(from: &str) -> GossipMessage {
        GossipMessage::Digest {
            from: from.into(),
            digest: StateDigest::default(),
        }
    }

    #[tokio::test]
    async fn delivers_to_registered_nodes() {
        let net = MemoryNetwork::new();
        let (a, _rx_a) = net.join("a");
        let (_b, mut rx_b) = net.join("b");

        a.send(&"b".to_string(), digest_from("a")).await.unwrap();
        assert_eq!(rx_b.recv().await.unwrap().sender(), "a");
        assert!(matches!(
            a.send(&"nobody".to_string(), digest_from("a")).await,
            Err(Error::Unreachable(_))
        ));
    }

    #[tokio::test]
    async fn down_nodes_are_unreachable() {
        let net = MemoryNetwork::new();
        let (a, _rx_a) = net.join("a");
        let (_b, mut rx_b) = net.join("b");
        net.set_down("b", true);
        assert!(a.send(&"b".to_string(), digest_from("a")).await.is_err());
        net.set_down("b", false);
        a.send(&"b".to_string(), digest_from("a")).await.unwrap();
        assert!(rx_b.try_recv().is_ok());
    }

    #[tokio::test]
    async fn total_loss_drops_silently() {
        let net = MemoryNetwork::with_faults(1.0, 0.0, 7);
        let (a, _rx_a) = net.join("a");
        let (_b, mut rx_b) = net.join("b");
        a.send(&"b".to_string(), digest_from("a")).await.unwrap();
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn duplication_delivers_twice() {
        let net = MemoryNetwork::with_faults(0.0, 1.0, 7);
        let (a, _rx_a) = net.join("a");
        let (_b, mut rx_b) = net.join("b");
        a.send(&"b".to_string(), digest_from("a")).await.unwrap();
        assert!(rx_b.try_recv().is_ok());
        assert!(rx_b.try_recv().is_ok());
    }
}
