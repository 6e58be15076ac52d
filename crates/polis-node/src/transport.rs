//! TCP gossip transport.
//!
//! Messages are newline-delimited JSON frames. Each send opens a short-lived
//! connection, writes its frames and closes; the receiving side reads frames
//! until EOF and hands them to the gossip inbox in order. Peer addresses
//! come from the node records in the replicated state.

use async_trait::async_trait;
use polis_crdt::{GlobalState, NodeId};
use polis_gossip::{Error, GossipMessage, Result, Transport};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch, RwLock};
use tracing::{debug, error, info, warn};

/// Largest frame accepted from a peer.
pub const MAX_FRAME_BYTES: u64 = 64 * 1024 * 1024;

pub struct TcpTransport {
    directory: Arc<RwLock<GlobalState>>,
    connect_timeout: Duration,
}

impl TcpTransport {
    pub fn new(directory: Arc<RwLock<GlobalState>>, connect_timeout: Duration) -> Self {
        Self {
            directory,
            connect_timeout,
        }
    }

    async fn resolve(&self, peer: &NodeId) -> Result<String> {
        let state = self.directory.read().await;
        state
            .nodes
            .get(peer)
            .map(|n| n.address.clone())
            .filter(|a| !a.is_empty())
            .ok_or_else(|| Error::Unreachable(peer.clone()))
    }

    /// Write `messages` to `addr` over one connection, in order.
    pub async fn send_to(&self, addr: &str, messages: &[GossipMessage]) -> Result<()> {
        let mut stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| Error::Timeout(self.connect_timeout))?
            .map_err(|e| Error::Transport(format!("connect {}: {}", addr, e)))?;
        for message in messages {
            let mut line = message.to_line()?;
            line.push('\n');
            stream
                .write_all(line.as_bytes())
                .await
                .map_err(|e| Error::Transport(format!("write {}: {}", addr, e)))?;
        }
        stream
            .shutdown()
            .await
            .map_err(|e| Error::Transport(format!("close {}: {}", addr, e)))?;
        Ok(())
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn send(&self, peer: &NodeId, message: GossipMessage) -> Result<()> {
        let addr = self.resolve(peer).await?;
        self.send_to(&addr, std::slice::from_ref(&message)).await
    }
}

/// Accept gossip connections until shutdown, forwarding frames to `inbox`.
pub async fn serve(
    listener: TcpListener,
    inbox: mpsc::Sender<GossipMessage>,
    mut shutdown: watch::Receiver<bool>,
) {
    match listener.local_addr() {
        Ok(addr) => info!("Gossip (TCP) listening on {}", addr),
        Err(e) => warn!("Gossip listener has no local address: {}", e),
    }
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    let inbox = inbox.clone();
                    tokio::spawn(async move {
                        if let Err(e) = read_frames(stream, inbox).await {
                            warn!("Gossip connection from {} failed: {}", addr, e);
                        }
                    });
                }
                Err(e) => error!("Accept error: {}", e),
            },
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

async fn read_frames(stream: TcpStream, inbox: mpsc::Sender<GossipMessage>) -> std::io::Result<()> {
    let mut reader = BufReader::new(stream.take(MAX_FRAME_BYTES));
    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            return Ok(());
        }
        if line.trim().is_empty() {
            continue;
        }
        match GossipMessage::from_line(&line) {
            Ok(message) => {
                if inbox.send(message).await.is_err() {
                    return Ok(());
                }
            }
            Err(e) => debug!("Dropping malformed frame: {}", e),
        }
    }
}
