//! Polis Node - the main application entry point.
//!
//! Architecture:
//! - Single daemon process with a RocksDB checkpoint of state and cursor
//! - Gossip over TCP between nodes
//! - Independent loops: gossip, proposal closer, ratification tally,
//!   command executor, ledger recompute, snapshot
//! - Unix admin socket for local operations (polis-admin CLI)

use crate::admin_socket::AdminSocket;
use crate::config::NodeConfig;
use crate::context::{NodeContext, NodeRuntime};
use crate::error::{Error, Result};
use crate::identity::compute_node_id;
use crate::storage::Storage;
use crate::transport::{self, TcpTransport};
use polis_crdt::{now_millis, GenesisSpec, GlobalState, NodeRecord};
use polis_executor::{DirectorySource, ExecutorConfig, ManifestSandbox, VerifiedRuntime};
use polis_gossip::{GossipMessage, GossipService, INBOX_CAPACITY};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Run `tick` every `period` until shutdown.
pub fn spawn_loop<F, Fut>(
    name: &'static str,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
    mut tick: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        info!("{} loop started (every {:?})", name, period);
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => tick().await,
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("{} loop stopped", name);
    })
}

/// Load the genesis description, or start a network of one.
fn load_genesis(config: &NodeConfig, id: &str) -> Result<GenesisSpec> {
    match &config.genesis_file {
        Some(path) => {
            let raw = std::fs::read(path)
                .map_err(|e| Error::Config(format!("genesis file {:?}: {}", path, e)))?;
            Ok(serde_json::from_slice(&raw)?)
        }
        None => Ok(GenesisSpec {
            nodes: vec![polis_crdt::GenesisNode {
                id: id.to_string(),
                address: config.advertise_addr.clone(),
                public_key: None,
                reputation: 0,
                balance: 0,
            }],
            created_at: 0,
        }),
    }
}

/// A Polis node instance.
pub struct PolisNode {
    config: NodeConfig,
    ctx: Arc<NodeContext>,
    own_record: NodeRecord,
}

impl PolisNode {
    /// Open storage, restore or create state, and register this node.
    pub async fn new(config: NodeConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;
        let storage = Arc::new(Storage::open(&config.data_dir)?);

        let signing_key = storage.get_or_create_node_key()?;
        let verifying_key = signing_key.verifying_key();
        let id = compute_node_id(&verifying_key);

        let mut state = match storage.load_state()? {
            Some(state) => {
                info!("Restored state snapshot ({} nodes)", state.nodes.len());
                state
            }
            None => GlobalState::genesis(&load_genesis(&config, &id)?),
        };
        let own_record = NodeRecord::new(id.clone(), config.advertise_addr.clone(), now_millis())
            .with_public_key(hex::encode(verifying_key.as_bytes()));
        state.register_node(own_record.clone());

        let cursor = storage.load_cursor()?;
        if cursor.last_executed_index > 0 {
            info!("Executor resumes after {} commands", cursor.last_executed_index);
        }

        let runtime: NodeRuntime = Arc::new(VerifiedRuntime::new(
            DirectorySource::new(config.package_dir.clone()),
            ManifestSandbox,
        ));
        let ctx = Arc::new(NodeContext::new(
            id,
            state,
            runtime,
            ExecutorConfig {
                upgrade_timeout: config.upgrade_timeout,
            },
            cursor,
            Some(storage),
        ));
        Ok(Self {
            config,
            ctx,
            own_record,
        })
    }

    pub fn id(&self) -> &str {
        self.ctx.id()
    }

    pub fn context(&self) -> Arc<NodeContext> {
        Arc::clone(&self.ctx)
    }

    /// Introduce ourselves to the bootstrap peers and open an exchange.
    async fn bootstrap(&self, transport: &TcpTransport) {
        let mut hello = GlobalState::new();
        hello.register_node(self.own_record.clone());
        let digest = self.ctx.state().read().await.digest();
        let messages = [
            GossipMessage::Delta {
                from: self.ctx.id().clone(),
                delta: hello,
            },
            GossipMessage::Digest {
                from: self.ctx.id().clone(),
                digest,
            },
        ];
        for peer in &self.config.bootstrap_peers {
            match transport.send_to(peer, &messages).await {
                Ok(()) => info!("Contacted bootstrap peer {}", peer),
                Err(e) => warn!("Bootstrap peer {} unreachable: {}", peer, e),
            }
        }
    }

    /// Run until ctrl-c.
    pub async fn run(self) -> Result<()> {
        info!("Polis node {} starting", self.ctx.id());
        info!("  P2P: {}", self.config.p2p_addr);
        info!("  Admin: {:?}", self.config.admin_socket);
        info!("  Data: {:?}", self.config.data_dir);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut handles = Vec::new();

        let listener = TcpListener::bind(self.config.p2p_addr).await?;
        let (inbox_tx, inbox_rx) = mpsc::channel(INBOX_CAPACITY);
        handles.push(tokio::spawn(transport::serve(listener, inbox_tx, shutdown_rx.clone())));

        let tcp = Arc::new(TcpTransport::new(
            Arc::clone(self.ctx.state()),
            self.config.gossip.peer_timeout,
        ));
        let gossip = Arc::new(GossipService::new(
            self.ctx.id().clone(),
            Arc::clone(self.ctx.state()),
            Arc::clone(&tcp),
            self.config.gossip.clone(),
        ));
        handles.push(tokio::spawn(Arc::clone(&gossip).run(inbox_rx, shutdown_rx.clone())));
        self.bootstrap(&tcp).await;

        let ctx = Arc::clone(&self.ctx);
        handles.push(spawn_loop("closer", self.config.close_interval, shutdown_rx.clone(), move || {
            let ctx = Arc::clone(&ctx);
            async move {
                ctx.close_due(now_millis()).await;
            }
        }));

        let ctx = Arc::clone(&self.ctx);
        handles.push(spawn_loop("ratifier", self.config.ratify_interval, shutdown_rx.clone(), move || {
            let ctx = Arc::clone(&ctx);
            async move {
                ctx.tally_ratifications().await;
            }
        }));

        let ctx = Arc::clone(&self.ctx);
        handles.push(spawn_loop("executor", self.config.execute_interval, shutdown_rx.clone(), move || {
            let ctx = Arc::clone(&ctx);
            async move {
                ctx.execute_pending().await;
            }
        }));

        let ctx = Arc::clone(&self.ctx);
        handles.push(spawn_loop("ledger", self.config.ledger_interval, shutdown_rx.clone(), move || {
            let ctx = Arc::clone(&ctx);
            async move {
                ctx.refresh_ledger().await;
            }
        }));

        let ctx = Arc::clone(&self.ctx);
        handles.push(spawn_loop("snapshot", self.config.snapshot_interval, shutdown_rx.clone(), move || {
            let ctx = Arc::clone(&ctx);
            async move {
                if let Err(e) = ctx.snapshot().await {
                    warn!("Snapshot failed: {}", e);
                }
            }
        }));

        let admin = AdminSocket::new(Arc::clone(&self.ctx), self.config.admin_socket.clone());
        let admin_shutdown = shutdown_rx.clone();
        handles.push(tokio::spawn(async move {
            if let Err(e) = admin.run(admin_shutdown).await {
                tracing::error!("Admin socket error: {}", e);
            }
        }));

        tokio::signal::ctrl_c().await?;
        info!("Shutting down");
        let _ = shutdown_tx.send(true);
        for handle in handles {
            if let Err(e) = handle.await {
                warn!("Task ended abnormally: {}", e);
            }
        }
        self.ctx.snapshot().await?;
        info!("Polis node {} stopped", self.ctx.id());
        Ok(())
    }
}
