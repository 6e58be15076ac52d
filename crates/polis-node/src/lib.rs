//! Polis Node - Leaderless Task and Governance Replica
//!
//! A peer-to-peer node that keeps a full replica of the network state and
//! converges with its peers by gossip. There is no leader: every node closes
//! due proposals, tallies ratifications and executes the command log on its
//! own, and deterministic rules make them all agree.
//!
//! # Architecture
//!
//! - **Context**: Shared state, ledger cache and command executor
//! - **Storage**: RocksDB checkpoint of state, executor cursor and node key
//! - **Transport**: Newline-delimited JSON gossip frames over TCP
//! - **Admin Socket**: Unix socket for local commands (polis-admin CLI)
//!
//! # Example
//!
//! ```no_run
//! use polis_node::{NodeConfig, PolisNode};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = NodeConfig::from_env()?;
//!     let node = PolisNode::new(config).await?;
//!     node.run().await?;
//!     Ok(())
//! }
//! ```

pub mod admin_socket;
pub mod config;
pub mod context;
pub mod error;
pub mod identity;
pub mod node;
pub mod storage;
pub mod transport;

pub use admin_socket::{default_socket_path, execute_command, AdminCommand, AdminResponse, AdminSocket};
pub use config::NodeConfig;
pub use context::{NodeContext, NodeRuntime};
pub use error::{Error, Result};
pub use identity::{compute_node_id, verify_node_id, NODE_ID_PREFIX};
pub use node::PolisNode;
pub use storage::Storage;
pub use transport::TcpTransport;
