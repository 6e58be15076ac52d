//! Polis Gossip
//!
//! Epidemic anti-entropy for the replicated state. Every round a node picks a
//! few random peers and runs a push-pull exchange with each: digests go out,
//! and only the entries the other side is missing come back.
//!
//! There are no acknowledgements or retries. State merge is a join, so lost,
//! duplicated or reordered messages only slow convergence down; with fanout
//! `f` a change reaches all `N` nodes in O(log N) rounds with high
//! probability.

mod error;
mod message;
mod service;
mod transport;

pub use error::{Error, Result};
pub use message::GossipMessage;
pub use service::{GossipConfig, GossipService};
pub use transport::{MemoryNetwork, MemoryTransport, Transport, INBOX_CAPACITY};
