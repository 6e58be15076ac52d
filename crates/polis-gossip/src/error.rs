//! Error types for polis-gossip.

use std::time::Duration;
use thiserror::Error;

/// Result type for gossip operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while exchanging state with a peer. None of them
/// are fatal to the gossip loop.
#[derive(Debug, Error)]
pub enum Error {
    /// The peer is not reachable over this transport.
    #[error("peer {0} unreachable")]
    Unreachable(String),

    /// The transport failed to deliver a message.
    #[error("transport error: {0}")]
    Transport(String),

    /// A message could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// A send did not complete in time.
    #[error("send timed out after {0:?}")]
    Timeout(Duration),
}
