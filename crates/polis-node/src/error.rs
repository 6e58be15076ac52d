//! Error types for the Polis node.

use thiserror::Error;

/// Result type for node operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in node operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Storage error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("Config error: {0}")]
    Config(String),

    /// Network error
    #[error("Network error: {0}")]
    Network(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Rejected by the replicated store
    #[error(transparent)]
    State(#[from] polis_crdt::Error),

    /// Rejected by governance
    #[error(transparent)]
    Governance(#[from] polis_governance::Error),

    /// Rejected by the ledger
    #[error(transparent)]
    Ledger(#[from] polis_ledger::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rocksdb::Error> for Error {
    fn from(e: rocksdb::Error) -> Self {
        Error::Storage(e.to_string())
    }
}

impl From<polis_gossip::Error> for Error {
    fn from(e: polis_gossip::Error) -> Self {
        Error::Network(e.to_string())
    }
}
