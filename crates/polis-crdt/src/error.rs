//! Error types for polis-crdt.

use thiserror::Error;

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by local store operations.
///
/// Merges never fail; only operations invoked on behalf of a local caller can
/// be refused.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("channel not found: {0}")]
    ChannelNotFound(String),

    #[error("channel {0} is archived")]
    ChannelArchived(String),

    #[error("task not found: {0}")]
    TaskNotFound(String),

    #[error("proposal not found: {0}")]
    ProposalNotFound(String),

    #[error("node not registered: {0}")]
    UnknownNode(String),

    #[error("invalid transition for {entity}: {from} -> {to}")]
    InvalidTransition {
        entity: String,
        from: String,
        to: String,
    },

    #[error("auction for task {task} rejected bid: {reason}")]
    BidRejected { task: String, reason: String },

    #[error("duplicate id: {0}")]
    Duplicate(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}
