//! Error types for polis-governance.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error(transparent)]
    Store(#[from] polis_crdt::Error),

    #[error("proposal {proposal} cannot close yet: {reason}")]
    NotClosable { proposal: String, reason: String },

    #[error("{node} is not in the validator set")]
    NotValidator { node: String },

    #[error("proposal {proposal} is {status}, not pending ratification")]
    NotPending { proposal: String, status: String },

    #[error("invalid proposal: {0}")]
    InvalidProposal(String),
}
