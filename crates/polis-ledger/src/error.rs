//! Error types for polis-ledger.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error(transparent)]
    Store(#[from] polis_crdt::Error),

    #[error("task {0} has no assignee to pay")]
    Unassigned(String),
}
