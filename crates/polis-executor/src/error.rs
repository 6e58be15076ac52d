//! Error types for polis-executor.

use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Why a command failed. Every variant is permanent: the command is marked
/// executed with `success = false` and never retried.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error(transparent)]
    Store(#[from] polis_crdt::Error),

    #[error("precondition failed: {0}")]
    Precondition(String),

    #[error("package hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: String, actual: String },

    #[error("package not found: {0}")]
    PackageNotFound(String),

    #[error("package read failed: {0}")]
    Io(String),

    #[error("sandbox rejected package: {0}")]
    Sandbox(String),

    #[error("upgrade timed out after {0:?}")]
    Timeout(Duration),
}
