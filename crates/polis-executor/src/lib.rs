//! Polis Executor
//!
//! Applies ratified commands from the replicated execution log. Structural
//! operations (channel split and merge) are pure functions of the state and
//! the command's ratification time; upgrades go through a verified runtime
//! that checks the package hash before anything runs.
//!
//! Nodes execute independently. Because the log order, the transforms and
//! their timestamps are all derived from replicated data, nodes that hold the
//! same log end up with the same state.

pub mod error;
pub mod executor;
pub mod operations;
pub mod upgrade;

pub use error::{Error, Result};
pub use executor::{
    CommandExecutor, ExecutionReport, ExecutorConfig, ExecutorCursor, DEFAULT_UPGRADE_TIMEOUT,
};
pub use operations::{merge_channels, split_channel};
pub use upgrade::{
    package_hash, DirectorySource, ManifestSandbox, MemorySource, PackageSource, Sandbox,
    UpgradeManifest, UpgradeRequest, UpgradeRuntime, VerifiedRuntime,
};
