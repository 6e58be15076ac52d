//! The command executor.
//!
//! Walks the execution log in `(ratified_at, command_id)` order and applies
//! every command this node has not applied yet. Each command runs exactly
//! once per node: its id goes into the cursor whether the transform
//! succeeded or failed, and failures are never retried.

use crate::error::{Error, Result};
use crate::operations::{merge_channels, split_channel};
use crate::upgrade::{UpgradeRequest, UpgradeRuntime};
use polis_crdt::{CommandId, ExecutionCommand, GlobalState, Merge, Operation};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const DEFAULT_UPGRADE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Bound on a single call into the upgrade runtime.
    pub upgrade_timeout: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            upgrade_timeout: DEFAULT_UPGRADE_TIMEOUT,
        }
    }
}

/// Per-node execution progress. Persisted so a restart never re-runs a
/// command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutorCursor {
    /// Number of log entries this node has applied.
    pub last_executed_index: usize,
    pub executed: BTreeSet<CommandId>,
}

impl ExecutorCursor {
    pub fn has_executed(&self, command_id: &str) -> bool {
        self.executed.contains(command_id)
    }

    fn advance(&mut self, command_id: &str) {
        if self.executed.insert(command_id.to_string()) {
            self.last_executed_index += 1;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub command_id: CommandId,
    pub proposal_id: String,
    pub operation: String,
    pub success: bool,
    pub result: String,
}

pub struct CommandExecutor<R> {
    runtime: R,
    config: ExecutorConfig,
    cursor: ExecutorCursor,
}

impl<R: UpgradeRuntime> CommandExecutor<R> {
    pub fn new(runtime: R, config: ExecutorConfig) -> Self {
        Self {
            runtime,
            config,
            cursor: ExecutorCursor::default(),
        }
    }

    /// Resume from a persisted cursor.
    pub fn with_cursor(mut self, cursor: ExecutorCursor) -> Self {
        self.cursor = cursor;
        self
    }

    pub fn cursor(&self) -> &ExecutorCursor {
        &self.cursor
    }

    /// Commands in the log this node has not applied, in log order.
    pub fn pending(&self, state: &GlobalState) -> Vec<ExecutionCommand> {
        state
            .ordered_commands()
            .into_iter()
            .filter(|c| !self.cursor.has_executed(&c.command_id))
            .cloned()
            .collect()
    }

    /// Apply every pending command in order.
    pub async fn execute_pending(&mut self, state: &mut GlobalState) -> Vec<ExecutionReport> {
        let mut reports = Vec::new();
        for command in self.pending(state) {
            reports.push(self.execute(state, &command).await);
        }
        reports
    }

    /// Apply one command and record its outcome.
    ///
    /// On failure `state` keeps its prior contents apart from the outcome
    /// bookkeeping on the command and its proposal.
    ///
    /// A command whose replicated entry already carries an outcome was run
    /// by another replica and its effects are already merged; that outcome
    /// is adopted as is.
    pub async fn execute(&mut self, state: &mut GlobalState, command: &ExecutionCommand) -> ExecutionReport {
        if let Some(report) = self.adopt(state, command) {
            return report;
        }
        let outcome = self.run(state, command).await;
        self.commit(state, command, outcome)
    }

    /// Take over an outcome another replica already recorded for `command`.
    pub fn adopt(&mut self, state: &GlobalState, command: &ExecutionCommand) -> Option<ExecutionReport> {
        let (success, result) = recorded_outcome(state, &command.command_id)?;
        debug!(
            "command {} already executed elsewhere (success: {}), adopting outcome",
            command.command_id, success
        );
        self.cursor.advance(&command.command_id);
        Some(report(command, success, result))
    }

    /// Run the transform of `command` against `snapshot` without touching
    /// any shared state. Pair with [`CommandExecutor::commit`].
    pub async fn run(&self, snapshot: &GlobalState, command: &ExecutionCommand) -> Result<(GlobalState, String)> {
        self.transform(snapshot, command).await
    }

    /// Install the outcome of [`CommandExecutor::run`] into `state`.
    ///
    /// `state` may have moved on since the snapshot was taken. The
    /// transformed snapshot is joined in rather than swapped in, so updates
    /// that arrived meanwhile survive and stale copies of relocated entities
    /// are forwarded by the merge. If another replica's outcome arrived in
    /// the meantime it wins and `outcome` is discarded.
    pub fn commit(
        &mut self,
        state: &mut GlobalState,
        command: &ExecutionCommand,
        outcome: Result<(GlobalState, String)>,
    ) -> ExecutionReport {
        if let Some(report) = self.adopt(state, command) {
            return report;
        }
        let (success, result) = match outcome {
            Ok((next, summary)) => {
                state.merge(&next);
                info!("command {} ({}) executed: {}", command.command_id, command.operation.name(), summary);
                (true, summary)
            }
            Err(e) => {
                warn!("command {} ({}) failed: {}", command.command_id, command.operation.name(), e);
                (false, e.to_string())
            }
        };

        self.record(state, command, success, &result);
        self.cursor.advance(&command.command_id);
        report(command, success, result)
    }

    fn record(&self, state: &mut GlobalState, command: &ExecutionCommand, success: bool, result: &str) {
        let mut recorded = command.clone();
        recorded.record_outcome(success, result);
        match state.commands.get_mut(&recorded.command_id) {
            Some(existing) => {
                existing.merge(&recorded);
            }
            None => {
                state.commands.insert(recorded.command_id.clone(), recorded.clone());
            }
        }
        if let Err(e) = polis_governance::record_execution(state, &recorded) {
            warn!(
                "could not record outcome on proposal {}: {}",
                recorded.proposal_id, e
            );
        }
    }
}

fn recorded_outcome(state: &GlobalState, command_id: &str) -> Option<(bool, String)> {
    let recorded = state.commands.get(command_id).filter(|c| c.executed)?;
    Some((recorded.success?, recorded.result.clone().unwrap_or_default()))
}

fn report(command: &ExecutionCommand, success: bool, result: String) -> ExecutionReport {
    ExecutionReport {
        command_id: command.command_id.clone(),
        proposal_id: command.proposal_id.clone(),
        operation: command.operation.name().to_string(),
        success,
        result,
    }
}
