//! Shared per-node handles and the work each background loop performs.

use crate::error::Result;
use crate::storage::Storage;
use polis_crdt::{ExecutionCommand, GlobalState, NodeId, Timestamp};
use polis_executor::{CommandExecutor, ExecutionReport, ExecutorConfig, ExecutorCursor, UpgradeRuntime};
use polis_governance::CloseOutcome;
use polis_ledger::{LedgerCache, LedgerView};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// Upgrade runtime as held by a node.
pub type NodeRuntime = Arc<dyn UpgradeRuntime>;

/// Everything the loops, the admin socket and the gossip service share.
///
/// The executor sits behind its own mutex: it is the single writer of the
/// cursor, and commands are applied one batch at a time.
pub struct NodeContext {
    id: NodeId,
    state: Arc<RwLock<GlobalState>>,
    ledger: RwLock<LedgerCache>,
    executor: Mutex<CommandExecutor<NodeRuntime>>,
    storage: Option<Arc<Storage>>,
}

impl NodeContext {
    pub fn new(
        id: impl Into<NodeId>,
        state: GlobalState,
        runtime: NodeRuntime,
        executor_config: ExecutorConfig,
        cursor: ExecutorCursor,
        storage: Option<Arc<Storage>>,
    ) -> Self {
        Self {
            id: id.into(),
            state: Arc::new(RwLock::new(state)),
            ledger: RwLock::new(LedgerCache::new()),
            executor: Mutex::new(CommandExecutor::new(runtime, executor_config).with_cursor(cursor)),
            storage,
        }
    }

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    pub fn state(&self) -> &Arc<RwLock<GlobalState>> {
        &self.state
    }

    /// Close every proposal that is due at `now`.
    pub async fn close_due(&self, now: Timestamp) -> Vec<CloseOutcome> {
        polis_governance::close_due(&mut *self.state.write().await, now)
    }

    /// Emit commands for pending proposals that reached quorum, including
    /// through votes that arrived by gossip.
    pub async fn tally_ratifications(&self) -> Vec<ExecutionCommand> {
        let commands = polis_governance::tally_pending(&mut *self.state.write().await);
        if !commands.is_empty() {
            info!("{} proposals ratified this round", commands.len());
        }
        commands
    }

    /// Apply new commands from the log, then checkpoint.
    ///
    /// Transforms run against a snapshot with no state lock held; the write
    /// lock is taken only to install each outcome.
    pub async fn execute_pending(&self) -> Vec<ExecutionReport> {
        let mut executor = self.executor.lock().await;
        let pending = executor.pending(&*self.state.read().await);
        let mut reports = Vec::with_capacity(pending.len());
        for command in pending {
            let snapshot = self.state.read().await.clone();
            let report = match executor.adopt(&snapshot, &command) {
                Some(report) => report,
                None => {
                    let outcome = executor.run(&snapshot, &command).await;
                    executor.commit(&mut *self.state.write().await, &command, outcome)
                }
            };
            reports.push(report);
        }
        if reports.is_empty() {
            return reports;
        }
        if let Some(storage) = &self.storage {
            let state = self.state.read().await;
            if let Err(e) = storage.put_checkpoint(&state, executor.cursor()) {
                warn!("Checkpoint after execution failed: {}", e);
            }
        }
        reports
    }

    pub async fn cursor(&self) -> ExecutorCursor {
        self.executor.lock().await.cursor().clone()
    }

    /// Recompute the ledger if the transaction set changed.
    pub async fn refresh_ledger(&self) -> bool {
        let state = self.state.read().await;
        let mut ledger = self.ledger.write().await;
        let changed = ledger.refresh(&state);
        if changed {
            let view = ledger.view(&state);
            debug!(
                "Ledger recomputed: {} applied, {} skipped",
                view.applied,
                view.skipped.len()
            );
        }
        changed
    }

    /// Current ledger projection.
    pub async fn ledger(&self) -> LedgerView {
        let state = self.state.read().await;
        self.ledger.write().await.view(&state).clone()
    }

    /// Persist state and executor cursor.
    pub async fn snapshot(&self) -> Result<()> {
        let Some(storage) = &self.storage else {
            return Ok(());
        };
        let executor = self.executor.lock().await;
        let state = self.state.read().await;
        storage.put_checkpoint(&state, executor.cursor())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use polis_crdt::{
        GenesisNode, GenesisSpec, Operation, Proposal, ProposalKind, ProposalStatus, Task, UpgradeParams,
        UpgradeRecord, VoteChoice, GENERAL_CHANNEL,
    };
    use polis_executor::{ManifestSandbox, MemorySource, UpgradeRequest, VerifiedRuntime};
    use polis_governance::NewProposal;
    use std::time::Duration;
    use tokio::sync::Notify;

    fn context(storage: Option<Arc<Storage>>) -> NodeContext {
        let state = GlobalState::genesis(&GenesisSpec {
            nodes: vec![GenesisNode {
                id: "n1".into(),
                address: String::new(),
                public_key: None,
                reputation: 0,
                balance: 100,
            }],
            created_at: 0,
        });
        let runtime: NodeRuntime = Arc::new(VerifiedRuntime::new(MemorySource::new(), ManifestSandbox));
        NodeContext::new("n1", state, runtime, ExecutorConfig::default(), ExecutorCursor::default(), storage)
    }

    #[tokio::test]
    async fn closer_closes_due_proposals() {
        let ctx = context(None);
        let id = {
            let mut state = ctx.state().write().await;
            let id = polis_governance::propose(
                &mut state,
                NewProposal {
                    channel: GENERAL_CHANNEL.into(),
                    proposer: "n1".into(),
                    title: "Hello".into(),
                    description: String::new(),
                    kind: ProposalKind::Generic,
                    tags: Default::default(),
                    voting_period_ms: Some(10),
                },
                0,
            )
            .unwrap();
            polis_governance::vote(&mut state, &id, "n1", VoteChoice::Approve, 1).unwrap();
            id
        };
        // The only registered node has voted, so the proposal is due already.
        let outcomes = ctx.close_due(5).await;
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].proposal_id, id);
        assert!(ctx.close_due(50).await.is_empty());
    }

    #[tokio::test]
    async fn ledger_refreshes_only_on_change() {
        let ctx = context(None);
        assert!(ctx.refresh_ledger().await);
        assert!(!ctx.refresh_ledger().await);
        assert_eq!(ctx.ledger().await.balance("n1"), 100);
    }

    /// Upgrade runtime that parks until released.
    struct Gated {
        entered: Arc<Notify>,
        release: Arc<Notify>,
    }

    #[async_trait]
    impl UpgradeRuntime for Gated {
        async fn verify_and_run(
            &self,
            request: &UpgradeRequest,
            mut snapshot: GlobalState,
        ) -> polis_executor::Result<GlobalState> {
            self.entered.notify_one();
            self.release.notified().await;
            snapshot.add_upgrade(UpgradeRecord {
                applied_at: request.applied_at,
                version: request.version.clone(),
                package_hash: request.expected_hash.clone(),
                command_id: request.command_id.clone(),
            });
            Ok(snapshot)
        }
    }

    #[tokio::test]
    async fn state_stays_writable_while_an_upgrade_runs() {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let runtime: NodeRuntime = Arc::new(Gated {
            entered: Arc::clone(&entered),
            release: Arc::clone(&release),
        });
        let base = context(None).state().read().await.clone();
        let ctx = Arc::new(NodeContext::new(
            "n1",
            base,
            runtime,
            ExecutorConfig::default(),
            ExecutorCursor::default(),
            None,
        ));
        let op = Operation::ExecuteUpgrade(UpgradeParams {
            package_ref: "pkg".into(),
            hash: "00".into(),
            version: "2.0.0".into(),
        });
        {
            let mut state = ctx.state().write().await;
            let mut proposal = Proposal::new("p-up", "Upgrade", "n1", ProposalKind::Command(op.clone()), 0, 10);
            proposal.status = ProposalStatus::Ratified;
            state.create_proposal(GENERAL_CHANNEL, proposal).unwrap();
            state.add_command(ExecutionCommand::new("p-up", op, 20, vec!["n1".to_string()]));
        }

        let running = tokio::spawn({
            let ctx = Arc::clone(&ctx);
            async move { ctx.execute_pending().await }
        });
        entered.notified().await;

        let write = tokio::time::timeout(Duration::from_secs(1), ctx.state().write())
            .await
            .expect("state lock is free during the upgrade");
        drop(write);
        ctx.state()
            .write()
            .await
            .create_task(GENERAL_CHANNEL, Task::new("t-mid", "Meanwhile", 1, "n1", 30))
            .unwrap();

        release.notify_one();
        let reports = running.await.unwrap();
        assert_eq!(reports.len(), 1);
        assert!(reports[0].success, "{}", reports[0].result);

        let state = ctx.state().read().await;
        assert!(state.task("t-mid").is_some());
        assert_eq!(state.config().protocol_version, "2.0.0");
        assert_eq!(state.proposal("p-up").unwrap().status, ProposalStatus::Executed);
    }

    #[tokio::test]
    async fn snapshot_persists_state() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(Storage::open(dir.path()).unwrap());
        let ctx = context(Some(Arc::clone(&storage)));
        ctx.snapshot().await.unwrap();
        let stored = storage.load_state().unwrap().unwrap();
        assert_eq!(&stored, &*ctx.state().read().await);
    }
}
