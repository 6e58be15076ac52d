//! Unix socket server for admin commands.
//!
//! A local JSON-lines control plane for the `polis-admin` CLI. Every command
//! acts as this node: tasks are created by it, votes are cast by it, and so
//! on. Changes land in the local replica and spread by gossip.

use crate::context::NodeContext;
use crate::error::{Error, Result};
use polis_crdt::{
    derive_id, now_millis, ChannelId, NodeId, ProposalKind, Task, TaskId, VoteChoice,
    GENERAL_CHANNEL,
};
use polis_governance::{NewProposal, ValidatorSet};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::watch;

fn general() -> ChannelId {
    GENERAL_CHANNEL.to_string()
}

/// Admin command sent over the socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum AdminCommand {
    /// Health check
    Ping,
    /// Node and replica summary
    Status,
    CreateTask {
        #[serde(default = "general")]
        channel: ChannelId,
        title: String,
        #[serde(default)]
        description: String,
        reward: u64,
        #[serde(default)]
        tags: BTreeSet<String>,
    },
    OpenAuction { task_id: TaskId, duration_ms: u64 },
    PlaceBid { task_id: TaskId, amount: u64 },
    SelectBid { task_id: TaskId, bidder: NodeId },
    ClaimTask { task_id: TaskId },
    StartTask { task_id: TaskId },
    /// Complete and settle a task assigned to this node
    CompleteTask { task_id: TaskId },
    FailTask { task_id: TaskId },
    Propose {
        #[serde(default = "general")]
        channel: ChannelId,
        title: String,
        #[serde(default)]
        description: String,
        kind: ProposalKind,
        #[serde(default)]
        tags: BTreeSet<String>,
        #[serde(default)]
        voting_period_ms: Option<u64>,
    },
    Vote { proposal_id: String, choice: VoteChoice },
    Close { proposal_id: String },
    Ratify { proposal_id: String },
    /// One proposal with its live tally
    Proposal { proposal_id: String },
    /// Balance of one account, this node by default
    Balance {
        #[serde(default)]
        account: Option<NodeId>,
    },
    /// Full ledger projection
    Ledger,
    Validators,
    Commands,
    Config,
}

/// Response from admin command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AdminResponse {
    Ok { message: String },
    Error { error: String },
    List { items: Vec<String> },
    Value { value: serde_json::Value },
    Pong,
}

impl AdminResponse {
    fn ok(message: impl Into<String>) -> Self {
        AdminResponse::Ok {
            message: message.into(),
        }
    }

    fn value<T: Serialize>(value: &T) -> Self {
        match serde_json::to_value(value) {
            Ok(value) => AdminResponse::Value { value },
            Err(e) => AdminResponse::Error {
                error: e.to_string(),
            },
        }
    }
}

impl From<Error> for AdminResponse {
    fn from(e: Error) -> Self {
        AdminResponse::Error {
            error: e.to_string(),
        }
    }
}

/// Admin socket server.
pub struct AdminSocket {
    ctx: Arc<NodeContext>,
    socket_path: PathBuf,
}

impl AdminSocket {
    /// Create a new admin socket server.
    pub fn new(ctx: Arc<NodeContext>, socket_path: impl Into<PathBuf>) -> Self {
        Self {
            ctx,
            socket_path: socket_path.into(),
        }
    }

    /// Serve until `shutdown` flips to true.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        // Remove existing socket file if present
        let _ = std::fs::remove_file(&self.socket_path);

        let listener = UnixListener::bind(&self.socket_path)?;
        tracing::info!("Admin socket listening on {:?}", self.socket_path);

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        let ctx = Arc::clone(&self.ctx);
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, ctx).await {
                                tracing::error!("Admin connection error: {}", e);
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!("Failed to accept admin connection: {}", e);
                    }
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        let _ = std::fs::remove_file(&self.socket_path);
        Ok(())
    }

    /// Get the socket path.
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }
}

async fn handle_connection(stream: UnixStream, ctx: Arc<NodeContext>) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    while reader.read_line(&mut line).await? > 0 {
        let response = match serde_json::from_str::<AdminCommand>(&line) {
            Ok(cmd) => execute_command(cmd, &ctx).await,
            Err(e) => AdminResponse::Error {
                error: format!("Invalid command: {}", e),
            },
        };

        let response_json = serde_json::to_string(&response)? + "\n";
        writer.write_all(response_json.as_bytes()).await?;
        line.clear();
    }

    Ok(())
}

/// Run one admin command against the local replica.
pub async fn execute_command(cmd: AdminCommand, ctx: &NodeContext) -> AdminResponse {
    match run_command(cmd, ctx).await {
        Ok(response) => response,
        Err(e) => e.into(),
    }
}

fn require_assignee(ctx: &NodeContext, task: Option<&Task>, task_id: &str) -> Result<()> {
    let task = task.ok_or_else(|| polis_crdt::Error::TaskNotFound(task_id.to_string()))?;
    if task.assignee.as_deref() != Some(ctx.id().as_str()) {
        return Err(Error::InvalidInput(format!("task {} is not assigned to this node", task_id)));
    }
    Ok(())
}

async fn run_command(cmd: AdminCommand, ctx: &NodeContext) -> Result<AdminResponse> {
    let me = ctx.id().clone();
    let now = now_millis();
    let response = match cmd {
        AdminCommand::Ping => AdminResponse::Pong,

        AdminCommand::Status => {
            let cursor = ctx.cursor().await;
            let state = ctx.state().read().await;
            AdminResponse::value(&serde_json::json!({
                "id": me,
                "nodes": state.nodes.len(),
                "channels": state.channels.len(),
                "tasks": state.tasks().count(),
                "proposals": state.proposals().count(),
                "commands": state.commands.len(),
                "executed": cursor.last_executed_index,
                "protocol_version": state.config().protocol_version,
            }))
        }

        AdminCommand::CreateTask {
            channel,
            title,
            description,
            reward,
            tags,
        } => {
            let stamp = now.to_string();
            let id = derive_id("task", &[me.as_str(), title.as_str(), stamp.as_str()]);
            let task = Task::new(id.clone(), title, reward, me.clone(), now)
                .with_description(description)
                .with_tags(tags);
            ctx.state().write().await.create_task(&channel, task)?;
            tracing::info!("Created task {} in {}", id, channel);
            AdminResponse::ok(id)
        }

        AdminCommand::OpenAuction { task_id, duration_ms } => {
            let deadline = now.saturating_add(duration_ms);
            ctx.state().write().await.open_auction(&task_id, deadline)?;
            AdminResponse::ok(format!("auction for {} open until {}", task_id, deadline))
        }

        AdminCommand::PlaceBid { task_id, amount } => {
            ctx.state().write().await.place_bid(&task_id, &me, amount, now)?;
            AdminResponse::ok(format!("bid {} on {}", amount, task_id))
        }

        AdminCommand::SelectBid { task_id, bidder } => {
            ctx.state().write().await.select_bid(&task_id, &bidder)?;
            AdminResponse::ok(format!("{} assigned to {}", task_id, bidder))
        }

        AdminCommand::ClaimTask { task_id } => {
            ctx.state().write().await.claim_task(&task_id, &me)?;
            AdminResponse::ok(format!("claimed {}", task_id))
        }

        AdminCommand::StartTask { task_id } => {
            let mut state = ctx.state().write().await;
            require_assignee(ctx, state.task(&task_id), &task_id)?;
            state.start_task(&task_id)?;
            AdminResponse::ok(format!("started {}", task_id))
        }

        AdminCommand::CompleteTask { task_id } => {
            let mut state = ctx.state().write().await;
            require_assignee(ctx, state.task(&task_id), &task_id)?;
            let settlement = polis_ledger::complete_task(&mut state, &task_id, now)?;
            AdminResponse::value(&settlement)
        }

        AdminCommand::FailTask { task_id } => {
            let mut state = ctx.state().write().await;
            require_assignee(ctx, state.task(&task_id), &task_id)?;
            state.fail_task(&task_id)?;
            AdminResponse::ok(format!("failed {}", task_id))
        }

        AdminCommand::Propose {
            channel,
            title,
            description,
            kind,
            tags,
            voting_period_ms,
        } => {
            let new = NewProposal {
                channel,
                proposer: me,
                title,
                description,
                kind,
                tags,
                voting_period_ms,
            };
            let id = polis_governance::propose(&mut *ctx.state().write().await, new, now)?;
            AdminResponse::ok(id)
        }

        AdminCommand::Vote { proposal_id, choice } => {
            polis_governance::vote(&mut *ctx.state().write().await, &proposal_id, &me, choice, now)?;
            AdminResponse::ok(format!("voted {:?} on {}", choice, proposal_id))
        }

        AdminCommand::Close { proposal_id } => {
            let outcome = polis_governance::close(&mut *ctx.state().write().await, &proposal_id, now)?;
            AdminResponse::value(&outcome)
        }

        AdminCommand::Ratify { proposal_id } => {
            let outcome = polis_governance::ratify(&mut *ctx.state().write().await, &proposal_id, &me, now)?;
            AdminResponse::value(&outcome)
        }

        AdminCommand::Proposal { proposal_id } => {
            let state = ctx.state().read().await;
            let proposal = state
                .proposal(&proposal_id)
                .ok_or_else(|| polis_crdt::Error::ProposalNotFound(proposal_id.clone()))?;
            let tally = polis_governance::tally(&state, proposal);
            AdminResponse::value(&serde_json::json!({
                "proposal": proposal,
                "tally": tally,
            }))
        }

        AdminCommand::Balance { account } => {
            let account = account.unwrap_or(me);
            let view = ctx.ledger().await;
            AdminResponse::value(&serde_json::json!({
                "account": account,
                "balance": view.balance(&account),
            }))
        }

        AdminCommand::Ledger => AdminResponse::value(&ctx.ledger().await),

        AdminCommand::Validators => {
            let validators = ValidatorSet::compute(&*ctx.state().read().await);
            AdminResponse::List {
                items: validators.members,
            }
        }

        AdminCommand::Commands => {
            let state = ctx.state().read().await;
            AdminResponse::value(&state.ordered_commands())
        }

        AdminCommand::Config => AdminResponse::value(&ctx.state().read().await.config()),
    };
    Ok(response)
}

/// Default socket path.
pub fn default_socket_path() -> PathBuf {
    let data_dir = std::env::var("POLIS_DATA_DIR").unwrap_or_else(|_| "./polis-data".to_string());
    PathBuf::from(data_dir).join("admin.sock")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::NodeRuntime;
    use polis_crdt::{GenesisNode, GenesisSpec, GlobalState};
    use polis_executor::{ExecutorConfig, ExecutorCursor, ManifestSandbox, MemorySource, VerifiedRuntime};

    fn context() -> Arc<NodeContext> {
        let state = GlobalState::genesis(&GenesisSpec {
            nodes: ["me", "other"]
                .iter()
                .map(|id| GenesisNode {
                    id: id.to_string(),
                    address: String::new(),
                    public_key: None,
                    reputation: 0,
                    balance: 100,
                })
                .collect(),
            created_at: 0,
        });
        let runtime: NodeRuntime = Arc::new(VerifiedRuntime::new(MemorySource::new(), ManifestSandbox));
        Arc::new(NodeContext::new(
            "me",
            state,
            runtime,
            ExecutorConfig::default(),
            ExecutorCursor::default(),
            None,
        ))
    }

    fn message(response: AdminResponse) -> String {
        match response {
            AdminResponse::Ok { message } => message,
            other => panic!("expected ok, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn task_lifecycle_pays_out() {
        let ctx = context();
        let id = message(
            execute_command(
                AdminCommand::CreateTask {
                    channel: general(),
                    title: "Fix the build".into(),
                    description: String::new(),
                    reward: 40,
                    tags: BTreeSet::new(),
                },
                &ctx,
            )
            .await,
        );
        message(execute_command(AdminCommand::ClaimTask { task_id: id.clone() }, &ctx).await);
        message(execute_command(AdminCommand::StartTask { task_id: id.clone() }, &ctx).await);
        let settled = execute_command(AdminCommand::CompleteTask { task_id: id.clone() }, &ctx).await;
        assert!(matches!(settled, AdminResponse::Value { .. }), "{:?}", settled);

        // Self-payment nets out to the tax.
        let tax = polis_ledger::compute_tax(40, polis_crdt::NetworkConfig::default().tax_rate_bps);
        let balance = execute_command(AdminCommand::Balance { account: None }, &ctx).await;
        let AdminResponse::Value { value } = balance else {
            panic!("expected value");
        };
        assert_eq!(value["balance"], 100 - tax as i64);
    }

    #[tokio::test]
    async fn completing_someone_elses_task_is_refused() {
        let ctx = context();
        {
            let mut state = ctx.state().write().await;
            state
                .create_task(GENERAL_CHANNEL, Task::new("t1", "Theirs", 5, "other", 1))
                .unwrap();
            state.claim_task("t1", "other").unwrap();
        }
        let response = execute_command(AdminCommand::CompleteTask { task_id: "t1".into() }, &ctx).await;
        assert!(matches!(response, AdminResponse::Error { .. }));
    }

    #[tokio::test]
    async fn propose_and_vote() {
        let ctx = context();
        let id = message(
            execute_command(
                AdminCommand::Propose {
                    channel: general(),
                    title: "Adopt a style guide".into(),
                    description: String::new(),
                    kind: ProposalKind::Generic,
                    tags: BTreeSet::new(),
                    voting_period_ms: None,
                },
                &ctx,
            )
            .await,
        );
        message(
            execute_command(
                AdminCommand::Vote {
                    proposal_id: id.clone(),
                    choice: VoteChoice::Approve,
                },
                &ctx,
            )
            .await,
        );
        // Voting twice is refused.
        let again = execute_command(
            AdminCommand::Vote {
                proposal_id: id.clone(),
                choice: VoteChoice::Reject,
            },
            &ctx,
        )
        .await;
        assert!(matches!(again, AdminResponse::Error { .. }));

        let shown = execute_command(AdminCommand::Proposal { proposal_id: id }, &ctx).await;
        let AdminResponse::Value { value } = shown else {
            panic!("expected value");
        };
        assert_eq!(value["tally"]["voters"], 1);
    }

    #[test]
    fn commands_parse_from_json() {
        let cmd: AdminCommand =
            serde_json::from_str(r#"{"cmd":"create_task","title":"x","reward":3}"#).unwrap();
        assert_eq!(
            cmd,
            AdminCommand::CreateTask {
                channel: general(),
                title: "x".into(),
                description: String::new(),
                reward: 3,
                tags: BTreeSet::new(),
            }
        );
        let cmd: AdminCommand = serde_json::from_str(
            r#"{"cmd":"propose","title":"t","kind":{"type":"config_change","params":{"key":"tax_rate_bps","value":250}}}"#,
        )
        .unwrap();
        assert!(matches!(cmd, AdminCommand::Propose { .. }));
    }

    #[tokio::test]
    async fn socket_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("admin.sock");
        let socket = AdminSocket::new(context(), path.clone());
        let (stop, stop_rx) = watch::channel(false);
        let server = tokio::spawn(async move { socket.run(stop_rx).await });

        let mut stream = None;
        for _ in 0..50 {
            if let Ok(s) = UnixStream::connect(&path).await {
                stream = Some(s);
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        let stream = stream.expect("admin socket did not come up");
        let (reader, mut writer) = stream.into_split();
        writer.write_all(b"{\"cmd\":\"ping\"}\n").await.unwrap();
        let mut line = String::new();
        BufReader::new(reader).read_line(&mut line).await.unwrap();
        assert_eq!(serde_json::from_str::<AdminResponse>(&line).unwrap(), AdminResponse::Pong);

        stop.send(true).unwrap();
        server.await.unwrap().unwrap();
    }
}
