//! polis-admin CLI tool
//!
//! Drives a running polis-node over its admin socket.
//!
//! Usage:
//!   polis-admin ping
//!   polis-admin create-task <title> <reward> [tag...]
//!   polis-admin claim <task_id>
//!   polis-admin propose <title> [kind_json]
//!   polis-admin vote <proposal_id> <approve|reject|abstain>
//!   polis-admin balance [account]

use polis_node::{AdminCommand, AdminResponse};
use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;

fn print_usage() {
    eprintln!("polis-admin - Operate a local Polis node");
    eprintln!();
    eprintln!("Usage:");
    eprintln!("  polis-admin ping                              Check if daemon is running");
    eprintln!("  polis-admin status                            Node and replica summary");
    eprintln!("  polis-admin create-task <title> <reward> [tag...]");
    eprintln!("  polis-admin open-auction <task_id> <duration_ms>");
    eprintln!("  polis-admin bid <task_id> <amount>            Bid on an auctioned task");
    eprintln!("  polis-admin select-bid <task_id> <bidder>     Assign an auctioned task");
    eprintln!("  polis-admin claim <task_id>                   Claim an open task");
    eprintln!("  polis-admin start <task_id>");
    eprintln!("  polis-admin complete <task_id>                Complete and settle");
    eprintln!("  polis-admin fail <task_id>");
    eprintln!("  polis-admin propose <title> [kind_json]       Defaults to a generic proposal");
    eprintln!("  polis-admin vote <proposal_id> <approve|reject|abstain>");
    eprintln!("  polis-admin close <proposal_id>");
    eprintln!("  polis-admin ratify <proposal_id>");
    eprintln!("  polis-admin proposal <proposal_id>");
    eprintln!("  polis-admin balance [account]");
    eprintln!("  polis-admin ledger | validators | commands | config");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  POLIS_SOCKET  Path to admin socket (default: ./polis-data/admin.sock)");
}

fn get_socket_path() -> PathBuf {
    std::env::var("POLIS_SOCKET")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("./polis-data/admin.sock"))
}

fn send_command(cmd: &AdminCommand) -> Result<AdminResponse, String> {
    let socket_path = get_socket_path();

    let mut stream = UnixStream::connect(&socket_path).map_err(|e| {
        format!(
            "Failed to connect to polis-node at {:?}: {}\n\
             Is the polis-node running?",
            socket_path, e
        )
    })?;

    let cmd_json = serde_json::to_string(cmd).map_err(|e| e.to_string())?;
    writeln!(stream, "{}", cmd_json).map_err(|e| e.to_string())?;

    let mut reader = BufReader::new(&stream);
    let mut response_line = String::new();
    reader
        .read_line(&mut response_line)
        .map_err(|e| e.to_string())?;

    serde_json::from_str(&response_line).map_err(|e| format!("Invalid response: {}", e))
}

/// The `n`th argument, or exit with a usage error.
fn arg(args: &[String], n: usize, what: &str) -> String {
    match args.get(n) {
        Some(value) => value.clone(),
        None => {
            eprintln!("Error: {} requires a {} argument", args[1], what);
            std::process::exit(1);
        }
    }
}

fn number(args: &[String], n: usize, what: &str) -> u64 {
    let raw = arg(args, n, what);
    raw.parse().unwrap_or_else(|_| {
        eprintln!("Error: {} must be a non-negative integer, got {:?}", what, raw);
        std::process::exit(1);
    })
}

fn json<T: serde::de::DeserializeOwned>(raw: &str, what: &str) -> T {
    serde_json::from_str(raw).unwrap_or_else(|e| {
        eprintln!("Error: invalid {}: {}", what, e);
        std::process::exit(1);
    })
}

fn parse_command(args: &[String]) -> AdminCommand {
    match args[1].as_str() {
        "ping" => AdminCommand::Ping,
        "status" => AdminCommand::Status,
        "create-task" => AdminCommand::CreateTask {
            channel: polis_crdt::GENERAL_CHANNEL.to_string(),
            title: arg(args, 2, "title"),
            description: String::new(),
            reward: number(args, 3, "reward"),
            tags: args.iter().skip(4).cloned().collect(),
        },
        "open-auction" => AdminCommand::OpenAuction {
            task_id: arg(args, 2, "task_id"),
            duration_ms: number(args, 3, "duration_ms"),
        },
        "bid" => AdminCommand::PlaceBid {
            task_id: arg(args, 2, "task_id"),
            amount: number(args, 3, "amount"),
        },
        "select-bid" => AdminCommand::SelectBid {
            task_id: arg(args, 2, "task_id"),
            bidder: arg(args, 3, "bidder"),
        },
        "claim" => AdminCommand::ClaimTask {
            task_id: arg(args, 2, "task_id"),
        },
        "start" => AdminCommand::StartTask {
            task_id: arg(args, 2, "task_id"),
        },
        "complete" => AdminCommand::CompleteTask {
            task_id: arg(args, 2, "task_id"),
        },
        "fail" => AdminCommand::FailTask {
            task_id: arg(args, 2, "task_id"),
        },
        "propose" => AdminCommand::Propose {
            channel: polis_crdt::GENERAL_CHANNEL.to_string(),
            title: arg(args, 2, "title"),
            description: String::new(),
            kind: match args.get(3) {
                Some(raw) => json(raw, "proposal kind"),
                None => polis_crdt::ProposalKind::Generic,
            },
            tags: Default::default(),
            voting_period_ms: None,
        },
        "vote" => AdminCommand::Vote {
            proposal_id: arg(args, 2, "proposal_id"),
            choice: json(&format!("{:?}", arg(args, 3, "choice")), "vote choice"),
        },
        "close" => AdminCommand::Close {
            proposal_id: arg(args, 2, "proposal_id"),
        },
        "ratify" => AdminCommand::Ratify {
            proposal_id: arg(args, 2, "proposal_id"),
        },
        "proposal" => AdminCommand::Proposal {
            proposal_id: arg(args, 2, "proposal_id"),
        },
        "balance" => AdminCommand::Balance {
            account: args.get(2).cloned(),
        },
        "ledger" => AdminCommand::Ledger,
        "validators" => AdminCommand::Validators,
        "commands" => AdminCommand::Commands,
        "config" => AdminCommand::Config,
        "-h" | "--help" | "help" => {
            print_usage();
            std::process::exit(0);
        }
        other => {
            eprintln!("Unknown command: {}", other);
            print_usage();
            std::process::exit(1);
        }
    }
}

fn main() {
    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        print_usage();
        std::process::exit(1);
    }

    let cmd = parse_command(&args);

    match send_command(&cmd) {
        Ok(response) => match response {
            AdminResponse::Ok { message } => {
                println!("{}", message);
            }
            AdminResponse::Error { error } => {
                eprintln!("Error: {}", error);
                std::process::exit(1);
            }
            AdminResponse::List { items } => {
                if items.is_empty() {
                    println!("(none)");
                } else {
                    for item in items {
                        println!("{}", item);
                    }
                }
            }
            AdminResponse::Value { value } => match serde_json::to_string_pretty(&value) {
                Ok(text) => println!("{}", text),
                Err(_) => println!("{}", value),
            },
            AdminResponse::Pong => {
                println!("pong - polis-node is running");
            }
        },
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    }
}
