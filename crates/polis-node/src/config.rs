//! Node configuration.
//!
//! Local settings only. Network parameters (tax rate, validator set size,
//! voting period) are replicated state and change through governance.

use crate::error::{Error, Result};
use polis_gossip::GossipConfig;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Data directory for storage
    pub data_dir: PathBuf,

    /// P2P listen address
    pub p2p_addr: SocketAddr,

    /// Address other nodes should use to reach us. Defaults to `p2p_addr`.
    pub advertise_addr: String,

    /// Bootstrap peer addresses, contacted once at start-up
    pub bootstrap_peers: Vec<String>,

    /// Admin socket path (for polis-admin)
    pub admin_socket: PathBuf,

    /// Genesis description used when there is no stored snapshot
    pub genesis_file: Option<PathBuf>,

    /// Where upgrade packages are fetched from
    pub package_dir: PathBuf,

    pub gossip: GossipConfig,

    pub close_interval: Duration,
    pub ratify_interval: Duration,
    pub execute_interval: Duration,
    pub ledger_interval: Duration,
    pub snapshot_interval: Duration,

    /// Bound on one call into the upgrade runtime
    pub upgrade_timeout: Duration,
}

fn parse<T: FromStr>(name: &str, raw: Option<String>, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match raw {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|e| Error::Config(format!("invalid {}={:?}: {}", name, value, e))),
    }
}

fn millis(name: &str, raw: Option<String>, default: Duration) -> Result<Duration> {
    let ms = parse(name, raw, default.as_millis() as u64)?;
    if ms == 0 {
        return Err(Error::Config(format!("{} must be positive", name)));
    }
    Ok(Duration::from_millis(ms))
}

impl NodeConfig {
    /// Create config from `POLIS_*` environment variables with defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let data_dir = PathBuf::from(var("POLIS_DATA_DIR").unwrap_or_else(|| "./polis-data".to_string()));
        let p2p_addr: SocketAddr = parse(
            "POLIS_P2P_ADDR",
            var("POLIS_P2P_ADDR"),
            SocketAddr::from(([0, 0, 0, 0], 9100)),
        )?;
        let advertise_addr = var("POLIS_ADVERTISE_ADDR").unwrap_or_else(|| p2p_addr.to_string());
        let bootstrap_peers = var("POLIS_BOOTSTRAP_PEERS")
            .map(|s| {
                s.split(',')
                    .map(|p| p.trim().to_string())
                    .filter(|p| !p.is_empty())
                    .collect()
            })
            .unwrap_or_default();
        let admin_socket = var("POLIS_ADMIN_SOCKET")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("admin.sock"));
        let genesis_file = var("POLIS_GENESIS_FILE").map(PathBuf::from);
        let package_dir = var("POLIS_PACKAGE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("packages"));

        let defaults = GossipConfig::default();
        let gossip = GossipConfig {
            interval: millis("POLIS_GOSSIP_INTERVAL_MS", var("POLIS_GOSSIP_INTERVAL_MS"), defaults.interval)?,
            fanout: parse("POLIS_GOSSIP_FANOUT", var("POLIS_GOSSIP_FANOUT"), defaults.fanout)?,
            peer_timeout: millis(
                "POLIS_PEER_TIMEOUT_MS",
                var("POLIS_PEER_TIMEOUT_MS"),
                defaults.peer_timeout,
            )?,
        };
        if gossip.fanout == 0 {
            return Err(Error::Config("POLIS_GOSSIP_FANOUT must be positive".into()));
        }

        Ok(Self {
            data_dir,
            p2p_addr,
            advertise_addr,
            bootstrap_peers,
            admin_socket,
            genesis_file,
            package_dir,
            gossip,
            close_interval: millis("POLIS_CLOSE_INTERVAL_MS", var("POLIS_CLOSE_INTERVAL_MS"), Duration::from_secs(1))?,
            ratify_interval: millis("POLIS_RATIFY_INTERVAL_MS", var("POLIS_RATIFY_INTERVAL_MS"), Duration::from_secs(1))?,
            execute_interval: millis(
                "POLIS_EXECUTE_INTERVAL_MS",
                var("POLIS_EXECUTE_INTERVAL_MS"),
                Duration::from_secs(1),
            )?,
            ledger_interval: millis("POLIS_LEDGER_INTERVAL_MS", var("POLIS_LEDGER_INTERVAL_MS"), Duration::from_secs(2))?,
            snapshot_interval: millis(
                "POLIS_SNAPSHOT_INTERVAL_MS",
                var("POLIS_SNAPSHOT_INTERVAL_MS"),
                Duration::from_secs(10),
            )?,
            upgrade_timeout: millis(
                "POLIS_UPGRADE_TIMEOUT_MS",
                var("POLIS_UPGRADE_TIMEOUT_MS"),
                polis_executor::DEFAULT_UPGRADE_TIMEOUT,
            )?,
        })
    }
}
