//! Polis Node binary
//!
//! A leaderless replica of the Polis task, ledger and governance network.

use polis_node::{NodeConfig, PolisNode};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "polis_node=info,polis=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Polis Node");

    let config = NodeConfig::from_env()?;

    let node = PolisNode::new(config).await?;
    node.run().await?;

    Ok(())
}
