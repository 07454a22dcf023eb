//! Node daemon with the interactive operator shell.
//!
//! ```bash
//! # Addresses from chainstore.toml / CONTROL_PANEL_IP / Node1_IP
//! chainstore-node --name Node1
//!
//! # Or explicit
//! chainstore-node --name Node1 --address 127.0.0.1:50060 --control 127.0.0.1:50050
//! ```

use anyhow::{Context, Result};
use clap::Parser;

use chainstore_config::ConfigLoader;
use chainstore_node::{NodeSupervisor, shell};
use chainstore_types::Address;

/// Default node endpoint when neither flags nor configuration name one.
const DEFAULT_NODE_ADDRESS: &str = "127.0.0.1:50060";

/// chainstore node - hosts store processes and the operator shell.
#[derive(Parser)]
#[command(name = "chainstore-node")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Node name; also the prefix for generated process names.
    #[arg(short, long, default_value = "Node1")]
    name: String,

    /// Base address for this node's processes; overrides configuration.
    /// Process i serves on port + i + 1.
    #[arg(short, long)]
    address: Option<String>,

    /// Control plane address; overrides configuration.
    #[arg(short, long)]
    control: Option<String>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let config = ConfigLoader::new()
        .load()
        .context("failed to load configuration")?;

    let address = cli
        .address
        .or_else(|| config.node_address(&cli.name).map(str::to_string))
        .unwrap_or_else(|| DEFAULT_NODE_ADDRESS.to_string());
    let control = cli.control.unwrap_or(config.control.address);

    let mut supervisor = NodeSupervisor::new(
        cli.name,
        Address::new(address),
        Address::new(control),
    );

    shell::run(&mut supervisor)
}
