//! Control plane daemon.
//!
//! ```bash
//! # Bind from chainstore.toml / CONTROL_PANEL_IP
//! chainstore-control
//!
//! # Or bind explicitly
//! chainstore-control --address 127.0.0.1:50050
//! ```

use anyhow::{Context, Result};
use clap::Parser;

use chainstore_config::ConfigLoader;
use chainstore_control::{ControlService, DEFAULT_CONTROL_WORKERS};
use chainstore_server::ServerConfig;

/// chainstore control plane - chain topology manager.
#[derive(Parser)]
#[command(name = "chainstore-control")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Address to bind to; overrides configuration.
    #[arg(short, long)]
    address: Option<String>,

    /// Worker pool size.
    #[arg(long, default_value_t = DEFAULT_CONTROL_WORKERS)]
    workers: usize,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let config = ConfigLoader::new()
        .load()
        .context("failed to load configuration")?;
    let address = cli.address.unwrap_or(config.control.address);

    let service = ControlService::new();
    let server = service
        .serve(
            ServerConfig::new(address)
                .with_name("chainstore-ctl")
                .with_workers(cli.workers),
        )
        .context("failed to start control plane endpoint")?;

    println!("Control plane listening on {}", server.local_address());
    server.join();
    Ok(())
}
