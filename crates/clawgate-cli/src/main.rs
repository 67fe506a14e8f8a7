//! `clawgate` -- the agent gateway daemon.
//!
//! `clawgate gateway` loads the configuration, wires the runtime
//! (providers, agents, MCP manager, bus, gateway server, heartbeat),
//! and runs until Ctrl+C.
//!
//! # Lifecycle
//!
//! ```text
//! 1. Load config (--config or ~/.clawgate/config.toml)
//! 2. Build providers, agents, tool registries, MCP manager
//! 3. Spawn the agent loop, outbound pump, gateway server, heartbeat
//! 4. Wait for Ctrl+C, cancel the root context, drain everything
//! ```

mod wiring;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "clawgate", version, about = "Personal AI-agent gateway daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the gateway daemon.
    Gateway(GatewayArgs),
    /// Print the effective configuration and exit.
    Config(ConfigArgs),
}

#[derive(Args)]
struct GatewayArgs {
    /// Config file path (overrides auto-discovery).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bind address override.
    #[arg(long)]
    host: Option<String>,

    /// Bind port override.
    #[arg(long)]
    port: Option<u16>,
}

#[derive(Args)]
struct ConfigArgs {
    /// Config file path (overrides auto-discovery).
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Gateway(args) => run_gateway(args).await,
        Command::Config(args) => {
            let config = wiring::load_config(args.config.as_deref())?;
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

async fn run_gateway(args: GatewayArgs) -> anyhow::Result<()> {
    let mut config = wiring::load_config(args.config.as_deref())?;
    if let Some(host) = args.host {
        config.gateway.host = host;
    }
    if let Some(port) = args.port {
        config.gateway.port = port;
    }

    info!(
        host = %config.gateway.host,
        port = config.gateway.port,
        "starting clawgate gateway"
    );
    let runtime = wiring::build_runtime(config).await?;
    runtime.run_until_shutdown().await
}
