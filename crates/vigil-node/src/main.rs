//! vigil-node - Alerting Node
//!
//! Loads a JSON config, seeds rules, and scans every tenant on a fixed
//! cadence until interrupted.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use vigil_node::config::{LogConfig, LogFormat, NodeConfig};
use vigil_node::Node;

const DEFAULT_FILTER: &str = "vigil_node=info,vigil_alerts=info";

#[derive(Parser)]
#[command(name = "vigil-node")]
#[command(about = "Vigil multi-tenant alerting node")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scan scheduler
    Run {
        /// Path to config file
        #[arg(short, long, env = "VIGIL_CONFIG", default_value = "/etc/vigil/config.json")]
        config: PathBuf,
    },

    /// Validate a config file and exit
    Check {
        /// Path to config file
        #[arg(short, long, env = "VIGIL_CONFIG", default_value = "/etc/vigil/config.json")]
        config: PathBuf,
    },

    /// Generate a sample config file
    InitConfig {
        /// Path to write config
        #[arg(short, long, default_value = "/etc/vigil/config.json")]
        output: PathBuf,
    },
}

fn init_tracing(log: &LogConfig) -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(log.filter.as_deref().unwrap_or(DEFAULT_FILTER))?,
    };
    let registry = tracing_subscriber::registry().with(filter);
    match log.format {
        LogFormat::Plain => registry.with(fmt::layer()).init(),
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config } => {
            run_node(config).await?;
        }

        Commands::Check { config } => {
            let loaded = NodeConfig::load(&config)?;
            println!(
                "{}: {} tenants, {} channels, {} rules",
                config.display(),
                loaded.tenants.len(),
                loaded.channels.len(),
                loaded.rules.len()
            );
        }

        Commands::InitConfig { output } => {
            init_config(&output)?;
        }
    }

    Ok(())
}

async fn run_node(config_path: PathBuf) -> anyhow::Result<()> {
    let config = NodeConfig::load(&config_path)?;
    init_tracing(&config.log)?;
    info!(config = %config_path.display(), "starting vigil-node");

    let node = Node::build(&config)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if matches!(tokio::signal::ctrl_c().await, Ok(())) {
            info!("received SIGINT, initiating shutdown");
            let _ = shutdown_tx.send(true);
        }
    });

    node.run(shutdown_rx).await?;
    info!("vigil-node stopped");
    Ok(())
}

fn init_config(output: &Path) -> anyhow::Result<()> {
    let config = NodeConfig::sample();
    config.save(output)?;

    println!("Config written to {}", output.display());
    println!();
    println!("Put context files under {}/<tenant_id>/<type>.json, then run:", config.context_dir.display());
    println!("  vigil-node run --config {}", output.display());

    Ok(())
}
