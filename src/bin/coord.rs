//! Coordination service binary

use chorano::{common::Config, CoordService};
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "chorano-coord")]
#[command(about = "chorano coordination service")]
#[command(version)]
struct Cli {
    /// Config file (defaults to ./chorano.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the coordination service
    Serve {
        /// Listen address (overrides coordination.bind_addr)
        #[arg(long)]
        bind: Option<SocketAddr>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref())?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.as_str().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match cli.command {
        Commands::Serve { bind } => {
            if let Some(bind) = bind {
                config.coordination.bind_addr = bind;
            }

            let service = CoordService::bind(config.coordination.bind_addr).await?;
            tokio::select! {
                result = service.serve() => result?,
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Interrupted, shutting down coordination service");
                }
            }
        }
    }

    Ok(())
}
