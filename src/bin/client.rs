//! Client binary

use chorano::client::send_stop;
use chorano::common::Config;
use chorano::coordination::{Coordination, RemoteSession, WatchEvents};
use chorano::{Dispatcher, MembershipTracker, RegistryView};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "chorano-client")]
#[command(about = "chorano client: discover servers and dispatch requests")]
#[command(version)]
struct Cli {
    /// Config file (defaults to ./chorano.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Coordination service address (overrides coordination.connect)
    #[arg(long, global = true)]
    coordinator: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Dispatch requests round-robin across live servers
    Run {
        /// Number of requests to send
        #[arg(long)]
        requests: Option<u64>,
    },

    /// Print the registered servers
    List,

    /// Tell one server to stop
    Stop {
        /// Server location (host:port)
        location: String,
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

    if let Some(coordinator) = cli.coordinator {
        config.coordination.connect = coordinator;
    }

    match cli.command {
        Commands::Run { requests } => {
            let budget = requests.unwrap_or(config.client.request_count);
            let (tracker, events) = discover(&config).await?;

            if tracker.view().is_empty() {
                tracing::error!("No servers registered under {}", tracker.root());
                std::process::exit(1);
            }

            let view = tracker.view().clone();
            let watcher = tracker.spawn(events);

            let report = Dispatcher::new(view, &config.client).run(budget).await;
            watcher.abort();

            println!("Dispatch report:");
            println!("  Sent: {}", report.sent);
            println!("  Succeeded: {}", report.succeeded);
            println!("  Failed: {}", report.failed);
            for (location, count) in &report.per_target {
                println!("  {}: {}", location, count);
            }
            println!("  Elapsed: {:?}", report.elapsed);
        }
        Commands::List => {
            let (tracker, _events) = discover(&config).await?;
            let servers = tracker.view().snapshot();
            println!("Registered servers: {}", servers.len());
            for (path, location) in servers {
                println!("  {} -> {}", path, location);
            }
        }
        Commands::Stop { location } => {
            let response = send_stop(&location, config.client.request_timeout()).await?;
            println!("{}", response.body);
        }
    }

    Ok(())
}

async fn discover(
    config: &Config,
) -> anyhow::Result<(MembershipTracker<RemoteSession>, WatchEvents)> {
    let (session, events) = RemoteSession::connect(
        &config.coordination.connect,
        config.coordination.session_timeout(),
    )
    .await?;

    let root = config.coordination.root.clone();
    let registry_exists = session.exists(&root).await?;
    let tracker = MembershipTracker::new(Arc::new(session), root, RegistryView::new());
    if !registry_exists {
        // no server has ever registered
        tracing::warn!("Registry root {} does not exist yet", tracker.root());
        return Ok((tracker, events));
    }

    let report = tracker.refresh().await?;
    tracing::info!(
        "Discovered {} servers ({} unreadable)",
        report.added,
        report.skipped
    );
    Ok((tracker, events))
}
