//! Server binary

use chorano::common::Config;
use chorano::coordination::RemoteSession;
use chorano::{HttpEchoHandler, Registrar, ServerLifecycle, SocketServer};
use clap::{Parser, Subcommand};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "chorano-server")]
#[command(about = "chorano server: registers itself and serves requests until stopped")]
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
    /// Register and serve
    Serve {
        /// Port to listen on; prompted for when unset
        #[arg(long)]
        port: Option<u16>,

        /// Worker pool size
        #[arg(long)]
        workers: Option<usize>,
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
        Commands::Serve { port, workers } => {
            if let Some(workers) = workers {
                config.server.workers = workers;
            }
            config.validate()?;

            let port = match port.or(config.server.port) {
                Some(port) => port,
                None => prompt_port().await?,
            };

            let (session, _events) = RemoteSession::connect(
                &config.coordination.connect,
                config.coordination.session_timeout(),
            )
            .await?;
            let session = Arc::new(session);

            let lifecycle = ServerLifecycle::new();
            let handler = Arc::new(HttpEchoHandler::new(
                lifecycle.clone(),
                config.server.max_body_bytes,
            ));
            let server = SocketServer::bind(
                SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)),
                &config.server,
                lifecycle,
                handler,
            )
            .await?;

            let location = format!(
                "{}:{}",
                config.server.advertise_host,
                server.local_addr().port()
            );
            let registrar = Registrar::new(Arc::clone(&session));
            registrar
                .register(&config.coordination.root, &location)
                .await?;

            let outcome = server.serve().await?;
            tracing::info!("Server at {} exited: {:?}", location, outcome);
            // dropping the session removes the registration
        }
    }

    Ok(())
}

async fn prompt_port() -> anyhow::Result<u16> {
    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        stdout.write_all(b"Specify the port to listen to: ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            anyhow::bail!("no port given on stdin");
        };
        match line.trim().parse::<u16>() {
            Ok(port) => return Ok(port),
            Err(_) => eprintln!("Not a valid port: {}", line.trim()),
        }
    }
}
