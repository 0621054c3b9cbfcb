use std::path::PathBuf;

use anyhow::Result;
use chrono::Utc;
use clap::{Parser, Subcommand};
use tokio::signal;
use tokio::sync::watch;
use uptrack_service::{Config, Services};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Config file, defaults to $XDG_CONFIG_HOME/uptrack/config.toml
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run workers, the sweep loop and retention until interrupted.
    Run,
    /// Perform a single orchestration sweep and exit.
    Sweep,
    /// Create or upgrade the database schema and exit.
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    logger::init_tracing("uptrack-service");

    let cli = Cli::parse();
    let config = Config::from_config(cli.config.as_ref())?;
    tracing::debug!("{config}");

    let services = Services::build(config).await?;

    match cli.command {
        Commands::Run => run(services).await?,
        Commands::Sweep => {
            let report = services.orchestrator().sweep(Utc::now()).await?;
            tracing::info!(
                accounts = report.accounts,
                batches = report.batches,
                domains = report.domains,
                failures = report.failures,
                "sweep complete"
            );
        }
        Commands::Migrate => tracing::info!("database schema is up to date"),
    }

    Ok(())
}

async fn run(services: Services) -> Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        let ctrl_c = signal::ctrl_c();
        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut stream) => {
                    stream.recv().await;
                }
                Err(e) => {
                    tracing::warn!("Failed to register SIGTERM handler: {e}");
                    std::future::pending::<()>().await;
                }
            }
        };
        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => tracing::info!("SIGINT received, shutting down"),
            _ = terminate => tracing::info!("SIGTERM received, shutting down"),
        }
        let _ = shutdown_tx.send(true);
    });

    services.run(shutdown_rx).await
}
