//! modelmux - Main entry point
//!
//! Starts the scoring endpoint over a directory of persisted models and
//! serves until interrupted.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::info;

use modelmux::manager::ModelManager;
use modelmux::model::SerializedModelFactory;
use modelmux::persist::HeaderStore;
use modelmux::server::{ConnectionServer, ServerConfig};

#[derive(Parser)]
#[command(name = "modelmux", about = "Concurrent model scoring server", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve scoring requests over TCP
    Serve {
        /// Address to bind
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        /// Port to listen on
        #[arg(long, default_value_t = 1530)]
        port: u16,
        /// Directory holding model headers and artifacts
        #[arg(long, default_value = "models")]
        models_dir: PathBuf,
        /// Scoring worker threads
        #[arg(long, default_value_t = num_workers())]
        workers: usize,
        /// Concurrent connection cap
        #[arg(long, default_value_t = 256)]
        max_connections: usize,
    },
}

fn num_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "modelmux=info".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            host,
            port,
            models_dir,
            workers,
            max_connections,
        } => {
            let store = HeaderStore::open(&models_dir)?;
            let manager = Arc::new(ModelManager::open(
                store,
                Arc::new(SerializedModelFactory),
                workers,
            )?);
            info!(
                models = manager.list_models().len(),
                dir = %models_dir.display(),
                "model manager ready"
            );

            let config = ServerConfig {
                host,
                port,
                max_connections,
            };
            let handle =
                ConnectionServer::start(config, Arc::clone(manager.dispatcher())).await?;

            tokio::signal::ctrl_c().await?;
            info!("shutdown signal received");
            handle.shutdown().await;
            manager.close();
        }
    }

    Ok(())
}
