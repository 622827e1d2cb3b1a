mod config;
mod server;

use anyhow::Context;
use clap::{Parser, Subcommand};
use config::Config;
use server::run_server;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(name = "pieceport")]
#[command(about = "Piece preparation and proof-set submission service")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the server
    Server {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.yaml")]
        config: String,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pieceport=info,pieceport_core=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Server { config } => {
            tracing::info!("Starting Pieceport server with config: {}", config);

            let cfg = match load_config(&config) {
                Ok(c) => c,
                Err(e) => {
                    tracing::error!("Failed to load config: {:#}", e);
                    std::process::exit(1);
                }
            };

            tracing::info!(
                "Bind: {}, Data dir: {}, Ledger: {}, Reconcile every {}s",
                cfg.server.bind_addr,
                cfg.storage.data_dir.display(),
                cfg.ledger.base_url,
                cfg.reconciler.interval_secs
            );

            if let Err(e) = run_server(cfg).await {
                tracing::error!("Server error: {}", e);
                std::process::exit(1);
            }
        }
    }
}

fn load_config(path: &str) -> anyhow::Result<Config> {
    let config = Config::from_file(path).with_context(|| format!("reading {}", path))?;
    std::fs::create_dir_all(&config.storage.data_dir).with_context(|| {
        format!(
            "creating data directory {}",
            config.storage.data_dir.display()
        )
    })?;
    Ok(config)
}
