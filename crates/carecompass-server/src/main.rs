//! CareCompass Server
//!
//! Serves the CareCompass HTTP API and, optionally, the static frontend.

use anyhow::Result;
use carecompass_core::{BackendKind, ServerConfig};
use carecompass_server::Server;
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "carecompass-server")]
#[command(about = "CareCompass patient-care tracking server")]
#[command(version)]
struct Args {
    /// Port to listen on (overrides config and PORT)
    #[arg(short, long)]
    port: Option<u16>,

    /// Data directory (overrides config and CARECOMPASS_DATA_DIR)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Persistence backend: json_file, journal or memory
    #[arg(long)]
    backend: Option<BackendKind>,

    /// Directory of static frontend files
    #[arg(long)]
    public_dir: Option<PathBuf>,
}

impl Args {
    fn apply(self, config: &mut ServerConfig) {
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(dir) = self.data_dir {
            config.data_dir = dir;
        }
        if let Some(backend) = self.backend {
            config.backend = backend;
        }
        if let Some(dir) = self.public_dir {
            config.public_dir = Some(dir);
        }
    }
}

async fn run(config: ServerConfig) -> Result<()> {
    let server = Server::new(config).await?;
    server.run().await
}

fn main() -> Result<()> {
    let args = Args::parse();
    let mut config = ServerConfig::load();
    args.apply(&mut config);

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .with_target(false)
        .init();

    tracing::info!("Starting CareCompass server v{}", env!("CARGO_PKG_VERSION"));

    // Run async runtime
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(run(config))
}
