//! `arq-server` — runs a single ARQ engine for the lifetime of the process.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use arq_xfer::server::{self, ServerConfig};
use arq_xfer::session::Protocol;

/// A reliable file-transfer server over UDP with pluggable ARQ engines.
#[derive(Parser, Debug)]
#[command(name = "arq-server", version, about)]
struct Cli {
    /// UDP port to listen on.
    #[arg(short, long, default_value_t = 9000)]
    port: u16,

    /// Address to bind to.
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Directory to serve files from and write uploads into.
    #[arg(short, long, default_value = ".")]
    storage_dir: PathBuf,

    /// Which ARQ engine this server instance runs.
    #[arg(long, default_value = "selective-repeat")]
    protocol: Protocol,

    /// Log verbosity (error, warn, info, debug, trace).
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    std::fs::create_dir_all(&cli.storage_dir)?;
    let storage_dir = std::fs::canonicalize(&cli.storage_dir)?;

    let listen_addr: SocketAddr = format!("{}:{}", cli.host, cli.port).parse()?;
    let config = ServerConfig { listen_addr, storage_dir, protocol: cli.protocol };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let server_task = tokio::spawn(server::run(config, shutdown_rx));

    tokio::select! {
        result = server_task => {
            result??;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received interrupt, shutting down");
            let _ = shutdown_tx.send(true);
        }
    }

    // Active sessions are independent tasks, detached from the listen
    // loop; shutting down only stops accepting *new* handshakes.
    Ok(())
}
