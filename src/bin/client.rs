//! `arq-client` — one-shot download/upload driver.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use arq_xfer::client;
use arq_xfer::session::Protocol;

/// Transfer a file to or from an arq-server instance.
#[derive(Parser, Debug)]
#[command(name = "arq-client", version, about)]
struct Cli {
    /// Server host to connect to.
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Server port.
    #[arg(short, long, default_value_t = 9000)]
    port: u16,

    /// Which ARQ engine to use for this transfer — must match the server.
    #[arg(long, default_value = "selective-repeat")]
    protocol: Protocol,

    /// Suppress the progress bar.
    #[arg(short, long)]
    quiet: bool,

    /// Log verbosity (error, warn, info, debug, trace).
    #[arg(long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Retrieve a file from the server.
    Download {
        /// Name of the file as it exists on the server.
        filename: String,
        /// Directory to write the file into.
        #[arg(short, long, default_value = ".")]
        dst: PathBuf,
    },
    /// Send a file to the server.
    Upload {
        /// Local file to send.
        #[arg(short, long)]
        src: PathBuf,
        /// Name to give the file on the server; defaults to the source's own name.
        filename: Option<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let server_addr: SocketAddr = match format!("{}:{}", cli.host, cli.port).parse() {
        Ok(addr) => addr,
        Err(e) => {
            eprintln!("invalid server address: {e}");
            return ExitCode::from(70);
        }
    };

    let result = match cli.command {
        Command::Download { filename, dst } => client::download(server_addr, &filename, &dst, cli.protocol, cli.quiet).await,
        Command::Upload { src, filename } => {
            let filename = filename.unwrap_or_else(|| {
                src.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default()
            });
            client::upload(server_addr, &filename, &src, cli.protocol, cli.quiet).await
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{e}");
            ExitCode::from(e.exit_code() as u8)
        }
    }
}
