//! Skyhop command line entry point.

mod app;
mod config;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "skyhop", version)]
#[command(about = "Resumable chunked file transfers between devices")]
struct Cli {
    /// Config file (defaults to the platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Send a file to a listening peer. Ctrl-C pauses it for a later `resume`.
    Send {
        file: PathBuf,
        /// Receiver as host:port
        #[arg(short, long)]
        to: String,
        /// Chunk size in bytes, clamped to 64 KiB..=512 KiB
        #[arg(long)]
        chunk_size: Option<usize>,
        /// Compress chunks with zlib
        #[arg(long)]
        compress: bool,
    },
    /// Accept incoming transfers until Ctrl-C
    Listen {
        #[arg(short, long)]
        port: Option<u16>,
        /// Directory incoming files are written to
        #[arg(short, long)]
        dir: Option<PathBuf>,
    },
    /// Continue a paused outgoing transfer
    Resume { id: String },
    /// List transfers that can be resumed
    Pending,
    /// Forget a stored resume point
    Discard { id: String },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = config::Config::load(cli.config.as_deref())?;
    tracing::debug!(name = %config.name, "configuration loaded");

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(app::run(config, cli.command))
}
