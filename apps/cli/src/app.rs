//! Command handlers.

use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, bail};
use skyhop_transfer::{
    Endpoint, TransferError, TransferEvent, TransferManager, TransferRecord, TransferStatus,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::Command;
use crate::config::Config;

pub async fn run(mut config: Config, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Send {
            file,
            to,
            chunk_size,
            compress,
        } => {
            if let Some(size) = chunk_size {
                config.transfer.chunk_size = size;
            }
            if compress {
                config.transfer.compression_enabled = true;
            }
            let endpoint = parse_endpoint(&to)?;
            let manager = build_manager(&config)?;
            drive(&manager, manager.send_file(&file, &endpoint)).await
        }
        Command::Listen { port, dir } => {
            if let Some(dir) = dir {
                config.transfer.download_dir = dir;
            }
            listen(config, port).await
        }
        Command::Resume { id } => {
            let manager = build_manager(&config)?;
            drive(&manager, manager.resume(&id)).await
        }
        Command::Pending => {
            let manager = build_manager(&config)?;
            let pending = manager.pending_resumes()?;
            if pending.is_empty() {
                println!("no paused transfers");
            }
            for rec in pending {
                let peer = rec
                    .endpoint()
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "-".into());
                println!(
                    "{}  {:?}  {}  {}/{}  {}  {}",
                    rec.transfer_id,
                    rec.direction,
                    rec.file_name,
                    format_bytes(rec.resume_offset),
                    format_bytes(rec.file_size),
                    peer,
                    rec.timestamp.format("%Y-%m-%d %H:%M"),
                );
            }
            Ok(())
        }
        Command::Discard { id } => {
            let manager = build_manager(&config)?;
            manager.cancel(&id)?;
            println!("discarded {id}");
            Ok(())
        }
    }
}

fn build_manager(config: &Config) -> anyhow::Result<TransferManager> {
    TransferManager::from_config(config.transfer.clone(), config.identity())
        .context("opening resume store")
}

/// Runs one transfer to the end while rendering its events.
///
/// Ctrl-C pauses the transfer so it can be continued with `skyhop resume`;
/// a transfer that cannot be paused any more is cancelled instead.
async fn drive<F>(manager: &TransferManager, transfer: F) -> anyhow::Result<()>
where
    F: Future<Output = Result<TransferRecord, TransferError>>,
{
    let mut events = manager
        .take_events()
        .await
        .context("event stream already taken")?;
    let mut printer = ProgressPrinter::default();
    let mut interrupted = false;
    tokio::pin!(transfer);

    loop {
        tokio::select! {
            result = &mut transfer => {
                printer.end_line();
                return match result {
                    Ok(rec) => {
                        println!(
                            "{} {} ({}) sha256 {}",
                            rec.status,
                            rec.file_name,
                            format_bytes(rec.file_size),
                            rec.file_hash.as_deref().unwrap_or("-"),
                        );
                        Ok(())
                    }
                    Err(TransferError::TransferCancelled) if interrupted => {
                        println!("transfer cancelled");
                        Ok(())
                    }
                    Err(e) => Err(e.into()),
                };
            }
            Some(event) = events.recv() => {
                printer.render(&event);
                if let TransferEvent::StateChanged { transfer_id, status: TransferStatus::Paused, .. } = &event {
                    if interrupted {
                        println!("paused; continue with `skyhop resume {transfer_id}`");
                        return Ok(());
                    }
                }
            }
            _ = tokio::signal::ctrl_c(), if !interrupted => {
                interrupted = true;
                printer.end_line();
                for rec in manager.active() {
                    if let Err(e) = manager.pause(&rec.id) {
                        warn!(transfer = %rec.id, error = %e, "cannot pause, cancelling");
                        if let Err(e) = manager.cancel(&rec.id) {
                            warn!(transfer = %rec.id, error = %e, "cancel failed");
                        }
                    }
                }
            }
        }
    }
}

async fn listen(config: Config, port: Option<u16>) -> anyhow::Result<()> {
    let port = port.unwrap_or(config.port);
    let listener = TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("binding port {port}"))?;
    let download_dir = config.transfer.download_dir.clone();
    let manager = Arc::new(build_manager(&config)?);
    let mut events = manager
        .take_events()
        .await
        .context("event stream already taken")?;
    info!(dir = %download_dir.display(), "saving incoming files");

    let cancel = CancellationToken::new();
    let server = tokio::spawn(manager.clone().serve(listener, cancel.clone()));
    let mut printer = ProgressPrinter::default();

    loop {
        tokio::select! {
            Some(event) = events.recv() => printer.render(&event),
            _ = tokio::signal::ctrl_c() => {
                printer.end_line();
                cancel.cancel();
                break;
            }
        }
    }

    server.await.context("listener task panicked")??;
    for rec in manager.active() {
        if !rec.status.is_terminal() {
            warn!(transfer = %rec.id, file = %rec.file_name, "abandoning unfinished transfer");
        }
    }
    Ok(())
}

/// Parses `host:port` or `[v6addr]:port`.
fn parse_endpoint(s: &str) -> anyhow::Result<Endpoint> {
    let Some((host, port)) = s.rsplit_once(':') else {
        bail!("expected host:port, got {s:?}");
    };
    let host = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    if host.is_empty() {
        bail!("missing host in {s:?}");
    }
    let port: u16 = port
        .parse()
        .with_context(|| format!("invalid port in {s:?}"))?;
    Ok(Endpoint::new(host, port))
}

/// Single-line progress on stderr, one line per transfer state change.
#[derive(Default)]
struct ProgressPrinter {
    line_open: bool,
}

impl ProgressPrinter {
    fn render(&mut self, event: &TransferEvent) {
        match event {
            TransferEvent::Progress(rec) => {
                let eta = rec
                    .stats
                    .eta_secs
                    .map(|s| format!("{}s", s.round() as u64))
                    .unwrap_or_else(|| "--".into());
                eprint!(
                    "\r{} {:>5.1}% {}/{} {} eta {} {:?}   ",
                    rec.file_name,
                    rec.progress() * 100.0,
                    format_bytes(rec.transferred_bytes),
                    format_bytes(rec.file_size),
                    format_speed(rec.stats.average_speed),
                    eta,
                    rec.stats.quality,
                );
                self.line_open = true;
            }
            TransferEvent::StateChanged {
                transfer_id,
                status,
                error,
            } => {
                self.end_line();
                match error {
                    Some(e) => warn!(transfer = %transfer_id, %status, error = %e, "transfer state changed"),
                    None => info!(transfer = %transfer_id, %status, "transfer state changed"),
                }
            }
        }
    }

    fn end_line(&mut self) {
        if self.line_open {
            eprintln!();
            self.line_open = false;
        }
    }
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{size:.2} {}", UNITS[unit])
    }
}

fn format_speed(bytes_per_sec: f64) -> String {
    format!("{}/s", format_bytes(bytes_per_sec.max(0.0) as u64))
}
