use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

use bcshare_core::{PeerSession, TransferConfig, TransferEvent, TransferProgress, TransferStatus};
use bcshare_server::{BcshareServer, ServerConfig};
use signaling::{ClientId, HubConfig, InitiatorPolicy, SignalingClient};
use storage::RelayConfig;
use tracing_subscriber::{fmt, EnvFilter};

mod peer;

#[derive(Parser, Debug)]
#[command(name = "bcshare", version, about = "Browser-to-browser file sharing: signaling, direct transfer and an expiring relay")]
struct Cli {
    /// Set log level: error,warn,info,debug,trace
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the signaling server and the relay store
    Serve(ServeArgs),

    /// Print the effective server configuration
    Config(ServeArgs),

    /// Wait for a peer and save the files it sends
    Receive {
        /// Signaling endpoint, e.g. ws://localhost:1869/ws
        #[arg(long)]
        server: String,

        /// Output directory for received files
        #[arg(long)]
        output: Option<PathBuf>,

        /// Address to offer when this side listens
        #[arg(long, default_value_t = IpAddr::V4(Ipv4Addr::LOCALHOST))]
        host: IpAddr,

        /// Payload bytes per chunk
        #[arg(long, default_value_t = 128 * 1024)]
        chunk_size: usize,
    },

    /// Pair with a waiting peer and send it files
    Send {
        /// Signaling endpoint, e.g. ws://localhost:1869/ws
        #[arg(long)]
        server: String,

        /// Id the receiver printed
        #[arg(long)]
        to: String,

        /// Files to send, in order
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Address to offer when this side listens
        #[arg(long, default_value_t = IpAddr::V4(Ipv4Addr::LOCALHOST))]
        host: IpAddr,

        /// Payload bytes per chunk
        #[arg(long, default_value_t = 128 * 1024)]
        chunk_size: usize,
    },
}

#[derive(Args, Debug, Clone)]
struct ServeArgs {
    /// Address to listen on
    #[arg(long, env = "BCSHARE_BIND", default_value = bcshare_server::config::DEFAULT_BIND)]
    bind: SocketAddr,

    /// Port override for the bind address
    #[arg(long, env = "PORT")]
    port: Option<u16>,

    /// Directory for relayed files and their records
    #[arg(long, env = "BCSHARE_DATA_DIR", default_value = "bcshare-data")]
    data_dir: PathBuf,

    /// Code uploaders must present; without one the relay refuses uploads
    #[arg(long, env = "BCSHARE_ACCESS_CODE", hide_env_values = true)]
    access_code: Option<String>,

    /// Seconds a relayed file stays downloadable
    #[arg(long, default_value_t = 600)]
    ttl_secs: u64,

    /// Seconds between expiry sweeps
    #[arg(long, default_value_t = 300)]
    sweep_secs: u64,

    /// Which side of a pairing listens: callee or lowest-id
    #[arg(long, default_value_t = InitiatorPolicy::Callee)]
    initiator: InitiatorPolicy,

    /// Tell requesters when the peer they asked for is not connected
    #[arg(long)]
    notify_unreachable: bool,
}

impl ServeArgs {
    fn into_config(self) -> ServerConfig {
        let mut bind = self.bind;
        if let Some(port) = self.port {
            bind.set_port(port);
        }

        ServerConfig {
            bind,
            hub: HubConfig {
                initiator: self.initiator,
                notify_unreachable: self.notify_unreachable,
            },
            relay: RelayConfig {
                data_dir: self.data_dir,
                access_code: self.access_code,
                ttl_secs: self.ttl_secs,
                sweep_interval_secs: self.sweep_secs,
                ..RelayConfig::default()
            },
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    fmt()
        .with_env_filter(EnvFilter::new(&cli.log_level))
        .with_target(false)
        .init();

    match cli.cmd {
        Commands::Serve(args) => {
            let cfg = args.into_config();
            if cfg.relay.access_code.is_none() {
                tracing::warn!("No access code configured; relay uploads are disabled");
            }

            println!("✓ Serving on {}", cfg.bind);
            println!("  Signaling: ws://{}/ws", cfg.bind);
            println!("  Relay data: {}", cfg.relay.data_dir.display());
            println!("  Press Ctrl+C to stop");

            BcshareServer::new(cfg)?.run().await?;
        }

        Commands::Config(args) => {
            let cfg = args.into_config();
            println!("{}", serde_json::to_string_pretty(&cfg.redacted())?);
        }

        Commands::Receive { server, output, host, chunk_size } => {
            let output_dir = match output {
                Some(dir) => dir,
                None => std::env::current_dir()?,
            };
            tokio::fs::create_dir_all(&output_dir)
                .await
                .with_context(|| format!("Failed to create {}", output_dir.display()))?;

            receive_files(&server, &output_dir, host, TransferConfig::with_chunk_size(chunk_size)).await?;
        }

        Commands::Send { server, to, files, host, chunk_size } => {
            for file in &files {
                if !file.is_file() {
                    anyhow::bail!("Not a file: {}", file.display());
                }
            }

            send_files(&server, ClientId::from(to), &files, host, TransferConfig::with_chunk_size(chunk_size)).await?;
        }
    }

    Ok(())
}

async fn send_files(server: &str, to: ClientId, files: &[PathBuf], host: IpAddr, cfg: TransferConfig) -> Result<()> {
    let mut signal = SignalingClient::connect(server)
        .await
        .with_context(|| format!("Failed to reach signaling server {}", server))?;
    println!("✓ Connected as {}", signal.id());

    println!("Pairing with {}...", to);
    let assignment = peer::pair_with(&mut signal, &to).await?;
    let (sink, stream) = peer::open_channel(&mut signal, &assignment, host).await?;
    println!("✓ Direct channel open");

    let (session, events) = PeerSession::start(sink, stream, cfg);
    let printer = tokio::spawn(print_events(events, None));

    let result = {
        let send = session.send_files(files);
        tokio::pin!(send);
        tokio::select! {
            r = &mut send => r,
            _ = tokio::signal::ctrl_c() => {
                println!("Cancelling...");
                session.abort();
                send.await
            }
        }
    };

    session.close().await;
    let _ = printer.await;
    let _ = signal.close().await;

    result.context("Transfer failed")?;
    println!("✓ Sent {} file(s)", files.len());
    Ok(())
}

async fn receive_files(server: &str, output_dir: &Path, host: IpAddr, cfg: TransferConfig) -> Result<()> {
    let mut signal = SignalingClient::connect(server)
        .await
        .with_context(|| format!("Failed to reach signaling server {}", server))?;

    println!("✓ Connected as {}", signal.id());
    println!("  Share this id with the sender");
    println!("  Output directory: {}", output_dir.display());

    let assignment = peer::await_pairing(&mut signal, false).await?;
    let (sink, stream) = peer::open_channel(&mut signal, &assignment, host).await?;
    println!("✓ Direct channel open");

    let (session, events) = PeerSession::start(sink, stream, cfg);
    let saved = print_events(events, Some(output_dir)).await?;

    session.close().await;
    let _ = signal.close().await;
    println!("✓ Received {} file(s)", saved);
    Ok(())
}

/// Print session events until the channel closes. With an output directory,
/// completed files are written there; returns how many were saved.
async fn print_events(
    mut events: tokio::sync::mpsc::UnboundedReceiver<TransferEvent>,
    output_dir: Option<&Path>,
) -> Result<usize> {
    let mut saved = 0;
    let mut last_reported = 0u64;

    while let Some(event) = events.recv().await {
        match event {
            TransferEvent::Progress(p) => {
                if should_report(&p, &mut last_reported) {
                    println!("  {}", progress_line(&p));
                }
            }
            TransferEvent::MetadataReceived(meta) => {
                println!("← Incoming {}", meta.summary());
            }
            TransferEvent::FileReceived { metadata, data } => {
                let Some(dir) = output_dir else { continue };
                let path = unique_path(dir, &metadata.safe_file_name());
                tokio::fs::write(&path, &data)
                    .await
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                saved += 1;
                println!("✓ Saved {}", path.display());
            }
            TransferEvent::ProtocolError(msg) => {
                tracing::warn!("Peer protocol error: {}", msg);
            }
            TransferEvent::PeerTimeout => println!("✗ Peer stopped responding"),
            TransferEvent::ChannelClosed => break,
        }
    }

    Ok(saved)
}

/// Report status changes and every tenth of a file, not every chunk.
fn should_report(p: &TransferProgress, last_reported: &mut u64) -> bool {
    let decile = (p.percent / 10.0).floor() as u64;
    let report = p.status != TransferStatus::Transferring || decile != *last_reported;
    *last_reported = if p.status.is_terminal() { 0 } else { decile };
    report
}

fn progress_line(p: &TransferProgress) -> String {
    let rate = match p.rate {
        Some(r) => format!("{:.1} KiB/s", r / 1024.0),
        None => "-".to_string(),
    };
    format!(
        "[{}] {} {:.0}% ({}/{} bytes, {}, eta {:.0}s) {:?}",
        p.file_index, p.file_name, p.percent, p.bytes, p.total, rate, p.eta, p.status
    )
}

/// `dir/name`, or `dir/stem (n).ext` when that already exists.
fn unique_path(dir: &Path, name: &str) -> PathBuf {
    let candidate = dir.join(name);
    if !candidate.exists() {
        return candidate;
    }

    let as_path = Path::new(name);
    let stem = as_path.file_stem().and_then(|s| s.to_str()).unwrap_or(name);
    let ext = as_path.extension().and_then(|s| s.to_str());

    (1..)
        .map(|n| match ext {
            Some(ext) => dir.join(format!("{stem} ({n}).{ext}")),
            None => dir.join(format!("{stem} ({n})")),
        })
        .find(|p| !p.exists())
        .unwrap_or(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn progress(percent: f64, status: TransferStatus) -> TransferProgress {
        TransferProgress {
            file_index: 0,
            file_name: "a.bin".into(),
            bytes: percent as u64,
            total: 100,
            percent,
            rate: None,
            eta: 0.0,
            status,
        }
    }

    #[test]
    fn test_unique_path_avoids_overwrite() {
        let dir = TempDir::new().unwrap();
        assert_eq!(unique_path(dir.path(), "notes.txt"), dir.path().join("notes.txt"));

        std::fs::write(dir.path().join("notes.txt"), b"x").unwrap();
        assert_eq!(unique_path(dir.path(), "notes.txt"), dir.path().join("notes (1).txt"));

        std::fs::write(dir.path().join("notes (1).txt"), b"x").unwrap();
        assert_eq!(unique_path(dir.path(), "notes.txt"), dir.path().join("notes (2).txt"));

        std::fs::write(dir.path().join("README"), b"x").unwrap();
        assert_eq!(unique_path(dir.path(), "README"), dir.path().join("README (1)"));
    }

    #[test]
    fn test_progress_reported_per_decile() {
        let mut last = 0;
        assert!(should_report(&progress(0.0, TransferStatus::Waiting), &mut last));
        assert!(!should_report(&progress(3.0, TransferStatus::Transferring), &mut last));
        assert!(should_report(&progress(12.0, TransferStatus::Transferring), &mut last));
        assert!(!should_report(&progress(19.0, TransferStatus::Transferring), &mut last));
        assert!(should_report(&progress(100.0, TransferStatus::Completed), &mut last));
        assert_eq!(last, 0);
    }

    #[test]
    fn test_serve_args_build_config() {
        let cli = Cli::parse_from([
            "bcshare",
            "config",
            "--bind",
            "127.0.0.1:8080",
            "--port",
            "9000",
            "--access-code",
            "s3cret",
            "--ttl-secs",
            "60",
            "--initiator",
            "lowest-id",
            "--notify-unreachable",
        ]);
        let Commands::Config(args) = cli.cmd else { panic!("expected config") };
        let cfg = args.into_config();

        assert_eq!(cfg.bind, "127.0.0.1:9000".parse().unwrap());
        assert_eq!(cfg.relay.ttl_secs, 60);
        assert_eq!(cfg.relay.access_code.as_deref(), Some("s3cret"));
        assert_eq!(cfg.hub.initiator, InitiatorPolicy::LowestId);
        assert!(cfg.hub.notify_unreachable);

        let printed = serde_json::to_string(&cfg.redacted()).unwrap();
        assert!(!printed.contains("s3cret"));
    }

    #[test]
    fn test_send_requires_files() {
        assert!(Cli::try_parse_from(["bcshare", "send", "--server", "ws://x/ws", "--to", "abc"]).is_err());
    }
}
