//! ZipDrop
//!
//! Upload once, download once.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use daemon::config::Config;
use daemon::orchestrator::{Relay, RelayEvent};
use daemon::share::TransferOutcome;
use tracing_subscriber::EnvFilter;

/// ZipDrop - one-shot file relay.
#[derive(Parser, Debug)]
#[command(name = "zipdrop")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run the relay and accept uploads on /upload
    Start {
        /// Port for the upload listener (overrides config)
        #[arg(long, short)]
        port: Option<u16>,
    },

    /// Share a local file on a one-shot port
    Share {
        /// File to share
        file: PathBuf,

        /// Seconds to wait for the downloader (overrides config, 0 = forever)
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Download a shared file
    Fetch {
        /// Share port
        port: u16,

        /// Host serving the share
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Directory to write the file into
        #[arg(long, short, default_value = ".")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = if let Some(config_path) = &cli.config {
        Config::load(config_path)?
    } else {
        Config::load_default()?
    };

    // Apply environment variable overrides
    config.apply_env_overrides();

    // Validate configuration
    config.validate()?;

    // Initialize tracing; RUST_LOG wins over the configured level
    let level = if cli.verbose {
        "debug".to_string()
    } else {
        config.daemon.log_level.to_lowercase()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Some(config_path) = &cli.config {
        tracing::info!("Using config file: {:?}", config_path);
    }

    match cli.command {
        Commands::Start { port } => {
            if let Some(port) = port {
                config.http.port = port;
            }
            let mut relay = Relay::new(config)?;
            run_relay(&mut relay).await?;
        }
        Commands::Share { file, timeout } => {
            if let Some(timeout) = timeout {
                config.share.accept_timeout_secs = timeout;
                config.validate()?;
            }
            let relay = Relay::new(config)?;
            run_share(&relay, file).await?;
        }
        Commands::Fetch { port, host, output } => {
            let fetched = daemon::client::fetch((host.as_str(), port), &output).await?;
            println!(
                "Received {} ({} bytes) -> {}",
                fetched.filename,
                fetched.bytes,
                fetched.path.display()
            );
        }
    }

    Ok(())
}

/// Run the relay until a shutdown signal arrives.
async fn run_relay(relay: &mut Relay) -> anyhow::Result<()> {
    // Subscribe before starting so no state change is missed
    let mut events = relay.subscribe();

    relay.start().await?;

    if let Some(addr) = relay.local_addr() {
        println!("Accepting uploads on http://{}/upload", addr);
    }

    // Spawn event logging task
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                RelayEvent::StateChanged(state) => {
                    tracing::info!("Relay state: {:?}", state);
                }
                RelayEvent::ShareOffered { port, file_name } => {
                    tracing::info!("Sharing {} on port {}", file_name, port);
                }
                RelayEvent::ShareFinished { port, outcome } => {
                    log_outcome(port, &outcome);
                }
                RelayEvent::Error { message } => {
                    tracing::error!("Relay error: {}", message);
                }
            }
        }
    });

    wait_for_shutdown_signal().await?;
    tracing::info!("Received shutdown signal");

    relay.stop().await?;

    Ok(())
}

/// Share one local file and wait until it has been fetched.
async fn run_share(relay: &Relay, file: PathBuf) -> anyhow::Result<()> {
    let mut events = relay.subscribe();
    let port = relay.share_file(&file).await?;

    println!("Sharing {} on port {}", file.display(), port);
    println!("Fetch it with: zipdrop fetch {}", port);

    let finished = async {
        while let Ok(event) = events.recv().await {
            if let RelayEvent::ShareFinished { port: p, outcome } = event {
                if p == port {
                    return Some(outcome);
                }
            }
        }
        None
    };

    tokio::select! {
        outcome = finished => {
            if let Some(outcome) = outcome {
                log_outcome(port, &outcome);
                if !outcome.is_completed() {
                    relay.stop().await?;
                    anyhow::bail!("Share on port {} ended without a download", port);
                }
            }
        }
        signal = wait_for_shutdown_signal() => {
            signal?;
            tracing::info!("Received shutdown signal");
        }
    }

    relay.stop().await?;
    Ok(())
}

fn log_outcome(port: u16, outcome: &TransferOutcome) {
    match outcome {
        TransferOutcome::Completed { peer, bytes } => {
            tracing::info!("Port {}: sent {} bytes to {}", port, bytes, peer);
        }
        TransferOutcome::NoShare { peer } => {
            tracing::warn!("Port {}: {} connected but nothing was shared", port, peer);
        }
        TransferOutcome::Failed { peer, bytes, reason } => {
            tracing::warn!(
                "Port {}: transfer to {} failed after {} bytes: {}",
                port,
                peer,
                bytes,
                reason
            );
        }
        TransferOutcome::AcceptFailed { reason } => {
            tracing::warn!("Port {}: accept failed: {}", port, reason);
        }
        TransferOutcome::TimedOut => {
            tracing::info!("Port {}: no downloader before timeout", port);
        }
        TransferOutcome::Cancelled => {
            tracing::debug!("Port {}: share cancelled", port);
        }
    }
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
#[cfg(unix)]
async fn wait_for_shutdown_signal() -> anyhow::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM");
        }
        _ = sigint.recv() => {
            tracing::info!("Received SIGINT");
        }
    }

    Ok(())
}

/// Wait for Ctrl-C.
#[cfg(not(unix))]
async fn wait_for_shutdown_signal() -> anyhow::Result<()> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_fetch() {
        let cli = Cli::try_parse_from(["zipdrop", "fetch", "50000", "--output", "/tmp"]).unwrap();
        match cli.command {
            Commands::Fetch { port, host, output } => {
                assert_eq!(port, 50000);
                assert_eq!(host, "127.0.0.1");
                assert_eq!(output, PathBuf::from("/tmp"));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_cli_global_flags() {
        let cli =
            Cli::try_parse_from(["zipdrop", "share", "a.txt", "--verbose", "-c", "z.toml"]).unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.config, Some(PathBuf::from("z.toml")));
        assert!(matches!(cli.command, Commands::Share { timeout: None, .. }));
    }

    #[test]
    fn test_cli_start_port() {
        let cli = Cli::try_parse_from(["zipdrop", "start", "--port", "9000"]).unwrap();
        assert!(matches!(cli.command, Commands::Start { port: Some(9000) }));
    }
}
