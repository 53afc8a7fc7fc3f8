//! Pointscan - an offline-first point-of-sale scanning client.
//!
//! Scans from a keyboard-emulating barcode/QR scanner are queued on this
//! device and submitted to the store's accounting endpoint on demand.

mod commands;

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use pointscan_core::{DataDir, Station};

/// How long to wait for the last-sync notice before exiting
const SHUTDOWN_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Parser)]
#[command(name = "pointscan", version, about = "Queue member scans offline, sync them when online")]
struct Cli {
    /// Directory holding the queue, settings and cached assets
    #[arg(long, global = true, env = "POINTSCAN_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Write logs to this file instead of stderr
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Read scans from stdin, one per line (`:sync` syncs in between)
    Scan,
    /// Queue a single member identifier
    Add { member_id: String },
    /// Submit every queued scan to the endpoint
    Sync,
    /// Show queued scans
    List,
    /// Show queue size, device identity, last sync and settings
    Status,
    /// Update endpoint settings
    Config {
        /// Endpoint address (must end with /exec)
        #[arg(long)]
        endpoint: Option<String>,
        /// Store identifier
        #[arg(long)]
        store_id: Option<String>,
        /// Points credited per scan
        #[arg(long)]
        points: Option<u32>,
    },
    /// Discard queue, settings and device identity
    Reset {
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
    /// Manage the offline app-shell cache
    Assets {
        #[command(subcommand)]
        command: AssetsCommand,
    },
}

#[derive(Debug, Subcommand)]
enum AssetsCommand {
    /// Pre-fetch the app shell into the current cache
    Install {
        #[arg(long)]
        origin: String,
    },
    /// Delete caches left by older versions
    Activate,
    /// Fetch one asset, from cache when possible
    Get {
        #[arg(long)]
        origin: String,
        path: String,
    },
}

/// Initialize the tracing subscriber for logging
fn init_tracing(log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    match log_file {
        Some(path) => {
            let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
            let name = path
                .file_name()
                .context("log file path has no file name")?;
            let appender = tracing_appender::rolling::never(dir, name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(writer).with_ansi(false))
                .with(filter)
                .init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(io::stderr))
                .with(filter)
                .init();
            Ok(None)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let _log_guard = init_tracing(cli.log_file.as_deref())?;

    let data_dir = DataDir::resolve(cli.data_dir).context("Failed to resolve data directory")?;
    let mut station = Station::open(data_dir)
        .await
        .context("Failed to open station")?;
    info!("Pointscan starting");

    let result = match cli.command {
        Command::Scan => commands::scan_loop(&station).await,
        Command::Add { member_id } => commands::add(&station, &member_id).await,
        Command::Sync => commands::sync(&station).await,
        Command::List => commands::list(&station).await,
        Command::Status => commands::status(&station).await,
        Command::Config {
            endpoint,
            store_id,
            points,
        } => commands::configure(&mut station, endpoint, store_id, points),
        Command::Reset { yes } => commands::reset(&mut station, yes).await,
        Command::Assets { command } => match command {
            AssetsCommand::Install { origin } => commands::assets_install(&station, &origin).await,
            AssetsCommand::Activate => commands::assets_activate(&station).await,
            AssetsCommand::Get { origin, path } => {
                commands::assets_get(&station, &origin, &path).await
            }
        },
    };

    // The runtime aborts pending tasks on exit
    station.flush_background(SHUTDOWN_FLUSH_TIMEOUT).await;
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_config_flags() {
        let cli = Cli::try_parse_from([
            "pointscan",
            "--data-dir",
            "/tmp/scan",
            "config",
            "--endpoint",
            "https://example.com/exec",
            "--points",
            "5",
        ])
        .unwrap();
        assert_eq!(cli.data_dir, Some(PathBuf::from("/tmp/scan")));
        match cli.command {
            Command::Config {
                endpoint,
                store_id,
                points,
            } => {
                assert_eq!(endpoint.as_deref(), Some("https://example.com/exec"));
                assert_eq!(store_id, None);
                assert_eq!(points, Some(5));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_assets_get() {
        let cli =
            Cli::try_parse_from(["pointscan", "assets", "get", "--origin", "https://x.test", "/app.js"])
                .unwrap();
        assert!(matches!(
            cli.command,
            Command::Assets {
                command: AssetsCommand::Get { ref path, .. }
            } if path == "/app.js"
        ));
    }
}
