//! CLI entry point for the presence scanner.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, EnvFilter};

use presence_core::DeviceId;
use presence_store::{SessionFilter, SessionStore};

use presence_scan::config::ScanConfig;
use presence_scan::prober::{validate_target, NmapProber};
use presence_scan::scheduler::{run_cycle, ScanScheduler, SchedulerOptions};

#[derive(Parser)]
#[command(name = "presence")]
#[command(about = "Track which devices are present on a local network segment")]
#[command(version)]
struct Cli {
    /// Config file (default: presence.toml in the working directory, if any).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log progress at info level.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Override the database path from the config.
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Probe the range every period and record presence sessions.
    Scan {
        /// Address range to probe (CIDR notation, e.g. 192.168.1.0/24).
        address_range: String,

        /// Seconds between the starts of consecutive scans.
        period_seconds: u64,

        /// Run a single scan and exit.
        #[arg(long)]
        once: bool,
    },
    /// List known devices as JSON.
    Devices,
    /// List recorded sessions as JSON.
    Sessions {
        /// Only sessions of this device.
        #[arg(long)]
        device: Option<String>,

        /// Only sessions that are still open.
        #[arg(long)]
        open: bool,
    },
    /// Set the label of a known device.
    Label { device_id: String, label: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "info" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .json()
        .init();

    let config = ScanConfig::load(cli.config.as_deref())?;
    let db_path = cli
        .database
        .clone()
        .unwrap_or_else(|| PathBuf::from(&config.database_path));

    match cli.command {
        Command::Scan {
            address_range,
            period_seconds,
            once,
        } => scan(&config, db_path, &address_range, period_seconds, once).await,
        Command::Devices => {
            let store = open_store(db_path)?;
            println!("{}", serde_json::to_string_pretty(&store.devices()?)?);
            Ok(())
        }
        Command::Sessions { device, open } => {
            let store = open_store(db_path)?;
            let filter = SessionFilter {
                device_id: device.map(DeviceId::from),
                open_only: open,
            };
            println!("{}", serde_json::to_string_pretty(&store.sessions(&filter)?)?);
            Ok(())
        }
        Command::Label { device_id, label } => {
            let store = open_store(db_path)?;
            store.set_label(&DeviceId::from(device_id), &label)?;
            Ok(())
        }
    }
}

async fn scan(
    config: &ScanConfig,
    db_path: PathBuf,
    address_range: &str,
    period_seconds: u64,
    once: bool,
) -> anyhow::Result<()> {
    validate_target(address_range)?;
    if period_seconds == 0 {
        anyhow::bail!("Period must be at least one second");
    }
    ensure_privileges(config.require_root)?;

    let prober = NmapProber::new(&config.nmap_path);
    let version = prober.verify_installation().await?;
    tracing::info!(nmap_version = %version.lines().next().unwrap_or("").trim(), "Nmap verified");

    let store = open_store(db_path)?;

    if once {
        let outcome = run_cycle(&prober, &store, address_range, config.probe_timeout()).await?;
        println!(
            "{}",
            serde_json::json!({
                "opened": outcome.opened,
                "closed": outcome.closed,
                "continued": outcome.continued,
                "new_devices": outcome.new_devices,
            })
        );
        return Ok(());
    }

    let cancel_token = CancellationToken::new();
    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            tracing::error!(error = %e, "Error waiting for shutdown signal");
        }
        tracing::info!("Shutdown signal received");
        shutdown_token.cancel();
    });

    let options = SchedulerOptions {
        period: Duration::from_secs(period_seconds),
        max_concurrent_cycles: config.max_concurrent_cycles,
        probe_timeout: config.probe_timeout(),
    };
    let sched = ScanScheduler::new(
        Arc::new(prober),
        store,
        address_range,
        options,
        cancel_token,
    );
    sched.run().await?;

    Ok(())
}

fn open_store(path: PathBuf) -> anyhow::Result<SessionStore> {
    let store = SessionStore::open(path)?;
    store.ensure_schema()?;
    Ok(store)
}

/// ARP probing needs raw sockets; without them nmap silently falls back to
/// probes that report no MAC addresses.
fn ensure_privileges(require_root: bool) -> anyhow::Result<()> {
    if !require_root {
        return Ok(());
    }

    #[cfg(unix)]
    {
        // SAFETY: geteuid has no preconditions and cannot fail.
        let euid = unsafe { libc::geteuid() };
        if euid != 0 {
            anyhow::bail!(
                "Root privileges required for ARP probing (euid {euid}); \
                 rerun with sudo or set scan.require_root = false"
            );
        }
    }

    Ok(())
}

async fn wait_for_shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
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
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        tracing::info!("Received Ctrl+C");
    }

    Ok(())
}
