use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use sluice_proxy::{CaptureBackingStore, InterceptionContexts, Proxy, ProxyConfig};
use sluice_storage::{
    CaptureLayout, CapturePaths, CaptureQuery, CaptureSort, CaptureWorker, CaptureWorkerStats,
    SqliteStore, spawn_capture_worker,
};
use tokio::sync::oneshot;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, Parser)]
#[command(name = "sluice-proxy-cli", about = "Transparent recording HTTP proxy")]
struct Cli {
    /// Directory holding sluice.toml, the capture database and certificates.
    #[arg(long = "capture-dir", default_value = ".sluice")]
    capture_dir: PathBuf,

    /// Overrides `listen.host` and `listen.port` from sluice.toml.
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Tunnel TLS ports without interception.
    #[arg(long = "no-tls")]
    no_tls: bool,

    #[arg(long = "log-level", default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Accept redirected connections and record their exchanges.
    Run,
    /// Print recorded requests, newest first.
    List {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        method: Option<String>,
        #[arg(long)]
        status: Option<u16>,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<(), String> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .init();

    let paths = CapturePaths::new(&cli.capture_dir, &CaptureLayout::default());
    paths.ensure_dirs()?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(&paths, cli.listen, cli.no_tls).await,
        Command::List {
            host,
            method,
            status,
            limit,
        } => list(
            &paths,
            CaptureQuery {
                host,
                method,
                status,
                limit,
                ..CaptureQuery::default()
            },
        ),
    }
}

async fn run(paths: &CapturePaths, listen: Option<SocketAddr>, no_tls: bool) -> Result<(), String> {
    let mut config = ProxyConfig::load_or_create(&paths.config).map_err(|err| err.to_string())?;
    if let Some(addr) = listen {
        config.listen.host = addr.ip().to_string();
        config.listen.port = addr.port();
    }
    if no_tls {
        config.tls.enabled = false;
    }

    let store = SqliteStore::open(&paths.database)?;
    let worker = spawn_capture_worker(
        Box::new(store),
        config.body_limits(),
        config.worker_config(),
    );
    let backing = Arc::new(CaptureBackingStore::new(
        worker.handle(),
        config.tls.https_ports.clone(),
    ));

    let tls = if config.tls.enabled {
        Some(
            InterceptionContexts::from_config(&config.tls, &paths.root)
                .map_err(|err| err.to_string())?,
        )
    } else {
        None
    };

    let proxy = Proxy::bind(config, tls, backing)
        .await
        .map_err(|err| err.to_string())?;

    proxy
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown requested");
        })
        .await
        .map_err(|err| {
            error!(error = %err, "proxy stopped");
            err.to_string()
        })?;

    let interrupt = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    match stop_worker(worker, SHUTDOWN_GRACE, interrupt).await? {
        WorkerExit::Drained(stats) => {
            info!(
                requests = stats.requests_written,
                responses = stats.responses_written,
                "capture worker stopped"
            );
            if stats.failed_writes > 0 {
                warn!(failed = stats.failed_writes, "store rejected some captures");
            }
        }
        WorkerExit::Abandoned { queued } => {
            warn!(queued, "connections still open; exiting without waiting for their captures");
        }
    }
    Ok(())
}

#[derive(Debug, PartialEq, Eq)]
enum WorkerExit {
    Drained(CaptureWorkerStats),
    Abandoned { queued: usize },
}

/// Waits for the writer thread to drain, for at most `grace` or until
/// `interrupt` resolves. Open connections hold worker handles, so the
/// thread may not finish on its own.
async fn stop_worker<F>(
    worker: CaptureWorker,
    grace: Duration,
    interrupt: F,
) -> Result<WorkerExit, String>
where
    F: Future<Output = ()>,
{
    let backlog = worker.backlog();
    let (done_tx, done_rx) = oneshot::channel();
    std::thread::spawn(move || {
        let _ = done_tx.send(worker.shutdown());
    });

    tokio::select! {
        joined = done_rx => {
            let stats = joined.map_err(|err| err.to_string())??;
            Ok(WorkerExit::Drained(stats))
        }
        _ = tokio::time::sleep(grace) => Ok(WorkerExit::Abandoned { queued: backlog.len() }),
        _ = interrupt => Ok(WorkerExit::Abandoned { queued: backlog.len() }),
    }
}

fn list(paths: &CapturePaths, query: CaptureQuery) -> Result<(), String> {
    let store = SqliteStore::open(&paths.database)?;
    let entries = store.query_requests(&query, CaptureSort::StartedAtDesc)?;
    for entry in entries {
        let status = entry
            .status_code
            .map(|code| code.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:>6}  {}  {:<7} {}  {}  {}",
            entry.id,
            entry.request.started_at,
            entry.request.method,
            status,
            entry.request.url,
            entry.request.destination,
        );
    }
    Ok(())
}
