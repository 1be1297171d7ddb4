//! livetail server
//!
//! Session ingestion, `SQLite` session store, and SSE broadcast.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use livetail_core::config::{DEV_SHARED_SECRET, load_config};
use livetail_core::tracing_init::{default_filter, init_tracing};
use livetail_server::routes::{AppState, build_router};
use livetail_server::storage::StreamDatabase;
use livetail_server::sweep::{SWEEP_INTERVAL, spawn_stale_sweep};

#[derive(Parser, Debug)]
#[command(name = "livetail-server")]
#[command(version, about = "livetail server - output ingestion and SSE broadcast")]
struct Args {
    /// Path to a JSON config file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Address to listen on.
    #[arg(long)]
    addr: Option<String>,

    /// Path to SQLite database file.
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Shared secret required on write endpoints.
    #[arg(long, env = "LIVETAIL_SECRET")]
    secret: Option<String>,

    /// Number of sessions to keep.
    #[arg(long)]
    retention: Option<u32>,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long, env = "LIVETAIL_LOG_JSON")]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let mut config = load_config(args.config.as_deref())?;

    if let Some(addr) = args.addr {
        config.server.addr = addr;
    }
    if let Some(path) = args.db_path {
        config.server.database_path = Some(path);
    }
    if let Some(secret) = args.secret {
        config.server.shared_secret = Some(secret);
    }
    if let Some(retention) = args.retention {
        config.server.retention = retention;
    }

    init_tracing(
        &default_filter("livetail_server", &config.server.log_level),
        args.log_json,
    );

    info!(
        version = env!("CARGO_PKG_VERSION"),
        addr = %config.server.addr,
        retention = config.server.retention,
        "Starting livetail-server"
    );

    let secret = match config.server.shared_secret.take() {
        Some(secret) if !secret.is_empty() => {
            if secret == DEV_SHARED_SECRET {
                warn!("Using the development shared secret; set LIVETAIL_SECRET");
            }
            secret
        }
        _ => {
            warn!("No shared secret configured, falling back to the development secret");
            DEV_SHARED_SECRET.to_string()
        }
    };

    let db_path = match config.server.database_path.clone() {
        Some(path) => path,
        None => default_db_path()?,
    };
    info!(path = %db_path.display(), "Opening stream database");
    let db = StreamDatabase::open(&db_path).await?;

    let shutdown = CancellationToken::new();

    let sweep = spawn_stale_sweep(
        db.clone(),
        config.server.stale_session_secs,
        SWEEP_INTERVAL,
        shutdown.clone(),
    );

    let app = build_router(AppState {
        db,
        secret: Arc::from(secret),
        stream: config.stream.clone(),
        retention: config.server.retention,
        shutdown: shutdown.clone(),
    });

    let listener = tokio::net::TcpListener::bind(&config.server.addr).await?;
    info!(addr = %listener.local_addr()?, "HTTP server ready");

    tokio::spawn(wait_for_signal(shutdown.clone()));

    // Notify systemd that the server is ready to serve (unix only).
    #[cfg(unix)]
    sd_notify::notify(true, &[sd_notify::NotifyState::Ready])?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.clone().cancelled_owned())
        .await?;

    shutdown.cancel();
    if let Err(e) = sweep.await {
        warn!(error = %e, "Stale sweep task failed");
    }
    info!("livetail-server stopped");
    Ok(())
}

/// Cancel `shutdown` on Ctrl+C or SIGTERM.
async fn wait_for_signal(shutdown: CancellationToken) {
    #[cfg(unix)]
    let mut sigterm =
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(signal) => Some(signal),
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                None
            }
        };

    #[cfg(unix)]
    let sigterm_future = async {
        match sigterm.as_mut() {
            Some(signal) => {
                signal.recv().await;
            }
            None => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let sigterm_future = std::future::pending::<()>();

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C shutdown signal");
        }
        () = sigterm_future => {
            info!("Received SIGTERM shutdown signal");
        }
        () = shutdown.cancelled() => {}
    }
    shutdown.cancel();
}

fn default_db_path() -> anyhow::Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| anyhow::anyhow!("Cannot determine home directory"))?;
    Ok(home.join(".livetail").join("stream.db"))
}
