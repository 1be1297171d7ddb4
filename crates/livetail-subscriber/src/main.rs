//! livetail-watch
//!
//! Follows a livetail server's broadcast stream and prints the decoded output
//! to stdout. Connection state and session changes go to the log (stderr).

use std::path::PathBuf;

use clap::Parser;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use livetail_core::config::load_config;
use livetail_core::tracing_init::{default_filter, init_tracing};
use livetail_subscriber::{Subscriber, SubscriberOptions, SubscriberUpdate};

const UPDATE_QUEUE: usize = 256;

#[derive(Parser, Debug)]
#[command(name = "livetail-watch")]
#[command(version, about = "Watch the live output of a livetail server")]
struct Args {
    /// Path to a JSON config file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// livetail server URL.
    #[arg(long, env = "LIVETAIL_SERVER_URL")]
    server_url: Option<String>,

    /// Follow this session instead of the current one.
    #[arg(long)]
    session: Option<String>,

    /// Replay the session even if it is still active.
    #[arg(long)]
    replay: bool,

    /// Give up after this many consecutive failed connections.
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Log level when `RUST_LOG` is not set.
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long, env = "LIVETAIL_LOG_JSON")]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let mut config = load_config(args.config.as_deref())?;
    if let Some(url) = args.server_url {
        config.subscriber.server_url = url;
    }

    let filter = format!(
        "{},livetail_watch={}",
        default_filter("livetail_subscriber", &args.log_level),
        args.log_level
    );
    init_tracing(&filter, args.log_json);

    let mut options = SubscriberOptions::from(&config.subscriber);
    options.session_id = args.session;
    options.replay = args.replay;
    options.policy.max_attempts = args.max_attempts;

    let (tx, mut rx) = mpsc::channel(UPDATE_QUEUE);
    let mut subscriber = Subscriber::new(options, tx)?;
    info!(server_url = %config.subscriber.server_url, "Watching stream");

    let shutdown = CancellationToken::new();
    tokio::spawn(wait_for_ctrl_c(shutdown.clone()));

    let printer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(update) = rx.recv().await {
            if let Err(e) = print_update(&mut stdout, update).await {
                warn!(error = %e, "Failed to write output");
                break;
            }
        }
    });

    let result = subscriber.run(shutdown).await;
    drop(subscriber);
    let _ = printer.await;

    result.map_err(Into::into)
}

async fn print_update(
    stdout: &mut tokio::io::Stdout,
    update: SubscriberUpdate,
) -> std::io::Result<()> {
    match update {
        SubscriberUpdate::SessionStarted(session) => {
            info!(
                session_id = %session.id,
                producer_ref = session.producer_ref,
                status = %session.status,
                "Session"
            );
        }
        SubscriberUpdate::Output { text, .. } => {
            stdout.write_all(text.as_bytes()).await?;
            stdout.flush().await?;
        }
        SubscriberUpdate::SessionEnded { session_id, status } => {
            info!(%session_id, %status, "Session ended");
        }
        SubscriberUpdate::ReplayComplete {
            session_id,
            total_chunks,
        } => {
            info!(%session_id, total_chunks, "Replay complete");
        }
        SubscriberUpdate::NoSession => info!("No session yet, waiting"),
        SubscriberUpdate::Countdown(Some(at)) => info!(next_check_at = at, "Next run scheduled"),
        SubscriberUpdate::Countdown(None) => info!("Schedule cleared"),
    }
    Ok(())
}

async fn wait_for_ctrl_c(shutdown: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for ctrl-c");
        return;
    }
    info!("Interrupted, disconnecting");
    shutdown.cancel();
}
