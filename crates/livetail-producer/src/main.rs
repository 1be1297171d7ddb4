//! livetail-run
//!
//! Runs a command and streams its console output to a livetail server.
//!
//! ```text
//! livetail-run [--producer-ref N] -- cargo test --workspace
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tokio::process::Command;
use tracing::{info, warn};

use livetail_core::config::{DEV_SHARED_SECRET, load_config};
use livetail_core::tracing_init::{default_filter, init_tracing};
use livetail_producer::{BufferConfig, RunError, SessionClient, StreamSession, run_streamed};

/// Exit code reported when the command could not be started.
const EXIT_SPAWN_FAILED: u8 = 127;

#[derive(Parser, Debug)]
#[command(name = "livetail-run")]
#[command(version, about = "Run a command and stream its output to a livetail server")]
struct Args {
    /// Path to a JSON config file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Work item the run belongs to (0 for a non-work sync job).
    #[arg(long, default_value_t = 0)]
    producer_ref: i64,

    /// livetail server URL.
    #[arg(long, env = "LIVETAIL_SERVER_URL")]
    server_url: Option<String>,

    /// Shared secret for the ingestion API.
    #[arg(long, env = "LIVETAIL_SECRET")]
    secret: Option<String>,

    /// Do not echo the command's output to this terminal.
    #[arg(long)]
    quiet: bool,

    /// Log level when `RUST_LOG` is not set.
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long, env = "LIVETAIL_LOG_JSON")]
    log_json: bool,

    /// Command to run, followed by its arguments.
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();
    let mut config = load_config(args.config.as_deref())?;

    if let Some(url) = args.server_url {
        config.producer.server_url = url;
    }
    if let Some(secret) = args.secret {
        config.producer.shared_secret = Some(secret);
    }

    let filter = format!(
        "{},livetail_run={}",
        default_filter("livetail_producer", &args.log_level),
        args.log_level
    );
    init_tracing(&filter, args.log_json);

    if config.producer.shared_secret.as_deref().is_none_or(str::is_empty) {
        warn!("No shared secret configured, using the development secret");
        config.producer.shared_secret = Some(DEV_SHARED_SECRET.to_string());
    }

    let Some((program, program_args)) = args.command.split_first() else {
        anyhow::bail!("No command given");
    };
    let mut command = Command::new(program);
    command.args(program_args);

    let session = match SessionClient::new(&config.producer) {
        Ok(client) => {
            match StreamSession::start(client, args.producer_ref, BufferConfig::from(&config.producer))
                .await
            {
                Ok(session) => Some(session),
                Err(e) => {
                    warn!(error = %e, "Could not open streaming session, running without streaming");
                    None
                }
            }
        }
        Err(e) => {
            warn!(error = %e, "Invalid producer configuration, running without streaming");
            None
        }
    };

    info!(program = %program, producer_ref = args.producer_ref, "Running command");

    match run_streamed(command, session, !args.quiet).await {
        Ok(outcome) => {
            let code = outcome
                .exit_code
                .and_then(|c| u8::try_from(c).ok())
                .unwrap_or(1);
            Ok(ExitCode::from(code))
        }
        Err(RunError::Spawn(e)) => {
            warn!(program = %program, error = %e, "Command could not be started");
            Ok(ExitCode::from(EXIT_SPAWN_FAILED))
        }
        Err(e) => Err(e.into()),
    }
}
