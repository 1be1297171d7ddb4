//! Run a child process and stream its output.
//!
//! stdout and stderr are read as raw bytes (no line splitting), echoed to
//! the local console when requested, and fed into the streaming session.

use std::process::Stdio;

use livetail_core::SessionStatus;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::session::StreamSession;

const READ_BUF_SIZE: usize = 8192;

/// Errors from running the child process.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("Failed to spawn command: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Failed to wait for command: {0}")]
    Wait(#[source] std::io::Error),
}

/// How a streamed run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOutcome {
    /// Exit code, `None` when the child was killed by a signal.
    pub exit_code: Option<i32>,
    pub status: SessionStatus,
}

/// Spawn `command`, stream its output into `session`, and end the session
/// Completed on exit code 0 or Failed otherwise.
///
/// With no session the command still runs; only the streaming is skipped.
/// A spawn failure ends the session as Failed before returning the error.
pub async fn run_streamed(
    mut command: Command,
    session: Option<StreamSession>,
    echo: bool,
) -> Result<RunOutcome, RunError> {
    command
        .stdin(Stdio::inherit())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(e) => {
            warn!(error = %e, "Command failed to start");
            finish(session, SessionStatus::Failed).await;
            return Err(RunError::Spawn(e));
        }
    };
    info!(pid = ?child.id(), "Command started");

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    pump(stdout, stderr, session.as_ref(), echo).await;

    let exit = match child.wait().await {
        Ok(exit) => exit,
        Err(e) => {
            finish(session, SessionStatus::Failed).await;
            return Err(RunError::Wait(e));
        }
    };

    let status = if exit.success() {
        SessionStatus::Completed
    } else {
        SessionStatus::Failed
    };
    info!(exit_code = ?exit.code(), %status, "Command finished");
    finish(session, status).await;

    Ok(RunOutcome {
        exit_code: exit.code(),
        status,
    })
}

async fn finish(session: Option<StreamSession>, status: SessionStatus) {
    let Some(session) = session else {
        return;
    };
    let session_id = session.session_id().to_string();
    if let Err(e) = session.finish(status).await {
        warn!(%session_id, error = %e, "Failed to end streaming session");
    }
}

/// Copy both pipes until they close.
async fn pump<O, E>(
    stdout: Option<O>,
    stderr: Option<E>,
    session: Option<&StreamSession>,
    echo: bool,
) where
    O: AsyncRead + Unpin,
    E: AsyncRead + Unpin,
{
    let mut console_out = tokio::io::stdout();
    let mut console_err = tokio::io::stderr();
    let mut out_buf = [0u8; READ_BUF_SIZE];
    let mut err_buf = [0u8; READ_BUF_SIZE];
    let mut stdout = stdout;
    let mut stderr = stderr;

    loop {
        let (read, from_stdout) = tokio::select! {
            r = read_some(stdout.as_mut(), &mut out_buf), if stdout.is_some() => (r, true),
            r = read_some(stderr.as_mut(), &mut err_buf), if stderr.is_some() => (r, false),
            else => break,
        };

        let n = match read {
            Ok(0) | Err(_) => {
                if from_stdout {
                    stdout = None;
                } else {
                    stderr = None;
                }
                continue;
            }
            Ok(n) => n,
        };

        let bytes = if from_stdout { &out_buf[..n] } else { &err_buf[..n] };
        if let Some(session) = session {
            session.write(bytes);
        }
        if echo {
            let result = if from_stdout {
                echo_bytes(&mut console_out, bytes).await
            } else {
                echo_bytes(&mut console_err, bytes).await
            };
            if let Err(e) = result {
                debug!(error = %e, "Console echo failed");
            }
        }
    }
}

async fn read_some<R: AsyncRead + Unpin>(
    reader: Option<&mut R>,
    buf: &mut [u8],
) -> std::io::Result<usize> {
    match reader {
        Some(reader) => reader.read(buf).await,
        None => Ok(0),
    }
}

async fn echo_bytes<W: AsyncWrite + Unpin>(out: &mut W, bytes: &[u8]) -> std::io::Result<()> {
    out.write_all(bytes).await?;
    out.flush().await
}
