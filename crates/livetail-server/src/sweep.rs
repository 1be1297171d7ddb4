//! Periodic sweep that fails sessions whose producer vanished.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::storage::{DatabaseError, StreamDatabase};

/// How often the sweep runs.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Fail Active sessions with no chunk activity for `idle_secs`.
pub async fn sweep_once(db: &StreamDatabase, idle_secs: u64) -> Result<u64, DatabaseError> {
    let failed = db.fail_stale_sessions(idle_secs).await?;
    if failed > 0 {
        info!(failed, idle_secs, "Failed stale sessions");
    }
    Ok(failed)
}

/// Run [`sweep_once`] every `every` until `shutdown` is cancelled.
pub fn spawn_stale_sweep(
    db: StreamDatabase,
    idle_secs: u64,
    every: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.tick().await; // Skip first immediate tick
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(e) = sweep_once(&db, idle_secs).await {
                        warn!(error = %e, "Stale session sweep failed");
                    }
                }
            }
        }
    })
}
