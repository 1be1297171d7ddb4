//! Session lifecycle and chunk ingestion.
//!
//! These are the operations behind `POST /session` and `POST /push`. They
//! validate input and translate store outcomes into [`ApiError`]s, so they
//! can be exercised without an HTTP layer.

use livetail_core::codec::decode_chunk;
use livetail_core::protocol::PushChunkRequest;
use tracing::{debug, info, warn};

use crate::error::ApiError;
use crate::storage::{DatabaseError, EndSessionOutcome, Session, SessionStatus, StreamDatabase};

/// Open a new Active session for `producer_ref`.
///
/// Prunes so that at most `retention` sessions exist after the insert, and
/// fails any session still Active from an earlier run.
pub async fn start_session(
    db: &StreamDatabase,
    producer_ref: i64,
    retention: u32,
) -> Result<Session, ApiError> {
    let keep = retention.max(1) - 1;
    let pruned = db.prune_old_sessions(keep).await?;
    if pruned > 0 {
        info!(pruned, keep, "Pruned old sessions");
    }

    let superseded = db.fail_active_sessions().await?;
    if superseded > 0 {
        warn!(superseded, "Failed lingering active sessions");
    }

    let session = db.create_session(producer_ref).await?;
    info!(session_id = %session.id, producer_ref, "Session started");
    Ok(session)
}

/// Move a session to `completed` or `failed`.
pub async fn end_session(
    db: &StreamDatabase,
    session_id: &str,
    status: SessionStatus,
) -> Result<Session, ApiError> {
    if !status.is_terminal() {
        return Err(ApiError::BadRequest(format!(
            "Invalid end status: {status} (expected completed or failed)"
        )));
    }

    match db.end_session(session_id, status).await {
        Ok(EndSessionOutcome::Ended(session)) => {
            info!(session_id, %status, "Session ended");
            Ok(session)
        }
        Ok(EndSessionOutcome::AlreadyTerminal(session)) => Err(ApiError::Conflict(format!(
            "Session {session_id} already ended with status {}",
            session.status
        ))),
        Err(DatabaseError::NotFound(_)) => Err(ApiError::NotFound(format!(
            "Session {session_id} not found"
        ))),
        Err(e) => Err(e.into()),
    }
}

/// Store one pushed chunk. Returns the accepted sequence.
///
/// The store only accepts the chunk while the session is Active; a rejected
/// write is then reported as missing (404) or not active (400).
pub async fn push_chunk(db: &StreamDatabase, req: &PushChunkRequest) -> Result<u64, ApiError> {
    let sequence = i64::try_from(req.sequence)
        .map_err(|_| ApiError::BadRequest(format!("Sequence {} out of range", req.sequence)))?;
    let content = decode_chunk(&req.content)
        .map_err(|e| ApiError::BadRequest(format!("Invalid chunk content: {e}")))?;

    if db.append_chunk(&req.session_id, sequence, &content).await? {
        debug!(session_id = %req.session_id, sequence, bytes = content.len(), "Chunk stored");
        return Ok(req.sequence);
    }

    match db.get_session(&req.session_id).await? {
        None => Err(ApiError::NotFound(format!(
            "Session {} not found",
            req.session_id
        ))),
        Some(session) => {
            debug!(session_id = %session.id, status = %session.status, sequence, "Chunk rejected");
            Err(ApiError::BadRequest(format!(
                "Session {} is not active (status: {})",
                session.id, session.status
            )))
        }
    }
}
