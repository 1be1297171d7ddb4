//! Session queries for the livetail store.

use livetail_core::db::unix_timestamp;

use super::db::{DatabaseError, StreamDatabase};
use super::{Session, SessionStatus};

/// Result of asking the store to end a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndSessionOutcome {
    /// The session moved from Active to the requested status.
    Ended(Session),
    /// The session was already terminal; nothing changed.
    AlreadyTerminal(Session),
}

impl StreamDatabase {
    /// Create a new Active session and return it.
    pub async fn create_session(&self, producer_ref: i64) -> Result<Session, DatabaseError> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = unix_timestamp();

        sqlx::query(
            "INSERT INTO sessions (id, producer_ref, started_at, status) VALUES (?, ?, ?, 'active')",
        )
        .bind(&id)
        .bind(producer_ref)
        .bind(now)
        .execute(self.pool())
        .await?;

        self.get_session(&id)
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("Session {id}")))
    }

    /// Move an Active session to a terminal status.
    ///
    /// The update only matches Active rows, so a session transitions at most
    /// once even when two end requests race.
    pub async fn end_session(
        &self,
        id: &str,
        status: SessionStatus,
    ) -> Result<EndSessionOutcome, DatabaseError> {
        let result = sqlx::query(
            "UPDATE sessions SET status = ?, ended_at = ? WHERE id = ? AND status = 'active'",
        )
        .bind(status.as_str())
        .bind(unix_timestamp())
        .bind(id)
        .execute(self.pool())
        .await?;

        let session = self
            .get_session(id)
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("Session {id}")))?;

        if result.rows_affected() > 0 {
            Ok(EndSessionOutcome::Ended(session))
        } else {
            Ok(EndSessionOutcome::AlreadyTerminal(session))
        }
    }

    /// Get a session by ID.
    pub async fn get_session(&self, id: &str) -> Result<Option<Session>, DatabaseError> {
        let session = sqlx::query_as::<_, Session>("SELECT * FROM sessions WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;

        Ok(session)
    }

    /// The most recently started Active session, if any.
    pub async fn get_active_session(&self) -> Result<Option<Session>, DatabaseError> {
        let session = sqlx::query_as::<_, Session>(
            "SELECT * FROM sessions WHERE status = 'active' ORDER BY started_at DESC, rowid DESC LIMIT 1",
        )
        .fetch_optional(self.pool())
        .await?;

        Ok(session)
    }

    /// The most recently ended session. Active sessions are never returned.
    pub async fn get_latest_session(&self) -> Result<Option<Session>, DatabaseError> {
        let session = sqlx::query_as::<_, Session>(
            r"
            SELECT * FROM sessions WHERE status != 'active'
            ORDER BY ended_at DESC, started_at DESC, rowid DESC LIMIT 1
            ",
        )
        .fetch_optional(self.pool())
        .await?;

        Ok(session)
    }

    /// Delete all but the newest `keep_count` sessions. Chunks go with them.
    pub async fn prune_old_sessions(&self, keep_count: u32) -> Result<u64, DatabaseError> {
        let result = sqlx::query(
            r"
            DELETE FROM sessions WHERE id NOT IN (
                SELECT id FROM sessions ORDER BY started_at DESC, rowid DESC LIMIT ?
            )
            ",
        )
        .bind(i64::from(keep_count))
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected())
    }

    /// Mark every Active session Failed. Returns how many were changed.
    pub async fn fail_active_sessions(&self) -> Result<u64, DatabaseError> {
        let result = sqlx::query(
            "UPDATE sessions SET status = 'failed', ended_at = ? WHERE status = 'active'",
        )
        .bind(unix_timestamp())
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected())
    }

    /// Fail Active sessions whose newest chunk (or start, when they have
    /// none) is older than `idle_secs`.
    #[allow(clippy::cast_possible_wrap)]
    pub async fn fail_stale_sessions(&self, idle_secs: u64) -> Result<u64, DatabaseError> {
        let now = unix_timestamp();
        let cutoff = now - idle_secs as i64;

        let result = sqlx::query(
            r"
            UPDATE sessions SET status = 'failed', ended_at = ?
            WHERE status = 'active'
              AND COALESCE(
                    (SELECT MAX(created_at) FROM chunks WHERE chunks.session_id = sessions.id),
                    started_at
                  ) < ?
            ",
        )
        .bind(now)
        .bind(cutoff)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected())
    }

    /// Count stored sessions.
    pub async fn count_sessions(&self) -> Result<i64, DatabaseError> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM sessions")
            .fetch_one(self.pool())
            .await?;

        Ok(row.0)
    }
}
