//! Chunk queries for the livetail store.

use livetail_core::db::unix_timestamp;

use super::Chunk;
use super::db::{DatabaseError, StreamDatabase};

impl StreamDatabase {
    /// Append a chunk to an Active session. Re-appending the same
    /// `(session_id, sequence)` overwrites the stored content instead of
    /// duplicating it.
    ///
    /// The Active check is part of the insert, so a chunk can never land
    /// after the session's terminal transition. Returns `false` when the
    /// session is missing or no longer Active and nothing was written.
    pub async fn append_chunk(
        &self,
        session_id: &str,
        sequence: i64,
        content: &[u8],
    ) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            r"
            INSERT INTO chunks (session_id, sequence, content, created_at)
            SELECT ?, ?, ?, ?
            WHERE EXISTS (SELECT 1 FROM sessions WHERE id = ? AND status = 'active')
            ON CONFLICT(session_id, sequence) DO UPDATE SET content = excluded.content
            ",
        )
        .bind(session_id)
        .bind(sequence)
        .bind(content)
        .bind(unix_timestamp())
        .bind(session_id)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Chunks with `sequence > from_sequence`, in sequence order.
    pub async fn get_chunks_since(
        &self,
        session_id: &str,
        from_sequence: i64,
    ) -> Result<Vec<Chunk>, DatabaseError> {
        let chunks = sqlx::query_as::<_, Chunk>(
            "SELECT * FROM chunks WHERE session_id = ? AND sequence > ? ORDER BY sequence ASC",
        )
        .bind(session_id)
        .bind(from_sequence)
        .fetch_all(self.pool())
        .await?;

        Ok(chunks)
    }

    /// Every chunk of a session, in sequence order.
    pub async fn get_all_chunks(&self, session_id: &str) -> Result<Vec<Chunk>, DatabaseError> {
        let chunks = sqlx::query_as::<_, Chunk>(
            "SELECT * FROM chunks WHERE session_id = ? ORDER BY sequence ASC",
        )
        .bind(session_id)
        .fetch_all(self.pool())
        .await?;

        Ok(chunks)
    }

    /// Count chunks stored for a session.
    pub async fn count_chunks(&self, session_id: &str) -> Result<i64, DatabaseError> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM chunks WHERE session_id = ?")
            .bind(session_id)
            .fetch_one(self.pool())
            .await?;

        Ok(row.0)
    }
}
