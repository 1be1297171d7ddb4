//! Schedule queries: the out-of-band "next check" timestamp.

use livetail_core::db::unix_timestamp;

use super::db::{DatabaseError, StreamDatabase};

const NEXT_CHECK_KEY: &str = "next_check";

impl StreamDatabase {
    /// Current next-check timestamp, if one is scheduled.
    pub async fn get_next_check(&self) -> Result<Option<i64>, DatabaseError> {
        let row: Option<(Option<i64>,)> =
            sqlx::query_as("SELECT value FROM schedule WHERE key = ?")
                .bind(NEXT_CHECK_KEY)
                .fetch_optional(self.pool())
                .await?;

        Ok(row.and_then(|(value,)| value))
    }

    /// Set or clear (`None`) the next-check timestamp.
    pub async fn set_next_check(&self, next_check_at: Option<i64>) -> Result<(), DatabaseError> {
        sqlx::query(
            r"
            INSERT INTO schedule (key, value, updated_at) VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            ",
        )
        .bind(NEXT_CHECK_KEY)
        .bind(next_check_at)
        .bind(unix_timestamp())
        .execute(self.pool())
        .await?;

        Ok(())
    }
}
