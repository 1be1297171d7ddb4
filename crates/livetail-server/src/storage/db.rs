//! Session store handle and schema setup.

use std::path::Path;

use livetail_core::db::{Location, connect};
use sqlx::SqlitePool;
use tracing::info;

pub use livetail_core::db::DatabaseError;

/// Sessions, chunks and the schedule. Clones share one pool.
#[derive(Clone)]
pub struct StreamDatabase {
    pool: SqlitePool,
}

impl StreamDatabase {
    /// Open (or create) the store at `path` and bring the schema up to date.
    pub async fn open(path: &Path) -> Result<Self, DatabaseError> {
        let db = Self::migrated(connect(Location::File(path)).await?).await?;
        info!(path = %path.display(), "Stream database opened");
        Ok(db)
    }

    pub async fn open_in_memory() -> Result<Self, DatabaseError> {
        Self::migrated(connect(Location::Memory).await?).await
    }

    async fn migrated(pool: SqlitePool) -> Result<Self, DatabaseError> {
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| DatabaseError::Migration(e.to_string()))?;
        Ok(Self { pool })
    }

    pub const fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
