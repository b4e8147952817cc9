//! `PostgreSQL`-backed [`ProjectionCheckpoint`].

use clawderpunk_core::cursor::{ProjectionCheckpoint, ProjectionCheckpointError, ProjectionCursor};
use sqlx::PgPool;
use std::future::Future;
use std::pin::Pin;

/// `PostgreSQL`-backed projection checkpoint: a single row keyed by `id =
/// 1` (see the `projection_checkpoint` migration).
pub struct PostgresCheckpoint {
    pool: PgPool,
}

impl PostgresCheckpoint {
    /// Construct from an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl ProjectionCheckpoint for PostgresCheckpoint {
    fn load(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Option<ProjectionCursor>, ProjectionCheckpointError>> + Send + '_>>
    {
        Box::pin(async move {
            let row = sqlx::query_as::<_, (uuid::Uuid, chrono::DateTime<chrono::Utc>, chrono::DateTime<chrono::Utc>)>(
                "SELECT last_event_id, last_event_ts, updated_at FROM projection_checkpoint WHERE id = 1",
            )
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| ProjectionCheckpointError::Storage(e.to_string()))?;

            Ok(row.map(|(last_event_id, last_event_ts, updated_at)| ProjectionCursor {
                last_event_id,
                last_event_ts,
                updated_at,
            }))
        })
    }

    fn save(
        &self,
        cursor: ProjectionCursor,
    ) -> Pin<Box<dyn Future<Output = Result<(), ProjectionCheckpointError>> + Send + '_>> {
        Box::pin(async move {
            sqlx::query(
                r"
                INSERT INTO projection_checkpoint (id, last_event_id, last_event_ts, updated_at)
                VALUES (1, $1, $2, $3)
                ON CONFLICT (id) DO UPDATE
                SET last_event_id = EXCLUDED.last_event_id,
                    last_event_ts = EXCLUDED.last_event_ts,
                    updated_at = EXCLUDED.updated_at
                ",
            )
            .bind(cursor.last_event_id)
            .bind(cursor.last_event_ts)
            .bind(cursor.updated_at)
            .execute(&self.pool)
            .await
            .map_err(|e| ProjectionCheckpointError::Storage(e.to_string()))?;

            Ok(())
        })
    }
}
