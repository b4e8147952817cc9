//! `PostgreSQL`-backed [`MemoryStore`].

use crate::row::memory_entry_from_row;
use clawderpunk_core::memory::{EntryStatus, MemoryEntry};
use clawderpunk_core::memory_store::{
    EntryQuery, MemoryStore, MemoryStoreError, UpdateOutcome, UpsertOutcome,
};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::future::Future;
use std::pin::Pin;
use uuid::Uuid;

/// `PostgreSQL`-backed memory store.
pub struct PostgresMemoryStore {
    pool: PgPool,
}

impl PostgresMemoryStore {
    /// Construct from an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl MemoryStore for PostgresMemoryStore {
    fn create_entry(
        &self,
        entry: MemoryEntry,
    ) -> Pin<Box<dyn Future<Output = Result<UpsertOutcome, MemoryStoreError>> + Send + '_>> {
        Box::pin(async move {
            let value = serde_json::Value::Object(entry.value.clone());
            let (promoted_at, retracted_at) = match &entry.status {
                EntryStatus::Promoted { promoted_at } => (Some(*promoted_at), None),
                EntryStatus::Retracted { retracted_at } => (None, Some(*retracted_at)),
                EntryStatus::Candidate => (None, None),
            };

            let result = sqlx::query(
                r"
                INSERT INTO memory_entries (
                    entry_id, workspace_id, bucket, key, value, status, confidence,
                    source_event_id, promoted_at, retracted_at, expires_at,
                    created_at, updated_at
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
                ON CONFLICT (source_event_id) DO NOTHING
                ",
            )
            .bind(entry.entry_id)
            .bind(&entry.workspace_id)
            .bind(entry.bucket.as_str())
            .bind(&entry.key)
            .bind(value)
            .bind(entry.status.as_str())
            .bind(entry.confidence)
            .bind(entry.source_event_id)
            .bind(promoted_at)
            .bind(retracted_at)
            .bind(entry.expires_at)
            .bind(entry.created_at)
            .bind(entry.updated_at)
            .execute(&self.pool)
            .await
            .map_err(|e| MemoryStoreError::Storage(e.to_string()))?;

            if result.rows_affected() == 0 {
                Ok(UpsertOutcome::Duplicate)
            } else {
                Ok(UpsertOutcome::Inserted)
            }
        })
    }

    fn update_status(
        &self,
        entry_id: Uuid,
        new_status: EntryStatus,
        ts: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<UpdateOutcome, MemoryStoreError>> + Send + '_>> {
        Box::pin(async move {
            let status_str = new_status.as_str();
            let promoted_at = matches!(new_status, EntryStatus::Promoted { .. }).then_some(ts);
            let retracted_at = matches!(new_status, EntryStatus::Retracted { .. }).then_some(ts);

            let result = sqlx::query(
                r"
                UPDATE memory_entries
                SET status = $2,
                    promoted_at = COALESCE($3, promoted_at),
                    retracted_at = COALESCE($4, retracted_at),
                    updated_at = $5
                WHERE entry_id = $1
                ",
            )
            .bind(entry_id)
            .bind(status_str)
            .bind(promoted_at)
            .bind(retracted_at)
            .bind(ts)
            .execute(&self.pool)
            .await
            .map_err(|e| MemoryStoreError::Storage(e.to_string()))?;

            if result.rows_affected() == 0 {
                Ok(UpdateOutcome::NotFound)
            } else {
                Ok(UpdateOutcome::Updated)
            }
        })
    }

    fn get_entries(
        &self,
        query: EntryQuery,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<MemoryEntry>, MemoryStoreError>> + Send + '_>> {
        Box::pin(async move {
            let status = query.effective_status().to_string();
            let bucket = query.bucket.map(|b| b.as_str());
            let rows = sqlx::query(
                r"
                SELECT entry_id, workspace_id, bucket, key, value, status, confidence,
                       source_event_id, promoted_at, retracted_at, expires_at,
                       created_at, updated_at
                FROM memory_entries
                WHERE workspace_id = $1
                  AND status = $2
                  AND ($3::text IS NULL OR bucket = $3)
                  AND ($4 OR expires_at IS NULL OR expires_at > now())
                ORDER BY updated_at DESC
                ",
            )
            .bind(&query.workspace_id)
            .bind(&status)
            .bind(bucket)
            .bind(query.include_expired)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| MemoryStoreError::Storage(e.to_string()))?;

            rows.iter().map(memory_entry_from_row).collect()
        })
    }

    fn delete_workspace_entries(
        &self,
        workspace_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<u64, MemoryStoreError>> + Send + '_>> {
        let workspace_id = workspace_id.to_string();
        Box::pin(async move {
            let result = sqlx::query("DELETE FROM memory_entries WHERE workspace_id = $1")
                .bind(&workspace_id)
                .execute(&self.pool)
                .await
                .map_err(|e| MemoryStoreError::Storage(e.to_string()))?;
            Ok(result.rows_affected())
        })
    }
}
