//! `PostgreSQL`-backed [`EventLog`].

use crate::row::envelope_from_row;
use clawderpunk_core::envelope::{Envelope, EventType};
use clawderpunk_core::event_log::{EventLog, EventLogError, EventQuery, PersistOutcome};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::future::Future;
use std::pin::Pin;
use uuid::Uuid;

/// `PostgreSQL`-backed event log.
pub struct PostgresEventLog {
    pool: PgPool,
}

impl PostgresEventLog {
    /// Construct from an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying pool, e.g. for the health check to run a trivial
    /// query against.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl EventLog for PostgresEventLog {
    fn persist(
        &self,
        envelope: Envelope,
    ) -> Pin<Box<dyn Future<Output = Result<PersistOutcome, EventLogError>> + Send + '_>> {
        Box::pin(async move {
            let payload = serde_json::Value::Object(envelope.payload().clone());
            let result = sqlx::query(
                r"
                INSERT INTO events (
                    event_id, schema_version, ts, workspace_id, satellite_id,
                    trace_id, event_type, severity, confidence, payload
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                ON CONFLICT (event_id) DO NOTHING
                ",
            )
            .bind(envelope.event_id())
            .bind(i32::try_from(envelope.schema_version()).unwrap_or(1))
            .bind(envelope.ts())
            .bind(envelope.workspace_id())
            .bind(envelope.satellite_id())
            .bind(envelope.trace_id())
            .bind(envelope.event_type().as_str())
            .bind(envelope.severity().as_str())
            .bind(envelope.confidence())
            .bind(payload)
            .execute(&self.pool)
            .await
            .map_err(|e| EventLogError::Storage(e.to_string()))?;

            if result.rows_affected() == 0 {
                tracing::debug!(event_id = %envelope.event_id(), "duplicate event, persist is a no-op");
                Ok(PersistOutcome::Duplicate)
            } else {
                Ok(PersistOutcome::Inserted)
            }
        })
    }

    fn query(
        &self,
        query: EventQuery,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Envelope>, EventLogError>> + Send + '_>> {
        Box::pin(async move {
            let rows = sqlx::query(
                r"
                SELECT event_id, schema_version, ts, workspace_id, satellite_id,
                       trace_id, event_type, severity, confidence, payload
                FROM events
                WHERE workspace_id = $1
                  AND ($2::text IS NULL OR event_type = $2)
                  AND ($3::timestamptz IS NULL OR ts >= $3)
                  AND ($4::timestamptz IS NULL OR ts <= $4)
                ORDER BY ts ASC
                LIMIT $5 OFFSET $6
                ",
            )
            .bind(&query.workspace_id)
            .bind(query.event_type.map(EventType::as_str))
            .bind(query.after)
            .bind(query.before)
            .bind(i64::from(query.limit))
            .bind(i64::from(query.offset))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| EventLogError::Storage(e.to_string()))?;

            rows.iter().map(envelope_from_row).collect()
        })
    }

    fn get_workspace_events(
        &self,
        workspace_id: &str,
        event_types: Option<&[EventType]>,
        after_ts: Option<DateTime<Utc>>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Envelope>, EventLogError>> + Send + '_>> {
        let workspace_id = workspace_id.to_string();
        let type_strs: Option<Vec<&'static str>> =
            event_types.map(|types| types.iter().map(|t| t.as_str()).collect());
        Box::pin(async move {
            let rows = sqlx::query(
                r"
                SELECT event_id, schema_version, ts, workspace_id, satellite_id,
                       trace_id, event_type, severity, confidence, payload
                FROM events
                WHERE workspace_id = $1
                  AND ($2::text[] IS NULL OR event_type = ANY($2))
                  AND ($3::timestamptz IS NULL OR ts >= $3)
                ORDER BY ts ASC
                ",
            )
            .bind(&workspace_id)
            .bind(type_strs.as_deref())
            .bind(after_ts)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| EventLogError::Storage(e.to_string()))?;

            rows.iter().map(envelope_from_row).collect()
        })
    }

    fn count_references(
        &self,
        workspace_id: &str,
        trace_id: Uuid,
        since: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<u64, EventLogError>> + Send + '_>> {
        let workspace_id = workspace_id.to_string();
        Box::pin(async move {
            let (count,): (i64,) = sqlx::query_as(
                r"
                SELECT COUNT(*) FROM events
                WHERE workspace_id = $1 AND trace_id = $2 AND ts >= $3
                ",
            )
            .bind(&workspace_id)
            .bind(trace_id)
            .bind(since)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| EventLogError::Storage(e.to_string()))?;

            Ok(count.max(0) as u64)
        })
    }

    fn has_event_type_in_trace(
        &self,
        workspace_id: &str,
        trace_id: Uuid,
        event_type: EventType,
    ) -> Pin<Box<dyn Future<Output = Result<bool, EventLogError>> + Send + '_>> {
        let workspace_id = workspace_id.to_string();
        Box::pin(async move {
            let (exists,): (bool,) = sqlx::query_as(
                r"
                SELECT EXISTS(
                    SELECT 1 FROM events
                    WHERE workspace_id = $1 AND trace_id = $2 AND event_type = $3
                )
                ",
            )
            .bind(&workspace_id)
            .bind(trace_id)
            .bind(event_type.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| EventLogError::Storage(e.to_string()))?;

            Ok(exists)
        })
    }
}
