//! The event log: the append-only, idempotent, authoritative record of
//! every event a projection worker has observed.
//!
//! # Dyn Compatibility
//!
//! This trait uses explicit `Pin<Box<dyn Future>>` returns instead of
//! `async fn` so it can be used as `Arc<dyn EventLog>` — the projection
//! worker and the HTTP handlers both hold a type-erased handle to whatever
//! concrete store is wired up in `service`.

use crate::envelope::{Envelope, EventType};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;
use uuid::Uuid;

/// Errors raised by an [`EventLog`] implementation.
#[derive(Error, Debug)]
pub enum EventLogError {
    /// A malformed query: negative offset, or `limit` outside `1..=200`.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// A transient storage failure. Callers on the consumer path must not
    /// commit the backbone offset when they see this.
    #[error("storage error: {0}")]
    Storage(String),
}

/// Outcome of [`EventLog::persist`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistOutcome {
    /// The envelope was new and has been durably recorded.
    Inserted,
    /// An envelope with this `event_id` was already present. Not an error:
    /// this is what makes at-least-once delivery safe.
    Duplicate,
}

/// Parameters for [`EventLog::query`]. Use [`EventQuery::try_new`] to get
/// a validated instance; the cap on `limit` is enforced there rather than
/// scattered across implementations.
#[derive(Debug, Clone)]
pub struct EventQuery {
    /// Workspace to query.
    pub workspace_id: String,
    /// Optional event-type filter.
    pub event_type: Option<EventType>,
    /// Inclusive lower timestamp bound.
    pub after: Option<DateTime<Utc>>,
    /// Inclusive upper timestamp bound.
    pub before: Option<DateTime<Utc>>,
    /// Page size, `1..=200`.
    pub limit: u32,
    /// Page offset, `>= 0`.
    pub offset: u32,
}

/// Upper bound on [`EventQuery::limit`].
pub const MAX_QUERY_LIMIT: u32 = 200;

impl EventQuery {
    /// Build a validated query.
    ///
    /// # Errors
    ///
    /// Returns [`EventLogError::InvalidRequest`] if `limit` is zero or
    /// exceeds [`MAX_QUERY_LIMIT`].
    pub fn try_new(
        workspace_id: String,
        event_type: Option<EventType>,
        after: Option<DateTime<Utc>>,
        before: Option<DateTime<Utc>>,
        limit: u32,
        offset: u32,
    ) -> Result<Self, EventLogError> {
        if limit == 0 || limit > MAX_QUERY_LIMIT {
            return Err(EventLogError::InvalidRequest(format!(
                "limit must be in 1..={MAX_QUERY_LIMIT}, got {limit}"
            )));
        }
        Ok(Self {
            workspace_id,
            event_type,
            after,
            before,
            limit,
            offset,
        })
    }
}

/// Append-only, idempotent store of every observed event.
pub trait EventLog: Send + Sync {
    /// Insert `envelope` keyed by `event_id`. A conflict on `event_id` is
    /// not an error — it returns [`PersistOutcome::Duplicate`].
    ///
    /// # Errors
    ///
    /// Returns [`EventLogError::Storage`] on a transient storage failure.
    /// Callers must not commit a backbone offset in response to this.
    fn persist(
        &self,
        envelope: Envelope,
    ) -> Pin<Box<dyn Future<Output = Result<PersistOutcome, EventLogError>> + Send + '_>>;

    /// Paginated, filtered query, ascending by `ts`.
    ///
    /// # Errors
    ///
    /// Returns [`EventLogError::Storage`] on a transient storage failure.
    fn query(
        &self,
        query: EventQuery,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Envelope>, EventLogError>> + Send + '_>>;

    /// All events for a workspace, optionally filtered by type and a lower
    /// timestamp bound, ascending by `ts`, unpaginated. Used for replay.
    ///
    /// # Errors
    ///
    /// Returns [`EventLogError::Storage`] on a transient storage failure.
    fn get_workspace_events(
        &self,
        workspace_id: &str,
        event_types: Option<&[EventType]>,
        after_ts: Option<DateTime<Utc>>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Envelope>, EventLogError>> + Send + '_>>;

    /// Count of events sharing `trace_id` in `workspace_id` with `ts >=
    /// since`. Feeds the promotion evaluator's reference-count rule.
    ///
    /// # Errors
    ///
    /// Returns [`EventLogError::Storage`] on a transient storage failure.
    fn count_references(
        &self,
        workspace_id: &str,
        trace_id: Uuid,
        since: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<u64, EventLogError>> + Send + '_>>;

    /// Whether any event of `event_type` exists in `trace_id` within
    /// `workspace_id`. Feeds the promotion evaluator's decision-in-trace
    /// rule.
    ///
    /// # Errors
    ///
    /// Returns [`EventLogError::Storage`] on a transient storage failure.
    fn has_event_type_in_trace(
        &self,
        workspace_id: &str,
        trace_id: Uuid,
        event_type: EventType,
    ) -> Pin<Box<dyn Future<Output = Result<bool, EventLogError>> + Send + '_>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_rejects_zero_limit() {
        let err = EventQuery::try_new("ws".to_string(), None, None, None, 0, 0).unwrap_err();
        assert!(matches!(err, EventLogError::InvalidRequest(_)));
    }

    #[test]
    fn query_rejects_limit_over_cap() {
        let err =
            EventQuery::try_new("ws".to_string(), None, None, None, 201, 0).unwrap_err();
        assert!(matches!(err, EventLogError::InvalidRequest(_)));
    }

    #[test]
    fn query_accepts_cap_boundary() {
        let q = EventQuery::try_new("ws".to_string(), None, None, None, 200, 0).unwrap();
        assert_eq!(q.limit, 200);
    }
}
