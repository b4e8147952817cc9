//! The projection cursor: operational bookkeeping for the projection
//! worker, not a correctness mechanism.
//!
//! Correctness rides on the backbone's committed offset and on
//! per-event idempotency (§3); this cursor exists so an operator can see
//! how far the worker has progressed without inspecting consumer-group
//! internals.

use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;
use uuid::Uuid;

/// A single process-wide cursor record, advanced after each successfully
/// applied event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProjectionCursor {
    /// The `event_id` of the most recently applied event.
    pub last_event_id: Uuid,
    /// The `ts` of the most recently applied event.
    pub last_event_ts: DateTime<Utc>,
    /// When this cursor record was last written.
    pub updated_at: DateTime<Utc>,
}

impl ProjectionCursor {
    /// Construct a cursor advanced to `event_id`/`event_ts`, stamped with
    /// `now`.
    #[must_use]
    pub const fn advance(event_id: Uuid, event_ts: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        Self {
            last_event_id: event_id,
            last_event_ts: event_ts,
            updated_at: now,
        }
    }
}

/// Errors raised by a [`ProjectionCheckpoint`] implementation.
#[derive(Error, Debug)]
pub enum ProjectionCheckpointError {
    /// A transient storage failure.
    #[error("storage error: {0}")]
    Storage(String),
}

/// Persists and loads the [`ProjectionCursor`].
///
/// # Dyn Compatibility
///
/// Explicit `Pin<Box<dyn Future>>` returns so the projection worker can
/// hold this as `Arc<dyn ProjectionCheckpoint>`.
pub trait ProjectionCheckpoint: Send + Sync {
    /// Load the current cursor, if one has ever been written.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionCheckpointError::Storage`] on a transient
    /// storage failure.
    fn load(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Option<ProjectionCursor>, ProjectionCheckpointError>> + Send + '_>>;

    /// Persist `cursor`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionCheckpointError::Storage`] on a transient
    /// storage failure.
    fn save(
        &self,
        cursor: ProjectionCursor,
    ) -> Pin<Box<dyn Future<Output = Result<(), ProjectionCheckpointError>> + Send + '_>>;
}
