//! The memory store: the materialised view of memory entries.
//!
//! # Dyn Compatibility
//!
//! As with [`crate::event_log::EventLog`], this trait returns
//! `Pin<Box<dyn Future>>` so it can be held as `Arc<dyn MemoryStore>`.

use crate::memory::{Bucket, EntryStatus, MemoryEntry};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;
use uuid::Uuid;

/// Errors raised by a [`MemoryStore`] implementation.
#[derive(Error, Debug)]
pub enum MemoryStoreError {
    /// A transient storage failure.
    #[error("storage error: {0}")]
    Storage(String),
}

/// Outcome of [`MemoryStore::create_entry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// The entry was new.
    Inserted,
    /// An entry with this `source_event_id` already existed.
    Duplicate,
}

/// Outcome of [`MemoryStore::update_status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The entry was found and its status updated.
    Updated,
    /// No entry with that id exists.
    NotFound,
}

/// Parameters for [`MemoryStore::get_entries`].
#[derive(Debug, Clone)]
pub struct EntryQuery {
    /// Workspace to query.
    pub workspace_id: String,
    /// Optional bucket filter.
    pub bucket: Option<Bucket>,
    /// Optional status filter; the default filter (`None`) means
    /// `promoted` per §4.2 — handled by implementations, not encoded here,
    /// so the caller can distinguish "no filter was given" from
    /// "caller asked for the promoted status explicitly".
    pub status: Option<&'static str>,
    /// Whether to include entries whose `expires_at <= now`.
    pub include_expired: bool,
}

impl EntryQuery {
    /// The status to filter by when the caller did not specify one: the
    /// spec's `promoted` default.
    pub const DEFAULT_STATUS: &'static str = "promoted";

    /// The effective status filter, applying the default when none was
    /// given.
    #[must_use]
    pub fn effective_status(&self) -> &str {
        self.status.unwrap_or(Self::DEFAULT_STATUS)
    }
}

/// Materialised view of memory entries plus their lifecycle.
pub trait MemoryStore: Send + Sync {
    /// Insert `entry`. A conflict on `source_event_id` is not an error —
    /// it returns [`UpsertOutcome::Duplicate`].
    ///
    /// # Errors
    ///
    /// Returns [`MemoryStoreError::Storage`] on a transient storage
    /// failure.
    fn create_entry(
        &self,
        entry: MemoryEntry,
    ) -> Pin<Box<dyn Future<Output = Result<UpsertOutcome, MemoryStoreError>> + Send + '_>>;

    /// Transition the entry identified by `entry_id` to `new_status`,
    /// stamping its terminal timestamp with `ts`. Transitions from any
    /// current status are accepted; the last applied terminal state wins
    /// when replaying in order.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryStoreError::Storage`] on a transient storage
    /// failure.
    fn update_status(
        &self,
        entry_id: Uuid,
        new_status: EntryStatus,
        ts: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<UpdateOutcome, MemoryStoreError>> + Send + '_>>;

    /// Query entries for a workspace. Unless `include_expired`, rows whose
    /// `expires_at <= now` are excluded.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryStoreError::Storage`] on a transient storage
    /// failure.
    fn get_entries(
        &self,
        query: EntryQuery,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<MemoryEntry>, MemoryStoreError>> + Send + '_>>;

    /// Delete every entry for `workspace_id`. Used only by replay.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryStoreError::Storage`] on a transient storage
    /// failure.
    fn delete_workspace_entries(
        &self,
        workspace_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<u64, MemoryStoreError>> + Send + '_>>;
}
