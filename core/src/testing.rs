//! In-memory implementations of every store/backbone trait, for fast unit
//! tests of the projection engine without a database or a broker.
//!
//! Grounded on the same shape as an in-memory event store: a
//! `Mutex`-guarded `HashMap`, with no persistence across process restarts.
//! Only `cfg(test)` or the `testing` feature pulls this module in.

use crate::backbone::{Backbone, BackboneError, BackboneMessage, EventStream, MessageOffset};
use crate::cursor::{ProjectionCheckpoint, ProjectionCheckpointError, ProjectionCursor};
use crate::envelope::{Envelope, EventType};
use crate::event_log::{EventLog, EventLogError, EventQuery, PersistOutcome};
use crate::memory::{EntryStatus, MemoryEntry};
use crate::memory_store::{
    EntryQuery, MemoryStore, MemoryStoreError, UpdateOutcome, UpsertOutcome,
};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

/// In-memory [`EventLog`].
#[derive(Default)]
pub struct InMemoryEventLog {
    events: Mutex<HashMap<Uuid, Envelope>>,
}

impl InMemoryEventLog {
    /// Construct an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl EventLog for InMemoryEventLog {
    fn persist(
        &self,
        envelope: Envelope,
    ) -> Pin<Box<dyn Future<Output = Result<PersistOutcome, EventLogError>> + Send + '_>> {
        Box::pin(async move {
            let mut events = self.events.lock().unwrap_or_else(|e| e.into_inner());
            if events.contains_key(&envelope.event_id()) {
                return Ok(PersistOutcome::Duplicate);
            }
            events.insert(envelope.event_id(), envelope);
            Ok(PersistOutcome::Inserted)
        })
    }

    fn query(
        &self,
        query: EventQuery,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Envelope>, EventLogError>> + Send + '_>> {
        Box::pin(async move {
            let events = self.events.lock().unwrap_or_else(|e| e.into_inner());
            let mut matched: Vec<Envelope> = events
                .values()
                .filter(|e| e.workspace_id() == query.workspace_id)
                .filter(|e| query.event_type.is_none_or(|t| e.event_type() == t))
                .filter(|e| query.after.is_none_or(|a| e.ts() >= a))
                .filter(|e| query.before.is_none_or(|b| e.ts() <= b))
                .cloned()
                .collect();
            matched.sort_by_key(Envelope::ts);
            let start = query.offset as usize;
            let end = start.saturating_add(query.limit as usize);
            Ok(matched.into_iter().skip(start).take(end - start).collect())
        })
    }

    fn get_workspace_events(
        &self,
        workspace_id: &str,
        event_types: Option<&[EventType]>,
        after_ts: Option<DateTime<Utc>>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Envelope>, EventLogError>> + Send + '_>> {
        let workspace_id = workspace_id.to_string();
        let event_types = event_types.map(<[EventType]>::to_vec);
        Box::pin(async move {
            let events = self.events.lock().unwrap_or_else(|e| e.into_inner());
            let mut matched: Vec<Envelope> = events
                .values()
                .filter(|e| e.workspace_id() == workspace_id)
                .filter(|e| {
                    event_types
                        .as_ref()
                        .is_none_or(|types| types.contains(&e.event_type()))
                })
                .filter(|e| after_ts.is_none_or(|a| e.ts() >= a))
                .cloned()
                .collect();
            matched.sort_by_key(Envelope::ts);
            Ok(matched)
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
            let events = self.events.lock().unwrap_or_else(|e| e.into_inner());
            let count = events
                .values()
                .filter(|e| e.workspace_id() == workspace_id)
                .filter(|e| e.trace_id() == trace_id)
                .filter(|e| e.ts() >= since)
                .count();
            Ok(count as u64)
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
            let events = self.events.lock().unwrap_or_else(|e| e.into_inner());
            Ok(events.values().any(|e| {
                e.workspace_id() == workspace_id
                    && e.trace_id() == trace_id
                    && e.event_type() == event_type
            }))
        })
    }
}

/// In-memory [`MemoryStore`].
#[derive(Default)]
pub struct InMemoryMemoryStore {
    entries: Mutex<HashMap<Uuid, MemoryEntry>>,
}

impl InMemoryMemoryStore {
    /// Construct an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl MemoryStore for InMemoryMemoryStore {
    fn create_entry(
        &self,
        entry: MemoryEntry,
    ) -> Pin<Box<dyn Future<Output = Result<UpsertOutcome, MemoryStoreError>> + Send + '_>> {
        Box::pin(async move {
            let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
            let duplicate = entries
                .values()
                .any(|e| e.source_event_id == entry.source_event_id);
            if duplicate {
                return Ok(UpsertOutcome::Duplicate);
            }
            entries.insert(entry.entry_id, entry);
            Ok(UpsertOutcome::Inserted)
        })
    }

    fn update_status(
        &self,
        entry_id: Uuid,
        new_status: EntryStatus,
        ts: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<UpdateOutcome, MemoryStoreError>> + Send + '_>> {
        Box::pin(async move {
            let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
            let Some(entry) = entries.get_mut(&entry_id) else {
                return Ok(UpdateOutcome::NotFound);
            };
            entry.status = new_status;
            entry.updated_at = ts;
            Ok(UpdateOutcome::Updated)
        })
    }

    fn get_entries(
        &self,
        query: EntryQuery,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<MemoryEntry>, MemoryStoreError>> + Send + '_>> {
        Box::pin(async move {
            let now = Utc::now();
            let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
            let effective_status = query.effective_status().to_string();
            let matched: Vec<MemoryEntry> = entries
                .values()
                .filter(|e| e.workspace_id == query.workspace_id)
                .filter(|e| query.bucket.is_none_or(|b| e.bucket == b))
                .filter(|e| e.status.as_str() == effective_status)
                .filter(|e| query.include_expired || !e.is_expired(now))
                .cloned()
                .collect();
            Ok(matched)
        })
    }

    fn delete_workspace_entries(
        &self,
        workspace_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<u64, MemoryStoreError>> + Send + '_>> {
        let workspace_id = workspace_id.to_string();
        Box::pin(async move {
            let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
            let before = entries.len();
            entries.retain(|_, e| e.workspace_id != workspace_id);
            Ok((before - entries.len()) as u64)
        })
    }
}

/// In-memory [`ProjectionCheckpoint`].
#[derive(Default)]
pub struct InMemoryCheckpoint {
    cursor: Mutex<Option<ProjectionCursor>>,
}

impl InMemoryCheckpoint {
    /// Construct with no cursor written yet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProjectionCheckpoint for InMemoryCheckpoint {
    fn load(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Option<ProjectionCursor>, ProjectionCheckpointError>> + Send + '_>>
    {
        Box::pin(async move {
            Ok(*self.cursor.lock().unwrap_or_else(|e| e.into_inner()))
        })
    }

    fn save(
        &self,
        cursor: ProjectionCursor,
    ) -> Pin<Box<dyn Future<Output = Result<(), ProjectionCheckpointError>> + Send + '_>> {
        Box::pin(async move {
            *self.cursor.lock().unwrap_or_else(|e| e.into_inner()) = Some(cursor);
            Ok(())
        })
    }
}

/// In-memory [`Backbone`] backed by an unbounded channel per topic.
///
/// Partition key is accepted but ignored for ordering — a single channel
/// per topic already delivers in publish order, which is a superset of
/// what any real partitioning scheme guarantees for a single-process test.
pub struct InMemoryBackbone {
    topics: Mutex<HashMap<String, tokio::sync::mpsc::UnboundedSender<BackboneMessage>>>,
    next_offset: AtomicI64,
}

impl Default for InMemoryBackbone {
    fn default() -> Self {
        Self {
            topics: Mutex::new(HashMap::new()),
            next_offset: AtomicI64::new(0),
        }
    }
}

impl InMemoryBackbone {
    /// Construct a backbone with no topics yet subscribed.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Backbone for InMemoryBackbone {
    fn publish(
        &self,
        _partition_key: &[u8],
        payload: Vec<u8>,
    ) -> Pin<Box<dyn Future<Output = Result<(), BackboneError>> + Send + '_>> {
        Box::pin(async move {
            let offset = self.next_offset.fetch_add(1, Ordering::SeqCst);
            let topics = self.topics.lock().unwrap_or_else(|e| e.into_inner());
            for sender in topics.values() {
                let _ = sender.send(BackboneMessage {
                    payload: payload.clone(),
                    offset: MessageOffset {
                        partition: 0,
                        offset,
                    },
                });
            }
            Ok(())
        })
    }

    fn subscribe(
        &self,
        topic: &str,
        _consumer_group: &str,
    ) -> Pin<Box<dyn Future<Output = Result<EventStream, BackboneError>> + Send + '_>> {
        let topic = topic.to_string();
        Box::pin(async move {
            let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
            self.topics
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .insert(topic, tx);
            let stream = async_stream::stream! {
                while let Some(message) = rx.recv().await {
                    yield Ok(message);
                }
            };
            Ok(Box::pin(stream) as EventStream)
        })
    }

    fn commit(
        &self,
        _offset: &MessageOffset,
    ) -> Pin<Box<dyn Future<Output = Result<(), BackboneError>> + Send + '_>> {
        Box::pin(async move { Ok(()) })
    }

    fn partition_count(
        &self,
        topic: &str,
    ) -> Pin<Box<dyn Future<Output = Result<usize, BackboneError>> + Send + '_>> {
        let topic = topic.to_string();
        Box::pin(async move {
            let topics = self.topics.lock().unwrap_or_else(|e| e.into_inner());
            Ok(usize::from(topics.contains_key(&topic)))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn sample_envelope(workspace: &str) -> Envelope {
        Envelope::try_new(
            Uuid::new_v4(),
            Utc::now(),
            workspace.to_string(),
            "sat".to_string(),
            Uuid::new_v4(),
            EventType::TaskCreated,
            crate::envelope::Severity::Low,
            0.5,
            Map::new(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn persist_is_idempotent_by_event_id() {
        let log = InMemoryEventLog::new();
        let envelope = sample_envelope("ws-a");
        let first = log.persist(envelope.clone()).await.unwrap();
        let second = log.persist(envelope).await.unwrap();
        assert_eq!(first, PersistOutcome::Inserted);
        assert_eq!(second, PersistOutcome::Duplicate);
    }

    #[tokio::test]
    async fn create_entry_is_idempotent_by_source_event_id() {
        let store = InMemoryMemoryStore::new();
        let source_event_id = Uuid::new_v4();
        let entry = MemoryEntry::new_candidate(
            Uuid::new_v4(),
            "ws-a".to_string(),
            crate::memory::Bucket::Workspace,
            "k".to_string(),
            Map::new(),
            0.9,
            source_event_id,
            None,
            Utc::now(),
        )
        .unwrap();
        let first = store.create_entry(entry.clone()).await.unwrap();
        let second = store.create_entry(entry).await.unwrap();
        assert_eq!(first, UpsertOutcome::Inserted);
        assert_eq!(second, UpsertOutcome::Duplicate);
    }

    #[tokio::test]
    async fn backbone_round_trips_published_payload() {
        use futures::StreamExt;
        let backbone = InMemoryBackbone::new();
        let mut stream = backbone.subscribe("topic-a", "group-a").await.unwrap();
        backbone.publish(b"ws-a", b"hello".to_vec()).await.unwrap();
        let message = stream.next().await.unwrap().unwrap();
        assert_eq!(message.payload, b"hello");
        backbone.commit(&message.offset).await.unwrap();
    }
}
