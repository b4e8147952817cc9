//! The projection worker: a long-running consumer loop that decodes,
//! persists, and projects events from the backbone into the memory store.
//!
//! Grounded on the teacher's `ProjectionManager` for the shutdown-signal and
//! checkpoint-interval shape, generalised from a single-projection,
//! bincode-deserialised event bus to this service's envelope decoding,
//! idempotent persist-then-project pipeline, and auto-promotion sweep.

use crate::promotion::PromotionEvaluator;
use clawderpunk_core::backbone::Backbone;
use clawderpunk_core::cursor::{ProjectionCheckpoint, ProjectionCursor};
use clawderpunk_core::envelope::{Envelope, EventType, Severity};
use clawderpunk_core::event_log::{EventLog, EventLogError, PersistOutcome};
use clawderpunk_core::memory::{Bucket, EntryStatus, MemoryEntry};
use clawderpunk_core::memory_store::{EntryQuery, MemoryStore, MemoryStoreError};
use chrono::{Duration, Utc};
use serde_json::{Map, Value};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use uuid::Uuid;

/// Default ephemeral TTL, in hours, when `memory.candidate.payload.ttl_hours`
/// is absent.
const DEFAULT_TTL_HOURS: i64 = 24;

/// Errors raised while running the projection worker.
#[derive(Error, Debug)]
pub enum WorkerError {
    /// The backbone subscription could not be established.
    #[error("backbone subscription failed: {0}")]
    Subscribe(String),
    /// A store operation failed in a way that is not safely retried by
    /// redelivery (used only by [`ProjectionWorker::replay`], which runs
    /// synchronously rather than under at-least-once redelivery).
    #[error("store error: {0}")]
    Store(String),
}

impl From<EventLogError> for WorkerError {
    fn from(err: EventLogError) -> Self {
        Self::Store(err.to_string())
    }
}

impl From<MemoryStoreError> for WorkerError {
    fn from(err: MemoryStoreError) -> Self {
        Self::Store(err.to_string())
    }
}

/// Outcome of [`ProjectionWorker::replay`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplaySummary {
    /// Memory entries deleted before the rebuild.
    pub entries_deleted: u64,
    /// Events re-applied, ascending by `ts`.
    pub events_replayed: u64,
    /// Memory entries created by the rebuild.
    pub entries_created: u64,
}

/// Long-running consumer loop: decode -> persist -> project -> auto-promote
/// sweep -> advance cursor -> commit offset.
pub struct ProjectionWorker {
    backbone: Arc<dyn Backbone>,
    event_log: Arc<dyn EventLog>,
    memory_store: Arc<dyn MemoryStore>,
    checkpoint: Arc<dyn ProjectionCheckpoint>,
    evaluator: PromotionEvaluator,
    service_name: String,
    topic: String,
    consumer_group: String,
    /// Save the cursor every N successfully applied events.
    checkpoint_interval: u64,
    shutdown: watch::Receiver<bool>,
}

impl ProjectionWorker {
    /// Construct a worker. Returns the worker and a shutdown sender; send
    /// `true` to stop the consumer loop after the in-flight message
    /// finishes.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        backbone: Arc<dyn Backbone>,
        event_log: Arc<dyn EventLog>,
        memory_store: Arc<dyn MemoryStore>,
        checkpoint: Arc<dyn ProjectionCheckpoint>,
        service_name: impl Into<String>,
        topic: impl Into<String>,
        consumer_group: impl Into<String>,
    ) -> (Self, watch::Sender<bool>) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let evaluator = PromotionEvaluator::new(Arc::clone(&event_log));
        let worker = Self {
            backbone,
            event_log,
            memory_store,
            checkpoint,
            evaluator,
            service_name: service_name.into(),
            topic: topic.into(),
            consumer_group: consumer_group.into(),
            checkpoint_interval: 100,
            shutdown: shutdown_rx,
        };
        (worker, shutdown_tx)
    }

    /// Save the projection cursor every `interval` applied events instead of
    /// the default 100.
    #[must_use]
    pub const fn with_checkpoint_interval(mut self, interval: u64) -> Self {
        self.checkpoint_interval = interval;
        self
    }

    /// Run the consumer loop until the shutdown sender fires. Each message
    /// is handled to completion before the next is polled; no partial
    /// message is ever committed.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::Subscribe`] if the initial subscription fails.
    /// Per-message store errors are logged and leave the offset uncommitted
    /// rather than stopping the loop.
    pub async fn run(&mut self) -> Result<(), WorkerError> {
        tracing::info!(
            topic = %self.topic,
            consumer_group = %self.consumer_group,
            "starting projection worker"
        );

        let mut stream = self
            .backbone
            .subscribe(&self.topic, &self.consumer_group)
            .await
            .map_err(|e| WorkerError::Subscribe(e.to_string()))?;

        let mut applied_since_checkpoint: u64 = 0;

        loop {
            use futures::StreamExt;
            tokio::select! {
                message = stream.next() => {
                    let Some(message) = message else {
                        tracing::warn!("backbone stream ended");
                        break;
                    };
                    match message {
                        Ok(message) => {
                            match self.handle_message(&message.payload).await {
                                Ok(Some(cursor)) => {
                                    if let Err(err) = self.backbone.commit(&message.offset).await {
                                        tracing::error!(error = %err, "failed to commit backbone offset");
                                        continue;
                                    }
                                    applied_since_checkpoint += 1;
                                    if applied_since_checkpoint >= self.checkpoint_interval {
                                        if let Err(err) = self.checkpoint.save(cursor).await {
                                            tracing::error!(error = %err, "failed to save projection cursor");
                                        } else {
                                            applied_since_checkpoint = 0;
                                        }
                                    }
                                }
                                Ok(None) => {
                                    // malformed message: already counted and logged, offset still commits.
                                    if let Err(err) = self.backbone.commit(&message.offset).await {
                                        tracing::error!(error = %err, "failed to commit backbone offset for malformed message");
                                    }
                                }
                                Err(err) => {
                                    tracing::error!(error = %err, "transient failure projecting message, not committing offset");
                                }
                            }
                        }
                        Err(err) => {
                            tracing::error!(error = %err, "error receiving message from backbone");
                        }
                    }
                }
                _ = self.shutdown.changed() => {
                    if *self.shutdown.borrow() {
                        tracing::info!("shutdown signal received, stopping projection worker");
                        break;
                    }
                }
            }
        }

        Ok(())
    }

    /// Decode and apply one message. Returns `Ok(Some(cursor))` on success,
    /// `Ok(None)` for a malformed message (poison, offset still commits),
    /// and `Err` for a transient store failure that must not commit.
    async fn handle_message(
        &self,
        payload: &[u8],
    ) -> Result<Option<ProjectionCursor>, WorkerError> {
        let envelope = match Envelope::from_wire(payload) {
            Ok(envelope) => envelope,
            Err(err) => {
                metrics::counter!("projection_worker.malformed_total").increment(1);
                tracing::warn!(error = %err, "dropping malformed envelope");
                return Ok(None);
            }
        };

        let outcome = self.event_log.persist(envelope.clone()).await?;
        self.project(&envelope).await?;
        self.auto_promotion_sweep(&envelope).await?;

        tracing::debug!(
            event_id = %envelope.event_id(),
            event_type = ?envelope.event_type(),
            outcome = ?outcome,
            "applied envelope"
        );

        Ok(Some(ProjectionCursor::advance(
            envelope.event_id(),
            envelope.ts(),
            Utc::now(),
        )))
    }

    /// Route a memory-bearing event to the memory store. A no-op for event
    /// types the memory store does not materialise.
    async fn project(&self, envelope: &Envelope) -> Result<(), WorkerError> {
        match envelope.event_type() {
            EventType::MemoryCandidate => {
                let entry = candidate_from_envelope(envelope)?;
                self.memory_store.create_entry(entry).await?;
            }
            EventType::MemoryPromoted => {
                self.apply_terminal_status(envelope, |at| EntryStatus::Promoted { promoted_at: at })
                    .await?;
            }
            EventType::MemoryRetracted => {
                self.apply_terminal_status(envelope, |at| EntryStatus::Retracted { retracted_at: at })
                    .await?;
            }
            _ => {}
        }
        Ok(())
    }

    async fn apply_terminal_status(
        &self,
        envelope: &Envelope,
        status: impl FnOnce(chrono::DateTime<Utc>) -> EntryStatus,
    ) -> Result<(), WorkerError> {
        let Some(entry_id) = entry_id_from_payload(envelope.payload()) else {
            tracing::warn!(
                event_id = %envelope.event_id(),
                event_type = ?envelope.event_type(),
                "dropping projection: entry_id missing from payload"
            );
            return Ok(());
        };
        self.memory_store
            .update_status(entry_id, status(envelope.ts()), envelope.ts())
            .await?;
        Ok(())
    }

    /// List candidate entries for the envelope's workspace and promote the
    /// ones eligible under the triggering trace, via a republished synthetic
    /// envelope rather than a direct mutation.
    async fn auto_promotion_sweep(&self, trigger: &Envelope) -> Result<(), WorkerError> {
        let candidates = self
            .memory_store
            .get_entries(EntryQuery {
                workspace_id: trigger.workspace_id().to_string(),
                bucket: None,
                status: Some("candidate"),
                include_expired: false,
            })
            .await?;

        for entry in candidates {
            if self.evaluator.is_eligible(&entry, trigger.trace_id()).await? {
                self.emit_auto_promotion(&entry, trigger).await?;
            }
        }
        Ok(())
    }

    async fn emit_auto_promotion(
        &self,
        entry: &MemoryEntry,
        trigger: &Envelope,
    ) -> Result<(), WorkerError> {
        let mut payload = Map::new();
        payload.insert("entry_id".to_string(), Value::String(entry.entry_id.to_string()));

        let synthetic = Envelope::try_new(
            Uuid::new_v4(),
            trigger.ts(),
            entry.workspace_id.clone(),
            Envelope::synthetic_satellite_id(&self.service_name),
            trigger.trace_id(),
            EventType::MemoryPromoted,
            trigger.severity(),
            entry.confidence,
            payload,
        )
        .map_err(|e| WorkerError::Store(e.to_string()))?;

        let wire = synthetic.to_wire().map_err(|e| WorkerError::Store(e.to_string()))?;
        self.backbone
            .publish(synthetic.partition_key(), wire)
            .await
            .map_err(|e| WorkerError::Store(e.to_string()))?;
        Ok(())
    }

    /// Rebuild `workspace_id`'s memory state from the event log: delete all
    /// its entries, then re-apply every memory-bearing event in ascending
    /// `ts` order through the same handlers the consumer loop uses, but
    /// skipping the auto-promotion sweep and cursor update.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::Store`] if a store operation fails.
    pub async fn replay(&self, workspace_id: &str) -> Result<ReplaySummary, WorkerError> {
        let entries_deleted = self.memory_store.delete_workspace_entries(workspace_id).await?;

        let events = self
            .event_log
            .get_workspace_events(
                workspace_id,
                Some(&[
                    EventType::MemoryCandidate,
                    EventType::MemoryPromoted,
                    EventType::MemoryRetracted,
                ]),
                None,
            )
            .await?;

        let mut entries_created = 0u64;
        let events_replayed = events.len() as u64;
        for envelope in &events {
            if envelope.event_type() == EventType::MemoryCandidate {
                entries_created += 1;
            }
            self.project(envelope).await?;
        }

        Ok(ReplaySummary {
            entries_deleted,
            events_replayed,
            entries_created,
        })
    }
}

fn entry_id_from_payload(payload: &Map<String, Value>) -> Option<Uuid> {
    payload.get("entry_id")?.as_str()?.parse().ok()
}

fn candidate_from_envelope(envelope: &Envelope) -> Result<MemoryEntry, WorkerError> {
    let payload = envelope.payload();

    let bucket = payload
        .get("bucket")
        .and_then(Value::as_str)
        .map_or(Ok(Bucket::Workspace), Bucket::parse)
        .map_err(|e| WorkerError::Store(e.to_string()))?;

    let key = payload
        .get("key")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let value = payload
        .get("value")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();

    let expires_at = if bucket == Bucket::Ephemeral {
        let ttl_hours = payload
            .get("ttl_hours")
            .and_then(Value::as_i64)
            .unwrap_or(DEFAULT_TTL_HOURS);
        Some(envelope.ts() + Duration::hours(ttl_hours))
    } else {
        None
    };

    MemoryEntry::new_candidate(
        envelope.event_id(),
        envelope.workspace_id().to_string(),
        bucket,
        key,
        value,
        envelope.confidence(),
        envelope.event_id(),
        expires_at,
        envelope.ts(),
    )
    .map_err(|e| WorkerError::Store(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clawderpunk_core::testing::{InMemoryBackbone, InMemoryCheckpoint, InMemoryEventLog, InMemoryMemoryStore};
    use serde_json::json;

    fn make_worker() -> (ProjectionWorker, watch::Sender<bool>, Arc<InMemoryMemoryStore>, Arc<InMemoryBackbone>) {
        let backbone = Arc::new(InMemoryBackbone::new());
        let event_log = Arc::new(InMemoryEventLog::new());
        let memory_store = Arc::new(InMemoryMemoryStore::new());
        let checkpoint = Arc::new(InMemoryCheckpoint::new());
        let (worker, shutdown) = ProjectionWorker::new(
            Arc::clone(&backbone) as Arc<dyn Backbone>,
            event_log as Arc<dyn EventLog>,
            Arc::clone(&memory_store) as Arc<dyn MemoryStore>,
            checkpoint as Arc<dyn ProjectionCheckpoint>,
            "clawderpunk",
            "clawderpunk.events",
            "projection-engine",
        );
        (worker, shutdown, memory_store, backbone)
    }

    fn candidate_envelope(workspace: &str, confidence: f64, trace_id: Uuid) -> Envelope {
        let mut payload = Map::new();
        payload.insert("key".to_string(), json!("K"));
        payload.insert("value".to_string(), json!({"x": 1}));
        Envelope::try_new(
            Uuid::new_v4(),
            Utc::now(),
            workspace.to_string(),
            "sat".to_string(),
            trace_id,
            EventType::MemoryCandidate,
            Severity::Low,
            confidence,
            payload,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn malformed_payload_is_dropped_without_error() {
        let (worker, _shutdown, _store, _backbone) = make_worker();
        let result = worker.handle_message(b"not json").await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn candidate_event_creates_memory_entry() {
        let (worker, _shutdown, store, _backbone) = make_worker();
        let envelope = candidate_envelope("ws-a", 0.5, Uuid::new_v4());
        let wire = envelope.to_wire().unwrap();

        worker.handle_message(&wire).await.unwrap();

        let entries = store
            .get_entries(EntryQuery {
                workspace_id: "ws-a".to_string(),
                bucket: None,
                status: Some("candidate"),
                include_expired: false,
            })
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].key, "K");
    }

    #[tokio::test]
    async fn eligible_candidate_triggers_republished_promotion() {
        let (worker, _shutdown, _store, backbone) = make_worker();
        let trace_id = Uuid::new_v4();

        let decision = Envelope::try_new(
            Uuid::new_v4(),
            Utc::now(),
            "ws-a".to_string(),
            "sat".to_string(),
            trace_id,
            EventType::DecisionRecorded,
            Severity::Low,
            0.9,
            Map::new(),
        )
        .unwrap();
        worker.handle_message(&decision.to_wire().unwrap()).await.unwrap();

        let mut stream = backbone.subscribe("clawderpunk.events", "watcher").await.unwrap();

        let candidate = candidate_envelope("ws-a", 0.85, trace_id);
        worker.handle_message(&candidate.to_wire().unwrap()).await.unwrap();

        use futures::StreamExt;
        let published = stream.next().await.unwrap().unwrap();
        let synthetic = Envelope::from_wire(&published.payload).unwrap();
        assert_eq!(synthetic.event_type(), EventType::MemoryPromoted);
        assert_eq!(synthetic.satellite_id(), "clawderpunk.projection-engine");
    }

    #[tokio::test]
    async fn low_confidence_candidate_is_never_auto_promoted() {
        let (worker, _shutdown, _store, backbone) = make_worker();
        let trace_id = Uuid::new_v4();
        let mut stream = backbone.subscribe("clawderpunk.events", "watcher").await.unwrap();

        let candidate = candidate_envelope("ws-a", 0.3, trace_id);
        worker.handle_message(&candidate.to_wire().unwrap()).await.unwrap();

        let decision = Envelope::try_new(
            Uuid::new_v4(),
            Utc::now(),
            "ws-a".to_string(),
            "sat".to_string(),
            trace_id,
            EventType::DecisionRecorded,
            Severity::Low,
            0.9,
            Map::new(),
        )
        .unwrap();
        worker.handle_message(&decision.to_wire().unwrap()).await.unwrap();

        let pending = tokio::time::timeout(std::time::Duration::from_millis(50), {
            use futures::StreamExt;
            stream.next()
        })
        .await;
        assert!(pending.is_err(), "no promotion should have been published");
    }

    #[tokio::test]
    async fn replay_rebuilds_memory_state_from_log() {
        let (worker, _shutdown, store, _backbone) = make_worker();
        let trace_id = Uuid::new_v4();
        let candidate = candidate_envelope("ws-a", 0.9, trace_id);
        let candidate_wire = candidate.to_wire().unwrap();
        worker.handle_message(&candidate_wire).await.unwrap();

        let mut promoted_payload = Map::new();
        promoted_payload.insert("entry_id".to_string(), json!(candidate.event_id().to_string()));
        let promoted = Envelope::try_new(
            Uuid::new_v4(),
            Utc::now(),
            "ws-a".to_string(),
            "clawderpunk.projection-engine".to_string(),
            trace_id,
            EventType::MemoryPromoted,
            Severity::Low,
            0.9,
            promoted_payload,
        )
        .unwrap();
        worker.handle_message(&promoted.to_wire().unwrap()).await.unwrap();

        let summary = worker.replay("ws-a").await.unwrap();
        assert_eq!(summary.entries_deleted, 1);
        assert_eq!(summary.events_replayed, 2);
        assert_eq!(summary.entries_created, 1);

        let entries = store
            .get_entries(EntryQuery {
                workspace_id: "ws-a".to_string(),
                bucket: None,
                status: Some("promoted"),
                include_expired: false,
            })
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);

        let second_summary = worker.replay("ws-a").await.unwrap();
        assert_eq!(second_summary, ReplaySummary {
            entries_deleted: 1,
            events_replayed: 2,
            entries_created: 1,
        });
    }
}
