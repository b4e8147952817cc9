//! The context-pack assembler: read-side composition of promoted memory
//! plus recent typed events, keyed by workspace.
//!
//! Grounded on `original_source/src/punk_records/api/context_packs.py`'s
//! `_rank_memory`/`_to_context_memory`/`get_context_pack_v0`: the relevance
//! scoring, tie-break, and `provenance` block are carried over; section
//! limits are collapsed to the single `limit` query parameter the
//! interface exposes (see DESIGN.md).

use clawderpunk_core::envelope::{Envelope, EventType, Severity};
use clawderpunk_core::event_log::{EventLog, EventLogError, EventQuery};
use clawderpunk_core::memory::{Bucket, MemoryEntry};
use clawderpunk_core::memory_store::{EntryQuery, MemoryStore, MemoryStoreError};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Default lookback for the event sections when `since` is not given.
const DEFAULT_SINCE_DAYS: i64 = 7;

/// Errors raised while assembling a context pack.
#[derive(Error, Debug)]
pub enum ContextPackError {
    /// A memory-store lookup failed.
    #[error("memory store error: {0}")]
    MemoryStore(#[from] MemoryStoreError),
    /// An event-log lookup failed.
    #[error("event log error: {0}")]
    EventLog(#[from] EventLogError),
}

/// Relevance of a ranked memory entry to the query that produced it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemoryRelevance {
    /// `|matched ∩ terms| / |terms|`, rounded to 4 decimals.
    pub score: f64,
    /// Matched terms, sorted and deduplicated.
    pub match_terms: Vec<String>,
}

/// One memory entry in the `memory` section.
#[derive(Debug, Clone, Serialize)]
pub struct ContextMemoryItem {
    /// Entry identity (equals its originating `memory.candidate` event).
    pub entry_id: Uuid,
    /// Entry scope.
    pub bucket: Bucket,
    /// Entry key.
    pub key: String,
    /// Entry value, canonical JSON on the wire via `serde`'s default map
    /// ordering (`BTreeMap`-backed, see `canonical_json`).
    pub value: Map<String, Value>,
    /// Confidence carried from the originating candidate.
    pub confidence: f64,
    /// Last mutation timestamp.
    pub updated_at: DateTime<Utc>,
    /// Relevance to the query, if one was given; `score = 1.0` with no
    /// matched terms when ordering by recency instead.
    pub relevance: MemoryRelevance,
}

/// One event in the `decisions`/`tasks`/`risks` sections.
#[derive(Debug, Clone, Serialize)]
pub struct ContextEventItem {
    /// Event identity.
    pub event_id: Uuid,
    /// Event timestamp.
    pub ts: DateTime<Utc>,
    /// Producer identity.
    pub satellite_id: String,
    /// Event payload, as submitted.
    pub payload: Map<String, Value>,
}

/// Section sizes, echoed alongside the sections themselves.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ContextPackCounts {
    /// Number of entries in `memory`.
    pub memory: usize,
    /// Number of entries in `decisions`.
    pub decisions: usize,
    /// Number of entries in `tasks`.
    pub tasks: usize,
    /// Number of entries in `risks`.
    pub risks: usize,
}

/// Static description of how each section was produced, for clients that
/// want to reason about freshness or retrieval strategy.
#[derive(Debug, Clone, Serialize)]
pub struct ContextPackProvenance {
    /// Retrieval strategy identifier.
    pub retrieval: &'static str,
    /// Memory section source description.
    pub memory_source: &'static str,
    /// Event section source description.
    pub event_source: &'static str,
}

impl Default for ContextPackProvenance {
    fn default() -> Self {
        Self {
            retrieval: "keyword-v0",
            memory_source: "memory_entries(status=promoted)",
            event_source: "events(decision.recorded|task.created|risk.detected[high])",
        }
    }
}

/// The assembled context pack.
#[derive(Debug, Clone, Serialize)]
pub struct ContextPack {
    /// The workspace this pack was assembled for.
    pub workspace_id: String,
    /// The query, if one was given.
    pub query: Option<String>,
    /// Promoted memory, ranked or ordered per §4.8.
    pub memory: Vec<ContextMemoryItem>,
    /// Recent `decision.recorded` events.
    pub decisions: Vec<ContextEventItem>,
    /// Recent `task.created` events.
    pub tasks: Vec<ContextEventItem>,
    /// Recent high-severity `risk.detected` events.
    pub risks: Vec<ContextEventItem>,
    /// Section sizes.
    pub counts: ContextPackCounts,
    /// Retrieval provenance.
    pub provenance: ContextPackProvenance,
    /// When this pack was assembled.
    pub generated_at: DateTime<Utc>,
}

/// Assembles context packs from the memory store and the event log.
pub struct ContextPackAssembler {
    memory_store: Arc<dyn MemoryStore>,
    event_log: Arc<dyn EventLog>,
}

impl ContextPackAssembler {
    /// Construct an assembler backed by `memory_store` and `event_log`.
    #[must_use]
    pub const fn new(memory_store: Arc<dyn MemoryStore>, event_log: Arc<dyn EventLog>) -> Self {
        Self { memory_store, event_log }
    }

    /// Assemble a context pack for `workspace_id`.
    ///
    /// `now` is threaded in rather than sampled internally so assembly is
    /// deterministic under test.
    ///
    /// # Errors
    ///
    /// Returns [`ContextPackError`] if a store lookup fails.
    pub async fn assemble(
        &self,
        workspace_id: &str,
        query: Option<&str>,
        since: Option<DateTime<Utc>>,
        limit: u32,
        now: DateTime<Utc>,
    ) -> Result<ContextPack, ContextPackError> {
        let since = since.unwrap_or_else(|| now - Duration::days(DEFAULT_SINCE_DAYS));

        let promoted = self
            .memory_store
            .get_entries(EntryQuery {
                workspace_id: workspace_id.to_string(),
                bucket: None,
                status: Some("promoted"),
                include_expired: false,
            })
            .await?;
        let memory = rank_memory(&promoted, query, limit);

        let decisions = self
            .recent_events(workspace_id, EventType::DecisionRecorded, since, limit)
            .await?;
        let tasks = self
            .recent_events(workspace_id, EventType::TaskCreated, since, limit)
            .await?;
        let risks = self
            .recent_events(workspace_id, EventType::RiskDetected, since, limit)
            .await?
            .into_iter()
            .filter(|e| e.severity == Severity::High)
            .collect::<Vec<_>>();

        let counts = ContextPackCounts {
            memory: memory.len(),
            decisions: decisions.len(),
            tasks: tasks.len(),
            risks: risks.len(),
        };

        Ok(ContextPack {
            workspace_id: workspace_id.to_string(),
            query: query.map(str::to_string),
            memory,
            decisions: decisions.into_iter().map(Into::into).collect(),
            tasks: tasks.into_iter().map(Into::into).collect(),
            risks: risks.into_iter().map(Into::into).collect(),
            counts,
            provenance: ContextPackProvenance::default(),
            generated_at: now,
        })
    }

    async fn recent_events(
        &self,
        workspace_id: &str,
        event_type: EventType,
        since: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<SeverityTaggedEvent>, ContextPackError> {
        let query = EventQuery::try_new(
            workspace_id.to_string(),
            Some(event_type),
            Some(since),
            None,
            limit,
            0,
        )?;
        let mut events = self.event_log.query(query).await?;
        events.sort_by_key(|e| std::cmp::Reverse(e.ts()));
        events.truncate(limit as usize);
        Ok(events.into_iter().map(SeverityTaggedEvent::from).collect())
    }
}

/// An event plus its severity, used only to let the `risks` section filter
/// without a second round trip through `Envelope`'s private fields.
struct SeverityTaggedEvent {
    event_id: Uuid,
    ts: DateTime<Utc>,
    satellite_id: String,
    payload: Map<String, Value>,
    severity: Severity,
}

impl From<Envelope> for SeverityTaggedEvent {
    fn from(envelope: Envelope) -> Self {
        Self {
            event_id: envelope.event_id(),
            ts: envelope.ts(),
            satellite_id: envelope.satellite_id().to_string(),
            payload: envelope.payload().clone(),
            severity: envelope.severity(),
        }
    }
}

impl From<SeverityTaggedEvent> for ContextEventItem {
    fn from(event: SeverityTaggedEvent) -> Self {
        Self {
            event_id: event.event_id,
            ts: event.ts,
            satellite_id: event.satellite_id,
            payload: event.payload,
        }
    }
}

fn rank_memory(entries: &[MemoryEntry], query: Option<&str>, limit: u32) -> Vec<ContextMemoryItem> {
    let Some(query) = query.filter(|q| !q.trim().is_empty()) else {
        let mut sorted: Vec<&MemoryEntry> = entries.iter().collect();
        sorted.sort_by_key(|e| std::cmp::Reverse(e.updated_at));
        return sorted
            .into_iter()
            .take(limit as usize)
            .map(|e| to_context_memory(e, 1.0, Vec::new()))
            .collect();
    };

    let terms: BTreeSet<String> = query.to_lowercase().split_whitespace().map(str::to_string).collect();
    if terms.is_empty() {
        return Vec::new();
    }

    let mut ranked: Vec<(f64, Vec<String>, &MemoryEntry)> = entries
        .iter()
        .filter_map(|entry| {
            let haystack = entry.search_haystack();
            let matched: BTreeSet<&String> =
                terms.iter().filter(|t| haystack.contains(t.as_str())).collect();
            if matched.is_empty() {
                return None;
            }
            let score = round4(matched.len() as f64 / terms.len() as f64);
            let match_terms: Vec<String> = matched.into_iter().cloned().collect();
            Some((score, match_terms, entry))
        })
        .collect();

    ranked.sort_by(|a, b| {
        b.0.partial_cmp(&a.0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.2.updated_at.cmp(&a.2.updated_at))
    });

    ranked
        .into_iter()
        .take(limit as usize)
        .map(|(score, match_terms, entry)| to_context_memory(entry, score, match_terms))
        .collect()
}

fn to_context_memory(entry: &MemoryEntry, score: f64, match_terms: Vec<String>) -> ContextMemoryItem {
    ContextMemoryItem {
        entry_id: entry.entry_id,
        bucket: entry.bucket,
        key: entry.key.clone(),
        value: entry.value.clone(),
        confidence: entry.confidence,
        updated_at: entry.updated_at,
        relevance: MemoryRelevance { score, match_terms },
    }
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use clawderpunk_core::testing::{InMemoryEventLog, InMemoryMemoryStore};
    use serde_json::json;

    fn promoted_entry(key: &str, value: Value, updated_at: DateTime<Utc>) -> MemoryEntry {
        let mut entry = MemoryEntry::new_candidate(
            Uuid::new_v4(),
            "ws-a".to_string(),
            Bucket::Workspace,
            key.to_string(),
            value.as_object().cloned().unwrap_or_default(),
            0.9,
            Uuid::new_v4(),
            None,
            updated_at,
        )
        .unwrap();
        entry.status = clawderpunk_core::memory::EntryStatus::Promoted { promoted_at: updated_at };
        entry.updated_at = updated_at;
        entry
    }

    #[tokio::test]
    async fn empty_query_orders_by_recency() {
        let memory_store = Arc::new(InMemoryMemoryStore::new());
        let event_log = Arc::new(InMemoryEventLog::new());
        let now = Utc::now();

        let older = promoted_entry("old", json!({}), now - Duration::days(2));
        let newer = promoted_entry("new", json!({}), now);
        memory_store.create_entry(older).await.unwrap();
        memory_store.create_entry(newer).await.unwrap();

        let assembler = ContextPackAssembler::new(memory_store, event_log);
        let pack = assembler.assemble("ws-a", None, None, 10, now).await.unwrap();

        assert_eq!(pack.memory.len(), 2);
        assert_eq!(pack.memory[0].key, "new");
        assert_eq!(pack.memory[0].relevance.score, 1.0);
    }

    #[tokio::test]
    async fn query_scores_by_matched_term_fraction() {
        let memory_store = Arc::new(InMemoryMemoryStore::new());
        let event_log = Arc::new(InMemoryEventLog::new());
        let now = Utc::now();

        let full_match = promoted_entry("deploy pipeline", json!({"env": "prod"}), now);
        let partial_match = promoted_entry("deploy", json!({}), now);
        memory_store.create_entry(full_match).await.unwrap();
        memory_store.create_entry(partial_match).await.unwrap();

        let assembler = ContextPackAssembler::new(memory_store, event_log);
        let pack = assembler
            .assemble("ws-a", Some("deploy pipeline"), None, 10, now)
            .await
            .unwrap();

        assert_eq!(pack.memory.len(), 2);
        assert_eq!(pack.memory[0].key, "deploy pipeline");
        assert_eq!(pack.memory[0].relevance.score, 1.0);
        assert_eq!(pack.memory[1].relevance.score, 0.5);
    }

    #[tokio::test]
    async fn counts_reflect_section_lengths() {
        let memory_store = Arc::new(InMemoryMemoryStore::new());
        let event_log = Arc::new(InMemoryEventLog::new());
        let now = Utc::now();
        let assembler = ContextPackAssembler::new(memory_store, event_log);
        let pack = assembler.assemble("ws-a", None, None, 10, now).await.unwrap();
        assert_eq!(pack.counts.memory, 0);
        assert_eq!(pack.counts.decisions, 0);
    }
}
