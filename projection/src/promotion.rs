//! The promotion evaluator: a pure predicate over a candidate entry and a
//! triggering trace, with all event-log lookups pushed behind the
//! [`clawderpunk_core::event_log::EventLog`] trait so the evaluator itself
//! stays side-effect free.

use clawderpunk_core::envelope::EventType;
use clawderpunk_core::event_log::{EventLog, EventLogError};
use clawderpunk_core::memory::{EntryStatus, MemoryEntry};
use chrono::Duration;
use std::sync::Arc;
use uuid::Uuid;

/// Minimum confidence for a candidate to be promotion-eligible.
pub const CONFIDENCE_THRESHOLD: f64 = 0.75;
/// Lookback window for the reference-count rule.
pub const REFERENCE_WINDOW_DAYS: i64 = 7;
/// Minimum reference count within the window for the reference-count rule.
pub const MIN_REFERENCES: u64 = 2;

/// Evaluates whether a candidate memory entry is eligible for promotion.
pub struct PromotionEvaluator {
    event_log: Arc<dyn EventLog>,
}

impl PromotionEvaluator {
    /// Construct an evaluator backed by `event_log`.
    #[must_use]
    pub const fn new(event_log: Arc<dyn EventLog>) -> Self {
        Self { event_log }
    }

    /// Whether `entry` is eligible for promotion given the triggering
    /// envelope's `trace_id`.
    ///
    /// Checked in order — status, confidence, reference count,
    /// decision-in-trace — so a rejection on an early, cheap check never
    /// touches the store.
    ///
    /// # Errors
    ///
    /// Returns [`EventLogError`] if a store lookup fails.
    pub async fn is_eligible(&self, entry: &MemoryEntry, trace_id: Uuid) -> Result<bool, EventLogError> {
        if entry.status != EntryStatus::Candidate {
            return Ok(false);
        }
        if entry.confidence < CONFIDENCE_THRESHOLD {
            return Ok(false);
        }

        let since = entry.created_at - Duration::days(REFERENCE_WINDOW_DAYS);
        let ref_count = self
            .event_log
            .count_references(&entry.workspace_id, trace_id, since)
            .await?;
        if ref_count >= MIN_REFERENCES {
            return Ok(true);
        }

        self.event_log
            .has_event_type_in_trace(&entry.workspace_id, trace_id, EventType::DecisionRecorded)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clawderpunk_core::memory::Bucket;
    use clawderpunk_core::testing::InMemoryEventLog;
    use serde_json::Map;

    fn candidate(confidence: f64) -> MemoryEntry {
        MemoryEntry::new_candidate(
            Uuid::new_v4(),
            "ws-a".to_string(),
            Bucket::Workspace,
            "k".to_string(),
            Map::new(),
            confidence,
            Uuid::new_v4(),
            None,
            chrono::Utc::now(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn low_confidence_is_never_eligible() {
        let log = Arc::new(InMemoryEventLog::new());
        let evaluator = PromotionEvaluator::new(log);
        let entry = candidate(0.5);
        assert!(!evaluator.is_eligible(&entry, Uuid::new_v4()).await.unwrap());
    }

    #[tokio::test]
    async fn promoted_entry_is_never_eligible() {
        let log = Arc::new(InMemoryEventLog::new());
        let evaluator = PromotionEvaluator::new(log);
        let mut entry = candidate(0.9);
        entry.status = EntryStatus::Promoted { promoted_at: chrono::Utc::now() };
        assert!(!evaluator.is_eligible(&entry, Uuid::new_v4()).await.unwrap());
    }

    #[tokio::test]
    async fn high_confidence_with_no_references_or_decision_is_not_eligible() {
        let log = Arc::new(InMemoryEventLog::new());
        let evaluator = PromotionEvaluator::new(log);
        let entry = candidate(0.9);
        assert!(!evaluator.is_eligible(&entry, Uuid::new_v4()).await.unwrap());
    }
}
