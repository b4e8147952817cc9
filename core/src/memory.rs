//! The memory entry: the materialised-view row the projection engine
//! produces from `memory.*` events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

/// Scope of a memory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Bucket {
    /// Visible across workspaces (not yet used by any reader in this
    /// implementation, but part of the closed set per §3).
    Global,
    /// Visible within one workspace. The default.
    Workspace,
    /// Visible within one workspace until `expires_at`.
    Ephemeral,
}

impl Bucket {
    /// The wire string for this bucket.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Global => "global",
            Self::Workspace => "workspace",
            Self::Ephemeral => "ephemeral",
        }
    }

    /// Parse from the wire string.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryEntryError::UnknownBucket`] if `s` does not match.
    pub fn parse(s: &str) -> Result<Self, MemoryEntryError> {
        match s {
            "global" => Ok(Self::Global),
            "workspace" => Ok(Self::Workspace),
            "ephemeral" => Ok(Self::Ephemeral),
            other => Err(MemoryEntryError::UnknownBucket(other.to_string())),
        }
    }
}

/// Lifecycle status of a memory entry.
///
/// Deliberately a tagged variant rather than a free-form string at the
/// boundary between store rows and the domain; terminal timestamps are
/// co-located with their status variant so `promoted` without
/// `promoted_at` is not representable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum EntryStatus {
    /// Proposed but not yet promoted or retracted.
    Candidate,
    /// Promoted into the curated view.
    Promoted {
        /// When the promotion took effect.
        promoted_at: DateTime<Utc>,
    },
    /// Retracted; terminal for read-side visibility.
    Retracted {
        /// When the retraction took effect.
        retracted_at: DateTime<Utc>,
    },
}

impl EntryStatus {
    /// The wire string for this status, ignoring the carried timestamp.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Candidate => "candidate",
            Self::Promoted { .. } => "promoted",
            Self::Retracted { .. } => "retracted",
        }
    }
}

/// Errors raised while constructing or validating a memory entry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MemoryEntryError {
    /// `key` was empty.
    #[error("key must not be empty")]
    EmptyKey,
    /// `confidence` fell outside `[0.0, 1.0]`.
    #[error("confidence {0} is out of range [0.0, 1.0]")]
    ConfidenceOutOfRange(f64),
    /// `bucket = ephemeral` without `expires_at`, or vice versa.
    #[error("bucket {bucket} requires expires_at to be {expected}")]
    EphemeralExpiryMismatch {
        /// The offending bucket.
        bucket: &'static str,
        /// Whether `expires_at` was expected to be present.
        expected: &'static str,
    },
    /// An unrecognised bucket string.
    #[error("unknown bucket: {0}")]
    UnknownBucket(String),
}

/// A materialised memory entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    /// Equals the `event_id` of the originating `memory.candidate`.
    pub entry_id: Uuid,
    /// Owning workspace.
    pub workspace_id: String,
    /// Entry scope.
    pub bucket: Bucket,
    /// Non-empty key.
    pub key: String,
    /// Value payload, stored and compared as canonical JSON.
    pub value: Map<String, Value>,
    /// Lifecycle status with its terminal timestamp, if any.
    pub status: EntryStatus,
    /// Confidence in `[0.0, 1.0]`, copied from the originating candidate.
    pub confidence: f64,
    /// The originating `memory.candidate` event id. Unique across all
    /// entries in a workspace.
    pub source_event_id: Uuid,
    /// Present iff `bucket = ephemeral`.
    pub expires_at: Option<DateTime<Utc>>,
    /// Set on creation.
    pub created_at: DateTime<Utc>,
    /// Set on creation and on every mutation.
    pub updated_at: DateTime<Utc>,
}

impl MemoryEntry {
    /// Construct a candidate entry and validate its invariants.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryEntryError`] if `key` is empty, `confidence` is out
    /// of range, or the ephemeral/`expires_at` pairing is inconsistent.
    #[allow(clippy::too_many_arguments)]
    pub fn new_candidate(
        entry_id: Uuid,
        workspace_id: String,
        bucket: Bucket,
        key: String,
        value: Map<String, Value>,
        confidence: f64,
        source_event_id: Uuid,
        expires_at: Option<DateTime<Utc>>,
        created_at: DateTime<Utc>,
    ) -> Result<Self, MemoryEntryError> {
        if key.is_empty() {
            return Err(MemoryEntryError::EmptyKey);
        }
        if !(0.0..=1.0).contains(&confidence) {
            return Err(MemoryEntryError::ConfidenceOutOfRange(confidence));
        }
        Self::check_ephemeral_invariant(bucket, expires_at)?;
        Ok(Self {
            entry_id,
            workspace_id,
            bucket,
            key,
            value,
            status: EntryStatus::Candidate,
            confidence,
            source_event_id,
            expires_at,
            created_at,
            updated_at: created_at,
        })
    }

    fn check_ephemeral_invariant(
        bucket: Bucket,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<(), MemoryEntryError> {
        match (bucket, expires_at) {
            (Bucket::Ephemeral, None) => Err(MemoryEntryError::EphemeralExpiryMismatch {
                bucket: "ephemeral",
                expected: "present",
            }),
            (Bucket::Global | Bucket::Workspace, Some(_)) => {
                Err(MemoryEntryError::EphemeralExpiryMismatch {
                    bucket: "global/workspace",
                    expected: "absent",
                })
            }
            _ => Ok(()),
        }
    }

    /// Whether this entry has expired as of `now`. Non-ephemeral entries
    /// never expire.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// Haystack used for relevance scoring: `lower(key) + " " +
    /// canonical_json(value)`.
    #[must_use]
    pub fn search_haystack(&self) -> String {
        let value_json = crate::canonical_json::to_canonical_string(&Value::Object(
            self.value.clone(),
        ))
        .unwrap_or_default();
        format!("{} {}", self.key.to_lowercase(), value_json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ephemeral_without_expiry_is_rejected() {
        let err = MemoryEntry::new_candidate(
            Uuid::new_v4(),
            "ws".to_string(),
            Bucket::Ephemeral,
            "k".to_string(),
            Map::new(),
            0.9,
            Uuid::new_v4(),
            None,
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(err, MemoryEntryError::EphemeralExpiryMismatch { .. }));
    }

    #[test]
    fn workspace_bucket_with_expiry_is_rejected() {
        let err = MemoryEntry::new_candidate(
            Uuid::new_v4(),
            "ws".to_string(),
            Bucket::Workspace,
            "k".to_string(),
            Map::new(),
            0.9,
            Uuid::new_v4(),
            Some(Utc::now()),
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(err, MemoryEntryError::EphemeralExpiryMismatch { .. }));
    }

    #[test]
    fn empty_key_is_rejected() {
        let err = MemoryEntry::new_candidate(
            Uuid::new_v4(),
            "ws".to_string(),
            Bucket::Workspace,
            String::new(),
            Map::new(),
            0.9,
            Uuid::new_v4(),
            None,
            Utc::now(),
        )
        .unwrap_err();
        assert_eq!(err, MemoryEntryError::EmptyKey);
    }

    #[test]
    fn expiry_check_respects_boundary() {
        let now = Utc::now();
        let entry = MemoryEntry::new_candidate(
            Uuid::new_v4(),
            "ws".to_string(),
            Bucket::Ephemeral,
            "k".to_string(),
            Map::new(),
            0.9,
            Uuid::new_v4(),
            Some(now),
            now,
        )
        .unwrap();
        assert!(entry.is_expired(now));
        assert!(!entry.is_expired(now - chrono::Duration::seconds(1)));
    }
}
