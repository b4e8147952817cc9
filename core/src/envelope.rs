//! The event envelope: the canonical in-memory and wire shape for every
//! event accepted by the service.
//!
//! An envelope is immutable once constructed. [`Envelope::try_new`] is the
//! only constructor and re-validates every invariant; deserialising an
//! envelope off the wire goes through the same validation via
//! [`Envelope::from_wire`].

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

/// The schema version this implementation understands. Schema evolution
/// beyond this is an explicit non-goal.
pub const SCHEMA_VERSION: u32 = 1;

/// Closed set of event types the backbone carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    /// A proposal was created.
    #[serde(rename = "proposal.created")]
    ProposalCreated,
    /// A decision was recorded.
    #[serde(rename = "decision.recorded")]
    DecisionRecorded,
    /// A risk was detected.
    #[serde(rename = "risk.detected")]
    RiskDetected,
    /// A finding was logged.
    #[serde(rename = "finding.logged")]
    FindingLogged,
    /// A task was created.
    #[serde(rename = "task.created")]
    TaskCreated,
    /// A task was updated.
    #[serde(rename = "task.updated")]
    TaskUpdated,
    /// A memory candidate was proposed.
    #[serde(rename = "memory.candidate")]
    MemoryCandidate,
    /// A memory entry was promoted.
    #[serde(rename = "memory.promoted")]
    MemoryPromoted,
    /// A memory entry was retracted.
    #[serde(rename = "memory.retracted")]
    MemoryRetracted,
}

impl EventType {
    /// The wire string for this event type, e.g. `"task.created"`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ProposalCreated => "proposal.created",
            Self::DecisionRecorded => "decision.recorded",
            Self::RiskDetected => "risk.detected",
            Self::FindingLogged => "finding.logged",
            Self::TaskCreated => "task.created",
            Self::TaskUpdated => "task.updated",
            Self::MemoryCandidate => "memory.candidate",
            Self::MemoryPromoted => "memory.promoted",
            Self::MemoryRetracted => "memory.retracted",
        }
    }

    /// Parse from the wire string. Used by store layers that persist the
    /// type as a plain text column rather than round-tripping JSON.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::UnknownEventType`] if `s` is not one of the
    /// closed set.
    pub fn parse(s: &str) -> Result<Self, EnvelopeError> {
        match s {
            "proposal.created" => Ok(Self::ProposalCreated),
            "decision.recorded" => Ok(Self::DecisionRecorded),
            "risk.detected" => Ok(Self::RiskDetected),
            "finding.logged" => Ok(Self::FindingLogged),
            "task.created" => Ok(Self::TaskCreated),
            "task.updated" => Ok(Self::TaskUpdated),
            "memory.candidate" => Ok(Self::MemoryCandidate),
            "memory.promoted" => Ok(Self::MemoryPromoted),
            "memory.retracted" => Ok(Self::MemoryRetracted),
            other => Err(EnvelopeError::UnknownEventType(other.to_string())),
        }
    }
}

/// Severity carried on every envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Low severity.
    Low,
    /// Medium severity.
    Medium,
    /// High severity.
    High,
}

impl Severity {
    /// The wire string for this severity.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    /// Parse from the wire string.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::UnknownSeverity`] if `s` is not `low`,
    /// `medium`, or `high`.
    pub fn parse(s: &str) -> Result<Self, EnvelopeError> {
        match s {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => Err(EnvelopeError::UnknownSeverity(other.to_string())),
        }
    }
}

/// Errors raised while constructing or validating an envelope.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EnvelopeError {
    /// `workspace_id` was empty.
    #[error("workspace_id must not be empty")]
    EmptyWorkspaceId,
    /// `satellite_id` was empty.
    #[error("satellite_id must not be empty")]
    EmptySatelliteId,
    /// `confidence` fell outside `[0.0, 1.0]`.
    #[error("confidence {0} is out of range [0.0, 1.0]")]
    ConfidenceOutOfRange(f64),
    /// `schema_version` was not the version this build understands.
    #[error("unsupported schema_version {0}, expected {SCHEMA_VERSION}")]
    UnsupportedSchemaVersion(u32),
    /// The `type` field did not match the closed set.
    #[error("unknown event type: {0}")]
    UnknownEventType(String),
    /// The `severity` field did not match the closed set.
    #[error("unknown severity: {0}")]
    UnknownSeverity(String),
    /// The timestamp could not be parsed as RFC 3339 or naive ISO-8601.
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),
    /// Failed to serialise or deserialise the envelope as JSON.
    #[error("JSON error: {0}")]
    Json(String),
}

/// The event envelope, `schema_version = 1`.
///
/// Construct via [`Envelope::try_new`]; every field is re-validated there
/// and again on [`Envelope::from_wire`], so a value of this type is always
/// known-valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    event_id: Uuid,
    schema_version: u32,
    #[serde(serialize_with = "serialize_ts", deserialize_with = "deserialize_ts")]
    ts: DateTime<Utc>,
    workspace_id: String,
    satellite_id: String,
    trace_id: Uuid,
    #[serde(rename = "type")]
    event_type: EventType,
    severity: Severity,
    confidence: f64,
    payload: Map<String, Value>,
}

impl Envelope {
    /// Construct and validate a new envelope.
    ///
    /// `ts` is normalised to UTC (offset-aware inputs are converted; callers
    /// passing a naive timestamp should attach `Utc` themselves, which this
    /// constructor accepts as-is since `DateTime<Utc>` is already UTC).
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError`] if `workspace_id`/`satellite_id` are empty
    /// or `confidence` is out of range.
    #[allow(clippy::too_many_arguments)]
    pub fn try_new(
        event_id: Uuid,
        ts: DateTime<Utc>,
        workspace_id: String,
        satellite_id: String,
        trace_id: Uuid,
        event_type: EventType,
        severity: Severity,
        confidence: f64,
        payload: Map<String, Value>,
    ) -> Result<Self, EnvelopeError> {
        if workspace_id.is_empty() {
            return Err(EnvelopeError::EmptyWorkspaceId);
        }
        if satellite_id.is_empty() {
            return Err(EnvelopeError::EmptySatelliteId);
        }
        if !(0.0..=1.0).contains(&confidence) {
            return Err(EnvelopeError::ConfidenceOutOfRange(confidence));
        }
        Ok(Self {
            event_id,
            schema_version: SCHEMA_VERSION,
            ts,
            workspace_id,
            satellite_id,
            trace_id,
            event_type,
            severity,
            confidence,
            payload,
        })
    }

    /// Deserialise and re-validate an envelope from canonical JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::Json`] on malformed JSON, or the specific
    /// validation error for a structurally valid but invalid envelope.
    pub fn from_wire(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        let raw: Self =
            serde_json::from_slice(bytes).map_err(|e| EnvelopeError::Json(e.to_string()))?;
        if raw.schema_version != SCHEMA_VERSION {
            return Err(EnvelopeError::UnsupportedSchemaVersion(raw.schema_version));
        }
        Self::try_new(
            raw.event_id,
            raw.ts,
            raw.workspace_id,
            raw.satellite_id,
            raw.trace_id,
            raw.event_type,
            raw.severity,
            raw.confidence,
            raw.payload,
        )
    }

    /// Serialise to canonical JSON bytes: sorted keys, minimal separators.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::Json`] if serialisation fails (this should
    /// not happen for a validly constructed envelope).
    pub fn to_wire(&self) -> Result<Vec<u8>, EnvelopeError> {
        serde_json::to_vec(self).map_err(|e| EnvelopeError::Json(e.to_string()))
    }

    /// The UTF-8 bytes of `workspace_id`, used as the backbone partition
    /// key.
    #[must_use]
    pub fn partition_key(&self) -> &[u8] {
        self.workspace_id.as_bytes()
    }

    /// Unique event identity.
    #[must_use]
    pub const fn event_id(&self) -> Uuid {
        self.event_id
    }

    /// Schema version, always [`SCHEMA_VERSION`] for a valid envelope.
    #[must_use]
    pub const fn schema_version(&self) -> u32 {
        self.schema_version
    }

    /// Event timestamp, always UTC.
    #[must_use]
    pub const fn ts(&self) -> DateTime<Utc> {
        self.ts
    }

    /// Partitioning / tenancy key.
    #[must_use]
    pub fn workspace_id(&self) -> &str {
        &self.workspace_id
    }

    /// Producer identity.
    #[must_use]
    pub fn satellite_id(&self) -> &str {
        &self.satellite_id
    }

    /// Correlation group identifier.
    #[must_use]
    pub const fn trace_id(&self) -> Uuid {
        self.trace_id
    }

    /// Event type from the closed set.
    #[must_use]
    pub const fn event_type(&self) -> EventType {
        self.event_type
    }

    /// Event severity.
    #[must_use]
    pub const fn severity(&self) -> Severity {
        self.severity
    }

    /// Confidence in `[0.0, 1.0]`.
    #[must_use]
    pub const fn confidence(&self) -> f64 {
        self.confidence
    }

    /// The free-form, type-dependent payload.
    #[must_use]
    pub const fn payload(&self) -> &Map<String, Value> {
        &self.payload
    }

    /// Satellite id used for synthetic envelopes republished by the
    /// projection engine, e.g. auto-promotion (see §4.7).
    #[must_use]
    pub fn synthetic_satellite_id(service_name: &str) -> String {
        format!("{service_name}.projection-engine")
    }
}

fn serialize_ts<S>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(&ts.to_rfc3339_opts(chrono::SecondsFormat::Millis, true))
}

fn deserialize_ts<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw).map_err(serde::de::Error::custom)
}

/// Parse a timestamp that may or may not carry an explicit UTC offset.
///
/// Offset-aware strings are converted to UTC; naive strings (no offset) are
/// interpreted as already being UTC, per §3's invariant.
///
/// # Errors
///
/// Returns [`EnvelopeError::InvalidTimestamp`] if `raw` matches neither
/// RFC 3339 nor a bare ISO-8601 `NaiveDateTime`.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, EnvelopeError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = raw.parse::<NaiveDateTime>() {
        return Ok(naive.and_utc());
    }
    Err(EnvelopeError::InvalidTimestamp(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample_payload() -> Map<String, Value> {
        let mut m = Map::new();
        m.insert("title".to_string(), Value::String("hi".to_string()));
        m
    }

    #[test]
    fn rejects_empty_workspace_id() {
        let err = Envelope::try_new(
            Uuid::new_v4(),
            Utc::now(),
            String::new(),
            "sat".to_string(),
            Uuid::new_v4(),
            EventType::TaskCreated,
            Severity::Low,
            0.5,
            sample_payload(),
        )
        .unwrap_err();
        assert_eq!(err, EnvelopeError::EmptyWorkspaceId);
    }

    #[test]
    fn rejects_confidence_out_of_range() {
        let err = Envelope::try_new(
            Uuid::new_v4(),
            Utc::now(),
            "ws-a".to_string(),
            "sat".to_string(),
            Uuid::new_v4(),
            EventType::TaskCreated,
            Severity::Low,
            1.5,
            sample_payload(),
        )
        .unwrap_err();
        assert_eq!(err, EnvelopeError::ConfidenceOutOfRange(1.5));
    }

    #[test]
    fn wire_round_trip_preserves_equality() {
        let envelope = Envelope::try_new(
            Uuid::new_v4(),
            Utc::now(),
            "ws-a".to_string(),
            "sat".to_string(),
            Uuid::new_v4(),
            EventType::TaskCreated,
            Severity::Low,
            0.9,
            sample_payload(),
        )
        .unwrap();

        let wire = envelope.to_wire().unwrap();
        let back = Envelope::from_wire(&wire).unwrap();
        assert_eq!(envelope, back);
    }

    #[test]
    fn naive_timestamp_is_interpreted_as_utc() {
        let parsed = parse_timestamp("2024-01-01T00:00:00").unwrap();
        assert_eq!(parsed, "2024-01-01T00:00:00Z".parse::<DateTime<Utc>>().unwrap());
    }

    #[test]
    fn offset_timestamp_is_converted_to_utc() {
        let parsed = parse_timestamp("2024-01-01T05:00:00+05:00").unwrap();
        assert_eq!(parsed, "2024-01-01T00:00:00Z".parse::<DateTime<Utc>>().unwrap());
    }

    #[test]
    fn event_type_wire_strings_round_trip() {
        for (variant, s) in [
            (EventType::ProposalCreated, "proposal.created"),
            (EventType::DecisionRecorded, "decision.recorded"),
            (EventType::MemoryCandidate, "memory.candidate"),
            (EventType::MemoryPromoted, "memory.promoted"),
            (EventType::MemoryRetracted, "memory.retracted"),
        ] {
            assert_eq!(variant.as_str(), s);
            assert_eq!(EventType::parse(s).unwrap(), variant);
        }
    }

    #[test]
    fn unknown_event_type_is_rejected() {
        assert!(EventType::parse("bogus.type").is_err());
    }

    proptest! {
        #[test]
        fn confidence_in_unit_range_always_constructs(confidence in 0.0f64..=1.0) {
            let result = Envelope::try_new(
                Uuid::new_v4(),
                Utc::now(),
                "ws-a".to_string(),
                "sat".to_string(),
                Uuid::new_v4(),
                EventType::TaskCreated,
                Severity::Low,
                confidence,
                sample_payload(),
            );
            prop_assert!(result.is_ok());
        }

        #[test]
        fn confidence_outside_unit_range_always_rejected(confidence in proptest::prop_oneof![
            -1000.0f64..0.0,
            1.0f64..1000.0,
        ]) {
            let result = Envelope::try_new(
                Uuid::new_v4(),
                Utc::now(),
                "ws-a".to_string(),
                "sat".to_string(),
                Uuid::new_v4(),
                EventType::TaskCreated,
                Severity::Low,
                confidence,
                sample_payload(),
            );
            prop_assert_eq!(result.unwrap_err(), EnvelopeError::ConfidenceOutOfRange(confidence));
        }
    }
}
