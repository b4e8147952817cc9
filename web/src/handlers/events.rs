//! `POST /events` and `GET /events`.

use crate::error::AppError;
use crate::state::AppState;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::{body::Bytes, Json};
use clawderpunk_core::envelope::{Envelope, EventType};
use clawderpunk_core::event_log::EventQuery;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// `POST /events` accepted response.
#[derive(Debug, Serialize)]
pub struct IngestResponse {
    status: &'static str,
    event_id: Uuid,
}

/// Decode, validate, and publish an envelope. Waits for the backbone's
/// durability acknowledgement before replying (§4.4).
///
/// # Errors
///
/// Returns `400` if the body is not a valid envelope, `5xx` if publish does
/// not reach the broker.
pub async fn ingest_event(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, Json<IngestResponse>), AppError> {
    let envelope = Envelope::from_wire(&body)?;
    let event_id = envelope.event_id();

    tracing::info!(event_id = %event_id, workspace_id = %envelope.workspace_id(), "accepting envelope");

    let wire = envelope.to_wire()?;
    if let Err(err) = state.backbone.publish(envelope.partition_key(), wire).await {
        tracing::error!(event_id = %event_id, error = %err, "failed to publish envelope");
        return Err(err.into());
    }

    Ok((
        StatusCode::ACCEPTED,
        Json(IngestResponse {
            status: "accepted",
            event_id,
        }),
    ))
}

/// Query parameters for `GET /events`.
#[derive(Debug, Deserialize)]
pub struct ListEventsParams {
    workspace_id: String,
    #[serde(rename = "type")]
    event_type: Option<String>,
    after: Option<chrono::DateTime<chrono::Utc>>,
    before: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default = "default_limit")]
    limit: u32,
    #[serde(default)]
    offset: u32,
}

const fn default_limit() -> u32 {
    50
}

/// One envelope as returned on the wire for `GET /events`.
#[derive(Debug, Serialize)]
pub struct EventResponse {
    event_id: Uuid,
    ts: chrono::DateTime<chrono::Utc>,
    workspace_id: String,
    satellite_id: String,
    trace_id: Uuid,
    #[serde(rename = "type")]
    event_type: &'static str,
    severity: &'static str,
    confidence: f64,
    payload: serde_json::Map<String, serde_json::Value>,
}

impl From<Envelope> for EventResponse {
    fn from(envelope: Envelope) -> Self {
        Self {
            event_id: envelope.event_id(),
            ts: envelope.ts(),
            workspace_id: envelope.workspace_id().to_string(),
            satellite_id: envelope.satellite_id().to_string(),
            trace_id: envelope.trace_id(),
            event_type: envelope.event_type().as_str(),
            severity: envelope.severity().as_str(),
            confidence: envelope.confidence(),
            payload: envelope.payload().clone(),
        }
    }
}

/// Listing response for `GET /events`.
#[derive(Debug, Serialize)]
pub struct ListEventsResponse {
    events: Vec<EventResponse>,
    total: usize,
    limit: u32,
    offset: u32,
}

/// Paginated, filtered event listing.
///
/// # Errors
///
/// Returns `400` for an unknown `type` or an out-of-range `limit`.
pub async fn list_events(
    State(state): State<AppState>,
    Query(params): Query<ListEventsParams>,
) -> Result<Json<ListEventsResponse>, AppError> {
    let event_type = params
        .event_type
        .as_deref()
        .map(EventType::parse)
        .transpose()?;

    let query = EventQuery::try_new(
        params.workspace_id,
        event_type,
        params.after,
        params.before,
        params.limit,
        params.offset,
    )?;
    let limit = query.limit;
    let offset = query.offset;

    let events = state.event_log.query(query).await?;
    let total = events.len();

    Ok(Json(ListEventsResponse {
        events: events.into_iter().map(Into::into).collect(),
        total,
        limit,
        offset,
    }))
}
