//! `GET /memory/{workspace_id}`.

use crate::error::AppError;
use crate::state::AppState;
use axum::extract::{Path, Query, State};
use axum::Json;
use clawderpunk_core::memory::{Bucket, EntryStatus, MemoryEntry};
use clawderpunk_core::memory_store::EntryQuery;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Query parameters for `GET /memory/{workspace_id}`.
#[derive(Debug, Deserialize)]
pub struct ListMemoryParams {
    bucket: Option<String>,
    status: Option<String>,
    #[serde(default)]
    include_expired: bool,
}

/// One memory entry as returned on the wire.
#[derive(Debug, Serialize)]
pub struct MemoryEntryResponse {
    entry_id: Uuid,
    workspace_id: String,
    bucket: Bucket,
    key: String,
    value: serde_json::Map<String, serde_json::Value>,
    status: &'static str,
    confidence: f64,
    source_event_id: Uuid,
    promoted_at: Option<chrono::DateTime<chrono::Utc>>,
    retracted_at: Option<chrono::DateTime<chrono::Utc>>,
    expires_at: Option<chrono::DateTime<chrono::Utc>>,
    created_at: chrono::DateTime<chrono::Utc>,
    updated_at: chrono::DateTime<chrono::Utc>,
}

impl From<MemoryEntry> for MemoryEntryResponse {
    fn from(entry: MemoryEntry) -> Self {
        let (promoted_at, retracted_at) = match &entry.status {
            EntryStatus::Promoted { promoted_at } => (Some(*promoted_at), None),
            EntryStatus::Retracted { retracted_at } => (None, Some(*retracted_at)),
            EntryStatus::Candidate => (None, None),
        };
        Self {
            entry_id: entry.entry_id,
            workspace_id: entry.workspace_id,
            bucket: entry.bucket,
            key: entry.key,
            value: entry.value,
            status: entry.status.as_str(),
            confidence: entry.confidence,
            source_event_id: entry.source_event_id,
            promoted_at,
            retracted_at,
            expires_at: entry.expires_at,
            created_at: entry.created_at,
            updated_at: entry.updated_at,
        }
    }
}

/// Listing response for `GET /memory/{workspace_id}`.
#[derive(Debug, Serialize)]
pub struct ListMemoryResponse {
    entries: Vec<MemoryEntryResponse>,
    count: usize,
}

fn parse_status(status: &str) -> Result<&'static str, AppError> {
    match status {
        "candidate" => Ok("candidate"),
        "promoted" => Ok("promoted"),
        "retracted" => Ok("retracted"),
        other => Err(AppError::bad_request(format!("unknown status: {other}"))),
    }
}

/// List memory entries for `workspace_id`, filtered by bucket/status.
///
/// # Errors
///
/// Returns `400` if `bucket` or `status` is not a recognised enum value.
pub async fn list_memory(
    State(state): State<AppState>,
    Path(workspace_id): Path<String>,
    Query(params): Query<ListMemoryParams>,
) -> Result<Json<ListMemoryResponse>, AppError> {
    let bucket = params.bucket.as_deref().map(Bucket::parse).transpose()?;
    let status = params.status.as_deref().map(parse_status).transpose()?;

    let entries = state
        .memory_store
        .get_entries(EntryQuery {
            workspace_id,
            bucket,
            status,
            include_expired: params.include_expired,
        })
        .await?;

    Ok(Json(ListMemoryResponse {
        count: entries.len(),
        entries: entries.into_iter().map(Into::into).collect(),
    }))
}
