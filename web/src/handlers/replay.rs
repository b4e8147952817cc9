//! `POST /replay/{workspace_id}`.

use crate::error::AppError;
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::Json;
use serde::Serialize;

/// Response body for a completed replay.
#[derive(Debug, Serialize)]
pub struct ReplayResponse {
    status: &'static str,
    entries_deleted: u64,
    events_replayed: u64,
    entries_created: u64,
}

/// Rebuild `workspace_id`'s memory state from the event log. Runs
/// synchronously; not retried (§7).
///
/// # Errors
///
/// Returns `5xx` if a store operation fails.
pub async fn replay_workspace(
    State(state): State<AppState>,
    Path(workspace_id): Path<String>,
) -> Result<Json<ReplayResponse>, AppError> {
    let summary = state.projection_worker.replay(&workspace_id).await?;
    tracing::info!(
        workspace_id = %workspace_id,
        entries_deleted = summary.entries_deleted,
        events_replayed = summary.events_replayed,
        entries_created = summary.entries_created,
        "replay completed"
    );
    Ok(Json(ReplayResponse {
        status: "completed",
        entries_deleted: summary.entries_deleted,
        events_replayed: summary.events_replayed,
        entries_created: summary.entries_created,
    }))
}
