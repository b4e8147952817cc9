//! `GET /context/{workspace_id}`.

use crate::error::AppError;
use crate::state::AppState;
use axum::extract::{Path, Query, State};
use axum::Json;
use clawderpunk_projection::ContextPack;
use serde::Deserialize;

/// Query parameters for `GET /context/{workspace_id}`.
#[derive(Debug, Deserialize)]
pub struct ContextParams {
    q: Option<String>,
    since: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default = "default_limit")]
    limit: u32,
}

const fn default_limit() -> u32 {
    12
}

/// Assemble and return a context pack for `workspace_id`.
///
/// # Errors
///
/// Returns `5xx` if a store lookup fails.
pub async fn get_context_pack(
    State(state): State<AppState>,
    Path(workspace_id): Path<String>,
    Query(params): Query<ContextParams>,
) -> Result<Json<ContextPack>, AppError> {
    let pack = state
        .context_packs
        .assemble(&workspace_id, params.q.as_deref(), params.since, params.limit, chrono::Utc::now())
        .await?;
    Ok(Json(pack))
}
