//! `GET /health`.
//!
//! Dependency-aware per §4.4/SPEC_FULL §F: probes Postgres reachability via
//! a trivial query and Kafka/Redpanda reachability via partition metadata
//! for the configured topic, grounded on
//! `original_source/src/punk_records/api/health.py`'s `{status, postgres,
//! kafka}` response shape.

use crate::state::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use clawderpunk_core::event_log::EventQuery;
use serde::Serialize;

/// Health response body.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: &'static str,
    postgres: &'static str,
    kafka: &'static str,
}

#[allow(clippy::unused_async)]
async fn check_postgres(state: &AppState) -> bool {
    let Ok(query) = EventQuery::try_new("__health__".to_string(), None, None, None, 1, 0) else {
        return false;
    };
    state.event_log.query(query).await.is_ok()
}

async fn check_kafka(state: &AppState) -> bool {
    state
        .backbone
        .partition_count(&state.topic)
        .await
        .is_ok_and(|count| count >= 1)
}

/// Report service health: `healthy` iff both Postgres and Kafka/Redpanda are
/// reachable, `unhealthy` otherwise. Always `200`; callers read `status`.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let postgres_ok = check_postgres(&state).await;
    let kafka_ok = check_kafka(&state).await;

    let status = if postgres_ok && kafka_ok { "healthy" } else { "unhealthy" };

    (
        StatusCode::OK,
        Json(HealthResponse {
            status,
            postgres: if postgres_ok { "ok" } else { "error" },
            kafka: if kafka_ok { "ok" } else { "error" },
        }),
    )
}
