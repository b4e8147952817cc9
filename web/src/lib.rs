//! The HTTP surface for the Clawderpunk workspace memory service.
//!
//! Wires the routes from §6 of the specification onto [`AppState`]:
//! ingestion (`POST /events`), reads (`GET /events`, `GET
//! /context/{workspace_id}`, `GET /memory/{workspace_id}`), the replay
//! operation (`POST /replay/{workspace_id}`), and the dependency-aware
//! `GET /health`. Every route except `/health` is wrapped in
//! [`middleware::BearerAuthLayer`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod extractors;
pub mod handlers;
pub mod middleware;
pub mod state;

pub use error::AppError;
pub use extractors::CorrelationId;
pub use middleware::{correlation_id_layer, BearerAuthLayer, CorrelationIdExt, CORRELATION_ID_HEADER};
pub use state::AppState;

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

/// Result type alias for web handlers.
pub type WebResult<T> = Result<T, AppError>;

/// Build the full router: every route from §6, bearer-auth applied to all
/// but `/health`.
#[must_use]
pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/events", post(handlers::ingest_event).get(handlers::list_events))
        .route("/context/:workspace_id", get(handlers::get_context_pack))
        .route("/memory/:workspace_id", get(handlers::list_memory))
        .route("/replay/:workspace_id", post(handlers::replay_workspace))
        .layer(BearerAuthLayer::new(state.bearer_token.clone()));

    Router::new()
        .route("/health", get(handlers::health_check))
        .merge(protected)
        .layer(correlation_id_layer())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use clawderpunk_core::testing::{InMemoryBackbone, InMemoryCheckpoint, InMemoryEventLog, InMemoryMemoryStore};
    use clawderpunk_projection::{ContextPackAssembler, ProjectionWorker};
    use std::sync::Arc;
    use tower::ServiceExt;

    async fn test_state(bearer_token: &str) -> AppState {
        let event_log: Arc<dyn clawderpunk_core::event_log::EventLog> = Arc::new(InMemoryEventLog::new());
        let memory_store: Arc<dyn clawderpunk_core::memory_store::MemoryStore> = Arc::new(InMemoryMemoryStore::new());
        let backbone: Arc<dyn clawderpunk_core::backbone::Backbone> = Arc::new(InMemoryBackbone::new());
        let checkpoint: Arc<dyn clawderpunk_core::cursor::ProjectionCheckpoint> = Arc::new(InMemoryCheckpoint::new());

        let context_packs = Arc::new(ContextPackAssembler::new(Arc::clone(&memory_store), Arc::clone(&event_log)));
        let (worker, _shutdown) = ProjectionWorker::new(
            Arc::clone(&backbone),
            Arc::clone(&event_log),
            Arc::clone(&memory_store),
            checkpoint,
            "clawderpunk",
            "clawderpunk.events",
            "projection-engine",
        );

        AppState::new(
            event_log,
            memory_store,
            backbone,
            context_packs,
            Arc::new(worker),
            bearer_token.to_string(),
            "clawderpunk",
            "clawderpunk.events",
        )
    }

    #[tokio::test]
    async fn health_is_reachable_without_a_bearer_token() {
        let app = router(test_state("secret").await);
        let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn events_without_bearer_token_is_rejected() {
        let app = router(test_state("secret").await);
        let request = Request::builder()
            .uri("/events?workspace_id=ws-a")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn events_with_bearer_token_is_accepted() {
        let app = router(test_state("secret").await);
        let request = Request::builder()
            .uri("/events?workspace_id=ws-a")
            .header(header::AUTHORIZATION, "Bearer secret")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
