//! Application state shared across all HTTP handlers.

use clawderpunk_core::backbone::Backbone;
use clawderpunk_core::event_log::EventLog;
use clawderpunk_core::memory_store::MemoryStore;
use clawderpunk_projection::ContextPackAssembler;
use clawderpunk_projection::ProjectionWorker;
use std::sync::Arc;

/// Everything an HTTP handler needs to serve a request: the two stores, the
/// backbone producer, the context-pack assembler, and the projection worker
/// (held so `POST /replay/{workspace_id}` can drive it directly).
#[derive(Clone)]
pub struct AppState {
    /// Idempotent event log, shared with the projection worker.
    pub event_log: Arc<dyn EventLog>,
    /// Materialised memory store, shared with the projection worker.
    pub memory_store: Arc<dyn MemoryStore>,
    /// Backbone producer used by `POST /events`.
    pub backbone: Arc<dyn Backbone>,
    /// Read-side context-pack assembler.
    pub context_packs: Arc<ContextPackAssembler>,
    /// Projection worker, invoked directly by the replay handler.
    pub projection_worker: Arc<ProjectionWorker>,
    /// Bearer token every non-exempt request must present.
    pub bearer_token: Arc<str>,
    /// Identity stamped on synthetic envelopes and used for the backbone
    /// topic this service publishes to.
    pub service_name: Arc<str>,
    /// Backbone topic events are published to.
    pub topic: Arc<str>,
}

impl AppState {
    /// Construct application state from its dependencies.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        event_log: Arc<dyn EventLog>,
        memory_store: Arc<dyn MemoryStore>,
        backbone: Arc<dyn Backbone>,
        context_packs: Arc<ContextPackAssembler>,
        projection_worker: Arc<ProjectionWorker>,
        bearer_token: impl Into<Arc<str>>,
        service_name: impl Into<Arc<str>>,
        topic: impl Into<Arc<str>>,
    ) -> Self {
        Self {
            event_log,
            memory_store,
            backbone,
            context_packs,
            projection_worker,
            bearer_token: bearer_token.into(),
            service_name: service_name.into(),
            topic: topic.into(),
        }
    }
}
