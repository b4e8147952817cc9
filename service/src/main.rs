//! Clawderpunk workspace memory service: HTTP surface plus the background
//! projection worker, sharing one `Postgres`/backbone dependency graph.

mod config;

use anyhow::Context;
use clawderpunk_backbone::RedpandaBackbone;
use clawderpunk_core::backbone::Backbone;
use clawderpunk_core::cursor::ProjectionCheckpoint;
use clawderpunk_core::event_log::EventLog;
use clawderpunk_core::memory_store::MemoryStore;
use clawderpunk_postgres::{PostgresCheckpoint, PostgresEventLog, PostgresMemoryStore};
use clawderpunk_projection::{ContextPackAssembler, ProjectionWorker};
use clawderpunk_web::AppState;
use config::Config;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Installs the global recorder so `metrics::counter!` calls in
    // `projection` land somewhere; §1's non-goal excludes the `/metrics`
    // endpoint, not the instrumentation itself, so no HTTP listener is
    // started for it here.
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .context("failed to install metrics recorder")?;

    let config = Config::from_env()?;
    info!(
        backbone_brokers = %config.backbone_brokers,
        backbone_topic = %config.backbone_topic,
        http_addr = %config.http_addr,
        "configuration loaded"
    );

    info!("connecting to postgres");
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .context("failed to connect to postgres")?;

    info!("running migrations");
    clawderpunk_postgres::migrate(&pool).await.context("failed to run migrations")?;

    let event_log: Arc<dyn EventLog> = Arc::new(PostgresEventLog::new(pool.clone()));
    let memory_store: Arc<dyn MemoryStore> = Arc::new(PostgresMemoryStore::new(pool.clone()));
    let checkpoint: Arc<dyn ProjectionCheckpoint> = Arc::new(PostgresCheckpoint::new(pool.clone()));
    let replay_checkpoint: Arc<dyn ProjectionCheckpoint> = Arc::new(PostgresCheckpoint::new(pool));

    info!("connecting to backbone");
    let backbone: Arc<dyn Backbone> = Arc::new(
        RedpandaBackbone::builder()
            .brokers(config.backbone_brokers.as_str())
            .topic(config.backbone_topic.as_str())
            .build()
            .context("failed to build backbone producer")?,
    );

    let context_packs = Arc::new(ContextPackAssembler::new(Arc::clone(&memory_store), Arc::clone(&event_log)));

    let (mut consumer_worker, shutdown_tx) = ProjectionWorker::new(
        Arc::clone(&backbone),
        Arc::clone(&event_log),
        Arc::clone(&memory_store),
        checkpoint,
        "clawderpunk",
        config.backbone_topic.as_str(),
        config.consumer_group.as_str(),
    );

    // `replay()` only needs `&self` but `run()` needs `&mut self`, and the
    // consumer worker's `run()` is moved into its own task below; the HTTP
    // side gets its own worker over the same stores so `POST
    // /replay/{workspace_id}` can call `replay()` without fighting that
    // borrow. Its checkpoint is never touched since `replay()` doesn't use it.
    let (http_worker, _http_worker_shutdown) = ProjectionWorker::new(
        Arc::clone(&backbone),
        Arc::clone(&event_log),
        Arc::clone(&memory_store),
        replay_checkpoint,
        "clawderpunk",
        config.backbone_topic.as_str(),
        config.consumer_group.as_str(),
    );

    let state = AppState::new(
        event_log,
        memory_store,
        backbone,
        context_packs,
        Arc::new(http_worker),
        config.bearer_token.clone(),
        "clawderpunk",
        config.backbone_topic.clone(),
    );

    let app = clawderpunk_web::router(state);

    let projection_task = tokio::spawn(async move {
        if let Err(err) = consumer_worker.run().await {
            error!(error = %err, "projection worker stopped with an error");
        }
    });

    let listener = tokio::net::TcpListener::bind(&config.http_addr)
        .await
        .context("failed to bind HTTP listener")?;
    info!(address = %config.http_addr, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    info!("HTTP server stopped, signalling projection worker to shut down");
    let _ = shutdown_tx.send(true);
    let _ = projection_task.await;

    Ok(())
}

/// Wait for Ctrl+C or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.ok();
    };

    #[cfg(unix)]
    let terminate = async {
        if let Ok(mut sig) = signal::unix::signal(signal::unix::SignalKind::terminate()) {
            sig.recv().await;
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received Ctrl+C, shutting down"),
        () = terminate => info!("received SIGTERM, shutting down"),
    }
}
