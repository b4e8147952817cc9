//! `PostgreSQL`-backed implementations of the store traits from
//! `clawderpunk-core`.
//!
//! - [`PostgresEventLog`] implements `EventLog`.
//! - [`PostgresMemoryStore`] implements `MemoryStore`.
//! - [`PostgresCheckpoint`] implements `ProjectionCheckpoint`.
//!
//! All three share one `PgPool`; [`migrate`] runs the embedded migrations.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod checkpoint;
mod event_log;
mod memory_store;
mod row;

pub use checkpoint::PostgresCheckpoint;
pub use event_log::PostgresEventLog;
pub use memory_store::PostgresMemoryStore;

/// Run the embedded schema migrations against `pool`.
///
/// # Errors
///
/// Returns a [`sqlx::migrate::MigrateError`] if a migration fails to
/// apply.
pub async fn migrate(pool: &sqlx::PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}
