//! HTTP request handlers, one module per route group from §6.

pub mod context;
pub mod events;
pub mod health;
pub mod memory;
pub mod replay;

pub use context::get_context_pack;
pub use events::{ingest_event, list_events};
pub use health::health_check;
pub use memory::list_memory;
pub use replay::replay_workspace;
