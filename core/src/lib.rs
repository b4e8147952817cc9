//! Core traits and types for the Clawderpunk workspace memory service.
//!
//! This crate has no I/O. It defines:
//!
//! - the event envelope and its closed set of event types ([`envelope`]),
//! - the memory entry shape and its lifecycle ([`memory`]),
//! - the trait contracts implemented by storage and transport crates
//!   ([`event_log`], [`memory_store`], [`backbone`], [`cursor`]),
//! - canonical JSON helpers used for the wire format and for relevance
//!   scoring ([`canonical_json`]).
//!
//! Concrete implementations live in sibling crates: `clawderpunk-postgres`
//! for the two stores, `clawderpunk-backbone` for the ordered transport.
//! An in-memory implementation of every trait lives in [`testing`] behind
//! the `testing` feature, for fast unit tests of the projection engine.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod backbone;
pub mod canonical_json;
pub mod cursor;
pub mod envelope;
pub mod event_log;
pub mod memory;
pub mod memory_store;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use backbone::{Backbone, BackboneError, EventStream};
pub use cursor::{ProjectionCheckpoint, ProjectionCursor};
pub use envelope::{Envelope, EnvelopeError, EventType, Severity};
pub use event_log::{EventLog, EventLogError, EventQuery, PersistOutcome};
pub use memory::{Bucket, EntryStatus, MemoryEntry, MemoryEntryError};
pub use memory_store::{EntryQuery, MemoryStore, MemoryStoreError, UpsertOutcome};
