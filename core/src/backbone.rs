//! The ordered backbone: a partitioned, replayable message transport with
//! per-workspace ordering and at-least-once delivery.
//!
//! This trait is deliberately lower-level than the source workspace's
//! `EventBus`: that trait deserialises messages and commits offsets
//! internally, inside the task that drives `subscribe`. §4.5 and §5
//! require the caller to control exactly when an offset commits — only
//! after decode, persist, and project have all succeeded — so `subscribe`
//! here yields raw bytes plus an opaque [`MessageOffset`], and committing
//! is a separate, explicit call.
//!
//! # Dyn Compatibility
//!
//! Explicit `Pin<Box<dyn Future>>` returns so the producer and the
//! consumer can each be held as `Arc<dyn Backbone>`.

use futures::Stream;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors raised by a [`Backbone`] implementation.
#[derive(Error, Debug, Clone)]
pub enum BackboneError {
    /// Failed to connect to the backbone.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    /// Publish did not receive the broker's durability acknowledgement.
    #[error("publish failed: {0}")]
    PublishFailed(String),
    /// Subscribing to a topic failed.
    #[error("subscribe failed: {0}")]
    SubscribeFailed(String),
    /// Committing an offset failed.
    #[error("commit failed: {0}")]
    CommitFailed(String),
    /// Querying partition metadata failed.
    #[error("metadata error: {0}")]
    Metadata(String),
}

/// An opaque handle identifying one delivered message's position, to be
/// passed back to [`Backbone::commit`] once the caller's pipeline for that
/// message has fully succeeded.
#[derive(Debug, Clone)]
pub struct MessageOffset {
    /// Transport-assigned partition.
    pub partition: i32,
    /// Transport-assigned offset within the partition.
    pub offset: i64,
}

/// One delivered message: undecoded bytes plus its offset handle.
#[derive(Debug, Clone)]
pub struct BackboneMessage {
    /// Raw message bytes — canonical JSON envelope, per §6's wire format.
    pub payload: Vec<u8>,
    /// Position to acknowledge via [`Backbone::commit`] after successful
    /// processing.
    pub offset: MessageOffset,
}

/// Stream of delivered messages from [`Backbone::subscribe`].
pub type EventStream = Pin<Box<dyn Stream<Item = Result<BackboneMessage, BackboneError>> + Send>>;

/// Partitioned, replayable transport between producers and the
/// projection worker.
pub trait Backbone: Send + Sync {
    /// Publish `payload` keyed by `partition_key`, waiting for the
    /// broker's durability acknowledgement (`acks = all`) before
    /// returning.
    ///
    /// # Errors
    ///
    /// Returns [`BackboneError::PublishFailed`] if the broker does not
    /// acknowledge the write.
    fn publish(
        &self,
        partition_key: &[u8],
        payload: Vec<u8>,
    ) -> Pin<Box<dyn Future<Output = Result<(), BackboneError>> + Send + '_>>;

    /// Subscribe to `topic` under `consumer_group`, with offset auto-commit
    /// disabled — commits only happen via an explicit [`Backbone::commit`]
    /// call.
    ///
    /// # Errors
    ///
    /// Returns [`BackboneError::SubscribeFailed`] if the subscription
    /// cannot be established.
    fn subscribe(
        &self,
        topic: &str,
        consumer_group: &str,
    ) -> Pin<Box<dyn Future<Output = Result<EventStream, BackboneError>> + Send + '_>>;

    /// Acknowledge that the message at `offset` has been fully processed.
    ///
    /// # Errors
    ///
    /// Returns [`BackboneError::CommitFailed`] if the commit does not
    /// reach the broker.
    fn commit(
        &self,
        offset: &MessageOffset,
    ) -> Pin<Box<dyn Future<Output = Result<(), BackboneError>> + Send + '_>>;

    /// Number of partitions currently visible for `topic`, used by the
    /// health check (§4.4: reachable iff at least one partition is
    /// visible).
    ///
    /// # Errors
    ///
    /// Returns [`BackboneError::Metadata`] if partition metadata cannot be
    /// fetched at all (as opposed to fetching and finding zero partitions,
    /// which is a valid `Ok(0)`).
    fn partition_count(
        &self,
        topic: &str,
    ) -> Pin<Box<dyn Future<Output = Result<usize, BackboneError>> + Send + '_>>;
}
