//! Kafka-compatible implementation of [`clawderpunk_core::backbone::Backbone`]
//! using rdkafka.
//!
//! # Delivery semantics
//!
//! At-least-once, with auto-commit disabled. `subscribe` spawns a task that
//! owns an `Arc<StreamConsumer>` and forwards raw message bytes plus an
//! opaque [`MessageOffset`] over a bounded channel; the caller is
//! responsible for calling [`Backbone::commit`] only once its own pipeline
//! (decode, persist, project) has fully succeeded for that message. This
//! backbone never commits on the caller's behalf.
//!
//! Publishing waits for `acks = all` before returning, and partitions by
//! workspace id so events for one workspace are always delivered in order
//! to the same consumer. One `RedpandaBackbone` is bound to a single topic
//! (`BACKBONE_TOPIC`) at construction, matching the single ordered event
//! stream the rest of the service assumes.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use clawderpunk_core::backbone::{Backbone, BackboneError, BackboneMessage, EventStream, MessageOffset};
use rdkafka::Offset;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::topic_partition_list::TopicPartitionList;
use rdkafka::util::Timeout;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Kafka-compatible backbone bound to a single topic. One instance both
/// publishes and, after [`Backbone::subscribe`] is called once, consumes —
/// mirroring how the projection worker and the ingestion HTTP handlers
/// share a process.
pub struct RedpandaBackbone {
    producer: FutureProducer,
    brokers: String,
    topic: String,
    timeout: Duration,
    buffer_size: usize,
    auto_offset_reset: String,
    /// Populated by `subscribe`; `commit` needs a handle back to the same
    /// consumer to build a [`TopicPartitionList`] since [`MessageOffset`]
    /// itself only carries partition and offset.
    consumer: Mutex<Option<Arc<StreamConsumer>>>,
}

impl RedpandaBackbone {
    /// Construct with default configuration.
    ///
    /// # Errors
    ///
    /// Returns [`BackboneError::ConnectionFailed`] if the producer cannot be
    /// created.
    pub fn new(brokers: &str, topic: &str) -> Result<Self, BackboneError> {
        Self::builder().brokers(brokers).topic(topic).build()
    }

    /// A builder for non-default configuration.
    #[must_use]
    pub fn builder() -> RedpandaBackboneBuilder {
        RedpandaBackboneBuilder::default()
    }
}

/// Builder for [`RedpandaBackbone`].
#[derive(Default)]
pub struct RedpandaBackboneBuilder {
    brokers: Option<String>,
    topic: Option<String>,
    producer_acks: Option<String>,
    compression: Option<String>,
    timeout: Option<Duration>,
    buffer_size: Option<usize>,
    auto_offset_reset: Option<String>,
}

impl RedpandaBackboneBuilder {
    /// Comma-separated broker addresses. Required.
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// The single topic this backbone publishes to and (if `subscribe` is
    /// called) consumes from. Required.
    #[must_use]
    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    /// Producer acknowledgement mode. Default `"all"`, matching the
    /// durability the ingestion path needs before it reports success.
    #[must_use]
    pub fn producer_acks(mut self, acks: impl Into<String>) -> Self {
        self.producer_acks = Some(acks.into());
        self
    }

    /// Compression codec. Default `"none"`.
    #[must_use]
    pub fn compression(mut self, compression: impl Into<String>) -> Self {
        self.compression = Some(compression.into());
        self
    }

    /// Producer send timeout. Default 5 seconds.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Channel buffer size between the consumer task and the stream the
    /// caller reads from. Default 1000.
    ///
    /// # Panics
    ///
    /// Panics if `buffer_size` is 0.
    #[must_use]
    pub fn buffer_size(mut self, buffer_size: usize) -> Self {
        assert!(buffer_size > 0, "buffer_size must be greater than 0");
        self.buffer_size = Some(buffer_size);
        self
    }

    /// Offset reset policy for new consumer groups. Default `"earliest"`,
    /// since a newly deployed projection worker should process the
    /// existing backlog rather than silently skip it.
    #[must_use]
    pub fn auto_offset_reset(mut self, policy: impl Into<String>) -> Self {
        self.auto_offset_reset = Some(policy.into());
        self
    }

    /// Build the [`RedpandaBackbone`].
    ///
    /// # Errors
    ///
    /// Returns [`BackboneError::ConnectionFailed`] if brokers/topic are
    /// missing or the producer cannot be created.
    pub fn build(self) -> Result<RedpandaBackbone, BackboneError> {
        let brokers = self
            .brokers
            .ok_or_else(|| BackboneError::ConnectionFailed("brokers not configured".to_string()))?;
        let topic = self
            .topic
            .ok_or_else(|| BackboneError::ConnectionFailed("topic not configured".to_string()))?;

        let mut producer_config = ClientConfig::new();
        producer_config
            .set("bootstrap.servers", &brokers)
            .set("message.timeout.ms", "5000")
            .set("acks", self.producer_acks.as_deref().unwrap_or("all"))
            .set("compression.type", self.compression.as_deref().unwrap_or("none"));

        let producer: FutureProducer = producer_config
            .create()
            .map_err(|e| BackboneError::ConnectionFailed(format!("failed to create producer: {e}")))?;

        tracing::info!(
            brokers = %brokers,
            topic = %topic,
            acks = self.producer_acks.as_deref().unwrap_or("all"),
            "backbone producer created"
        );

        Ok(RedpandaBackbone {
            producer,
            brokers,
            topic,
            timeout: self.timeout.unwrap_or(Duration::from_secs(5)),
            buffer_size: self.buffer_size.unwrap_or(1000),
            auto_offset_reset: self.auto_offset_reset.unwrap_or_else(|| "earliest".to_string()),
            consumer: Mutex::new(None),
        })
    }
}

impl Backbone for RedpandaBackbone {
    fn publish(
        &self,
        partition_key: &[u8],
        payload: Vec<u8>,
    ) -> Pin<Box<dyn Future<Output = Result<(), BackboneError>> + Send + '_>> {
        let key = partition_key.to_vec();
        Box::pin(async move {
            let record = FutureRecord::to(&self.topic).payload(&payload).key(&key);

            match self.producer.send(record, Timeout::After(self.timeout)).await {
                Ok((partition, offset)) => {
                    tracing::debug!(partition, offset, "published event");
                    Ok(())
                }
                Err((err, _)) => Err(BackboneError::PublishFailed(err.to_string())),
            }
        })
    }

    fn subscribe(
        &self,
        topic: &str,
        consumer_group: &str,
    ) -> Pin<Box<dyn Future<Output = Result<EventStream, BackboneError>> + Send + '_>> {
        let topic = topic.to_string();
        let consumer_group = consumer_group.to_string();
        let brokers = self.brokers.clone();
        let buffer_size = self.buffer_size;
        let auto_offset_reset = self.auto_offset_reset.clone();

        Box::pin(async move {
            let consumer: StreamConsumer = ClientConfig::new()
                .set("bootstrap.servers", &brokers)
                .set("group.id", &consumer_group)
                .set("enable.auto.commit", "false")
                .set("auto.offset.reset", &auto_offset_reset)
                .set("session.timeout.ms", "6000")
                .set("enable.partition.eof", "false")
                .create()
                .map_err(|e| BackboneError::SubscribeFailed(format!("failed to create consumer: {e}")))?;

            consumer
                .subscribe(&[topic.as_str()])
                .map_err(|e| BackboneError::SubscribeFailed(format!("failed to subscribe: {e}")))?;

            tracing::info!(topic = %topic, consumer_group = %consumer_group, "subscribed to backbone topic");

            let consumer = Arc::new(consumer);
            *self.consumer.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = Some(consumer.clone());

            let (tx, mut rx) = tokio::sync::mpsc::channel(buffer_size);

            tokio::spawn(async move {
                use futures::StreamExt;

                let mut stream = consumer.stream();
                while let Some(msg_result) = stream.next().await {
                    let forwarded = match msg_result {
                        Ok(message) => {
                            let Some(payload) = message.payload() else {
                                tracing::warn!("message with no payload, skipping");
                                continue;
                            };
                            Ok(BackboneMessage {
                                payload: payload.to_vec(),
                                offset: MessageOffset {
                                    partition: message.partition(),
                                    offset: message.offset(),
                                },
                            })
                        }
                        Err(e) => Err(BackboneError::SubscribeFailed(e.to_string())),
                    };

                    if tx.send(forwarded).await.is_err() {
                        tracing::debug!("receiver dropped, exiting consumer task");
                        break;
                    }
                }
            });

            let stream = async_stream::stream! {
                while let Some(item) = rx.recv().await {
                    yield item;
                }
            };

            Ok(Box::pin(stream) as EventStream)
        })
    }

    fn commit(
        &self,
        offset: &MessageOffset,
    ) -> Pin<Box<dyn Future<Output = Result<(), BackboneError>> + Send + '_>> {
        let offset = offset.clone();
        Box::pin(async move {
            let consumer = {
                let guard = self.consumer.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
                guard
                    .clone()
                    .ok_or_else(|| BackboneError::CommitFailed("commit called before subscribe".to_string()))?
            };

            let mut tpl = TopicPartitionList::new();
            tpl.add_partition_offset(&self.topic, offset.partition, Offset::Offset(offset.offset + 1))
                .map_err(|e| BackboneError::CommitFailed(e.to_string()))?;

            consumer
                .commit(&tpl, CommitMode::Sync)
                .map_err(|e| BackboneError::CommitFailed(e.to_string()))
        })
    }

    fn partition_count(
        &self,
        topic: &str,
    ) -> Pin<Box<dyn Future<Output = Result<usize, BackboneError>> + Send + '_>> {
        let topic = topic.to_string();
        Box::pin(async move {
            let metadata = self
                .producer
                .client()
                .fetch_metadata(Some(&topic), Timeout::After(self.timeout))
                .map_err(|e| BackboneError::Metadata(e.to_string()))?;

            let count = metadata
                .topics()
                .iter()
                .find(|t| t.name() == topic)
                .map_or(0, |t| t.partitions().len());

            Ok(count)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redpanda_backbone_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<RedpandaBackbone>();
        assert_sync::<RedpandaBackbone>();
    }

    #[test]
    fn builder_default_works() {
        let _builder = RedpandaBackbone::builder();
    }

    #[test]
    fn builder_requires_topic() {
        let err = RedpandaBackbone::builder().brokers("localhost:9092").build().unwrap_err();
        assert!(matches!(err, BackboneError::ConnectionFailed(_)));
    }
}
