//! Integration tests for [`RedpandaBackbone`] against a real Kafka
//! instance, started via testcontainers.
//!
//! # Panics
//!
//! Setup failures use `expect()`, which is acceptable in test code.

#![allow(clippy::expect_used)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]

use clawderpunk_backbone::RedpandaBackbone;
use clawderpunk_core::backbone::Backbone;
use futures::StreamExt;
use std::time::Duration;
use testcontainers::ImageExt;
use testcontainers::runners::AsyncRunner;
use testcontainers_modules::kafka::{KAFKA_PORT, Kafka};

async fn wait_for_ready(backbone: &RedpandaBackbone) {
    let max_attempts = 30;
    for attempt in 1..=max_attempts {
        if backbone.publish(b"warmup", b"{}".to_vec()).await.is_ok() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(attempt != max_attempts, "backbone failed to become ready after {max_attempts} attempts");
    }
}

#[tokio::test]
async fn publish_then_subscribe_round_trip() {
    let kafka = Kafka::default()
        .with_env_var("KAFKA_AUTO_CREATE_TOPICS_ENABLE", "true")
        .start()
        .await
        .expect("failed to start kafka container");

    let host = kafka.get_host().await.expect("failed to get host");
    let port = kafka.get_host_port_ipv4(KAFKA_PORT).await.expect("failed to get port");
    let brokers = format!("{host}:{port}");

    let backbone = RedpandaBackbone::builder()
        .brokers(&brokers)
        .topic("clawderpunk.events")
        .auto_offset_reset("earliest")
        .build()
        .expect("failed to build backbone");
    wait_for_ready(&backbone).await;

    let mut stream = backbone
        .subscribe("clawderpunk.events", "projection-engine")
        .await
        .expect("failed to subscribe");
    tokio::time::sleep(Duration::from_millis(500)).await;

    backbone
        .publish(b"ws-a", br#"{"hello":"world"}"#.to_vec())
        .await
        .expect("failed to publish");

    let delivered = tokio::time::timeout(Duration::from_secs(10), stream.next())
        .await
        .expect("timed out waiting for message")
        .expect("stream ended")
        .expect("delivery error");

    assert_eq!(delivered.payload, br#"{"hello":"world"}"#);

    backbone.commit(&delivered.offset).await.expect("commit should succeed");
}

#[tokio::test]
async fn uncommitted_message_is_redelivered_to_a_new_subscriber() {
    let kafka = Kafka::default()
        .with_env_var("KAFKA_AUTO_CREATE_TOPICS_ENABLE", "true")
        .start()
        .await
        .expect("failed to start kafka container");

    let host = kafka.get_host().await.expect("failed to get host");
    let port = kafka.get_host_port_ipv4(KAFKA_PORT).await.expect("failed to get port");
    let brokers = format!("{host}:{port}");

    let backbone = RedpandaBackbone::builder()
        .brokers(&brokers)
        .topic("clawderpunk.redelivery")
        .auto_offset_reset("earliest")
        .build()
        .expect("failed to build backbone");
    wait_for_ready(&backbone).await;

    {
        let mut stream = backbone
            .subscribe("clawderpunk.redelivery", "redelivery-group")
            .await
            .expect("failed to subscribe");
        tokio::time::sleep(Duration::from_millis(500)).await;

        backbone.publish(b"ws-a", b"never-committed".to_vec()).await.expect("failed to publish");

        let delivered = tokio::time::timeout(Duration::from_secs(10), stream.next())
            .await
            .expect("timed out")
            .expect("stream ended")
            .expect("delivery error");
        assert_eq!(delivered.payload, b"never-committed");
        // deliberately do not commit
    }

    let second = RedpandaBackbone::builder()
        .brokers(&brokers)
        .topic("clawderpunk.redelivery")
        .auto_offset_reset("earliest")
        .build()
        .expect("failed to build second backbone");

    let mut stream = second
        .subscribe("clawderpunk.redelivery", "redelivery-group")
        .await
        .expect("failed to subscribe again");

    let redelivered = tokio::time::timeout(Duration::from_secs(10), stream.next())
        .await
        .expect("timed out waiting for redelivery")
        .expect("stream ended")
        .expect("delivery error");

    assert_eq!(redelivered.payload, b"never-committed");
}
