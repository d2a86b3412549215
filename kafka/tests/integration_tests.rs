//! Integration tests for [`KafkaMessageBus`] against a real broker.
//!
//! These use testcontainers to spin up Kafka and validate the delivery
//! contract end to end: publish/consume round-trip, commit-after-settle,
//! and release-triggered redelivery.
//!
//! Ignored by default: they need Docker and take tens of seconds each.
//!
//! ```bash
//! cargo test -p user-reporting-kafka --test integration_tests -- --ignored
//! ```

#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use futures::StreamExt;
use std::time::Duration;
use testcontainers::ImageExt;
use testcontainers::runners::AsyncRunner;
use testcontainers_modules::kafka::{KAFKA_PORT, Kafka};
use user_reporting_core::bus::{Disposition, MessageBus};
use user_reporting_core::envelope::Envelope;
use user_reporting_core::fact::{Fact, UserRegisteredFact};
use user_reporting_kafka::KafkaMessageBus;
use uuid::Uuid;

fn sample_fact(username: &str) -> UserRegisteredFact {
    UserRegisteredFact {
        user_id: Uuid::new_v4(),
        username: username.to_string(),
        email: format!("{username}@x.com"),
        registered_at: chrono::Utc::now(),
    }
}

async fn wait_for_broker_ready(brokers: &str) {
    let max_attempts = 60;
    for attempt in 1..=max_attempts {
        if let Ok(bus) = KafkaMessageBus::builder()
            .brokers(brokers)
            .consumer_group("warmup")
            .build()
        {
            let envelope =
                Envelope::from_fact(&sample_fact("warmup")).expect("envelope should build");
            if bus.publish("warmup-topic", &envelope).await.is_ok() {
                tokio::time::sleep(Duration::from_millis(500)).await;
                return;
            }
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(
            attempt != max_attempts,
            "Broker failed to become ready after {max_attempts} attempts"
        );
    }
}

#[tokio::test]
#[ignore]
async fn publish_consume_and_commit_round_trip() {
    let kafka = Kafka::default()
        .with_env_var("KAFKA_AUTO_CREATE_TOPICS_ENABLE", "true")
        .start()
        .await
        .expect("Failed to start Kafka container");

    let host = kafka.get_host().await.expect("Failed to get host");
    let port = kafka
        .get_host_port_ipv4(KAFKA_PORT)
        .await
        .expect("Failed to get port");
    let brokers = format!("{host}:{port}");
    wait_for_broker_ready(&brokers).await;

    let bus = KafkaMessageBus::builder()
        .brokers(&brokers)
        .consumer_group("round-trip-test")
        .auto_offset_reset("earliest")
        .build()
        .expect("Failed to create bus");

    let fact = sample_fact("alice");
    let envelope = Envelope::from_fact(&fact).expect("envelope should build");
    let ack = bus
        .publish("registration-round-trip", &envelope)
        .await
        .expect("publish should succeed");
    assert!(ack.offset >= 0);

    let mut stream = bus
        .subscribe(&["registration-round-trip"])
        .await
        .expect("subscribe should succeed");

    let delivery = tokio::time::timeout(Duration::from_secs(30), async {
        loop {
            match stream.next().await {
                Some(Ok(delivery)) => break delivery,
                Some(Err(_)) => continue, // transport warm-up noise
                None => panic!("stream ended before delivering"),
            }
        }
    })
    .await
    .expect("delivery should arrive in time");

    let received: UserRegisteredFact = delivery.envelope.decode().expect("fact should decode");
    assert_eq!(received, fact);
    delivery.settle(Disposition::Commit);
}

#[tokio::test]
#[ignore]
async fn released_delivery_is_redelivered() {
    let kafka = Kafka::default()
        .with_env_var("KAFKA_AUTO_CREATE_TOPICS_ENABLE", "true")
        .start()
        .await
        .expect("Failed to start Kafka container");

    let host = kafka.get_host().await.expect("Failed to get host");
    let port = kafka
        .get_host_port_ipv4(KAFKA_PORT)
        .await
        .expect("Failed to get port");
    let brokers = format!("{host}:{port}");
    wait_for_broker_ready(&brokers).await;

    let bus = KafkaMessageBus::builder()
        .brokers(&brokers)
        .consumer_group("redelivery-test")
        .auto_offset_reset("earliest")
        .build()
        .expect("Failed to create bus");

    let fact = sample_fact("bob");
    let envelope = Envelope::from_fact(&fact).expect("envelope should build");
    bus.publish("registration-redelivery", &envelope)
        .await
        .expect("publish should succeed");

    let mut stream = bus
        .subscribe(&["registration-redelivery"])
        .await
        .expect("subscribe should succeed");

    let mut deliveries = 0usize;
    let result = tokio::time::timeout(Duration::from_secs(60), async {
        loop {
            match stream.next().await {
                Some(Ok(delivery)) => {
                    deliveries += 1;
                    let received: UserRegisteredFact =
                        delivery.envelope.decode().expect("fact should decode");
                    assert_eq!(received.user_id, fact.user_id);
                    if deliveries == 1 {
                        // Simulate a transient handler failure.
                        delivery.settle(Disposition::Release);
                    } else {
                        delivery.settle(Disposition::Commit);
                        break;
                    }
                }
                Some(Err(_)) => continue,
                None => panic!("stream ended before redelivering"),
            }
        }
    })
    .await;

    assert!(result.is_ok(), "redelivery did not arrive in time");
    assert_eq!(deliveries, 2, "expected exactly one redelivery");
}
