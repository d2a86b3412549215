//! Kafka message bus for the user-reporting pipeline.
//!
//! This crate implements the [`MessageBus`] trait from
//! `user-reporting-core` on top of rdkafka. It works against any
//! Kafka-compatible broker (Apache Kafka, Redpanda, MSK, ...).
//!
//! # Delivery Semantics
//!
//! **At-least-once** with manual offset commits, gated on the consumer:
//!
//! - The producer treats the broker acknowledgement as the success
//!   boundary and performs no retries beyond the client's native ones.
//! - Messages are keyed by the envelope's routing key (`user_id`), so
//!   all facts for one user stay on one partition in publish order.
//! - The subscription hands out one [`Delivery`] at a time and waits
//!   for it to be settled before polling the next message. A
//!   [`Disposition::Commit`] commits the offset; a
//!   [`Disposition::Release`] seeks back so the broker redelivers the
//!   same message on the next poll.
//! - Undecodable message bodies are poison: their offset is committed
//!   and the error is surfaced on the stream without stopping it.
//!
//! # Example
//!
//! ```no_run
//! use user_reporting_kafka::KafkaMessageBus;
//! use user_reporting_core::bus::MessageBus;
//! use user_reporting_core::envelope::Envelope;
//! use user_reporting_core::fact::{Fact, UserRegisteredFact};
//!
//! # async fn example(fact: UserRegisteredFact) -> Result<(), Box<dyn std::error::Error>> {
//! let bus = KafkaMessageBus::builder()
//!     .brokers("localhost:9092")
//!     .consumer_group("reporting-service")
//!     .build()?;
//!
//! let envelope = Envelope::from_fact(&fact)?;
//! let ack = bus.publish("user-registrations", &envelope).await?;
//! println!("partition {} offset {}", ack.partition, ack.offset);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use rdkafka::{Offset, TopicPartitionList};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use user_reporting_core::bus::{
    Delivery, DeliveryStream, DeliveryToken, Disposition, MessageBus, MessageBusError, PublishAck,
};
use user_reporting_core::envelope::Envelope;

/// Kafka-backed message bus.
///
/// One instance owns a producer connection and acts as a factory for
/// subscriptions; each call to [`MessageBus::subscribe`] creates its
/// own `StreamConsumer` bound to the configured consumer group.
pub struct KafkaMessageBus {
    /// Producer for publishing envelopes.
    producer: FutureProducer,
    /// Broker addresses (used when creating consumers).
    brokers: String,
    /// Producer send timeout.
    timeout: Duration,
    /// Consumer group identifying the reporting subscription.
    consumer_group: String,
    /// Where a new consumer group starts reading.
    auto_offset_reset: String,
}

impl KafkaMessageBus {
    /// Create a builder for configuring the bus.
    #[must_use]
    pub fn builder() -> KafkaMessageBusBuilder {
        KafkaMessageBusBuilder::default()
    }

    /// Broker addresses this bus connects to.
    #[must_use]
    pub fn brokers(&self) -> &str {
        &self.brokers
    }

    /// Consumer group used by subscriptions.
    #[must_use]
    pub fn consumer_group(&self) -> &str {
        &self.consumer_group
    }
}

/// Builder for [`KafkaMessageBus`].
#[derive(Default)]
pub struct KafkaMessageBusBuilder {
    brokers: Option<String>,
    consumer_group: Option<String>,
    producer_acks: Option<String>,
    timeout: Option<Duration>,
    auto_offset_reset: Option<String>,
}

impl KafkaMessageBusBuilder {
    /// Set the broker bootstrap addresses (comma-separated).
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Set the consumer group id for subscriptions.
    ///
    /// Multiple instances of the reporting service sharing one group
    /// split the partitions between them; per-user ordering survives
    /// because the routing key pins a user to one partition.
    #[must_use]
    pub fn consumer_group(mut self, group: impl Into<String>) -> Self {
        self.consumer_group = Some(group.into());
        self
    }

    /// Producer acknowledgement mode: "0", "1", or "all".
    ///
    /// Default: "all" — the publish success boundary is durable
    /// enqueueing, so waiting for replicas is the right default here.
    #[must_use]
    pub fn producer_acks(mut self, acks: impl Into<String>) -> Self {
        self.producer_acks = Some(acks.into());
        self
    }

    /// Producer send timeout. Default: 5 seconds.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Offset reset policy for a consumer group with no committed
    /// offset: "earliest", "latest", or "error". Default: "earliest",
    /// so a fresh reporting deployment picks up the whole topic.
    #[must_use]
    pub fn auto_offset_reset(mut self, policy: impl Into<String>) -> Self {
        self.auto_offset_reset = Some(policy.into());
        self
    }

    /// Build the bus.
    ///
    /// # Errors
    ///
    /// Returns [`MessageBusError::ConnectionFailed`] if brokers or the
    /// consumer group are missing, or the producer cannot be created.
    pub fn build(self) -> Result<KafkaMessageBus, MessageBusError> {
        let brokers = self
            .brokers
            .ok_or_else(|| MessageBusError::ConnectionFailed("Brokers not configured".to_string()))?;
        let consumer_group = self.consumer_group.ok_or_else(|| {
            MessageBusError::ConnectionFailed("Consumer group not configured".to_string())
        })?;

        let acks = self.producer_acks.unwrap_or_else(|| "all".to_string());

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &brokers)
            .set("message.timeout.ms", "5000")
            .set("acks", &acks)
            .create()
            .map_err(|e| {
                MessageBusError::ConnectionFailed(format!("Failed to create producer: {e}"))
            })?;

        let auto_offset_reset = self
            .auto_offset_reset
            .unwrap_or_else(|| "earliest".to_string());

        tracing::info!(
            brokers = %brokers,
            consumer_group = %consumer_group,
            acks = %acks,
            auto_offset_reset = %auto_offset_reset,
            "KafkaMessageBus created"
        );

        Ok(KafkaMessageBus {
            producer,
            brokers,
            timeout: self.timeout.unwrap_or(Duration::from_secs(5)),
            consumer_group,
            auto_offset_reset,
        })
    }
}

/// Commit one message's offset, logging on failure.
///
/// A failed commit is not fatal: the message may be redelivered after a
/// restart, which the idempotent read model absorbs.
fn commit_offset(consumer: &StreamConsumer, topic: &str, partition: i32, offset: i64) {
    let mut tpl = TopicPartitionList::new();
    if tpl
        .add_partition_offset(topic, partition, Offset::Offset(offset + 1))
        .is_err()
    {
        tracing::warn!(topic, partition, offset, "Failed to build commit list");
        return;
    }
    if let Err(e) = consumer.commit(&tpl, CommitMode::Async) {
        tracing::warn!(
            topic,
            partition,
            offset,
            error = %e,
            "Failed to commit offset (message may be redelivered)"
        );
    }
}

impl MessageBus for KafkaMessageBus {
    fn publish(
        &self,
        topic: &str,
        envelope: &Envelope,
    ) -> Pin<Box<dyn Future<Output = Result<PublishAck, MessageBusError>> + Send + '_>> {
        let topic = topic.to_string();
        let envelope = envelope.clone();
        let timeout = self.timeout;

        Box::pin(async move {
            let payload = envelope.to_wire().map_err(|e| MessageBusError::PublishFailed {
                topic: topic.clone(),
                reason: format!("Failed to encode envelope: {e}"),
            })?;

            // Routing key = user_id: all facts for one user land on one
            // partition and arrive in publish order.
            let record = FutureRecord::to(&topic)
                .payload(&payload)
                .key(envelope.key.as_bytes());

            match self.producer.send(record, Timeout::After(timeout)).await {
                Ok((partition, offset)) => {
                    tracing::debug!(
                        topic = %topic,
                        partition,
                        offset,
                        fact_type = %envelope.fact_type,
                        key = %envelope.key,
                        "Envelope published"
                    );
                    Ok(PublishAck { partition, offset })
                }
                Err((kafka_error, _)) => {
                    tracing::error!(
                        topic = %topic,
                        fact_type = %envelope.fact_type,
                        error = %kafka_error,
                        "Failed to publish envelope"
                    );
                    Err(MessageBusError::PublishFailed {
                        topic,
                        reason: kafka_error.to_string(),
                    })
                }
            }
        })
    }

    #[allow(clippy::too_many_lines)] // Settlement-gated consumption needs the full state machine in one place
    fn subscribe(
        &self,
        topics: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<DeliveryStream, MessageBusError>> + Send + '_>> {
        let topics: Vec<String> = topics.iter().map(|s| (*s).to_string()).collect();
        let brokers = self.brokers.clone();
        let consumer_group = self.consumer_group.clone();
        let auto_offset_reset = self.auto_offset_reset.clone();

        Box::pin(async move {
            let consumer: StreamConsumer = ClientConfig::new()
                .set("bootstrap.servers", &brokers)
                .set("group.id", &consumer_group)
                .set("enable.auto.commit", "false") // Manual commit, gated on settlement
                .set("auto.offset.reset", &auto_offset_reset)
                .set("session.timeout.ms", "6000")
                .set("enable.partition.eof", "false")
                .create()
                .map_err(|e| MessageBusError::SubscriptionFailed {
                    topics: topics.clone(),
                    reason: format!("Failed to create consumer: {e}"),
                })?;

            let topic_refs: Vec<&str> = topics.iter().map(String::as_str).collect();
            consumer
                .subscribe(&topic_refs)
                .map_err(|e| MessageBusError::SubscriptionFailed {
                    topics: topics.clone(),
                    reason: format!("Failed to subscribe: {e}"),
                })?;

            tracing::info!(
                topics = ?topics,
                consumer_group = %consumer_group,
                auto_offset_reset = %auto_offset_reset,
                "Subscribed to topics"
            );

            // One unsettled delivery at a time: the forwarding task
            // waits for the settlement of each delivery before polling
            // the next message, so commits always trail the handler's
            // durable side effect.
            let (tx, rx) = tokio::sync::mpsc::channel::<Result<Delivery, MessageBusError>>(1);

            tokio::spawn(async move {
                use futures::StreamExt;

                let mut stream = consumer.stream();

                while let Some(msg_result) = stream.next().await {
                    match msg_result {
                        Ok(message) => {
                            let topic = message.topic().to_string();
                            let partition = message.partition();
                            let offset = message.offset();

                            let Some(payload) = message.payload() else {
                                // Poison: nothing to decode, nothing to retry.
                                if tx
                                    .send(Err(MessageBusError::Deserialization(
                                        "Message has no payload".to_string(),
                                    )))
                                    .await
                                    .is_err()
                                {
                                    break;
                                }
                                commit_offset(&consumer, &topic, partition, offset);
                                continue;
                            };

                            let envelope = match Envelope::from_wire(payload) {
                                Ok(envelope) => envelope,
                                Err(e) => {
                                    // Poison: commit past it so one bad
                                    // message never wedges the group.
                                    if tx
                                        .send(Err(MessageBusError::Deserialization(format!(
                                            "Failed to decode envelope at {topic}[{partition}]@{offset}: {e}"
                                        ))))
                                        .await
                                        .is_err()
                                    {
                                        break;
                                    }
                                    commit_offset(&consumer, &topic, partition, offset);
                                    continue;
                                }
                            };

                            tracing::trace!(
                                topic = %topic,
                                partition,
                                offset,
                                fact_type = %envelope.fact_type,
                                "Envelope received"
                            );

                            let (delivery, settled) =
                                Delivery::new(envelope, DeliveryToken { partition, offset });

                            if tx.send(Ok(delivery)).await.is_err() {
                                // Receiver dropped: exit WITHOUT committing.
                                break;
                            }

                            match settled.await {
                                Ok(Disposition::Commit) => {
                                    commit_offset(&consumer, &topic, partition, offset);
                                }
                                Ok(Disposition::Release) => {
                                    // Seek back so the next poll
                                    // redelivers this message.
                                    if let Err(e) = consumer.seek(
                                        &topic,
                                        partition,
                                        Offset::Offset(offset),
                                        Duration::from_secs(5),
                                    ) {
                                        tracing::error!(
                                            topic = %topic,
                                            partition,
                                            offset,
                                            error = %e,
                                            "Failed to seek for redelivery"
                                        );
                                    } else {
                                        tracing::debug!(
                                            topic = %topic,
                                            partition,
                                            offset,
                                            "Released for redelivery"
                                        );
                                    }
                                }
                                Err(_) => {
                                    // Delivery dropped unsettled:
                                    // consumer teardown. Do not commit.
                                    tracing::debug!(
                                        topic = %topic,
                                        partition,
                                        offset,
                                        "Delivery dropped unsettled, exiting consumer task"
                                    );
                                    break;
                                }
                            }
                        }
                        Err(e) => {
                            if tx
                                .send(Err(MessageBusError::Transport(format!(
                                    "Failed to receive message: {e}"
                                ))))
                                .await
                                .is_err()
                            {
                                break;
                            }
                        }
                    }
                }

                tracing::debug!("Kafka consumer task exiting");
            });

            let stream = async_stream::stream! {
                let mut rx = rx;
                while let Some(result) = rx.recv().await {
                    yield result;
                }
            };

            Ok(Box::pin(stream) as DeliveryStream)
        })
    }
}
