//! Message bus abstraction over an at-least-once, partitioned transport.
//!
//! The [`MessageBus`] trait covers both sides of the broker boundary:
//!
//! - **Publish**: durably enqueue an [`Envelope`] on a topic, keyed for
//!   ordering. The broker acknowledgement is the success boundary; the
//!   producer performs no caller-transparent retries of its own.
//! - **Subscribe**: a stream of [`Delivery`] values for a topic and
//!   consumer group. Each delivery must be settled exactly once with a
//!   [`Disposition`]; the transport only advances the committed offset
//!   after a [`Disposition::Commit`], and redelivers the envelope after
//!   a [`Disposition::Release`].
//!
//! The transport yields at most one unsettled delivery at a time, so a
//! consumer that settles only after its durable side effect gets the
//! strict "commit only after durable side effect" ordering the pipeline
//! depends on.
//!
//! # Implementations
//!
//! - `KafkaMessageBus` (in `user-reporting-kafka`) for production
//! - `InMemoryMessageBus` (in `user-reporting-testing`) for tests

use crate::envelope::Envelope;
use futures::Stream;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;
use tokio::sync::oneshot;

/// Errors that can occur at the broker boundary.
#[derive(Error, Debug, Clone)]
pub enum MessageBusError {
    /// Failed to connect to the broker.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Failed to publish an envelope to a topic.
    #[error("Publish failed for topic '{topic}': {reason}")]
    PublishFailed {
        /// The topic that failed.
        topic: String,
        /// The reason for failure.
        reason: String,
    },

    /// Failed to subscribe to a topic.
    #[error("Subscription failed for topics {topics:?}: {reason}")]
    SubscriptionFailed {
        /// The topics that failed to subscribe.
        topics: Vec<String>,
        /// The reason for failure.
        reason: String,
    },

    /// A delivered message could not be decoded into an envelope.
    ///
    /// Poison messages: the transport commits their offset and the
    /// subscription keeps going. One malformed message never halts the
    /// loop.
    #[error("Envelope deserialization failed: {0}")]
    Deserialization(String),

    /// Network or transport error while consuming.
    #[error("Transport error: {0}")]
    Transport(String),
}

/// Broker acknowledgement of a successful publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishAck {
    /// Partition the envelope landed on.
    pub partition: i32,
    /// Offset assigned by the broker.
    pub offset: i64,
}

/// Opaque position of a delivery within its partition.
///
/// Used for logging and diagnostics; the consumer never interprets it
/// beyond equality.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryToken {
    /// Partition the envelope was read from.
    pub partition: i32,
    /// Offset of the envelope within the partition.
    pub offset: i64,
}

/// How a consumer settles a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// The envelope was handled (or permanently rejected); advance the
    /// committed offset past it.
    Commit,
    /// Handling failed transiently; leave the offset untouched so the
    /// broker redelivers the envelope on a later poll.
    Release,
}

/// A delivered envelope awaiting settlement.
///
/// Dropping a delivery without settling it is treated by the transport
/// as consumer teardown: the offset is not committed and the envelope
/// will be redelivered after a restart.
#[derive(Debug)]
pub struct Delivery {
    /// The delivered envelope.
    pub envelope: Envelope,
    /// Position of this delivery within its partition.
    pub token: DeliveryToken,
    acker: oneshot::Sender<Disposition>,
}

impl Delivery {
    /// Pair an envelope with its settlement channel.
    ///
    /// Transports call this when handing a message to the subscriber
    /// and then await the receiving end before committing or releasing.
    #[must_use]
    pub fn new(
        envelope: Envelope,
        token: DeliveryToken,
    ) -> (Self, oneshot::Receiver<Disposition>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                envelope,
                token,
                acker: tx,
            },
            rx,
        )
    }

    /// Settle the delivery. Consumes the delivery; each envelope is
    /// settled at most once.
    pub fn settle(self, disposition: Disposition) {
        // The transport may already be gone during shutdown; nothing
        // to do in that case.
        let _ = self.acker.send(disposition);
    }
}

/// Stream of deliveries from a subscription.
///
/// Items are `Err` for poison messages and transport hiccups; both are
/// non-fatal and the stream continues.
pub type DeliveryStream = Pin<Box<dyn Stream<Item = Result<Delivery, MessageBusError>> + Send>>;

/// Publish/subscribe over a durable, partitioned, at-least-once broker.
///
/// # Dyn Compatibility
///
/// Uses explicit `Pin<Box<dyn Future>>` returns instead of `async fn`
/// so the bus can be shared as `Arc<dyn MessageBus>` between the
/// producer side and the consumer loop.
pub trait MessageBus: Send + Sync {
    /// Publish an envelope to a topic.
    ///
    /// Returns once the broker has durably enqueued the message. On
    /// failure the caller decides whether to retry or surface the
    /// error upstream.
    ///
    /// # Errors
    ///
    /// Returns [`MessageBusError::PublishFailed`] on timeout,
    /// connection loss, or serialization failure.
    fn publish(
        &self,
        topic: &str,
        envelope: &Envelope,
    ) -> Pin<Box<dyn Future<Output = Result<PublishAck, MessageBusError>> + Send + '_>>;

    /// Subscribe to topics and receive a stream of deliveries.
    ///
    /// The subscription is bound to the consumer group the bus was
    /// configured with. At most one unsettled delivery is in flight at
    /// a time.
    ///
    /// # Errors
    ///
    /// Returns [`MessageBusError::SubscriptionFailed`] if the
    /// subscription cannot be established.
    fn subscribe(
        &self,
        topics: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<DeliveryStream, MessageBusError>> + Send + '_>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample_envelope() -> Envelope {
        Envelope {
            fact_type: "UserRegistered.v1".to_string(),
            key: "k".to_string(),
            payload: vec![1, 2, 3],
            published_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn settle_reaches_the_transport() {
        let (delivery, rx) = Delivery::new(
            sample_envelope(),
            DeliveryToken {
                partition: 0,
                offset: 7,
            },
        );

        delivery.settle(Disposition::Commit);
        assert_eq!(rx.await, Ok(Disposition::Commit));
    }

    #[tokio::test]
    async fn dropped_delivery_signals_teardown() {
        let (delivery, rx) = Delivery::new(
            sample_envelope(),
            DeliveryToken {
                partition: 0,
                offset: 0,
            },
        );

        drop(delivery);
        assert!(rx.await.is_err());
    }
}
