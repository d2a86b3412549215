//! In-memory message bus with broker-faithful delivery semantics.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use user_reporting_core::bus::{
    Delivery, DeliveryStream, DeliveryToken, Disposition, MessageBus, MessageBusError, PublishAck,
};
use user_reporting_core::envelope::Envelope;

/// In-memory broker fake.
///
/// Stores published envelopes as wire bytes per topic, exactly like the
/// real transport, so poison messages can be injected with
/// [`InMemoryMessageBus::publish_bytes`] and decode failures behave the
/// same as on Kafka: the offset advances and the stream yields an
/// error.
///
/// Delivery follows the production contract: one unsettled delivery at
/// a time, the cursor advances only on [`Disposition::Commit`], and a
/// [`Disposition::Release`] redelivers the same envelope next.
///
/// # Example
///
/// ```
/// use user_reporting_testing::InMemoryMessageBus;
/// use user_reporting_core::bus::MessageBus;
/// use user_reporting_core::envelope::Envelope;
/// use user_reporting_core::fact::{Fact, UserRegisteredFact};
/// use uuid::Uuid;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let bus = InMemoryMessageBus::new();
/// let fact = UserRegisteredFact {
///     user_id: Uuid::new_v4(),
///     username: "alice".to_string(),
///     email: "a@x.com".to_string(),
///     registered_at: chrono::Utc::now(),
/// };
/// let ack = bus.publish("user-registrations", &Envelope::from_fact(&fact)?).await?;
/// assert_eq!(ack.offset, 0);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Default)]
pub struct InMemoryMessageBus {
    topics: Arc<Mutex<HashMap<String, Vec<Vec<u8>>>>>,
    wakeup: Arc<Notify>,
}

impl InMemoryMessageBus {
    /// Create an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append raw bytes to a topic, bypassing envelope encoding.
    ///
    /// Use this to inject poison messages that fail to decode on the
    /// consumer side.
    pub fn publish_bytes(&self, topic: &str, bytes: Vec<u8>) -> PublishAck {
        let mut topics = self.topics.lock().unwrap();
        let log = topics.entry(topic.to_string()).or_default();
        log.push(bytes);
        let offset = i64::try_from(log.len()).unwrap_or(i64::MAX) - 1;
        drop(topics);
        self.wakeup.notify_waiters();
        PublishAck {
            partition: 0,
            offset,
        }
    }

    /// Number of messages ever published to a topic.
    #[must_use]
    pub fn topic_len(&self, topic: &str) -> usize {
        self.topics
            .lock()
            .unwrap()
            .get(topic)
            .map_or(0, Vec::len)
    }
}

impl MessageBus for InMemoryMessageBus {
    fn publish(
        &self,
        topic: &str,
        envelope: &Envelope,
    ) -> Pin<Box<dyn Future<Output = Result<PublishAck, MessageBusError>> + Send + '_>> {
        let topic = topic.to_string();
        let envelope = envelope.clone();

        Box::pin(async move {
            let bytes = envelope
                .to_wire()
                .map_err(|e| MessageBusError::PublishFailed {
                    topic: topic.clone(),
                    reason: e.to_string(),
                })?;
            Ok(self.publish_bytes(&topic, bytes))
        })
    }

    fn subscribe(
        &self,
        topics: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<DeliveryStream, MessageBusError>> + Send + '_>> {
        let subscribed: Vec<String> = topics.iter().map(|s| (*s).to_string()).collect();
        let state = Arc::clone(&self.topics);
        let wakeup = Arc::clone(&self.wakeup);

        Box::pin(async move {
            let (tx, rx) = tokio::sync::mpsc::channel::<Result<Delivery, MessageBusError>>(1);

            tokio::spawn(async move {
                let mut cursors: HashMap<String, usize> = HashMap::new();

                loop {
                    // Create the wakeup future before scanning so a
                    // publish between scan and await is not lost.
                    let notified = wakeup.notified();

                    let next = {
                        let topics = state.lock().unwrap();
                        subscribed.iter().find_map(|topic| {
                            let cursor = cursors.get(topic).copied().unwrap_or(0);
                            topics
                                .get(topic)
                                .and_then(|log| log.get(cursor))
                                .map(|bytes| (topic.clone(), cursor, bytes.clone()))
                        })
                    };

                    let Some((topic, cursor, bytes)) = next else {
                        notified.await;
                        continue;
                    };

                    let token = DeliveryToken {
                        partition: 0,
                        offset: i64::try_from(cursor).unwrap_or(i64::MAX),
                    };

                    match Envelope::from_wire(&bytes) {
                        Ok(envelope) => {
                            let (delivery, settled) = Delivery::new(envelope, token);
                            if tx.send(Ok(delivery)).await.is_err() {
                                break;
                            }
                            match settled.await {
                                Ok(Disposition::Commit) => {
                                    cursors.insert(topic, cursor + 1);
                                }
                                Ok(Disposition::Release) => {
                                    // Cursor untouched: redeliver.
                                }
                                Err(_) => break,
                            }
                        }
                        Err(e) => {
                            // Poison: advance past it, surface the error.
                            cursors.insert(topic, cursor + 1);
                            if tx
                                .send(Err(MessageBusError::Deserialization(e.to_string())))
                                .await
                                .is_err()
                            {
                                break;
                            }
                        }
                    }
                }
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
