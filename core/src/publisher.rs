//! Typed producer front for registration facts.
//!
//! The identity service calls [`RegistrationPublisher::publish`] after
//! its own user record is durably created. The publisher wraps the fact
//! in an envelope keyed by `user_id` and hands it to the bus; the
//! broker acknowledgement is the success boundary.
//!
//! Publish-after-commit is not atomic with the identity write. A crash
//! between the two loses the fact; this pipeline accepts that window
//! rather than carrying an outbox (see the workspace design notes).

use crate::bus::{MessageBus, PublishAck};
use crate::envelope::Envelope;
use crate::fact::{Fact, FactError};
use crate::{bus::MessageBusError, fact::UserRegisteredFact};
use std::sync::Arc;
use thiserror::Error;

/// Why a publish attempt failed.
///
/// The caller chooses whether to retry or surface the failure upstream;
/// the publisher performs no retries of its own.
#[derive(Error, Debug)]
pub enum PublishError {
    /// The fact could not be encoded into an envelope.
    #[error(transparent)]
    Encoding(#[from] FactError),

    /// The broker did not acknowledge the publish.
    #[error(transparent)]
    Bus(#[from] MessageBusError),
}

/// Publishes [`UserRegisteredFact`]s to the registration topic.
pub struct RegistrationPublisher {
    bus: Arc<dyn MessageBus>,
    topic: String,
}

impl RegistrationPublisher {
    /// Create a publisher bound to one topic.
    #[must_use]
    pub fn new(bus: Arc<dyn MessageBus>, topic: impl Into<String>) -> Self {
        Self {
            bus,
            topic: topic.into(),
        }
    }

    /// The topic this publisher writes to.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Publish one registration fact.
    ///
    /// Returns the broker acknowledgement (partition and offset) once
    /// the message is durably enqueued.
    ///
    /// # Errors
    ///
    /// Returns [`PublishError`] on encoding failure or when the broker
    /// cannot be reached.
    pub async fn publish(&self, fact: &UserRegisteredFact) -> Result<PublishAck, PublishError> {
        let envelope = Envelope::from_fact(fact)?;
        let ack = self.bus.publish(&self.topic, &envelope).await?;

        tracing::info!(
            user_id = %fact.user_id,
            username = %fact.username,
            topic = %self.topic,
            partition = ack.partition,
            offset = ack.offset,
            "Registration fact published"
        );

        Ok(ack)
    }
}
