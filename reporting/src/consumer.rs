//! The subscription loop: poll, dispatch, settle, repeat.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::sync::watch;
use user_reporting_core::bus::{Delivery, Disposition, MessageBus, MessageBusError};
use user_reporting_core::handler::{HandlerError, HandlerRegistry};

use futures::StreamExt;

/// Error terminating the consumer loop.
///
/// Only subscription setup can kill the loop; everything that happens
/// per message is absorbed, logged, and counted.
#[derive(Error, Debug)]
pub enum ConsumerError {
    /// The subscription could not be established.
    #[error("Failed to subscribe: {0}")]
    Subscribe(#[from] MessageBusError),
}

/// Shared counters describing what the loop has done so far.
///
/// Cheap to clone; the service exposes these for observability and the
/// tests assert on them.
#[derive(Clone, Debug, Default)]
pub struct ConsumerStats {
    handled: Arc<AtomicU64>,
    rejected: Arc<AtomicU64>,
    released: Arc<AtomicU64>,
    skipped: Arc<AtomicU64>,
    poison: Arc<AtomicU64>,
}

/// Point-in-time view of [`ConsumerStats`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConsumerStatsSnapshot {
    /// Envelopes handled successfully and committed.
    pub handled: u64,
    /// Envelopes with structurally invalid payloads, dropped and committed.
    pub rejected: u64,
    /// Envelopes released for redelivery after a transient failure.
    pub released: u64,
    /// Envelopes whose fact type had no registered handler.
    pub skipped: u64,
    /// Messages that could not be decoded into an envelope at all.
    pub poison: u64,
}

impl ConsumerStats {
    /// Take a snapshot of all counters.
    #[must_use]
    pub fn snapshot(&self) -> ConsumerStatsSnapshot {
        ConsumerStatsSnapshot {
            handled: self.handled.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            released: self.released.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            poison: self.poison.load(Ordering::Relaxed),
        }
    }
}

/// Long-running subscription loop bound to one topic and one consumer
/// group (the group is configured on the bus).
///
/// For every delivery the loop looks up the handler for the envelope's
/// fact type and settles according to the outcome:
///
/// | outcome                     | settlement | counter    |
/// |-----------------------------|------------|------------|
/// | handled                     | commit     | `handled`  |
/// | malformed payload           | commit     | `rejected` |
/// | transient handler failure   | release    | `released` |
/// | no handler for fact type    | commit     | `skipped`  |
/// | undecodable message body    | (transport commits) | `poison` |
///
/// The shutdown signal is observed between deliveries, never
/// mid-handler: an in-flight envelope is always settled before the
/// loop exits.
pub struct ConsumerLoop {
    bus: Arc<dyn MessageBus>,
    registry: Arc<HandlerRegistry>,
    topic: String,
    shutdown: watch::Receiver<bool>,
    stats: ConsumerStats,
}

impl ConsumerLoop {
    /// Create a consumer loop for one topic.
    ///
    /// Returns the loop and a shutdown sender; send `true` to stop the
    /// loop after the current in-flight envelope settles.
    #[must_use]
    pub fn new(
        bus: Arc<dyn MessageBus>,
        registry: Arc<HandlerRegistry>,
        topic: impl Into<String>,
    ) -> (Self, watch::Sender<bool>) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        (
            Self {
                bus,
                registry,
                topic: topic.into(),
                shutdown: shutdown_rx,
                stats: ConsumerStats::default(),
            },
            shutdown_tx,
        )
    }

    /// Counters shared with this loop.
    #[must_use]
    pub fn stats(&self) -> ConsumerStats {
        self.stats.clone()
    }

    /// Subscribe and process deliveries until shutdown.
    ///
    /// # Errors
    ///
    /// Returns [`ConsumerError::Subscribe`] if the subscription cannot
    /// be established. Per-message failures never terminate the loop.
    pub async fn run(&mut self) -> Result<(), ConsumerError> {
        tracing::info!(
            topic = %self.topic,
            handlers = self.registry.len(),
            "Starting consumer loop"
        );

        let mut deliveries = self.bus.subscribe(&[self.topic.as_str()]).await?;

        while !*self.shutdown.borrow() {
            tokio::select! {
                next = deliveries.next() => {
                    match next {
                        Some(Ok(delivery)) => self.dispatch(delivery).await,
                        Some(Err(MessageBusError::Deserialization(reason))) => {
                            // Poison message: the transport already
                            // committed past it.
                            self.stats.poison.fetch_add(1, Ordering::Relaxed);
                            tracing::warn!(
                                topic = %self.topic,
                                reason = %reason,
                                "Skipped poison message"
                            );
                        }
                        Some(Err(e)) => {
                            tracing::error!(
                                topic = %self.topic,
                                error = %e,
                                "Transport error on subscription"
                            );
                        }
                        None => {
                            tracing::info!(topic = %self.topic, "Delivery stream ended");
                            break;
                        }
                    }
                }
                _ = self.shutdown.changed() => {
                    if *self.shutdown.borrow() {
                        tracing::info!(topic = %self.topic, "Shutdown signal received");
                        break;
                    }
                }
            }
        }

        tracing::info!(
            topic = %self.topic,
            stats = ?self.stats.snapshot(),
            "Consumer loop stopped"
        );
        Ok(())
    }

    /// Route one delivery to its handler and settle it.
    async fn dispatch(&self, delivery: Delivery) {
        let fact_type = delivery.envelope.fact_type.clone();
        let token = delivery.token;

        let Some(handler) = self.registry.get(&fact_type) else {
            self.stats.skipped.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                fact_type = %fact_type,
                partition = token.partition,
                offset = token.offset,
                "No handler registered for fact type, skipping"
            );
            delivery.settle(Disposition::Commit);
            return;
        };

        match handler.handle(&delivery.envelope.payload).await {
            Ok(()) => {
                self.stats.handled.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    fact_type = %fact_type,
                    partition = token.partition,
                    offset = token.offset,
                    "Envelope handled"
                );
                delivery.settle(Disposition::Commit);
            }
            Err(HandlerError::Malformed(reason)) => {
                // Redelivery cannot fix a structurally invalid payload:
                // drop it and move on.
                self.stats.rejected.fetch_add(1, Ordering::Relaxed);
                tracing::error!(
                    fact_type = %fact_type,
                    partition = token.partition,
                    offset = token.offset,
                    reason = %reason,
                    "Rejected malformed fact payload"
                );
                delivery.settle(Disposition::Commit);
            }
            Err(HandlerError::Transient(reason)) => {
                self.stats.released.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    fact_type = %fact_type,
                    partition = token.partition,
                    offset = token.offset,
                    reason = %reason,
                    "Transient handler failure, releasing for redelivery"
                );
                delivery.settle(Disposition::Release);
            }
        }
    }
}
