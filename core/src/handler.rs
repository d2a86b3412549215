//! Fact handlers and the dispatch registry.
//!
//! The consumer loop dispatches each delivered envelope to the handler
//! registered for its fact type. The registry is populated once at
//! startup and passed by reference into the loop; there is no runtime
//! reflection and no container lookup per message.
//!
//! Handlers must be idempotent: the broker delivers at least once, so
//! the same fact may arrive any number of times.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;

/// Why a handler failed, and what the consumer loop should do about it.
#[derive(Error, Debug)]
pub enum HandlerError {
    /// A dependency (typically the repository) was unavailable. The
    /// envelope is released so the broker redelivers it on a later
    /// poll.
    #[error("Transient handler failure: {0}")]
    Transient(String),

    /// The payload is structurally invalid. Redelivery cannot fix it,
    /// so the envelope is committed and counted as rejected.
    #[error("Malformed fact payload: {0}")]
    Malformed(String),
}

/// Business logic invoked once per delivered envelope.
///
/// Implementations decode the payload themselves: a decode failure is
/// the handler's signal to classify the message as permanently
/// malformed rather than transiently failed.
///
/// # Dyn Compatibility
///
/// Uses explicit `Pin<Box<dyn Future>>` returns so handlers can live in
/// a heterogeneous [`HandlerRegistry`].
pub trait FactHandler: Send + Sync {
    /// Handle one fact payload.
    ///
    /// Must be idempotent: handling the same payload twice leaves the
    /// same persisted state as handling it once.
    ///
    /// # Errors
    ///
    /// - [`HandlerError::Transient`] to request redelivery
    /// - [`HandlerError::Malformed`] to drop the envelope permanently
    fn handle(
        &self,
        payload: &[u8],
    ) -> Pin<Box<dyn Future<Output = Result<(), HandlerError>> + Send + '_>>;
}

/// Mapping from fact-type tag to handler.
///
/// Multiple fact types can share one subscription surface; envelopes
/// whose type has no registered handler are logged and skipped by the
/// consumer loop, never fatal.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn FactHandler>>,
}

impl HandlerRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a fact type tag.
    ///
    /// Registering a second handler for the same tag replaces the
    /// first; the registry is built once at startup, so this only
    /// matters for misconfigured wiring, which the replacement makes
    /// visible in tests.
    pub fn register(&mut self, fact_type: impl Into<String>, handler: Arc<dyn FactHandler>) {
        let fact_type = fact_type.into();
        if self.handlers.insert(fact_type.clone(), handler).is_some() {
            tracing::warn!(fact_type = %fact_type, "Handler replaced for fact type");
        }
    }

    /// Look up the handler for a fact type tag.
    #[must_use]
    pub fn get(&self, fact_type: &str) -> Option<&Arc<dyn FactHandler>> {
        self.handlers.get(fact_type)
    }

    /// Number of registered fact types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether no handlers are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
