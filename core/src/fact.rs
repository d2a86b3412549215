//! Fact types published by the identity service.
//!
//! A fact is an immutable record of something that already happened.
//! Facts are never mutated by any consumer; the reporting side only
//! projects them into a read model.
//!
//! Facts are serialized with `bincode`, matching the wire format used
//! across the pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use thiserror::Error;
use uuid::Uuid;

/// Error types for fact encoding and decoding.
#[derive(Error, Debug)]
pub enum FactError {
    /// Failed to serialize a fact to bytes.
    #[error("Failed to serialize fact: {0}")]
    Serialization(String),

    /// Failed to deserialize a fact from bytes.
    #[error("Failed to deserialize fact: {0}")]
    Deserialization(String),

    /// The envelope carries a different fact type than the one requested.
    #[error("Fact type mismatch: expected '{expected}', got '{actual}'")]
    TypeMismatch {
        /// The fact type the caller asked for.
        expected: &'static str,
        /// The fact type recorded in the envelope.
        actual: String,
    },
}

/// An immutable fact that can travel through the message broker.
///
/// # Fact Type Tags
///
/// [`Fact::FACT_TYPE`] is a stable string tag used to route a delivered
/// envelope to the right handler in the
/// [`HandlerRegistry`](crate::handler::HandlerRegistry). Include a
/// version suffix so the tag stays stable across releases:
/// `"UserRegistered.v1"`.
///
/// # Routing Keys
///
/// [`Fact::routing_key`] determines the broker partition. Facts with
/// the same key are delivered in publish order, which is the only
/// ordering guarantee the pipeline relies on.
pub trait Fact: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Stable type tag for handler dispatch, including a version suffix.
    const FACT_TYPE: &'static str;

    /// Broker partition key for this fact.
    fn routing_key(&self) -> String;

    /// Serialize this fact to bincode bytes.
    ///
    /// # Errors
    ///
    /// Returns [`FactError::Serialization`] if encoding fails.
    fn to_bytes(&self) -> Result<Vec<u8>, FactError> {
        bincode::serialize(self).map_err(|e| FactError::Serialization(e.to_string()))
    }

    /// Deserialize a fact from bincode bytes.
    ///
    /// # Errors
    ///
    /// Returns [`FactError::Deserialization`] if the bytes are not a
    /// valid encoding of this fact type.
    fn from_bytes(bytes: &[u8]) -> Result<Self, FactError> {
        bincode::deserialize(bytes).map_err(|e| FactError::Deserialization(e.to_string()))
    }
}

/// The fact that a user registered with the identity service.
///
/// Published once per registration, after the identity service has
/// durably created the user record. Immutable once published.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRegisteredFact {
    /// Opaque unique identifier of the user.
    pub user_id: Uuid,
    /// Username, unique within the identity domain. Uniqueness is
    /// enforced upstream; this pipeline treats it as advisory.
    pub username: String,
    /// Email address at registration time.
    pub email: String,
    /// When the user registered (UTC, set once at creation).
    pub registered_at: DateTime<Utc>,
}

impl Fact for UserRegisteredFact {
    const FACT_TYPE: &'static str = "UserRegistered.v1";

    fn routing_key(&self) -> String {
        self.user_id.to_string()
    }
}
