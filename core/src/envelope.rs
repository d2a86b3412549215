//! The envelope wrapping a fact with its routing metadata.
//!
//! An [`Envelope`] is what actually crosses the broker: the serialized
//! fact plus the fact-type tag (for handler dispatch) and the routing
//! key (for partition assignment). The envelope itself is encoded with
//! `bincode` on the wire.

use crate::fact::{Fact, FactError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A fact plus the routing metadata assigned by the messaging layer.
///
/// The envelope is immutable after construction. Delivery-side metadata
/// (partition, offset) is not part of the envelope; the transport
/// attaches it as a [`DeliveryToken`](crate::bus::DeliveryToken) when
/// the envelope is delivered.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// The fact type tag, e.g. `"UserRegistered.v1"`.
    pub fact_type: String,
    /// Routing key for partition assignment. For registration facts
    /// this is the `user_id`, which pins all of one user's facts to a
    /// single partition.
    pub key: String,
    /// The bincode-serialized fact.
    pub payload: Vec<u8>,
    /// When the producer built this envelope (UTC).
    pub published_at: DateTime<Utc>,
}

impl Envelope {
    /// Wrap a fact into an envelope ready for publishing.
    ///
    /// # Errors
    ///
    /// Returns [`FactError::Serialization`] if the fact cannot be
    /// encoded.
    pub fn from_fact<F: Fact>(fact: &F) -> Result<Self, FactError> {
        Ok(Self {
            fact_type: F::FACT_TYPE.to_string(),
            key: fact.routing_key(),
            payload: fact.to_bytes()?,
            published_at: Utc::now(),
        })
    }

    /// Decode the payload as a specific fact type.
    ///
    /// # Errors
    ///
    /// Returns [`FactError::TypeMismatch`] if the envelope carries a
    /// different fact type, or [`FactError::Deserialization`] if the
    /// payload bytes are invalid.
    pub fn decode<F: Fact>(&self) -> Result<F, FactError> {
        if self.fact_type != F::FACT_TYPE {
            return Err(FactError::TypeMismatch {
                expected: F::FACT_TYPE,
                actual: self.fact_type.clone(),
            });
        }
        F::from_bytes(&self.payload)
    }

    /// Encode the envelope for the wire.
    ///
    /// # Errors
    ///
    /// Returns [`FactError::Serialization`] if encoding fails.
    pub fn to_wire(&self) -> Result<Vec<u8>, FactError> {
        bincode::serialize(self).map_err(|e| FactError::Serialization(e.to_string()))
    }

    /// Decode an envelope from wire bytes.
    ///
    /// # Errors
    ///
    /// Returns [`FactError::Deserialization`] if the bytes are not a
    /// valid envelope.
    pub fn from_wire(bytes: &[u8]) -> Result<Self, FactError> {
        bincode::deserialize(bytes).map_err(|e| FactError::Deserialization(e.to_string()))
    }
}

impl fmt::Display for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Envelope {{ type: {}, key: {}, size: {} bytes }}",
            self.fact_type,
            self.key,
            self.payload.len()
        )
    }
}
