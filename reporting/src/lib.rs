//! # User Reporting — Consumer Side
//!
//! The downstream half of the pipeline: a long-running subscription
//! loop that pulls registration facts off the broker, dispatches them
//! to idempotent handlers, and persists the read model.
//!
//! ```text
//! Broker ──> ConsumerLoop ──> HandlerRegistry ──> UserRegisteredHandler
//!                                                        │
//!                                                        ▼
//!                                              ReportRepository (Postgres)
//! ```
//!
//! The loop settles each delivery only after the handler's durable side
//! effect, so offsets never run ahead of the read model. Duplicate
//! deliveries are absorbed by the repository's upsert; malformed
//! payloads are dropped and counted; transient failures release the
//! envelope for broker-native redelivery.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod consumer;
mod handler;
mod postgres;

pub use consumer::{ConsumerError, ConsumerLoop, ConsumerStats, ConsumerStatsSnapshot};
pub use handler::UserRegisteredHandler;
pub use postgres::PostgresReportRepository;
